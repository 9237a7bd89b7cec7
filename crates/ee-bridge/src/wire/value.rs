//! Typed scalar values.
//!
//! A value is written as a one-byte type tag followed by a big-endian
//! payload. Strings and byte arrays carry an `i32` length prefix; NULL has
//! no payload.

use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use super::{get_prefixed, need, put_prefixed, WireError, WireResult};

/// Type tag of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ValueType {
    /// SQL NULL.
    Null = 1,
    /// 8-bit signed integer.
    TinyInt = 3,
    /// 16-bit signed integer.
    SmallInt = 4,
    /// 32-bit signed integer.
    Integer = 5,
    /// 64-bit signed integer.
    BigInt = 6,
    /// 64-bit IEEE float.
    Float = 8,
    /// UTF-8 string.
    String = 9,
    /// Raw bytes.
    VarBinary = 25,
}

impl ValueType {
    /// Returns the tag byte.
    #[inline]
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        self as i8
    }

    /// Parses a tag byte.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tags.
    pub fn from_i8(tag: i8) -> WireResult<Self> {
        match tag {
            1 => Ok(Self::Null),
            3 => Ok(Self::TinyInt),
            4 => Ok(Self::SmallInt),
            5 => Ok(Self::Integer),
            6 => Ok(Self::BigInt),
            8 => Ok(Self::Float),
            9 => Ok(Self::String),
            25 => Ok(Self::VarBinary),
            _ => Err(WireError::new("value", format!("unknown type tag {tag}"))),
        }
    }

    /// Returns true for the integer types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "NULL",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Float => "FLOAT",
            Self::String => "VARCHAR",
            Self::VarBinary => "VARBINARY",
        };
        f.write_str(name)
    }
}

/// A typed scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 8-bit signed integer.
    TinyInt(i8),
    /// 16-bit signed integer.
    SmallInt(i16),
    /// 32-bit signed integer.
    Integer(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit IEEE float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    VarBinary(Bytes),
}

impl Value {
    /// Returns the type of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::TinyInt(_) => ValueType::TinyInt,
            Self::SmallInt(_) => ValueType::SmallInt,
            Self::Integer(_) => ValueType::Integer,
            Self::BigInt(_) => ValueType::BigInt,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::VarBinary(_) => ValueType::VarBinary,
        }
    }

    /// Returns true if this is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value widened to `i64` if it is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::TinyInt(v) => Some(*v as i64),
            Self::SmallInt(v) => Some(*v as i64),
            Self::Integer(v) => Some(*v as i64),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string contents if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the encoded size including the tag byte.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Null => 0,
            Self::TinyInt(_) => 1,
            Self::SmallInt(_) => 2,
            Self::Integer(_) => 4,
            Self::BigInt(_) | Self::Float(_) => 8,
            Self::String(s) => 4 + s.len(),
            Self::VarBinary(b) => 4 + b.len(),
        }
    }

    /// Writes the tagged value.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i8(self.value_type().as_i8());
        match self {
            Self::Null => {}
            Self::TinyInt(v) => buf.put_i8(*v),
            Self::SmallInt(v) => buf.put_i16(*v),
            Self::Integer(v) => buf.put_i32(*v),
            Self::BigInt(v) => buf.put_i64(*v),
            Self::Float(v) => buf.put_f64(*v),
            Self::String(s) => put_prefixed(buf, s.as_bytes()),
            Self::VarBinary(b) => put_prefixed(buf, b),
        }
    }

    /// Reads one tagged value.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown tags, truncation or invalid UTF-8.
    pub fn decode(buf: &mut &[u8]) -> WireResult<Self> {
        need(&*buf, 1, "value")?;
        let value_type = ValueType::from_i8(buf.get_i8())?;
        let value = match value_type {
            ValueType::Null => Self::Null,
            ValueType::TinyInt => {
                need(&*buf, 1, "value")?;
                Self::TinyInt(buf.get_i8())
            }
            ValueType::SmallInt => {
                need(&*buf, 2, "value")?;
                Self::SmallInt(buf.get_i16())
            }
            ValueType::Integer => {
                need(&*buf, 4, "value")?;
                Self::Integer(buf.get_i32())
            }
            ValueType::BigInt => {
                need(&*buf, 8, "value")?;
                Self::BigInt(buf.get_i64())
            }
            ValueType::Float => {
                need(&*buf, 8, "value")?;
                Self::Float(buf.get_f64())
            }
            ValueType::String => {
                let bytes = get_prefixed(buf, "value")?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| WireError::new("value", e.to_string()))?;
                Self::String(s.to_owned())
            }
            ValueType::VarBinary => {
                Self::VarBinary(Bytes::copy_from_slice(get_prefixed(buf, "value")?))
            }
        };
        Ok(value)
    }

    /// Returns the encoding as a byte vector.
    ///
    /// Used wherever a value has to serve as a map key.
    #[must_use]
    pub fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.encoded_len());
        self.encode(&mut key);
        key
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::TinyInt(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::VarBinary(b) => write!(f, "x'{}'", b.len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::VarBinary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_len_matches() {
        let values = [
            Value::Null,
            Value::TinyInt(-3),
            Value::SmallInt(300),
            Value::Integer(-70_000),
            Value::BigInt(i64::MIN),
            Value::Float(1.5),
            Value::from("héllo"),
            Value::VarBinary(Bytes::from_static(b"\x00\x01\x02")),
        ];
        for value in values {
            let key = value.to_key();
            assert_eq!(key.len(), value.encoded_len(), "{value:?}");
            let mut buf = &key[..];
            assert_eq!(Value::decode(&mut buf).unwrap(), value);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_unknown_tag() {
        let mut buf = &[2u8, 0][..];
        let err = Value::decode(&mut buf).unwrap_err();
        assert!(err.reason.contains("unknown type tag"));
    }

    #[test]
    fn test_truncated_integer() {
        let mut buf = &[5u8, 0, 0][..];
        assert!(Value::decode(&mut buf).is_err());
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(Value::TinyInt(-1).as_i64(), Some(-1));
        assert_eq!(Value::Integer(7).as_i64(), Some(7));
        assert_eq!(Value::from("x").as_i64(), None);
        assert!(ValueType::SmallInt.is_integer());
        assert!(!ValueType::Float.is_integer());
    }
}
