//! Parameter sets.
//!
//! ```text
//! [i16 count]{[tagged value]}*
//! ```

use bytes::{BufMut, Bytes};

use super::value::Value;
use super::{get_count16, Encode, WireError, WireResult};

/// An ordered list of parameters for one fragment or call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: Vec<Value>,
}

impl ParameterSet {
    /// Largest number of parameters a set can hold.
    pub const MAX_PARAMETERS: usize = i16::MAX as usize;

    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from values.
    ///
    /// # Errors
    ///
    /// Returns an error if there are more than `MAX_PARAMETERS` values.
    pub fn from_values(values: Vec<Value>) -> WireResult<Self> {
        if values.len() > Self::MAX_PARAMETERS {
            return Err(WireError::new(
                "parameter set",
                format!("{} parameters exceed the limit", values.len()),
            ));
        }
        Ok(Self { values })
    }

    /// Returns the parameters.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the parameter at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the set and returns its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Decodes a set, consuming its bytes from `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(buf: &mut &[u8]) -> WireResult<Self> {
        let count = get_count16(buf, "parameter set")?;
        let mut values = Vec::with_capacity(count.min(buf.len()));
        for _ in 0..count {
            values.push(Value::decode(buf)?);
        }
        Ok(Self { values })
    }
}

impl Encode for ParameterSet {
    fn encoded_len(&self) -> usize {
        2 + self.values.iter().map(Value::encoded_len).sum::<usize>()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn encode<B: BufMut>(&self, buf: &mut B) {
        // Bounded by MAX_PARAMETERS on construction.
        buf.put_i16(self.values.len() as i16);
        for value in &self.values {
            value.encode(buf);
        }
    }
}

/// Parameters of one fragment in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentParams {
    /// Typed parameters, serialized by the encoder.
    Typed(ParameterSet),
    /// An already flattened parameter set, copied verbatim.
    Serialized(Bytes),
}

impl FragmentParams {
    /// Returns the number of bytes these parameters occupy in a request.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Typed(set) => set.encoded_len(),
            Self::Serialized(bytes) => bytes.len(),
        }
    }

    /// Writes the parameters.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::Typed(set) => set.encode(buf),
            Self::Serialized(bytes) => buf.put_slice(bytes),
        }
    }

    /// Returns the parameters as a typed set, decoding if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialized parameters are malformed.
    pub fn to_parameter_set(&self) -> WireResult<ParameterSet> {
        match self {
            Self::Typed(set) => Ok(set.clone()),
            Self::Serialized(bytes) => {
                let mut buf = &bytes[..];
                let set = ParameterSet::decode(&mut buf)?;
                if !buf.is_empty() {
                    return Err(WireError::new(
                        "parameter set",
                        format!("{} trailing bytes", buf.len()),
                    ));
                }
                Ok(set)
            }
        }
    }
}

impl From<ParameterSet> for FragmentParams {
    fn from(set: ParameterSet) -> Self {
        Self::Typed(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParameterSet {
        ParameterSet::from_values(vec![
            Value::Integer(7),
            Value::from("alpha"),
            Value::Null,
        ])
        .unwrap()
    }

    #[test]
    fn test_decode_encoded() {
        let set = sample();
        let bytes = set.to_bytes();
        assert_eq!(bytes.len(), set.encoded_len());

        let mut buf = &bytes[..];
        assert_eq!(ParameterSet::decode(&mut buf).unwrap(), set);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_serialized_params_are_verbatim() {
        let set = sample();
        let typed = FragmentParams::Typed(set.clone());
        let serialized = FragmentParams::Serialized(set.to_bytes());
        assert_eq!(typed.encoded_len(), serialized.encoded_len());

        let mut a = Vec::new();
        let mut b = Vec::new();
        typed.encode(&mut a);
        serialized.encode(&mut b);
        assert_eq!(a, b);
        assert_eq!(serialized.to_parameter_set().unwrap(), set);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes().to_vec();
        bytes.push(0);
        let params = FragmentParams::Serialized(Bytes::from(bytes));
        assert!(params.to_parameter_set().is_err());
    }

    #[test]
    fn test_negative_count() {
        let mut buf = &[0xFFu8, 0xFF][..];
        assert!(ParameterSet::decode(&mut buf).is_err());
    }
}
