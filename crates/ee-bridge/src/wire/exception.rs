//! Serialized engine errors.
//!
//! The error buffer holds one frame:
//!
//! ```text
//! [i32 length][i8 kind][i32 msgLen][msg][kind-specific]
//! ```
//!
//! `length == 0` means the engine left no details. SQL errors append a
//! five byte SQLSTATE; constraint violations append `[i32 type][i32
//! nameLen][table name]`.

use bytes::{Buf, BufMut};
use ee_common::error::{ConstraintType, EngineError, EngineErrorKind};

use super::{get_len, get_string, need, put_len, put_prefixed, take, WireError, WireResult};

fn body_len(err: &EngineError) -> usize {
    let specific = match err.kind {
        EngineErrorKind::Sql => EngineError::SQL_STATE_LEN,
        EngineErrorKind::ConstraintViolation => {
            4 + 4 + err.constraint.as_ref().map_or(0, |c| c.table_name.len())
        }
        _ => 0,
    };
    1 + 4 + err.message.len() + specific
}

fn encode_body<B: BufMut>(err: &EngineError, buf: &mut B) {
    buf.put_i8(err.kind.as_i8());
    put_prefixed(buf, err.message.as_bytes());
    match err.kind {
        EngineErrorKind::Sql => {
            let mut state = [b'0'; EngineError::SQL_STATE_LEN];
            if let Some(sql_state) = &err.sql_state {
                for (dst, src) in state.iter_mut().zip(sql_state.bytes()) {
                    *dst = src;
                }
            }
            buf.put_slice(&state);
        }
        EngineErrorKind::ConstraintViolation => {
            let (constraint_type, table) = err.constraint.as_ref().map_or(
                (ConstraintType::Unique, ""),
                |c| (c.constraint_type, c.table_name.as_str()),
            );
            buf.put_i32(constraint_type.as_i32());
            put_prefixed(buf, table.as_bytes());
        }
        _ => {}
    }
}

/// Writes an error frame at the start of `out`.
///
/// `None`, or an error whose frame does not fit, writes `length = 0` so
/// the bridge falls back to the status code. Returns true if details were
/// written.
pub fn write_error_frame(out: &mut [u8], err: Option<&EngineError>) -> bool {
    if out.len() < 4 {
        return false;
    }
    let mut buf = &mut out[..];
    match err {
        Some(err) if 4 + body_len(err) <= buf.len() => {
            put_len(&mut buf, body_len(err));
            encode_body(err, &mut buf);
            true
        }
        _ => {
            buf.put_i32(0);
            false
        }
    }
}

/// Decodes the error frame at the start of `bytes`.
///
/// Returns `None` when the engine left no details.
///
/// # Errors
///
/// Returns an error if the length overruns the buffer or the body is
/// malformed.
pub fn decode_error_frame(bytes: &[u8]) -> WireResult<Option<EngineError>> {
    let mut buf = bytes;
    let length = get_len(&mut buf, "error frame")?;
    if length == 0 {
        return Ok(None);
    }
    let mut body = take(&mut buf, length, "error frame")?;

    need(&body, 1, "error frame")?;
    let tag = body.get_i8();
    let kind = EngineErrorKind::from_i8(tag)
        .ok_or_else(|| WireError::new("error frame", format!("unknown error kind {tag}")))?;
    let message = get_string(&mut body, "error frame")?;

    let err = match kind {
        EngineErrorKind::Sql => {
            let state = take(&mut body, EngineError::SQL_STATE_LEN, "error frame")?;
            let state = std::str::from_utf8(state)
                .map_err(|e| WireError::new("error frame", e.to_string()))?;
            EngineError::sql(state, message)
        }
        EngineErrorKind::ConstraintViolation => {
            need(&body, 4, "error frame")?;
            let raw = body.get_i32();
            let constraint_type = ConstraintType::from_i32(raw).ok_or_else(|| {
                WireError::new("error frame", format!("unknown constraint type {raw}"))
            })?;
            let table = get_string(&mut body, "error frame")?;
            EngineError::constraint_violation(constraint_type, table, message)
        }
        _ => EngineError::new(kind, message),
    };

    if !body.is_empty() {
        return Err(WireError::new(
            "error frame",
            format!("{} trailing bytes", body.len()),
        ));
    }
    Ok(Some(err))
}
