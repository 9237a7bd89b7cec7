//! Stable error codes.

use std::fmt;

/// Error codes for categorizing bridge errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0002,

    // Engine errors (0x0100 - 0x01FF)
    /// The engine handle is destroyed or was never created.
    EngineUnavailable = 0x0100,
    /// The engine reported a failure without details.
    EngineStatus = 0x0101,
    /// The engine reported an unexpected internal exception.
    EngineException = 0x0102,
    /// The engine reported a SQL error.
    SqlError = 0x0103,
    /// The engine reported a constraint violation.
    ConstraintViolation = 0x0104,
    /// The engine call was interrupted.
    Interrupted = 0x0105,

    // Protocol errors (0x0200 - 0x02FF)
    /// A request does not fit in any representable buffer.
    RequestTooLarge = 0x0200,
    /// A response or error frame is malformed.
    MalformedResponse = 0x0201,
    /// A result table exceeds the configured size limit.
    TableTooLarge = 0x0202,

    // Buffer errors (0x0300 - 0x03FF)
    /// Buffer allocation or growth failed.
    BufferAllocation = 0x0300,
    /// A buffer was released that the pool does not own.
    UnknownBuffer = 0x0301,

    // Stream errors (0x0400 - 0x04FF)
    /// A table stream could not be activated.
    StreamActivation = 0x0400,
    /// A table stream is not in a state that accepts the call.
    StreamState = 0x0401,
    /// A table stream was aborted by the engine.
    StreamAborted = 0x0402,

    // Undo errors (0x0500 - 0x05FF)
    /// An undo token was used out of order or after resolution.
    UndoTokenMisuse = 0x0500,

    // Configuration errors (0x0600 - 0x06FF)
    /// Configuration is invalid or could not be loaded.
    InvalidConfig = 0x0600,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Engine",
            0x02 => "Protocol",
            0x03 => "Buffer",
            0x04 => "Stream",
            0x05 => "Undo",
            0x06 => "Config",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
