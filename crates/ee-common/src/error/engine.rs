//! Errors raised inside the engine and serialized across the boundary.
//!
//! The engine writes these into the error buffer; the bridge decodes them
//! back into an [`EngineError`] that callers can act on at the transaction
//! boundary (abort and retry, report a constraint violation, ...).

use std::fmt;

use thiserror::Error;

use super::ErrorCode;

/// The kind of a serialized engine error.
///
/// The numeric values are the tag byte written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum EngineErrorKind {
    /// No error.
    None = 0,
    /// Unexpected internal engine exception.
    EeException = 1,
    /// SQL error with a SQLSTATE.
    Sql = 2,
    /// Constraint violation.
    ConstraintViolation = 3,
    /// The call was interrupted.
    Interrupt = 4,
}

impl EngineErrorKind {
    /// Returns the tag byte.
    #[inline]
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        self as i8
    }

    /// Parses a tag byte.
    #[must_use]
    pub const fn from_i8(tag: i8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::EeException),
            2 => Some(Self::Sql),
            3 => Some(Self::ConstraintViolation),
            4 => Some(Self::Interrupt),
            _ => None,
        }
    }

    /// Returns the error code this kind maps to.
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        match self {
            Self::None => ErrorCode::Unknown,
            Self::EeException => ErrorCode::EngineException,
            Self::Sql => ErrorCode::SqlError,
            Self::ConstraintViolation => ErrorCode::ConstraintViolation,
            Self::Interrupt => ErrorCode::Interrupted,
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::EeException => "engine",
            Self::Sql => "SQL",
            Self::ConstraintViolation => "constraint violation",
            Self::Interrupt => "interrupt",
        };
        f.write_str(name)
    }
}

/// The type of constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ConstraintType {
    /// Primary key uniqueness.
    PrimaryKey = 0,
    /// Unique index.
    Unique = 1,
    /// Not-null column.
    NotNull = 2,
    /// Check expression.
    Check = 3,
    /// Row-count limit on a table.
    Limit = 4,
    /// Row inserted on the wrong partition.
    Partitioning = 5,
}

impl ConstraintType {
    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::PrimaryKey),
            1 => Some(Self::Unique),
            2 => Some(Self::NotNull),
            3 => Some(Self::Check),
            4 => Some(Self::Limit),
            5 => Some(Self::Partitioning),
            _ => None,
        }
    }
}

/// Details attached to a constraint violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintInfo {
    /// Which constraint was violated.
    pub constraint_type: ConstraintType,
    /// The table the violating row belongs to.
    pub table_name: String,
}

/// An error decoded from the engine's error buffer.
///
/// # Example
///
/// ```rust
/// use ee_common::error::{EngineError, EngineErrorKind};
///
/// let err = EngineError::sql("23000", "duplicate key");
/// assert_eq!(err.kind, EngineErrorKind::Sql);
/// assert_eq!(err.sql_state.as_deref(), Some("23000"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct EngineError {
    /// What kind of error the engine raised.
    pub kind: EngineErrorKind,
    /// Human readable message.
    pub message: String,
    /// Five character SQLSTATE for SQL errors.
    pub sql_state: Option<String>,
    /// Constraint details for constraint violations.
    pub constraint: Option<ConstraintInfo>,
}

impl EngineError {
    /// Length of a SQLSTATE on the wire.
    pub const SQL_STATE_LEN: usize = 5;

    /// Creates an error without kind-specific details.
    #[must_use]
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sql_state: None,
            constraint: None,
        }
    }

    /// Creates an unexpected-exception error.
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::EeException, message)
    }

    /// Creates a SQL error.
    #[must_use]
    pub fn sql(sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sql_state: Some(sql_state.into()),
            ..Self::new(EngineErrorKind::Sql, message)
        }
    }

    /// Creates a constraint violation.
    #[must_use]
    pub fn constraint_violation(
        constraint_type: ConstraintType,
        table_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            constraint: Some(ConstraintInfo {
                constraint_type,
                table_name: table_name.into(),
            }),
            ..Self::new(EngineErrorKind::ConstraintViolation, message)
        }
    }

    /// Creates an interrupt error.
    #[must_use]
    pub fn interrupt(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Interrupt, message)
    }

    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.kind.code()
    }
}
