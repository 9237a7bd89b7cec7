//! Identifier types for the execution-engine bridge.
//!
//! These types provide type-safe wrappers around the numeric identifiers that
//! cross the engine boundary, preventing accidental misuse of one ID as
//! another (a table id passed where a dependency id is expected, say).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Undo token - marks a rollback point for a set of mutations.
///
/// Tokens are issued by the caller before each mutating call and form a
/// non-decreasing sequence per engine. Releasing a token makes every
/// mutation up to and including it permanent; undoing it reverts every
/// mutation performed at or after it.
///
/// # Example
///
/// ```rust
/// use ee_common::types::UndoToken;
///
/// let t1 = UndoToken::new(10);
/// let t2 = t1.next();
/// assert!(t1 < t2);
/// assert_eq!(t2.as_i64(), 11);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UndoToken(i64);

impl UndoToken {
    /// Smallest token value.
    pub const MIN: Self = Self(0);

    /// Token used for work that never needs to be undone.
    pub const NO_UNDO: Self = Self(i64::MAX);

    /// Creates a new `UndoToken` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(token: i64) -> Self {
        Self(token)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the next token.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NO_UNDO {
            write!(f, "UndoToken(NO_UNDO)")
        } else {
            write!(f, "UndoToken({})", self.0)
        }
    }
}

impl fmt::Display for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UndoToken {
    #[inline]
    fn from(token: i64) -> Self {
        Self::new(token)
    }
}

/// Declares a transparent newtype identifier with the usual conversions.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $getter:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name($raw);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            #[must_use]
            pub const fn new(id: $raw) -> Self {
                Self(id)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn $getter(self) -> $raw {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$raw> for $name {
            #[inline]
            fn from(id: $raw) -> Self {
                Self::new(id)
            }
        }
    };
}

define_id!(
    /// Catalog identifier of a table inside the engine.
    TableId,
    i32,
    as_i32
);

define_id!(
    /// Identifier of a compiled plan fragment.
    FragmentId,
    i64,
    as_i64
);

define_id!(
    /// Identifier of a fragment's output dependency.
    DependencyId,
    i32,
    as_i32
);

define_id!(
    /// Partition number owned by an execution site.
    PartitionId,
    i32,
    as_i32
);

define_id!(
    /// Identifier of a (possibly remote) cluster taking part in replication.
    ClusterId,
    i32,
    as_i32
);

define_id!(
    /// Identifier of one live engine instance.
    ///
    /// Zero is never a valid engine id.
    EngineId,
    u64,
    as_u64
);

impl DependencyId {
    /// Dependency id meaning "no input dependency".
    pub const NONE: Self = Self(-1);
}

impl EngineId {
    /// Returns true if this id can refer to a live engine.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}
