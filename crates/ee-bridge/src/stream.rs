//! Table stream cursors.
//!
//! A table stream copies a table out of the engine over many calls. Each
//! `(table, stream type)` pair has its own cursor:
//!
//! ```text
//!             activate                remaining == 0
//! NotActive ────────────▶ Active ─────────────────────▶ Complete
//!     ▲                     │                               │
//!     │                     │ remaining < 0                 │ activate
//!     │                     ▼                               ▼
//!     └──────────────────  Failed ──── activate ────────▶ Active
//! ```
//!
//! Cursors only track progress. Destination memory belongs to the caller.

use std::collections::BTreeMap;
use std::fmt;

use ee_common::error::{EngineError, ErrorCode};
use ee_common::types::TableId;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::wire::StreamType;

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    /// Never activated.
    #[default]
    NotActive,
    /// Activated and not yet drained.
    Active,
    /// Every row has been written.
    Complete,
    /// The engine aborted the stream.
    Failed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotActive => "not active",
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Identifies a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    /// Streamed table.
    pub table_id: TableId,
    /// Purpose of the stream.
    pub stream_type: StreamType,
}

impl StreamKey {
    /// Creates a stream key.
    #[must_use]
    pub const fn new(table_id: TableId, stream_type: StreamType) -> Self {
        Self {
            table_id,
            stream_type,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stream on table {}", self.stream_type, self.table_id)
    }
}

/// Table stream errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum StreamError {
    /// The engine refused to start the stream.
    #[error("engine rejected activation of {key}")]
    ActivationRejected { key: StreamKey },

    /// The stream is already running.
    #[error("{key} is already active")]
    AlreadyActive { key: StreamKey },

    /// The stream does not accept continuation calls.
    #[error("{key} is {state}")]
    NotActive { key: StreamKey, state: StreamState },

    /// The engine aborted the stream, with its error if it gave one.
    #[error("{key} aborted with remaining {remaining}")]
    Aborted {
        key: StreamKey,
        remaining: i64,
        #[source]
        cause: Option<EngineError>,
    },
}

impl StreamError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ActivationRejected { .. } => ErrorCode::StreamActivation,
            Self::AlreadyActive { .. } | Self::NotActive { .. } => ErrorCode::StreamState,
            Self::Aborted { .. } => ErrorCode::StreamAborted,
        }
    }
}

/// Outcome of one continuation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProgress {
    /// Rows (or bytes, engine defined) still to be written; zero when done.
    pub remaining: i64,
    /// Bytes written into each destination, in destination order.
    pub positions: Vec<i32>,
}

impl StreamProgress {
    /// Returns true if the stream is drained.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Returns the total bytes written by the call.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.positions
            .iter()
            .map(|p| u64::try_from(*p).unwrap_or(0))
            .sum()
    }
}

/// Progress of one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCursor {
    state: StreamState,
    remaining: Option<i64>,
    last_positions: Vec<i32>,
    calls: u64,
    bytes_written: u64,
}

impl StreamCursor {
    /// Returns the state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Returns the remaining count reported by the last call.
    #[must_use]
    pub const fn remaining(&self) -> Option<i64> {
        self.remaining
    }

    /// Returns the positions reported by the last call.
    #[must_use]
    pub fn last_positions(&self) -> &[i32] {
        &self.last_positions
    }

    /// Returns the number of continuation calls since activation.
    #[must_use]
    pub const fn calls(&self) -> u64 {
        self.calls
    }

    /// Returns the bytes written since activation.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// All stream cursors of one engine handle.
#[derive(Debug, Clone, Default)]
pub struct StreamCursors {
    cursors: BTreeMap<StreamKey, StreamCursor>,
}

impl StreamCursors {
    /// Creates an empty set of cursors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state of a stream.
    #[must_use]
    pub fn state(&self, key: StreamKey) -> StreamState {
        self.cursors.get(&key).map_or(StreamState::NotActive, |c| c.state)
    }

    /// Returns the cursor of a stream that has been activated at least once.
    #[must_use]
    pub fn get(&self, key: StreamKey) -> Option<&StreamCursor> {
        self.cursors.get(&key)
    }

    /// Checks that a stream may be activated.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyActive` if the stream is running.
    pub fn check_activate(&self, key: StreamKey) -> Result<(), StreamError> {
        if self.state(key) == StreamState::Active {
            return Err(StreamError::AlreadyActive { key });
        }
        Ok(())
    }

    /// Records the engine's answer to an activation.
    ///
    /// # Errors
    ///
    /// Returns `ActivationRejected` if the engine did not activate the
    /// stream; the cursor keeps its previous state.
    pub fn record_activation(&mut self, key: StreamKey, activated: bool) -> Result<(), StreamError> {
        if !activated {
            warn!(%key, "Table stream activation rejected");
            return Err(StreamError::ActivationRejected { key });
        }
        self.cursors.insert(
            key,
            StreamCursor {
                state: StreamState::Active,
                ..StreamCursor::default()
            },
        );
        info!(%key, "Activated table stream");
        Ok(())
    }

    /// Checks that a stream accepts a continuation call.
    ///
    /// # Errors
    ///
    /// Returns `NotActive` unless the stream is active.
    pub fn check_continue(&self, key: StreamKey) -> Result<(), StreamError> {
        match self.state(key) {
            StreamState::Active => Ok(()),
            state => Err(StreamError::NotActive { key, state }),
        }
    }

    /// Marks a stream failed after the engine returned a negative
    /// `remaining`, and returns the error to hand the caller.
    pub fn record_abort(
        &mut self,
        key: StreamKey,
        remaining: i64,
        cause: Option<EngineError>,
    ) -> StreamError {
        let cursor = self.cursors.entry(key).or_default();
        cursor.calls += 1;
        cursor.remaining = Some(remaining);
        cursor.state = StreamState::Failed;
        cursor.last_positions.clear();
        match &cause {
            Some(err) => warn!(%key, remaining, calls = cursor.calls, error = %err, "Table stream aborted"),
            None => warn!(%key, remaining, calls = cursor.calls, "Table stream aborted"),
        }
        StreamError::Aborted {
            key,
            remaining,
            cause,
        }
    }

    /// Records the result of a continuation call.
    ///
    /// An empty position list is reported as `[0]`.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` and marks the stream failed if `remaining` is
    /// negative.
    pub fn record_progress(
        &mut self,
        key: StreamKey,
        remaining: i64,
        mut positions: Vec<i32>,
    ) -> Result<StreamProgress, StreamError> {
        if remaining < 0 {
            return Err(self.record_abort(key, remaining, None));
        }
        let cursor = self.cursors.entry(key).or_default();
        cursor.calls += 1;
        cursor.remaining = Some(remaining);

        if positions.is_empty() {
            positions.push(0);
        }
        let progress = StreamProgress {
            remaining,
            positions,
        };
        cursor.bytes_written += progress.bytes_written();
        cursor.last_positions.clone_from(&progress.positions);

        if progress.is_complete() {
            cursor.state = StreamState::Complete;
            info!(
                %key,
                calls = cursor.calls,
                bytes = cursor.bytes_written,
                "Table stream complete"
            );
        } else {
            debug!(%key, remaining, "Table stream progress");
        }
        Ok(progress)
    }
}
