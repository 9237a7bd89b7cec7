//! The call boundary between the bridge and an execution engine.
//!
//! An engine is reached through exactly one primitive,
//! [`Engine::invoke`]. Everything else travels through the buffers exposed
//! by [`EngineIo`]:
//!
//! ```text
//!   bridge                                   engine
//! ┌──────────────┐  request bytes    ┌──────────────────┐
//! │ RequestEnc.  │──────────────────▶│                  │
//! │ ResponseDec. │◀──────────────────│  invoke(opcode)  │
//! │ ExceptionCh. │◀── error frame ───│     -> i64       │
//! │ StreamCursor │◀── destinations ──│                  │
//! └──────────────┘   fallback slot   └──────────────────┘
//! ```
//!
//! Implementations may run in process, behind a pipe or over the network;
//! the bridge only assumes that `invoke` blocks until the engine is done.

use std::fmt;

use bytes::{Bytes, BytesMut};
use ee_common::error::EngineError;
use ee_common::types::{EngineId, PartitionId};

use crate::wire::exception::write_error_frame;
use crate::wire::Encode;

/// An execution engine.
pub trait Engine {
    /// Runs one call.
    ///
    /// Status opcodes return [`STATUS_SUCCESS`](ee_common::STATUS_SUCCESS)
    /// or a failure status. Value opcodes (see [`Opcode::returns_value`])
    /// return their result directly and signal failure with a negative
    /// value. On failure the engine may leave details in the error buffer.
    fn invoke(&mut self, opcode: Opcode, io: &mut EngineIo<'_>) -> i64;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn invoke(&mut self, opcode: Opcode, io: &mut EngineIo<'_>) -> i64 {
        (**self).invoke(opcode, io)
    }
}

/// Operations an engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Set up the engine with its identity.
    Initialize,
    /// Install the first catalog.
    LoadCatalog,
    /// Replace the catalog.
    UpdateCatalog,
    /// Run a batch of plan fragments.
    ExecutePlanFragments,
    /// Serialize a whole table.
    SerializeTable,
    /// Bulk load rows into a table.
    LoadTable,
    /// Periodic housekeeping.
    Tick,
    /// Flush work before going idle.
    Quiesce,
    /// Commit everything up to an undo token.
    ReleaseUndoToken,
    /// Roll back everything from an undo token on.
    UndoUndoToken,
    /// Start a table stream.
    ActivateTableStream,
    /// Fill destinations with the next chunk of a stream.
    TableStreamSerializeMore,
    /// Hash the contents of a table.
    TableHashCode,
    /// Hash a value to a partition.
    Hashinate,
    /// Install a partition configuration.
    UpdateHashinator,
    /// Apply a replicated log segment.
    ApplyBinaryLog,
    /// Run an engine task.
    ExecuteTask,
    /// Acknowledge, poll or realign an export stream.
    ExportAction,
    /// Read the positions of an export stream.
    ExportPositions,
    /// Load rows streamed from a recovery source.
    ProcessRecoveryMessage,
    /// Tear the engine down.
    Destroy,
}

impl Opcode {
    /// Returns true if the call's return value is a result rather than a
    /// status code.
    #[must_use]
    pub const fn returns_value(self) -> bool {
        matches!(
            self,
            Self::ActivateTableStream
                | Self::TableStreamSerializeMore
                | Self::TableHashCode
                | Self::Hashinate
                | Self::ApplyBinaryLog
                | Self::ExportAction
                | Self::ProcessRecoveryMessage
        )
    }

    /// Returns true if the call may change persistent state.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::ExecutePlanFragments
                | Self::LoadTable
                | Self::UndoUndoToken
                | Self::ActivateTableStream
                | Self::TableStreamSerializeMore
                | Self::ApplyBinaryLog
                | Self::ProcessRecoveryMessage
        )
    }

    /// Returns a short name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::LoadCatalog => "load_catalog",
            Self::UpdateCatalog => "update_catalog",
            Self::ExecutePlanFragments => "execute_plan_fragments",
            Self::SerializeTable => "serialize_table",
            Self::LoadTable => "load_table",
            Self::Tick => "tick",
            Self::Quiesce => "quiesce",
            Self::ReleaseUndoToken => "release_undo_token",
            Self::UndoUndoToken => "undo_undo_token",
            Self::ActivateTableStream => "activate_table_stream",
            Self::TableStreamSerializeMore => "table_stream_serialize_more",
            Self::TableHashCode => "table_hash_code",
            Self::Hashinate => "hashinate",
            Self::UpdateHashinator => "update_hashinator",
            Self::ApplyBinaryLog => "apply_binary_log",
            Self::ExecuteTask => "execute_task",
            Self::ExportAction => "export_action",
            Self::ExportPositions => "export_positions",
            Self::ProcessRecoveryMessage => "process_recovery_message",
            Self::Destroy => "destroy",
        }
    }

    /// Returns true if `result` signals failure for this opcode.
    #[must_use]
    pub const fn is_failure(self, result: i64) -> bool {
        if self.returns_value() {
            result < 0
        } else {
            result != ee_common::STATUS_SUCCESS
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineHandle {
    /// The engine is initialized and accepts calls.
    Live(EngineId),
    /// The engine has been torn down.
    Destroyed,
}

impl EngineHandle {
    /// Returns the engine id if the handle is live.
    #[must_use]
    pub const fn id(&self) -> Option<EngineId> {
        match self {
            Self::Live(id) => Some(*id),
            Self::Destroyed => None,
        }
    }

    /// Returns true if the handle accepts calls.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// One caller-provided byte range a stream writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDestination {
    partition_id: PartitionId,
    buffer: BytesMut,
}

impl StreamDestination {
    /// Creates a zeroed destination of `capacity` bytes.
    #[must_use]
    pub fn new(partition_id: PartitionId, capacity: usize) -> Self {
        Self {
            partition_id,
            buffer: BytesMut::zeroed(capacity),
        }
    }

    /// Returns the partition the destination's rows are headed for.
    #[must_use]
    pub const fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the destination size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the destination bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns the destination bytes for writing.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Returns the first `position` bytes, the part a continuation filled.
    #[must_use]
    pub fn filled(&self, position: usize) -> &[u8] {
        &self.buffer[..position.min(self.buffer.len())]
    }
}

/// A response the engine had to allocate itself.
///
/// Produced when a result does not fit the response buffer and consumed
/// by the bridge on the very next read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackBuffer(Bytes);

impl FallbackBuffer {
    /// Wraps engine-allocated bytes.
    #[must_use]
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns the bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Buffers lent to the engine for one call.
pub struct EngineIo<'a> {
    request: &'a [u8],
    response: &'a mut [u8],
    errors: &'a mut [u8],
    destinations: &'a mut [StreamDestination],
    fallback: &'a mut Option<FallbackBuffer>,
}

impl<'a> EngineIo<'a> {
    /// Lends buffers for a call.
    pub fn new(
        request: &'a [u8],
        response: &'a mut [u8],
        errors: &'a mut [u8],
        destinations: &'a mut [StreamDestination],
        fallback: &'a mut Option<FallbackBuffer>,
    ) -> Self {
        Self {
            request,
            response,
            errors,
            destinations,
            fallback,
        }
    }

    /// Returns the serialized request.
    #[must_use]
    pub fn request(&self) -> &'a [u8] {
        self.request
    }

    /// Returns the response buffer.
    pub fn response_mut(&mut self) -> &mut [u8] {
        self.response
    }

    /// Returns the response buffer's capacity.
    #[must_use]
    pub fn response_capacity(&self) -> usize {
        self.response.len()
    }

    /// Writes a response, spilling into a fallback buffer if it does not
    /// fit.
    ///
    /// Returns true if the fallback was used.
    pub fn respond<R: Encode>(&mut self, response: &R) -> bool {
        let len = response.encoded_len();
        if len <= self.response.len() {
            response.encode(&mut &mut self.response[..len]);
            false
        } else {
            *self.fallback = Some(FallbackBuffer::new(response.to_bytes()));
            true
        }
    }

    /// Writes error details, or a bare status marker for `None`.
    ///
    /// Returns true if the details fit.
    pub fn write_error(&mut self, err: Option<&EngineError>) -> bool {
        write_error_frame(self.errors, err)
    }

    /// Returns the stream destinations for this call.
    pub fn destinations_mut(&mut self) -> &mut [StreamDestination] {
        self.destinations
    }

    /// Supplies an engine-allocated response.
    pub fn set_fallback(&mut self, bytes: Bytes) {
        *self.fallback = Some(FallbackBuffer::new(bytes));
    }
}

impl fmt::Debug for EngineIo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineIo")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .field("errors", &self.errors.len())
            .field("destinations", &self.destinations.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
