//! The execution engine bridge.
//!
//! [`ExecutionEngine`] owns one engine instance and everything that has to
//! survive between calls to it: the request, response and error buffers,
//! the undo ledger, stream cursors, the active partition map and the
//! dirty flag.
//!
//! The dirty flag is sticky: calls only ever set it, and it stays set
//! until the caller consumes it with
//! [`take_dirty`](ExecutionEngine::take_dirty).
//!
//! Every operation follows the same path:
//!
//! 1. Check the handle; a destroyed engine fails with `EngineUnavailable`
//!    without being touched.
//! 2. Validate cross-call state (undo order, stream state).
//! 3. Frame the request through the [`RequestEncoder`].
//! 4. Invoke the engine.
//! 5. On failure, surface the error buffer through the
//!    [`ExceptionChannel`]; on success, decode the response and record
//!    the new cross-call state.
//!
//! All operations take `&mut self`, so a handle never has more than one
//! call in flight. Results that borrow the response buffer borrow the
//! bridge and cannot be held across the next call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ee_buffer::{BufferPool, BufferResult};
use ee_common::config::BridgeConfig;
use ee_common::types::{EngineId, PartitionId, ReplicationContext, TableId, TxnContext, UndoToken};
use tracing::{debug, error, info, trace, warn};

use crate::decoder::{FragmentResults, ResponseDecoder};
use crate::encoder::RequestEncoder;
use crate::engine::{Engine, EngineHandle, EngineIo, FallbackBuffer, Opcode, StreamDestination};
use crate::error::{BridgeError, BridgeResult};
use crate::exception::ExceptionChannel;
use crate::hashinator::Hashinator;
use crate::replication::{ApplyOutcome, ReplicationApplier};
use crate::stream::{StreamCursor, StreamCursors, StreamKey, StreamProgress, StreamState};
use crate::undo::UndoLedger;
use crate::wire::request::{
    BinaryLogRequest, CatalogRequest, EmptyRequest, FragmentBatch, FragmentCall,
    HashinateRequest, HashinatorUpdate, InitializeRequest, LoadTableRequest, ScalarRequest,
    TableRequest, TaskRequest, TaskType, TickRequest,
};
use crate::wire::response::RowCounts;
use crate::wire::{
    Catalog, DestinationSpec, Encode, ExportAction, ExportBlock, ExportPositions,
    ExportPositionsRequest, PartitionConfig, RecoveryMessage, StreamActivation,
    StreamContinuation, StreamPredicate, StreamType, Table, TableView, Value,
};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// The buffers one handle lends to its engine.
#[derive(Debug)]
struct CallBuffers {
    encoder: RequestEncoder,
    decoder: ResponseDecoder,
    exceptions: ExceptionChannel,
}

impl CallBuffers {
    fn allocate(pool: &Arc<BufferPool>, config: &BridgeConfig) -> BufferResult<Self> {
        let encoder = RequestEncoder::new(
            Arc::clone(pool),
            config.request_buffer_size,
            config.max_request_size,
        )?;
        let decoder =
            match ResponseDecoder::new(pool, config.response_buffer_size, config.max_table_size) {
                Ok(decoder) => decoder,
                Err(err) => {
                    pool.release(encoder.into_buffer())?;
                    return Err(err);
                }
            };
        let exceptions = match ExceptionChannel::new(pool, config.error_buffer_size) {
            Ok(exceptions) => exceptions,
            Err(err) => {
                pool.release(encoder.into_buffer())?;
                pool.release(decoder.into_buffer())?;
                return Err(err);
            }
        };
        Ok(Self {
            encoder,
            decoder,
            exceptions,
        })
    }

    fn release(self, pool: &BufferPool) -> BufferResult<()> {
        let mut result = Ok(());
        for buffer in [
            self.encoder.into_buffer(),
            self.decoder.into_buffer(),
            self.exceptions.into_buffer(),
        ] {
            if let Err(err) = pool.release(buffer) {
                result = Err(err);
            }
        }
        result
    }
}

/// A bridge to one execution engine instance.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use ee_bridge::memory::MemoryEngine;
/// use ee_bridge::wire::PartitionConfig;
/// use ee_bridge::ExecutionEngine;
/// use ee_buffer::BufferPool;
/// use ee_common::config::BridgeConfig;
///
/// let pool = Arc::new(BufferPool::new());
/// let mut ee = ExecutionEngine::initialize(
///     MemoryEngine::new(),
///     Arc::clone(&pool),
///     BridgeConfig::for_testing(),
///     PartitionConfig::legacy(4),
/// )
/// .unwrap();
/// ee.tick(1_000, 0).unwrap();
/// ee.release().unwrap();
/// assert_eq!(pool.stats().live_buffers, 0);
/// ```
#[derive(Debug)]
pub struct ExecutionEngine<E: Engine> {
    handle: EngineHandle,
    engine: E,
    pool: Arc<BufferPool>,
    buffers: Option<CallBuffers>,
    /// Fallback supplied for the next call, by the engine or externally.
    pending_fallback: Option<FallbackBuffer>,
    /// Fallback taken by the last call; its response is read from here.
    last_fallback: Option<FallbackBuffer>,
    dirty: bool,
    ledger: UndoLedger,
    streams: StreamCursors,
    hashinator: Hashinator,
    replication: ReplicationApplier,
    config: BridgeConfig,
}

impl<E: Engine> ExecutionEngine<E> {
    /// Allocates buffers, initializes `engine` and installs the initial
    /// partition configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration, `InvalidArgument`
    /// for an unusable partition configuration, a buffer error if
    /// allocation fails, or the engine's error if it refuses to
    /// initialize. Buffers are released on every error path.
    pub fn initialize(
        engine: E,
        pool: Arc<BufferPool>,
        config: BridgeConfig,
        partition_config: PartitionConfig,
    ) -> BridgeResult<Self> {
        config.validate()?;
        let hashinator = Hashinator::new(partition_config.clone())?;
        let buffers = CallBuffers::allocate(&pool, &config)?;
        let id = EngineId::new(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed));

        let mut bridge = Self {
            handle: EngineHandle::Live(id),
            engine,
            pool,
            buffers: Some(buffers),
            pending_fallback: None,
            last_fallback: None,
            dirty: false,
            ledger: UndoLedger::new(),
            streams: StreamCursors::new(),
            hashinator,
            replication: ReplicationApplier::new(),
            config,
        };

        let identity = bridge.config.engine.clone();
        let started = bridge
            .call(Opcode::Initialize, &InitializeRequest(&identity))
            .and_then(|_| bridge.update_hashinator(partition_config));
        if let Err(err) = started {
            error!(engine = %id, error = %err, "Engine initialization failed");
            bridge.handle = EngineHandle::Destroyed;
            if let Some(buffers) = bridge.buffers.take() {
                if let Err(release_err) = buffers.release(&bridge.pool) {
                    warn!(error = %release_err, "Failed to release buffers");
                }
            }
            return Err(err);
        }

        info!(
            engine = %id,
            site_id = identity.site_id,
            partition = %identity.partition_id,
            hostname = %identity.hostname,
            "Initialized execution engine"
        );
        Ok(bridge)
    }

    /// Returns the handle.
    #[must_use]
    pub const fn handle(&self) -> EngineHandle {
        self.handle
    }

    /// Returns the engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the engine for direct manipulation.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the current request buffer capacity, if the handle is live.
    #[must_use]
    pub fn request_capacity(&self) -> Option<usize> {
        self.buffers.as_ref().map(|b| b.encoder.capacity())
    }

    /// Destroys the engine and releases every buffer.
    ///
    /// The handle is destroyed even if the engine reports an error on the
    /// way down.
    ///
    /// # Errors
    ///
    /// Returns `EngineUnavailable` if the handle is already destroyed, the
    /// engine's teardown error, or a buffer release error.
    pub fn release(&mut self) -> BridgeResult<()> {
        let id = self.live_id()?;
        let destroyed = self.call(Opcode::Destroy, &EmptyRequest);

        self.handle = EngineHandle::Destroyed;
        self.last_fallback = None;
        self.pending_fallback = None;
        let released = match self.buffers.take() {
            Some(buffers) => buffers.release(&self.pool).map_err(BridgeError::from),
            None => Ok(()),
        };
        info!(engine = %id, "Released execution engine");

        destroyed?;
        released
    }

    fn live_id(&self) -> BridgeResult<EngineId> {
        self.handle.id().ok_or(BridgeError::EngineUnavailable)
    }

    /// Frames and sends one call, returning the raw result.
    fn invoke<R: Encode>(
        &mut self,
        opcode: Opcode,
        request: &R,
        destinations: &mut [StreamDestination],
    ) -> BridgeResult<i64> {
        let id = self.live_id()?;
        let buffers = self.buffers.as_mut().ok_or(BridgeError::EngineUnavailable)?;
        buffers.encoder.encode(request)?;
        self.last_fallback = None;

        let CallBuffers {
            encoder,
            decoder,
            exceptions,
        } = buffers;
        let request_bytes = encoder.bytes();
        trace!(engine = %id, %opcode, request_bytes = request_bytes.len(), "Invoking engine");
        let mut io = EngineIo::new(
            request_bytes,
            decoder.buffer_mut(),
            exceptions.buffer_mut(),
            destinations,
            &mut self.pending_fallback,
        );
        let result = self.engine.invoke(opcode, &mut io);

        self.last_fallback = self.pending_fallback.take();
        if let Some(fallback) = &self.last_fallback {
            debug!(engine = %id, %opcode, bytes = fallback.len(), "Reading response from fallback buffer");
        }
        Ok(result)
    }

    /// Sends one call and turns a failure result into an error.
    fn call<R: Encode>(&mut self, opcode: Opcode, request: &R) -> BridgeResult<i64> {
        let result = self.invoke(opcode, request, &mut [])?;
        if opcode.is_failure(result) {
            return Err(self.surface(result));
        }
        Ok(result)
    }

    fn surface(&self, status: i64) -> BridgeError {
        match &self.buffers {
            Some(buffers) => buffers.exceptions.surface(status),
            None => BridgeError::EngineUnavailable,
        }
    }

    fn response(&self) -> BridgeResult<(&ResponseDecoder, &[u8])> {
        let buffers = self.buffers.as_ref().ok_or(BridgeError::EngineUnavailable)?;
        let bytes = buffers.decoder.source(self.last_fallback.as_ref());
        Ok((&buffers.decoder, bytes))
    }

    /// Sets the dirty flag if a framed response reports a mutation.
    fn note_dirty(&mut self) -> BridgeResult<()> {
        let (_, bytes) = self.response()?;
        let (dirty, _) = ResponseDecoder::frame(bytes)?;
        self.dirty |= dirty;
        Ok(())
    }

    fn issue(&mut self, token: UndoToken) -> BridgeResult<()> {
        self.live_id()?;
        self.ledger.issue(token)
    }

    /// Installs the first catalog.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the catalog is rejected.
    pub fn load_catalog(&mut self, timestamp: i64, catalog: &Catalog) -> BridgeResult<()> {
        self.call(Opcode::LoadCatalog, &CatalogRequest { timestamp, catalog })?;
        debug!(timestamp, tables = catalog.tables().len(), "Loaded catalog");
        Ok(())
    }

    /// Replaces the catalog.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the catalog is rejected.
    pub fn update_catalog(&mut self, timestamp: i64, catalog: &Catalog) -> BridgeResult<()> {
        self.call(Opcode::UpdateCatalog, &CatalogRequest { timestamp, catalog })?;
        debug!(timestamp, tables = catalog.tables().len(), "Updated catalog");
        Ok(())
    }

    /// Runs a batch of plan fragments and returns one table per fragment.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` if `ctx.undo_token` cannot be issued, the
    /// engine's error if a fragment fails, or a protocol error if the
    /// response is malformed.
    pub fn execute_plan_fragments(
        &mut self,
        fragments: &[FragmentCall],
        ctx: TxnContext,
    ) -> BridgeResult<FragmentResults<'_>> {
        self.issue(ctx.undo_token)?;
        self.call(Opcode::ExecutePlanFragments, &FragmentBatch { ctx, fragments })?;
        self.note_dirty()?;
        let (decoder, bytes) = self.response()?;
        decoder.decode_fragments(bytes, fragments.len())
    }

    /// Serializes a whole table.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for an unknown table, or a protocol
    /// error if the response is malformed.
    pub fn serialize_table(&mut self, table_id: TableId) -> BridgeResult<TableView<'_>> {
        self.call(Opcode::SerializeTable, &TableRequest { table_id })?;
        self.note_dirty()?;
        let (decoder, bytes) = self.response()?;
        Ok(decoder.decode_table(bytes)?.1)
    }

    /// Bulk loads rows into a table.
    ///
    /// With `return_unique_violations` set, rows that collide with
    /// existing keys are skipped and returned; otherwise the first
    /// collision fails the load.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` if `ctx.undo_token` cannot be issued, or
    /// the engine's error if the load fails.
    pub fn load_table(
        &mut self,
        table_id: TableId,
        table: &Table,
        ctx: TxnContext,
        return_unique_violations: bool,
        should_dr_stream: bool,
    ) -> BridgeResult<Option<Table>> {
        self.issue(ctx.undo_token)?;
        let request = LoadTableRequest {
            ctx,
            table_id,
            return_unique_violations,
            should_dr_stream,
            table,
        };
        self.call(Opcode::LoadTable, &request)?;
        self.note_dirty()?;
        let (decoder, bytes) = self.response()?;
        let results = decoder.decode_dependencies(bytes)?;
        match results.dependencies.as_slice() {
            [] => Ok(None),
            [violations] => Ok(Some(violations.table.to_table()?)),
            more => Err(BridgeError::malformed(
                "response",
                format!("{} violation tables for one load", more.len()),
            )),
        }
    }

    /// Runs periodic housekeeping.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the tick fails.
    pub fn tick(&mut self, time_ms: i64, last_committed_sp_handle: i64) -> BridgeResult<()> {
        let request = TickRequest {
            time_ms,
            last_committed_sp_handle,
        };
        self.call(Opcode::Tick, &request).map(|_| ())
    }

    /// Flushes pending work before the site goes idle.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the flush fails.
    pub fn quiesce(&mut self, last_committed_sp_handle: i64) -> BridgeResult<()> {
        self.call(Opcode::Quiesce, &ScalarRequest(last_committed_sp_handle))
            .map(|_| ())
    }

    /// Returns a hash of a table's contents.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for an unknown table.
    pub fn table_hash_code(&mut self, table_id: TableId) -> BridgeResult<i64> {
        self.call(Opcode::TableHashCode, &TableRequest { table_id })
    }

    /// Runs an engine task and returns its result payload.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the task fails, or a protocol error
    /// if the response is malformed.
    pub fn execute_task(&mut self, task: TaskType, payload: &[u8]) -> BridgeResult<Bytes> {
        self.call(Opcode::ExecuteTask, &TaskRequest { task, payload })?;
        self.note_dirty()?;
        let (_, bytes) = self.response()?;
        let (_, payload) = ResponseDecoder::decode_payload(bytes)?;
        Ok(Bytes::copy_from_slice(payload))
    }

    /// Counts, per table in id order, the rows `config` would place on a
    /// different partition than the one they live on.
    ///
    /// # Errors
    ///
    /// As [`execute_task`](Self::execute_task).
    pub fn validate_partitioning(&mut self, config: &PartitionConfig) -> BridgeResult<Vec<i64>> {
        let payload = self.execute_task(TaskType::ValidatePartitioning, &config.to_bytes())?;
        Ok(RowCounts::decode(&payload)?.0)
    }

    /// Commits everything up to and including `token`.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` without invoking the engine if the token
    /// is not the newest outstanding token.
    pub fn release_undo_token(&mut self, token: UndoToken) -> BridgeResult<()> {
        self.live_id()?;
        self.ledger.check_release(token)?;
        self.call(Opcode::ReleaseUndoToken, &ScalarRequest::from(token))?;
        self.ledger.record_release(token);
        Ok(())
    }

    /// Rolls back everything done under `token` and any later token.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` without invoking the engine if the token
    /// is not outstanding.
    pub fn undo_undo_token(&mut self, token: UndoToken) -> BridgeResult<()> {
        self.live_id()?;
        self.ledger.check_undo(token)?;
        self.call(Opcode::UndoUndoToken, &ScalarRequest::from(token))?;
        self.ledger.record_undo(token);
        self.dirty = true;
        debug!(%token, "Rolled back undo token");
        Ok(())
    }

    /// Returns the undo ledger.
    #[must_use]
    pub const fn undo_ledger(&self) -> &UndoLedger {
        &self.ledger
    }

    /// Starts streaming a table.
    ///
    /// Destination `i` of every continuation receives the rows matching
    /// `predicates[i]`; with no predicates every destination receives
    /// every row.
    ///
    /// # Errors
    ///
    /// Returns `Stream(AlreadyActive)` for a running stream,
    /// `Stream(ActivationRejected)` if the engine declines, or the
    /// engine's error for malformed predicates.
    pub fn activate_table_stream(
        &mut self,
        table_id: TableId,
        stream_type: StreamType,
        undo_token: UndoToken,
        predicates: &[StreamPredicate],
    ) -> BridgeResult<()> {
        self.live_id()?;
        let key = StreamKey::new(table_id, stream_type);
        self.streams.check_activate(key)?;
        self.issue(undo_token)?;
        let request = StreamActivation {
            table_id,
            stream_type,
            undo_token,
            predicates: predicates.to_vec(),
        };
        let activated = self.call(Opcode::ActivateTableStream, &request)?;
        self.streams.record_activation(key, activated == 1)?;
        Ok(())
    }

    /// Fills `destinations` with the next chunk of an active stream.
    ///
    /// # Errors
    ///
    /// Returns `Stream(NotActive)` unless the stream is active, and
    /// `Stream(Aborted)` if the engine fails the stream; an aborted stream
    /// must be activated again before further use.
    pub fn table_stream_serialize_more(
        &mut self,
        table_id: TableId,
        stream_type: StreamType,
        destinations: &mut [StreamDestination],
    ) -> BridgeResult<StreamProgress> {
        self.live_id()?;
        let key = StreamKey::new(table_id, stream_type);
        self.streams.check_continue(key)?;
        let request = StreamContinuation {
            table_id,
            stream_type,
            destinations: destinations
                .iter()
                .map(|d| DestinationSpec {
                    partition_id: d.partition_id(),
                    capacity: d.capacity(),
                })
                .collect(),
        };

        let remaining = self.invoke(Opcode::TableStreamSerializeMore, &request, destinations)?;
        if remaining < 0 {
            let cause = match self.surface(remaining) {
                BridgeError::Engine(err) => Some(err),
                other => {
                    debug!(%key, error = %other, "Table stream failed without engine details");
                    None
                }
            };
            return Err(self.streams.record_abort(key, remaining, cause).into());
        }
        let (_, bytes) = self.response()?;
        let positions = ResponseDecoder::decode_positions(bytes)?;
        Ok(self.streams.record_progress(key, remaining, positions)?)
    }

    /// Returns the state of a stream.
    #[must_use]
    pub fn stream_state(&self, table_id: TableId, stream_type: StreamType) -> StreamState {
        self.streams.state(StreamKey::new(table_id, stream_type))
    }

    /// Returns a stream's cursor, if it was ever activated.
    #[must_use]
    pub fn stream_cursor(&self, table_id: TableId, stream_type: StreamType) -> Option<&StreamCursor> {
        self.streams.get(StreamKey::new(table_id, stream_type))
    }

    /// Installs a new partition configuration.
    ///
    /// The config bytes travel with the update unless the config names a
    /// ring the engine already holds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unusable config, or the engine's
    /// error if it refuses the update. The previous config stays active
    /// on error.
    pub fn update_hashinator(&mut self, config: PartitionConfig) -> BridgeResult<()> {
        let hashinator = Hashinator::new(config.clone())?;
        self.call(Opcode::UpdateHashinator, &HashinatorUpdate::new(&config)?)?;
        info!(
            kind = %config.kind,
            num_tokens = config.num_tokens,
            ring_pointer = config.ring_pointer,
            "Updated hashinator"
        );
        self.hashinator = hashinator;
        Ok(())
    }

    /// Asks the engine which partition `value` belongs to under `config`.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or `MalformedResponse` if the engine
    /// returns a partition outside `i32`.
    pub fn hashinate(&mut self, value: &Value, config: &PartitionConfig) -> BridgeResult<PartitionId> {
        let partition = self.call(Opcode::Hashinate, &HashinateRequest::new(value, config)?)?;
        i32::try_from(partition).map(PartitionId::new).map_err(|_| {
            BridgeError::malformed("hashinate result", format!("partition {partition} out of range"))
        })
    }

    /// Returns the active partition map.
    #[must_use]
    pub const fn hashinator(&self) -> &Hashinator {
        &self.hashinator
    }

    /// Routes `value` with the active partition map, without a call.
    #[must_use]
    pub fn partition_for(&self, value: &Value) -> PartitionId {
        self.hashinator.partition_for(value)
    }

    /// Applies a replicated log segment under `ctx`.
    ///
    /// Records that conflict with local data are skipped and reported in
    /// the outcome rather than failing the segment.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` if the context's token cannot be issued,
    /// the engine's error if the segment cannot be applied at all, or a
    /// protocol error if the conflict list is malformed.
    pub fn apply_binary_log(
        &mut self,
        log: &[u8],
        ctx: &ReplicationContext,
    ) -> BridgeResult<ApplyOutcome> {
        self.issue(ctx.undo_token())?;
        let applied_rows = self.call(Opcode::ApplyBinaryLog, &BinaryLogRequest { ctx: *ctx, log })?;
        let (_, bytes) = self.response()?;
        let conflicts = ResponseDecoder::decode_conflicts(bytes)?;
        let outcome = ApplyOutcome {
            applied_rows,
            conflicts,
        };
        self.dirty |= applied_rows > 0;
        self.replication.record(&outcome);
        Ok(outcome)
    }

    /// Returns replication totals.
    #[must_use]
    pub const fn replication(&self) -> &ReplicationApplier {
        &self.replication
    }

    /// Acknowledges export data up to `ack_offset` and polls what is left,
    /// or with `sync` set realigns the stream to `ack_offset` and `seq_no`.
    ///
    /// An `ack_offset` of zero acknowledges nothing; a negative `seq_no`
    /// leaves the sequence number alone.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for an unknown export table or an
    /// offset past the end of the stream, or a protocol error if the
    /// block is malformed.
    pub fn export_action(
        &mut self,
        sync: bool,
        ack_offset: i64,
        seq_no: i64,
        partition_id: PartitionId,
        signature: &str,
    ) -> BridgeResult<ExportBlock> {
        let request = ExportAction {
            sync,
            ack_offset,
            seq_no,
            partition_id,
            signature,
        };
        let end_uso = self.call(Opcode::ExportAction, &request).map_err(|err| {
            info!(
                sync,
                ack_offset,
                seq_no,
                partition = %partition_id,
                signature,
                error = %err,
                "Export action failed"
            );
            err
        })?;
        let (_, bytes) = self.response()?;
        let (_, payload) = ResponseDecoder::decode_payload(bytes)?;
        let block = ExportBlock::decode(payload)?;
        if block.end_uso() != end_uso {
            return Err(BridgeError::malformed(
                "export block",
                format!("block ends at {} but the stream ends at {end_uso}", block.end_uso()),
            ));
        }
        trace!(signature, uso = block.uso, bytes = block.data.len(), "Polled export stream");
        Ok(block)
    }

    /// Returns the stream offset and sequence number of an export table.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for an unknown export table, or a
    /// protocol error if the response is malformed.
    pub fn export_positions(&mut self, signature: &str) -> BridgeResult<ExportPositions> {
        self.call(Opcode::ExportPositions, &ExportPositionsRequest { signature })?;
        let (_, bytes) = self.response()?;
        let (_, payload) = ResponseDecoder::decode_payload(bytes)?;
        Ok(ExportPositions::decode(payload)?)
    }

    /// Loads rows a recovery source streamed out of `table_id` and returns
    /// how many were new.
    ///
    /// `rows` is the filled part of a recovery stream destination. Rows
    /// already present are skipped; recovered rows bypass the undo log.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for an unknown table, a row that does
    /// not fit it, or a row that conflicts with a different stored row.
    /// Nothing is loaded on error.
    pub fn process_recovery_message(&mut self, table_id: TableId, rows: &[u8]) -> BridgeResult<i64> {
        let loaded = self.call(
            Opcode::ProcessRecoveryMessage,
            &RecoveryMessage { table_id, rows },
        )?;
        self.dirty |= loaded > 0;
        debug!(%table_id, loaded, "Processed recovery message");
        Ok(loaded)
    }

    /// Supplies a response buffer for the next call to read from instead
    /// of the response buffer.
    ///
    /// A fallback still waiting for a call is replaced.
    pub fn fallback_to_engine_allocated_buffer(&mut self, bytes: Bytes) {
        if let Some(pending) = &self.pending_fallback {
            warn!(
                replaced = pending.len(),
                bytes = bytes.len(),
                "Replacing a fallback buffer no call has read"
            );
        }
        self.pending_fallback = Some(FallbackBuffer::new(bytes));
    }

    /// Returns true if the fallback supplied for the next call has not
    /// been consumed yet.
    #[must_use]
    pub const fn has_pending_fallback(&self) -> bool {
        self.pending_fallback.is_some()
    }

    /// Returns true if any call since the last
    /// [`take_dirty`](Self::take_dirty) reported a mutation.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns and clears the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

impl<E: Engine> Drop for ExecutionEngine<E> {
    fn drop(&mut self) {
        if self.handle.is_live() {
            if let Err(err) = self.release() {
                error!(error = %err, "Failed to release execution engine on drop");
            }
        }
    }
}
