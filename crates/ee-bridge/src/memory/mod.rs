//! In-process execution engine.
//!
//! [`MemoryEngine`] implements [`Engine`] over keyed in-memory tables. It
//! decodes the same framings the bridge writes, so everything the bridge
//! does can be exercised without a native engine:
//!
//! - **Tables**: rows keyed by their first column, installed from a catalog
//! - **Undo log**: row changes recorded per undo token, released or
//!   reverted on request
//! - **Fragments**: plan fragments are closures registered by id
//! - **Streams**: key-ordered table streams with partition predicates
//! - **Hashing**: partition maps built with the bridge's own [`Hashinator`]
//! - **Replication**: binary log segments applied with conflict reporting
//! - **Export**: committed rows of export tables, polled and acknowledged
//!   by stream offset
//! - **Recovery**: rows streamed from another engine loaded without undo
//!
//! Failures can be injected per opcode to test error surfacing.

mod export;
mod store;
mod streams;

use std::collections::{HashMap, HashSet};
use std::fmt;

use bytes::BufMut;
use ee_common::config::EngineIdentity;
use ee_common::constants::STATUS_SUCCESS;
use ee_common::error::{ConstraintType, EngineError};
use ee_common::types::{DependencyId, FragmentId, TableId, TxnContext, UndoToken};
use tracing::{debug, trace, warn};

use crate::engine::{Engine, EngineIo, Opcode};
use crate::hashinator::Hashinator;
use crate::wire::binlog::{conflicts_encoded_len, encode_conflicts};
use crate::wire::request::{
    BinaryLogRequest, CatalogRequest, FragmentBatch, HashinateRequest, HashinatorUpdate,
    InitializeRequest, LoadTableRequest, ScalarRequest, TableRequest, TaskRequest, TaskType,
    TickRequest,
};
use crate::wire::response::{
    DependencyResult, FragmentResponse, PayloadResponse, PositionList, RowCounts,
};
use crate::wire::{
    BinaryLogSegment, Column, Conflict, ConflictKind, Encode, ExportAction,
    ExportPositionsRequest, LogOp, ParameterSet, PartitionConfig, RecoveryMessage,
    StreamActivation, StreamContinuation, StreamType, Table, Value, ValueType, WireError,
};

use export::ExportStreams;
use store::{Inserted, TableStore};
use streams::EngineStreams;

/// A registered plan fragment.
///
/// Receives the fragment's context and decoded parameters and returns its
/// result table.
pub type FragmentHandler =
    Box<dyn FnMut(&mut FragmentContext<'_>, &ParameterSet) -> Result<Table, EngineError> + Send>;

fn malformed(err: WireError) -> EngineError {
    EngineError::unexpected(err.to_string())
}

fn modified_tuples(count: i64) -> Result<Table, EngineError> {
    Table::new(vec![Column::new("modified_tuples", ValueType::BigInt)])
        .with_row(vec![Value::BigInt(count)])
        .map_err(malformed)
}

/// What a fragment can see and do while it runs.
pub struct FragmentContext<'a> {
    store: &'a mut TableStore,
    exports: &'a mut ExportStreams,
    txn: TxnContext,
    input: Option<&'a Table>,
}

impl FragmentContext<'_> {
    /// Returns the transaction the fragment runs in.
    #[must_use]
    pub const fn txn(&self) -> &TxnContext {
        &self.txn
    }

    /// Returns the result of the fragment's input dependency.
    #[must_use]
    pub fn input(&self) -> Option<&Table> {
        self.input
    }

    /// Returns a copy of a table's rows in key order.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown table.
    pub fn scan(&self, table_id: TableId) -> Result<Table, EngineError> {
        self.store.table(table_id)?.to_table()
    }

    /// Inserts a row under the transaction's undo token.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation if the key is taken, or an error if
    /// the row does not fit the table.
    pub fn insert(&mut self, table_id: TableId, row: Vec<Value>) -> Result<(), EngineError> {
        let exported = self.exports.is_exported(table_id).then(|| row.clone());
        match self.store.insert(self.txn.undo_token, table_id, row)? {
            Inserted::Inserted => {
                if let Some(row) = exported {
                    self.exports.write(self.txn.undo_token, table_id, &[row]);
                }
                Ok(())
            }
            Inserted::Duplicate | Inserted::Existing => {
                let name = self.store.table(table_id)?.name.clone();
                Err(EngineError::constraint_violation(
                    ConstraintType::PrimaryKey,
                    name.clone(),
                    format!("duplicate key in {name}"),
                ))
            }
        }
    }

    /// Deletes the row stored under `key`. Returns false if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown table.
    pub fn delete(&mut self, table_id: TableId, key: &Value) -> Result<bool, EngineError> {
        Ok(self
            .store
            .delete(self.txn.undo_token, table_id, key)?
            .is_some())
    }

    /// Replaces the row stored under the row's key. Returns false if there
    /// was none.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown table or a mismatched row.
    pub fn update(&mut self, table_id: TableId, row: Vec<Value>) -> Result<bool, EngineError> {
        Ok(self
            .store
            .replace(self.txn.undo_token, table_id, row)?
            .is_some())
    }
}

impl fmt::Debug for FragmentContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentContext")
            .field("txn", &self.txn)
            .field("input", &self.input.map(Table::row_count))
            .finish_non_exhaustive()
    }
}

struct ConflictList<'a>(&'a [Conflict]);

impl Encode for ConflictList<'_> {
    fn encoded_len(&self) -> usize {
        conflicts_encoded_len(self.0)
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_conflicts(self.0, buf);
    }
}

/// An execution engine that keeps everything in memory.
pub struct MemoryEngine {
    identity: Option<EngineIdentity>,
    catalog_loaded: bool,
    store: TableStore,
    handlers: HashMap<FragmentId, FragmentHandler>,
    streams: EngineStreams,
    exports: ExportStreams,
    rings: HashMap<u64, PartitionConfig>,
    next_ring: u64,
    hashinator: Option<Hashinator>,
    failures: HashMap<Opcode, Option<EngineError>>,
    force_fallback: bool,
    invocations: Vec<Opcode>,
    last_tick: Option<TickRequest>,
    last_quiesce: Option<i64>,
    dr_rows: u64,
    destroyed: bool,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an uninitialized engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identity: None,
            catalog_loaded: false,
            store: TableStore::default(),
            handlers: HashMap::new(),
            streams: EngineStreams::default(),
            exports: ExportStreams::default(),
            rings: HashMap::new(),
            next_ring: 0,
            hashinator: None,
            failures: HashMap::new(),
            force_fallback: false,
            invocations: Vec::new(),
            last_tick: None,
            last_quiesce: None,
            dr_rows: 0,
            destroyed: false,
        }
    }

    /// Registers a plan fragment.
    pub fn register_fragment<F>(&mut self, fragment_id: FragmentId, handler: F)
    where
        F: FnMut(&mut FragmentContext<'_>, &ParameterSet) -> Result<Table, EngineError>
            + Send
            + 'static,
    {
        self.handlers.insert(fragment_id, Box::new(handler));
    }

    /// Registers a fragment returning every row of `table_id`.
    pub fn register_scan(&mut self, fragment_id: FragmentId, table_id: TableId) {
        self.register_fragment(fragment_id, move |ctx, _| ctx.scan(table_id));
    }

    /// Registers a fragment inserting its parameters as one row of
    /// `table_id`.
    pub fn register_insert(&mut self, fragment_id: FragmentId, table_id: TableId) {
        self.register_fragment(fragment_id, move |ctx, params| {
            ctx.insert(table_id, params.values().to_vec())?;
            modified_tuples(1)
        });
    }

    /// Exports a table under its name. Rows inserted into it reach the
    /// export stream once their undo token is released.
    ///
    /// Returns false for an unknown table or one already exported.
    pub fn enable_export(&mut self, table_id: TableId) -> bool {
        match self.store.table(table_id) {
            Ok(table) => {
                let signature = table.name.clone();
                self.exports.enable(&signature, table_id)
            }
            Err(_) => false,
        }
    }

    /// Makes the next call of `opcode` fail. With `None` the failure
    /// carries no details.
    pub fn fail_next(&mut self, opcode: Opcode, error: Option<EngineError>) {
        self.failures.insert(opcode, error);
    }

    /// Writes every response into an engine-allocated buffer.
    pub fn set_force_fallback(&mut self, force: bool) {
        self.force_fallback = force;
    }

    /// Stores a partition configuration and returns the pointer that
    /// names it in later updates.
    pub fn install_ring(&mut self, config: &PartitionConfig) -> u64 {
        self.next_ring += 1;
        let mut stored = config.clone();
        stored.ring_pointer = 0;
        self.rings.insert(self.next_ring, stored);
        debug!(ring_pointer = self.next_ring, "Installed partition ring");
        self.next_ring
    }

    /// Returns every opcode invoked so far, in order.
    #[must_use]
    pub fn invocations(&self) -> &[Opcode] {
        &self.invocations
    }

    /// Returns the identity the engine was initialized with.
    #[must_use]
    pub const fn identity(&self) -> Option<&EngineIdentity> {
        self.identity.as_ref()
    }

    /// Returns the number of rows in a table, if it exists.
    #[must_use]
    pub fn row_count(&self, table_id: TableId) -> Option<usize> {
        self.store.table(table_id).ok().map(|t| t.rows.len())
    }

    /// Returns the row stored under `key`.
    #[must_use]
    pub fn row(&self, table_id: TableId, key: &Value) -> Option<Vec<Value>> {
        self.store
            .table(table_id)
            .ok()
            .and_then(|t| t.rows.get(&key.to_key()).cloned())
    }

    /// Returns true if the engine has an unfinished stream on the table.
    #[must_use]
    pub fn is_streaming(&self, table_id: TableId, stream_type: StreamType) -> bool {
        self.streams.is_active(table_id, stream_type)
    }

    /// Returns the active partition map.
    #[must_use]
    pub const fn hashinator(&self) -> Option<&Hashinator> {
        self.hashinator.as_ref()
    }

    /// Returns the last tick received.
    #[must_use]
    pub const fn last_tick(&self) -> Option<(i64, i64)> {
        match self.last_tick {
            Some(tick) => Some((tick.time_ms, tick.last_committed_sp_handle)),
            None => None,
        }
    }

    /// Returns the handle of the last quiesce.
    #[must_use]
    pub const fn last_quiesce(&self) -> Option<i64> {
        self.last_quiesce
    }

    /// Returns the number of loaded rows forwarded to replication.
    #[must_use]
    pub const fn dr_rows(&self) -> u64 {
        self.dr_rows
    }

    /// Returns true once the engine has been torn down.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn fail(opcode: Opcode, io: &mut EngineIo<'_>, error: Option<&EngineError>) -> i64 {
        io.write_error(error);
        if opcode.returns_value() {
            -1
        } else {
            ee_common::constants::STATUS_ERROR
        }
    }

    fn respond<R: Encode>(&self, io: &mut EngineIo<'_>, response: &R) {
        if self.force_fallback {
            io.set_fallback(response.to_bytes());
        } else if io.respond(response) {
            trace!(bytes = response.encoded_len(), "Response spilled to fallback buffer");
        }
    }

    fn initialized(&self) -> Result<&EngineIdentity, EngineError> {
        self.identity
            .as_ref()
            .ok_or_else(|| EngineError::unexpected("engine is not initialized"))
    }

    fn resolve_ring(&self, config: PartitionConfig) -> Result<PartitionConfig, EngineError> {
        if config.needs_config_bytes() {
            return Ok(config);
        }
        self.rings
            .get(&config.ring_pointer)
            .cloned()
            .ok_or_else(|| {
                EngineError::unexpected(format!("unknown ring pointer {}", config.ring_pointer))
            })
    }

    fn build_hashinator(&self, config: PartitionConfig) -> Result<Hashinator, EngineError> {
        let config = self.resolve_ring(config)?;
        Hashinator::new(config).map_err(|err| EngineError::unexpected(err.to_string()))
    }

    fn dispatch(&mut self, opcode: Opcode, io: &mut EngineIo<'_>) -> Result<i64, EngineError> {
        if self.destroyed {
            return Err(EngineError::unexpected("engine was destroyed"));
        }
        if opcode != Opcode::Initialize {
            self.initialized()?;
        }
        let request = io.request();

        match opcode {
            Opcode::Initialize => {
                if self.identity.is_some() {
                    return Err(EngineError::unexpected("engine is already initialized"));
                }
                let identity = InitializeRequest::decode(request).map_err(malformed)?;
                identity
                    .validate()
                    .map_err(|err| EngineError::unexpected(err.to_string()))?;
                debug!(site_id = identity.site_id, partition = %identity.partition_id, "Engine initialized");
                self.identity = Some(identity);
            }
            Opcode::LoadCatalog | Opcode::UpdateCatalog => {
                let loading = opcode == Opcode::LoadCatalog;
                if loading == self.catalog_loaded {
                    return Err(EngineError::unexpected(if loading {
                        "catalog is already loaded"
                    } else {
                        "no catalog to update"
                    }));
                }
                let (timestamp, catalog) = CatalogRequest::decode(request).map_err(malformed)?;
                self.store.apply_catalog(&catalog);
                self.streams.clear();
                self.exports.clear_staged();
                self.catalog_loaded = true;
                debug!(timestamp, tables = catalog.tables().len(), "Catalog applied");
            }
            Opcode::ExecutePlanFragments => self.execute_fragments(io)?,
            Opcode::SerializeTable => {
                let TableRequest { table_id } = TableRequest::decode(request).map_err(malformed)?;
                let table = self.store.table(table_id)?.to_table()?;
                let response = FragmentResponse {
                    dirty: false,
                    dependencies: vec![DependencyResult {
                        id: DependencyId::new(0),
                        table: table.to_bytes(),
                    }],
                };
                self.respond(io, &response);
            }
            Opcode::LoadTable => self.load_table(io)?,
            Opcode::Tick => {
                self.last_tick = Some(TickRequest::decode(request).map_err(malformed)?);
            }
            Opcode::Quiesce => {
                self.last_quiesce = Some(ScalarRequest::decode(request).map_err(malformed)?.0);
            }
            Opcode::ReleaseUndoToken => {
                let token = UndoToken::new(ScalarRequest::decode(request).map_err(malformed)?.0);
                self.store.release(token);
                self.exports.commit(token);
            }
            Opcode::UndoUndoToken => {
                let token = UndoToken::new(ScalarRequest::decode(request).map_err(malformed)?.0);
                self.store.undo(token);
                self.exports.discard(token);
            }
            Opcode::ActivateTableStream => {
                let activation = StreamActivation::decode(request).map_err(malformed)?;
                let Ok(table) = self.store.table(activation.table_id) else {
                    return Ok(0);
                };
                let activated = self.streams.activate(
                    activation.table_id,
                    activation.stream_type,
                    activation.predicates,
                    table,
                );
                return Ok(i64::from(activated));
            }
            Opcode::TableStreamSerializeMore => {
                let continuation = StreamContinuation::decode(request).map_err(malformed)?;
                let destinations = io.destinations_mut();
                let described = continuation
                    .destinations
                    .iter()
                    .map(|d| (d.partition_id, d.capacity));
                if !described.eq(destinations.iter().map(|d| (d.partition_id(), d.capacity()))) {
                    return Err(EngineError::unexpected(
                        "stream destinations do not match the request",
                    ));
                }
                let table = self.store.table(continuation.table_id)?;
                let chunk = self.streams.serialize_more(
                    continuation.table_id,
                    continuation.stream_type,
                    table,
                    destinations,
                )?;
                self.respond(io, &PositionList(chunk.positions));
                return Ok(chunk.remaining);
            }
            Opcode::TableHashCode => {
                let TableRequest { table_id } = TableRequest::decode(request).map_err(malformed)?;
                return self.store.hash_code(table_id);
            }
            Opcode::Hashinate => {
                let decoded = HashinateRequest::decode(request).map_err(malformed)?;
                let hashinator = self.build_hashinator(decoded.config)?;
                return Ok(i64::from(hashinator.partition_for(&decoded.value).as_i32()));
            }
            Opcode::UpdateHashinator => {
                let config = HashinatorUpdate::decode(request).map_err(malformed)?;
                self.hashinator = Some(self.build_hashinator(config)?);
            }
            Opcode::ApplyBinaryLog => return self.apply_binary_log(io),
            Opcode::ExecuteTask => self.execute_task(io)?,
            Opcode::ExportAction => {
                let action = ExportAction::decode(request).map_err(malformed)?;
                let block = if action.sync {
                    self.exports
                        .sync(action.signature, action.ack_offset, action.seq_no)?
                } else {
                    self.exports
                        .poll(action.signature, action.ack_offset, action.seq_no)?
                };
                let uso = block.end_uso();
                let response = PayloadResponse {
                    dirty: false,
                    payload: block.to_bytes(),
                };
                self.respond(io, &response);
                return Ok(uso);
            }
            Opcode::ExportPositions => {
                let ExportPositionsRequest { signature } =
                    ExportPositionsRequest::decode(request).map_err(malformed)?;
                let response = PayloadResponse {
                    dirty: false,
                    payload: self.exports.positions(signature)?.to_bytes(),
                };
                self.respond(io, &response);
            }
            Opcode::ProcessRecoveryMessage => return self.process_recovery_message(io),
            Opcode::Destroy => {
                self.store.clear();
                self.streams.clear();
                self.exports.clear();
                self.handlers.clear();
                self.rings.clear();
                self.hashinator = None;
                self.destroyed = true;
                debug!("Engine destroyed");
            }
        }
        Ok(STATUS_SUCCESS)
    }

    fn execute_fragments(&mut self, io: &mut EngineIo<'_>) -> Result<(), EngineError> {
        let batch = FragmentBatch::decode(io.request()).map_err(malformed)?;
        let before = self.store.mutations();
        let mut outputs: Vec<(DependencyId, Table)> = Vec::with_capacity(batch.fragments.len());

        for (index, fragment) in batch.fragments.iter().enumerate() {
            let params = fragment.parameter_set().map_err(malformed)?;
            let input = if fragment.input_dependency == DependencyId::NONE {
                None
            } else {
                let found = outputs
                    .iter()
                    .find(|(id, _)| *id == fragment.input_dependency)
                    .map(|(_, table)| table);
                Some(found.ok_or_else(|| {
                    EngineError::unexpected(format!(
                        "fragment {} reads unknown dependency {}",
                        fragment.fragment_id, fragment.input_dependency
                    ))
                })?)
            };
            let handler = self.handlers.get_mut(&fragment.fragment_id).ok_or_else(|| {
                EngineError::sql("42000", format!("unknown plan fragment {}", fragment.fragment_id))
            })?;
            let mut ctx = FragmentContext {
                store: &mut self.store,
                exports: &mut self.exports,
                txn: batch.ctx,
                input,
            };
            let table = handler(&mut ctx, &params)?;
            let id = i32::try_from(index)
                .map_err(|_| EngineError::unexpected("too many fragments in batch"))?;
            outputs.push((DependencyId::new(id), table));
        }

        let response = FragmentResponse {
            dirty: self.store.mutations() != before,
            dependencies: outputs
                .into_iter()
                .map(|(id, table)| DependencyResult {
                    id,
                    table: table.to_bytes(),
                })
                .collect(),
        };
        self.respond(io, &response);
        Ok(())
    }

    fn load_table(&mut self, io: &mut EngineIo<'_>) -> Result<(), EngineError> {
        let request = LoadTableRequest::decode(io.request()).map_err(malformed)?;
        let token = request.ctx.undo_token;
        let table_id = request.table_id;
        let rows = request
            .table
            .rows()
            .map(|row| row.values())
            .collect::<Result<Vec<_>, _>>()
            .map_err(malformed)?;

        let columns = {
            let table = self.store.table(table_id)?;
            if request.table.columns() != table.columns.as_slice() {
                return Err(EngineError::sql(
                    "22000",
                    format!("loaded columns do not match {}", table.name),
                ));
            }
            if !request.return_unique_violations {
                let mut seen = HashSet::with_capacity(rows.len());
                for row in &rows {
                    let key = row.first().map(Value::to_key).unwrap_or_default();
                    if table.rows.contains_key(&key) || !seen.insert(key) {
                        return Err(EngineError::constraint_violation(
                            ConstraintType::PrimaryKey,
                            table.name.clone(),
                            format!("duplicate key in {}", table.name),
                        ));
                    }
                }
            }
            table.columns.clone()
        };

        let exported = self.exports.is_exported(table_id);
        let mut violations = Table::new(columns);
        let mut written = Vec::new();
        let mut loaded = 0u64;
        for row in rows {
            let copy = exported.then(|| row.clone());
            let inserted = if request.return_unique_violations {
                match self.store.insert(token, table_id, row.clone())? {
                    Inserted::Inserted => true,
                    Inserted::Duplicate | Inserted::Existing => {
                        violations.push_row(row).map_err(malformed)?;
                        false
                    }
                }
            } else {
                self.store.insert(token, table_id, row)?;
                true
            };
            if inserted {
                loaded += 1;
                written.extend(copy);
            }
        }
        self.exports.write(token, table_id, &written);
        if request.should_dr_stream {
            self.dr_rows += loaded;
        }
        debug!(%table_id, loaded, violations = violations.row_count(), "Loaded table");

        let dependencies = if violations.is_empty() {
            Vec::new()
        } else {
            vec![DependencyResult {
                id: DependencyId::new(0),
                table: violations.to_bytes(),
            }]
        };
        self.respond(
            io,
            &FragmentResponse {
                dirty: loaded > 0,
                dependencies,
            },
        );
        Ok(())
    }

    fn apply_binary_log(&mut self, io: &mut EngineIo<'_>) -> Result<i64, EngineError> {
        let request = BinaryLogRequest::decode(io.request()).map_err(malformed)?;
        let segment = BinaryLogSegment::decode(request.log).map_err(malformed)?;
        for record in segment.records() {
            self.store.validate_row(record.table_id, &record.row)?;
        }

        let token = request.ctx.undo_token();
        let mut applied = 0i64;
        let mut conflicts = Vec::new();
        for (record_index, record) in segment.records().iter().enumerate() {
            let conflict = match record.op {
                LogOp::Insert => {
                    match self.store.insert(token, record.table_id, record.row.clone())? {
                        Inserted::Inserted => None,
                        Inserted::Duplicate => Some(ConflictKind::Duplicate),
                        Inserted::Existing => Some(ConflictKind::ExistingRow),
                    }
                }
                LogOp::Delete => {
                    let key = record.key().unwrap_or(&Value::Null);
                    match self.store.delete(token, record.table_id, key)? {
                        Some(_) => None,
                        None => Some(ConflictKind::MissingRow),
                    }
                }
                LogOp::Update => match self.store.replace(token, record.table_id, record.row.clone())? {
                    Some(_) => None,
                    None => Some(ConflictKind::MissingRow),
                },
            };
            match conflict {
                None => applied += 1,
                Some(kind) => conflicts.push(Conflict { record_index, kind }),
            }
        }
        debug!(
            remote_cluster = %request.ctx.remote_cluster_id,
            applied,
            conflicts = conflicts.len(),
            "Applied binary log"
        );
        self.respond(io, &ConflictList(&conflicts));
        Ok(applied)
    }

    fn process_recovery_message(&mut self, io: &mut EngineIo<'_>) -> Result<i64, EngineError> {
        let message = RecoveryMessage::decode(io.request()).map_err(malformed)?;
        let table_id = message.table_id;
        let rows = Table::decode_rows(message.rows).map_err(malformed)?;
        {
            let table = self.store.table(table_id)?;
            for row in &rows {
                self.store.validate_row(table_id, row)?;
                let key = row.first().map(Value::to_key).unwrap_or_default();
                if table.rows.get(&key).is_some_and(|existing| existing != row) {
                    return Err(EngineError::constraint_violation(
                        ConstraintType::PrimaryKey,
                        table.name.clone(),
                        format!("recovered row conflicts with a row in {}", table.name),
                    ));
                }
            }
        }

        let mut loaded = 0i64;
        for row in rows {
            if self.store.insert(UndoToken::NO_UNDO, table_id, row)? == Inserted::Inserted {
                loaded += 1;
            }
        }
        debug!(%table_id, loaded, "Processed recovery message");
        Ok(loaded)
    }

    fn execute_task(&mut self, io: &mut EngineIo<'_>) -> Result<(), EngineError> {
        let task = TaskRequest::decode(io.request()).map_err(malformed)?;
        match task.task {
            TaskType::ValidatePartitioning => {
                let mut payload = task.payload;
                let config = PartitionConfig::decode(&mut payload).map_err(malformed)?;
                let hashinator = self.build_hashinator(config)?;
                let partition = self.initialized()?.partition_id;
                let counts = self
                    .store
                    .tables()
                    .map(|(_, table)| {
                        let misplaced = table
                            .rows
                            .values()
                            .filter(|row| {
                                let key = row.first().unwrap_or(&Value::Null);
                                hashinator.partition_for(key) != partition
                            })
                            .count();
                        i64::try_from(misplaced).unwrap_or(i64::MAX)
                    })
                    .collect();
                let response = PayloadResponse {
                    dirty: false,
                    payload: RowCounts(counts).to_bytes(),
                };
                self.respond(io, &response);
            }
        }
        Ok(())
    }
}

impl Engine for MemoryEngine {
    fn invoke(&mut self, opcode: Opcode, io: &mut EngineIo<'_>) -> i64 {
        self.invocations.push(opcode);
        trace!(%opcode, "Memory engine call");
        if let Some(error) = self.failures.remove(&opcode) {
            debug!(%opcode, "Injected failure");
            return Self::fail(opcode, io, error.as_ref());
        }
        match self.dispatch(opcode, io) {
            Ok(result) => result,
            Err(err) => {
                warn!(%opcode, kind = %err.kind, message = %err.message, "Engine call failed");
                Self::fail(opcode, io, Some(&err))
            }
        }
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("identity", &self.identity)
            .field("catalog_loaded", &self.catalog_loaded)
            .field("fragments", &self.handlers.len())
            .field("rings", &self.rings.len())
            .field("invocations", &self.invocations.len())
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}
