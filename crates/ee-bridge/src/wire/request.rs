//! Request framings, one per opcode.
//!
//! Each request type implements [`Encode`] for the bridge side and has a
//! `decode` for the engine side. Mutating calls start with a 40 byte
//! transaction context:
//!
//! ```text
//! [i64 txnId][i64 spHandle][i64 lastCommittedSpHandle][i64 uniqueId][i64 undoToken]
//! ```
//!
//! Variable-sized members (tables, parameter sets, log segments) are
//! always length prefixed so the engine can frame them without decoding.

use bytes::{Buf, BufMut, Bytes};
use ee_common::config::EngineIdentity;
use ee_common::types::{
    ClusterId, DependencyId, FragmentId, PartitionId, ReplicationContext, TableId, TxnContext,
    UndoToken,
};

use super::catalog::Catalog;
use super::params::{FragmentParams, ParameterSet};
use super::partition::{HashinatorType, PartitionConfig};
use super::table::{Table, TableView};
use super::value::Value;
use super::{
    finish, get_bool, get_len, get_prefixed, get_string, need, put_len, put_prefixed, Encode,
    WireError, WireResult,
};

const MIB: usize = 1024 * 1024;

fn put_txn<B: BufMut>(buf: &mut B, ctx: &TxnContext) {
    buf.put_i64(ctx.txn_id);
    buf.put_i64(ctx.sp_handle);
    buf.put_i64(ctx.last_committed_sp_handle);
    buf.put_i64(ctx.unique_id);
    buf.put_i64(ctx.undo_token.as_i64());
}

fn get_txn(buf: &mut &[u8], what: &'static str) -> WireResult<TxnContext> {
    need(&*buf, TxnContext::ENCODED_SIZE, what)?;
    Ok(TxnContext::new(
        buf.get_i64(),
        buf.get_i64(),
        buf.get_i64(),
        buf.get_i64(),
        UndoToken::new(buf.get_i64()),
    ))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn put_size<B: BufMut>(buf: &mut B, size: usize) {
    buf.put_i64(size as i64);
}

fn get_size(buf: &mut &[u8], what: &'static str) -> WireResult<usize> {
    need(&*buf, 8, what)?;
    let raw = buf.get_i64();
    usize::try_from(raw).map_err(|_| WireError::new(what, format!("negative size {raw}")))
}

/// A request without a body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyRequest;

impl Encode for EmptyRequest {
    fn encoded_len(&self) -> usize {
        0
    }

    fn encode<B: BufMut>(&self, _buf: &mut B) {}
}

/// Engine initialization parameters.
#[derive(Debug, Clone, Copy)]
pub struct InitializeRequest<'a>(pub &'a EngineIdentity);

impl InitializeRequest<'_> {
    /// Decodes the identity an engine is initialized with.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<EngineIdentity> {
        let mut buf = bytes;
        need(&buf, 4 + 8 + 4 + 4, "initialize request")?;
        let cluster_index = buf.get_i32();
        let site_id = buf.get_i64();
        let partition_id = PartitionId::new(buf.get_i32());
        let host_id = buf.get_i32();
        let hostname = get_string(&mut buf, "initialize request")?;
        need(&buf, 4, "initialize request")?;
        let dr_cluster_id = ClusterId::new(buf.get_i32());
        let default_dr_buffer_size = get_len(&mut buf, "initialize request")?;
        let temp_table_memory_mb = get_size(&mut buf, "initialize request")? / MIB;
        let create_dr_replicated_stream = get_bool(&mut buf, "initialize request")?;
        let threshold = get_len(&mut buf, "initialize request")?;
        let compaction_threshold = u8::try_from(threshold).map_err(|_| {
            WireError::new(
                "initialize request",
                format!("compaction threshold {threshold} out of range"),
            )
        })?;
        finish(buf, "initialize request")?;
        Ok(EngineIdentity {
            cluster_index,
            site_id,
            partition_id,
            host_id,
            hostname,
            dr_cluster_id,
            default_dr_buffer_size,
            temp_table_memory_mb,
            create_dr_replicated_stream,
            compaction_threshold,
        })
    }
}

impl Encode for InitializeRequest<'_> {
    fn encoded_len(&self) -> usize {
        4 + 8 + 4 + 4 + 4 + self.0.hostname.len() + 4 + 4 + 8 + 1 + 4
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        let identity = self.0;
        buf.put_i32(identity.cluster_index);
        buf.put_i64(identity.site_id);
        buf.put_i32(identity.partition_id.as_i32());
        buf.put_i32(identity.host_id);
        put_prefixed(buf, identity.hostname.as_bytes());
        buf.put_i32(identity.dr_cluster_id.as_i32());
        put_len(buf, identity.default_dr_buffer_size);
        put_size(buf, identity.temp_table_memory_bytes());
        buf.put_u8(u8::from(identity.create_dr_replicated_stream));
        buf.put_i32(i32::from(identity.compaction_threshold));
    }
}

/// Catalog load or update.
#[derive(Debug, Clone, Copy)]
pub struct CatalogRequest<'a> {
    /// Catalog version timestamp.
    pub timestamp: i64,
    /// The catalog.
    pub catalog: &'a Catalog,
}

impl CatalogRequest<'_> {
    /// Decodes the timestamp and catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame or the catalog is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<(i64, Catalog)> {
        let mut buf = bytes;
        need(&buf, 8, "catalog request")?;
        let timestamp = buf.get_i64();
        let mut raw = get_prefixed(&mut buf, "catalog request")?;
        finish(buf, "catalog request")?;
        let catalog = Catalog::decode(&mut raw)?;
        finish(raw, "catalog")?;
        Ok((timestamp, catalog))
    }
}

impl Encode for CatalogRequest<'_> {
    fn encoded_len(&self) -> usize {
        8 + 4 + self.catalog.encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64(self.timestamp);
        put_len(buf, self.catalog.encoded_len());
        self.catalog.encode(buf);
    }
}

/// One fragment of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentCall {
    /// Plan fragment to run.
    pub fragment_id: FragmentId,
    /// Dependency the fragment reads from, or [`DependencyId::NONE`].
    pub input_dependency: DependencyId,
    /// Fragment parameters.
    pub params: FragmentParams,
}

impl FragmentCall {
    /// Creates a fragment call without an input dependency.
    #[must_use]
    pub fn new(fragment_id: FragmentId, params: impl Into<FragmentParams>) -> Self {
        Self {
            fragment_id,
            input_dependency: DependencyId::NONE,
            params: params.into(),
        }
    }

    /// Sets the input dependency.
    #[must_use]
    pub fn with_input_dependency(mut self, dependency: DependencyId) -> Self {
        self.input_dependency = dependency;
        self
    }

    fn encoded_len(&self) -> usize {
        8 + 4 + 4 + self.params.encoded_len()
    }
}

/// A batch of plan fragments run under one transaction context.
#[derive(Debug, Clone, Copy)]
pub struct FragmentBatch<'a> {
    /// Transaction coordinates.
    pub ctx: TxnContext,
    /// Fragments in submission order.
    pub fragments: &'a [FragmentCall],
}

/// A fragment as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFragment<'a> {
    /// Plan fragment to run.
    pub fragment_id: FragmentId,
    /// Dependency the fragment reads from.
    pub input_dependency: DependencyId,
    /// Serialized parameter set, exactly as written by the bridge.
    pub params: &'a [u8],
}

impl DecodedFragment<'_> {
    /// Decodes the parameter set.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are malformed.
    pub fn parameter_set(&self) -> WireResult<ParameterSet> {
        FragmentParams::Serialized(Bytes::copy_from_slice(self.params)).to_parameter_set()
    }
}

/// A fragment batch as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch<'a> {
    /// Transaction coordinates.
    pub ctx: TxnContext,
    /// Fragments in submission order.
    pub fragments: Vec<DecodedFragment<'a>>,
}

impl FragmentBatch<'_> {
    /// Decodes a batch without copying parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<DecodedBatch<'_>> {
        let mut buf = bytes;
        let ctx = get_txn(&mut buf, "fragment batch")?;
        let count = get_len(&mut buf, "fragment batch")?;
        let mut fragments = Vec::with_capacity(count.min(buf.len() / 16));
        for _ in 0..count {
            need(&buf, 12, "fragment batch")?;
            let fragment_id = FragmentId::new(buf.get_i64());
            let input_dependency = DependencyId::new(buf.get_i32());
            let params = get_prefixed(&mut buf, "fragment batch")?;
            fragments.push(DecodedFragment {
                fragment_id,
                input_dependency,
                params,
            });
        }
        finish(buf, "fragment batch")?;
        Ok(DecodedBatch { ctx, fragments })
    }
}

impl Encode for FragmentBatch<'_> {
    fn encoded_len(&self) -> usize {
        TxnContext::ENCODED_SIZE
            + 4
            + self
                .fragments
                .iter()
                .map(FragmentCall::encoded_len)
                .sum::<usize>()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_txn(buf, &self.ctx);
        put_len(buf, self.fragments.len());
        for fragment in self.fragments {
            buf.put_i64(fragment.fragment_id.as_i64());
            buf.put_i32(fragment.input_dependency.as_i32());
            put_len(buf, fragment.params.encoded_len());
            fragment.params.encode(buf);
        }
    }
}

/// A request naming a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRequest {
    /// The table.
    pub table_id: TableId,
}

impl TableRequest {
    /// Decodes a table request.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 4, "table request")?;
        let table_id = TableId::new(buf.get_i32());
        finish(buf, "table request")?;
        Ok(Self { table_id })
    }
}

impl Encode for TableRequest {
    fn encoded_len(&self) -> usize {
        4
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.table_id.as_i32());
    }
}

/// Bulk load of rows into a table.
#[derive(Debug, Clone, Copy)]
pub struct LoadTableRequest<'a> {
    /// Transaction coordinates.
    pub ctx: TxnContext,
    /// Target table.
    pub table_id: TableId,
    /// Return rows that violated uniqueness instead of failing.
    pub return_unique_violations: bool,
    /// Forward the loaded rows to the replication stream.
    pub should_dr_stream: bool,
    /// Rows to load.
    pub table: &'a Table,
}

/// A table load as seen by the engine.
#[derive(Debug, Clone)]
pub struct DecodedLoadTable<'a> {
    /// Transaction coordinates.
    pub ctx: TxnContext,
    /// Target table.
    pub table_id: TableId,
    /// Return rows that violated uniqueness instead of failing.
    pub return_unique_violations: bool,
    /// Forward the loaded rows to the replication stream.
    pub should_dr_stream: bool,
    /// Rows to load.
    pub table: TableView<'a>,
}

impl LoadTableRequest<'_> {
    /// Decodes a table load.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame or the table is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<DecodedLoadTable<'_>> {
        let mut buf = bytes;
        let ctx = get_txn(&mut buf, "load table request")?;
        need(&buf, 4, "load table request")?;
        let table_id = TableId::new(buf.get_i32());
        let return_unique_violations = get_bool(&mut buf, "load table request")?;
        let should_dr_stream = get_bool(&mut buf, "load table request")?;
        let table = TableView::parse(get_prefixed(&mut buf, "load table request")?)?;
        finish(buf, "load table request")?;
        Ok(DecodedLoadTable {
            ctx,
            table_id,
            return_unique_violations,
            should_dr_stream,
            table,
        })
    }
}

impl Encode for LoadTableRequest<'_> {
    fn encoded_len(&self) -> usize {
        TxnContext::ENCODED_SIZE + 4 + 1 + 1 + 4 + self.table.encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_txn(buf, &self.ctx);
        buf.put_i32(self.table_id.as_i32());
        buf.put_u8(u8::from(self.return_unique_violations));
        buf.put_u8(u8::from(self.should_dr_stream));
        put_len(buf, self.table.encoded_len());
        self.table.encode(buf);
    }
}

/// Periodic housekeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRequest {
    /// Wall clock time in milliseconds.
    pub time_ms: i64,
    /// Last committed single-partition handle.
    pub last_committed_sp_handle: i64,
}

impl TickRequest {
    /// Decodes a tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 16, "tick request")?;
        let request = Self {
            time_ms: buf.get_i64(),
            last_committed_sp_handle: buf.get_i64(),
        };
        finish(buf, "tick request")?;
        Ok(request)
    }
}

impl Encode for TickRequest {
    fn encoded_len(&self) -> usize {
        16
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64(self.time_ms);
        buf.put_i64(self.last_committed_sp_handle);
    }
}

/// Request carrying a single `i64`: quiesce handles and undo tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarRequest(pub i64);

impl ScalarRequest {
    /// Decodes the scalar.
    ///
    /// # Errors
    ///
    /// Returns an error unless the request is exactly eight bytes.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 8, "scalar request")?;
        let value = buf.get_i64();
        finish(buf, "scalar request")?;
        Ok(Self(value))
    }
}

impl Encode for ScalarRequest {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64(self.0);
    }
}

impl From<UndoToken> for ScalarRequest {
    fn from(token: UndoToken) -> Self {
        Self(token.as_i64())
    }
}

/// Hash a value under a partition configuration.
///
/// ```text
/// [i64 ringPointer][i32 numTokens][parameter set: value, i8 typeTag, varbinary config]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HashinateRequest {
    ring_pointer: u64,
    num_tokens: i32,
    params: ParameterSet,
}

/// A hash request as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedHashinate {
    /// Value to hash.
    pub value: Value,
    /// Configuration to hash it under.
    pub config: PartitionConfig,
}

impl HashinateRequest {
    /// Builds the request.
    ///
    /// # Errors
    ///
    /// Never fails for a single value; kept fallible to share the
    /// parameter set's size check.
    pub fn new(value: &Value, config: &PartitionConfig) -> WireResult<Self> {
        let params = ParameterSet::from_values(vec![
            value.clone(),
            Value::TinyInt(config.kind.as_i8()),
            Value::VarBinary(config.config.clone()),
        ])?;
        Ok(Self {
            ring_pointer: config.ring_pointer,
            num_tokens: config.num_tokens,
            params,
        })
    }

    /// Decodes a hash request.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or the parameter set
    /// does not hold `[value, tag, config]`.
    pub fn decode(bytes: &[u8]) -> WireResult<DecodedHashinate> {
        let mut buf = bytes;
        need(&buf, 12, "hashinate request")?;
        let ring_pointer = buf.get_u64();
        let num_tokens = buf.get_i32();
        let params = ParameterSet::decode(&mut buf)?;
        finish(buf, "hashinate request")?;

        let mut values = params.into_values().into_iter();
        match (values.next(), values.next(), values.next(), values.next()) {
            (Some(value), Some(Value::TinyInt(tag)), Some(Value::VarBinary(config)), None) => {
                Ok(DecodedHashinate {
                    value,
                    config: PartitionConfig {
                        kind: HashinatorType::from_i8(tag)?,
                        config,
                        ring_pointer,
                        num_tokens,
                    },
                })
            }
            _ => Err(WireError::new(
                "hashinate request",
                "expected [value, type tag, config] parameters",
            )),
        }
    }
}

impl Encode for HashinateRequest {
    fn encoded_len(&self) -> usize {
        8 + 4 + self.params.encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.ring_pointer);
        buf.put_i32(self.num_tokens);
        self.params.encode(buf);
    }
}

/// Install a new partition configuration.
///
/// ```text
/// [i8 typeTag][i64 ringPointer][i32 numTokens][parameter set: varbinary config | empty]
/// ```
///
/// The config bytes travel only when the ring pointer is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct HashinatorUpdate {
    kind: HashinatorType,
    ring_pointer: u64,
    num_tokens: i32,
    params: ParameterSet,
}

impl HashinatorUpdate {
    /// Builds the request.
    ///
    /// # Errors
    ///
    /// Never fails for a single value; kept fallible to share the
    /// parameter set's size check.
    pub fn new(config: &PartitionConfig) -> WireResult<Self> {
        let params = if config.needs_config_bytes() {
            ParameterSet::from_values(vec![Value::VarBinary(config.config.clone())])?
        } else {
            ParameterSet::new()
        };
        Ok(Self {
            kind: config.kind,
            ring_pointer: config.ring_pointer,
            num_tokens: config.num_tokens,
            params,
        })
    }

    /// Decodes an update into the configuration it installs.
    ///
    /// The returned config has empty config bytes when the update names a
    /// previously installed ring.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed, or if config bytes are
    /// missing for a zero ring pointer.
    pub fn decode(bytes: &[u8]) -> WireResult<PartitionConfig> {
        let mut buf = bytes;
        need(&buf, 1 + 8 + 4, "hashinator update")?;
        let kind = HashinatorType::from_i8(buf.get_i8())?;
        let ring_pointer = buf.get_u64();
        let num_tokens = buf.get_i32();
        let params = ParameterSet::decode(&mut buf)?;
        finish(buf, "hashinator update")?;

        let config = match (ring_pointer, params.values()) {
            (0, [Value::VarBinary(config)]) => config.clone(),
            (0, _) => {
                return Err(WireError::new(
                    "hashinator update",
                    "config bytes missing for an uninstalled ring",
                ))
            }
            (_, []) => Bytes::new(),
            (_, _) => {
                return Err(WireError::new(
                    "hashinator update",
                    "unexpected parameters for an installed ring",
                ))
            }
        };
        Ok(PartitionConfig {
            kind,
            config,
            ring_pointer,
            num_tokens,
        })
    }
}

impl Encode for HashinatorUpdate {
    fn encoded_len(&self) -> usize {
        1 + 8 + 4 + self.params.encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i8(self.kind.as_i8());
        buf.put_u64(self.ring_pointer);
        buf.put_i32(self.num_tokens);
        self.params.encode(buf);
    }
}

/// Apply a replicated log segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryLogRequest<'a> {
    /// Context the segment is applied under.
    pub ctx: ReplicationContext,
    /// The raw segment.
    pub log: &'a [u8],
}

impl<'a> BinaryLogRequest<'a> {
    /// Decodes the request without copying the segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &'a [u8]) -> WireResult<Self> {
        let mut buf = bytes;
        let txn = get_txn(&mut buf, "binary log request")?;
        need(&buf, 4, "binary log request")?;
        let remote_cluster_id = ClusterId::new(buf.get_i32());
        let log = get_prefixed(&mut buf, "binary log request")?;
        finish(buf, "binary log request")?;
        Ok(Self {
            ctx: ReplicationContext::new(txn, remote_cluster_id),
            log,
        })
    }
}

impl Encode for BinaryLogRequest<'_> {
    fn encoded_len(&self) -> usize {
        TxnContext::ENCODED_SIZE + 4 + 4 + self.log.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_txn(buf, &self.ctx.txn);
        buf.put_i32(self.ctx.remote_cluster_id.as_i32());
        put_prefixed(buf, self.log);
    }
}

/// Engine-side tasks run through the generic task call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum TaskType {
    /// Count rows a partition config would move elsewhere.
    ///
    /// Payload is a [`PartitionConfig`] wire form; the result is an `i64`
    /// count per table in table id order.
    ValidatePartitioning = 0,
}

impl TaskType {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    /// Parses a wire value.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown task types.
    pub fn from_i64(raw: i64) -> WireResult<Self> {
        match raw {
            0 => Ok(Self::ValidatePartitioning),
            _ => Err(WireError::new("task request", format!("unknown task {raw}"))),
        }
    }
}

/// Run an engine task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRequest<'a> {
    /// Which task.
    pub task: TaskType,
    /// Task-specific payload.
    pub payload: &'a [u8],
}

impl<'a> TaskRequest<'a> {
    /// Decodes a task request.
    ///
    /// # Errors
    ///
    /// Returns an error if the task type is unknown.
    pub fn decode(bytes: &'a [u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 8, "task request")?;
        let task = TaskType::from_i64(buf.get_i64())?;
        Ok(Self { task, payload: buf })
    }
}

impl Encode for TaskRequest<'_> {
    fn encoded_len(&self) -> usize {
        8 + self.payload.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64(self.task.as_i64());
        buf.put_slice(self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Column, ValueType};

    fn ctx() -> TxnContext {
        TxnContext::new(100, 101, 99, 5_000, UndoToken::new(42))
    }

    #[test]
    fn test_initialize() {
        let mut identity = EngineIdentity::new(17, PartitionId::new(3));
        identity.hostname = "ee-host-1".to_owned();
        identity.compaction_threshold = 80;
        let bytes = InitializeRequest(&identity).to_bytes();
        assert_eq!(bytes.len(), InitializeRequest(&identity).encoded_len());
        assert_eq!(InitializeRequest::decode(&bytes).unwrap(), identity);
    }

    #[test]
    fn test_fragment_batch_keeps_serialized_params() {
        let typed = ParameterSet::from_values(vec![Value::from(7i64)]).unwrap();
        let raw = typed.to_bytes();
        let calls = vec![
            FragmentCall::new(FragmentId::new(1), typed.clone()),
            FragmentCall::new(FragmentId::new(2), FragmentParams::Serialized(raw.clone()))
                .with_input_dependency(DependencyId::new(0)),
        ];
        let batch = FragmentBatch {
            ctx: ctx(),
            fragments: &calls,
        };
        let bytes = batch.to_bytes();
        assert_eq!(bytes.len(), batch.encoded_len());

        let decoded = FragmentBatch::decode(&bytes).unwrap();
        assert_eq!(decoded.ctx, ctx());
        assert_eq!(decoded.fragments.len(), 2);
        assert_eq!(decoded.fragments[0].params, &raw[..]);
        assert_eq!(decoded.fragments[1].params, &raw[..]);
        assert_eq!(decoded.fragments[1].input_dependency, DependencyId::new(0));
        assert_eq!(decoded.fragments[0].parameter_set().unwrap(), typed);
    }

    #[test]
    fn test_batch_rejects_trailing_bytes() {
        let batch = FragmentBatch {
            ctx: ctx(),
            fragments: &[],
        };
        let mut bytes = batch.to_bytes().to_vec();
        bytes.push(0);
        assert!(FragmentBatch::decode(&bytes).is_err());
    }

    #[test]
    fn test_load_table() {
        let table = Table::new(vec![Column::new("K", ValueType::Integer)])
            .with_row(vec![Value::Integer(1)])
            .unwrap();
        let request = LoadTableRequest {
            ctx: ctx(),
            table_id: TableId::new(8),
            return_unique_violations: true,
            should_dr_stream: false,
            table: &table,
        };
        let bytes = request.to_bytes();
        let decoded = LoadTableRequest::decode(&bytes).unwrap();
        assert_eq!(decoded.table_id, TableId::new(8));
        assert!(decoded.return_unique_violations);
        assert!(!decoded.should_dr_stream);
        assert_eq!(decoded.table.to_table().unwrap(), table);
    }

    #[test]
    fn test_hashinate_parameters() {
        let config = PartitionConfig::legacy(6);
        let request = HashinateRequest::new(&Value::from("key"), &config).unwrap();
        let decoded = HashinateRequest::decode(&request.to_bytes()).unwrap();
        assert_eq!(decoded.value, Value::from("key"));
        assert_eq!(decoded.config, config);
    }

    #[test]
    fn test_hashinator_update_omits_installed_config() {
        let config = PartitionConfig::legacy(4);
        let fresh = HashinatorUpdate::new(&config).unwrap();
        assert_eq!(HashinatorUpdate::decode(&fresh.to_bytes()).unwrap(), config);

        let installed = config.clone().with_ring_pointer(9);
        let update = HashinatorUpdate::new(&installed).unwrap();
        assert!(update.encoded_len() < fresh.encoded_len());
        let decoded = HashinatorUpdate::decode(&update.to_bytes()).unwrap();
        assert_eq!(decoded.ring_pointer, 9);
        assert!(decoded.config.is_empty());
    }

    #[test]
    fn test_binary_log_request() {
        let request = BinaryLogRequest {
            ctx: ReplicationContext::new(ctx(), ClusterId::new(2)),
            log: b"segment",
        };
        let bytes = request.to_bytes();
        assert_eq!(BinaryLogRequest::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_scalar_and_tick() {
        let bytes = ScalarRequest::from(UndoToken::new(5)).to_bytes();
        assert_eq!(ScalarRequest::decode(&bytes).unwrap(), ScalarRequest(5));
        assert!(ScalarRequest::decode(&bytes[..7]).is_err());

        let tick = TickRequest {
            time_ms: 1_000,
            last_committed_sp_handle: 77,
        };
        assert_eq!(TickRequest::decode(&tick.to_bytes()).unwrap(), tick);
    }

    #[test]
    fn test_unknown_task() {
        let bytes = 9i64.to_be_bytes();
        assert!(TaskRequest::decode(&bytes).is_err());
    }
}
