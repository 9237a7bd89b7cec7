//! Engine side of export streams.
//!
//! Every export table owns an append-only byte stream addressed by its
//! universal stream offset (USO). Rows reach the stream when the undo token
//! they were written under is released; rows written without an undo token
//! are appended immediately. Acknowledging an offset drops everything
//! before it.

use std::collections::BTreeMap;

use bytes::Bytes;
use ee_common::error::EngineError;
use ee_common::types::{TableId, UndoToken};
use tracing::{debug, trace};

use crate::wire::{ExportBlock, ExportPositions, Table, Value};

fn offset(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
struct ExportStream {
    table_id: TableId,
    /// Offset of the first byte of `pending`.
    acked: i64,
    pending: Vec<u8>,
    seq_no: i64,
}

impl ExportStream {
    fn uso(&self) -> i64 {
        self.acked + offset(self.pending.len())
    }
}

/// Export streams of one engine, keyed by table signature.
#[derive(Debug, Default)]
pub(crate) struct ExportStreams {
    streams: BTreeMap<String, ExportStream>,
    /// Row records written under unresolved undo tokens.
    staged: BTreeMap<UndoToken, Vec<(TableId, Vec<u8>)>>,
}

impl ExportStreams {
    /// Starts exporting `table_id` under `signature`. Returns false if the
    /// signature is taken.
    pub(crate) fn enable(&mut self, signature: &str, table_id: TableId) -> bool {
        if self.streams.contains_key(signature) {
            return false;
        }
        self.streams.insert(
            signature.to_owned(),
            ExportStream {
                table_id,
                acked: 0,
                pending: Vec::new(),
                seq_no: -1,
            },
        );
        debug!(signature, %table_id, "Export enabled");
        true
    }

    pub(crate) fn is_exported(&self, table_id: TableId) -> bool {
        self.streams.values().any(|s| s.table_id == table_id)
    }

    fn stream(&self, signature: &str) -> Result<&ExportStream, EngineError> {
        self.streams
            .get(signature)
            .ok_or_else(|| EngineError::sql("42S02", format!("unknown export table {signature}")))
    }

    fn stream_mut(&mut self, signature: &str) -> Result<&mut ExportStream, EngineError> {
        self.streams
            .get_mut(signature)
            .ok_or_else(|| EngineError::sql("42S02", format!("unknown export table {signature}")))
    }

    /// Records rows written to `table_id` under `token`.
    pub(crate) fn write(&mut self, token: UndoToken, table_id: TableId, rows: &[Vec<Value>]) {
        if rows.is_empty() || !self.is_exported(table_id) {
            return;
        }
        let mut bytes = Vec::with_capacity(rows.iter().map(|r| Table::row_len(r)).sum());
        for row in rows {
            Table::encode_row(row, &mut bytes);
        }
        if token == UndoToken::NO_UNDO {
            self.append(table_id, &bytes);
        } else {
            self.staged.entry(token).or_default().push((table_id, bytes));
        }
    }

    fn append(&mut self, table_id: TableId, bytes: &[u8]) {
        for stream in self.streams.values_mut().filter(|s| s.table_id == table_id) {
            stream.pending.extend_from_slice(bytes);
            trace!(%table_id, uso = stream.uso(), "Appended export rows");
        }
    }

    /// Publishes rows staged under every token up to and including `token`.
    pub(crate) fn commit(&mut self, token: UndoToken) {
        let kept = self.staged.split_off(&token.next());
        let committed = std::mem::replace(&mut self.staged, kept);
        for (table_id, bytes) in committed.into_values().flatten() {
            self.append(table_id, &bytes);
        }
    }

    /// Drops rows staged under `token` and every later token.
    pub(crate) fn discard(&mut self, token: UndoToken) {
        self.staged.split_off(&token);
    }

    /// Drops rows before `ack_offset` and records `seq_no`, then returns
    /// everything still unacknowledged.
    pub(crate) fn poll(
        &mut self,
        signature: &str,
        ack_offset: i64,
        seq_no: i64,
    ) -> Result<ExportBlock, EngineError> {
        let stream = self.stream_mut(signature)?;
        if ack_offset > stream.uso() {
            return Err(EngineError::unexpected(format!(
                "ack offset {ack_offset} is past the end of {signature} at {}",
                stream.uso()
            )));
        }
        if ack_offset > stream.acked {
            let consumed = usize::try_from(ack_offset - stream.acked)
                .map_err(|_| EngineError::unexpected("ack offset out of range"))?;
            stream.pending.drain(..consumed);
            stream.acked = ack_offset;
        }
        if seq_no >= 0 {
            stream.seq_no = seq_no;
        }
        Ok(ExportBlock {
            uso: stream.acked,
            data: Bytes::copy_from_slice(&stream.pending),
        })
    }

    /// Repositions a stream, discarding unacknowledged data.
    pub(crate) fn sync(
        &mut self,
        signature: &str,
        uso: i64,
        seq_no: i64,
    ) -> Result<ExportBlock, EngineError> {
        if uso < 0 {
            return Err(EngineError::unexpected(format!("negative stream offset {uso}")));
        }
        let stream = self.stream_mut(signature)?;
        stream.pending.clear();
        stream.acked = uso;
        stream.seq_no = seq_no;
        debug!(signature, uso, seq_no, "Export stream realigned");
        Ok(ExportBlock {
            uso,
            data: Bytes::new(),
        })
    }

    pub(crate) fn positions(&self, signature: &str) -> Result<ExportPositions, EngineError> {
        let stream = self.stream(signature)?;
        Ok(ExportPositions {
            uso: stream.uso(),
            seq_no: stream.seq_no,
        })
    }

    /// Forgets staged rows; committed stream data survives.
    pub(crate) fn clear_staged(&mut self) {
        self.staged.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.streams.clear();
        self.staged.clear();
    }
}
