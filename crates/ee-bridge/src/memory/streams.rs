//! Engine side of table streams.
//!
//! A stream walks its table in key order, remembering the last key it
//! wrote. Each continuation fills the caller's destinations with whole
//! rows until a matching destination runs out of room.

use std::collections::BTreeMap;
use std::ops::Bound;

use ee_common::error::EngineError;
use ee_common::types::TableId;
use tracing::debug;

use super::store::MemTable;
use crate::engine::StreamDestination;
use crate::hashinator::legacy_partition;
use crate::wire::{StreamPredicate, StreamType, Table, Value};

#[derive(Debug, Clone)]
struct ActiveStream {
    predicates: Vec<StreamPredicate>,
    /// Key of the last row consumed.
    cursor: Option<Vec<u8>>,
    /// Rows not yet consumed, counted at activation.
    pending: i64,
}

/// Output of one continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub(crate) remaining: i64,
    pub(crate) positions: Vec<i32>,
}

/// Streams running inside one engine.
#[derive(Debug, Default)]
pub(crate) struct EngineStreams {
    active: BTreeMap<(TableId, StreamType), ActiveStream>,
}

const fn is_copy_stream(stream_type: StreamType) -> bool {
    matches!(stream_type, StreamType::Recovery | StreamType::Snapshot)
}

impl EngineStreams {
    /// Starts a stream. Returns false if the stream cannot start because
    /// it, or a conflicting copy stream on the same table, is running.
    pub(crate) fn activate(
        &mut self,
        table_id: TableId,
        stream_type: StreamType,
        predicates: Vec<StreamPredicate>,
        table: &MemTable,
    ) -> bool {
        let conflict = self.active.keys().any(|(t, s)| {
            *t == table_id && (*s == stream_type || (is_copy_stream(*s) && is_copy_stream(stream_type)))
        });
        if conflict {
            debug!(%table_id, %stream_type, "Conflicting table stream is running");
            return false;
        }
        let pending = if stream_type == StreamType::ElasticIndexClear {
            0
        } else {
            i64::try_from(table.rows.len()).unwrap_or(i64::MAX)
        };
        self.active.insert(
            (table_id, stream_type),
            ActiveStream {
                predicates,
                cursor: None,
                pending,
            },
        );
        true
    }

    pub(crate) fn is_active(&self, table_id: TableId, stream_type: StreamType) -> bool {
        self.active.contains_key(&(table_id, stream_type))
    }

    /// Fills `destinations` with the next rows of a stream.
    pub(crate) fn serialize_more(
        &mut self,
        table_id: TableId,
        stream_type: StreamType,
        table: &MemTable,
        destinations: &mut [StreamDestination],
    ) -> Result<Chunk, EngineError> {
        let key = (table_id, stream_type);
        let stream = self.active.get_mut(&key).ok_or_else(|| {
            EngineError::unexpected(format!("no {stream_type} stream on table {table_id}"))
        })?;
        if !stream.predicates.is_empty() && stream.predicates.len() != destinations.len() {
            return Err(EngineError::unexpected(format!(
                "{} destinations for {} predicates",
                destinations.len(),
                stream.predicates.len()
            )));
        }

        let mut positions = vec![0usize; destinations.len()];
        let mut exhausted = stream.pending == 0;
        if !exhausted {
            let start = stream
                .cursor
                .as_ref()
                .map_or(Bound::Unbounded, |k| Bound::Excluded(k.clone()));
            let mut rows = table.rows.range((start, Bound::Unbounded)).peekable();
            while let Some((row_key, row)) = rows.peek() {
                let targets = Self::targets(&stream.predicates, row, destinations.len());
                let len = Table::row_len(row);
                let fits = targets
                    .iter()
                    .all(|i| positions[*i] + len <= destinations[*i].capacity());
                if !fits {
                    if positions.iter().all(|p| *p == 0) {
                        return Err(EngineError::unexpected(format!(
                            "row of {len} bytes does not fit an empty destination"
                        )));
                    }
                    break;
                }
                for i in targets {
                    let start = positions[i];
                    let mut out = &mut destinations[i].as_mut_slice()[start..start + len];
                    Table::encode_row(row, &mut out);
                    positions[i] += len;
                }
                stream.cursor = Some((*row_key).clone());
                stream.pending = stream.pending.saturating_sub(1);
                rows.next();
            }
            exhausted = rows.peek().is_none();
        }

        let pending = stream.pending;
        let remaining = if exhausted {
            self.active.remove(&key);
            0
        } else {
            pending.max(1)
        };
        let positions = positions
            .into_iter()
            .map(|p| i32::try_from(p).unwrap_or(i32::MAX))
            .collect();
        Ok(Chunk {
            remaining,
            positions,
        })
    }

    /// Returns the destinations `row` goes to.
    fn targets(predicates: &[StreamPredicate], row: &[Value], destinations: usize) -> Vec<usize> {
        if predicates.is_empty() {
            return (0..destinations).collect();
        }
        let key = row.first().unwrap_or(&Value::Null);
        predicates
            .iter()
            .enumerate()
            .filter(|(_, p)| legacy_partition(key, p.modulus) == p.remainder)
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.active.clear();
    }
}
