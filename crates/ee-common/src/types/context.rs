//! Per-call transaction contexts.

use serde::{Deserialize, Serialize};

use super::ids::{ClusterId, UndoToken};

/// Transaction coordinates attached to every mutating engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnContext {
    /// Transaction id.
    pub txn_id: i64,
    /// Single-partition handle of the transaction.
    pub sp_handle: i64,
    /// Last single-partition handle known to be committed.
    pub last_committed_sp_handle: i64,
    /// Cluster-wide unique id of the transaction.
    pub unique_id: i64,
    /// Undo token bounding the call's mutations.
    pub undo_token: UndoToken,
}

impl TxnContext {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = 5 * 8;

    /// Creates a new context.
    #[must_use]
    pub const fn new(
        txn_id: i64,
        sp_handle: i64,
        last_committed_sp_handle: i64,
        unique_id: i64,
        undo_token: UndoToken,
    ) -> Self {
        Self {
            txn_id,
            sp_handle,
            last_committed_sp_handle,
            unique_id,
            undo_token,
        }
    }

    /// Returns a copy of this context bound to a different undo token.
    #[must_use]
    pub const fn with_undo_token(mut self, undo_token: UndoToken) -> Self {
        self.undo_token = undo_token;
        self
    }
}

/// Context under which a remote binary log segment is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationContext {
    /// Local transaction coordinates.
    pub txn: TxnContext,
    /// Cluster the segment originated from.
    pub remote_cluster_id: ClusterId,
}

impl ReplicationContext {
    /// Creates a new replication context.
    #[must_use]
    pub const fn new(txn: TxnContext, remote_cluster_id: ClusterId) -> Self {
        Self {
            txn,
            remote_cluster_id,
        }
    }

    /// Returns the undo token the segment is applied under.
    #[inline]
    #[must_use]
    pub const fn undo_token(&self) -> UndoToken {
        self.txn.undo_token
    }
}
