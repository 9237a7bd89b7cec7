//! Undo token bookkeeping.
//!
//! Every mutating call runs under an undo token chosen by the caller.
//! Tokens are issued in non-decreasing order and then resolved exactly
//! once, either by release (commit) or by undo (rollback):
//!
//! ```text
//!   issue(5) issue(6) issue(7)        outstanding {5, 6, 7}
//!   undo(6)                           outstanding {5}      resolved <= 7
//!   release(5)                        outstanding {}       resolved <= 7
//!   issue(6)                          misuse: already resolved
//! ```
//!
//! The ledger only validates. The engine holds the actual undo log, and
//! the bridge records a resolution once the engine accepted it.

use std::collections::BTreeSet;

use ee_common::types::UndoToken;
use tracing::trace;

use crate::error::{BridgeError, BridgeResult};

/// Tracks outstanding and resolved undo tokens for one engine handle.
#[derive(Debug, Clone, Default)]
pub struct UndoLedger {
    outstanding: BTreeSet<UndoToken>,
    resolved_through: Option<UndoToken>,
    releases: u64,
    undos: u64,
}

impl UndoLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` for an upcoming mutating call.
    ///
    /// [`UndoToken::NO_UNDO`] is accepted and not tracked. Issuing the
    /// newest outstanding token again is allowed.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` if the token was already resolved or is
    /// older than the newest outstanding token.
    pub fn issue(&mut self, token: UndoToken) -> BridgeResult<()> {
        if token == UndoToken::NO_UNDO {
            return Ok(());
        }
        if let Some(resolved) = self.resolved_through {
            if token <= resolved {
                return Err(BridgeError::undo_misuse(
                    token,
                    format!("tokens through {resolved} are already resolved"),
                ));
            }
        }
        if let Some(newest) = self.newest() {
            if token < newest {
                return Err(BridgeError::undo_misuse(
                    token,
                    format!("older than outstanding token {newest}"),
                ));
            }
        }
        if self.outstanding.insert(token) {
            trace!(%token, "Issued undo token");
        }
        Ok(())
    }

    /// Checks that `token` may be released.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` if the token is not outstanding or a newer
    /// token is still unresolved.
    pub fn check_release(&self, token: UndoToken) -> BridgeResult<()> {
        self.check_outstanding(token)?;
        if let Some(newer) = self.outstanding.range(token.next()..).next() {
            return Err(BridgeError::undo_misuse(
                token,
                format!("newer token {newer} is unresolved"),
            ));
        }
        Ok(())
    }

    /// Records a release accepted by the engine: every outstanding token up
    /// to `token` is committed.
    pub fn record_release(&mut self, token: UndoToken) {
        self.outstanding.retain(|t| *t > token);
        self.resolve_through(token);
        self.releases += 1;
        trace!(%token, "Released undo token");
    }

    /// Checks that `token` may be undone.
    ///
    /// # Errors
    ///
    /// Returns `UndoTokenMisuse` if the token is not outstanding.
    pub fn check_undo(&self, token: UndoToken) -> BridgeResult<()> {
        self.check_outstanding(token)
    }

    /// Records an undo accepted by the engine: `token` and every later
    /// token are rolled back and can never be used again.
    pub fn record_undo(&mut self, token: UndoToken) {
        let undone = self.outstanding.split_off(&token);
        if let Some(last) = undone.last() {
            self.resolve_through(*last);
        }
        self.undos += 1;
        trace!(%token, rolled_back = undone.len(), "Undid undo token");
    }

    fn check_outstanding(&self, token: UndoToken) -> BridgeResult<()> {
        if self.outstanding.contains(&token) {
            return Ok(());
        }
        let reason = match self.resolved_through {
            Some(resolved) if token <= resolved => "already resolved",
            _ => "never issued",
        };
        Err(BridgeError::undo_misuse(token, reason))
    }

    fn resolve_through(&mut self, token: UndoToken) {
        self.resolved_through = Some(self.resolved_through.map_or(token, |r| r.max(token)));
    }

    /// Returns true if `token` is issued and unresolved.
    #[must_use]
    pub fn is_outstanding(&self, token: UndoToken) -> bool {
        self.outstanding.contains(&token)
    }

    /// Returns the newest outstanding token.
    #[must_use]
    pub fn newest(&self) -> Option<UndoToken> {
        self.outstanding.last().copied()
    }

    /// Returns the highest token resolved so far.
    #[must_use]
    pub const fn resolved_through(&self) -> Option<UndoToken> {
        self.resolved_through
    }

    /// Returns the outstanding tokens in ascending order.
    pub fn outstanding(&self) -> impl Iterator<Item = UndoToken> + '_ {
        self.outstanding.iter().copied()
    }

    /// Returns the number of releases and undos recorded.
    #[must_use]
    pub const fn resolutions(&self) -> (u64, u64) {
        (self.releases, self.undos)
    }
}
