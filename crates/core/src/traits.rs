//! Collaborator seams
//!
//! The slot engine never enforces retention itself. It reads the local
//! server role from a [`ServerState`] and pushes its aggregate watermarks to
//! a [`RetentionSink`]; the WAL and transaction subsystems sit behind those.

use crate::types::{Lsn, ServerMode, SlotName, TransactionId};

/// Read-only view of the surrounding server
pub trait ServerState: Send + Sync {
    /// Current replication role
    fn server_mode(&self) -> ServerMode;

    /// Whether WAL replay is still in progress
    fn recovery_in_progress(&self) -> bool;

    /// Whether the server has finished starting up
    fn is_running(&self) -> bool;

    /// Make the drop of a logical slot part of the durable history
    ///
    /// Called after a logical slot has been dropped on a running primary.
    fn log_slot_drop(&self, _name: &SlotName) {}
}

/// Receiver of the aggregate watermarks
pub trait RetentionSink: Send + Sync {
    /// Oldest data and catalog horizons any slot still needs
    ///
    /// `already_locked` tells the transaction subsystem that the caller
    /// already holds its horizon lock.
    fn set_required_xmin(
        &self,
        xmin: TransactionId,
        catalog_xmin: TransactionId,
        already_locked: bool,
    );

    /// Oldest and newest restart positions any slot still needs
    fn set_required_lsn(&self, min_required: Lsn, max_required: Lsn);
}
