// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed, read-only view over the virtual-network southbound database.
//!
//! The southbound database describes logical switches (datapaths), the
//! ports bound to them, and the hypervisor chassis hosting those ports.
//! This crate mirrors the three tables the agent cares about into an
//! in-memory [`cache::TableCache`], answers every query the exposure
//! engine needs from that mirror, and turns raw row deltas into the
//! typed [`event::Event`]s of the exposure contract.

pub mod cache;
pub mod event;
pub mod monitor;
pub mod row;
pub mod view;

pub use cache::TableCache;
pub use event::{Event, classify_insert, classify_remove, classify_update};
pub use monitor::{CHASSIS_PRIVATE, Monitor, connect};
pub use row::{DatapathId, NatEntry, PortKind, PortRow};
pub use view::SouthboundView;

/// Errors surfaced by the southbound connection.
#[derive(Debug, thiserror::Error)]
pub enum SouthboundError {
    /// The database schema lacks a requested table (old control planes
    /// ship without `Chassis_Private`).
    #[error("southbound schema does not know table {0}")]
    SchemaMismatch(String),
    /// The remote url is not something we can dial.
    #[error("unsupported southbound url {0}")]
    BadRemote(String),
    /// Transport-level failure; the caller reconnects and resyncs.
    #[error("southbound connection error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent something that is not valid JSON-RPC.
    #[error("southbound protocol error: {0}")]
    Protocol(String),
}
