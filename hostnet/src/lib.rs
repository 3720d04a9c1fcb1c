// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Host network surface: the kernel mutations behind route exposure.
//!
//! Everything here is idempotent. Creating something that exists,
//! removing something that is gone, and re-assigning an address that is
//! already present are all successes; the exposure engine leans on that
//! to stay convergent under replayed events.

pub mod netlink;
pub mod rt_tables;
pub mod surface;
mod sysfs;

pub use netlink::HostNetwork;
pub use surface::{BridgeRoute, HostSurface, PolicyRule};

use net::InterfaceName;

/// Errors surfaced by host network mutations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A port row carried an address we cannot parse. The engine logs
    /// and abandons the operation for that address only.
    #[error(transparent)]
    InvalidPortIp(#[from] net::InvalidPortIp),
    /// A device we need does not exist (yet).
    #[error("no such link {0}")]
    NoSuchLink(InterfaceName),
    /// A derived device name (bridge plus VLAN tag) is not a legal
    /// link name.
    #[error(transparent)]
    BadName(#[from] net::InvalidInterfaceName),
    /// Kernel refused a mutation for a non-benign reason.
    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),
    /// Reading or toggling a sysctl knob failed.
    #[error("sysctl {name}: {reason}")]
    Sysctl {
        /// The knob.
        name: String,
        /// What went wrong.
        reason: String,
    },
    /// The rt_tables file could not be read or rewritten.
    #[error("rt_tables: {0}")]
    RtTables(String),
    /// Every allocatable routing-table id is taken.
    #[error("no free routing table id above {0}")]
    TableSpaceExhausted(u32),
    /// Opening the netlink socket failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
