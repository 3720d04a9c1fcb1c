// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed events derived from raw southbound row deltas.
//!
//! The monitor feeds row inserts, updates, and removals through the
//! classifiers below; the resulting events are what the exposure engine
//! consumes, one at a time, under its gate. Events carry immutable row
//! snapshots and never reference the cache.

use crate::row::{NatEntry, PortKind, PortRow};

/// One southbound occurrence the exposure engine reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A VIF or gateway port was bound to this chassis.
    PortBound {
        /// Raw addresses from the row's mac column.
        ips: Vec<String>,
        /// The bound row.
        row: PortRow,
    },
    /// A VIF or gateway port left this chassis.
    PortUnbound {
        /// Raw addresses from the row's mac column.
        ips: Vec<String>,
        /// The row as it was while bound here.
        row: PortRow,
    },
    /// A floating IP was associated through a patch port.
    FipSet {
        /// The NAT-ed addresses.
        ips: Vec<String>,
        /// The patch-port row carrying the NAT entry.
        row: PortRow,
        /// The logical port the addresses are resident on.
        associated_port: String,
    },
    /// A floating IP association was removed.
    FipUnset {
        /// The NAT-ed addresses.
        ips: Vec<String>,
        /// The patch-port row that carried the NAT entry.
        row: PortRow,
        /// The logical port the addresses were resident on.
        associated_port: String,
    },
    /// A chassis row appeared; the agent resyncs when it is its own.
    ChassisCreated {
        /// Name of the new chassis.
        chassis: String,
    },
    /// A subnet was attached to a router (tenant exposure only).
    SubnetAttached {
        /// The router interface address, with prefix.
        ip: String,
        /// The logical-router-port row.
        row: PortRow,
    },
    /// A subnet was detached from a router (tenant exposure only).
    SubnetDetached {
        /// The router interface address, with prefix.
        ip: String,
        /// The logical-router-port row.
        row: PortRow,
    },
    /// A workload port appeared somewhere (tenant exposure only).
    TenantPortCreated {
        /// Raw addresses from the row's mac column.
        ips: Vec<String>,
        /// The new row.
        row: PortRow,
    },
    /// A workload port disappeared (tenant exposure only).
    TenantPortDeleted {
        /// Raw addresses from the row's mac column.
        ips: Vec<String>,
        /// The removed row.
        row: PortRow,
    },
}

fn binds_here(row: &PortRow, chassis: &str) -> bool {
    row.chassis.as_deref() == Some(chassis)
        && matches!(
            row.kind,
            PortKind::Vm | PortKind::Virtual | PortKind::ChassisRedirect
        )
}

fn router_interface(row: &PortRow) -> bool {
    row.kind == PortKind::Patch && row.peer().is_some() && row.chassis.is_none()
}

/// Events for a newly inserted port row.
#[must_use]
pub fn classify_insert(row: &PortRow, chassis: &str, tenant_events: bool) -> Vec<Event> {
    let mut events = Vec::new();
    if let Some(ips) = row.port_ips() {
        if binds_here(row, chassis) {
            events.push(Event::PortBound {
                ips: ips.clone(),
                row: row.clone(),
            });
        }
        if tenant_events && row.kind.is_workload() {
            events.push(Event::TenantPortCreated {
                ips,
                row: row.clone(),
            });
        }
    }
    if tenant_events && router_interface(row) {
        if let Some(ip) = row.port_ips().and_then(|ips| ips.into_iter().next()) {
            events.push(Event::SubnetAttached {
                ip,
                row: row.clone(),
            });
        }
    }
    events
}

/// Events for a removed port row.
#[must_use]
pub fn classify_remove(row: &PortRow, chassis: &str, tenant_events: bool) -> Vec<Event> {
    let mut events = Vec::new();
    if let Some(ips) = row.port_ips() {
        if binds_here(row, chassis) {
            events.push(Event::PortUnbound {
                ips: ips.clone(),
                row: row.clone(),
            });
        }
        if tenant_events && row.kind.is_workload() {
            events.push(Event::TenantPortDeleted {
                ips,
                row: row.clone(),
            });
        }
    }
    if tenant_events && router_interface(row) {
        if let Some(ip) = row.port_ips().and_then(|ips| ips.into_iter().next()) {
            events.push(Event::SubnetDetached {
                ip,
                row: row.clone(),
            });
        }
    }
    events
}

/// Events for an updated port row.
///
/// Chassis transitions become bind/unbind; patch-port `nat_addresses`
/// deltas become FIP set/unset, one event per changed entry. Workload
/// rows are created unbound and bound in a later update, so tenant
/// create/delete track the chassis column rather than row lifetime.
#[must_use]
pub fn classify_update(
    old: &PortRow,
    new: &PortRow,
    chassis: &str,
    tenant_events: bool,
) -> Vec<Event> {
    let mut events = Vec::new();

    let was_here = binds_here(old, chassis);
    let is_here = binds_here(new, chassis);
    if !was_here && is_here {
        if let Some(ips) = new.port_ips() {
            events.push(Event::PortBound {
                ips,
                row: new.clone(),
            });
        }
    } else if was_here && !is_here {
        if let Some(ips) = old.port_ips() {
            events.push(Event::PortUnbound {
                ips,
                row: old.clone(),
            });
        }
    }

    if tenant_events && new.kind.is_workload() {
        if old.chassis.is_none() && new.chassis.is_some() {
            if let Some(ips) = new.port_ips() {
                events.push(Event::TenantPortCreated {
                    ips,
                    row: new.clone(),
                });
            }
        } else if old.chassis.is_some() && new.chassis.is_none() {
            if let Some(ips) = old.port_ips() {
                events.push(Event::TenantPortDeleted {
                    ips,
                    row: old.clone(),
                });
            }
        }
    }

    if new.kind == PortKind::Patch {
        for entry in &new.nat_addresses {
            if old.nat_addresses.contains(entry) {
                continue;
            }
            let Some(nat) = NatEntry::parse(entry) else {
                continue;
            };
            let Some(associated_port) = nat.resident_port else {
                continue;
            };
            events.push(Event::FipSet {
                ips: nat.ips,
                row: new.clone(),
                associated_port,
            });
        }
        for entry in &old.nat_addresses {
            if new.nat_addresses.contains(entry) {
                continue;
            }
            let Some(nat) = NatEntry::parse(entry) else {
                continue;
            };
            let Some(associated_port) = nat.resident_port else {
                continue;
            };
            events.push(Event::FipUnset {
                ips: nat.ips,
                row: old.clone(),
                associated_port,
            });
        }
    }

    events
}
