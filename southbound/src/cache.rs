// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory mirror of the monitored southbound tables.
//!
//! The monitor task applies row deltas; the exposure engine reads
//! through [`SouthboundView`]. Critical sections never await, so a plain
//! `RwLock` is enough.

use crate::row::{DatapathId, NatEntry, PortKind, PortRow};
use crate::view::SouthboundView;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    /// Port binding rows by row uuid.
    ports: HashMap<String, PortRow>,
    /// Chassis name by row uuid, for resolving port binding refs.
    chassis: HashMap<String, String>,
}

/// Live cache of the monitored southbound tables.
#[derive(Debug, Default)]
pub struct TableCache {
    inner: RwLock<Tables>,
}

impl TableCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> TableCache {
        TableCache::default()
    }

    /// Insert or replace a port row, returning the previous snapshot.
    pub fn upsert_port(&self, row: PortRow) -> Option<PortRow> {
        let mut tables = self.write();
        tables.ports.insert(row.uuid.clone(), row)
    }

    /// Drop a port row, returning the removed snapshot.
    pub fn remove_port(&self, uuid: &str) -> Option<PortRow> {
        self.write().ports.remove(uuid)
    }

    /// Current snapshot of a port row.
    #[must_use]
    pub fn port(&self, uuid: &str) -> Option<PortRow> {
        self.read().ports.get(uuid).cloned()
    }

    /// Record a chassis row.
    pub fn upsert_chassis(&self, uuid: &str, name: &str) {
        self.write()
            .chassis
            .insert(uuid.to_string(), name.to_string());
    }

    /// Drop a chassis row.
    pub fn remove_chassis(&self, uuid: &str) {
        self.write().chassis.remove(uuid);
    }

    /// Resolve a chassis row uuid to its name.
    #[must_use]
    pub fn chassis_name(&self, uuid: &str) -> Option<String> {
        self.read().chassis.get(uuid).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.inner.read().expect("southbound cache lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.inner.write().expect("southbound cache lock poisoned")
    }

    fn localnet_on(&self, datapath: &DatapathId) -> Option<PortRow> {
        self.read()
            .ports
            .values()
            .find(|p| p.kind == PortKind::Localnet && &p.datapath == datapath)
            .cloned()
    }
}

impl SouthboundView for TableCache {
    fn ports_on_chassis(&self, chassis: &str) -> Vec<PortRow> {
        self.read()
            .ports
            .values()
            .filter(|p| p.kind.is_vif() && p.chassis.as_deref() == Some(chassis))
            .cloned()
            .collect()
    }

    fn cr_lrp_ports_on_chassis(&self, chassis: &str) -> Vec<String> {
        self.read()
            .ports
            .values()
            .filter(|p| {
                p.kind == PortKind::ChassisRedirect && p.chassis.as_deref() == Some(chassis)
            })
            .map(|p| p.logical_port.clone())
            .collect()
    }

    fn is_provider_network(&self, datapath: &DatapathId) -> bool {
        self.localnet_on(datapath).is_some()
    }

    fn fip_associated(&self, logical_port: &str) -> Option<(String, DatapathId)> {
        let tables = self.read();
        for port in tables.ports.values() {
            if port.kind != PortKind::Patch {
                continue;
            }
            for entry in &port.nat_addresses {
                let Some(nat) = NatEntry::parse(entry) else {
                    continue;
                };
                if nat.resident_port.as_deref() == Some(logical_port) {
                    let fip = nat.ips.first()?.clone();
                    return Some((fip, port.datapath.clone()));
                }
            }
        }
        None
    }

    fn network_name_and_tag(
        &self,
        datapath: &DatapathId,
        known_networks: &BTreeSet<String>,
    ) -> (Option<String>, Option<u16>) {
        let Some(localnet) = self.localnet_on(datapath) else {
            return (None, None);
        };
        let Some(name) = localnet.options.get("network_name") else {
            return (None, None);
        };
        if !known_networks.contains(name) {
            return (None, None);
        }
        (Some(name.clone()), localnet.tag)
    }

    fn network_vlan_tag_by_name(&self, network: &str) -> Option<u16> {
        self.read()
            .ports
            .values()
            .find(|p| {
                p.kind == PortKind::Localnet
                    && p.options.get("network_name").map(String::as_str) == Some(network)
            })
            .and_then(|p| p.tag)
    }

    fn lrp_ports_for_router(&self, router_datapath: &DatapathId) -> Vec<PortRow> {
        self.read()
            .ports
            .values()
            .filter(|p| p.kind == PortKind::Patch && &p.datapath == router_datapath)
            .cloned()
            .collect()
    }

    fn cr_lrp_nat_addresses_info(&self, cr_lrp_port: &str) -> Option<(Vec<String>, PortRow)> {
        let tables = self.read();
        for port in tables.ports.values() {
            if port.kind != PortKind::Patch {
                continue;
            }
            let ips: Vec<String> = port
                .nat_addresses
                .iter()
                .filter_map(|entry| NatEntry::parse(entry))
                .filter(|nat| nat.resident_port.as_deref() == Some(cr_lrp_port))
                .flat_map(|nat| nat.ips)
                .collect();
            if !ips.is_empty() {
                return Some((ips, port.clone()));
            }
        }
        None
    }

    fn port_datapath(&self, logical_port: &str) -> Option<DatapathId> {
        self.read()
            .ports
            .values()
            .find(|p| p.logical_port == logical_port)
            .map(|p| p.datapath.clone())
    }

    fn ports_on_datapath(&self, datapath: &DatapathId) -> Vec<PortRow> {
        self.read()
            .ports
            .values()
            .filter(|p| &p.datapath == datapath)
            .cloned()
            .collect()
    }

    fn is_router_gateway_on_chassis(&self, datapath: &DatapathId, chassis: &str) -> Option<String> {
        self.read()
            .ports
            .values()
            .find(|p| {
                p.kind == PortKind::ChassisRedirect
                    && &p.datapath == datapath
                    && p.chassis.as_deref() == Some(chassis)
            })
            .map(|p| p.logical_port.clone())
    }

    fn is_port_on_chassis(&self, logical_port: &str, chassis: &str) -> bool {
        self.read()
            .ports
            .values()
            .any(|p| p.logical_port == logical_port && p.chassis.as_deref() == Some(chassis))
    }

    fn is_port_deleted(&self, logical_port: &str) -> bool {
        !self
            .read()
            .ports
            .values()
            .any(|p| p.logical_port == logical_port)
    }

    fn lrp_port_for_datapath(&self, datapath: &DatapathId) -> Option<String> {
        self.read()
            .ports
            .values()
            .filter(|p| p.kind == PortKind::Patch && &p.datapath == datapath)
            .find_map(|p| p.peer().map(ToString::to_string))
    }
}
