// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The trait seam between the exposure engine and the kernel.

use crate::HostError;
use net::{InterfaceName, Mac, RouteTableId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// A policy rule steering a destination into a bridge routing table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule destination address, exactly as programmed.
    pub dest: IpAddr,
    /// Destination prefix length.
    pub prefix: u8,
    /// Table the rule points at.
    pub table: RouteTableId,
}

impl PolicyRule {
    /// The `dest/prefix` key used for snapshot diffing.
    #[must_use]
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.dest, self.prefix)
    }
}

impl Display for PolicyRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "to {}/{} lookup {}", self.dest, self.prefix, self.table)
    }
}

/// A route inside a bridge routing table.
///
/// Host-width routes are emitted on-link through the bridge (or its VLAN
/// subdevice); subnet routes carry a `via` gateway of the same family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BridgeRoute {
    /// Destination address.
    pub dest: IpAddr,
    /// Destination prefix length.
    pub prefix: u8,
    /// Table the route lives in.
    pub table: RouteTableId,
    /// The bridge owning the table.
    pub bridge: InterfaceName,
    /// VLAN tag when the provider network is tagged; the route then goes
    /// through `<bridge>.<vlan>`.
    pub vlan: Option<u16>,
    /// Gateway for subnet routes.
    pub via: Option<IpAddr>,
}

impl BridgeRoute {
    /// Kernel device the route goes through.
    #[must_use]
    pub fn device(&self) -> String {
        match self.vlan {
            Some(vlan) => format!("{}.{vlan}", self.bridge),
            None => self.bridge.to_string(),
        }
    }
}

impl Display for BridgeRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.dest, self.prefix)?;
        if let Some(via) = self.via {
            write!(f, " via {via}")?;
        }
        write!(f, " dev {} table {}", self.device(), self.table)
    }
}

/// Kernel mutations the exposure engine performs.
///
/// Implemented by [`crate::HostNetwork`] for the real kernel and by
/// recording fakes in engine tests. Every operation must succeed when
/// the target state already holds.
#[async_trait::async_trait]
pub trait HostSurface: Send + Sync {
    /// Create the VRF device with its table if missing, and bring it up.
    async fn ensure_vrf(&self, name: &InterfaceName, table: RouteTableId) -> Result<(), HostError>;

    /// Create the dummy device if missing, enslave it to the VRF, bring
    /// it up.
    async fn ensure_dummy_in_vrf(
        &self,
        name: &InterfaceName,
        vrf: &InterfaceName,
    ) -> Result<(), HostError>;

    /// Enable proxy-ARP/NDP on the bridge and anchor its stable
    /// per-bridge address (`169.254.0.<index+1>`).
    async fn ensure_arp_ndp_enabled(
        &self,
        bridge: &InterfaceName,
        index: u32,
    ) -> Result<(), HostError>;

    /// Create `<bridge>.<vlan>` if missing and bring it up.
    async fn ensure_vlan_device(&self, bridge: &InterfaceName, vlan: u16) -> Result<(), HostError>;

    /// Routing table id assigned to the bridge, allocating and
    /// persisting a fresh one on first sight.
    async fn ensure_routing_table(&self, bridge: &InterfaceName) -> Result<RouteTableId, HostError>;

    /// Assign addresses (host width) to the device.
    async fn add_addresses(&self, dev: &InterfaceName, ips: &[IpAddr]) -> Result<(), HostError>;

    /// Remove addresses from the device.
    async fn remove_addresses(&self, dev: &InterfaceName, ips: &[IpAddr]) -> Result<(), HostError>;

    /// Add a policy rule; with `lladdr` also pin the destination to the
    /// router's MAC with a permanent neighbour entry on the bridge.
    async fn add_rule(
        &self,
        rule: &PolicyRule,
        bridge: &InterfaceName,
        lladdr: Option<Mac>,
    ) -> Result<(), HostError>;

    /// Remove a policy rule and, with `lladdr`, its neighbour entry.
    async fn remove_rule(
        &self,
        rule: &PolicyRule,
        bridge: &InterfaceName,
        lladdr: Option<Mac>,
    ) -> Result<(), HostError>;

    /// Program a route in a bridge table.
    async fn add_route(&self, route: &BridgeRoute) -> Result<(), HostError>;

    /// Remove a route from a bridge table.
    async fn remove_route(&self, route: &BridgeRoute) -> Result<(), HostError>;

    /// Add an NDP proxy entry for the address on the bridge (or its VLAN
    /// subdevice).
    async fn add_ndp_proxy(
        &self,
        ip: IpAddr,
        bridge: &InterfaceName,
        vlan: Option<u16>,
    ) -> Result<(), HostError>;

    /// Remove an NDP proxy entry.
    async fn remove_ndp_proxy(
        &self,
        ip: IpAddr,
        bridge: &InterfaceName,
        vlan: Option<u16>,
    ) -> Result<(), HostError>;

    /// Addresses currently assigned to the device.
    async fn exposed_addresses(&self, dev: &InterfaceName) -> Result<BTreeSet<IpAddr>, HostError>;

    /// Addresses on the device falling inside `net`.
    async fn exposed_addresses_in_net(
        &self,
        dev: &InterfaceName,
        net: ipnet::IpNet,
    ) -> Result<Vec<IpAddr>, HostError>;

    /// Policy rules pointing at any of the given tables, keyed by
    /// destination CIDR.
    async fn rules_for_tables(
        &self,
        tables: &BTreeSet<RouteTableId>,
    ) -> Result<BTreeMap<String, PolicyRule>, HostError>;

    /// Remove the given addresses from the device.
    async fn remove_stale_addresses(
        &self,
        dev: &InterfaceName,
        stale: &BTreeSet<IpAddr>,
    ) -> Result<(), HostError>;

    /// Remove the given policy rules.
    async fn remove_stale_rules(
        &self,
        stale: &BTreeMap<String, PolicyRule>,
    ) -> Result<(), HostError>;

    /// Remove every route in the bridges' tables that is not in `keep`.
    async fn remove_stale_routes(
        &self,
        tables: &BTreeMap<InterfaceName, RouteTableId>,
        keep: &BTreeMap<InterfaceName, BTreeSet<BridgeRoute>>,
    ) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_route_device_names() {
        let route = BridgeRoute {
            dest: "10.0.0.5".parse().unwrap(),
            prefix: 32,
            table: 200.into(),
            bridge: InterfaceName::try_from("br-ex").unwrap(),
            vlan: None,
            via: None,
        };
        assert_eq!(route.device(), "br-ex");
        assert_eq!(route.to_string(), "10.0.0.5/32 dev br-ex table 200");

        let tagged = BridgeRoute {
            vlan: Some(100),
            via: Some("2001:db8::1".parse().unwrap()),
            ..route
        };
        assert_eq!(tagged.device(), "br-ex.100");
        assert_eq!(
            tagged.to_string(),
            "10.0.0.5/32 via 2001:db8::1 dev br-ex.100 table 200"
        );
    }

    #[test]
    fn rule_cidr_key() {
        let rule = PolicyRule {
            dest: "2001:db8::1".parse().unwrap(),
            prefix: 128,
            table: 200.into(),
        };
        assert_eq!(rule.cidr(), "2001:db8::1/128");
    }
}
