// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bridge topology cache: everything the engine remembers between
//! events.
//!
//! All of this is rebuilt by `sync`; none of it is persisted. Bridge
//! mappings and table assignments survive `begin_sync` on purpose:
//! table ids must stay stable for the lifetime of the agent, and the
//! mapping only changes on operator reconfiguration, which the next
//! sync picks up anyway.

use hostnet::BridgeRoute;
use net::{InterfaceName, RouteTableId};
use southbound::DatapathId;
use std::collections::{BTreeMap, BTreeSet};

/// A locally-hosted router gateway port being exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrLrp {
    /// Datapath of the router the gateway belongs to.
    pub router_datapath: DatapathId,
    /// Provider datapath the gateway answers on.
    pub provider_datapath: DatapathId,
    /// Gateway addresses, with their prefixes.
    pub ips: Vec<String>,
}

/// In-memory bookkeeping owned by the engine, guarded by its gate.
#[derive(Debug, Default)]
pub struct Topology {
    /// Provider network name → bridge.
    pub bridge_mappings: BTreeMap<String, InterfaceName>,
    /// Bridge → kernel routing table.
    pub routing_tables: BTreeMap<InterfaceName, RouteTableId>,
    /// Routes this agent programmed, per bridge. The `keep` set for
    /// stale-route deletion.
    pub table_routes: BTreeMap<InterfaceName, BTreeSet<BridgeRoute>>,
    /// Exposed chassis-redirect ports by logical port name.
    pub local_cr_lrps: BTreeMap<String, CrLrp>,
    /// Router interface ports whose tenant subnet is exposed here.
    pub local_lrps: BTreeSet<String>,
}

impl Topology {
    /// Reset the per-sync bookkeeping. Bridge mappings and table
    /// assignments persist.
    pub fn begin_sync(&mut self) {
        self.table_routes.clear();
        self.local_cr_lrps.clear();
        self.local_lrps.clear();
    }

    /// Network names currently mapped to bridges.
    #[must_use]
    pub fn known_networks(&self) -> BTreeSet<String> {
        self.bridge_mappings.keys().cloned().collect()
    }

    /// Remember a route we programmed.
    pub fn record_route(&mut self, route: BridgeRoute) {
        self.table_routes
            .entry(route.bridge.clone())
            .or_default()
            .insert(route);
    }

    /// Forget a route we removed.
    pub fn forget_route(&mut self, route: &BridgeRoute) {
        if let Some(routes) = self.table_routes.get_mut(&route.bridge) {
            routes.remove(route);
        }
    }

    /// Exposed gateways sharing a provider datapath.
    #[must_use]
    pub fn cr_lrps_on_provider(&self, provider_datapath: &DatapathId) -> usize {
        self.local_cr_lrps
            .values()
            .filter(|info| &info.provider_datapath == provider_datapath)
            .count()
    }
}
