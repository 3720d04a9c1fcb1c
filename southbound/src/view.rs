// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The query surface the exposure engine consumes.

use crate::row::{DatapathId, PortRow};
use std::collections::BTreeSet;

/// Read-only, snapshot-returning queries over the southbound state.
///
/// Every method answers from local state; none of them block on the
/// database. Implementations are the live [`crate::TableCache`] and the
/// hand-filled caches used in engine tests.
pub trait SouthboundView: Send + Sync {
    /// All VIF port rows currently bound to `chassis`.
    fn ports_on_chassis(&self, chassis: &str) -> Vec<PortRow>;

    /// Names of the chassis-redirect ports bound to `chassis`.
    fn cr_lrp_ports_on_chassis(&self, chassis: &str) -> Vec<String>;

    /// True iff the datapath owns a localnet port, i.e. is directly
    /// attached to a physical network.
    fn is_provider_network(&self, datapath: &DatapathId) -> bool;

    /// Floating IP bound to `logical_port` via a patch-port NAT entry,
    /// with the provider datapath it lives on.
    fn fip_associated(&self, logical_port: &str) -> Option<(String, DatapathId)>;

    /// Provider network name and VLAN tag of `datapath`, restricted to
    /// the names in `known_networks`.
    fn network_name_and_tag(
        &self,
        datapath: &DatapathId,
        known_networks: &BTreeSet<String>,
    ) -> (Option<String>, Option<u16>);

    /// VLAN tag of the named provider network, if tagged.
    fn network_vlan_tag_by_name(&self, network: &str) -> Option<u16>;

    /// Logical-router-port (patch) rows of the router datapath.
    fn lrp_ports_for_router(&self, router_datapath: &DatapathId) -> Vec<PortRow>;

    /// Addresses NAT-ed behind the named chassis-redirect port, with the
    /// patch-port row carrying them.
    fn cr_lrp_nat_addresses_info(&self, cr_lrp_port: &str) -> Option<(Vec<String>, PortRow)>;

    /// Datapath of the named port.
    fn port_datapath(&self, logical_port: &str) -> Option<DatapathId>;

    /// All port rows on the datapath.
    fn ports_on_datapath(&self, datapath: &DatapathId) -> Vec<PortRow>;

    /// Name of the chassis-redirect port of `datapath` when it is hosted
    /// on `chassis`.
    fn is_router_gateway_on_chassis(&self, datapath: &DatapathId, chassis: &str) -> Option<String>;

    /// True iff the named port is currently bound to `chassis`.
    fn is_port_on_chassis(&self, logical_port: &str, chassis: &str) -> bool;

    /// True iff the named port no longer exists.
    fn is_port_deleted(&self, logical_port: &str) -> bool;

    /// Name of the logical router port a tenant datapath attaches
    /// through (the `peer` of its router-facing patch port).
    fn lrp_port_for_datapath(&self, datapath: &DatapathId) -> Option<String>;
}

impl<T: SouthboundView + ?Sized> SouthboundView for std::sync::Arc<T> {
    fn ports_on_chassis(&self, chassis: &str) -> Vec<PortRow> {
        self.as_ref().ports_on_chassis(chassis)
    }

    fn cr_lrp_ports_on_chassis(&self, chassis: &str) -> Vec<String> {
        self.as_ref().cr_lrp_ports_on_chassis(chassis)
    }

    fn is_provider_network(&self, datapath: &DatapathId) -> bool {
        self.as_ref().is_provider_network(datapath)
    }

    fn fip_associated(&self, logical_port: &str) -> Option<(String, DatapathId)> {
        self.as_ref().fip_associated(logical_port)
    }

    fn network_name_and_tag(
        &self,
        datapath: &DatapathId,
        known_networks: &BTreeSet<String>,
    ) -> (Option<String>, Option<u16>) {
        self.as_ref().network_name_and_tag(datapath, known_networks)
    }

    fn network_vlan_tag_by_name(&self, network: &str) -> Option<u16> {
        self.as_ref().network_vlan_tag_by_name(network)
    }

    fn lrp_ports_for_router(&self, router_datapath: &DatapathId) -> Vec<PortRow> {
        self.as_ref().lrp_ports_for_router(router_datapath)
    }

    fn cr_lrp_nat_addresses_info(&self, cr_lrp_port: &str) -> Option<(Vec<String>, PortRow)> {
        self.as_ref().cr_lrp_nat_addresses_info(cr_lrp_port)
    }

    fn port_datapath(&self, logical_port: &str) -> Option<DatapathId> {
        self.as_ref().port_datapath(logical_port)
    }

    fn ports_on_datapath(&self, datapath: &DatapathId) -> Vec<PortRow> {
        self.as_ref().ports_on_datapath(datapath)
    }

    fn is_router_gateway_on_chassis(&self, datapath: &DatapathId, chassis: &str) -> Option<String> {
        self.as_ref().is_router_gateway_on_chassis(datapath, chassis)
    }

    fn is_port_on_chassis(&self, logical_port: &str, chassis: &str) -> bool {
        self.as_ref().is_port_on_chassis(logical_port, chassis)
    }

    fn is_port_deleted(&self, logical_port: &str) -> bool {
        self.as_ref().is_port_deleted(logical_port)
    }

    fn lrp_port_for_datapath(&self, datapath: &DatapathId) -> Option<String> {
        self.as_ref().lrp_port_for_datapath(datapath)
    }
}
