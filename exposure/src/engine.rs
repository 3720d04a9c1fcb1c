// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The exposure engine.
//!
//! Public entry points all take the same gate (one mutex over
//! [`Topology`]) before touching anything, so every kernel mutation and
//! every bookkeeping update is totally ordered. Handlers never return
//! errors: a failed step is logged and left for the next `sync`, which
//! recomputes desired state from the southbound view and reconciles the
//! kernel against it.

use crate::classify::{PortClass, classify};
use crate::topology::{CrLrp, Topology};
use crate::{BGP_VRF_TABLE, bgp_device, bgp_vrf};
use hostnet::{BridgeRoute, HostError, HostSurface, PolicyRule};
use net::{InterfaceName, Mac, PortIp, RouteTableId};
use southbound::{DatapathId, Event, PortRow, SouthboundView};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};
use vswitch::{SwitchError, SwitchSurface};

/// Engine configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The chassis name this agent serves.
    pub chassis: String,
    /// Expose tenant subnets and tenant VM addresses through locally
    /// hosted routers.
    pub expose_tenant_networks: bool,
}

#[derive(Debug, thiserror::Error)]
enum SyncError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Switch(#[from] SwitchError),
}

/// Live kernel state snapshotted at the start of a sync. Everything an
/// expose step accounts for is removed; the remainder is stale.
struct Snapshots {
    addrs: BTreeSet<IpAddr>,
    rules: BTreeMap<String, PolicyRule>,
}

impl Snapshots {
    fn mark_host(&mut self, addr: IpAddr) {
        self.addrs.remove(&addr);
        let prefix = if addr.is_ipv4() { 32 } else { 128 };
        self.rules.remove(&format!("{addr}/{prefix}"));
    }

    fn mark_cidr(&mut self, cidr: &str) {
        self.rules.remove(cidr);
    }
}

/// The route-exposure engine.
pub struct Engine<H, S, V> {
    config: EngineConfig,
    host: H,
    southbound: S,
    switch: V,
    vrf: InterfaceName,
    device: InterfaceName,
    /// The serialization gate: every public entry point locks this
    /// before reading or mutating anything.
    state: Mutex<Topology>,
    ready: watch::Receiver<bool>,
}

impl<H, S, V> Engine<H, S, V>
where
    H: HostSurface,
    S: SouthboundView,
    V: SwitchSurface,
{
    /// Build an engine. Event handlers block on `ready` until startup
    /// flips it to true.
    pub fn new(
        config: EngineConfig,
        host: H,
        southbound: S,
        switch: V,
        ready: watch::Receiver<bool>,
    ) -> Engine<H, S, V> {
        Engine {
            config,
            host,
            southbound,
            switch,
            vrf: bgp_vrf(),
            device: bgp_device(),
            state: Mutex::new(Topology::default()),
            ready,
        }
    }

    async fn wait_ready(&self) {
        let mut ready = self.ready.clone();
        while !*ready.borrow() {
            if ready.changed().await.is_err() {
                // Startup task is gone; proceeding beats deadlocking.
                warn!("readiness channel closed before startup completed");
                return;
            }
        }
    }

    /// Names of the gateway ports currently exposed here. Introspection
    /// for status output and tests; not part of the reconcile path.
    pub async fn local_gateways(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.local_cr_lrps.keys().cloned().collect()
    }

    /// Dispatch one southbound event.
    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::PortBound { ips, row } => self.expose_ip(ips, row, None).await,
            Event::PortUnbound { ips, row } => self.withdraw_ip(ips, row, None).await,
            Event::FipSet {
                ips,
                row,
                associated_port,
            } => self.expose_ip(ips, row, Some(associated_port)).await,
            Event::FipUnset {
                ips,
                row,
                associated_port,
            } => self.withdraw_ip(ips, row, Some(associated_port)).await,
            Event::ChassisCreated { chassis } => {
                if chassis == self.config.chassis {
                    debug!("own chassis registered; forcing a full sync");
                    self.sync().await;
                }
            }
            Event::SubnetAttached { ip, row } => self.expose_subnet(ip, row).await,
            Event::SubnetDetached { ip, row } => self.withdraw_subnet(ip, row).await,
            Event::TenantPortCreated { ips, row } => self.expose_remote_ip(ips, row).await,
            Event::TenantPortDeleted { ips, row } => self.withdraw_remote_ip(ips, row).await,
        }
    }

    /// Advertise addresses for a bound port by assigning them to the
    /// exposure device and steering return traffic at the kernel.
    pub async fn expose_ip(&self, ips: Vec<String>, row: PortRow, associated_port: Option<String>) {
        self.wait_ready().await;
        let mut state = self.state.lock().await;
        self.expose_ips(&mut state, &ips, &row, associated_port.as_deref())
            .await;
    }

    /// Withdraw previously advertised addresses.
    pub async fn withdraw_ip(
        &self,
        ips: Vec<String>,
        row: PortRow,
        associated_port: Option<String>,
    ) {
        self.wait_ready().await;
        let mut state = self.state.lock().await;
        self.withdraw_ips(&mut state, &ips, &row, associated_port.as_deref())
            .await;
    }

    /// Advertise a tenant VM address that appeared on another chassis,
    /// when its subnet's router is hosted here.
    pub async fn expose_remote_ip(&self, ips: Vec<String>, row: PortRow) {
        self.wait_ready().await;
        let state = self.state.lock().await;
        if self.southbound.is_provider_network(&row.datapath)
            || !self.config.expose_tenant_networks
        {
            return;
        }
        let Some(lrp) = self.southbound.lrp_port_for_datapath(&row.datapath) else {
            return;
        };
        if state.local_lrps.contains(&lrp) {
            info!(
                "Add BGP route for tenant IP {ips:?} on chassis {}",
                self.config.chassis
            );
            self.add_device_addresses(&ips).await;
        }
    }

    /// Withdraw a remote tenant VM address.
    pub async fn withdraw_remote_ip(&self, ips: Vec<String>, row: PortRow) {
        self.wait_ready().await;
        let state = self.state.lock().await;
        if self.southbound.is_provider_network(&row.datapath)
            || !self.config.expose_tenant_networks
        {
            return;
        }
        let Some(lrp) = self.southbound.lrp_port_for_datapath(&row.datapath) else {
            return;
        };
        if state.local_lrps.contains(&lrp) {
            info!(
                "Delete BGP route for tenant IP {ips:?} on chassis {}",
                self.config.chassis
            );
            self.remove_device_addresses(&ips).await;
        }
    }

    /// Expose a tenant subnet attached to a locally hosted router.
    pub async fn expose_subnet(&self, ip: String, row: PortRow) {
        self.wait_ready().await;
        let mut state = self.state.lock().await;
        if !self.config.expose_tenant_networks {
            return;
        }
        let Some(cr_lrp) = self
            .southbound
            .is_router_gateway_on_chassis(&row.datapath, &self.config.chassis)
        else {
            return;
        };
        info!(
            "Add IP rules for network {ip} on chassis {}",
            self.config.chassis
        );
        state.local_lrps.insert(row.logical_port.clone());
        let Some(gateway) = state.local_cr_lrps.get(&cr_lrp).cloned() else {
            return;
        };
        let Some((bridge, vlan, table)) =
            self.bridge_for_datapath(&state, &gateway.provider_datapath)
        else {
            return;
        };

        let subnet_ip: PortIp = match ip.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("Invalid IP to create a rule for the network router interface port: {err}");
                return;
            }
        };
        let rule = PolicyRule {
            dest: subnet_ip.addr,
            prefix: subnet_ip.prefix_or_host(),
            table,
        };
        if let Err(err) = self.host.add_rule(&rule, &bridge, None).await {
            warn!("failed to add rule {rule}: {err}");
        }

        if let Some(net) = subnet_of(&subnet_ip) {
            for cr_ip in family_matches(&gateway.ips, subnet_ip.addr) {
                let route = BridgeRoute {
                    dest: net.addr(),
                    prefix: net.prefix_len(),
                    table,
                    bridge: bridge.clone(),
                    vlan,
                    via: Some(cr_ip),
                };
                if let Err(err) = self.host.add_route(&route).await {
                    warn!("failed to add route {route}: {err}");
                }
                state.record_route(route);
                break;
            }
        }

        // Existing VMs on the subnet become advertisable right away.
        let Some(peer_dp) = row.peer().and_then(|p| self.southbound.port_datapath(p)) else {
            return;
        };
        for port in self.southbound.ports_on_datapath(&peer_dp) {
            if !port.kind.is_workload() {
                continue;
            }
            let Some(port_ips) = port.port_ips() else {
                continue;
            };
            for raw in port_ips {
                if let Ok(parsed) = raw.parse::<PortIp>() {
                    if parsed.same_family(subnet_ip.addr) {
                        self.add_device_addresses(&[raw]).await;
                    }
                }
            }
        }
    }

    /// Withdraw a tenant subnet, including every exposed VM address
    /// inside it.
    pub async fn withdraw_subnet(&self, ip: String, row: PortRow) {
        self.wait_ready().await;
        let mut state = self.state.lock().await;
        if !self.config.expose_tenant_networks {
            return;
        }
        let Some(cr_lrp) = self
            .southbound
            .is_router_gateway_on_chassis(&row.datapath, &self.config.chassis)
        else {
            return;
        };
        info!(
            "Delete IP rules for network {ip} on chassis {}",
            self.config.chassis
        );
        state.local_lrps.remove(&row.logical_port);
        let Some(gateway) = state.local_cr_lrps.get(&cr_lrp).cloned() else {
            return;
        };
        let Some((bridge, vlan, table)) =
            self.bridge_for_datapath(&state, &gateway.provider_datapath)
        else {
            return;
        };

        let subnet_ip: PortIp = match ip.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("Invalid IP to delete rules for the network router interface port: {err}");
                return;
            }
        };
        let rule = PolicyRule {
            dest: subnet_ip.addr,
            prefix: subnet_ip.prefix_or_host(),
            table,
        };
        if let Err(err) = self.host.remove_rule(&rule, &bridge, None).await {
            warn!("failed to remove rule {rule}: {err}");
        }

        if let Some(net) = subnet_of(&subnet_ip) {
            for cr_ip in family_matches(&gateway.ips, subnet_ip.addr) {
                let route = BridgeRoute {
                    dest: net.addr(),
                    prefix: net.prefix_len(),
                    table,
                    bridge: bridge.clone(),
                    vlan,
                    via: Some(cr_ip),
                };
                if let Err(err) = self.host.remove_route(&route).await {
                    warn!("failed to remove route {route}: {err}");
                }
                state.forget_route(&route);
                break;
            }
            match self.host.exposed_addresses_in_net(&self.device, net).await {
                Ok(vms) => self.host_remove_addrs(&vms).await,
                Err(err) => warn!("failed to enumerate addresses in {net}: {err}"),
            }
        }
    }

    /// The authoritative reconciler. Recomputes desired state from the
    /// southbound view, asserts it, and deletes whatever is left over
    /// on the kernel surfaces.
    pub async fn sync(&self) {
        self.wait_ready().await;
        let mut state = self.state.lock().await;
        if let Err(err) = self.run_sync(&mut state).await {
            warn!("sync failed, leaving convergence to the next run: {err}");
        }
    }

    async fn run_sync(&self, state: &mut Topology) -> Result<(), SyncError> {
        state.begin_sync();

        debug!("ensuring VRF configuration for advertising routes");
        self.host.ensure_vrf(&self.vrf, BGP_VRF_TABLE.into()).await?;
        self.host.ensure_dummy_in_vrf(&self.device, &self.vrf).await?;

        debug!("configuring provider bridges and their routing tables");
        let mappings = self.switch.bridge_mappings().await?;
        let mut synced_bridges: BTreeSet<InterfaceName> = BTreeSet::new();
        for (index, (network, bridge)) in mappings.into_iter().enumerate() {
            state
                .bridge_mappings
                .insert(network.clone(), bridge.clone());
            self.host
                .ensure_arp_ndp_enabled(&bridge, u32::try_from(index).unwrap_or(0))
                .await?;
            if !state.routing_tables.contains_key(&bridge) {
                let table = self.host.ensure_routing_table(&bridge).await?;
                state.routing_tables.insert(bridge.clone(), table);
            }
            if let Some(vlan) = self.southbound.network_vlan_tag_by_name(&network) {
                self.host.ensure_vlan_device(&bridge, vlan).await?;
            }
            if synced_bridges.insert(bridge.clone()) {
                self.switch.sync_flows(&bridge).await?;
            }
        }

        debug!("syncing current routes");
        let mut snapshots = Snapshots {
            addrs: self.host.exposed_addresses(&self.device).await?,
            rules: self
                .host
                .rules_for_tables(&state.routing_tables.values().copied().collect())
                .await?,
        };

        for port in self.southbound.ports_on_chassis(&self.config.chassis) {
            self.ensure_port_exposed(state, &mut snapshots, &port).await;
        }

        for cr_lrp in self.southbound.cr_lrp_ports_on_chassis(&self.config.chassis) {
            self.ensure_cr_lrp_ports_exposed(state, &mut snapshots, &cr_lrp)
                .await;
        }

        if self.config.expose_tenant_networks {
            for (_, gateway) in state.local_cr_lrps.clone() {
                for lrp in self
                    .southbound
                    .lrp_ports_for_router(&gateway.router_datapath)
                {
                    if lrp.chassis.is_some() {
                        continue;
                    }
                    self.ensure_network_exposed(state, &lrp, &gateway, Some(&mut snapshots))
                        .await;
                }
            }
        }

        // Whatever survived in the snapshots is stale.
        self.host
            .remove_stale_addresses(&self.device, &snapshots.addrs)
            .await?;
        self.host.remove_stale_rules(&snapshots.rules).await?;
        self.host
            .remove_stale_routes(&state.routing_tables, &state.table_routes)
            .await?;
        Ok(())
    }

    async fn ensure_port_exposed(
        &self,
        state: &mut Topology,
        snapshots: &mut Snapshots,
        port: &PortRow,
    ) {
        if !port.kind.is_vif() {
            return;
        }
        let Some(ips) = port.port_ips() else {
            return;
        };
        let fip = self.expose_ips(state, &ips, port, None).await;
        if let Some(fip) = fip {
            if let Ok(parsed) = fip.parse::<PortIp>() {
                snapshots.mark_host(parsed.addr);
            }
        }
        for ip in ips {
            if let Ok(parsed) = ip.parse::<PortIp>() {
                snapshots.mark_host(parsed.addr);
            }
        }
    }

    async fn ensure_cr_lrp_ports_exposed(
        &self,
        state: &mut Topology,
        snapshots: &mut Snapshots,
        cr_lrp: &str,
    ) {
        let Some((ips, patch_row)) = self.southbound.cr_lrp_nat_addresses_info(cr_lrp) else {
            return;
        };
        self.expose_ips(state, &ips, &patch_row, Some(cr_lrp)).await;
        for ip in ips {
            if let Ok(parsed) = ip.parse::<PortIp>() {
                snapshots.mark_host(parsed.addr);
            }
        }
    }

    /// Classify and expose. Returns the floating IP when the row turned
    /// out to be a tenant VM with one.
    async fn expose_ips(
        &self,
        state: &mut Topology,
        ips: &[String],
        row: &PortRow,
        associated_port: Option<&str>,
    ) -> Option<String> {
        match classify(row, &self.southbound) {
            PortClass::ProviderVm => {
                info!("Add BGP route for logical port with ip {ips:?}");
                self.add_device_addresses(ips).await;
                let (bridge, vlan, table) = self.bridge_for_datapath(state, &row.datapath)?;
                for ip in ips {
                    if let Err(err) = self
                        .expose_one(state, ip, &bridge, vlan, table, None)
                        .await
                    {
                        self.log_expose_error("the VM ip on the provider network", ip, &err);
                    }
                }
                None
            }
            PortClass::TenantVm => {
                let Some((fip, fip_datapath)) =
                    self.southbound.fip_associated(&row.logical_port)
                else {
                    // No FIP for the VM: make sure the baseline flows
                    // did not rot while we were not looking.
                    self.reassert_default_flows(state).await;
                    return None;
                };
                info!("Add BGP route for FIP with ip {fip}");
                self.add_device_addresses(std::slice::from_ref(&fip)).await;
                let (bridge, vlan, table) = self.bridge_for_datapath(state, &fip_datapath)?;
                if let Err(err) = self
                    .expose_one(state, &fip, &bridge, vlan, table, None)
                    .await
                {
                    self.log_expose_error("the VM floating IP", &fip, &err);
                    return None;
                }
                Some(fip)
            }
            PortClass::FipPatch => {
                let associated = associated_port?;
                if !self
                    .southbound
                    .is_port_on_chassis(associated, &self.config.chassis)
                {
                    return None;
                }
                info!("Add BGP route for FIP with ip {ips:?}");
                self.add_device_addresses(ips).await;
                let (bridge, vlan, table) = self.bridge_for_datapath(state, &row.datapath)?;
                for ip in ips {
                    if let Err(err) = self
                        .expose_one(state, ip, &bridge, vlan, table, None)
                        .await
                    {
                        self.log_expose_error("the floating IP associated to the VM", ip, &err);
                    }
                }
                None
            }
            PortClass::Gateway => {
                let (_, provider_datapath) =
                    self.southbound.fip_associated(&row.logical_port)?;
                info!("Add BGP route for CR-LRP port with ip {ips:?}");
                state.local_cr_lrps.insert(
                    row.logical_port.clone(),
                    CrLrp {
                        router_datapath: row.datapath.clone(),
                        provider_datapath: provider_datapath.clone(),
                        ips: ips.to_vec(),
                    },
                );
                self.add_device_addresses(ips).await;
                let (bridge, vlan, table) =
                    self.bridge_for_datapath(state, &provider_datapath)?;
                let lladdr = row.hwaddr();
                for ip in ips {
                    if let Err(err) = self
                        .expose_one(state, ip, &bridge, vlan, table, lladdr)
                        .await
                    {
                        self.log_expose_error("the router gateway port", ip, &err);
                        continue;
                    }
                    if let Ok(parsed) = ip.parse::<PortIp>() {
                        if parsed.addr.is_ipv6() {
                            if let Err(err) =
                                self.host.add_ndp_proxy(parsed.addr, &bridge, vlan).await
                            {
                                warn!("failed to add ndp proxy for {}: {err}", parsed.addr);
                            }
                        }
                    }
                }
                if self.config.expose_tenant_networks {
                    let gateway = state.local_cr_lrps.get(&row.logical_port)?.clone();
                    for lrp in self.southbound.lrp_ports_for_router(&row.datapath) {
                        if lrp.chassis.is_some() {
                            continue;
                        }
                        self.ensure_network_exposed(state, &lrp, &gateway, None).await;
                    }
                }
                None
            }
            PortClass::Other => None,
        }
    }

    async fn withdraw_ips(
        &self,
        state: &mut Topology,
        ips: &[String],
        row: &PortRow,
        associated_port: Option<&str>,
    ) {
        match classify(row, &self.southbound) {
            PortClass::ProviderVm => {
                info!("Delete BGP route for logical port with ip {ips:?}");
                self.remove_device_addresses(ips).await;
                let Some((bridge, vlan, table)) = self.bridge_for_datapath(state, &row.datapath)
                else {
                    return;
                };
                for ip in ips {
                    self.withdraw_one(state, ip, &bridge, vlan, table, None).await;
                }
            }
            PortClass::TenantVm => {
                let Some((fip, fip_datapath)) =
                    self.southbound.fip_associated(&row.logical_port)
                else {
                    return;
                };
                info!("Delete BGP route for FIP with ip {fip}");
                self.remove_device_addresses(std::slice::from_ref(&fip)).await;
                let Some((bridge, vlan, table)) = self.bridge_for_datapath(state, &fip_datapath)
                else {
                    return;
                };
                self.withdraw_one(state, &fip, &bridge, vlan, table, None).await;
            }
            PortClass::FipPatch => {
                let Some(associated) = associated_port else {
                    return;
                };
                if !(self
                    .southbound
                    .is_port_on_chassis(associated, &self.config.chassis)
                    || self.southbound.is_port_deleted(associated))
                {
                    return;
                }
                info!("Delete BGP route for FIP with ip {ips:?}");
                self.remove_device_addresses(ips).await;
                let Some((bridge, vlan, table)) = self.bridge_for_datapath(state, &row.datapath)
                else {
                    return;
                };
                for ip in ips {
                    self.withdraw_one(state, ip, &bridge, vlan, table, None).await;
                }
            }
            PortClass::Gateway => {
                self.withdraw_gateway(state, ips, row).await;
            }
            PortClass::Other => {}
        }
    }

    async fn withdraw_gateway(&self, state: &mut Topology, ips: &[String], row: &PortRow) {
        let Some(provider_datapath) = state
            .local_cr_lrps
            .get(&row.logical_port)
            .map(|info| info.provider_datapath.clone())
        else {
            return;
        };
        info!("Delete BGP route for CR-LRP port with ip {ips:?}");
        self.remove_device_addresses(ips).await;
        if let Some((bridge, vlan, table)) = self.bridge_for_datapath(state, &provider_datapath) {
            let lladdr = row.hwaddr();
            for ip in ips {
                self.withdraw_one(state, ip, &bridge, vlan, table, lladdr).await;
                let Ok(parsed) = ip.parse::<PortIp>() else {
                    continue;
                };
                if parsed.addr.is_ipv6() {
                    // The proxy is shared per provider datapath: remove
                    // it only while a sibling gateway still holds one.
                    if state.cr_lrps_on_provider(&provider_datapath) > 1 {
                        if let Err(err) =
                            self.host.remove_ndp_proxy(parsed.addr, &bridge, vlan).await
                        {
                            warn!("failed to remove ndp proxy for {}: {err}", parsed.addr);
                        }
                    }
                }
            }
        }

        for lrp in self.southbound.lrp_ports_for_router(&row.datapath) {
            if lrp.chassis.is_some() {
                continue;
            }
            if let Some(gateway) = state.local_cr_lrps.get(&row.logical_port).cloned() {
                self.remove_network_exposed(state, &lrp, &gateway).await;
            }
        }
        if state.local_cr_lrps.remove(&row.logical_port).is_none() {
            debug!(
                "gateway port {} already cleaned up from the agent",
                row.logical_port
            );
        }
    }

    /// Expose one tenant network behind a local gateway: a rule for the
    /// router interface address, a subnet route via the gateway IP of
    /// the matching family (first match wins on mixed-family gateways),
    /// and the addresses of workloads already on the subnet.
    async fn ensure_network_exposed(
        &self,
        state: &mut Topology,
        lrp: &PortRow,
        gateway: &CrLrp,
        mut snapshots: Option<&mut Snapshots>,
    ) {
        let Some(raw_ip) = lrp.port_ips().and_then(|ips| ips.into_iter().next()) else {
            return;
        };
        let Ok(router_port_ip) = raw_ip.parse::<PortIp>() else {
            error!(
                "Invalid IP to create a rule for the network router interface port: {raw_ip}"
            );
            return;
        };
        let gateway_addrs: Vec<IpAddr> = gateway
            .ips
            .iter()
            .filter_map(|ip| ip.parse::<PortIp>().ok())
            .map(|ip| ip.addr)
            .collect();
        if gateway_addrs.contains(&router_port_ip.addr) {
            // This is the gateway-side interface itself.
            return;
        }
        state.local_lrps.insert(lrp.logical_port.clone());
        let Some((bridge, vlan, table)) =
            self.bridge_for_datapath(state, &gateway.provider_datapath)
        else {
            return;
        };

        let rule = PolicyRule {
            dest: router_port_ip.addr,
            prefix: router_port_ip.prefix_or_host(),
            table,
        };
        if let Err(err) = self.host.add_rule(&rule, &bridge, None).await {
            warn!("failed to add rule {rule}: {err}");
            return;
        }
        if let Some(snapshots) = snapshots.as_deref_mut() {
            snapshots.mark_cidr(&rule.cidr());
        }

        if let Some(net) = subnet_of(&router_port_ip) {
            for gateway_ip in gateway_addrs
                .iter()
                .filter(|addr| addr.is_ipv4() == router_port_ip.addr.is_ipv4())
            {
                let route = BridgeRoute {
                    dest: net.addr(),
                    prefix: net.prefix_len(),
                    table,
                    bridge: bridge.clone(),
                    vlan,
                    via: Some(*gateway_ip),
                };
                if let Err(err) = self.host.add_route(&route).await {
                    warn!("failed to add route {route}: {err}");
                }
                state.record_route(route);
                break;
            }
        }

        let Some(peer_dp) = lrp.peer().and_then(|p| self.southbound.port_datapath(p)) else {
            return;
        };
        for port in self.southbound.ports_on_datapath(&peer_dp) {
            if !port.kind.is_workload() {
                continue;
            }
            if port.kind == southbound::PortKind::Vm && port.chassis.is_none() {
                continue;
            }
            let Some(port_ips) = port.port_ips() else {
                continue;
            };
            for raw in port_ips {
                let Ok(parsed) = raw.parse::<PortIp>() else {
                    continue;
                };
                if !parsed.same_family(router_port_ip.addr) {
                    continue;
                }
                self.add_device_addresses(&[raw]).await;
                if let Some(snapshots) = snapshots.as_deref_mut() {
                    snapshots.mark_host(parsed.addr);
                }
            }
        }
    }

    async fn remove_network_exposed(&self, state: &mut Topology, lrp: &PortRow, gateway: &CrLrp) {
        let Some(raw_ip) = lrp.port_ips().and_then(|ips| ips.into_iter().next()) else {
            return;
        };
        let Ok(router_port_ip) = raw_ip.parse::<PortIp>() else {
            return;
        };
        let gateway_addrs: Vec<IpAddr> = gateway
            .ips
            .iter()
            .filter_map(|ip| ip.parse::<PortIp>().ok())
            .map(|ip| ip.addr)
            .collect();
        if gateway_addrs.contains(&router_port_ip.addr) {
            return;
        }
        state.local_lrps.remove(&lrp.logical_port);
        let Some((bridge, vlan, table)) =
            self.bridge_for_datapath(state, &gateway.provider_datapath)
        else {
            return;
        };

        let rule = PolicyRule {
            dest: router_port_ip.addr,
            prefix: router_port_ip.prefix_or_host(),
            table,
        };
        if let Err(err) = self.host.remove_rule(&rule, &bridge, None).await {
            warn!("failed to remove rule {rule}: {err}");
        }

        let Some(net) = subnet_of(&router_port_ip) else {
            return;
        };
        for gateway_ip in gateway_addrs
            .iter()
            .filter(|addr| addr.is_ipv4() == router_port_ip.addr.is_ipv4())
        {
            let route = BridgeRoute {
                dest: net.addr(),
                prefix: net.prefix_len(),
                table,
                bridge: bridge.clone(),
                vlan,
                via: Some(*gateway_ip),
            };
            if let Err(err) = self.host.remove_route(&route).await {
                warn!("failed to remove route {route}: {err}");
            }
            state.forget_route(&route);
            break;
        }
        match self.host.exposed_addresses_in_net(&self.device, net).await {
            Ok(vms) => self.host_remove_addrs(&vms).await,
            Err(err) => warn!("failed to enumerate addresses in {net}: {err}"),
        }
    }

    async fn expose_one(
        &self,
        state: &mut Topology,
        raw: &str,
        bridge: &InterfaceName,
        vlan: Option<u16>,
        table: RouteTableId,
        lladdr: Option<Mac>,
    ) -> Result<(), HostError> {
        let ip: PortIp = raw.parse()?;
        let rule = PolicyRule {
            dest: ip.addr,
            prefix: ip.host_len(),
            table,
        };
        self.host.add_rule(&rule, bridge, lladdr).await?;
        let route = BridgeRoute {
            dest: ip.addr,
            prefix: ip.host_len(),
            table,
            bridge: bridge.clone(),
            vlan,
            via: None,
        };
        self.host.add_route(&route).await?;
        state.record_route(route);
        Ok(())
    }

    async fn withdraw_one(
        &self,
        state: &mut Topology,
        raw: &str,
        bridge: &InterfaceName,
        vlan: Option<u16>,
        table: RouteTableId,
        lladdr: Option<Mac>,
    ) {
        let Ok(ip) = raw.parse::<PortIp>() else {
            error!("skipping withdraw of invalid address {raw}");
            return;
        };
        let rule = PolicyRule {
            dest: ip.addr,
            prefix: ip.host_len(),
            table,
        };
        if let Err(err) = self.host.remove_rule(&rule, bridge, lladdr).await {
            warn!("failed to remove rule {rule}: {err}");
        }
        let route = BridgeRoute {
            dest: ip.addr,
            prefix: ip.host_len(),
            table,
            bridge: bridge.clone(),
            vlan,
            via: None,
        };
        if let Err(err) = self.host.remove_route(&route).await {
            warn!("failed to remove route {route}: {err}");
        }
        state.forget_route(&route);
    }

    fn bridge_for_datapath(
        &self,
        state: &Topology,
        datapath: &DatapathId,
    ) -> Option<(InterfaceName, Option<u16>, RouteTableId)> {
        let known = state.known_networks();
        let (network, tag) = self.southbound.network_name_and_tag(datapath, &known);
        let network = network?;
        let bridge = state.bridge_mappings.get(&network)?.clone();
        let Some(table) = state.routing_tables.get(&bridge).copied() else {
            debug!("no routing table assigned to {bridge} yet");
            return None;
        };
        Some((bridge, tag, table))
    }

    async fn reassert_default_flows(&self, state: &Topology) {
        let bridges: BTreeSet<&InterfaceName> = state.bridge_mappings.values().collect();
        for bridge in bridges {
            if let Err(err) = self.switch.ensure_default_flows(bridge).await {
                warn!("failed to assert baseline flows on {bridge}: {err}");
            }
        }
    }

    async fn add_device_addresses(&self, ips: &[String]) {
        let addrs = parse_addrs(ips);
        if addrs.is_empty() {
            return;
        }
        if let Err(err) = self.host.add_addresses(&self.device, &addrs).await {
            warn!("failed to add {addrs:?} to {}: {err}", self.device);
        }
    }

    async fn remove_device_addresses(&self, ips: &[String]) {
        let addrs = parse_addrs(ips);
        self.host_remove_addrs(&addrs).await;
    }

    async fn host_remove_addrs(&self, addrs: &[IpAddr]) {
        if addrs.is_empty() {
            return;
        }
        if let Err(err) = self.host.remove_addresses(&self.device, addrs).await {
            warn!("failed to remove {addrs:?} from {}: {err}", self.device);
        }
    }

    fn log_expose_error(&self, what: &str, ip: &str, err: &HostError) {
        match err {
            HostError::InvalidPortIp(_) => {
                error!("Invalid IP to create a rule for {what}: {ip}");
            }
            other => warn!("failed to expose {ip} ({what}): {other}"),
        }
    }
}

/// Parse raw addresses, dropping (and logging) malformed ones so the
/// rest of the batch still lands.
fn parse_addrs(ips: &[String]) -> Vec<IpAddr> {
    ips.iter()
        .filter_map(|raw| match raw.parse::<PortIp>() {
            Ok(parsed) => Some(parsed.addr),
            Err(err) => {
                error!("skipping invalid address: {err}");
                None
            }
        })
        .collect()
}

/// Addresses (stripped) among `raw` matching the family of `reference`.
fn family_matches(raw: &[String], reference: IpAddr) -> Vec<IpAddr> {
    raw.iter()
        .filter_map(|ip| ip.parse::<PortIp>().ok())
        .filter(|ip| ip.same_family(reference))
        .map(|ip| ip.addr)
        .collect()
}

fn subnet_of(ip: &PortIp) -> Option<ipnet::IpNet> {
    ipnet::IpNet::new(ip.addr, ip.prefix_or_host())
        .ok()
        .map(|net| net.trunc())
}
