// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end engine scenarios against in-memory surfaces.
//!
//! The fake kernel records exactly what the real one would hold
//! (addresses, rules, routes, neighbours, proxies); the southbound view
//! is a hand-filled table cache; the switch surface records flow calls.

use exposure::{BGP_DEVICE, Engine, EngineConfig};
use hostnet::{BridgeRoute, HostError, HostSurface, PolicyRule};
use net::{InterfaceName, Mac, RouteTableId};
use southbound::{Event, PortKind, PortRow, TableCache};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone, PartialEq)]
struct FakeKernel {
    vrfs: BTreeSet<(String, u32)>,
    dummies: BTreeSet<String>,
    addrs: BTreeMap<String, BTreeSet<IpAddr>>,
    rules: BTreeMap<String, PolicyRule>,
    neighbours: BTreeMap<String, Mac>,
    routes: BTreeSet<BridgeRoute>,
    ndp_proxies: BTreeSet<String>,
    arp_ndp: BTreeSet<String>,
    vlan_devices: BTreeSet<String>,
    tables: BTreeMap<String, u32>,
}

#[derive(Default)]
struct FakeHost {
    kernel: Arc<Mutex<FakeKernel>>,
}

impl FakeHost {
    fn with_tables(assignments: &[(&str, u32)]) -> FakeHost {
        let host = FakeHost::default();
        {
            let mut kernel = host.kernel.lock().unwrap();
            for (bridge, table) in assignments {
                kernel.tables.insert((*bridge).to_string(), *table);
            }
        }
        host
    }

}

fn proxy_key(ip: IpAddr, bridge: &InterfaceName, vlan: Option<u16>) -> String {
    match vlan {
        Some(vlan) => format!("{bridge}.{vlan}/{ip}"),
        None => format!("{bridge}/{ip}"),
    }
}

#[async_trait::async_trait]
impl HostSurface for FakeHost {
    async fn ensure_vrf(&self, name: &InterfaceName, table: RouteTableId) -> Result<(), HostError> {
        self.kernel
            .lock()
            .unwrap()
            .vrfs
            .insert((name.to_string(), table.into()));
        Ok(())
    }

    async fn ensure_dummy_in_vrf(
        &self,
        name: &InterfaceName,
        _vrf: &InterfaceName,
    ) -> Result<(), HostError> {
        self.kernel.lock().unwrap().dummies.insert(name.to_string());
        Ok(())
    }

    async fn ensure_arp_ndp_enabled(
        &self,
        bridge: &InterfaceName,
        _index: u32,
    ) -> Result<(), HostError> {
        self.kernel
            .lock()
            .unwrap()
            .arp_ndp
            .insert(bridge.to_string());
        Ok(())
    }

    async fn ensure_vlan_device(&self, bridge: &InterfaceName, vlan: u16) -> Result<(), HostError> {
        self.kernel
            .lock()
            .unwrap()
            .vlan_devices
            .insert(format!("{bridge}.{vlan}"));
        Ok(())
    }

    async fn ensure_routing_table(
        &self,
        bridge: &InterfaceName,
    ) -> Result<RouteTableId, HostError> {
        let mut kernel = self.kernel.lock().unwrap();
        if let Some(table) = kernel.tables.get(bridge.as_ref()) {
            return Ok((*table).into());
        }
        let next = kernel.tables.values().max().copied().unwrap_or(199) + 1;
        kernel.tables.insert(bridge.to_string(), next);
        Ok(next.into())
    }

    async fn add_addresses(&self, dev: &InterfaceName, ips: &[IpAddr]) -> Result<(), HostError> {
        let mut kernel = self.kernel.lock().unwrap();
        let addrs = kernel.addrs.entry(dev.to_string()).or_default();
        addrs.extend(ips.iter().copied());
        Ok(())
    }

    async fn remove_addresses(&self, dev: &InterfaceName, ips: &[IpAddr]) -> Result<(), HostError> {
        let mut kernel = self.kernel.lock().unwrap();
        if let Some(addrs) = kernel.addrs.get_mut(dev.as_ref()) {
            for ip in ips {
                addrs.remove(ip);
            }
            if addrs.is_empty() {
                kernel.addrs.remove(dev.as_ref());
            }
        }
        Ok(())
    }

    async fn add_rule(
        &self,
        rule: &PolicyRule,
        bridge: &InterfaceName,
        lladdr: Option<Mac>,
    ) -> Result<(), HostError> {
        let mut kernel = self.kernel.lock().unwrap();
        kernel.rules.insert(rule.cidr(), rule.clone());
        if let Some(mac) = lladdr {
            kernel.neighbours.insert(format!("{bridge}/{}", rule.dest), mac);
        }
        Ok(())
    }

    async fn remove_rule(
        &self,
        rule: &PolicyRule,
        bridge: &InterfaceName,
        lladdr: Option<Mac>,
    ) -> Result<(), HostError> {
        let mut kernel = self.kernel.lock().unwrap();
        kernel.rules.remove(&rule.cidr());
        if lladdr.is_some() {
            kernel.neighbours.remove(&format!("{bridge}/{}", rule.dest));
        }
        Ok(())
    }

    async fn add_route(&self, route: &BridgeRoute) -> Result<(), HostError> {
        self.kernel.lock().unwrap().routes.insert(route.clone());
        Ok(())
    }

    async fn remove_route(&self, route: &BridgeRoute) -> Result<(), HostError> {
        self.kernel.lock().unwrap().routes.remove(route);
        Ok(())
    }

    async fn add_ndp_proxy(
        &self,
        ip: IpAddr,
        bridge: &InterfaceName,
        vlan: Option<u16>,
    ) -> Result<(), HostError> {
        self.kernel
            .lock()
            .unwrap()
            .ndp_proxies
            .insert(proxy_key(ip, bridge, vlan));
        Ok(())
    }

    async fn remove_ndp_proxy(
        &self,
        ip: IpAddr,
        bridge: &InterfaceName,
        vlan: Option<u16>,
    ) -> Result<(), HostError> {
        self.kernel
            .lock()
            .unwrap()
            .ndp_proxies
            .remove(&proxy_key(ip, bridge, vlan));
        Ok(())
    }

    async fn exposed_addresses(&self, dev: &InterfaceName) -> Result<BTreeSet<IpAddr>, HostError> {
        Ok(self
            .kernel
            .lock()
            .unwrap()
            .addrs
            .get(dev.as_ref())
            .cloned()
            .unwrap_or_default())
    }

    async fn exposed_addresses_in_net(
        &self,
        dev: &InterfaceName,
        net: ipnet::IpNet,
    ) -> Result<Vec<IpAddr>, HostError> {
        Ok(self
            .exposed_addresses(dev)
            .await?
            .into_iter()
            .filter(|addr| net.contains(addr))
            .collect())
    }

    async fn rules_for_tables(
        &self,
        tables: &BTreeSet<RouteTableId>,
    ) -> Result<BTreeMap<String, PolicyRule>, HostError> {
        Ok(self
            .kernel
            .lock()
            .unwrap()
            .rules
            .iter()
            .filter(|(_, rule)| tables.contains(&rule.table))
            .map(|(cidr, rule)| (cidr.clone(), rule.clone()))
            .collect())
    }

    async fn remove_stale_addresses(
        &self,
        dev: &InterfaceName,
        stale: &BTreeSet<IpAddr>,
    ) -> Result<(), HostError> {
        let ips: Vec<IpAddr> = stale.iter().copied().collect();
        self.remove_addresses(dev, &ips).await
    }

    async fn remove_stale_rules(
        &self,
        stale: &BTreeMap<String, PolicyRule>,
    ) -> Result<(), HostError> {
        let mut kernel = self.kernel.lock().unwrap();
        for cidr in stale.keys() {
            kernel.rules.remove(cidr);
        }
        Ok(())
    }

    async fn remove_stale_routes(
        &self,
        tables: &BTreeMap<InterfaceName, RouteTableId>,
        keep: &BTreeMap<InterfaceName, BTreeSet<BridgeRoute>>,
    ) -> Result<(), HostError> {
        let table_ids: BTreeSet<RouteTableId> = tables.values().copied().collect();
        let kept: BTreeSet<BridgeRoute> = keep.values().flatten().cloned().collect();
        let mut kernel = self.kernel.lock().unwrap();
        kernel
            .routes
            .retain(|route| !table_ids.contains(&route.table) || kept.contains(route));
        Ok(())
    }
}

#[derive(Default)]
struct FakeSwitch {
    mappings: Vec<(String, InterfaceName)>,
    synced: Mutex<Vec<String>>,
    asserted: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl vswitch::SwitchSurface for FakeSwitch {
    async fn bridge_mappings(
        &self,
    ) -> Result<Vec<(String, InterfaceName)>, vswitch::SwitchError> {
        Ok(self.mappings.clone())
    }

    async fn ensure_default_flows(
        &self,
        bridge: &InterfaceName,
    ) -> Result<(), vswitch::SwitchError> {
        self.asserted.lock().unwrap().push(bridge.to_string());
        Ok(())
    }

    async fn sync_flows(&self, bridge: &InterfaceName) -> Result<(), vswitch::SwitchError> {
        self.synced.lock().unwrap().push(bridge.to_string());
        Ok(())
    }
}

const CHASSIS: &str = "host-a";

fn bridge(name: &str) -> InterfaceName {
    InterfaceName::try_from(name).unwrap()
}

fn localnet(uuid: &str, dp: &str, network: &str, tag: Option<u16>) -> PortRow {
    PortRow {
        uuid: uuid.to_string(),
        logical_port: format!("provnet-{network}"),
        kind: PortKind::Localnet,
        datapath: dp.to_string(),
        options: BTreeMap::from([("network_name".to_string(), network.to_string())]),
        tag,
        ..PortRow::default()
    }
}

fn vm(uuid: &str, name: &str, dp: &str, mac: &str, chassis: Option<&str>) -> PortRow {
    PortRow {
        uuid: uuid.to_string(),
        logical_port: name.to_string(),
        kind: PortKind::Vm,
        datapath: dp.to_string(),
        chassis: chassis.map(ToString::to_string),
        mac: vec![mac.to_string()],
        ..PortRow::default()
    }
}

fn gateway_row(name: &str, router_dp: &str, mac: &str) -> PortRow {
    PortRow {
        uuid: format!("uuid-{name}"),
        logical_port: name.to_string(),
        kind: PortKind::ChassisRedirect,
        datapath: router_dp.to_string(),
        chassis: Some(CHASSIS.to_string()),
        mac: vec![mac.to_string()],
        ..PortRow::default()
    }
}

fn gateway_patch(uuid: &str, provider_dp: &str, cr_lrp: &str, ips: &[&str]) -> PortRow {
    PortRow {
        uuid: uuid.to_string(),
        logical_port: format!("patch-{uuid}"),
        kind: PortKind::Patch,
        datapath: provider_dp.to_string(),
        nat_addresses: ips
            .iter()
            .map(|ip| format!("fa:16:3e:11:22:33 {ip} is_chassis_resident(\"{cr_lrp}\")"))
            .collect(),
        ..PortRow::default()
    }
}

struct Harness {
    engine: Engine<FakeHost, Arc<TableCache>, FakeSwitch>,
    kernel: Arc<Mutex<FakeKernel>>,
    cache: Arc<TableCache>,
    _ready: tokio::sync::watch::Sender<bool>,
}

impl Harness {
    fn seed_address(&self, dev: &str, addr: &str) {
        self.kernel
            .lock()
            .unwrap()
            .addrs
            .entry(dev.to_string())
            .or_default()
            .insert(addr.parse().unwrap());
    }

    fn seed_rule(&self, dest: &str, prefix: u8, table: u32) {
        let rule = PolicyRule {
            dest: dest.parse().unwrap(),
            prefix,
            table: table.into(),
        };
        self.kernel.lock().unwrap().rules.insert(rule.cidr(), rule);
    }

    fn seed_route(&self, route: BridgeRoute) {
        self.kernel.lock().unwrap().routes.insert(route);
    }
}

fn harness(tenant: bool, tables: &[(&str, u32)], mappings: &[(&str, &str)]) -> Harness {
    let host = FakeHost::with_tables(tables);
    let kernel = host.kernel.clone();
    let cache = Arc::new(TableCache::new());
    let switch = FakeSwitch {
        mappings: mappings
            .iter()
            .map(|(network, br)| ((*network).to_string(), bridge(br)))
            .collect(),
        ..FakeSwitch::default()
    };
    let (ready_tx, ready_rx) = tokio::sync::watch::channel(true);
    let engine = Engine::new(
        EngineConfig {
            chassis: CHASSIS.to_string(),
            expose_tenant_networks: tenant,
        },
        host,
        cache.clone(),
        switch,
        ready_rx,
    );
    Harness {
        engine,
        kernel,
        cache,
        _ready: ready_tx,
    }
}

fn kernel_of(h: &Harness) -> FakeKernel {
    h.kernel.lock().unwrap().clone()
}

fn device_addrs(kernel: &FakeKernel) -> BTreeSet<IpAddr> {
    kernel.addrs.get(BGP_DEVICE).cloned().unwrap_or_default()
}

#[tokio::test]
async fn provider_vm_bind_exposes_address_rule_and_route() {
    let h = harness(false, &[("br-ex", 200)], &[("public", "br-ex")]);
    h.cache.upsert_port(localnet("l1", "dp-pub", "public", None));
    h.engine.sync().await;

    let row = vm("v1", "vm1", "dp-pub", "fa:16:3e:aa:bb:cc 10.0.0.5", Some(CHASSIS));
    h.cache.upsert_port(row.clone());
    h.engine
        .handle_event(Event::PortBound {
            ips: vec!["10.0.0.5".to_string()],
            row,
        })
        .await;

    let kernel = kernel_of(&h);
    assert!(device_addrs(&kernel).contains(&"10.0.0.5".parse::<IpAddr>().unwrap()));
    let rule = kernel.rules.get("10.0.0.5/32").expect("rule missing");
    assert_eq!(u32::from(rule.table), 200);
    assert!(kernel.routes.contains(&BridgeRoute {
        dest: "10.0.0.5".parse().unwrap(),
        prefix: 32,
        table: 200.into(),
        bridge: bridge("br-ex"),
        vlan: None,
        via: None,
    }));
}

#[tokio::test]
async fn fip_set_exposes_floating_ip() {
    let h = harness(false, &[("br-ex", 200)], &[("public", "br-ex")]);
    h.cache.upsert_port(localnet("l1", "dp-pub", "public", None));
    h.cache.upsert_port(vm(
        "v1",
        "vm1",
        "dp-priv",
        "fa:16:3e:aa:bb:cc 192.168.0.5",
        Some(CHASSIS),
    ));
    h.engine.sync().await;

    let patch = PortRow {
        uuid: "p1".to_string(),
        logical_port: "patch-pub".to_string(),
        kind: PortKind::Patch,
        datapath: "dp-pub".to_string(),
        ..PortRow::default()
    };
    h.engine
        .handle_event(Event::FipSet {
            ips: vec!["192.0.2.10".to_string()],
            row: patch,
            associated_port: "vm1".to_string(),
        })
        .await;

    let kernel = kernel_of(&h);
    assert!(device_addrs(&kernel).contains(&"192.0.2.10".parse::<IpAddr>().unwrap()));
    assert!(kernel.rules.contains_key("192.0.2.10/32"));
    assert!(
        kernel
            .routes
            .iter()
            .any(|r| r.dest == "192.0.2.10".parse::<IpAddr>().unwrap() && r.prefix == 32)
    );
}

/// Shared setup for the gateway scenarios: a tagged provider network on
/// br-ex2 and one exposed v6 gateway.
async fn gateway_harness(tenant: bool) -> Harness {
    let h = harness(
        tenant,
        &[("br-ex", 200), ("br-ex2", 300)],
        &[("public", "br-ex"), ("public2", "br-ex2")],
    );
    h.cache.upsert_port(localnet("l1", "dp-pub", "public", None));
    h.cache
        .upsert_port(localnet("l2", "dp-pub2", "public2", Some(100)));
    h.cache
        .upsert_port(gateway_patch("gw1", "dp-pub2", "cr-lrp-1", &["2001:db8::1/64"]));
    h.engine.sync().await;

    let row = gateway_row("cr-lrp-1", "dp-router", "fa:16:3e:11:22:33 2001:db8::1/64");
    h.cache.upsert_port(row.clone());
    h.engine
        .handle_event(Event::PortBound {
            ips: vec!["2001:db8::1/64".to_string()],
            row,
        })
        .await;
    h
}

#[tokio::test]
async fn gateway_with_ipv6_address_gets_lladdr_rule_vlan_route_and_proxy() {
    let h = gateway_harness(false).await;
    let kernel = kernel_of(&h);
    let addr: IpAddr = "2001:db8::1".parse().unwrap();

    assert!(device_addrs(&kernel).contains(&addr));
    let rule = kernel.rules.get("2001:db8::1/128").expect("rule missing");
    assert_eq!(u32::from(rule.table), 300);
    assert_eq!(
        kernel.neighbours.get("br-ex2/2001:db8::1"),
        Some(&"fa:16:3e:11:22:33".parse().unwrap())
    );
    assert!(kernel.routes.contains(&BridgeRoute {
        dest: addr,
        prefix: 128,
        table: 300.into(),
        bridge: bridge("br-ex2"),
        vlan: Some(100),
        via: None,
    }));
    assert!(kernel.ndp_proxies.contains("br-ex2.100/2001:db8::1"));
    assert_eq!(h.engine.local_gateways().await, vec!["cr-lrp-1"]);
}

#[tokio::test]
async fn subnet_attach_exposes_lrp_rule_subnet_route_and_vms() {
    let h = gateway_harness(true).await;

    // tenant network dp-net attaches to the router through lrp-1
    h.cache.upsert_port(PortRow {
        uuid: "n1".to_string(),
        logical_port: "rp-net".to_string(),
        kind: PortKind::Patch,
        datapath: "dp-net".to_string(),
        options: BTreeMap::from([("peer".to_string(), "lrp-1".to_string())]),
        ..PortRow::default()
    });
    h.cache.upsert_port(vm(
        "v6",
        "vm6",
        "dp-net",
        "fa:16:3e:66:77:88 2001:db8:1::a",
        Some("host-b"),
    ));
    let lrp = PortRow {
        uuid: "lrp1".to_string(),
        logical_port: "lrp-1".to_string(),
        kind: PortKind::Patch,
        datapath: "dp-router".to_string(),
        mac: vec!["fa:16:3e:44:55:66 2001:db8:1::1/64".to_string()],
        options: BTreeMap::from([("peer".to_string(), "rp-net".to_string())]),
        ..PortRow::default()
    };
    h.cache.upsert_port(lrp.clone());

    h.engine
        .handle_event(Event::SubnetAttached {
            ip: "2001:db8:1::1/64".to_string(),
            row: lrp,
        })
        .await;

    let kernel = kernel_of(&h);
    let rule = kernel.rules.get("2001:db8:1::1/64").expect("rule missing");
    assert_eq!(u32::from(rule.table), 300);
    assert!(kernel.routes.contains(&BridgeRoute {
        dest: "2001:db8:1::".parse().unwrap(),
        prefix: 64,
        table: 300.into(),
        bridge: bridge("br-ex2"),
        vlan: Some(100),
        via: Some("2001:db8::1".parse().unwrap()),
    }));
    assert!(device_addrs(&kernel).contains(&"2001:db8:1::a".parse::<IpAddr>().unwrap()));
}

#[tokio::test]
async fn sync_removes_stale_state_left_by_a_restart() {
    let h = harness(false, &[("br-ex", 200)], &[("public", "br-ex")]);
    h.cache.upsert_port(localnet("l1", "dp-pub", "public", None));
    // leftovers from before the restart, unknown to the southbound
    h.kernel
        .lock()
        .unwrap()
        .tables
        .insert("br-ex".to_string(), 200);
    h.seed_address(BGP_DEVICE, "10.0.0.99");
    h.seed_rule("10.0.0.99", 32, 200);
    h.seed_route(BridgeRoute {
        dest: "10.0.0.99".parse().unwrap(),
        prefix: 32,
        table: 200.into(),
        bridge: bridge("br-ex"),
        vlan: None,
        via: None,
    });
    // and one legitimate port that must survive
    h.cache.upsert_port(vm(
        "v1",
        "vm1",
        "dp-pub",
        "fa:16:3e:aa:bb:cc 10.0.0.5",
        Some(CHASSIS),
    ));

    h.engine.sync().await;

    let kernel = kernel_of(&h);
    assert!(!device_addrs(&kernel).contains(&"10.0.0.99".parse::<IpAddr>().unwrap()));
    assert!(!kernel.rules.contains_key("10.0.0.99/32"));
    assert!(!kernel.routes.iter().any(|r| r.dest == "10.0.0.99".parse::<IpAddr>().unwrap()));
    assert!(device_addrs(&kernel).contains(&"10.0.0.5".parse::<IpAddr>().unwrap()));
    assert!(kernel.rules.contains_key("10.0.0.5/32"));
}

#[tokio::test]
async fn withdraw_gateway_keeps_sibling_state_intact() {
    let h = gateway_harness(false).await;
    let sibling = gateway_row("cr-lrp-2", "dp-router2", "fa:16:3e:99:88:77 2001:db8::2/64");
    h.cache
        .upsert_port(gateway_patch("gw2", "dp-pub2", "cr-lrp-2", &["2001:db8::2/64"]));
    h.cache.upsert_port(sibling.clone());
    h.engine
        .handle_event(Event::PortBound {
            ips: vec!["2001:db8::2/64".to_string()],
            row: sibling,
        })
        .await;

    let row = gateway_row("cr-lrp-1", "dp-router", "fa:16:3e:11:22:33 2001:db8::1/64");
    h.engine
        .handle_event(Event::PortUnbound {
            ips: vec!["2001:db8::1/64".to_string()],
            row,
        })
        .await;

    let kernel = kernel_of(&h);
    assert!(!device_addrs(&kernel).contains(&"2001:db8::1".parse::<IpAddr>().unwrap()));
    assert!(!kernel.rules.contains_key("2001:db8::1/128"));
    assert!(!kernel.ndp_proxies.contains("br-ex2.100/2001:db8::1"));
    // the sibling is untouched
    assert!(device_addrs(&kernel).contains(&"2001:db8::2".parse::<IpAddr>().unwrap()));
    assert!(kernel.rules.contains_key("2001:db8::2/128"));
    assert!(kernel.ndp_proxies.contains("br-ex2.100/2001:db8::2"));
    assert_eq!(h.engine.local_gateways().await, vec!["cr-lrp-2"]);
}

#[tokio::test]
async fn withdrawing_the_last_gateway_leaves_its_ndp_proxy() {
    let h = gateway_harness(false).await;
    let row = gateway_row("cr-lrp-1", "dp-router", "fa:16:3e:11:22:33 2001:db8::1/64");
    h.engine
        .handle_event(Event::PortUnbound {
            ips: vec!["2001:db8::1/64".to_string()],
            row,
        })
        .await;

    let kernel = kernel_of(&h);
    assert!(!kernel.rules.contains_key("2001:db8::1/128"));
    // without a sibling on the provider network the proxy entry stays
    // behind until the next full sync
    assert!(kernel.ndp_proxies.contains("br-ex2.100/2001:db8::1"));
    assert!(h.engine.local_gateways().await.is_empty());
}

#[tokio::test]
async fn remote_tenant_ip_follows_local_lrp_membership() {
    let h = gateway_harness(true).await;
    h.cache.upsert_port(PortRow {
        uuid: "n1".to_string(),
        logical_port: "rp-net".to_string(),
        kind: PortKind::Patch,
        datapath: "dp-net".to_string(),
        options: BTreeMap::from([("peer".to_string(), "lrp-1".to_string())]),
        ..PortRow::default()
    });
    let lrp = PortRow {
        uuid: "lrp1".to_string(),
        logical_port: "lrp-1".to_string(),
        kind: PortKind::Patch,
        datapath: "dp-router".to_string(),
        mac: vec!["fa:16:3e:44:55:66 2001:db8:1::1/64".to_string()],
        options: BTreeMap::from([("peer".to_string(), "rp-net".to_string())]),
        ..PortRow::default()
    };
    h.cache.upsert_port(lrp.clone());
    h.engine
        .handle_event(Event::SubnetAttached {
            ip: "2001:db8:1::1/64".to_string(),
            row: lrp,
        })
        .await;

    let remote = vm(
        "v7",
        "vm7",
        "dp-net",
        "fa:16:3e:00:11:22 2001:db8:1::b",
        Some("host-b"),
    );
    h.cache.upsert_port(remote.clone());
    h.engine
        .handle_event(Event::TenantPortCreated {
            ips: vec!["2001:db8:1::b".to_string()],
            row: remote.clone(),
        })
        .await;
    let addr: IpAddr = "2001:db8:1::b".parse().unwrap();
    assert!(device_addrs(&kernel_of(&h)).contains(&addr));

    h.engine
        .handle_event(Event::TenantPortDeleted {
            ips: vec!["2001:db8:1::b".to_string()],
            row: remote,
        })
        .await;
    assert!(!device_addrs(&kernel_of(&h)).contains(&addr));
}

#[tokio::test]
async fn replayed_events_are_idempotent() {
    let h = harness(false, &[("br-ex", 200)], &[("public", "br-ex")]);
    h.cache.upsert_port(localnet("l1", "dp-pub", "public", None));
    h.engine.sync().await;

    let row = vm("v1", "vm1", "dp-pub", "fa:16:3e:aa:bb:cc 10.0.0.5", Some(CHASSIS));
    h.cache.upsert_port(row.clone());
    let event = Event::PortBound {
        ips: vec!["10.0.0.5".to_string()],
        row,
    };
    h.engine.handle_event(event.clone()).await;
    let once = kernel_of(&h);
    h.engine.handle_event(event).await;
    assert_eq!(once, kernel_of(&h));
}

#[tokio::test]
async fn withdraw_restores_pre_expose_state() {
    let h = harness(false, &[("br-ex", 200)], &[("public", "br-ex")]);
    h.cache.upsert_port(localnet("l1", "dp-pub", "public", None));
    h.engine.sync().await;
    let before = kernel_of(&h);

    let row = vm("v1", "vm1", "dp-pub", "fa:16:3e:aa:bb:cc 10.0.0.5", Some(CHASSIS));
    h.cache.upsert_port(row.clone());
    h.engine
        .handle_event(Event::PortBound {
            ips: vec!["10.0.0.5".to_string()],
            row: row.clone(),
        })
        .await;
    assert_ne!(before, kernel_of(&h));

    h.engine
        .handle_event(Event::PortUnbound {
            ips: vec!["10.0.0.5".to_string()],
            row,
        })
        .await;
    // table assignments persist by design; everything else reverts
    assert_eq!(before, kernel_of(&h));
}

#[tokio::test]
async fn sync_converges_to_the_southbound_view() {
    let h = harness(false, &[("br-ex", 200)], &[("public", "br-ex")]);
    h.cache.upsert_port(localnet("l1", "dp-pub", "public", None));
    h.cache.upsert_port(vm(
        "v1",
        "vm1",
        "dp-pub",
        "fa:16:3e:aa:bb:cc 10.0.0.5",
        Some(CHASSIS),
    ));
    h.cache.upsert_port(vm(
        "v2",
        "vm2",
        "dp-pub",
        "fa:16:3e:aa:bb:cd 10.0.0.6 2001:db8::6",
        Some(CHASSIS),
    ));
    // a VM on another chassis must not be exposed here
    h.cache.upsert_port(vm(
        "v3",
        "vm3",
        "dp-pub",
        "fa:16:3e:aa:bb:ce 10.0.0.7",
        Some("host-b"),
    ));

    h.engine.sync().await;
    h.engine.sync().await; // a second pass must be a fixed point

    let kernel = kernel_of(&h);
    let expected: BTreeSet<IpAddr> = ["10.0.0.5", "10.0.0.6", "2001:db8::6"]
        .iter()
        .map(|ip| ip.parse().unwrap())
        .collect();
    assert_eq!(device_addrs(&kernel), expected);
    assert_eq!(kernel.rules.len(), 3);
}
