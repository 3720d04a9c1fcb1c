// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! rtnetlink-backed implementation of the host surface.
//!
//! Mutations tolerate the benign kernel answers (EEXIST on create,
//! ENOENT/ESRCH on delete) so that every operation is idempotent.

use crate::surface::{BridgeRoute, HostSurface, PolicyRule};
use crate::{HostError, rt_tables, sysfs};
use futures::TryStreamExt;
use net::{InterfaceName, Mac, RouteTableId};
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::neighbour::{
    NeighbourAddress, NeighbourAttribute, NeighbourFlags, NeighbourMessage, NeighbourState,
};
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteScope,
};
use rtnetlink::packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use rtnetlink::{Handle, IpVersion, LinkDummy, LinkUnspec, LinkVlan, LinkVrf, RouteMessageBuilder};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::debug;

const EEXIST: i32 = 17;
const ENOENT: i32 = 2;
const ESRCH: i32 = 3;
const EADDRNOTAVAIL: i32 = 99;

/// Outcomes the kernel reports when the target state already holds.
const BENIGN_ADD: [i32; 1] = [EEXIST];
const BENIGN_DEL: [i32; 3] = [ENOENT, ESRCH, EADDRNOTAVAIL];

fn tolerate(result: Result<(), rtnetlink::Error>, benign: &[i32]) -> Result<(), HostError> {
    match result {
        Ok(()) => Ok(()),
        Err(rtnetlink::Error::NetlinkError(ref inner))
            if inner
                .code
                .is_some_and(|code| benign.contains(&code.get().abs())) =>
        {
            Ok(())
        }
        Err(err) => Err(HostError::Netlink(err)),
    }
}

/// The real kernel surface.
pub struct HostNetwork {
    handle: Handle,
    rt_tables_path: PathBuf,
    /// In-memory copy of the table assignment; the file is the durable
    /// form.
    tables: std::sync::Mutex<HashMap<InterfaceName, RouteTableId>>,
}

impl HostNetwork {
    /// Open a netlink connection and drive it from the current runtime.
    pub fn connect(rt_tables_path: impl Into<PathBuf>) -> Result<HostNetwork, HostError> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        Ok(HostNetwork {
            handle,
            rt_tables_path: rt_tables_path.into(),
            tables: std::sync::Mutex::new(HashMap::new()),
        })
    }

    async fn try_link_index(&self, name: &str) -> Result<Option<u32>, HostError> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(reply) => Ok(reply.map(|msg| msg.header.index)),
            // a name miss comes back as an error, not an empty dump
            Err(rtnetlink::Error::NetlinkError(_)) => Ok(None),
            Err(err) => Err(HostError::Netlink(err)),
        }
    }

    async fn link_index(&self, name: &InterfaceName) -> Result<u32, HostError> {
        self.try_link_index(name.as_ref())
            .await?
            .ok_or_else(|| HostError::NoSuchLink(name.clone()))
    }

    async fn device_index(&self, route: &BridgeRoute) -> Result<u32, HostError> {
        self.try_link_index(&route.device())
            .await?
            .ok_or_else(|| HostError::NoSuchLink(route.bridge.clone()))
    }

    async fn set_up(&self, index: u32) -> Result<(), HostError> {
        tolerate(
            self.handle
                .link()
                .set(LinkUnspec::new_with_index(index).up().build())
                .execute()
                .await,
            &BENIGN_ADD,
        )
    }

    async fn replace_neighbour(
        &self,
        bridge: &InterfaceName,
        ip: IpAddr,
        mac: Mac,
    ) -> Result<(), HostError> {
        let index = self.link_index(bridge).await?;
        tolerate(
            self.handle
                .neighbours()
                .add(index, ip)
                .link_local_address(&mac.octets())
                .state(NeighbourState::Permanent)
                .replace()
                .execute()
                .await,
            &BENIGN_ADD,
        )
    }

    async fn delete_neighbour(&self, bridge: &InterfaceName, ip: IpAddr) -> Result<(), HostError> {
        let Some(index) = self.try_link_index(bridge.as_ref()).await? else {
            return Ok(());
        };
        let mut stream = self.handle.neighbours().get().execute();
        while let Ok(Some(msg)) = stream.try_next().await {
            if msg.header.ifindex != index {
                continue;
            }
            if neighbour_destination(&msg) != Some(ip) {
                continue;
            }
            tolerate(
                self.handle.neighbours().del(msg).execute().await,
                &BENIGN_DEL,
            )?;
        }
        Ok(())
    }

    async fn address_messages(
        &self,
        dev: &InterfaceName,
    ) -> Result<Vec<rtnetlink::packet_route::address::AddressMessage>, HostError> {
        let index = self.link_index(dev).await?;
        let mut out = Vec::new();
        let mut stream = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();
        while let Some(msg) = stream.try_next().await.map_err(HostError::Netlink)? {
            out.push(msg);
        }
        Ok(out)
    }

    async fn rule_messages(&self, version: IpVersion) -> Result<Vec<RuleMessage>, HostError> {
        let mut out = Vec::new();
        let mut stream = self.handle.rule().get(version).execute();
        while let Some(msg) = stream.try_next().await.map_err(HostError::Netlink)? {
            out.push(msg);
        }
        Ok(out)
    }

    async fn route_messages(&self, version: IpVersion) -> Result<Vec<RouteMessage>, HostError> {
        let filter = match version {
            IpVersion::V4 => RouteMessageBuilder::<std::net::Ipv4Addr>::new().build(),
            IpVersion::V6 => RouteMessageBuilder::<std::net::Ipv6Addr>::new().build(),
        };
        let mut out = Vec::new();
        let mut stream = self.handle.route().get(filter).execute();
        while let Some(msg) = stream.try_next().await.map_err(HostError::Netlink)? {
            out.push(msg);
        }
        Ok(out)
    }

    fn route_message(&self, route: &BridgeRoute, index: u32) -> RouteMessage {
        let mut message = match route.dest {
            IpAddr::V4(dest) => {
                let mut builder = RouteMessageBuilder::<std::net::Ipv4Addr>::new()
                    .destination_prefix(dest, route.prefix)
                    .table_id(route.table.into())
                    .output_interface(index);
                if let Some(IpAddr::V4(via)) = route.via {
                    builder = builder.gateway(via);
                }
                builder.build()
            }
            IpAddr::V6(dest) => {
                let mut builder = RouteMessageBuilder::<std::net::Ipv6Addr>::new()
                    .destination_prefix(dest, route.prefix)
                    .table_id(route.table.into())
                    .output_interface(index);
                if let Some(IpAddr::V6(via)) = route.via {
                    builder = builder.gateway(via);
                }
                builder.build()
            }
        };
        if route.via.is_none() {
            message.header.scope = RouteScope::Link;
        }
        message
    }
}

#[async_trait::async_trait]
impl HostSurface for HostNetwork {
    async fn ensure_vrf(&self, name: &InterfaceName, table: RouteTableId) -> Result<(), HostError> {
        if self.try_link_index(name.as_ref()).await?.is_none() {
            tolerate(
                self.handle
                    .link()
                    .add(LinkVrf::new(name.as_ref(), table.into()).build())
                    .execute()
                    .await,
                &BENIGN_ADD,
            )?;
        }
        let index = self.link_index(name).await?;
        self.set_up(index).await
    }

    async fn ensure_dummy_in_vrf(
        &self,
        name: &InterfaceName,
        vrf: &InterfaceName,
    ) -> Result<(), HostError> {
        if self.try_link_index(name.as_ref()).await?.is_none() {
            tolerate(
                self.handle
                    .link()
                    .add(LinkDummy::new(name.as_ref()).build())
                    .execute()
                    .await,
                &BENIGN_ADD,
            )?;
        }
        let index = self.link_index(name).await?;
        let vrf_index = self.link_index(vrf).await?;
        tolerate(
            self.handle
                .link()
                .set(
                    LinkUnspec::new_with_index(index)
                        .controller(vrf_index)
                        .up()
                        .build(),
                )
                .execute()
                .await,
            &BENIGN_ADD,
        )
    }

    async fn ensure_arp_ndp_enabled(
        &self,
        bridge: &InterfaceName,
        index: u32,
    ) -> Result<(), HostError> {
        sysfs::enable_proxy_arp(bridge.as_ref())?;
        sysfs::enable_proxy_ndp(bridge.as_ref())?;
        // Anchor address so the kernel answers ARP on the bridge.
        let link = self.link_index(bridge).await?;
        let anchor = IpAddr::from([169, 254, 0, u8::try_from(index % 254).unwrap_or(0) + 1]);
        tolerate(
            self.handle.address().add(link, anchor, 32).execute().await,
            &BENIGN_ADD,
        )
    }

    async fn ensure_vlan_device(&self, bridge: &InterfaceName, vlan: u16) -> Result<(), HostError> {
        let name = bridge.vlan_of(vlan)?;
        if self.try_link_index(name.as_ref()).await?.is_none() {
            let parent = self.link_index(bridge).await?;
            tolerate(
                self.handle
                    .link()
                    .add(LinkVlan::new(name.as_ref(), parent, vlan).build())
                    .execute()
                    .await,
                &BENIGN_ADD,
            )?;
        }
        let index = self.link_index(&name).await?;
        self.set_up(index).await?;
        sysfs::enable_proxy_arp(name.as_ref())?;
        sysfs::enable_proxy_ndp(name.as_ref())
    }

    async fn ensure_routing_table(&self, bridge: &InterfaceName) -> Result<RouteTableId, HostError> {
        if let Some(id) = self
            .tables
            .lock()
            .expect("table assignment lock poisoned")
            .get(bridge)
        {
            return Ok(*id);
        }
        let content = match std::fs::read_to_string(&self.rt_tables_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(HostError::RtTables(err.to_string())),
        };
        let (id, updated) = rt_tables::allocate(&content, bridge.as_ref())?;
        if updated != content {
            std::fs::write(&self.rt_tables_path, updated)
                .map_err(|err| HostError::RtTables(err.to_string()))?;
        }
        let table = RouteTableId::from(id);
        self.tables
            .lock()
            .expect("table assignment lock poisoned")
            .insert(bridge.clone(), table);
        Ok(table)
    }

    async fn add_addresses(&self, dev: &InterfaceName, ips: &[IpAddr]) -> Result<(), HostError> {
        let index = self.link_index(dev).await?;
        for ip in ips {
            let prefix = if ip.is_ipv4() { 32 } else { 128 };
            debug!("adding {ip} to {dev}");
            tolerate(
                self.handle
                    .address()
                    .add(index, *ip, prefix)
                    .execute()
                    .await,
                &BENIGN_ADD,
            )?;
        }
        Ok(())
    }

    async fn remove_addresses(&self, dev: &InterfaceName, ips: &[IpAddr]) -> Result<(), HostError> {
        let wanted: BTreeSet<IpAddr> = ips.iter().copied().collect();
        for msg in self.address_messages(dev).await? {
            let Some(addr) = address_of(&msg) else {
                continue;
            };
            if !wanted.contains(&addr) {
                continue;
            }
            debug!("removing {addr} from {dev}");
            tolerate(self.handle.address().del(msg).execute().await, &BENIGN_DEL)?;
        }
        Ok(())
    }

    async fn add_rule(
        &self,
        rule: &PolicyRule,
        bridge: &InterfaceName,
        lladdr: Option<Mac>,
    ) -> Result<(), HostError> {
        let result = match rule.dest {
            IpAddr::V4(addr) => {
                self.handle
                    .rule()
                    .add()
                    .v4()
                    .destination_prefix(addr, rule.prefix)
                    .table_id(rule.table.into())
                    .action(RuleAction::ToTable)
                    .execute()
                    .await
            }
            IpAddr::V6(addr) => {
                self.handle
                    .rule()
                    .add()
                    .v6()
                    .destination_prefix(addr, rule.prefix)
                    .table_id(rule.table.into())
                    .action(RuleAction::ToTable)
                    .execute()
                    .await
            }
        };
        tolerate(result, &BENIGN_ADD)?;
        if let Some(mac) = lladdr {
            self.replace_neighbour(bridge, rule.dest, mac).await?;
        }
        Ok(())
    }

    async fn remove_rule(
        &self,
        rule: &PolicyRule,
        bridge: &InterfaceName,
        lladdr: Option<Mac>,
    ) -> Result<(), HostError> {
        let version = match rule.dest {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        };
        for msg in self.rule_messages(version).await? {
            if rule_of(&msg).as_ref() == Some(rule) {
                tolerate(self.handle.rule().del(msg).execute().await, &BENIGN_DEL)?;
            }
        }
        if lladdr.is_some() {
            self.delete_neighbour(bridge, rule.dest).await?;
        }
        Ok(())
    }

    async fn add_route(&self, route: &BridgeRoute) -> Result<(), HostError> {
        let index = self.device_index(route).await?;
        let message = self.route_message(route, index);
        tolerate(
            self.handle.route().add(message).execute().await,
            &BENIGN_ADD,
        )
    }

    async fn remove_route(&self, route: &BridgeRoute) -> Result<(), HostError> {
        let Some(index) = self.try_link_index(&route.device()).await? else {
            return Ok(());
        };
        let message = self.route_message(route, index);
        tolerate(self.handle.route().del(message).execute().await, &BENIGN_DEL)
    }

    async fn add_ndp_proxy(
        &self,
        ip: IpAddr,
        bridge: &InterfaceName,
        vlan: Option<u16>,
    ) -> Result<(), HostError> {
        let device = match vlan {
            Some(vlan) => bridge.vlan_of(vlan)?,
            None => bridge.clone(),
        };
        let index = self.link_index(&device).await?;
        tolerate(
            self.handle
                .neighbours()
                .add(index, ip)
                .flags(NeighbourFlags::Proxy)
                .replace()
                .execute()
                .await,
            &BENIGN_ADD,
        )
    }

    async fn remove_ndp_proxy(
        &self,
        ip: IpAddr,
        bridge: &InterfaceName,
        vlan: Option<u16>,
    ) -> Result<(), HostError> {
        let device = match vlan {
            Some(vlan) => bridge.vlan_of(vlan)?,
            None => bridge.clone(),
        };
        self.delete_neighbour(&device, ip).await
    }

    async fn exposed_addresses(&self, dev: &InterfaceName) -> Result<BTreeSet<IpAddr>, HostError> {
        Ok(self
            .address_messages(dev)
            .await?
            .iter()
            .filter_map(address_of)
            .filter(|addr| !addr.is_loopback())
            .collect())
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
        let mut rules = BTreeMap::new();
        for version in [IpVersion::V4, IpVersion::V6] {
            for msg in self.rule_messages(version).await? {
                let Some(rule) = rule_of(&msg) else {
                    continue;
                };
                if tables.contains(&rule.table) {
                    rules.insert(rule.cidr(), rule);
                }
            }
        }
        Ok(rules)
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
        for (version, v4) in [(IpVersion::V4, true), (IpVersion::V6, false)] {
            let mut messages = self.rule_messages(version).await?;
            messages.retain(|msg| {
                rule_of(msg).is_some_and(|rule| {
                    rule.dest.is_ipv4() == v4 && stale.contains_key(&rule.cidr())
                })
            });
            for msg in messages {
                tolerate(self.handle.rule().del(msg).execute().await, &BENIGN_DEL)?;
            }
        }
        Ok(())
    }

    async fn remove_stale_routes(
        &self,
        tables: &BTreeMap<InterfaceName, RouteTableId>,
        keep: &BTreeMap<InterfaceName, BTreeSet<BridgeRoute>>,
    ) -> Result<(), HostError> {
        // Resolve the output devices the kept routes go through once.
        let mut kept: BTreeSet<(u32, IpAddr, u8, Option<IpAddr>)> = BTreeSet::new();
        for routes in keep.values() {
            for route in routes {
                if let Some(index) = self.try_link_index(&route.device()).await? {
                    kept.insert((index, route.dest, route.prefix, route.via));
                }
            }
        }
        let table_ids: BTreeSet<u32> = tables.values().map(|id| u32::from(*id)).collect();
        for version in [IpVersion::V4, IpVersion::V6] {
            for msg in self.route_messages(version).await? {
                let parts = route_parts(&msg);
                if !table_ids.contains(&parts.table) {
                    continue;
                }
                let (Some(dest), Some(oif)) = (parts.dest, parts.oif) else {
                    continue;
                };
                if kept.contains(&(oif, dest, parts.prefix, parts.via)) {
                    continue;
                }
                debug!("removing stale route {dest}/{} table {}", parts.prefix, parts.table);
                tolerate(self.handle.route().del(msg).execute().await, &BENIGN_DEL)?;
            }
        }
        Ok(())
    }
}

fn address_of(msg: &rtnetlink::packet_route::address::AddressMessage) -> Option<IpAddr> {
    msg.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Address(addr) => Some(*addr),
        _ => None,
    })
}

fn rule_of(msg: &RuleMessage) -> Option<PolicyRule> {
    let mut dest = None;
    let mut table = u32::from(msg.header.table);
    for attr in &msg.attributes {
        match attr {
            RuleAttribute::Destination(addr) => dest = Some(*addr),
            RuleAttribute::Table(id) => table = *id,
            _ => {}
        }
    }
    Some(PolicyRule {
        dest: dest?,
        prefix: msg.header.dst_len,
        table: table.into(),
    })
}

fn neighbour_destination(msg: &NeighbourMessage) -> Option<IpAddr> {
    msg.attributes.iter().find_map(|attr| match attr {
        NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => Some(IpAddr::V4(*v4)),
        NeighbourAttribute::Destination(NeighbourAddress::Inet6(v6)) => Some(IpAddr::V6(*v6)),
        _ => None,
    })
}

struct RouteParts {
    dest: Option<IpAddr>,
    prefix: u8,
    via: Option<IpAddr>,
    oif: Option<u32>,
    table: u32,
}

fn route_parts(msg: &RouteMessage) -> RouteParts {
    let mut parts = RouteParts {
        dest: None,
        prefix: msg.header.destination_prefix_length,
        via: None,
        oif: None,
        table: u32::from(msg.header.table),
    };
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(addr) => parts.dest = route_address(addr),
            RouteAttribute::Gateway(addr) => parts.via = route_address(addr),
            RouteAttribute::Oif(index) => parts.oif = Some(*index),
            RouteAttribute::Table(id) => parts.table = *id,
            _ => {}
        }
    }
    parts
}

fn route_address(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
        _ => None,
    }
}
