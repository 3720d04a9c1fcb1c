// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Immutable row snapshots delivered by the southbound database.

use net::parse_mac_column;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque identifier of a logical switch or router in the southbound
/// database. Stable for the lifetime of the datapath.
pub type DatapathId = String;

/// The `type` column of a port binding row, as a closed set.
///
/// VM interface ports carry an empty `type` in the wire schema; both the
/// empty string and the literal `vm` map to [`PortKind::Vm`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortKind {
    /// A VM interface port.
    Vm,
    /// A virtual port (VIP carrier).
    Virtual,
    /// A patch port pairing two datapaths (also logical router ports).
    Patch,
    /// The centralized instance of a distributed router gateway.
    ChassisRedirect,
    /// The port attaching a datapath to a physical network.
    Localnet,
    /// Anything else; never exposed.
    Other(String),
}

impl From<String> for PortKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "vm" => PortKind::Vm,
            "virtual" => PortKind::Virtual,
            "patch" => PortKind::Patch,
            "chassisredirect" => PortKind::ChassisRedirect,
            "localnet" => PortKind::Localnet,
            _ => PortKind::Other(value),
        }
    }
}

impl From<PortKind> for String {
    fn from(value: PortKind) -> Self {
        match value {
            PortKind::Vm => String::new(),
            PortKind::Virtual => "virtual".to_string(),
            PortKind::Patch => "patch".to_string(),
            PortKind::ChassisRedirect => "chassisredirect".to_string(),
            PortKind::Localnet => "localnet".to_string(),
            PortKind::Other(other) => other,
        }
    }
}

impl Default for PortKind {
    fn default() -> Self {
        PortKind::Other(String::new())
    }
}

impl PortKind {
    /// True for the port kinds the exposure engine reacts to.
    #[must_use]
    pub fn is_vif(&self) -> bool {
        matches!(
            self,
            PortKind::Vm | PortKind::Virtual | PortKind::Patch | PortKind::ChassisRedirect
        )
    }

    /// True for workload-carrying kinds (VM and virtual ports).
    #[must_use]
    pub fn is_workload(&self) -> bool {
        matches!(self, PortKind::Vm | PortKind::Virtual)
    }
}

/// A port binding row snapshot.
///
/// Events carry these by value; the cache hands out clones. Nothing here
/// refers back into the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortRow {
    /// Database row id.
    pub uuid: String,
    /// The logical port name (`lrp-…`, `cr-lrp-…`, or a VIF id).
    pub logical_port: String,
    /// Port kind from the `type` column.
    pub kind: PortKind,
    /// Datapath this port is bound to.
    pub datapath: DatapathId,
    /// Name of the chassis currently hosting the port, if any.
    pub chassis: Option<String>,
    /// `mac` column entries, `<hwaddr> <ip1> [<ip2>]`.
    pub mac: Vec<String>,
    /// `nat_addresses` column entries, see [`NatEntry`].
    pub nat_addresses: Vec<String>,
    /// `options` column.
    pub options: BTreeMap<String, String>,
    /// VLAN tag of localnet ports.
    pub tag: Option<u16>,
}

impl PortRow {
    /// Addresses from the first `mac` entry, raw. `None` when the row has
    /// no usable mac column.
    #[must_use]
    pub fn port_ips(&self) -> Option<Vec<String>> {
        let column = self.mac.first()?;
        parse_mac_column(column).map(|(_, ips)| ips)
    }

    /// Hardware address from the first `mac` entry.
    #[must_use]
    pub fn hwaddr(&self) -> Option<net::Mac> {
        let column = self.mac.first()?;
        parse_mac_column(column).map(|(mac, _)| mac)
    }

    /// The `peer` option of patch ports.
    #[must_use]
    pub fn peer(&self) -> Option<&str> {
        self.options.get("peer").map(String::as_str)
    }
}

/// A parsed `nat_addresses` entry.
///
/// The wire form is `<hwaddr> <ip>… is_chassis_resident("<port>")`; the
/// resident clause names the logical port whose placement decides where
/// the addresses are live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatEntry {
    /// Hardware address the NAT addresses answer on.
    pub mac: String,
    /// The translated addresses.
    pub ips: Vec<String>,
    /// Logical port named by the resident clause, if present.
    pub resident_port: Option<String>,
}

impl NatEntry {
    /// Parse one `nat_addresses` entry. Returns `None` for entries that
    /// carry no addresses.
    #[must_use]
    pub fn parse(entry: &str) -> Option<NatEntry> {
        const RESIDENT: &str = "is_chassis_resident(";
        let mut mac = None;
        let mut ips = Vec::new();
        let mut resident_port = None;
        for token in entry.split_whitespace() {
            if let Some(rest) = token.strip_prefix(RESIDENT) {
                resident_port = Some(rest.trim_end_matches(')').trim_matches('"').to_string());
            } else if mac.is_none() {
                mac = Some(token.to_string());
            } else {
                ips.push(token.to_string());
            }
        }
        if ips.is_empty() {
            return None;
        }
        Some(NatEntry {
            mac: mac?,
            ips,
            resident_port,
        })
    }
}
