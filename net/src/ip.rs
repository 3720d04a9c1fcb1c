// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The address unit carried by southbound port rows.
//!
//! A port row's first `mac` entry is a space separated tuple of the form
//! `<hwaddr> <ip1> [<ip2>]`; two addresses occur when a port holds both a
//! v4 and a v6 address. Addresses may carry a prefix (`2001:db8::1/64`)
//! or not (`10.0.0.5`).

use crate::mac::Mac;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;

/// An IP address with an optional prefix length, as found in southbound
/// port rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortIp {
    /// The address itself, without prefix.
    pub addr: IpAddr,
    /// The prefix length, when the row carried one.
    pub prefix: Option<u8>,
}

/// Error returned when a port row carries an unparsable address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid port ip {0}")]
pub struct InvalidPortIp(pub String);

impl PortIp {
    /// Host-route width for the address family (/32 for v4, /128 for v6).
    #[must_use]
    pub fn host_len(&self) -> u8 {
        match self.addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// The prefix length, defaulting to host width.
    #[must_use]
    pub fn prefix_or_host(&self) -> u8 {
        self.prefix.unwrap_or_else(|| self.host_len())
    }

    /// True iff `other` belongs to the same address family.
    #[must_use]
    pub fn same_family(&self, other: IpAddr) -> bool {
        self.addr.is_ipv4() == other.is_ipv4()
    }

    /// Render as `addr/len` with host width when the row had no prefix.
    #[must_use]
    pub fn host_cidr(&self) -> String {
        format!("{}/{}", self.addr, self.host_len())
    }
}

impl FromStr for PortIp {
    type Err = InvalidPortIp;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPortIp(value.to_string());
        let (addr, prefix) = match value.split_once('/') {
            None => (value.parse::<IpAddr>().map_err(|_| invalid())?, None),
            Some((addr, len)) => {
                let addr = addr.parse::<IpAddr>().map_err(|_| invalid())?;
                let len = len.parse::<u8>().map_err(|_| invalid())?;
                let max = if addr.is_ipv4() { 32 } else { 128 };
                if len > max {
                    return Err(invalid());
                }
                (addr, Some(len))
            }
        };
        Ok(PortIp { addr, prefix })
    }
}

impl TryFrom<String> for PortIp {
    type Error = InvalidPortIp;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortIp> for String {
    fn from(value: PortIp) -> Self {
        value.to_string()
    }
}

impl Display for PortIp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.prefix {
            None => write!(f, "{}", self.addr),
            Some(len) => write!(f, "{}/{len}", self.addr),
        }
    }
}

/// Parse the first `mac` entry of a port row.
///
/// Returns the hardware address and the raw address strings. Rows with
/// fewer than two fields carry no addresses and yield `None`; address
/// validation is deferred to the consumer so that a malformed address
/// surfaces as [`InvalidPortIp`] at the point of use.
#[must_use]
pub fn parse_mac_column(column: &str) -> Option<(Mac, Vec<String>)> {
    let fields: Vec<&str> = column.split_whitespace().collect();
    if !(2..=3).contains(&fields.len()) {
        return None;
    }
    let mac = fields[0].parse::<Mac>().ok()?;
    Some((mac, fields[1..].iter().map(ToString::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_ip_with_and_without_prefix() {
        let bare: PortIp = "10.0.0.5".parse().unwrap();
        assert_eq!(bare.prefix, None);
        assert_eq!(bare.prefix_or_host(), 32);
        assert_eq!(bare.host_cidr(), "10.0.0.5/32");

        let v6: PortIp = "2001:db8::1/64".parse().unwrap();
        assert_eq!(v6.prefix, Some(64));
        assert_eq!(v6.host_len(), 128);
        assert_eq!(v6.to_string(), "2001:db8::1/64");
    }

    #[test]
    fn port_ip_rejects_garbage() {
        assert!("10.0.0.5/33".parse::<PortIp>().is_err());
        assert!("2001:db8::1/129".parse::<PortIp>().is_err());
        assert!("fa:16:3e:aa:bb:cc".parse::<PortIp>().is_err());
        assert!("".parse::<PortIp>().is_err());
    }

    #[test]
    fn mac_column_field_counts() {
        assert!(parse_mac_column("fa:16:3e:aa:bb:cc").is_none());
        assert!(parse_mac_column("").is_none());

        let (mac, ips) = parse_mac_column("fa:16:3e:aa:bb:cc 10.0.0.5").unwrap();
        assert_eq!(mac.to_string(), "fa:16:3e:aa:bb:cc");
        assert_eq!(ips, vec!["10.0.0.5"]);

        let (_, ips) = parse_mac_column("fa:16:3e:aa:bb:cc 10.0.0.5 2001:db8::5/64").unwrap();
        assert_eq!(ips, vec!["10.0.0.5", "2001:db8::5/64"]);

        // four fields is not a recognized shape
        assert!(parse_mac_column("fa:16:3e:aa:bb:cc 10.0.0.5 2001:db8::5 extra").is_none());
    }
}
