// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Hardware addresses as they appear in southbound rows.
//!
//! The agent reads MACs out of `mac` columns (`<hwaddr> <ip1> [<ip2>]`)
//! and hands them back to the kernel as neighbour lladdr hints and to
//! the switch as `mod_dl_dst` actions, so parsing and colon-hex
//! formatting are the whole job.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A MAC address.
#[must_use]
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mac(pub [u8; 6]);

impl Mac {
    /// The raw octets, as netlink wants them.
    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

/// Errors which may occur when parsing a string into a [`Mac`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a valid mac address")]
pub struct InvalidMac(pub String);

impl FromStr for Mac {
    type Err = InvalidMac;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = value.split(':');
        for octet in &mut octets {
            let Some(part) = parts.next() else {
                return Err(InvalidMac(value.to_string()));
            };
            if part.len() != 2 {
                return Err(InvalidMac(value.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| InvalidMac(value.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(InvalidMac(value.to_string()));
        }
        Ok(Mac(octets))
    }
}

impl TryFrom<String> for Mac {
    type Error = InvalidMac;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mac> for String {
    fn from(value: Mac) -> Self {
        value.to_string()
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        let mac: Mac = "fa:16:3e:aa:bb:cc".parse().unwrap();
        assert_eq!(mac.octets(), [0xfa, 0x16, 0x3e, 0xaa, 0xbb, 0xcc]);
        assert_eq!(mac.to_string(), "fa:16:3e:aa:bb:cc");
    }

    #[test]
    fn rejects_malformed() {
        assert!("fa:16:3e:aa:bb".parse::<Mac>().is_err());
        assert!("fa:16:3e:aa:bb:cc:dd".parse::<Mac>().is_err());
        assert!("fa:16:3e:aa:bb:zz".parse::<Mac>().is_err());
        assert!("not-a-mac".parse::<Mac>().is_err());
    }
}
