// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Validated kernel link names.
//!
//! The agent does not just accept link names from configuration, it
//! derives them: every tagged provider network gets a `<bridge>.<vlan>`
//! subdevice. Validating at construction keeps a too-long or malformed
//! derived name from surfacing later as an opaque kernel error.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A string checked to be a legal kernel link name: 1 to 15 bytes of
/// ASCII alphanumerics, `.`, `-`, or `_`, and not one of the reserved
/// path names.
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct InterfaceName(String);

/// Why a string is not a usable link name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInterfaceName {
    /// Empty strings name nothing.
    #[error("interface name is empty")]
    Empty,
    /// The kernel caps link names at 15 bytes (16 with the trailing
    /// NUL); VLAN subdevice names hit this first.
    #[error("interface name {0} exceeds {max} bytes", max = InterfaceName::MAX_LEN)]
    TooLong(String),
    /// Only ASCII alphanumerics and `.`, `-`, `_` are accepted.
    #[error("interface name {0} contains characters outside [A-Za-z0-9._-]")]
    BadCharacter(String),
    /// `.` and `..` are path names, not link names.
    #[error("interface name {0} is reserved")]
    Reserved(String),
}

impl InterfaceName {
    /// Longest accepted name, in bytes, excluding the trailing NUL.
    pub const MAX_LEN: usize = 15;

    /// Name of the VLAN subdevice this link gets for a tagged network.
    ///
    /// # Errors
    ///
    /// Fails when appending `.<vlan>` pushes the name past
    /// [`InterfaceName::MAX_LEN`].
    pub fn vlan_of(&self, vlan: u16) -> Result<InterfaceName, InvalidInterfaceName> {
        InterfaceName::try_from(format!("{self}.{vlan}"))
    }
}

fn legal_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

impl TryFrom<String> for InterfaceName {
    type Error = InvalidInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(InvalidInterfaceName::Empty);
        }
        if value == "." || value == ".." {
            return Err(InvalidInterfaceName::Reserved(value));
        }
        // The allowlist subsumes the interior-NUL and non-ASCII checks.
        if !value.chars().all(legal_char) {
            return Err(InvalidInterfaceName::BadCharacter(value));
        }
        if value.len() > InterfaceName::MAX_LEN {
            return Err(InvalidInterfaceName::TooLong(value));
        }
        Ok(InterfaceName(value))
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = InvalidInterfaceName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_names_parse() {
        for name in ["br-ex", "eth0", "br-ex.100", "bgp_nic"] {
            assert!(InterfaceName::try_from(name).is_ok(), "{name} rejected");
        }
    }

    #[test]
    fn illegal_names_rejected() {
        assert_eq!(
            InterfaceName::try_from(""),
            Err(InvalidInterfaceName::Empty)
        );
        assert!(matches!(
            InterfaceName::try_from("."),
            Err(InvalidInterfaceName::Reserved(_))
        ));
        assert!(matches!(
            InterfaceName::try_from("way-too-long-interface-name"),
            Err(InvalidInterfaceName::TooLong(_))
        ));
        assert!(matches!(
            InterfaceName::try_from("br ex"),
            Err(InvalidInterfaceName::BadCharacter(_))
        ));
        assert!(matches!(
            InterfaceName::try_from("br\0ex"),
            Err(InvalidInterfaceName::BadCharacter(_))
        ));
        assert!(matches!(
            InterfaceName::try_from("brücke"),
            Err(InvalidInterfaceName::BadCharacter(_))
        ));
    }

    #[test]
    fn vlan_subdevice_names() {
        let bridge = InterfaceName::try_from("br-ex").unwrap();
        assert_eq!(bridge.vlan_of(100).unwrap().as_ref(), "br-ex.100");

        // a name near the cap has no room for a tag suffix
        let long = InterfaceName::try_from("br-provider012").unwrap();
        assert!(matches!(
            long.vlan_of(4094),
            Err(InvalidInterfaceName::TooLong(_))
        ));
    }
}
