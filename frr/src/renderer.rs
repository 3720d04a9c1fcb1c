// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Config renderer: VRF leaking

use net::InterfaceName;
use std::fmt::{Display, Formatter};
use std::ops::AddAssign;

/// Section separator in rendered configs.
pub const MARKER: &str = "!";

/// Accumulator for rendered configuration lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigBuilder {
    lines: Vec<String>,
}

impl ConfigBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    /// True when nothing has been rendered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl AddAssign<&str> for ConfigBuilder {
    fn add_assign(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

impl AddAssign<String> for ConfigBuilder {
    fn add_assign(&mut self, line: String) {
        self.lines.push(line);
    }
}

impl AddAssign<ConfigBuilder> for ConfigBuilder {
    fn add_assign(&mut self, other: ConfigBuilder) {
        self.lines.extend(other.lines);
    }
}

impl Display for ConfigBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Render a piece of daemon configuration.
pub trait Render {
    /// Contextual data the rendering needs.
    type Context;
    /// What rendering produces.
    type Output;
    /// Produce the rendered output.
    fn render(&self, context: &Self::Context) -> Self::Output;
}

/// The VRF-leak stanza: import the VRF's routes into the main BGP
/// instance in both address families, and redistribute connected routes
/// inside the VRF instance so device addresses become BGP routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrfLeak {
    /// The VRF holding the exposure device.
    pub vrf: InterfaceName,
    /// The autonomous system the routes are originated in.
    pub bgp_as: u32,
    /// Router id for the VRF instance.
    pub router_id: std::net::Ipv4Addr,
}

impl Render for VrfLeak {
    type Context = ();
    type Output = ConfigBuilder;

    fn render(&self, (): &Self::Context) -> Self::Output {
        let mut cfg = ConfigBuilder::new();

        /* import the VRF into the default instance */
        cfg += format!("router bgp {}", self.bgp_as);
        for family in ["ipv4", "ipv6"] {
            cfg += format!(" address-family {family} unicast");
            cfg += format!("  import vrf {}", self.vrf);
            cfg += " exit-address-family";
        }
        cfg += MARKER;

        /* VRF instance originating the exposed addresses */
        cfg += format!("router bgp {} vrf {}", self.bgp_as, self.vrf);
        cfg += format!(" bgp router-id {}", self.router_id);
        for family in ["ipv4", "ipv6"] {
            cfg += format!(" address-family {family} unicast");
            cfg += "  redistribute connected";
            cfg += " exit-address-family";
        }
        cfg += MARKER;

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn vrf_leak_stanza() {
        let leak = VrfLeak {
            vrf: InterfaceName::try_from("bgp-vrf").unwrap(),
            bgp_as: 64999,
            router_id: "192.0.2.1".parse().unwrap(),
        };
        let rendered = leak.render(&()).to_string();
        assert_eq!(
            rendered,
            "\
router bgp 64999
 address-family ipv4 unicast
  import vrf bgp-vrf
 exit-address-family
 address-family ipv6 unicast
  import vrf bgp-vrf
 exit-address-family
!
router bgp 64999 vrf bgp-vrf
 bgp router-id 192.0.2.1
 address-family ipv4 unicast
  redistribute connected
 exit-address-family
 address-family ipv6 unicast
  redistribute connected
 exit-address-family
!
"
        );
    }
}
