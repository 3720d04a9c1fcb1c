// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The route-exposure reconciler.
//!
//! Maps southbound events and the periodic full resync onto idempotent
//! mutations of three surfaces: addresses on the dummy device in the
//! VRF (what BGP originates), policy rules and routes in the per-bridge
//! tables (how return traffic finds the virtual switch), and the
//! baseline flows on the provider bridges. Event handlers are an
//! optimization; `sync` is the authority.

pub mod classify;
pub mod engine;
pub mod topology;

pub use classify::PortClass;
pub use engine::{Engine, EngineConfig};
pub use topology::{CrLrp, Topology};

use net::InterfaceName;

/// Name of the VRF the BGP daemon leaks.
pub const BGP_VRF: &str = "bgp-vrf";

/// Routing table backing the VRF.
pub const BGP_VRF_TABLE: u32 = 10;

/// Name of the dummy device addresses are exposed on.
pub const BGP_DEVICE: &str = "bgp-nic";

pub(crate) fn bgp_vrf() -> InterfaceName {
    InterfaceName::try_from(BGP_VRF).expect("statically legal name")
}

pub(crate) fn bgp_device() -> InterfaceName {
    InterfaceName::try_from(BGP_DEVICE).expect("statically legal name")
}
