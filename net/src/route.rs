// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Routing table identifiers.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A kernel routing table id.
///
/// The agent touches two kinds of tables: the fixed one backing the
/// VRF, and the per-bridge tables it allocates and persists in
/// rt_tables(5). The newtype keeps table ids from mixing with the
/// prefix lengths and VLAN tags that travel through the same
/// signatures; any `u32` the kernel accepts is valid here.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RouteTableId(u32);

impl RouteTableId {
    /// Wrap a raw table id.
    #[must_use]
    pub const fn new(id: u32) -> RouteTableId {
        RouteTableId(id)
    }

    /// The raw table id, as netlink wants it.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for RouteTableId {
    fn from(value: u32) -> Self {
        RouteTableId::new(value)
    }
}

impl From<RouteTableId> for u32 {
    fn from(value: RouteTableId) -> Self {
        value.to_u32()
    }
}

impl Display for RouteTableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
