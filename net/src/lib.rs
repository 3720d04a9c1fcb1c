// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![forbid(unsafe_code)] // Validation logic should always be strictly safe
#![deny(clippy::all, clippy::pedantic)]

//! Vocabulary types shared by every herald crate: validated link names,
//! routing-table ids, MAC addresses, and the address-with-optional-
//! prefix unit carried by southbound port rows.

pub mod interface;
pub mod ip;
pub mod mac;
pub mod route;

pub use interface::{InterfaceName, InvalidInterfaceName};
pub use ip::{InvalidPortIp, PortIp, parse_mac_column};
pub use mac::{InvalidMac, Mac};
pub use route::RouteTableId;
