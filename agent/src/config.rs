// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command-line arguments and the agent configuration built from them.

use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(version = option_env!("VERSION").unwrap_or("dev"))]
#[command(about = "Per-host BGP route exposure agent for virtual networks", long_about = None)]
pub struct CmdArgs {
    #[arg(
        long,
        value_name = "ASN",
        help = "Autonomous system the exposed routes are originated in"
    )]
    bgp_as: u32,

    #[arg(
        long,
        value_name = "ROUTER-ID",
        help = "Router id for the VRF BGP instance"
    )]
    bgp_router_id: Ipv4Addr,

    #[arg(
        long,
        default_value_t = false,
        help = "Also expose tenant subnets and tenant VM addresses reachable through locally hosted routers"
    )]
    expose_tenant_networks: bool,

    #[arg(
        long,
        value_name = "CONNECTION",
        help = "Local virtual-switch database endpoint, e.g. unix:/run/openvswitch/db.sock. Uses the tool default when omitted"
    )]
    ovsdb_connection: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 120,
        help = "Interval between full resyncs of kernel state against the southbound view"
    )]
    sync_interval: u64,

    #[arg(
        long,
        value_name = "PATH",
        default_value = "/etc/iproute2/rt_tables",
        help = "rt_tables file the per-bridge routing table ids are persisted in"
    )]
    rt_tables: PathBuf,

    #[arg(
        long,
        value_name = "BIN",
        default_value = "vtysh",
        help = "vtysh binary used to push the VRF leak configuration"
    )]
    vtysh_bin: String,

    #[arg(
        long,
        value_name = "FILTER",
        help = "Tracing filter, e.g. info or herald_exposure=debug. Falls back to RUST_LOG, then info"
    )]
    tracing: Option<String>,
}

impl CmdArgs {
    pub fn tracing(&self) -> Option<&str> {
        self.tracing.as_deref()
    }

    pub fn into_config(self) -> AgentConfig {
        AgentConfig {
            bgp_as: self.bgp_as,
            bgp_router_id: self.bgp_router_id,
            expose_tenant_networks: self.expose_tenant_networks,
            ovsdb_connection: self.ovsdb_connection,
            sync_interval: Duration::from_secs(self.sync_interval),
            rt_tables: self.rt_tables,
            vtysh_bin: self.vtysh_bin,
        }
    }
}

/// Everything the bootstrap needs, resolved.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bgp_as: u32,
    pub bgp_router_id: Ipv4Addr,
    pub expose_tenant_networks: bool,
    pub ovsdb_connection: Option<String>,
    pub sync_interval: Duration,
    pub rt_tables: PathBuf,
    pub vtysh_bin: String,
}
