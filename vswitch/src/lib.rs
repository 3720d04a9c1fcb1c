// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Local virtual-switch surface.
//!
//! Two concerns live here: discovery (own chassis name, southbound
//! remote, the configured provider-network→bridge mapping) and the
//! baseline OpenFlow rules that steer traffic arriving on the physical
//! uplink into the overlay pipeline. Flows are owned by cookie: sync
//! removes any cookie-tagged flow outside the desired set and leaves
//! everything else on the bridge alone.

pub mod flows;
pub mod ovs;

pub use flows::FLOW_COOKIE;
pub use ovs::OvsClient;

use net::InterfaceName;

/// Errors surfaced by the switch surface.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    /// Could not spawn the switch tool.
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// The command line that failed to start.
        command: String,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The switch tool ran and refused.
    #[error("{command} failed ({status}): {stderr}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// Its exit status.
        status: String,
        /// What it printed on stderr.
        stderr: String,
    },
    /// Output that does not parse.
    #[error("unexpected switch output: {0}")]
    Parse(String),
    /// A mapping references an illegal bridge name.
    #[error(transparent)]
    BadBridgeName(#[from] net::InvalidInterfaceName),
}

/// The switch operations the exposure engine drives.
#[async_trait::async_trait]
pub trait SwitchSurface: Send + Sync {
    /// The configured provider-network→bridge pairs.
    async fn bridge_mappings(&self) -> Result<Vec<(String, InterfaceName)>, SwitchError>;

    /// Assert the baseline flows on the bridge without touching extras.
    async fn ensure_default_flows(&self, bridge: &InterfaceName) -> Result<(), SwitchError>;

    /// Assert the baseline flows and remove cookie-tagged flows outside
    /// the desired set.
    async fn sync_flows(&self, bridge: &InterfaceName) -> Result<(), SwitchError>;
}
