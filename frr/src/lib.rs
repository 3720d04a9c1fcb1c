// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Routing-daemon bootstrap.
//!
//! One job, done once per process start: configure the BGP daemon to
//! leak the agent's VRF into the main BGP instance so that addresses
//! appearing on the VRF's dummy device are originated.

pub mod renderer;
pub mod vtysh;

pub use renderer::{ConfigBuilder, MARKER, Render, VrfLeak};
pub use vtysh::vrf_leak;

/// Errors surfaced while configuring the routing daemon.
#[derive(Debug, thiserror::Error)]
pub enum FrrError {
    /// The rendered config could not be staged on disk.
    #[error("failed to stage frr config: {0}")]
    Stage(#[from] std::io::Error),
    /// The shell could not start.
    #[error("failed to run {command}: {reason}")]
    Spawn {
        /// The command line that failed to start.
        command: String,
        /// The underlying error.
        reason: String,
    },
    /// The shell ran and refused the configuration.
    #[error("{command} failed ({status}): {stderr}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// Its exit status.
        status: String,
        /// What it printed on stderr.
        stderr: String,
    },
}
