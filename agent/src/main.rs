// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! herald: per-host BGP route exposure agent for virtual networks.

mod bootstrap;
mod config;

use clap::Parser;
use config::CmdArgs;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CmdArgs::parse();

    let filter = args
        .tracing()
        .map_or_else(
            || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            EnvFilter::new,
        );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match bootstrap::run(args.into_config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("agent failed: {err}");
            ExitCode::FAILURE
        }
    }
}
