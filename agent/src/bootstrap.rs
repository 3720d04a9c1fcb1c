// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Once-per-process startup and the long-running loops.
//!
//! Order matters here: the VRF leak first (so the daemon is ready to
//! originate whatever lands on the dummy device), then discovery
//! against the local switch, then the southbound monitor. The engine's
//! readiness gate is released only after everything is wired, so events
//! that arrive during construction wait instead of racing it.

use crate::config::AgentConfig;
use exposure::{BGP_VRF, Engine, EngineConfig};
use frr::{FrrError, VrfLeak};
use hostnet::{HostError, HostNetwork};
use net::InterfaceName;
use southbound::SouthboundError;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vswitch::{OvsClient, SwitchError};

/// Fatal startup errors. Everything after startup is logged and healed
/// by sync instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("routing daemon bootstrap failed: {0}")]
    Frr(#[from] FrrError),
    #[error("virtual switch discovery failed: {0}")]
    Switch(#[from] SwitchError),
    #[error("southbound connection failed: {0}")]
    Southbound(#[from] SouthboundError),
    #[error("host surface unavailable: {0}")]
    Host(#[from] HostError),
    #[error("signal handler setup failed: {0}")]
    Signals(std::io::Error),
}

pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    let leak = VrfLeak {
        vrf: InterfaceName::try_from(BGP_VRF).expect("statically legal name"),
        bgp_as: config.bgp_as,
        router_id: config.bgp_router_id,
    };
    frr::vrf_leak(&leak, &config.vtysh_bin).await?;

    let ovs = OvsClient::default().with_database(config.ovsdb_connection.clone());
    let chassis = ovs.own_chassis_name().await?;
    let remote = ovs.southbound_remote().await?;
    debug!("loaded chassis {chassis}, southbound at {remote}");

    // Older schemas lack Chassis_Private; retry without it.
    let monitor = match southbound::connect(
        &remote,
        &chassis,
        config.expose_tenant_networks,
        true,
    )
    .await
    {
        Ok(monitor) => monitor,
        Err(SouthboundError::SchemaMismatch(table)) => {
            debug!("southbound schema lacks {table}, reconnecting without it");
            southbound::connect(&remote, &chassis, config.expose_tenant_networks, false).await?
        }
        Err(err) => return Err(err.into()),
    };

    let host = HostNetwork::connect(&config.rt_tables)?;
    let (ready_tx, ready_rx) = watch::channel(false);
    let engine = Arc::new(Engine::new(
        EngineConfig {
            chassis,
            expose_tenant_networks: config.expose_tenant_networks,
        },
        host,
        monitor.cache.clone(),
        ovs,
        ready_rx,
    ));

    // Events queue up behind the readiness gate until startup is done.
    let pump_engine = engine.clone();
    let mut events = monitor.events;
    let pump = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            pump_engine.handle_event(event).await;
        }
        warn!("southbound event stream ended");
    });

    let _ = ready_tx.send(true);
    info!("startup complete, running initial sync");
    engine.sync().await;

    let mut sigterm = signal(SignalKind::terminate()).map_err(AgentError::Signals)?;
    let mut interval = tokio::time::interval(config.sync_interval);
    interval.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            _ = interval.tick() => engine.sync().await,
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => break,
        }
    }

    info!("shutting down; exposed state is left for the next start to reconcile");
    pump.abort();
    monitor.task.abort();
    Ok(())
}
