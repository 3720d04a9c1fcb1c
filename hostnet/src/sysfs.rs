// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Sysctl knobs for proxy ARP/NDP.

use crate::HostError;
use sysctl::Sysctl;

fn ensure_value(name: &str, value: &str) -> Result<(), HostError> {
    let err = |reason: String| HostError::Sysctl {
        name: name.to_string(),
        reason,
    };
    let ctl = sysctl::Ctl::new(name).map_err(|e| err(e.to_string()))?;
    match ctl.value_string() {
        Ok(current) if current == value => Ok(()),
        _ => {
            tracing::debug!("setting sysctl {name} to {value}");
            ctl.set_value_string(value)
                .map_err(|e| err(e.to_string()))?;
            Ok(())
        }
    }
}

/// Answer ARP for addresses the device does not own.
pub(crate) fn enable_proxy_arp(dev: &str) -> Result<(), HostError> {
    ensure_value(&format!("net.ipv4.conf.{dev}.proxy_arp"), "1")
}

/// Answer neighbour solicitations for proxied v6 addresses.
pub(crate) fn enable_proxy_ndp(dev: &str) -> Result<(), HostError> {
    ensure_value(&format!("net.ipv6.conf.{dev}.proxy_ndp"), "1")
}
