// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port classification: which exposure path a row takes.

use southbound::{PortKind, PortRow, SouthboundView};

/// What a port row means to the exposure engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortClass {
    /// Workload attached directly to a provider network; its addresses
    /// are exposed as-is.
    ProviderVm,
    /// Workload on a tenant network; only its floating IP (if any) is
    /// exposed.
    TenantVm,
    /// FIP-side patch port, carrier of NAT address churn.
    FipPatch,
    /// Router gateway port hosted on this chassis.
    Gateway,
    /// Nothing the engine exposes.
    Other,
}

/// Classify a row. The gateway arm requires the `cr-` name prefix; a
/// chassisredirect row without it is not a gateway instance.
pub fn classify(row: &PortRow, southbound: &impl SouthboundView) -> PortClass {
    match &row.kind {
        PortKind::Vm | PortKind::Virtual => {
            if southbound.is_provider_network(&row.datapath) {
                PortClass::ProviderVm
            } else {
                PortClass::TenantVm
            }
        }
        PortKind::Patch => PortClass::FipPatch,
        PortKind::ChassisRedirect if row.logical_port.starts_with("cr-") => PortClass::Gateway,
        _ => PortClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use southbound::TableCache;

    fn row(kind: PortKind, name: &str, dp: &str) -> PortRow {
        PortRow {
            uuid: format!("uuid-{name}"),
            logical_port: name.to_string(),
            kind,
            datapath: dp.to_string(),
            ..PortRow::default()
        }
    }

    #[test]
    fn classification_table() {
        let sb = TableCache::new();
        sb.upsert_port({
            let mut localnet = row(PortKind::Localnet, "provnet", "dp-pub");
            localnet.options.insert(
                "network_name".to_string(),
                "public".to_string(),
            );
            localnet
        });

        assert_eq!(
            classify(&row(PortKind::Vm, "vm1", "dp-pub"), &sb),
            PortClass::ProviderVm
        );
        assert_eq!(
            classify(&row(PortKind::Virtual, "vip1", "dp-priv"), &sb),
            PortClass::TenantVm
        );
        assert_eq!(
            classify(&row(PortKind::Patch, "patch1", "dp-pub"), &sb),
            PortClass::FipPatch
        );
        assert_eq!(
            classify(&row(PortKind::ChassisRedirect, "cr-lrp-1", "dp-r"), &sb),
            PortClass::Gateway
        );
        // chassisredirect without the cr- prefix is not a gateway
        assert_eq!(
            classify(&row(PortKind::ChassisRedirect, "oddball", "dp-r"), &sb),
            PortClass::Other
        );
        assert_eq!(
            classify(&row(PortKind::Localnet, "provnet", "dp-pub"), &sb),
            PortClass::Other
        );
    }
}
