// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Wrapper around the switch command-line tools.
//!
//! Database reads go through `--format=json` and are decoded with
//! serde_json rather than scraped from the human tabular output; the
//! column values come back in the database's wire notation (maps as
//! `["map", [[k, v]…]]`, empty values as `["set", []]`).

use crate::flows::{
    self, PROVIDER_PATCH_PREFIX, cookie_match, delete_match, desired_flows, in_ports_in_dump,
};
use crate::{SwitchError, SwitchSurface};
use net::{InterfaceName, Mac};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::process::Command;
use tracing::debug;

/// Client for the local virtual-switch database and flow tables.
pub struct OvsClient {
    vsctl: String,
    ofctl: String,
    database: Option<String>,
}

impl Default for OvsClient {
    fn default() -> Self {
        OvsClient::new("ovs-vsctl", "ovs-ofctl")
    }
}

impl OvsClient {
    /// Client using the given tool binaries (overridable for tests).
    #[must_use]
    pub fn new(vsctl: impl Into<String>, ofctl: impl Into<String>) -> OvsClient {
        OvsClient {
            vsctl: vsctl.into(),
            ofctl: ofctl.into(),
            database: None,
        }
    }

    /// Talk to a non-default switch database endpoint.
    #[must_use]
    pub fn with_database(mut self, database: Option<String>) -> OvsClient {
        self.database = database;
        self
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, SwitchError> {
        let db_arg = self
            .database
            .as_ref()
            .filter(|_| program == self.vsctl)
            .map(|db| format!("--db={db}"));
        let mut args: Vec<&str> = args.to_vec();
        if let Some(db_arg) = db_arg.as_deref() {
            args.insert(0, db_arg);
        }
        let args = args.as_slice();
        let command = format!("{program} {}", args.join(" "));
        debug!("running: {command}");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| SwitchError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SwitchError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a vsctl query with `--format=json` and decode the reply.
    async fn query(&self, args: &[&str]) -> Result<Value, SwitchError> {
        let mut full = vec!["--format=json"];
        full.extend_from_slice(args);
        let raw = self.run(&self.vsctl, &full).await?;
        serde_json::from_str(&raw)
            .map_err(|err| SwitchError::Parse(format!("bad json from {}: {err}", self.vsctl)))
    }

    async fn external_ids(&self) -> Result<BTreeMap<String, String>, SwitchError> {
        let table = self
            .query(&["--columns=external_ids", "list", "Open_vSwitch"])
            .await?;
        let cell = first_cell(&table)
            .ok_or_else(|| SwitchError::Parse("empty Open_vSwitch listing".to_string()))?;
        Ok(ovsdb_map(cell))
    }

    async fn external_id(&self, key: &str) -> Result<String, SwitchError> {
        self.external_ids()
            .await?
            .remove(key)
            .ok_or_else(|| SwitchError::Parse(format!("external_ids carries no {key}")))
    }

    /// The chassis name this hypervisor registered with the control
    /// plane (`external_ids:system-id`).
    pub async fn own_chassis_name(&self) -> Result<String, SwitchError> {
        self.external_id("system-id").await
    }

    /// The southbound database url (`external_ids:ovn-remote`).
    pub async fn southbound_remote(&self) -> Result<String, SwitchError> {
        self.external_id("ovn-remote").await
    }

    /// OpenFlow port number of an interface; `None` while detached
    /// (the database reports an empty set or -1).
    async fn ofport(&self, port: &str) -> Result<Option<u32>, SwitchError> {
        let table = self
            .query(&["--columns=ofport", "list", "Interface", port])
            .await?;
        let cell = first_cell(&table)
            .ok_or_else(|| SwitchError::Parse(format!("no Interface row for {port}")))?;
        Ok(cell_i64(cell).and_then(|n| u32::try_from(n).ok()))
    }

    fn bridge_mac(&self, bridge: &InterfaceName) -> Result<Mac, SwitchError> {
        let path = format!("/sys/class/net/{bridge}/address");
        let raw = std::fs::read_to_string(&path)
            .map_err(|err| SwitchError::Parse(format!("{path}: {err}")))?;
        raw.trim()
            .parse()
            .map_err(|_| SwitchError::Parse(format!("{path}: bad mac {raw:?}")))
    }

    async fn provider_in_ports(&self, bridge: &InterfaceName) -> Result<Vec<u32>, SwitchError> {
        let ports = self
            .run(&self.vsctl, &["list-ports", bridge.as_ref()])
            .await?;
        let mut in_ports = Vec::new();
        for port in ports.lines() {
            let port = port.trim();
            if !port.starts_with(PROVIDER_PATCH_PREFIX) {
                continue;
            }
            if let Some(ofport) = self.ofport(port).await? {
                in_ports.push(ofport);
            }
        }
        Ok(in_ports)
    }

    async fn assert_flows(&self, bridge: &InterfaceName) -> Result<Vec<u32>, SwitchError> {
        let mac = self.bridge_mac(bridge)?;
        let in_ports = self.provider_in_ports(bridge).await?;
        for in_port in &in_ports {
            for flow in desired_flows(*in_port, mac) {
                self.run(&self.ofctl, &["add-flow", bridge.as_ref(), &flow])
                    .await?;
            }
        }
        Ok(in_ports)
    }
}

#[async_trait::async_trait]
impl SwitchSurface for OvsClient {
    async fn bridge_mappings(&self) -> Result<Vec<(String, InterfaceName)>, SwitchError> {
        let raw = self
            .external_ids()
            .await?
            .remove("ovn-bridge-mappings")
            .unwrap_or_default();
        let mut mappings = Vec::new();
        for (network, bridge) in flows::parse_bridge_mappings(&raw) {
            mappings.push((network, InterfaceName::try_from(bridge)?));
        }
        Ok(mappings)
    }

    async fn ensure_default_flows(&self, bridge: &InterfaceName) -> Result<(), SwitchError> {
        self.assert_flows(bridge).await?;
        Ok(())
    }

    async fn sync_flows(&self, bridge: &InterfaceName) -> Result<(), SwitchError> {
        let wanted = self.assert_flows(bridge).await?;
        let dump = self
            .run(
                &self.ofctl,
                &["dump-flows", bridge.as_ref(), &cookie_match()],
            )
            .await?;
        for in_port in in_ports_in_dump(&dump) {
            if !wanted.contains(&in_port) {
                self.run(
                    &self.ofctl,
                    &["del-flows", bridge.as_ref(), &delete_match(in_port)],
                )
                .await?;
            }
        }
        Ok(())
    }
}

/// First cell of the first row of a `--format=json` listing.
fn first_cell(table: &Value) -> Option<&Value> {
    table.get("data")?.get(0)?.get(0)
}

/// Decode a `["map", [[k, v]…]]` column value.
fn ovsdb_map(value: &Value) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let Some(pair) = value.as_array() else {
        return map;
    };
    if pair.first().and_then(Value::as_str) != Some("map") {
        return map;
    }
    let Some(entries) = pair.get(1).and_then(Value::as_array) else {
        return map;
    };
    for entry in entries {
        let Some(kv) = entry.as_array() else {
            continue;
        };
        if let (Some(k), Some(v)) = (
            kv.first().and_then(Value::as_str),
            kv.get(1).and_then(Value::as_str),
        ) {
            map.insert(k.to_string(), v.to_string());
        }
    }
    map
}

/// Decode an integer column value; `["set", []]` means unset.
fn cell_i64(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value.as_array()?.get(1)?.as_array()?.first()?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn external_ids_listing_decodes() {
        let table = json!({
            "data": [[["map", [
                ["ovn-bridge-mappings", "public:br-ex"],
                ["ovn-remote", "tcp:192.0.2.100:6642"],
                ["system-id", "host-a"],
            ]]]],
            "headings": ["external_ids"],
        });
        let map = ovsdb_map(first_cell(&table).unwrap());
        assert_eq!(map.get("system-id").map(String::as_str), Some("host-a"));
        assert_eq!(
            map.get("ovn-bridge-mappings").map(String::as_str),
            Some("public:br-ex")
        );
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn empty_listing_has_no_cell() {
        let table = json!({"data": [], "headings": ["external_ids"]});
        assert!(first_cell(&table).is_none());
        assert!(ovsdb_map(&json!("not-a-map")).is_empty());
    }

    #[test]
    fn ofport_cell_decodes() {
        assert_eq!(cell_i64(&json!(3)), Some(3));
        // detached interfaces report -1; the caller drops it
        assert_eq!(cell_i64(&json!(-1)), Some(-1));
        assert_eq!(cell_i64(&json!(["set", []])), None);
        assert_eq!(cell_i64(&json!(["set", [7]])), Some(7));
    }
}
