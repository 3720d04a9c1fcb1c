// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Baseline flow computation and dump parsing.
//!
//! For every provider patch port on a bridge the baseline is one rule
//! per IP ethertype: match the patch in_port, rewrite the destination
//! MAC to the bridge's own, continue with NORMAL processing. The cookie
//! marks the flows as ours.

use net::Mac;

/// Cookie identifying the flows this agent owns.
pub const FLOW_COOKIE: u64 = 999;

/// Priority of the baseline flows.
pub const FLOW_PRIORITY: u32 = 900;

/// Prefix of the patch ports attaching provider networks to a bridge.
pub const PROVIDER_PATCH_PREFIX: &str = "patch-provnet-";

/// The desired flow specs for one patch in_port.
#[must_use]
pub fn desired_flows(in_port: u32, bridge_mac: Mac) -> Vec<String> {
    ["ip", "ipv6"]
        .iter()
        .map(|ethertype| {
            format!(
                "cookie={FLOW_COOKIE},priority={FLOW_PRIORITY},{ethertype},in_port={in_port},\
                 actions=mod_dl_dst:{bridge_mac},NORMAL"
            )
        })
        .collect()
}

/// The del-flows match selecting our cookie on one in_port.
#[must_use]
pub fn delete_match(in_port: u32) -> String {
    format!("cookie={FLOW_COOKIE}/-1,in_port={in_port}")
}

/// The dump-flows match selecting everything we own.
#[must_use]
pub fn cookie_match() -> String {
    format!("cookie={FLOW_COOKIE}/-1")
}

/// in_ports referenced by cookie-tagged flows in a dump-flows output.
#[must_use]
pub fn in_ports_in_dump(dump: &str) -> Vec<u32> {
    let cookie = format!("cookie=0x{FLOW_COOKIE:x}");
    let mut ports: Vec<u32> = dump
        .lines()
        .filter(|line| line.contains(&cookie))
        .filter_map(|line| {
            let start = line.find("in_port=")? + "in_port=".len();
            let rest = &line[start..];
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            rest[..end].parse::<u32>().ok()
        })
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

/// Split an `ovn-bridge-mappings` string (`"net1:br-ex,net2:br-ex2"`)
/// into its pairs, skipping malformed entries.
#[must_use]
pub fn parse_bridge_mappings(raw: &str) -> Vec<(String, String)> {
    raw.trim()
        .trim_matches('"')
        .split(',')
        .filter_map(|entry| {
            let (network, bridge) = entry.trim().split_once(':')?;
            if network.is_empty() || bridge.is_empty() {
                return None;
            }
            Some((network.to_string(), bridge.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn desired_flows_cover_both_families() {
        let mac: Mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let flows = desired_flows(3, mac);
        assert_eq!(
            flows,
            vec![
                "cookie=999,priority=900,ip,in_port=3,actions=mod_dl_dst:aa:bb:cc:dd:ee:ff,NORMAL",
                "cookie=999,priority=900,ipv6,in_port=3,actions=mod_dl_dst:aa:bb:cc:dd:ee:ff,NORMAL",
            ]
        );
    }

    #[test]
    fn dump_parsing_extracts_our_in_ports() {
        let dump = "\
 cookie=0x3e7, duration=4.5s, table=0, n_packets=0, n_bytes=0, priority=900,ip,in_port=3 actions=mod_dl_dst:aa:bb:cc:dd:ee:ff,NORMAL
 cookie=0x3e7, duration=4.5s, table=0, n_packets=0, n_bytes=0, priority=900,ipv6,in_port=7 actions=mod_dl_dst:aa:bb:cc:dd:ee:ff,NORMAL
 cookie=0x0, duration=9.1s, table=0, n_packets=12, n_bytes=936, priority=0 actions=NORMAL
";
        assert_eq!(in_ports_in_dump(dump), vec![3, 7]);
        assert!(in_ports_in_dump("").is_empty());
    }

    #[test]
    fn bridge_mapping_parsing() {
        assert_eq!(
            parse_bridge_mappings("\"net1:br-ex,net2:br-ex2\""),
            vec![
                ("net1".to_string(), "br-ex".to_string()),
                ("net2".to_string(), "br-ex2".to_string()),
            ]
        );
        assert!(parse_bridge_mappings("").is_empty());
        assert_eq!(
            parse_bridge_mappings("net1:br-ex,garbage"),
            vec![("net1".to_string(), "br-ex".to_string())]
        );
    }
}
