// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! rt_tables(5) bookkeeping for per-bridge routing tables.
//!
//! Table ids are allocated first-free above a base and written back to
//! the rt_tables file so they survive restarts and stay addressable by
//! name from `ip` tooling.

use crate::HostError;

/// Lowest id handed out to bridges; everything below is left to the
/// administrator and the well-known tables.
pub const BRIDGE_TABLE_BASE: u32 = 1000;

/// Parse rt_tables content into `(id, name)` pairs, ignoring comments
/// and malformed lines.
#[must_use]
pub fn parse(content: &str) -> Vec<(u32, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            let mut fields = line.split_whitespace();
            let id = fields.next()?.parse::<u32>().ok()?;
            let name = fields.next()?;
            Some((id, name.to_string()))
        })
        .collect()
}

/// Table id already assigned to `name`, if any.
#[must_use]
pub fn lookup(content: &str, name: &str) -> Option<u32> {
    parse(content)
        .into_iter()
        .find(|(_, entry)| entry == name)
        .map(|(id, _)| id)
}

/// Assign a table id to `name`, reusing an existing assignment when
/// present. Returns the id and the (possibly extended) file content.
pub fn allocate(content: &str, name: &str) -> Result<(u32, String), HostError> {
    if let Some(id) = lookup(content, name) {
        return Ok((id, content.to_string()));
    }
    let taken: Vec<u32> = parse(content).into_iter().map(|(id, _)| id).collect();
    let id = (BRIDGE_TABLE_BASE..=u32::from(u16::MAX))
        .find(|candidate| !taken.contains(candidate))
        .ok_or(HostError::TableSpaceExhausted(BRIDGE_TABLE_BASE))?;
    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("{id} {name}\n"));
    Ok((id, updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOCK: &str = "\
#
# reserved values
#
255\tlocal
254\tmain
253\tdefault
0\tunspec
";

    #[test]
    fn parse_skips_comments_and_garbage() {
        let entries = parse(STOCK);
        assert_eq!(entries.len(), 4);
        assert!(entries.contains(&(254, "main".to_string())));
        assert!(parse("not a table line\n").is_empty());
    }

    #[test]
    fn allocate_is_stable_for_known_names() {
        let (id, content) = allocate(STOCK, "br-ex").unwrap();
        assert_eq!(id, BRIDGE_TABLE_BASE);
        assert!(content.contains("1000 br-ex"));

        // a second call with the grown file reuses the assignment
        let (again, unchanged) = allocate(&content, "br-ex").unwrap();
        assert_eq!(again, id);
        assert_eq!(unchanged, content);
    }

    #[test]
    fn allocate_skips_taken_ids() {
        let (_, content) = allocate(STOCK, "br-ex").unwrap();
        let (second, _) = allocate(&content, "br-ex2").unwrap();
        assert_eq!(second, BRIDGE_TABLE_BASE + 1);
    }
}
