// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use thiserror;

const NODE_NAME_PREFIX: &str = "cockroach-";

/// No index is left past the largest existing node.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("no node index available after {0}")]
pub struct IndexExhausted(pub String);

/// Generates the node name for the given index.
pub fn node_name(index: u64) -> String {
    format!("{}{}", NODE_NAME_PREFIX, index)
}

/// Whether the name follows the cockroach-<digits> convention.
pub fn is_node_name(name: &str) -> bool {
    name.strip_prefix(NODE_NAME_PREFIX)
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

/// Returns the index of a cluster node name, or None if the name does not
/// follow the convention or the index is not representable.
pub fn node_index(name: &str) -> Option<u64> {
    if !is_node_name(name) {
        return None;
    }
    name[NODE_NAME_PREFIX.len()..].parse().ok()
}

/// Filters a machine listing down to cluster members.
pub fn cluster_members<S: AsRef<str>>(machines: &[S]) -> Vec<String> {
    machines
        .iter()
        .map(|m| m.as_ref())
        .filter(|m| is_node_name(m))
        .map(|m| m.to_string())
        .collect()
}

/// Index for the next node: one past the largest existing index, 0 for an
/// empty cluster. Indices are never reused, so running out is an error.
pub fn next_index<S: AsRef<str>>(members: &[S]) -> Result<u64, IndexExhausted> {
    let mut max: Option<u64> = None;
    for m in members.iter().map(|m| m.as_ref()) {
        if !is_node_name(m) {
            continue;
        }
        let idx = node_index(m).ok_or_else(|| IndexExhausted(m.to_string()))?;
        max = max.max(Some(idx));
    }
    match max {
        None => Ok(0),
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| IndexExhausted(node_name(max))),
    }
}

/// Node parameters needed to run the cockroach container.
pub trait NodeSettings {
    /// Directory on the machine used as the data directory.
    fn data_dir(&self) -> &str;
    /// Address cockroach binds to.
    fn ip_address(&self) -> &str;
    /// Address to reach the gossip network.
    fn gossip_address(&self) -> &str;
}

/// Live configuration of a node, combining the machine config with driver
/// specific lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig<C> {
    pub name: String,
    pub driver: C,
}

impl<C: NodeSettings> HostConfig<C> {
    pub fn data_dir(&self) -> &str {
        self.driver.data_dir()
    }

    pub fn ip_address(&self) -> &str {
        self.driver.ip_address()
    }

    pub fn gossip_address(&self) -> &str {
        self.driver.gossip_address()
    }
}
