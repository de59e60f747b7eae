//! Cluster membership files.
//!
//! A cluster is either described by a JSON file listing every member or by an
//! `--initial-hosts` string. Both produce the same ordered member list; the
//! first entry is the coordinator.

use std::{
    collections::HashSet,
    fs,
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, UperfError},
    membership::{Member, View},
};

/// Configuration for a single member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Human-readable label
    pub name: String,
    /// Address the member's transport is bound to
    pub addr: SocketAddr,
}

/// Configuration for the entire cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeConfig>,
}

impl ClusterConfig {
    /// Load cluster configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            UperfError::config(format!("failed to read {}: {e}", path.display()))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            UperfError::config(format!("failed to parse {}: {e}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parses `host:port[,host:port...]`. Hostnames are resolved and the
    /// first address is kept.
    pub fn from_initial_hosts(hosts: &str) -> Result<Self> {
        let mut nodes = Vec::new();
        for host in hosts.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            let addr = host
                .to_socket_addrs()
                .map_err(|e| UperfError::config(format!("invalid host '{host}': {e}")))?
                .next()
                .ok_or_else(|| UperfError::config(format!("host '{host}' did not resolve")))?;
            nodes.push(NodeConfig {
                name: host.to_string(),
                addr,
            });
        }

        let config = Self { nodes };
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty clusters and duplicate names or addresses.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(UperfError::config("cluster has no members"));
        }

        let mut seen_names = HashSet::new();
        let mut seen_addrs = HashSet::new();
        for node in &self.nodes {
            if !seen_names.insert(node.name.as_str()) {
                return Err(UperfError::config(format!(
                    "duplicate member name: {}",
                    node.name
                )));
            }
            if !seen_addrs.insert(node.addr) {
                return Err(UperfError::config(format!(
                    "duplicate member address: {}",
                    node.addr
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        self.nodes
            .iter()
            .map(|n| Member::new(n.name.clone(), n.addr))
            .collect()
    }

    /// The initial view, with id 1.
    #[must_use]
    pub fn view(&self) -> View {
        View::new(1, self.members())
    }
}
