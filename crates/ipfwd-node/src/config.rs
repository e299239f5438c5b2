//! TOML-based configuration for ipfwd nodes.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use ipfwd_core::{InterfaceId, MacAddr};
use ipfwd_fastpath::{ForwardingAction, StaticResolver};

use crate::error::NodeError;

/// Top-level node configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))
    }

    /// Build the static next-hop resolver from the `[[routes]]` entries.
    pub fn build_resolver(&self) -> Result<StaticResolver, NodeError> {
        let mut resolver = StaticResolver::new();
        for entry in &self.routes {
            let (dst, action) = entry.parse_action()?;
            resolver.add_route(dst, action);
        }
        Ok(resolver)
    }
}

/// The `[node]` section.
#[derive(Debug, Deserialize)]
pub struct NodeSection {
    /// Rewrite cache entry bound.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    10_000
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// The `[control]` section: where the control-plane service listens.
#[derive(Debug, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_control_bind")]
    pub bind: String,
}

fn default_control_bind() -> String {
    "127.0.0.1:7690".to_string()
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            bind: default_control_bind(),
        }
    }
}

/// A `[[routes]]` entry: a static next-hop for one destination address.
///
/// Addresses are kept as strings in the file and validated all-or-nothing
/// here, so a half-parsed entry can never produce a partially populated
/// forwarding action.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    /// Destination IPv4 address, e.g. `"10.0.0.5"`.
    pub destination: String,
    /// Egress interface index.
    pub interface: u32,
    /// Source MAC to stamp, e.g. `"11:22:33:44:55:66"`.
    pub src_mac: String,
    /// Next-hop destination MAC to stamp.
    pub dst_mac: String,
}

impl RouteEntry {
    /// Validate and convert this entry into a cacheable action.
    pub fn parse_action(&self) -> Result<(Ipv4Addr, ForwardingAction), NodeError> {
        let dst: Ipv4Addr = self
            .destination
            .parse()
            .map_err(|_| NodeError::Config(format!("invalid destination ip: {}", self.destination)))?;
        let src_mac: MacAddr = self
            .src_mac
            .parse()
            .map_err(|_| NodeError::Config(format!("invalid src_mac: {}", self.src_mac)))?;
        let dst_mac: MacAddr = self
            .dst_mac
            .parse()
            .map_err(|_| NodeError::Config(format!("invalid dst_mac: {}", self.dst_mac)))?;
        Ok((
            dst,
            ForwardingAction::new(InterfaceId(self.interface), src_mac, dst_mac),
        ))
    }
}

/// Parse a socket address string like "127.0.0.1:7690".
pub fn parse_socket_addr(s: &str) -> Result<SocketAddr, NodeError> {
    s.parse()
        .map_err(|e| NodeError::Config(format!("invalid socket address '{s}': {e}")))
}
