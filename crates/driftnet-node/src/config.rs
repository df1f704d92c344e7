//! Configuration types for driftnet-node.
//! Parsed from ~/.driftnet/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub gossip: GossipSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Local peer ID. Empty means: derive from the hostname, stripped
    /// to alphanumerics and truncated to 16 chars.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_shared_dir")]
    pub shared_dir: String,
    /// Where downloaded peer files land, one subdirectory per peer.
    /// Kept outside shared_dir so downloads are not re-shared.
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    /// Seconds between two scans of the local shared directory.
    #[serde(default = "default_10")]
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    /// UDP bind address for the gossip socket.
    #[serde(default = "default_udp_bind")]
    pub udp_bind: String,
    /// Where broadcasts go. The limited broadcast address on the
    /// gossip port in production; tests point it at a loopback peer.
    #[serde(default = "default_broadcast")]
    pub broadcast_addr: String,
    /// TCP bind address for file transfer and the operator console.
    #[serde(default = "default_tcp_bind")]
    pub tcp_bind: String,
    /// Well-known TCP port peers serve file transfers on.
    #[serde(default = "default_port")]
    pub transfer_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipSection {
    /// Seconds between HELLO broadcasts. Wire range [0,255].
    #[serde(default = "default_1_u8")]
    pub hello_interval_secs: u8,
    /// Seconds between SYN sweeps over the peer table.
    #[serde(default = "default_1")]
    pub syn_interval_secs: u64,
    /// Seconds before an unheard peer is forgotten.
    #[serde(default = "default_10")]
    pub expiration_secs: u64,
    /// Minimum milliseconds between two SYNs to the same peer.
    #[serde(default = "default_1000")]
    pub min_syn_interval_ms: u64,
    /// How many DYING messages the shutdown burst sends.
    #[serde(default = "default_3")]
    pub dying_repeat: u32,
    /// Milliseconds between two DYING messages in the burst.
    #[serde(default = "default_100")]
    pub dying_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Seconds between download-scheduler sweeps.
    #[serde(default = "default_1")]
    pub schedule_interval_secs: u64,
    #[serde(default = "default_30")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_10")]
    pub read_timeout_secs: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            shared_dir: default_shared_dir(),
            download_dir: default_download_dir(),
            scan_interval_secs: 10,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            udp_bind: default_udp_bind(),
            broadcast_addr: default_broadcast(),
            tcp_bind: default_tcp_bind(),
            transfer_port: default_port(),
        }
    }
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            hello_interval_secs: 1,
            syn_interval_secs: 1,
            expiration_secs: 10,
            min_syn_interval_ms: 1000,
            dying_repeat: 3,
            dying_delay_ms: 100,
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            schedule_interval_secs: 1,
            connect_timeout_secs: 30,
            read_timeout_secs: 10,
        }
    }
}

// Default value functions
fn default_shared_dir() -> String {
    "shared".into()
}
fn default_download_dir() -> String {
    "downloads".into()
}
fn default_udp_bind() -> String {
    "0.0.0.0:4242".into()
}
fn default_broadcast() -> String {
    "255.255.255.255:4242".into()
}
fn default_tcp_bind() -> String {
    "0.0.0.0:4242".into()
}
fn default_port() -> u16 {
    4242
}
fn default_1() -> u64 {
    1
}
fn default_1_u8() -> u8 {
    1
}
fn default_3() -> u32 {
    3
}
fn default_10() -> u64 {
    10
}
fn default_30() -> u64 {
    30
}
fn default_100() -> u64 {
    100
}
fn default_1000() -> u64 {
    1000
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
