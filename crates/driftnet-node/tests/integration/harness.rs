//! Test harness for in-process driftnet-node integration tests.
//!
//! Boots whole nodes on loopback. Broadcast has no meaning on the
//! loopback interface, so each node's broadcast address is pointed
//! straight at its partner's gossip port; the protocol cannot tell
//! the difference.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use driftnet_node::config::NodeConfig;
use driftnet_node::RunningNode;
use driftnet_peers::PeerState;
use driftnet_protocol::PeerId;

/// One in-process node plus its temp directories.
pub struct TestNode {
    pub node: RunningNode,
    pub id: PeerId,
    shared: tempfile::TempDir,
    downloads: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestNode {
    pub async fn shutdown(self) {
        self.node.shutdown().await;
    }

    /// Drop a file into this node's shared directory; the scanner
    /// picks it up on its next pass.
    pub fn share_file(&self, rel: &str, contents: &[u8]) {
        let path = self.shared.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    /// Where a download from `peer` would land.
    pub fn downloaded_path(&self, peer: &PeerId, rel: &str) -> PathBuf {
        self.downloads.path().join(peer.as_str()).join(rel)
    }

    /// Poll the peer table until `peer` reaches `state`.
    pub async fn wait_state(&self, peer: &PeerId, state: PeerState, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let rec = self.node.table.get(peer).await;
            if rec.as_ref().map(|r| r.state) == Some(state) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{}: timeout waiting for {peer} to reach {state}, record: {:?}",
                self.id,
                rec.map(|r| r.state)
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Poll until `peer`'s replicated catalog rows equal `expected`.
    pub async fn wait_replicated_rows(
        &self,
        peer: &PeerId,
        expected: &[&str],
        timeout: Duration,
    ) {
        let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let rows: Option<Vec<String>> = self
                .node
                .table
                .get(peer)
                .await
                .and_then(|r| r.catalog.map(|c| c.rows().to_vec()));
            if rows.as_deref() == Some(expected.as_slice()) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{}: timeout waiting for replica of {peer} to equal {expected:?}, have {rows:?}",
                self.id
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Poll until the peer table no longer holds `peer`.
    pub async fn wait_forgotten(&self, peer: &PeerId, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.node.table.get(peer).await.is_some() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "{}: timeout waiting for {peer} to be forgotten",
                self.id
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Poll until `path` exists with the given contents.
pub async fn wait_file(path: &Path, contents: &[u8], timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if std::fs::read(path).ok().as_deref() == Some(contents) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timeout waiting for {} to appear",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn reserve_udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn reserve_tcp_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn loopback(port: u16) -> String {
    SocketAddr::from(([127, 0, 0, 1], port)).to_string()
}

struct NodePorts {
    udp: u16,
    peer_udp: u16,
    tcp: u16,
    peer_tcp: u16,
}

async fn build_node(name: &str, ports: NodePorts, tweak: &dyn Fn(&mut NodeConfig)) -> TestNode {
    let shared = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();

    let mut cfg = NodeConfig::default();
    cfg.node.id = name.into();
    cfg.node.shared_dir = shared.path().to_str().unwrap().into();
    cfg.node.download_dir = downloads.path().to_str().unwrap().into();
    cfg.node.scan_interval_secs = 1;
    cfg.network.udp_bind = loopback(ports.udp);
    cfg.network.broadcast_addr = loopback(ports.peer_udp);
    cfg.network.tcp_bind = loopback(ports.tcp);
    cfg.network.transfer_port = ports.peer_tcp;
    tweak(&mut cfg);

    let id = cfg.node.id.parse().unwrap();
    let node = driftnet_node::start(cfg).await.unwrap();
    TestNode {
        node,
        id,
        shared,
        downloads,
    }
}

/// Two nodes aimed at each other on loopback, with per-node config
/// tweaks applied before start.
pub async fn start_pair_with(
    tweak_a: impl Fn(&mut NodeConfig),
    tweak_b: impl Fn(&mut NodeConfig),
) -> (TestNode, TestNode) {
    let udp_a = reserve_udp_port();
    let udp_b = reserve_udp_port();
    let tcp_a = reserve_tcp_port();
    let tcp_b = reserve_tcp_port();

    let a = build_node(
        "alpha",
        NodePorts {
            udp: udp_a,
            peer_udp: udp_b,
            tcp: tcp_a,
            peer_tcp: tcp_b,
        },
        &tweak_a,
    )
    .await;
    let b = build_node(
        "beta",
        NodePorts {
            udp: udp_b,
            peer_udp: udp_a,
            tcp: tcp_b,
            peer_tcp: tcp_a,
        },
        &tweak_b,
    )
    .await;
    (a, b)
}

pub async fn start_pair() -> (TestNode, TestNode) {
    start_pair_with(|_| {}, |_| {}).await
}
