//! Driftnet Node -- library crate for the runnable LAN file-sharing
//! node.
//!
//! Exposes the wiring as a library so integration tests can boot whole
//! nodes on loopback; `main.rs` only adds the CLI around it.

pub mod config;
pub mod console;
pub mod gossip;
pub mod mux;
pub mod scanner;
pub mod transfer;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use driftnet_peers::{PeerTable, TableTunables};
use driftnet_protocol::PeerId;
use driftnet_replication::SharedCatalog;

use config::NodeConfig;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

/// The configured peer ID, or one derived from the hostname: stripped
/// to alphanumerics and truncated to 16 chars.
pub fn local_peer_id(configured: &str) -> anyhow::Result<PeerId> {
    if !configured.is_empty() {
        return PeerId::new(configured).context("invalid node.id in config");
    }
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut derived: String = host.chars().filter(char::is_ascii_alphanumeric).collect();
    derived.truncate(driftnet_protocol::MAX_ID_LEN);
    if derived.is_empty() {
        derived = "node".into();
    }
    PeerId::new(derived).context("hostname-derived id invalid")
}

/// A fully wired node: the UDP multiplexer, the eight gossip actors,
/// the scanner, the TCP listener, the downloader and the scheduler.
pub struct RunningNode {
    pub local_id: PeerId,
    pub table: PeerTable,
    pub catalog: SharedCatalog,
    pub mux: mux::MuxHandle,
    /// Actual bound addresses, for configs that bind port 0.
    pub udp_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    dying_repeat: u32,
    dying_delay: Duration,
}

impl RunningNode {
    /// Fires when the node stops itself, e.g. after losing the gossip
    /// socket.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Announce departure, stop every task and wait for them.
    pub async fn shutdown(self) {
        gossip::send_dying_burst(&self.mux, &self.local_id, self.dying_repeat, self.dying_delay)
            .await;
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub async fn start(cfg: NodeConfig) -> anyhow::Result<RunningNode> {
    let local_id = local_peer_id(&cfg.node.id)?;
    let shared_dir = expand_tilde(&cfg.node.shared_dir);
    let download_dir = expand_tilde(&cfg.node.download_dir);

    let udp_bind: SocketAddr = cfg
        .network
        .udp_bind
        .parse()
        .context("invalid network.udp_bind")?;
    let broadcast_addr: SocketAddr = cfg
        .network
        .broadcast_addr
        .parse()
        .context("invalid network.broadcast_addr")?;
    let tcp_bind: SocketAddr = cfg
        .network
        .tcp_bind
        .parse()
        .context("invalid network.tcp_bind")?;

    let mut mux = mux::MuxDemux::bind(udp_bind, broadcast_addr)
        .await
        .context("cannot bind gossip socket")?;
    let udp_addr = mux.local_addr()?;
    let listener = tokio::net::TcpListener::bind(tcp_bind)
        .await
        .context("cannot bind transfer listener")?;
    let tcp_addr = listener.local_addr()?;

    let table = PeerTable::with_tunables(TableTunables {
        expiration: Duration::from_secs(cfg.gossip.expiration_secs),
        min_syn_interval: Duration::from_millis(cfg.gossip.min_syn_interval_ms),
    });
    let catalog = SharedCatalog::new();
    let mux_handle = mux.handle();

    tracing::info!(
        id = %local_id,
        %udp_addr,
        %tcp_addr,
        shared = %shared_dir.display(),
        "starting driftnet node"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    // Every receiver loop gets its own fan-out subscription and picks
    // the message kind it cares about.
    let hello_rx = mux.subscribe();
    let syn_rx = mux.subscribe();
    let list_rx = mux.subscribe();
    let dying_rx = mux.subscribe();

    // The multiplexer returning on its own means the socket failed;
    // escalate to a full node shutdown either way.
    tasks.push(tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        let shutdown = shutdown_tx.subscribe();
        async move {
            mux.run(shutdown).await;
            let _ = shutdown_tx.send(());
        }
    }));

    tasks.push(tokio::spawn(gossip::run_hello_sender(
        mux_handle.clone(),
        table.clone(),
        catalog.clone(),
        local_id.clone(),
        cfg.gossip.hello_interval_secs,
        shutdown_tx.subscribe(),
    )));
    tasks.push(tokio::spawn(gossip::run_hello_receiver(
        hello_rx,
        table.clone(),
        local_id.clone(),
        shutdown_tx.subscribe(),
    )));
    tasks.push(tokio::spawn(gossip::run_syn_sender(
        mux_handle.clone(),
        table.clone(),
        local_id.clone(),
        Duration::from_secs(cfg.gossip.syn_interval_secs.max(1)),
        shutdown_tx.subscribe(),
    )));

    let (list_sender, list_requests) = gossip::list_sender_channel();
    tasks.push(tokio::spawn(gossip::run_syn_receiver(
        syn_rx,
        table.clone(),
        list_sender.clone(),
        local_id.clone(),
        shutdown_tx.subscribe(),
    )));
    tasks.push(tokio::spawn(gossip::run_list_sender(
        list_sender,
        list_requests,
        mux_handle.clone(),
        catalog.clone(),
        local_id.clone(),
        shutdown_tx.subscribe(),
    )));
    tasks.push(tokio::spawn(gossip::run_list_receiver(
        list_rx,
        table.clone(),
        local_id.clone(),
        shutdown_tx.subscribe(),
    )));
    tasks.push(tokio::spawn(gossip::run_dying_receiver(
        dying_rx,
        table.clone(),
        shutdown_tx.subscribe(),
    )));

    tasks.push(tokio::spawn(scanner::run_scanner(
        catalog.clone(),
        shared_dir.clone(),
        Duration::from_secs(cfg.node.scan_interval_secs.max(1)),
        shutdown_tx.subscribe(),
    )));

    let ctx = transfer::TransferContext {
        table: table.clone(),
        catalog: catalog.clone(),
        shared_dir: shared_dir.clone(),
    };
    tasks.push(tokio::spawn(transfer::run_listener(
        listener,
        ctx,
        shutdown_tx.subscribe(),
    )));

    let (downloader, download_requests) = transfer::downloader_channel();
    tasks.push(tokio::spawn(transfer::run_downloader(
        downloader.clone(),
        download_requests,
        table.clone(),
        transfer::DownloaderConfig {
            download_dir,
            transfer_port: cfg.network.transfer_port,
            connect_timeout: Duration::from_secs(cfg.transfer.connect_timeout_secs),
            read_timeout: Duration::from_secs(cfg.transfer.read_timeout_secs),
        },
        shutdown_tx.subscribe(),
    )));
    tasks.push(tokio::spawn(transfer::run_scheduler(
        table.clone(),
        downloader,
        Duration::from_secs(cfg.transfer.schedule_interval_secs.max(1)),
        shutdown_tx.subscribe(),
    )));

    Ok(RunningNode {
        local_id,
        table,
        catalog,
        mux: mux_handle,
        udp_addr,
        tcp_addr,
        shutdown_tx,
        tasks,
        dying_repeat: cfg.gossip.dying_repeat,
        dying_delay: Duration::from_millis(cfg.gossip.dying_delay_ms),
    })
}
