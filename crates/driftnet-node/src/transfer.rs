//! TCP file transfer: serving side, downloading side, and the
//! download scheduler.
//!
//! One listener serves everything on the node's TCP port. A connection
//! whose first line is `get <path>` gets the file-transfer exchange;
//! any other first line drops into the operator console.
//!
//! Wire exchange for `get`:
//!   -> get <path>\n
//!   <- <path>\n
//!   <- <byte length>\n
//!   <- <exactly that many raw bytes>, then close
//!
//! Every served or written path must resolve inside its base
//! directory; traversal components are rejected before any file I/O.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};

use driftnet_peers::{PeerState, PeerTable};
use driftnet_protocol::PeerId;

use crate::console;

/// Bound of the download request queue.
const DOWNLOAD_QUEUE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("path {0:?} escapes the shared directory")]
    PathEscape(String),
    #[error("peer {0} is not available for download")]
    PeerUnavailable(PeerId),
    #[error("malformed transfer response: {0}")]
    BadResponse(String),
    #[error("timed out during {0}")]
    Timeout(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Join `row` onto `base`, refusing any component that could step
/// outside it. Returns the resolved path.
pub fn resolve_within(base: &Path, row: &str) -> Result<PathBuf, TransferError> {
    if row.is_empty() {
        return Err(TransferError::PathEscape(row.into()));
    }
    let mut resolved = base.to_path_buf();
    for component in Path::new(row).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TransferError::PathEscape(row.into()));
            }
        }
    }
    Ok(resolved)
}

/// Everything a connection handler needs, cheap to clone per accept.
#[derive(Clone)]
pub struct TransferContext {
    pub table: PeerTable,
    pub catalog: driftnet_replication::SharedCatalog,
    pub shared_dir: PathBuf,
}

/// Accept loop for the node's TCP port. Connection handlers run as
/// detached tasks; a handler failure only loses that connection.
pub async fn run_listener(
    listener: TcpListener,
    ctx: TransferContext,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                tracing::debug!(%addr, "connection ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("transfer: accept failed: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("transfer listener shutting down");
                return;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: &TransferContext) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half);

    let mut first = String::new();
    if lines.read_line(&mut first).await? == 0 {
        return Ok(());
    }
    let first = first.trim_end_matches(['\r', '\n']);

    if let Some(row) = first.strip_prefix("get ") {
        match serve_file(&ctx.shared_dir, row, &mut write_half).await {
            Ok(len) => tracing::debug!(row, len, "transfer: served file"),
            Err(e) => tracing::warn!(row, "transfer: refusing get: {e}"),
        }
        return Ok(());
    }

    console::run_session(first, &mut lines, &mut write_half, ctx).await
}

/// Serve one `get`: resolve, read, answer with the header lines and
/// the raw body. Returns the byte length served.
async fn serve_file(
    shared_dir: &Path,
    row: &str,
    out: &mut (impl AsyncWriteExt + Unpin),
) -> Result<u64, TransferError> {
    let path = resolve_within(shared_dir, row)?;
    let body = tokio::fs::read(&path).await?;
    let len = body.len() as u64;
    out.write_all(format!("{row}\n{len}\n").as_bytes()).await?;
    out.write_all(&body).await?;
    out.flush().await?;
    Ok(len)
}

/// A queued `(peer, row)` download.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadRequest {
    pub peer: PeerId,
    pub row: String,
}

/// Handle for queueing downloads, with in-flight dedup like the list
/// sender's.
#[derive(Clone)]
pub struct DownloaderHandle {
    tx: mpsc::Sender<DownloadRequest>,
    in_flight: Arc<Mutex<HashSet<DownloadRequest>>>,
}

impl DownloaderHandle {
    pub async fn request(&self, peer: PeerId, row: String) {
        let req = DownloadRequest { peer, row };
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(req.clone()) {
                return;
            }
        }
        if self.tx.send(req).await.is_err() {
            tracing::warn!("downloader queue closed, request dropped");
        }
    }
}

pub fn downloader_channel() -> (DownloaderHandle, mpsc::Receiver<DownloadRequest>) {
    let (tx, rx) = mpsc::channel(DOWNLOAD_QUEUE);
    let handle = DownloaderHandle {
        tx,
        in_flight: Arc::new(Mutex::new(HashSet::new())),
    };
    (handle, rx)
}

/// Timeouts and destination knobs for the downloading side.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Downloads land here, one subdirectory per peer. Distinct from
    /// the shared directory so the scanner never re-shares them.
    pub download_dir: PathBuf,
    /// TCP port peers serve transfers on.
    pub transfer_port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Drain the download queue one request at a time. A failed download
/// is logged and dropped; the scheduler re-queues it on the peer's
/// next catalog change.
pub async fn run_downloader(
    handle: DownloaderHandle,
    mut requests: mpsc::Receiver<DownloadRequest>,
    table: PeerTable,
    cfg: DownloaderConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            req = requests.recv() => {
                let Some(req) = req else { return };
                handle.in_flight.lock().await.remove(&req);
                match download_one(&table, &cfg, &req).await {
                    Ok(len) => {
                        tracing::info!(peer = %req.peer, row = req.row, len, "downloaded");
                    }
                    Err(e) => {
                        tracing::warn!(peer = %req.peer, row = req.row, "download failed: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

async fn download_one(
    table: &PeerTable,
    cfg: &DownloaderConfig,
    req: &DownloadRequest,
) -> Result<u64, TransferError> {
    // Destination check first, before touching the network
    let peer_dir = cfg.download_dir.join(req.peer.as_str());
    let dest = resolve_within(&peer_dir, &req.row)?;

    let addr = peer_transfer_addr(table, &req.peer, cfg.transfer_port).await?;

    let stream = tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransferError::Timeout("connect"))??;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half
        .write_all(format!("get {}\n", req.row).as_bytes())
        .await?;
    write_half.flush().await?;

    let echoed = read_response_line(&mut reader, cfg.read_timeout).await?;
    if echoed != req.row {
        return Err(TransferError::BadResponse(format!(
            "asked for {:?}, offered {:?}",
            req.row, echoed
        )));
    }
    let len_line = read_response_line(&mut reader, cfg.read_timeout).await?;
    let len: u64 = len_line
        .parse()
        .map_err(|_| TransferError::BadResponse(format!("bad length {len_line:?}")))?;

    let mut body = vec![0u8; len as usize];
    tokio::time::timeout(cfg.read_timeout, reader.read_exact(&mut body))
        .await
        .map_err(|_| TransferError::Timeout("body read"))??;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&dest, &body).await?;
    Ok(len)
}

/// Look up a peer's transfer address: its recorded gossip IP on the
/// well-known TCP port. Unknown and dying peers are refused.
async fn peer_transfer_addr(
    table: &PeerTable,
    peer: &PeerId,
    port: u16,
) -> Result<SocketAddr, TransferError> {
    let rec = table
        .get(peer)
        .await
        .ok_or_else(|| TransferError::PeerUnavailable(peer.clone()))?;
    if rec.state == PeerState::Dying {
        return Err(TransferError::PeerUnavailable(peer.clone()));
    }
    Ok(SocketAddr::new(rec.addr.ip(), port))
}

async fn read_response_line(
    reader: &mut (impl AsyncBufReadExt + Unpin),
    timeout: Duration,
) -> Result<String, TransferError> {
    let mut line = String::new();
    let n = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| TransferError::Timeout("header read"))??;
    if n == 0 {
        return Err(TransferError::BadResponse("connection closed early".into()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Periodic download scheduler. Whenever a peer's replicated catalog
/// version changes, every row of that catalog is queued; the peer's
/// files land under `downloads/<peer>/`. No per-row diffing.
pub async fn run_scheduler(
    table: PeerTable,
    downloader: DownloaderHandle,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut last_seq: HashMap<PeerId, i64> = HashMap::new();
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let records = table.records().await;
                // Forgotten peers drop out of the tracking map, so a
                // re-appearing peer is scheduled afresh.
                let live: HashSet<&PeerId> = records.iter().map(|r| &r.id).collect();
                last_seq.retain(|id, _| live.contains(id));

                for rec in &records {
                    let Some(catalog) = &rec.catalog else { continue };
                    let seq = catalog.seq_num();
                    if last_seq.get(&rec.id) == Some(&seq) {
                        continue;
                    }
                    tracing::debug!(
                        peer = %rec.id,
                        seq,
                        rows = catalog.rows().len(),
                        "scheduling downloads"
                    );
                    for row in catalog.rows() {
                        downloader.request(rec.id.clone(), row.clone()).await;
                    }
                    last_seq.insert(rec.id.clone(), seq);
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}
