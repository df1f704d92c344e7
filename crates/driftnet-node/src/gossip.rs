//! Gossip actor loops -- one task per protocol role.
//!
//! Senders tick on a timer and read shared state; receivers drain the
//! bounded queue the multiplexer feeds them. Every per-message failure
//! is contained: a malformed envelope or a peer-table rejection aborts
//! that message, never the loop.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, Mutex};

use driftnet_peers::{PeerState, PeerTable};
use driftnet_protocol::{Dying, Envelope, Hello, List, Message, PeerId, Syn, MAX_HELLO_PEERS};
use driftnet_replication::{ListOutcome, Reassembler, SharedCatalog};

use crate::mux::MuxHandle;

/// Bound of the list sender's transfer-request queue.
const TRANSFER_QUEUE: usize = 32;

/// How often the list receiver drops pending receptions whose sender
/// has expired from the peer table.
const RECEPTION_PRUNE_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically broadcast HELLO: our catalog version plus a digest of
/// the peers we believe alive.
pub async fn run_hello_sender(
    mux: MuxHandle,
    table: PeerTable,
    catalog: SharedCatalog,
    local: PeerId,
    hello_interval: u8,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = Duration::from_secs(u64::from(hello_interval.max(1)));
    // Stagger the first broadcast so a whole LAN booting at once does
    // not tick in lockstep.
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    tokio::time::sleep(jitter).await;

    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let seq_num = catalog.seq_num().await;
                let peers: Vec<PeerId> = table
                    .records()
                    .await
                    .into_iter()
                    .filter(|rec| rec.state != PeerState::Dying)
                    .map(|rec| rec.id)
                    .take(MAX_HELLO_PEERS)
                    .collect();
                let hello = Hello {
                    sender: local.clone(),
                    seq_num,
                    hello_interval,
                    peers,
                };
                tracing::trace!(seq = seq_num, "broadcasting HELLO");
                mux.broadcast(Message::Hello(hello)).await;
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// Update the peer table for every HELLO that is not our own.
pub async fn run_hello_receiver(
    mut incoming: mpsc::Receiver<Envelope>,
    table: PeerTable,
    local: PeerId,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            env = incoming.recv() => {
                let Some(env) = env else { return };
                let Message::Hello(hello) = env.msg else { continue };
                if hello.sender == local {
                    continue; // our own HELLO looped back
                }
                if let Err(e) = table.update(&hello.sender, env.addr, hello.seq_num).await {
                    tracing::warn!(peer = %hello.sender, "HELLO rejected: {e}");
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// Periodically send SYN to every peer that still needs synchronizing,
/// throttled per peer by the table.
pub async fn run_syn_sender(
    mux: MuxHandle,
    table: PeerTable,
    local: PeerId,
    syn_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut timer = tokio::time::interval(syn_interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                for rec in table.records().await {
                    if !table.request_synchronize(&rec.id).await {
                        continue;
                    }
                    tracing::debug!(peer = %rec.id, seq = rec.pending_seq_num, "sending SYN");
                    let syn = Syn {
                        sender: local.clone(),
                        peer: rec.id,
                        seq_num: rec.pending_seq_num,
                    };
                    mux.send(Envelope::new(rec.addr, Message::Syn(syn))).await;
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// Answer SYNs addressed to us: record the sighting, then ask the list
/// sender to stream our catalog back.
pub async fn run_syn_receiver(
    mut incoming: mpsc::Receiver<Envelope>,
    table: PeerTable,
    list_sender: ListSenderHandle,
    local: PeerId,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            env = incoming.recv() => {
                let Some(env) = env else { return };
                let Message::Syn(syn) = env.msg else { continue };
                if syn.peer != local {
                    continue; // not for me
                }
                if let Err(e) = table.update(&syn.sender, env.addr, syn.seq_num).await {
                    tracing::warn!(peer = %syn.sender, "SYN rejected: {e}");
                    continue;
                }
                list_sender.request(env.addr, syn.sender).await;
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// A queued request to stream the local catalog to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub addr: SocketAddr,
    pub peer: PeerId,
}

/// Handle for queueing catalog transfers. A duplicate request for a
/// pair already in flight is dropped.
#[derive(Clone)]
pub struct ListSenderHandle {
    tx: mpsc::Sender<TransferRequest>,
    in_flight: Arc<Mutex<HashSet<(SocketAddr, PeerId)>>>,
}

impl ListSenderHandle {
    pub async fn request(&self, addr: SocketAddr, peer: PeerId) {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert((addr, peer.clone())) {
                tracing::debug!(%peer, "transfer already queued, dropping duplicate");
                return;
            }
        }
        if self.tx.send(TransferRequest { addr, peer }).await.is_err() {
            tracing::warn!("list sender queue closed, request dropped");
        }
    }
}

pub fn list_sender_channel() -> (ListSenderHandle, mpsc::Receiver<TransferRequest>) {
    let (tx, rx) = mpsc::channel(TRANSFER_QUEUE);
    let handle = ListSenderHandle {
        tx,
        in_flight: Arc::new(Mutex::new(HashSet::new())),
    };
    (handle, rx)
}

/// Stream the local catalog, one LIST per row. The (seq_num, rows)
/// snapshot is captured once per transfer; a catalog update mid-send
/// never mixes versions.
pub async fn run_list_sender(
    handle: ListSenderHandle,
    mut requests: mpsc::Receiver<TransferRequest>,
    mux: MuxHandle,
    catalog: SharedCatalog,
    local: PeerId,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            req = requests.recv() => {
                let Some(req) = req else { return };
                handle
                    .in_flight
                    .lock()
                    .await
                    .remove(&(req.addr, req.peer.clone()));

                let (seq_num, rows) = catalog.snapshot().await;
                let total_parts = rows.len() as u32;
                if total_parts == 0 {
                    tracing::debug!(peer = %req.peer, "catalog empty, nothing to stream");
                    continue;
                }
                tracing::debug!(
                    peer = %req.peer,
                    seq = seq_num,
                    parts = total_parts,
                    "streaming catalog"
                );
                for (part_num, data) in rows.into_iter().enumerate() {
                    let list = List {
                        sender: local.clone(),
                        peer: req.peer.clone(),
                        seq_num,
                        total_parts,
                        part_num: part_num as u32,
                        data,
                    };
                    mux.send(Envelope::new(req.addr, Message::List(list))).await;
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// Reassemble LIST parts addressed to us and commit completed
/// transfers into the peer table.
pub async fn run_list_receiver(
    mut incoming: mpsc::Receiver<Envelope>,
    table: PeerTable,
    local: PeerId,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut reassembler = Reassembler::new();
    let mut prune = tokio::time::interval(RECEPTION_PRUNE_INTERVAL);
    prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            env = incoming.recv() => {
                let Some(env) = env else { return };
                let Message::List(list) = env.msg else { continue };
                if list.peer != local {
                    continue; // not for me
                }
                handle_list(&mut reassembler, &table, env.addr, list).await;
            }
            _ = prune.tick() => {
                prune_forgotten(&mut reassembler, &table).await;
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// Drop pending receptions from senders the table no longer holds, so
/// a peer that expired mid-transfer does not leave a partial reception
/// behind forever.
async fn prune_forgotten(reassembler: &mut Reassembler, table: &PeerTable) {
    for peer in reassembler.pending_senders() {
        if table.get(&peer).await.is_none() {
            tracing::debug!(%peer, "dropping pending reception from forgotten peer");
            reassembler.discard(&peer);
        }
    }
}

async fn handle_list(
    reassembler: &mut Reassembler,
    table: &PeerTable,
    addr: SocketAddr,
    list: List,
) {
    if let Err(e) = table.update(&list.sender, addr, list.seq_num).await {
        tracing::warn!(peer = %list.sender, "LIST rejected: {e}");
        return;
    }
    let Some(rec) = table.get(&list.sender).await else {
        return;
    };
    if rec.state == PeerState::Synchronized {
        // Already holding this version, the part is redundant
        return;
    }

    match reassembler.accept(&list) {
        ListOutcome::Completed { seq_num, rows } => {
            if let Err(e) = table.synchronize(&list.sender, rows, seq_num).await {
                tracing::warn!(peer = %list.sender, "cannot synchronize peer: {e}");
            }
        }
        ListOutcome::Incomplete | ListOutcome::Stale | ListOutcome::TotalMismatch => {}
    }
}

/// Mark senders of DYING messages as dying.
pub async fn run_dying_receiver(
    mut incoming: mpsc::Receiver<Envelope>,
    table: PeerTable,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            env = incoming.recv() => {
                let Some(env) = env else { return };
                let Message::Dying(dying) = env.msg else { continue };
                if let Err(e) = table.die(&dying.sender, env.addr).await {
                    tracing::warn!(peer = %dying.sender, "DYING rejected: {e}");
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// Broadcast a short DYING burst. Run once, as a shutdown hook; the
/// repeats are redundancy against datagram loss.
pub async fn send_dying_burst(mux: &MuxHandle, local: &PeerId, repeat: u32, delay: Duration) {
    tracing::info!(repeat, "broadcasting DYING burst");
    for _ in 0..repeat {
        mux.broadcast(Message::Dying(Dying {
            sender: local.clone(),
        }))
        .await;
        tokio::time::sleep(delay).await;
    }
}
