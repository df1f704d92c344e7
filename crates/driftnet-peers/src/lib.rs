//! Driftnet Peers -- thread-safe directory of known peers.
//!
//! Maps PeerId → PeerRecord: liveness state, advertised and replicated
//! sequence numbers, and the peer's replicated catalog. All state
//! transitions go through this table's methods; callers only ever see
//! point-in-time clones.
//!
//! Per-record state machine:
//!   first sighting → HEARD
//!   advertised seq > replicated seq → INCONSISTENT
//!   successful synchronize → SYNCHRONIZED
//!   DYING message → DYING (terminal intent, overrides everything)
//!   expiry → removed entirely, replicated catalog included

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use driftnet_protocol::{PeerId, SENTINEL_SEQ_NUM};
use driftnet_replication::{Catalog, CatalogError};

/// A record not refreshed within this window is forgotten.
pub const EXPIRATION: Duration = Duration::from_secs(10);

/// Minimum delay between two SYNs to the same peer.
pub const MIN_SYN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A second sighting of a known ID from a different address is a
    /// spoofing signal, never a silent rebind.
    #[error("peer {peer} seen from {got}, previously {known}")]
    AddressMismatch {
        peer: PeerId,
        known: SocketAddr,
        got: SocketAddr,
    },
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Seen, nothing advertised beyond what we hold.
    Heard,
    /// The peer advertised a catalog version we have not replicated.
    Inconsistent,
    /// Our replica matches the peer's latest advertised version.
    Synchronized,
    /// The peer announced its own shutdown.
    Dying,
}

impl PeerState {
    pub fn name(&self) -> &'static str {
        match self {
            PeerState::Heard => "heard",
            PeerState::Inconsistent => "inconsistent",
            PeerState::Synchronized => "synchronized",
            PeerState::Dying => "dying",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-peer state. The address is fixed for the record's lifetime.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub state: PeerState,
    /// Highest version the peer advertised, replicated or not.
    pub pending_seq_num: i64,
    /// The peer's replicated catalog, once a transfer completed.
    pub catalog: Option<Catalog>,
    expires_at: Instant,
    next_syn_at: Instant,
}

impl PeerRecord {
    fn new(id: PeerId, addr: SocketAddr, now: Instant, expiration: Duration) -> Self {
        Self {
            id,
            addr,
            state: PeerState::Heard,
            pending_seq_num: SENTINEL_SEQ_NUM,
            catalog: None,
            expires_at: now + expiration,
            next_syn_at: now,
        }
    }

    /// Sequence number of the replicated catalog, or the sentinel if
    /// no transfer has completed yet.
    pub fn replicated_seq_num(&self) -> i64 {
        self.catalog
            .as_ref()
            .map(Catalog::seq_num)
            .unwrap_or(SENTINEL_SEQ_NUM)
    }
}

/// Expiry and throttling knobs. Defaults match the wire protocol;
/// tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct TableTunables {
    pub expiration: Duration,
    pub min_syn_interval: Duration,
}

impl Default for TableTunables {
    fn default() -> Self {
        Self {
            expiration: EXPIRATION,
            min_syn_interval: MIN_SYN_INTERVAL,
        }
    }
}

/// Thread-safe shared peer table.
#[derive(Clone)]
pub struct PeerTable {
    inner: Arc<RwLock<HashMap<PeerId, PeerRecord>>>,
    tunables: TableTunables,
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTable {
    pub fn new() -> Self {
        Self::with_tunables(TableTunables::default())
    }

    pub fn with_tunables(tunables: TableTunables) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            tunables,
        }
    }

    /// Record a sighting: create-or-refresh the record, remember the
    /// advertised sequence number, and mark the peer INCONSISTENT when
    /// it advertises more than we have replicated.
    pub async fn update(
        &self,
        id: &PeerId,
        addr: SocketAddr,
        seq_num: i64,
    ) -> Result<(), TableError> {
        let mut table = self.inner.write().await;
        let now = Instant::now();
        let rec = table.entry(id.clone()).or_insert_with(|| {
            tracing::info!(%id, %addr, "table: peer added");
            PeerRecord::new(id.clone(), addr, now, self.tunables.expiration)
        });

        if rec.addr != addr {
            return Err(TableError::AddressMismatch {
                peer: id.clone(),
                known: rec.addr,
                got: addr,
            });
        }

        rec.expires_at = now + self.tunables.expiration;
        rec.pending_seq_num = seq_num;
        if rec.state != PeerState::Dying && rec.replicated_seq_num() < seq_num {
            if rec.state != PeerState::Inconsistent {
                tracing::debug!(%id, seq = seq_num, "table: peer inconsistent");
            }
            rec.state = PeerState::Inconsistent;
        }
        Ok(())
    }

    /// Record a voluntary shutdown announcement. Unknown peers are a
    /// no-op; a known peer's address must match.
    pub async fn die(&self, id: &PeerId, addr: SocketAddr) -> Result<(), TableError> {
        let mut table = self.inner.write().await;
        let Some(rec) = table.get_mut(id) else {
            return Ok(());
        };
        if rec.addr != addr {
            return Err(TableError::AddressMismatch {
                peer: id.clone(),
                known: rec.addr,
                got: addr,
            });
        }
        if rec.state != PeerState::Dying {
            tracing::info!(%id, "table: peer dying");
        }
        rec.state = PeerState::Dying;
        Ok(())
    }

    /// Commit a completed catalog transfer for a known peer and mark
    /// it SYNCHRONIZED. The version check is the catalog's own.
    pub async fn synchronize(
        &self,
        id: &PeerId,
        rows: Vec<String>,
        seq_num: i64,
    ) -> Result<(), TableError> {
        let mut table = self.inner.write().await;
        let rec = table
            .get_mut(id)
            .ok_or_else(|| TableError::UnknownPeer(id.clone()))?;

        rec.catalog.get_or_insert_with(Catalog::new).update(rows, seq_num)?;
        rec.expires_at = Instant::now() + self.tunables.expiration;
        if rec.state != PeerState::Dying {
            rec.state = PeerState::Synchronized;
            tracing::info!(%id, seq = seq_num, "table: peer synchronized");
        }
        Ok(())
    }

    /// Per-peer SYN throttle: true at most once per `min_syn_interval`
    /// and only while the peer still needs synchronizing.
    pub async fn request_synchronize(&self, id: &PeerId) -> bool {
        let mut table = self.inner.write().await;
        let Some(rec) = table.get_mut(id) else {
            return false;
        };
        if !matches!(rec.state, PeerState::Heard | PeerState::Inconsistent) {
            return false;
        }
        let now = Instant::now();
        if now < rec.next_syn_at {
            return false;
        }
        rec.next_syn_at = now + self.tunables.min_syn_interval;
        true
    }

    /// Snapshot of all live records. Runs the expiry sweep first, so
    /// callers never observe a record past its expiration.
    pub async fn records(&self) -> Vec<PeerRecord> {
        let mut table = self.inner.write().await;
        Self::sweep(&mut table);
        table.values().cloned().collect()
    }

    /// Snapshot of one record, post-sweep.
    pub async fn get(&self, id: &PeerId) -> Option<PeerRecord> {
        let mut table = self.inner.write().await;
        Self::sweep(&mut table);
        table.get(id).cloned()
    }

    fn sweep(table: &mut HashMap<PeerId, PeerRecord>) {
        let now = Instant::now();
        table.retain(|id, rec| {
            let live = now <= rec.expires_at;
            if !live {
                tracing::info!(%id, state = %rec.state, "table: peer expired");
            }
            live
        });
    }
}
