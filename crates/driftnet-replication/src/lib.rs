//! Driftnet Replication -- the versioned catalog and LIST reassembly.
//!
//! A `Catalog` is the append-only unit of replicated state: an
//! immutable-per-version list of file paths tagged with a strictly
//! increasing sequence number. Each node owns one local catalog and
//! holds one replicated catalog per synchronized peer.

use std::sync::Arc;

use tokio::sync::RwLock;

use driftnet_protocol::SENTINEL_SEQ_NUM;

pub mod reassembly;

pub use reassembly::{ListOutcome, Reassembler};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The applied version does not strictly exceed the current one.
    /// Signals a local sequencing bug, not a remote fault.
    #[error("stale update: sequence number {attempted} <= current {current}")]
    StaleUpdate { current: i64, attempted: i64 },
}

/// A versioned list of file paths.
///
/// Row order only matters for part-numbering during transfer, not for
/// correctness. Versions are immutable once published: `update`
/// replaces the whole row set or fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    rows: Vec<String>,
    seq_num: i64,
}

impl Catalog {
    /// An empty catalog holding no data yet.
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            seq_num: SENTINEL_SEQ_NUM,
        }
    }

    pub fn seq_num(&self) -> i64 {
        self.seq_num
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    /// A consistent `(seq_num, rows)` pair, never torn across versions.
    pub fn snapshot(&self) -> (i64, Vec<String>) {
        (self.seq_num, self.rows.clone())
    }

    /// Apply a specific version. The sequence number must strictly
    /// increase; on failure the catalog is left unchanged.
    pub fn update(&mut self, rows: Vec<String>, seq_num: i64) -> Result<(), CatalogError> {
        if seq_num <= self.seq_num {
            return Err(CatalogError::StaleUpdate {
                current: self.seq_num,
                attempted: seq_num,
            });
        }
        self.rows = rows;
        self.seq_num = seq_num;
        Ok(())
    }

    /// Replace the rows and bump the sequence number. Returns the new
    /// sequence number.
    pub fn replace_rows(&mut self, rows: Vec<String>) -> i64 {
        self.seq_num = self.seq_num.saturating_add(1);
        self.rows = rows;
        self.seq_num
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the node's local catalog.
///
/// Written by the directory scanner (or the console override), read by
/// the Hello and List senders. All methods take the lock once, so
/// readers observe one version, never a torn combination of two.
#[derive(Clone, Default)]
pub struct SharedCatalog {
    inner: Arc<RwLock<Catalog>>,
}

impl SharedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seq_num(&self) -> i64 {
        self.inner.read().await.seq_num()
    }

    pub async fn snapshot(&self) -> (i64, Vec<String>) {
        self.inner.read().await.snapshot()
    }

    pub async fn update(&self, rows: Vec<String>, seq_num: i64) -> Result<(), CatalogError> {
        self.inner.write().await.update(rows, seq_num)
    }

    pub async fn replace_rows(&self, rows: Vec<String>) -> i64 {
        let new_seq = self.inner.write().await.replace_rows(rows);
        tracing::debug!(seq = new_seq, "local catalog updated");
        new_seq
    }
}
