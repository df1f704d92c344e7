//! Shared-directory scanner.
//!
//! Walks the node's shared directory on a timer and publishes the file
//! listing as catalog rows. The catalog version only moves when the
//! listing actually changed.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;

use driftnet_protocol::MAX_LIST_DATA_BYTES;
use driftnet_replication::SharedCatalog;

/// Collect the relative paths of every regular file under `dir`,
/// sorted, `/`-separated regardless of platform. Paths too long to fit
/// a LIST datagram are skipped with a warning.
pub fn scan_rows(dir: &Path) -> io::Result<Vec<String>> {
    let mut rows = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else if let Some(row) = relative_row(dir, &path) {
                if row.len() > MAX_LIST_DATA_BYTES {
                    tracing::warn!(row, "scanner: path too long to share, skipping");
                    continue;
                }
                rows.push(row);
            }
        }
    }
    rows.sort();
    Ok(rows)
}

fn relative_row(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

/// One scan pass: read the directory, publish if the listing changed.
/// Returns true when the catalog was bumped.
pub async fn scan_once(catalog: &SharedCatalog, dir: &Path) -> io::Result<bool> {
    let rows = scan_rows(dir)?;
    let (_, current) = catalog.snapshot().await;
    if rows == current {
        return Ok(false);
    }
    let seq = catalog.replace_rows(rows.clone()).await;
    tracing::info!(seq, files = rows.len(), "scanner: catalog updated");
    Ok(true)
}

/// Periodic scanner task. A missing or unreadable directory is logged
/// and retried on the next tick.
pub async fn run_scanner(
    catalog: SharedCatalog,
    dir: PathBuf,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(dir = %dir.display(), "scanner: cannot create shared dir: {e}");
    }
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = timer.tick() => {
                if let Err(e) = scan_once(&catalog, &dir).await {
                    tracing::warn!(dir = %dir.display(), "scanner: scan failed: {e}");
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftnet_protocol::SENTINEL_SEQ_NUM;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_scan_rows_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "zeta.txt");
        touch(dir.path(), "alpha.txt");
        touch(dir.path(), "sub/nested.txt");
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let rows = scan_rows(dir.path()).unwrap();
        assert_eq!(rows, vec!["alpha.txt", "sub/nested.txt", "zeta.txt"]);
    }

    #[test]
    fn test_scan_rows_skips_overlong_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ok.txt");
        // Split across two components so each stays under the OS filename
        // limit while the relative row still exceeds MAX_LIST_DATA_BYTES.
        let half = MAX_LIST_DATA_BYTES / 2;
        touch(
            dir.path(),
            &format!("{}/{}", "a".repeat(half), "a".repeat(half + 1)),
        );

        let rows = scan_rows(dir.path()).unwrap();
        assert_eq!(rows, vec!["ok.txt"]);
    }

    #[tokio::test]
    async fn test_scan_once_bumps_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SharedCatalog::new();
        assert_eq!(catalog.seq_num().await, SENTINEL_SEQ_NUM);

        // Empty dir matches the empty catalog: no bump
        assert!(!scan_once(&catalog, dir.path()).await.unwrap());
        assert_eq!(catalog.seq_num().await, SENTINEL_SEQ_NUM);

        touch(dir.path(), "one.txt");
        assert!(scan_once(&catalog, dir.path()).await.unwrap());
        let seq_after_add = catalog.seq_num().await;
        assert!(seq_after_add > SENTINEL_SEQ_NUM);

        // Unchanged directory leaves the version alone
        assert!(!scan_once(&catalog, dir.path()).await.unwrap());
        assert_eq!(catalog.seq_num().await, seq_after_add);

        // Removal is a change too
        std::fs::remove_file(dir.path().join("one.txt")).unwrap();
        assert!(scan_once(&catalog, dir.path()).await.unwrap());
        assert!(catalog.seq_num().await > seq_after_add);
        assert!(catalog.snapshot().await.1.is_empty());
    }
}
