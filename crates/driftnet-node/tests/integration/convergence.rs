//! Two-node catalog convergence and file transfer on loopback.

use std::time::Duration;

use driftnet_peers::PeerState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::harness::{start_pair, wait_file};

const CONVERGE: Duration = Duration::from_secs(30);

/// Both nodes discover each other, replicate each other's catalog and
/// fetch every file in it.
#[tokio::test]
async fn test_two_node_convergence_and_download() {
    let (a, b) = start_pair().await;
    a.share_file("docs/readme.txt", b"from alpha");
    a.share_file("song.ogg", b"ogg bytes");
    b.share_file("photo.jpg", b"jpeg bytes");

    a.wait_state(&b.id, PeerState::Synchronized, CONVERGE).await;
    b.wait_state(&a.id, PeerState::Synchronized, CONVERGE).await;

    a.wait_replicated_rows(&b.id, &["photo.jpg"], CONVERGE).await;
    b.wait_replicated_rows(&a.id, &["docs/readme.txt", "song.ogg"], CONVERGE)
        .await;

    wait_file(&a.downloaded_path(&b.id, "photo.jpg"), b"jpeg bytes", CONVERGE).await;
    wait_file(
        &b.downloaded_path(&a.id, "docs/readme.txt"),
        b"from alpha",
        CONVERGE,
    )
    .await;
    wait_file(&b.downloaded_path(&a.id, "song.ogg"), b"ogg bytes", CONVERGE).await;

    a.shutdown().await;
    b.shutdown().await;
}

/// A catalog change after convergence propagates: the peer re-enters
/// INCONSISTENT, resynchronizes and downloads the new file.
#[tokio::test]
async fn test_catalog_change_repropagates() {
    let (a, b) = start_pair().await;
    a.share_file("first.txt", b"one");
    b.wait_replicated_rows(&a.id, &["first.txt"], CONVERGE).await;

    a.share_file("second.txt", b"two");
    b.wait_replicated_rows(&a.id, &["first.txt", "second.txt"], CONVERGE)
        .await;
    b.wait_state(&a.id, PeerState::Synchronized, CONVERGE).await;
    wait_file(&b.downloaded_path(&a.id, "second.txt"), b"two", CONVERGE).await;

    a.shutdown().await;
    b.shutdown().await;
}

/// The operator console answers over the same TCP port the transfers
/// use.
#[tokio::test]
async fn test_console_on_transfer_port() {
    let (a, b) = start_pair().await;
    a.share_file("visible.txt", b"x");
    b.share_file("noise.txt", b"y");
    a.wait_state(&b.id, PeerState::Synchronized, CONVERGE).await;
    // a's own catalog is published once b replicated it
    b.wait_replicated_rows(&a.id, &["visible.txt"], CONVERGE).await;

    let mut stream = tokio::net::TcpStream::connect(a.node.tcp_addr).await.unwrap();
    stream.write_all(b"a\nq\n").await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();

    assert!(out.contains("beta"), "peer table missing from: {out}");
    assert!(out.contains("visible.txt"), "catalog missing from: {out}");

    a.shutdown().await;
    b.shutdown().await;
}
