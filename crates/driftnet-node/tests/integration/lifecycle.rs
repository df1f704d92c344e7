//! Peer lifecycle: voluntary departure and silent expiry.

use std::time::Duration;

use driftnet_peers::PeerState;

use crate::harness::{start_pair, start_pair_with};

const CONVERGE: Duration = Duration::from_secs(30);

/// A clean shutdown announces itself: the survivor marks the peer
/// DYING well before expiry would remove it.
#[tokio::test]
async fn test_shutdown_announces_dying() {
    let (a, b) = start_pair().await;
    a.wait_state(&b.id, PeerState::Heard, CONVERGE).await;

    let b_id = b.id.clone();
    b.shutdown().await;

    a.wait_state(&b_id, PeerState::Dying, Duration::from_secs(5))
        .await;
    a.shutdown().await;
}

/// A peer that vanishes without a DYING burst is forgotten once its
/// record expires, replicated catalog included.
#[tokio::test]
async fn test_silent_peer_expires() {
    let (a, b) = start_pair_with(
        |cfg| cfg.gossip.expiration_secs = 3,
        |cfg| {
            cfg.gossip.expiration_secs = 3;
            // Simulate a crash: the shutdown burst sends nothing
            cfg.gossip.dying_repeat = 0;
        },
    )
    .await;
    a.wait_state(&b.id, PeerState::Heard, CONVERGE).await;

    let b_id = b.id.clone();
    b.shutdown().await;

    a.wait_forgotten(&b_id, Duration::from_secs(10)).await;
    a.shutdown().await;
}
