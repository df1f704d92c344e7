//! Reassembly of multi-part LIST transfers.
//!
//! UDP delivers parts out of order, duplicated, or not at all. The
//! `Reassembler` folds each LIST part into a per-sender pending
//! reception and reports when a transfer is complete. A newer
//! sequence number supersedes a partial transfer outright; an older
//! one is discarded; a disagreeing part total aborts the reception.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use driftnet_protocol::{List, PeerId};

/// In-progress reception of one catalog transfer from one sender.
#[derive(Debug)]
struct PendingReception {
    seq_num: i64,
    parts: Vec<Option<String>>,
    received: usize,
}

impl PendingReception {
    fn new(seq_num: i64, total_parts: u32) -> Self {
        Self {
            seq_num,
            parts: vec![None; total_parts as usize],
            received: 0,
        }
    }

    fn total_parts(&self) -> u32 {
        self.parts.len() as u32
    }

    fn done(&self) -> bool {
        self.received == self.parts.len()
    }

    fn receive(&mut self, peer: &PeerId, part_num: u32, data: &str) {
        let Some(slot) = self.parts.get_mut(part_num as usize) else {
            // decode guarantees part_num < total_parts; never reached
            tracing::warn!(%peer, part_num, "part number outside reception");
            return;
        };
        match slot {
            Some(existing) => {
                // Rows, once set, are immutable
                if existing != data {
                    tracing::warn!(
                        %peer,
                        part_num,
                        "received two different values for the same row"
                    );
                }
            }
            None => {
                *slot = Some(data.to_string());
                self.received += 1;
            }
        }
    }

    fn into_rows(self) -> Vec<String> {
        self.parts.into_iter().flatten().collect()
    }
}

/// What a folded LIST part amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOutcome {
    /// Part stored, transfer still missing rows.
    Incomplete,
    /// Transfer complete; commit these rows at this sequence number.
    Completed { seq_num: i64, rows: Vec<String> },
    /// Part belongs to an older transfer than the pending one.
    Stale,
    /// Part total disagreed with the pending reception; the whole
    /// reception was discarded.
    TotalMismatch,
}

/// Folds LIST parts into pending receptions, keyed by sender.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<PeerId, PendingReception>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one LIST part. On `Completed` the pending reception is
    /// consumed; on `TotalMismatch` it is discarded and the next part
    /// starts over.
    pub fn accept(&mut self, list: &List) -> ListOutcome {
        let pr = match self.pending.entry(list.sender.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().seq_num > list.seq_num {
                    return ListOutcome::Stale;
                }
                if entry.get().seq_num < list.seq_num {
                    // Newer transfer supersedes the partial one
                    tracing::debug!(
                        peer = %list.sender,
                        old_seq = entry.get().seq_num,
                        new_seq = list.seq_num,
                        "superseding pending reception"
                    );
                    entry.insert(PendingReception::new(list.seq_num, list.total_parts));
                } else if entry.get().total_parts() != list.total_parts {
                    tracing::warn!(
                        peer = %list.sender,
                        seq = list.seq_num,
                        expected = entry.get().total_parts(),
                        got = list.total_parts,
                        "LIST part total changed mid-transfer, discarding reception"
                    );
                    entry.remove();
                    return ListOutcome::TotalMismatch;
                }
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingReception::new(list.seq_num, list.total_parts))
            }
        };

        pr.receive(&list.sender, list.part_num, &list.data);
        if !pr.done() {
            return ListOutcome::Incomplete;
        }

        match self.pending.remove(&list.sender) {
            Some(pr) => ListOutcome::Completed {
                seq_num: pr.seq_num,
                rows: pr.into_rows(),
            },
            None => ListOutcome::Incomplete,
        }
    }

    /// Drop any pending reception for a sender (used when the peer is
    /// forgotten).
    pub fn discard(&mut self, peer: &PeerId) {
        self.pending.remove(peer);
    }

    /// Sequence number of the pending reception for a sender, if any.
    pub fn pending_seq(&self, peer: &PeerId) -> Option<i64> {
        self.pending.get(peer).map(|pr| pr.seq_num)
    }

    /// Senders with a reception in progress.
    pub fn pending_senders(&self) -> Vec<PeerId> {
        self.pending.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(seq_num: i64, total_parts: u32, part_num: u32, data: &str) -> List {
        List {
            sender: "remote".parse().unwrap(),
            peer: "local".parse().unwrap(),
            seq_num,
            total_parts,
            part_num,
            data: data.into(),
        }
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(&part(5, 3, 2, "c")), ListOutcome::Incomplete);
        assert_eq!(r.accept(&part(5, 3, 0, "a")), ListOutcome::Incomplete);
        assert_eq!(
            r.accept(&part(5, 3, 1, "b")),
            ListOutcome::Completed {
                seq_num: 5,
                rows: vec!["a".into(), "b".into(), "c".into()],
            }
        );
        // Reception is consumed
        assert_eq!(r.pending_seq(&"remote".parse().unwrap()), None);
    }

    #[test]
    fn test_single_part_completes_immediately() {
        let mut r = Reassembler::new();
        assert_eq!(
            r.accept(&part(1, 1, 0, "only")),
            ListOutcome::Completed {
                seq_num: 1,
                rows: vec!["only".into()],
            }
        );
    }

    #[test]
    fn test_stale_part_leaves_pending_untouched() {
        let mut r = Reassembler::new();
        r.accept(&part(5, 3, 0, "a"));
        r.accept(&part(5, 3, 1, "b"));

        assert_eq!(r.accept(&part(4, 2, 0, "old")), ListOutcome::Stale);
        assert_eq!(r.pending_seq(&"remote".parse().unwrap()), Some(5));

        // The pending transfer still completes
        assert!(matches!(
            r.accept(&part(5, 3, 2, "c")),
            ListOutcome::Completed { seq_num: 5, .. }
        ));
    }

    #[test]
    fn test_newer_part_supersedes_partial() {
        let mut r = Reassembler::new();
        r.accept(&part(5, 3, 0, "a"));
        r.accept(&part(5, 3, 1, "b"));

        assert_eq!(r.accept(&part(6, 2, 0, "x")), ListOutcome::Incomplete);
        assert_eq!(r.pending_seq(&"remote".parse().unwrap()), Some(6));
        assert_eq!(
            r.accept(&part(6, 2, 1, "y")),
            ListOutcome::Completed {
                seq_num: 6,
                rows: vec!["x".into(), "y".into()],
            }
        );
    }

    #[test]
    fn test_total_mismatch_discards_reception() {
        let mut r = Reassembler::new();
        r.accept(&part(5, 3, 0, "a"));

        assert_eq!(r.accept(&part(5, 4, 1, "b")), ListOutcome::TotalMismatch);
        assert_eq!(r.pending_seq(&"remote".parse().unwrap()), None);

        // The next part starts a fresh reception
        assert_eq!(r.accept(&part(5, 2, 0, "a")), ListOutcome::Incomplete);
        assert!(matches!(
            r.accept(&part(5, 2, 1, "b")),
            ListOutcome::Completed { seq_num: 5, .. }
        ));
    }

    #[test]
    fn test_duplicate_part_is_idempotent() {
        let mut r = Reassembler::new();
        r.accept(&part(5, 2, 0, "a"));
        assert_eq!(r.accept(&part(5, 2, 0, "a")), ListOutcome::Incomplete);
        // A conflicting duplicate keeps the first value
        assert_eq!(r.accept(&part(5, 2, 0, "other")), ListOutcome::Incomplete);
        assert_eq!(
            r.accept(&part(5, 2, 1, "b")),
            ListOutcome::Completed {
                seq_num: 5,
                rows: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn test_receptions_are_per_sender() {
        let mut r = Reassembler::new();
        let mut from_other = part(5, 2, 0, "z");
        from_other.sender = "other".parse().unwrap();

        r.accept(&part(5, 2, 0, "a"));
        assert_eq!(r.accept(&from_other), ListOutcome::Incomplete);
        assert_eq!(r.pending_seq(&"remote".parse().unwrap()), Some(5));
        assert_eq!(r.pending_seq(&"other".parse().unwrap()), Some(5));
    }

    #[test]
    fn test_discard_forgets_pending() {
        let mut r = Reassembler::new();
        r.accept(&part(5, 2, 0, "a"));
        assert_eq!(r.pending_senders(), ["remote".parse().unwrap()]);
        r.discard(&"remote".parse().unwrap());
        assert_eq!(r.pending_seq(&"remote".parse().unwrap()), None);
        assert!(r.pending_senders().is_empty());
    }
}
