/// Tracker for snapshot deletions on one device.
///
/// A deletion is bounded by a start line and an end line that both name the root being deleted.
/// At most one deletion is in flight per device.  The kernel can in principle interleave, but it
/// doesn't in practice, and when a second start arrives while one is in flight the first one is
/// abandoned: the new start wins and an anomaly is reported.
use crate::anomaly::Anomaly;

use std::fmt;
use ustr::Ustr;

/// The composite identifier of a snapshot root, `root=(a,b)` in the log and `a-b` when printed.
/// The parts are numbers, so leading zeroes are lost: `root=(05,100)` is the same root as
/// `root=(5,100)` and prints as `5-100`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(pub u64, pub u64);

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}

/// A completed deletion.  `elapsed_secs` is never negative since an end that precedes its start is
/// rejected.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDeletionRecord {
    pub root: RootId,
    pub start_secs: u64,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDeletion {
    pub root: RootId,
    pub start_secs: u64,
}

#[derive(Debug, Default)]
pub struct SnapshotDeletionTracker {
    in_flight: Option<PendingDeletion>,

    // The index of a record is its position in this vector.
    completed: Vec<SnapshotDeletionRecord>,
}

impl SnapshotDeletionTracker {
    pub fn new() -> SnapshotDeletionTracker {
        Default::default()
    }

    pub fn in_flight(&self) -> Option<PendingDeletion> {
        self.in_flight
    }

    pub fn records(&self) -> &[SnapshotDeletionRecord] {
        &self.completed
    }

    pub fn into_records(self) -> Vec<SnapshotDeletionRecord> {
        self.completed
    }

    /// Record the start of a deletion.  The start is recorded even when an anomaly is returned.

    pub fn start(&mut self, device: Ustr, root: RootId, start_secs: u64) -> Result<(), Anomaly> {
        let previous = self.in_flight.replace(PendingDeletion { root, start_secs });
        match previous {
            Some(p) => Err(Anomaly::OverlappingDeletion {
                device,
                root,
                pending: p.root,
            }),
            None => Ok(()),
        }
    }

    /// Record the end of a deletion.  On success returns the index of the new record.  The
    /// in-flight state is cleared whatever the outcome.

    pub fn end(&mut self, device: Ustr, root: RootId, end_secs: u64) -> Result<usize, Anomaly> {
        match self.in_flight.take() {
            Some(p) if p.root == root => {
                if end_secs < p.start_secs {
                    return Err(Anomaly::DeletionClockOrder {
                        device,
                        root,
                        start_secs: p.start_secs,
                        end_secs,
                    });
                }
                self.completed.push(SnapshotDeletionRecord {
                    root,
                    start_secs: p.start_secs,
                    elapsed_secs: end_secs - p.start_secs,
                });
                Ok(self.completed.len() - 1)
            }
            pending => Err(Anomaly::UnexpectedDeletionEnd {
                device,
                root,
                pending: pending.map(|p| p.root),
            }),
        }
    }
}

#[cfg(test)]
fn dev() -> Ustr {
    Ustr::from("vpsa1")
}

#[test]
fn test_deletion_matched() {
    let mut t = SnapshotDeletionTracker::new();
    t.start(dev(), RootId(5, 100), 10).unwrap();
    assert!(t.in_flight() == Some(PendingDeletion { root: RootId(5, 100), start_secs: 10 }));
    assert_eq!(t.end(dev(), RootId(5, 100), 25), Ok(0));
    assert!(t.in_flight().is_none());
    assert_eq!(
        t.records(),
        &[SnapshotDeletionRecord {
            root: RootId(5, 100),
            start_secs: 10,
            elapsed_secs: 15
        }]
    );
    assert_eq!(t.records()[0].root.to_string(), "5-100");

    // Indices are sequential
    t.start(dev(), RootId(5, 101), 30).unwrap();
    assert_eq!(t.end(dev(), RootId(5, 101), 30), Ok(1));
    assert!(t.records()[1].elapsed_secs == 0);
}

#[test]
fn test_deletion_mismatched_root() {
    let mut t = SnapshotDeletionTracker::new();
    t.start(dev(), RootId(5, 100), 10).unwrap();
    let r = t.end(dev(), RootId(5, 200), 25);
    assert!(matches!(
        r,
        Err(Anomaly::UnexpectedDeletionEnd { pending: Some(RootId(5, 100)), .. })
    ));
    assert!(t.in_flight().is_none());
    assert!(t.records().is_empty());
}

#[test]
fn test_deletion_end_without_start() {
    let mut t = SnapshotDeletionTracker::new();
    let r = t.end(dev(), RootId(5, 100), 25);
    assert!(matches!(r, Err(Anomaly::UnexpectedDeletionEnd { pending: None, .. })));
    assert!(t.records().is_empty());
}

#[test]
fn test_deletion_clock_order() {
    let mut t = SnapshotDeletionTracker::new();
    t.start(dev(), RootId(5, 100), 30).unwrap();
    let r = t.end(dev(), RootId(5, 100), 29);
    assert!(matches!(r, Err(Anomaly::DeletionClockOrder { start_secs: 30, end_secs: 29, .. })));
    assert!(t.in_flight().is_none());
    assert!(t.records().is_empty());
}

#[test]
fn test_deletion_last_start_wins() {
    let mut t = SnapshotDeletionTracker::new();
    t.start(dev(), RootId(5, 100), 10).unwrap();
    let r = t.start(dev(), RootId(5, 101), 12);
    assert!(matches!(
        r,
        Err(Anomaly::OverlappingDeletion { root: RootId(5, 101), pending: RootId(5, 100), .. })
    ));
    assert!(t.in_flight() == Some(PendingDeletion { root: RootId(5, 101), start_secs: 12 }));

    // The abandoned deletion can no longer be completed
    assert!(t.end(dev(), RootId(5, 100), 20).is_err());
    assert!(t.records().is_empty());
}
