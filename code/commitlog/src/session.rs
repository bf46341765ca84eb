/// Live state and accumulated statistics for one device between its first appearance in the log
/// and the flush that ends it.
use crate::anomaly::Anomaly;
use crate::histogram::CommitHistogram;
use crate::sink::{FlushReason, FlushedSession};
use crate::snapdel::{PendingDeletion, SnapshotDeletionTracker};
use crate::txn::{CommitRecord, PendingTransaction, TransactionAssembler};

use std::collections::BTreeMap;
use ustr::Ustr;

#[derive(Debug)]
pub struct DeviceSession {
    pub(crate) device: Ustr,

    // Creation order within the engine, used to flush in a deterministic order.
    pub(crate) serial: u64,

    pub(crate) start_marker: String,
    pub(crate) txns: TransactionAssembler,
    pub(crate) deletions: SnapshotDeletionTracker,
    histogram: CommitHistogram,
    commits: BTreeMap<u64, CommitRecord>,
    pub(crate) anomalies: usize,
}

impl DeviceSession {
    pub(crate) fn new(device: Ustr, serial: u64, start_marker: &str) -> DeviceSession {
        DeviceSession {
            device,
            serial,
            start_marker: start_marker.to_string(),
            txns: TransactionAssembler::new(),
            deletions: SnapshotDeletionTracker::new(),
            histogram: CommitHistogram::new(),
            commits: BTreeMap::new(),
            anomalies: 0,
        }
    }

    pub fn device(&self) -> Ustr {
        self.device
    }

    pub fn start_marker(&self) -> &str {
        &self.start_marker
    }

    pub fn pending_transaction(&self) -> Option<&PendingTransaction> {
        self.txns.pending()
    }

    pub fn pending_deletion(&self) -> Option<PendingDeletion> {
        self.deletions.in_flight()
    }

    pub fn histogram(&self) -> &CommitHistogram {
        &self.histogram
    }

    pub fn commit(&self, txn: u64) -> Option<&CommitRecord> {
        self.commits.get(&txn)
    }

    pub fn num_commits(&self) -> usize {
        self.commits.len()
    }

    pub fn num_deletions(&self) -> usize {
        self.deletions.records().len()
    }

    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    /// Add a completed transaction.  The histogram always takes the commit.  The raw table keeps
    /// the first record for a transaction id; a later record with the same id is rejected.

    pub(crate) fn add_commit(&mut self, record: CommitRecord) -> Result<(), Anomaly> {
        self.histogram.add_commit(&record);
        if self.commits.contains_key(&record.txn) {
            return Err(Anomaly::DuplicateTransaction {
                device: self.device,
                txn: record.txn,
            });
        }
        self.commits.insert(record.txn, record);
        Ok(())
    }

    pub(crate) fn into_flushed(self, seq: usize, reason: FlushReason) -> FlushedSession {
        FlushedSession {
            seq,
            device: self.device,
            start_marker: self.start_marker,
            reason,
            histogram: self.histogram.rows(),
            commits: self.commits.into_values().collect(),
            deletions: self.deletions.into_records(),
            anomalies: self.anomalies,
        }
    }
}

#[cfg(test)]
fn record(txn: u64, took_ms: u64, flushed_total_kb: u64) -> CommitRecord {
    CommitRecord {
        txn,
        took_ms,
        open_ms: 1,
        read_kb: 2,
        flushed_commit_kb: 3,
        flushed_total_kb,
        rdr1_ms: 4,
        rdr2_ms: 5,
        rdr3_ms: 6,
    }
}

#[test]
fn test_session_commits_sorted_and_unique() {
    let mut s = DeviceSession::new(Ustr::from("vpsa1"), 0, "Oct 16 10:00:00 node1");
    s.add_commit(record(9, 10, 100)).unwrap();
    s.add_commit(record(7, 20, 5000)).unwrap();
    let dup = s.add_commit(record(9, 99, 100));
    assert!(matches!(dup, Err(Anomaly::DuplicateTransaction { txn: 9, .. })));

    // The first record wins
    assert!(s.commit(9).unwrap().took_ms == 10);
    assert!(s.num_commits() == 2);

    let f = s.into_flushed(3, FlushReason::Unmount);
    assert!(f.seq == 3);
    assert!(f.start_marker == "Oct 16 10:00:00 node1");
    assert!(f.commits.iter().map(|c| c.txn).collect::<Vec<u64>>() == vec![7, 9]);
    assert!(!f.is_empty());

    // The duplicate was still counted in its bucket
    assert!(f.histogram[0].bucket_mb == 1 && f.histogram[0].commits == 2);
    assert!(f.histogram[0].max_time_ms == 99);
}

#[test]
fn test_session_empty() {
    let s = DeviceSession::new(Ustr::from("vpsa1"), 0, "");
    assert!(s.pending_transaction().is_none());
    assert!(s.pending_deletion().is_none());
    let f = s.into_flushed(0, FlushReason::Reboot);
    assert!(f.is_empty());
    assert!(f.histogram.is_empty());
}
