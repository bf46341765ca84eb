/// Assembler for transaction commits on one device.
///
/// The kernel reports a completed commit in three lines, all carrying the transaction id:
///
///  - the open line with the total time, the open phase time, the data read and the data flushed
///    (this commit and total)
///  - the mid line with two reader latencies, rdr1 and rdr2
///  - the terminal line with the third reader latency, rdr3
///
/// The lines for one transaction are consecutive as far as that device is concerned, but lines
/// for other devices may be interleaved.  Any deviation from open-mid-terminal with a matching id
/// drops the transaction and returns the assembler to idle.
use crate::anomaly::Anomaly;

use ustr::Ustr;

/// Number of values a complete transaction carries.

pub const TXN_FIELDS: usize = 8;

/// The values carried by an open line.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFields {
    pub took_ms: u64,
    pub open_ms: u64,
    pub read_kb: u64,
    pub flushed_commit_kb: u64,
    pub flushed_total_kb: u64,
}

/// A transaction for which the open line has been seen but that may still be missing values.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub txn: u64,
    took_ms: Option<u64>,
    open_ms: Option<u64>,
    read_kb: Option<u64>,
    flushed_commit_kb: Option<u64>,
    flushed_total_kb: Option<u64>,
    rdr1_ms: Option<u64>,
    rdr2_ms: Option<u64>,
    rdr3_ms: Option<u64>,
}

impl PendingTransaction {
    fn open(txn: u64, f: &OpenFields) -> PendingTransaction {
        PendingTransaction {
            txn,
            took_ms: Some(f.took_ms),
            open_ms: Some(f.open_ms),
            read_kb: Some(f.read_kb),
            flushed_commit_kb: Some(f.flushed_commit_kb),
            flushed_total_kb: Some(f.flushed_total_kb),
            rdr1_ms: None,
            rdr2_ms: None,
            rdr3_ms: None,
        }
    }

    /// The number of values that have been set.

    pub fn fields_set(&self) -> usize {
        [
            self.took_ms,
            self.open_ms,
            self.read_kb,
            self.flushed_commit_kb,
            self.flushed_total_kb,
            self.rdr1_ms,
            self.rdr2_ms,
            self.rdr3_ms,
        ]
        .iter()
        .filter(|x| x.is_some())
        .count()
    }

    pub fn is_complete(&self) -> bool {
        self.fields_set() == TXN_FIELDS
    }

    fn finish(&self) -> Option<CommitRecord> {
        Some(CommitRecord {
            txn: self.txn,
            took_ms: self.took_ms?,
            open_ms: self.open_ms?,
            read_kb: self.read_kb?,
            flushed_commit_kb: self.flushed_commit_kb?,
            flushed_total_kb: self.flushed_total_kb?,
            rdr1_ms: self.rdr1_ms?,
            rdr2_ms: self.rdr2_ms?,
            rdr3_ms: self.rdr3_ms?,
        })
    }
}

/// A fully assembled transaction.  Times are in ms and sizes in KB.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    pub txn: u64,
    pub took_ms: u64,
    pub open_ms: u64,
    pub read_kb: u64,
    pub flushed_commit_kb: u64,
    pub flushed_total_kb: u64,
    pub rdr1_ms: u64,
    pub rdr2_ms: u64,
    pub rdr3_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnPhase {
    Idle,
    Opening,
    Mid,
}

#[derive(Debug, Default)]
pub struct TransactionAssembler {
    pending: Option<PendingTransaction>,
}

impl TransactionAssembler {
    pub fn new() -> TransactionAssembler {
        Default::default()
    }

    pub fn pending(&self) -> Option<&PendingTransaction> {
        self.pending.as_ref()
    }

    pub fn phase(&self) -> TxnPhase {
        match self.pending {
            None => TxnPhase::Idle,
            Some(ref p) if p.rdr1_ms.is_some() => TxnPhase::Mid,
            Some(_) => TxnPhase::Opening,
        }
    }

    /// Start a new transaction.  The new transaction is installed even when an anomaly is
    /// returned for the one it displaced.

    pub fn open(&mut self, device: Ustr, txn: u64, fields: &OpenFields) -> Result<(), Anomaly> {
        let previous = self.pending.replace(PendingTransaction::open(txn, fields));
        match previous {
            Some(p) => Err(Anomaly::OverlappingTransaction {
                device,
                txn,
                pending: p.txn,
            }),
            None => Ok(()),
        }
    }

    pub fn mid(&mut self, device: Ustr, txn: u64, rdr1_ms: u64, rdr2_ms: u64) -> Result<(), Anomaly> {
        if let Some(ref mut p) = self.pending {
            if p.txn == txn {
                p.rdr1_ms = Some(rdr1_ms);
                p.rdr2_ms = Some(rdr2_ms);
                return Ok(());
            }
        }
        Err(Anomaly::UnexpectedMid {
            device,
            txn,
            pending: self.pending.take().map(|p| p.txn),
        })
    }

    /// Complete the pending transaction.  The assembler is idle afterwards whatever the outcome.

    pub fn terminal(&mut self, device: Ustr, txn: u64, rdr3_ms: u64) -> Result<CommitRecord, Anomaly> {
        match self.pending.take() {
            Some(mut p) if p.txn == txn => {
                p.rdr3_ms = Some(rdr3_ms);
                match p.finish() {
                    Some(record) => Ok(record),
                    None => Err(Anomaly::IncompleteTransaction {
                        device,
                        txn,
                        fields: p.fields_set(),
                        required: TXN_FIELDS,
                    }),
                }
            }
            pending => Err(Anomaly::UnexpectedTerminal {
                device,
                txn,
                pending: pending.map(|p| p.txn),
            }),
        }
    }
}

#[cfg(test)]
fn dev() -> Ustr {
    Ustr::from("vpsa1")
}

#[cfg(test)]
fn open7() -> OpenFields {
    OpenFields {
        took_ms: 120,
        open_ms: 5,
        read_kb: 200,
        flushed_commit_kb: 300,
        flushed_total_kb: 4096,
    }
}

#[test]
fn test_txn_three_phases() {
    let mut a = TransactionAssembler::new();
    assert!(a.phase() == TxnPhase::Idle);
    a.open(dev(), 7, &open7()).unwrap();
    assert!(a.phase() == TxnPhase::Opening);
    assert!(a.pending().unwrap().fields_set() == 5);
    assert!(!a.pending().unwrap().is_complete());
    a.mid(dev(), 7, 1, 2).unwrap();
    assert!(a.phase() == TxnPhase::Mid);
    let r = a.terminal(dev(), 7, 3).unwrap();
    assert!(a.phase() == TxnPhase::Idle);
    assert_eq!(
        r,
        CommitRecord {
            txn: 7,
            took_ms: 120,
            open_ms: 5,
            read_kb: 200,
            flushed_commit_kb: 300,
            flushed_total_kb: 4096,
            rdr1_ms: 1,
            rdr2_ms: 2,
            rdr3_ms: 3
        }
    );
}

#[test]
fn test_txn_overlapping_open() {
    let mut a = TransactionAssembler::new();
    a.open(dev(), 7, &open7()).unwrap();
    let r = a.open(dev(), 8, &open7());
    assert!(matches!(r, Err(Anomaly::OverlappingTransaction { txn: 8, pending: 7, .. })));

    // The new transaction replaced the old one
    assert!(a.pending().unwrap().txn == 8);
    assert!(a.mid(dev(), 7, 1, 2).is_err());
    assert!(a.phase() == TxnPhase::Idle);
}

#[test]
fn test_txn_mismatched_mid() {
    let mut a = TransactionAssembler::new();
    a.open(dev(), 7, &open7()).unwrap();
    let r = a.mid(dev(), 9, 1, 2);
    assert!(matches!(r, Err(Anomaly::UnexpectedMid { txn: 9, pending: Some(7), .. })));
    assert!(a.phase() == TxnPhase::Idle);

    // Terminal for the dropped transaction is an anomaly too
    let r = a.terminal(dev(), 7, 3);
    assert!(matches!(r, Err(Anomaly::UnexpectedTerminal { txn: 7, pending: None, .. })));
}

#[test]
fn test_txn_mid_when_idle() {
    let mut a = TransactionAssembler::new();
    let r = a.mid(dev(), 7, 1, 2);
    assert!(matches!(r, Err(Anomaly::UnexpectedMid { pending: None, .. })));
    assert!(a.phase() == TxnPhase::Idle);
}

#[test]
fn test_txn_mismatched_terminal() {
    let mut a = TransactionAssembler::new();
    a.open(dev(), 7, &open7()).unwrap();
    a.mid(dev(), 7, 1, 2).unwrap();
    let r = a.terminal(dev(), 6, 3);
    assert!(matches!(r, Err(Anomaly::UnexpectedTerminal { txn: 6, pending: Some(7), .. })));
    assert!(a.phase() == TxnPhase::Idle);
}

#[test]
fn test_txn_short_record() {
    // Open followed directly by terminal leaves rdr1 and rdr2 unset
    let mut a = TransactionAssembler::new();
    a.open(dev(), 7, &open7()).unwrap();
    let r = a.terminal(dev(), 7, 3);
    assert!(matches!(
        r,
        Err(Anomaly::IncompleteTransaction { txn: 7, fields: 6, required: 8, .. })
    ));
    assert!(a.phase() == TxnPhase::Idle);
}

#[test]
fn test_txn_repeated_mid_overwrites() {
    let mut a = TransactionAssembler::new();
    a.open(dev(), 7, &open7()).unwrap();
    a.mid(dev(), 7, 1, 2).unwrap();
    a.mid(dev(), 7, 4, 5).unwrap();
    let r = a.terminal(dev(), 7, 3).unwrap();
    assert!(r.rdr1_ms == 4 && r.rdr2_ms == 5 && r.rdr3_ms == 3);
}
