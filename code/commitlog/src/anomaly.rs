/// Protocol and temporal anomalies found while correlating log lines.
///
/// None of these are fatal.  The state machine that detects one resets itself to its idle state,
/// dropping whatever partial record it held, and the engine logs the anomaly and counts it against
/// the session.
use crate::snapdel::RootId;

use thiserror::Error;
use ustr::Ustr;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Anomaly {
    #[error("FS[{device}] txn={txn} opened while still processing txn={pending}")]
    OverlappingTransaction { device: Ustr, txn: u64, pending: u64 },

    #[error("FS[{device}] txn={txn} mid-phase line while pending txn={}", show_txn(.pending))]
    UnexpectedMid {
        device: Ustr,
        txn: u64,
        pending: Option<u64>,
    },

    #[error("FS[{device}] txn={txn} terminal line while pending txn={}", show_txn(.pending))]
    UnexpectedTerminal {
        device: Ustr,
        txn: u64,
        pending: Option<u64>,
    },

    #[error("FS[{device}] txn={txn} completed with only {fields} of {required} values collected")]
    IncompleteTransaction {
        device: Ustr,
        txn: u64,
        fields: usize,
        required: usize,
    },

    #[error("FS[{device}] txn={txn} already recorded, new values dropped")]
    DuplicateTransaction { device: Ustr, txn: u64 },

    #[error("FS[{device}] deletion of root={root} begins while root={pending} is still deleting")]
    OverlappingDeletion {
        device: Ustr,
        root: RootId,
        pending: RootId,
    },

    #[error("FS[{device}] deletion of root={root} ends while deleting root={}", show_root(.pending))]
    UnexpectedDeletionEnd {
        device: Ustr,
        root: RootId,
        pending: Option<RootId>,
    },

    #[error("FS[{device}] deletion of root={root} started at {start_secs} but ended at {end_secs}")]
    DeletionClockOrder {
        device: Ustr,
        root: RootId,
        start_secs: u64,
        end_secs: u64,
    },
}

impl Anomaly {
    /// True for the anomaly kinds that concern end-before-start timing rather than line order.

    pub fn is_temporal(&self) -> bool {
        matches!(self, Anomaly::DeletionClockOrder { .. })
    }
}

fn show_txn(t: &Option<u64>) -> String {
    match t {
        Some(t) => t.to_string(),
        None => "none".to_string(),
    }
}

fn show_root(r: &Option<RootId>) -> String {
    match r {
        Some(r) => r.to_string(),
        None => "none".to_string(),
    }
}

#[test]
fn test_anomaly_messages() {
    let device = Ustr::from("vpsa1");
    let a = Anomaly::UnexpectedMid {
        device,
        txn: 8,
        pending: None,
    };
    assert_eq!(a.to_string(), "FS[vpsa1] txn=8 mid-phase line while pending txn=none");
    let a = Anomaly::UnexpectedDeletionEnd {
        device,
        root: RootId(5, 200),
        pending: Some(RootId(5, 100)),
    };
    assert_eq!(
        a.to_string(),
        "FS[vpsa1] deletion of root=5-200 ends while deleting root=5-100"
    );
    assert!(!a.is_temporal());
    let a = Anomaly::DeletionClockOrder {
        device,
        root: RootId(5, 100),
        start_secs: 30,
        end_secs: 10,
    };
    assert!(a.is_temporal());
}
