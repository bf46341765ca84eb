/// Line grammars for the kernel log and the classifier that applies them.
///
/// The log is a plain syslog/kern.log stream.  Most lines are of no interest.  The interesting
/// ones are recognized by an ordered table of grammars; the first grammar that matches decides
/// what the line is and the remaining grammars are not tried.  A line that matches no grammar is
/// dropped silently, as is a line whose numbers do not fit in a u64.
///
/// The order is: reboot marker, unmount marker, transaction open/mid/terminal, snapshot deletion
/// start/end.  The markers come first because they end sessions.
use crate::snapdel::RootId;
use crate::txn::OpenFields;

use anyhow::Result;
use regex::{Captures, Regex};
use ustr::Ustr;

const REBOOT_RE: &str = r"^(.+)kernel:.+Linux version";
const UNMOUNT_RE: &str = r"^(.+)kernel:.+zbtrfs_fs_info_fini.+FS\[([^\]]+)\]: FINI";
const TXN_OPEN_RE: &str = r"^.+ZBTRFS_TXN_COMMIT_PHASE_DONE.+FS\[([^\]]+)\]: txn\[(\d+)\] took (\d+)ms .+open=(\d+)ms .+read=(\d+)KB flushed=(\d+)/(\d+)Kb";
const TXN_MID_RE: &str =
    r"^.+ZBTRFS_TXN_COMMIT_PHASE_DONE.+FS\[([^\]]+)\]: txn\[(\d+)\] rdr1:(\d+) .+rdr2:(\d+)";
const TXN_TERMINAL_RE: &str =
    r"^.+ZBTRFS_TXN_COMMIT_PHASE_DONE.+FS\[([^\]]+)\] txn\[(\d+)\] .+rdr3:(\d+)";
const SNAP_DELETE_START_RE: &str = r"^.+kernel: \[\s*(\d+)\.\d+\s*\].+btrfs_drop_snapshot.+FS\[([^\]]+)\]: starting DELETION of root=\((\d+),(\d+)\)";
const SNAP_DELETE_END_RE: &str = r"^.+kernel: \[\s*(\d+)\.\d+\s*\].+btrfs_drop_snapshot.+FS\[([^\]]+)\]: root=\((\d+),(\d+)\) DELETED err=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Reboot,
    Unmount,
    TxnOpen,
    TxnMid,
    TxnTerminal,
    DeletionStart,
    DeletionEnd,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Reboot => "reboot",
            EventKind::Unmount => "unmount",
            EventKind::TxnOpen => "txn-open",
            EventKind::TxnMid => "txn-mid",
            EventKind::TxnTerminal => "txn-terminal",
            EventKind::DeletionStart => "delete-start",
            EventKind::DeletionEnd => "delete-end",
        }
    }
}

/// A recognized line.  `prefix` is the text before `kernel:` on marker lines, normally the syslog
/// timestamp and host name.  Deletion times are the seconds part of the kernel's uptime stamp.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Reboot {
        prefix: String,
    },
    Unmount {
        prefix: String,
        device: Ustr,
    },
    TxnOpen {
        device: Ustr,
        txn: u64,
        fields: OpenFields,
    },
    TxnMid {
        device: Ustr,
        txn: u64,
        rdr1_ms: u64,
        rdr2_ms: u64,
    },
    TxnTerminal {
        device: Ustr,
        txn: u64,
        rdr3_ms: u64,
    },
    DeletionStart {
        device: Ustr,
        root: RootId,
        secs: u64,
    },
    DeletionEnd {
        device: Ustr,
        root: RootId,
        secs: u64,
    },
}

impl LogEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LogEvent::Reboot { .. } => EventKind::Reboot,
            LogEvent::Unmount { .. } => EventKind::Unmount,
            LogEvent::TxnOpen { .. } => EventKind::TxnOpen,
            LogEvent::TxnMid { .. } => EventKind::TxnMid,
            LogEvent::TxnTerminal { .. } => EventKind::TxnTerminal,
            LogEvent::DeletionStart { .. } => EventKind::DeletionStart,
            LogEvent::DeletionEnd { .. } => EventKind::DeletionEnd,
        }
    }

    /// The device the event pertains to, None for the global reboot marker.

    pub fn device(&self) -> Option<Ustr> {
        match self {
            LogEvent::Reboot { .. } => None,
            LogEvent::Unmount { device, .. }
            | LogEvent::TxnOpen { device, .. }
            | LogEvent::TxnMid { device, .. }
            | LogEvent::TxnTerminal { device, .. }
            | LogEvent::DeletionStart { device, .. }
            | LogEvent::DeletionEnd { device, .. } => Some(*device),
        }
    }
}

type Decoder = fn(&Captures) -> Option<LogEvent>;

struct Grammar {
    kind: EventKind,
    re: Regex,
    decode: Decoder,
}

pub struct LineClassifier {
    grammars: Vec<Grammar>,
}

impl LineClassifier {
    pub fn new() -> Result<LineClassifier> {
        let table: [(EventKind, &str, Decoder); 7] = [
            (EventKind::Reboot, REBOOT_RE, decode_reboot),
            (EventKind::Unmount, UNMOUNT_RE, decode_unmount),
            (EventKind::TxnOpen, TXN_OPEN_RE, decode_txn_open),
            (EventKind::TxnMid, TXN_MID_RE, decode_txn_mid),
            (EventKind::TxnTerminal, TXN_TERMINAL_RE, decode_txn_terminal),
            (EventKind::DeletionStart, SNAP_DELETE_START_RE, decode_deletion_start),
            (EventKind::DeletionEnd, SNAP_DELETE_END_RE, decode_deletion_end),
        ];
        let mut grammars = vec![];
        for (kind, re, decode) in table {
            grammars.push(Grammar {
                kind,
                re: Regex::new(re)?,
                decode,
            });
        }
        Ok(LineClassifier { grammars })
    }

    /// Classify one line.  Returns None if no grammar matches or if the first matching grammar
    /// cannot decode the line.

    pub fn classify(&self, line: &str) -> Option<LogEvent> {
        for g in &self.grammars {
            if let Some(caps) = g.re.captures(line) {
                let event = (g.decode)(&caps);
                if event.is_none() {
                    log::debug!("Dropping {} line with out-of-range value: {line}", g.kind.name());
                }
                return event;
            }
        }
        None
    }
}

/// The text before `kernel:`, trimmed, or the empty string.

pub fn line_prefix(line: &str) -> &str {
    match line.find("kernel:") {
        Some(ix) => line[..ix].trim(),
        None => "",
    }
}

fn num(caps: &Captures, i: usize) -> Option<u64> {
    caps.get(i)?.as_str().parse::<u64>().ok()
}

fn dev(caps: &Captures, i: usize) -> Option<Ustr> {
    Some(Ustr::from(caps.get(i)?.as_str()))
}

fn decode_reboot(caps: &Captures) -> Option<LogEvent> {
    Some(LogEvent::Reboot {
        prefix: caps.get(1)?.as_str().trim().to_string(),
    })
}

fn decode_unmount(caps: &Captures) -> Option<LogEvent> {
    Some(LogEvent::Unmount {
        prefix: caps.get(1)?.as_str().trim().to_string(),
        device: dev(caps, 2)?,
    })
}

fn decode_txn_open(caps: &Captures) -> Option<LogEvent> {
    Some(LogEvent::TxnOpen {
        device: dev(caps, 1)?,
        txn: num(caps, 2)?,
        fields: OpenFields {
            took_ms: num(caps, 3)?,
            open_ms: num(caps, 4)?,
            read_kb: num(caps, 5)?,
            flushed_commit_kb: num(caps, 6)?,
            flushed_total_kb: num(caps, 7)?,
        },
    })
}

fn decode_txn_mid(caps: &Captures) -> Option<LogEvent> {
    Some(LogEvent::TxnMid {
        device: dev(caps, 1)?,
        txn: num(caps, 2)?,
        rdr1_ms: num(caps, 3)?,
        rdr2_ms: num(caps, 4)?,
    })
}

fn decode_txn_terminal(caps: &Captures) -> Option<LogEvent> {
    Some(LogEvent::TxnTerminal {
        device: dev(caps, 1)?,
        txn: num(caps, 2)?,
        rdr3_ms: num(caps, 3)?,
    })
}

fn decode_deletion_start(caps: &Captures) -> Option<LogEvent> {
    Some(LogEvent::DeletionStart {
        secs: num(caps, 1)?,
        device: dev(caps, 2)?,
        root: RootId(num(caps, 3)?, num(caps, 4)?),
    })
}

fn decode_deletion_end(caps: &Captures) -> Option<LogEvent> {
    Some(LogEvent::DeletionEnd {
        secs: num(caps, 1)?,
        device: dev(caps, 2)?,
        root: RootId(num(caps, 3)?, num(caps, 4)?),
    })
}

// Sample lines in the shape the kernel writes them, shared with the engine tests.

#[cfg(test)]
pub mod samples {
    pub fn reboot() -> String {
        "Oct 16 10:00:00 node1 kernel: [    0.000000] Linux version 3.14.79-zadara (gcc 4.8)"
            .to_string()
    }

    pub fn unmount(dev: &str) -> String {
        format!("Oct 16 11:00:00 node1 kernel: [ 3600.100200] zbtrfs_fs_info_fini:1201: FS[{dev}]: FINI")
    }

    pub fn open(dev: &str, txn: u64, took: u64, open: u64, read: u64, fc: u64, ft: u64) -> String {
        format!(
            "Oct 16 10:00:01 node1 kernel: [  101.000001] ZBTRFS_TXN_COMMIT_PHASE_DONE:3042: FS[{dev}]: txn[{txn}] took {took}ms phases: open={open}ms commit=17ms read={read}KB flushed={fc}/{ft}Kb"
        )
    }

    pub fn mid(dev: &str, txn: u64, rdr1: u64, rdr2: u64) -> String {
        format!(
            "Oct 16 10:00:01 node1 kernel: [  101.000002] ZBTRFS_TXN_COMMIT_PHASE_DONE:3050: FS[{dev}]: txn[{txn}] rdr1:{rdr1} wait rdr2:{rdr2}"
        )
    }

    pub fn terminal(dev: &str, txn: u64, rdr3: u64) -> String {
        format!(
            "Oct 16 10:00:01 node1 kernel: [  101.000003] ZBTRFS_TXN_COMMIT_PHASE_DONE:3057: FS[{dev}] txn[{txn}] done rdr3:{rdr3}"
        )
    }

    pub fn delete_start(dev: &str, a: u64, b: u64, secs: u64) -> String {
        format!(
            "Oct 16 10:00:05 node1 kernel: [ {secs}.500000] btrfs_drop_snapshot:8120: FS[{dev}]: starting DELETION of root=({a},{b})"
        )
    }

    pub fn delete_end(dev: &str, a: u64, b: u64, secs: u64) -> String {
        format!(
            "Oct 16 10:00:09 node1 kernel: [ {secs}.250000] btrfs_drop_snapshot:8290: FS[{dev}]: root=({a},{b}) DELETED err=0"
        )
    }
}

#[test]
fn test_classify_every_kind() {
    let c = LineClassifier::new().unwrap();
    let vpsa = Ustr::from("vpsa7");

    assert_eq!(
        c.classify(&samples::reboot()),
        Some(LogEvent::Reboot {
            prefix: "Oct 16 10:00:00 node1".to_string()
        })
    );
    assert_eq!(
        c.classify(&samples::unmount("vpsa7")),
        Some(LogEvent::Unmount {
            prefix: "Oct 16 11:00:00 node1".to_string(),
            device: vpsa
        })
    );
    assert_eq!(
        c.classify(&samples::open("vpsa7", 7, 120, 5, 200, 300, 4096)),
        Some(LogEvent::TxnOpen {
            device: vpsa,
            txn: 7,
            fields: OpenFields {
                took_ms: 120,
                open_ms: 5,
                read_kb: 200,
                flushed_commit_kb: 300,
                flushed_total_kb: 4096
            }
        })
    );
    assert_eq!(
        c.classify(&samples::mid("vpsa7", 7, 1, 2)),
        Some(LogEvent::TxnMid {
            device: vpsa,
            txn: 7,
            rdr1_ms: 1,
            rdr2_ms: 2
        })
    );
    assert_eq!(
        c.classify(&samples::terminal("vpsa7", 7, 3)),
        Some(LogEvent::TxnTerminal {
            device: vpsa,
            txn: 7,
            rdr3_ms: 3
        })
    );
    assert_eq!(
        c.classify(&samples::delete_start("vpsa7", 5, 100, 10)),
        Some(LogEvent::DeletionStart {
            device: vpsa,
            root: RootId(5, 100),
            secs: 10
        })
    );
    assert_eq!(
        c.classify(&samples::delete_end("vpsa7", 5, 100, 25)),
        Some(LogEvent::DeletionEnd {
            device: vpsa,
            root: RootId(5, 100),
            secs: 25
        })
    );
}

#[test]
fn test_classify_ignores_noise() {
    let c = LineClassifier::new().unwrap();
    assert!(c.classify("").is_none());
    assert!(c.classify("Oct 16 10:00:00 node1 sshd[311]: Accepted publickey for root").is_none());
    assert!(c
        .classify("Oct 16 10:00:00 node1 kernel: [  12.000000] ZBTRFS_TXN_COMMIT_PHASE_DONE:1: FS[x]: unrelated")
        .is_none());
}

#[test]
fn test_classify_root_leading_zeroes() {
    let c = LineClassifier::new().unwrap();
    let start =
        samples::delete_start("vpsa7", 5, 100, 10).replace("root=(5,100)", "root=(05,0100)");
    match c.classify(&start) {
        Some(LogEvent::DeletionStart { root, .. }) => {
            assert!(root == RootId(5, 100));
            assert!(root.to_string() == "5-100");
        }
        _ => assert!(false),
    }
}

#[test]
fn test_classify_overflow_dropped() {
    let c = LineClassifier::new().unwrap();
    let line = samples::open("vpsa7", 7, 120, 5, 200, 300, 4096)
        .replace("txn[7]", "txn[99999999999999999999999]");
    assert!(c.classify(&line).is_none());
}

#[test]
fn test_event_device_and_kind() {
    let c = LineClassifier::new().unwrap();
    let e = c.classify(&samples::mid("pool-2", 3, 1, 2)).unwrap();
    assert!(e.kind() == EventKind::TxnMid);
    assert!(e.device() == Some(Ustr::from("pool-2")));
    let e = c.classify(&samples::reboot()).unwrap();
    assert!(e.device().is_none());
    assert!(e.kind().name() == "reboot");
}

#[test]
fn test_line_prefix() {
    assert!(line_prefix(&samples::mid("a", 1, 2, 3)) == "Oct 16 10:00:01 node1");
    assert!(line_prefix("no marker here") == "");
}
