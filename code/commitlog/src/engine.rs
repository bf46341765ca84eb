/// The correlation engine: one per logical log stream.
///
/// The engine owns the device session store and the output sequence counter.  Lines are fed to it
/// one at a time in arrival order; each line is classified and the resulting event is applied to
/// the session for its device, creating the session if needed.  Reboot and unmount markers flush
/// sessions through a `SessionSink` and discard them.
///
/// Two independent log streams (say, from two hosts) must never share an engine, since device
/// names and transaction ids are only meaningful within one stream.
use crate::anomaly::Anomaly;
use crate::grammar::{line_prefix, LineClassifier, LogEvent};
use crate::session::DeviceSession;
use crate::sink::{FlushReason, SessionSink};

use anyhow::Result;
use itertools::Itertools;
use rustutils::DeviceGlobber;
use std::collections::HashMap;
use ustr::Ustr;

#[derive(Default)]
pub struct EngineConfig {
    /// If true, a flushed session that recorded neither commits nor deletions is discarded
    /// without output and without consuming an output sequence number.
    pub skip_empty_sessions: bool,

    /// If not empty, only lines for matching devices are considered.
    pub devices: DeviceGlobber,
}

/// Running totals for the whole stream.  `commits` counts the distinct commits that went into the
/// raw tables.  A duplicate transaction id is still counted in its histogram bucket, so the
/// histogram totals are `commits + duplicate_commits`.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub lines: u64,
    pub events: u64,
    pub filtered: u64,
    pub commits: u64,
    pub duplicate_commits: u64,
    pub deletions: u64,
    pub protocol_anomalies: u64,
    pub temporal_anomalies: u64,
    pub sessions_created: u64,
    pub sessions_flushed: u64,
    pub sessions_skipped: u64,
}

impl EngineStats {
    pub fn anomalies(&self) -> u64 {
        self.protocol_anomalies + self.temporal_anomalies
    }
}

pub struct Engine {
    classifier: LineClassifier,
    config: EngineConfig,
    sessions: HashMap<Ustr, DeviceSession>,
    next_serial: u64,
    next_seq: usize,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Engine> {
        Ok(Engine {
            classifier: LineClassifier::new()?,
            config,
            sessions: HashMap::new(),
            next_serial: 0,
            next_seq: 0,
            stats: Default::default(),
        })
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn session(&self, device: &str) -> Option<&DeviceSession> {
        self.sessions.get(&Ustr::from(device))
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Classify and apply one line.  Errors come only from the sink.

    pub fn feed_line(&mut self, line: &str, sink: &mut dyn SessionSink) -> Result<()> {
        self.stats.lines += 1;
        if let Some(event) = self.classifier.classify(line) {
            self.apply(event, line_prefix(line), sink)?;
        }
        Ok(())
    }

    /// Apply one event.  `marker` is the start marker recorded if the event creates a session.

    pub fn apply(&mut self, event: LogEvent, marker: &str, sink: &mut dyn SessionSink) -> Result<()> {
        if let Some(device) = event.device() {
            if !self.config.devices.is_empty() && !self.config.devices.matches(&device) {
                self.stats.filtered += 1;
                return Ok(());
            }
        }
        self.stats.events += 1;

        match event {
            LogEvent::Reboot { prefix } => {
                log::info!("{prefix}: Reboot/crash seen, flush all stats");
                self.flush_all(FlushReason::Reboot, sink)?;
            }
            LogEvent::Unmount { prefix, device } => {
                log::info!("{prefix}: Unmount/delete FS[{device}] seen, flush stats");
                self.get_session(device, marker);
                self.flush_one(device, FlushReason::Unmount, sink)?;
            }
            LogEvent::TxnOpen {
                device,
                txn,
                fields,
            } => {
                let s = self.get_session(device, marker);
                let r = s.txns.open(device, txn, &fields);
                self.note(device, r.err());
            }
            LogEvent::TxnMid {
                device,
                txn,
                rdr1_ms,
                rdr2_ms,
            } => {
                let s = self.get_session(device, marker);
                let r = s.txns.mid(device, txn, rdr1_ms, rdr2_ms);
                self.note(device, r.err());
            }
            LogEvent::TxnTerminal {
                device,
                txn,
                rdr3_ms,
            } => {
                let s = self.get_session(device, marker);
                let r = s
                    .txns
                    .terminal(device, txn, rdr3_ms)
                    .and_then(|record| s.add_commit(record));
                match r {
                    Ok(()) => self.stats.commits += 1,
                    Err(Anomaly::DuplicateTransaction { .. }) => self.stats.duplicate_commits += 1,
                    Err(_) => {}
                }
                self.note(device, r.err());
            }
            LogEvent::DeletionStart { device, root, secs } => {
                let s = self.get_session(device, marker);
                let r = s.deletions.start(device, root, secs);
                self.note(device, r.err());
            }
            LogEvent::DeletionEnd { device, root, secs } => {
                let s = self.get_session(device, marker);
                let r = s.deletions.end(device, root, secs);
                if r.is_ok() {
                    self.stats.deletions += 1;
                }
                self.note(device, r.err());
            }
        }
        Ok(())
    }

    /// Flush every remaining session.  Call this once when the input is exhausted.

    pub fn finish(&mut self, sink: &mut dyn SessionSink) -> Result<()> {
        self.flush_all(FlushReason::EndOfInput, sink)
    }

    fn get_session(&mut self, device: Ustr, marker: &str) -> &mut DeviceSession {
        let stats = &mut self.stats;
        let next_serial = &mut self.next_serial;
        self.sessions.entry(device).or_insert_with(|| {
            log::info!("Initializing stats for FS[{device}]");
            stats.sessions_created += 1;
            let serial = *next_serial;
            *next_serial += 1;
            DeviceSession::new(device, serial, marker)
        })
    }

    fn note(&mut self, device: Ustr, anomaly: Option<Anomaly>) {
        if let Some(a) = anomaly {
            log::warn!("{a}");
            if a.is_temporal() {
                self.stats.temporal_anomalies += 1;
            } else {
                self.stats.protocol_anomalies += 1;
            }
            if let Some(s) = self.sessions.get_mut(&device) {
                s.anomalies += 1;
            }
        }
    }

    fn flush_all(&mut self, reason: FlushReason, sink: &mut dyn SessionSink) -> Result<()> {
        let sessions = self
            .sessions
            .drain()
            .map(|(_, s)| s)
            .sorted_by_key(|s| s.serial)
            .collect::<Vec<DeviceSession>>();
        for s in sessions {
            self.flush_session(s, reason, sink)?;
        }
        Ok(())
    }

    fn flush_one(&mut self, device: Ustr, reason: FlushReason, sink: &mut dyn SessionSink) -> Result<()> {
        if let Some(s) = self.sessions.remove(&device) {
            self.flush_session(s, reason, sink)?;
        }
        Ok(())
    }

    fn flush_session(
        &mut self,
        session: DeviceSession,
        reason: FlushReason,
        sink: &mut dyn SessionSink,
    ) -> Result<()> {
        if let Some(p) = session.pending_transaction() {
            log::info!(
                "FS[{}] txn={} still pending at {}, dropped",
                session.device,
                p.txn,
                reason.name()
            );
        }
        if let Some(p) = session.pending_deletion() {
            log::info!(
                "FS[{}] deletion of root={} still pending at {}, dropped",
                session.device,
                p.root,
                reason.name()
            );
        }
        let flushed = session.into_flushed(self.next_seq, reason);
        if self.config.skip_empty_sessions && flushed.is_empty() {
            log::info!("FS[{}] recorded nothing, no output", flushed.device);
            self.stats.sessions_skipped += 1;
            return Ok(());
        }
        self.next_seq += 1;
        self.stats.sessions_flushed += 1;
        sink.emit(&flushed)
    }
}

#[cfg(test)]
use crate::grammar::samples;
#[cfg(test)]
use crate::sink::MemorySink;
#[cfg(test)]
use crate::snapdel::RootId;

#[cfg(test)]
fn feed(engine: &mut Engine, sink: &mut MemorySink, lines: &[String]) {
    for l in lines {
        engine.feed_line(l, sink).unwrap();
    }
}

#[test]
fn test_engine_commit_scenario() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 7, 120, 5, 200, 300, 4096),
            samples::mid("A", 7, 1, 2),
            samples::terminal("A", 7, 3),
        ],
    );
    let s = e.session("A").unwrap();
    assert!(s.num_commits() == 1);
    let c = s.commit(7).unwrap();
    assert!(c.took_ms == 120 && c.open_ms == 5 && c.read_kb == 200);
    assert!(c.flushed_commit_kb == 300 && c.flushed_total_kb == 4096);
    assert!(c.rdr1_ms == 1 && c.rdr2_ms == 2 && c.rdr3_ms == 3);
    let b = s.histogram().get(4).unwrap();
    assert!(b.commits == 1 && b.total_time_ms == 120 && b.max_time_ms == 120);
    assert!(e.stats().anomalies() == 0);
    assert!(sink.sessions.is_empty());

    e.finish(&mut sink).unwrap();
    assert!(sink.sessions.len() == 1);
    assert!(sink.sessions[0].reason == FlushReason::EndOfInput);
    assert!(e.num_sessions() == 0);
}

#[test]
fn test_engine_deviation_yields_no_record() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 7, 120, 5, 200, 300, 4096),
            samples::mid("A", 8, 1, 2),
            samples::terminal("A", 7, 3),
        ],
    );
    // The mismatched mid resets the assembler, so the terminal is an anomaly as well
    assert!(e.session("A").unwrap().num_commits() == 0);
    assert!(e.stats().protocol_anomalies == 2);
    assert!(e.session("A").unwrap().anomalies() == 2);

    let mut e = Engine::new(Default::default()).unwrap();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 7, 120, 5, 200, 300, 4096),
            samples::terminal("A", 7, 3),
        ],
    );
    assert!(e.session("A").unwrap().num_commits() == 0);
    assert!(e.stats().protocol_anomalies == 1);
    assert!(e.session("A").unwrap().pending_transaction().is_none());
}

#[test]
fn test_engine_interleaved_devices() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 7, 10, 1, 1, 1, 100),
            samples::open("B", 7, 20, 1, 1, 1, 5000),
            samples::mid("B", 7, 1, 2),
            samples::mid("A", 7, 1, 2),
            samples::terminal("A", 7, 3),
            samples::delete_start("B", 5, 100, 10),
            samples::terminal("B", 7, 3),
            samples::delete_end("B", 5, 100, 25),
        ],
    );
    assert!(e.stats().anomalies() == 0);
    assert!(e.session("A").unwrap().histogram().get(1).unwrap().commits == 1);
    assert!(e.session("B").unwrap().histogram().get(8).unwrap().commits == 1);
    assert!(e.session("B").unwrap().num_deletions() == 1);
    assert!(e.stats().commits == 2 && e.stats().deletions == 1);
}

#[test]
fn test_engine_deletions() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::delete_start("A", 5, 100, 10),
            samples::delete_end("A", 5, 100, 25),
            samples::delete_start("A", 5, 100, 30),
            samples::delete_end("A", 5, 200, 45),
        ],
    );
    assert!(e.stats().protocol_anomalies == 1);
    assert!(e.session("A").unwrap().pending_deletion().is_none());
    e.finish(&mut sink).unwrap();
    let d = &sink.sessions[0].deletions;
    assert!(d.len() == 1);
    assert!(d[0].root == RootId(5, 100) && d[0].start_secs == 10 && d[0].elapsed_secs == 15);
}

#[test]
fn test_engine_deletion_clock_order() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::delete_start("A", 5, 100, 40),
            samples::delete_end("A", 5, 100, 25),
        ],
    );
    assert!(e.stats().temporal_anomalies == 1);
    assert!(e.stats().protocol_anomalies == 0);
    assert!(e.session("A").unwrap().num_deletions() == 0);
}

#[test]
fn test_engine_reboot_flushes_everything() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("B", 1, 10, 1, 1, 1, 100),
            samples::open("A", 7, 120, 5, 200, 300, 4096),
            samples::mid("A", 7, 1, 2),
            samples::terminal("A", 7, 3),
            samples::reboot(),
        ],
    );
    assert!(e.num_sessions() == 0);
    assert!(sink.sessions.len() == 2);

    // Creation order, with increasing sequence numbers
    assert!(sink.sessions[0].device.as_str() == "B" && sink.sessions[0].seq == 0);
    assert!(sink.sessions[1].device.as_str() == "A" && sink.sessions[1].seq == 1);
    assert!(sink.sessions.iter().all(|s| s.reason == FlushReason::Reboot));
    assert!(sink.sessions[1].commits.len() == 1);

    // No memory of the pending transaction across the reboot
    feed(&mut e, &mut sink, &[samples::mid("B", 1, 1, 2)]);
    assert!(e.stats().protocol_anomalies == 1);
    assert!(e.session("B").unwrap().num_commits() == 0);
    e.finish(&mut sink).unwrap();
    assert!(sink.sessions.len() == 3);
    assert!(sink.sessions[2].device.as_str() == "B" && sink.sessions[2].seq == 2);
}

#[test]
fn test_engine_unmount_flushes_one() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 7, 120, 5, 200, 300, 4096),
            samples::mid("A", 7, 1, 2),
            samples::terminal("A", 7, 3),
            samples::open("B", 1, 10, 1, 1, 1, 100),
            samples::unmount("A"),
        ],
    );
    assert!(sink.sessions.len() == 1);
    assert!(sink.sessions[0].device.as_str() == "A");
    assert!(sink.sessions[0].reason == FlushReason::Unmount);
    assert!(sink.sessions[0].start_marker == "Oct 16 10:00:01 node1");
    assert!(e.session("A").is_none());
    assert!(e.session("B").is_some());

    // Same device name again: a fresh session with a new sequence number
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 7, 50, 5, 200, 300, 100),
            samples::mid("A", 7, 1, 2),
            samples::terminal("A", 7, 3),
            samples::unmount("A"),
        ],
    );
    assert!(sink.sessions.len() == 2);
    assert!(sink.sessions[1].seq == 1);
    assert!(sink.sessions[1].commits[0].took_ms == 50);
    assert!(e.stats().anomalies() == 0);
}

#[test]
fn test_engine_unmount_unknown_device() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(&mut e, &mut sink, &[samples::unmount("Z")]);
    assert!(sink.sessions.len() == 1);
    assert!(sink.sessions[0].is_empty());
    assert!(sink.sessions[0].start_marker == "Oct 16 11:00:00 node1");

    let mut e = Engine::new(EngineConfig {
        skip_empty_sessions: true,
        ..Default::default()
    })
    .unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::unmount("Z"),
            samples::delete_start("A", 5, 100, 10),
            samples::delete_end("A", 5, 100, 25),
            samples::unmount("A"),
        ],
    );
    assert!(sink.sessions.len() == 1);
    assert!(sink.sessions[0].device.as_str() == "A" && sink.sessions[0].seq == 0);
    assert!(e.stats().sessions_skipped == 1);
}

#[test]
fn test_engine_device_filter() {
    let mut devices = DeviceGlobber::new();
    devices.insert("vpsa[1-2]").unwrap();
    let mut e = Engine::new(EngineConfig {
        skip_empty_sessions: false,
        devices,
    })
    .unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("vpsa1", 7, 120, 5, 200, 300, 4096),
            samples::open("vpsa3", 7, 120, 5, 200, 300, 4096),
            samples::unmount("vpsa3"),
            samples::reboot(),
        ],
    );
    assert!(e.stats().filtered == 2);
    assert!(e.stats().sessions_created == 1);
    assert!(sink.sessions.len() == 1 && sink.sessions[0].device.as_str() == "vpsa1");
}

#[test]
fn test_engine_ignores_noise() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    e.feed_line("Oct 16 10:00:00 node1 systemd[1]: Started Session 4 of user root.", &mut sink)
        .unwrap();
    e.finish(&mut sink).unwrap();
    assert!(e.stats().lines == 1 && e.stats().events == 0);
    assert!(sink.sessions.is_empty());
}

#[test]
fn test_engine_duplicate_transaction() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 7, 120, 5, 200, 300, 4096),
            samples::mid("A", 7, 1, 2),
            samples::terminal("A", 7, 3),
            samples::open("A", 7, 80, 5, 200, 300, 4096),
            samples::mid("A", 7, 1, 2),
            samples::terminal("A", 7, 3),
        ],
    );
    assert!(e.stats().commits == 1);
    assert!(e.stats().duplicate_commits == 1);
    assert!(e.stats().protocol_anomalies == 1);
    let s = e.session("A").unwrap();
    assert!(s.anomalies() == 1);
    assert!(s.num_commits() == 1);
    assert!(s.commit(7).unwrap().took_ms == 120);

    // Both commits are in the bucket
    let b = s.histogram().get(4).unwrap();
    assert!(b.commits == e.stats().commits + e.stats().duplicate_commits);
    assert!(b.total_time_ms == 200 && b.max_time_ms == 120);
}

#[test]
fn test_engine_huge_durations() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    let took = 10_000_000_000_000_000_000u64;
    feed(
        &mut e,
        &mut sink,
        &[
            samples::open("A", 1, took, 5, 200, 300, 100),
            samples::mid("A", 1, 1, 2),
            samples::terminal("A", 1, 3),
            samples::open("A", 2, took, 5, 200, 300, 100),
            samples::mid("A", 2, 1, 2),
            samples::terminal("A", 2, 3),
        ],
    );
    assert!(e.stats().commits == 2);
    e.finish(&mut sink).unwrap();
    let row = &sink.sessions[0].histogram[0];
    assert!(row.bucket_mb == 1 && row.commits == 2);
    assert!(row.avg_time_ms == took && row.max_time_ms == took);
}

#[test]
fn test_engine_root_leading_zeroes() {
    let mut e = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    feed(
        &mut e,
        &mut sink,
        &[
            samples::delete_start("A", 5, 100, 10).replace("root=(5,100)", "root=(05,100)"),
            samples::delete_end("A", 5, 100, 25),
        ],
    );
    assert!(e.stats().anomalies() == 0);
    e.finish(&mut sink).unwrap();
    let d = &sink.sessions[0].deletions;
    assert!(d.len() == 1 && d[0].root == RootId(5, 100) && d[0].elapsed_secs == 15);
}
