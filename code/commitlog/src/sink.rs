/// The data handed to the output side when a session is flushed, and the trait the output side
/// implements.
use crate::histogram::HistogramRow;
use crate::snapdel::SnapshotDeletionRecord;
use crate::txn::CommitRecord;

use anyhow::Result;
use ustr::Ustr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Reboot,
    Unmount,
    EndOfInput,
}

impl FlushReason {
    pub fn name(&self) -> &'static str {
        match self {
            FlushReason::Reboot => "reboot",
            FlushReason::Unmount => "unmount",
            FlushReason::EndOfInput => "eof",
        }
    }
}

/// One flushed session.  All three tables are sorted: the histogram by bucket, the commits by
/// transaction id, and the deletions by index (the index of a deletion is its position in the
/// vector).

#[derive(Debug, Clone)]
pub struct FlushedSession {
    /// Global output sequence number, unique across the run even if a device name recurs.
    pub seq: usize,
    pub device: Ustr,
    /// Opaque marker captured from the line that created the session.
    pub start_marker: String,
    pub reason: FlushReason,
    pub histogram: Vec<HistogramRow>,
    pub commits: Vec<CommitRecord>,
    pub deletions: Vec<SnapshotDeletionRecord>,
    pub anomalies: usize,
}

impl FlushedSession {
    /// True if the session recorded neither commits nor deletions.

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty() && self.deletions.is_empty()
    }
}

pub trait SessionSink {
    fn emit(&mut self, session: &FlushedSession) -> Result<()>;
}

/// A sink that keeps everything in memory.

#[derive(Debug, Default)]
pub struct MemorySink {
    pub sessions: Vec<FlushedSession>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        Default::default()
    }
}

impl SessionSink for MemorySink {
    fn emit(&mut self, session: &FlushedSession) -> Result<()> {
        self.sessions.push(session.clone());
        Ok(())
    }
}
