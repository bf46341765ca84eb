/// Write each flushed session as three CSV files:
///
///   PREFIX.NNNN.DEV.commit_time_buckets.csv  - the commit size histogram
///   PREFIX.NNNN.DEV.raw_commit_stats.csv     - every assembled commit
///   PREFIX.NNNN.DEV.snap_deletion_stats.csv  - every completed snapshot deletion
///
/// where NNNN is the session's output sequence number, zero-padded to four digits, and DEV is the
/// device name.  All three files are written even if a table is empty, and always have a header.
use crate::report::SessionSummary;

use anyhow::{Context, Result};
use commitlog::{CommitRecord, FlushedSession, HistogramRow, SessionSink, SnapshotDeletionRecord};
use serde::Serialize;
use std::path::Path;

const HISTOGRAM_HEADER: [&str; 4] = [
    "commit_size_mb",
    "num_commits",
    "avg_commit_time_ms",
    "max_commit_time_ms",
];

const RAW_COMMIT_HEADER: [&str; 9] = [
    "txn",
    "took_ms",
    "open_ms",
    "read_kb",
    "flushed_commit_kb",
    "flushed_total_kb",
    "rdr1_ms",
    "rdr2_ms",
    "rdr3_ms",
];

const DELETION_HEADER: [&str; 4] = ["idx", "start_secs", "took_secs", "root"];

#[derive(Serialize)]
struct HistogramCsvRow {
    commit_size_mb: u64,
    num_commits: u64,
    avg_commit_time_ms: u64,
    max_commit_time_ms: u64,
}

impl From<&HistogramRow> for HistogramCsvRow {
    fn from(r: &HistogramRow) -> HistogramCsvRow {
        HistogramCsvRow {
            commit_size_mb: r.bucket_mb,
            num_commits: r.commits,
            avg_commit_time_ms: r.avg_time_ms,
            max_commit_time_ms: r.max_time_ms,
        }
    }
}

#[derive(Serialize)]
struct RawCommitCsvRow {
    txn: u64,
    took_ms: u64,
    open_ms: u64,
    read_kb: u64,
    flushed_commit_kb: u64,
    flushed_total_kb: u64,
    rdr1_ms: u64,
    rdr2_ms: u64,
    rdr3_ms: u64,
}

impl From<&CommitRecord> for RawCommitCsvRow {
    fn from(c: &CommitRecord) -> RawCommitCsvRow {
        RawCommitCsvRow {
            txn: c.txn,
            took_ms: c.took_ms,
            open_ms: c.open_ms,
            read_kb: c.read_kb,
            flushed_commit_kb: c.flushed_commit_kb,
            flushed_total_kb: c.flushed_total_kb,
            rdr1_ms: c.rdr1_ms,
            rdr2_ms: c.rdr2_ms,
            rdr3_ms: c.rdr3_ms,
        }
    }
}

#[derive(Serialize)]
struct DeletionCsvRow {
    idx: usize,
    start_secs: u64,
    took_secs: u64,
    root: String,
}

fn write_table<P, T, I>(path: P, header: &[&str], rows: I) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let path = path.as_ref();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Creating {}", path.display()))?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one histogram table to `path`.

pub fn write_histogram<P: AsRef<Path>>(path: P, rows: &[HistogramRow]) -> Result<()> {
    write_table(path, &HISTOGRAM_HEADER, rows.iter().map(HistogramCsvRow::from))
}

pub fn write_raw_commits<P: AsRef<Path>>(path: P, commits: &[CommitRecord]) -> Result<()> {
    write_table(path, &RAW_COMMIT_HEADER, commits.iter().map(RawCommitCsvRow::from))
}

pub fn write_deletions<P: AsRef<Path>>(path: P, deletions: &[SnapshotDeletionRecord]) -> Result<()> {
    write_table(
        path,
        &DELETION_HEADER,
        deletions.iter().enumerate().map(|(idx, d)| DeletionCsvRow {
            idx,
            start_secs: d.start_secs,
            took_secs: d.elapsed_secs,
            root: d.root.to_string(),
        }),
    )
}

pub struct CsvFileSink {
    prefix: String,
    summaries: Vec<SessionSummary>,
}

impl CsvFileSink {
    pub fn new(prefix: &str) -> CsvFileSink {
        CsvFileSink {
            prefix: prefix.to_string(),
            summaries: vec![],
        }
    }

    /// Summaries of the sessions written so far, in output order.

    pub fn summaries(&self) -> &[SessionSummary] {
        &self.summaries
    }

    pub fn file_name(&self, session: &FlushedSession, table: &str) -> String {
        format!("{}.{:04}.{}.{table}.csv", self.prefix, session.seq, session.device)
    }
}

impl SessionSink for CsvFileSink {
    fn emit(&mut self, session: &FlushedSession) -> Result<()> {
        write_histogram(self.file_name(session, "commit_time_buckets"), &session.histogram)?;
        write_raw_commits(self.file_name(session, "raw_commit_stats"), &session.commits)?;
        write_deletions(self.file_name(session, "snap_deletion_stats"), &session.deletions)?;
        log::info!(
            "FS[{}] flushed to {}.{:04}.{}.*.csv",
            session.device,
            self.prefix,
            session.seq,
            session.device
        );
        self.summaries.push(SessionSummary::new(session));
        Ok(())
    }
}

#[cfg(test)]
use commitlog::{FlushReason, RootId};
#[cfg(test)]
use std::fs;
#[cfg(test)]
use ustr::Ustr;

#[cfg(test)]
fn flushed_session(seq: usize, device: &str) -> FlushedSession {
    FlushedSession {
        seq,
        device: Ustr::from(device),
        start_marker: "Oct 16 10:00:01 node1".to_string(),
        reason: FlushReason::Reboot,
        histogram: vec![
            HistogramRow {
                bucket_mb: 1,
                commits: 2,
                avg_time_ms: 15,
                max_time_ms: 20,
            },
            HistogramRow {
                bucket_mb: 4,
                commits: 1,
                avg_time_ms: 120,
                max_time_ms: 120,
            },
        ],
        commits: vec![CommitRecord {
            txn: 7,
            took_ms: 120,
            open_ms: 5,
            read_kb: 200,
            flushed_commit_kb: 300,
            flushed_total_kb: 4096,
            rdr1_ms: 1,
            rdr2_ms: 2,
            rdr3_ms: 3,
        }],
        deletions: vec![
            SnapshotDeletionRecord {
                root: RootId(5, 100),
                start_secs: 10,
                elapsed_secs: 15,
            },
            SnapshotDeletionRecord {
                root: RootId(5, 101),
                start_secs: 30,
                elapsed_secs: 0,
            },
        ],
        anomalies: 0,
    }
}

#[test]
fn test_csv_sink_writes_three_files() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("run").to_str().unwrap().to_string();
    let mut sink = CsvFileSink::new(&prefix);
    sink.emit(&flushed_session(12, "vpsa1")).unwrap();

    let buckets = fs::read_to_string(format!("{prefix}.0012.vpsa1.commit_time_buckets.csv")).unwrap();
    assert_eq!(
        buckets,
        "commit_size_mb,num_commits,avg_commit_time_ms,max_commit_time_ms\n1,2,15,20\n4,1,120,120\n"
    );

    let raw = fs::read_to_string(format!("{prefix}.0012.vpsa1.raw_commit_stats.csv")).unwrap();
    assert_eq!(
        raw,
        "txn,took_ms,open_ms,read_kb,flushed_commit_kb,flushed_total_kb,rdr1_ms,rdr2_ms,rdr3_ms\n7,120,5,200,300,4096,1,2,3\n"
    );

    let dels = fs::read_to_string(format!("{prefix}.0012.vpsa1.snap_deletion_stats.csv")).unwrap();
    assert_eq!(dels, "idx,start_secs,took_secs,root\n0,10,15,5-100\n1,30,0,5-101\n");

    assert!(sink.summaries().len() == 1);
    assert!(sink.summaries()[0].seq == 12);
    assert!(sink.summaries()[0].commits == 1);
}

#[test]
fn test_csv_sink_empty_session_has_headers() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("empty").to_str().unwrap().to_string();
    let mut sink = CsvFileSink::new(&prefix);
    let mut s = flushed_session(0, "pool-1");
    s.histogram.clear();
    s.commits.clear();
    s.deletions.clear();
    sink.emit(&s).unwrap();
    let dels = fs::read_to_string(format!("{prefix}.0000.pool-1.snap_deletion_stats.csv")).unwrap();
    assert_eq!(dels, "idx,start_secs,took_secs,root\n");
    let buckets = fs::read_to_string(format!("{prefix}.0000.pool-1.commit_time_buckets.csv")).unwrap();
    assert_eq!(
        buckets,
        "commit_size_mb,num_commits,avg_commit_time_ms,max_commit_time_ms\n"
    );
}

#[test]
fn test_csv_sink_bad_prefix() {
    let mut sink = CsvFileSink::new("/nonexistent/dir/run");
    assert!(sink.emit(&flushed_session(0, "vpsa1")).is_err());
}
