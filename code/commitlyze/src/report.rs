/// The per-session summary printed by `commits` once the input is exhausted: one row per flushed
/// session in output order.
use crate::format;
use crate::CommitsPrintArgs;

use anyhow::Result;
use commitlog::{EngineStats, FlushedSession};
use std::collections::HashMap;
use std::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub seq: usize,
    pub device: String,
    pub start: String,
    pub reason: &'static str,
    pub commits: usize,
    pub buckets: usize,
    pub max_bucket_mb: Option<u64>,
    pub deletions: usize,
    pub anomalies: usize,
}

impl SessionSummary {
    pub fn new(s: &FlushedSession) -> SessionSummary {
        SessionSummary {
            seq: s.seq,
            device: s.device.to_string(),
            start: s.start_marker.clone(),
            reason: s.reason.name(),
            commits: s.commits.len(),
            buckets: s.histogram.len(),
            max_bucket_mb: s.histogram.last().map(|r| r.bucket_mb),
            deletions: s.deletions.len(),
            anomalies: s.anomalies,
        }
    }
}

pub fn print_summaries(
    output: &mut dyn io::Write,
    print_args: &CommitsPrintArgs,
    summaries: &[SessionSummary],
    stats: &EngineStats,
) -> Result<()> {
    log::info!(
        "{} lines, {} events, {} filtered, {} commits ({} duplicates), {} deletions, {} anomalies",
        stats.lines,
        stats.events,
        stats.filtered,
        stats.commits,
        stats.duplicate_commits,
        stats.deletions,
        stats.anomalies()
    );
    log::info!(
        "{} sessions created, {} flushed, {} skipped as empty",
        stats.sessions_created,
        stats.sessions_flushed,
        stats.sessions_skipped
    );

    let (formatters, aliases) = my_formatters();
    let spec = if let Some(ref fmt) = print_args.fmt {
        fmt
    } else {
        FMT_DEFAULTS
    };
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, summaries)
}

pub fn fmt_help() -> format::Help {
    let (formatters, aliases) = my_formatters();
    format::Help::new(&formatters, &aliases, FMT_DEFAULTS)
}

const FMT_DEFAULTS: &str = "seq,device,reason,commits,buckets,deletions,anomalies";

fn my_formatters() -> (format::Formatters<SessionSummary>, format::Aliases) {
    let mut formatters: format::Formatters<SessionSummary> = HashMap::new();
    let mut aliases: format::Aliases = HashMap::new();
    formatters.insert("seq".to_string(), &format_seq);
    formatters.insert("device".to_string(), &format_device);
    formatters.insert("dev".to_string(), &format_device);
    formatters.insert("start".to_string(), &format_start);
    formatters.insert("reason".to_string(), &format_reason);
    formatters.insert("commits".to_string(), &format_commits);
    formatters.insert("buckets".to_string(), &format_buckets);
    formatters.insert("maxbucket".to_string(), &format_max_bucket);
    formatters.insert("deletions".to_string(), &format_deletions);
    formatters.insert("anomalies".to_string(), &format_anomalies);

    aliases.insert(
        "all".to_string(),
        vec![
            "seq".to_string(),
            "device".to_string(),
            "start".to_string(),
            "reason".to_string(),
            "commits".to_string(),
            "buckets".to_string(),
            "maxbucket".to_string(),
            "deletions".to_string(),
            "anomalies".to_string(),
        ],
    );

    (formatters, aliases)
}

fn format_seq(s: &SessionSummary) -> String {
    format!("{:04}", s.seq)
}

fn format_device(s: &SessionSummary) -> String {
    s.device.clone()
}

fn format_start(s: &SessionSummary) -> String {
    s.start.clone()
}

fn format_reason(s: &SessionSummary) -> String {
    s.reason.to_string()
}

fn format_commits(s: &SessionSummary) -> String {
    s.commits.to_string()
}

fn format_buckets(s: &SessionSummary) -> String {
    s.buckets.to_string()
}

fn format_max_bucket(s: &SessionSummary) -> String {
    match s.max_bucket_mb {
        Some(mb) => format!("{mb}MB"),
        None => "-".to_string(),
    }
}

fn format_deletions(s: &SessionSummary) -> String {
    s.deletions.to_string()
}

fn format_anomalies(s: &SessionSummary) -> String {
    s.anomalies.to_string()
}

#[cfg(test)]
use commitlog::{FlushReason, HistogramRow};
#[cfg(test)]
use ustr::Ustr;

#[test]
fn test_summary_report() {
    let flushed = FlushedSession {
        seq: 3,
        device: Ustr::from("vpsa2"),
        start_marker: "Oct 16 10:00:01 node1".to_string(),
        reason: FlushReason::Unmount,
        histogram: vec![
            HistogramRow {
                bucket_mb: 1,
                commits: 2,
                avg_time_ms: 10,
                max_time_ms: 12,
            },
            HistogramRow {
                bucket_mb: 8,
                commits: 1,
                avg_time_ms: 50,
                max_time_ms: 50,
            },
        ],
        commits: vec![],
        deletions: vec![],
        anomalies: 1,
    };
    let summary = SessionSummary::new(&flushed);
    assert!(summary.buckets == 2 && summary.max_bucket_mb == Some(8));

    let args = CommitsPrintArgs {
        fmt: Some("seq,dev,reason,maxbucket,anomalies,csv".to_string()),
    };
    let mut out = Vec::new();
    print_summaries(&mut out, &args, &[summary], &Default::default()).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "0003,vpsa2,unmount,8MB,1\n");
}
