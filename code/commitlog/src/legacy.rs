/// The older single-line commit format.
///
/// Before the commit report was split into three lines per transaction, the kernel wrote one line
/// per commit carrying only the duration and the total flushed amount, and there was no device tag
/// and no session structure.  Such logs are reduced to one histogram for all inputs together.
use crate::histogram::CommitHistogram;

use anyhow::{Context, Result};
use regex::Regex;

const LEGACY_COMMIT_RE: &str = r"^.+ZBTRFS_TXN_COMMIT_PHASE_DONE.+took (\d+) ms.+flushed=(\d+) Kb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyCommit {
    pub took_ms: u64,
    pub flushed_kb: u64,
}

pub struct LegacyClassifier {
    re: Regex,
}

impl LegacyClassifier {
    pub fn new() -> Result<LegacyClassifier> {
        Ok(LegacyClassifier {
            re: Regex::new(LEGACY_COMMIT_RE).context("Legacy commit grammar")?,
        })
    }

    pub fn classify(&self, line: &str) -> Option<LegacyCommit> {
        let caps = self.re.captures(line)?;
        Some(LegacyCommit {
            took_ms: caps.get(1)?.as_str().parse::<u64>().ok()?,
            flushed_kb: caps.get(2)?.as_str().parse::<u64>().ok()?,
        })
    }

    /// Add the line to `histogram` if it is a commit line.  Returns true if it was.

    pub fn add_line(&self, histogram: &mut CommitHistogram, line: &str) -> bool {
        match self.classify(line) {
            Some(c) => {
                histogram.add(c.flushed_kb, c.took_ms);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
fn legacy_line(took: u64, flushed: u64) -> String {
    format!(
        "Jul 02 08:11:43 vc-1 kernel: [ 9020.114455] ZBTRFS_TXN_COMMIT_PHASE_DONE:2650: FS[vpsa3] txn[88] took {took} ms, open=1 ms, flushed={flushed} Kb"
    )
}

#[test]
fn test_legacy_classify() {
    let c = LegacyClassifier::new().unwrap();
    assert!(
        c.classify(&legacy_line(35, 2048))
            == Some(LegacyCommit {
                took_ms: 35,
                flushed_kb: 2048
            })
    );
    assert!(c.classify("Jul 02 08:11:43 vc-1 kernel: unrelated").is_none());

    // The current three-line format does not match, its fields are written differently
    let current = crate::grammar::samples::open("vpsa3", 88, 35, 1, 1, 1, 2048);
    assert!(c.classify(&current).is_none());
}

#[test]
fn test_legacy_histogram() {
    let c = LegacyClassifier::new().unwrap();
    let mut h = CommitHistogram::new();
    assert!(c.add_line(&mut h, &legacy_line(10, 100)));
    assert!(c.add_line(&mut h, &legacy_line(30, 1000)));
    assert!(c.add_line(&mut h, &legacy_line(50, 4096)));
    assert!(!c.add_line(&mut h, "noise"));
    let b = h.get(1).unwrap();
    assert!(b.commits == 2 && b.avg_time_ms() == 20 && b.max_time_ms == 30);
    assert!(h.get(4).unwrap().commits == 1);
}
