/// Commit time histogram, bucketed by the amount of data flushed by the commit.
///
/// Buckets are labeled in MB and are 1MB, 4MB, 8MB, 12MB, etc; each bucket holds the commits up
/// to (and including) that size.  Commit sizes that are an exact multiple of 4MB land in the
/// bucket with that label, so 4096KB is in bucket 4 and not in bucket 8.
use crate::txn::CommitRecord;

use std::collections::BTreeMap;

/// Return the bucket label (MB) for a commit that flushed `flushed_kb` KB in total.

pub fn bucket_for(flushed_kb: u64) -> u64 {
    if flushed_kb <= 1024 {
        1
    } else if flushed_kb % 4096 == 0 {
        flushed_kb / 1024
    } else {
        (flushed_kb / 4096 + 1) * 4
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketStats {
    pub commits: u64,
    // Wide enough that no number of u64 durations can overflow it.
    pub total_time_ms: u128,
    pub max_time_ms: u64,
}

impl BucketStats {
    /// The average is recomputed from the running total every time, it is never stored.  Integer
    /// division, as for the other columns of the output.  The average of u64 values fits in a u64.

    pub fn avg_time_ms(&self) -> u64 {
        if self.commits == 0 {
            0
        } else {
            (self.total_time_ms / self.commits as u128) as u64
        }
    }
}

/// One output row of the histogram table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramRow {
    pub bucket_mb: u64,
    pub commits: u64,
    pub avg_time_ms: u64,
    pub max_time_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CommitHistogram {
    buckets: BTreeMap<u64, BucketStats>,
}

impl CommitHistogram {
    pub fn new() -> CommitHistogram {
        Default::default()
    }

    pub fn add_commit(&mut self, commit: &CommitRecord) {
        self.add(commit.flushed_total_kb, commit.took_ms)
    }

    /// Add one commit of the given size and duration.

    pub fn add(&mut self, flushed_kb: u64, took_ms: u64) {
        let b = self.buckets.entry(bucket_for(flushed_kb)).or_default();
        b.commits += 1;
        b.total_time_ms += took_ms as u128;
        b.max_time_ms = u64::max(b.max_time_ms, took_ms);
    }

    pub fn get(&self, bucket_mb: u64) -> Option<&BucketStats> {
        self.buckets.get(&bucket_mb)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Rows sorted ascending by bucket.

    pub fn rows(&self) -> Vec<HistogramRow> {
        self.buckets
            .iter()
            .map(|(bucket_mb, b)| HistogramRow {
                bucket_mb: *bucket_mb,
                commits: b.commits,
                avg_time_ms: b.avg_time_ms(),
                max_time_ms: b.max_time_ms,
            })
            .collect()
    }
}

#[test]
fn test_bucket_for() {
    for kb in [0, 1, 512, 1023, 1024] {
        assert!(bucket_for(kb) == 1);
    }
    for mult in 1..10 {
        assert!(bucket_for(mult * 4096) == mult * 4);
    }
    assert!(bucket_for(1025) == 4);
    assert!(bucket_for(4095) == 4);
    assert!(bucket_for(4097) == 8);
    assert!(bucket_for(5000) == 8);
    assert!(bucket_for(8193) == 12);
}

#[test]
fn test_histogram_aggregation() {
    let mut h = CommitHistogram::new();
    assert!(h.is_empty());
    h.add(4096, 120);
    h.add(5000, 10);
    h.add(6000, 31);
    h.add(100, 7);
    assert!(h.len() == 3);

    let b = h.get(8).unwrap();
    assert!(b.commits == 2);
    assert!(b.total_time_ms == 41);
    assert!(b.max_time_ms == 31);
    assert!(b.avg_time_ms() == 20);

    let rows = h.rows();
    assert!(rows.iter().map(|r| r.bucket_mb).collect::<Vec<u64>>() == vec![1, 4, 8]);
    assert!(
        rows[1]
            == HistogramRow {
                bucket_mb: 4,
                commits: 1,
                avg_time_ms: 120,
                max_time_ms: 120
            }
    );
}

#[test]
fn test_bucket_stats_monotonic() {
    let mut h = CommitHistogram::new();
    h.add(2000, 50);
    h.add(2000, 10);
    let b = h.get(4).unwrap();
    assert!(b.max_time_ms == 50);
    assert!(b.total_time_ms == 60);
    assert!(b.commits == 2);
}

#[test]
fn test_bucket_stats_huge_durations() {
    let mut h = CommitHistogram::new();
    h.add(100, u64::MAX - 1);
    h.add(100, u64::MAX - 3);
    let b = h.get(1).unwrap();
    assert!(b.commits == 2);
    assert!(b.total_time_ms == 2 * (u64::MAX as u128) - 4);
    assert!(b.max_time_ms == u64::MAX - 1);
    assert!(b.avg_time_ms() == u64::MAX - 2);
    assert!(h.rows()[0].avg_time_ms == u64::MAX - 2);
}
