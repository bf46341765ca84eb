/// `buckets` reads logs in the older single-line commit format and writes one commit size
/// histogram for all inputs together.  There is no device tag in that format, so there are no
/// sessions, and reboot and unmount markers are not considered.
use crate::csvsink;

use anyhow::Result;
use commitlog::{for_each_line, open_input, CommitHistogram, LegacyClassifier};

/// Read all the inputs before creating the output file, so that a missing input does not leave an
/// empty output behind.

pub fn legacy_histogram(filenames: &[String]) -> Result<CommitHistogram> {
    let classifier = LegacyClassifier::new()?;
    let mut histogram = CommitHistogram::new();
    for filename in filenames {
        log::info!("Opening input file: {filename}");
        let mut reader = open_input(filename)?;
        let mut commits = 0;
        for_each_line(&mut *reader, |l| {
            if classifier.add_line(&mut histogram, l) {
                commits += 1;
            }
            Ok(())
        })?;
        log::info!("{filename}: {commits} commits");
    }
    Ok(histogram)
}

pub fn write_legacy_buckets(output_file: &str, filenames: &[String]) -> Result<()> {
    let histogram = legacy_histogram(filenames)?;
    csvsink::write_histogram(output_file, &histogram.rows())
}

#[test]
fn test_legacy_buckets() {
    use std::fs;
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("kern.log");
    let mut f = fs::File::create(&input).unwrap();
    for (took, flushed) in [(10, 512), (30, 1024), (100, 8192), (7, 9000)] {
        writeln!(
            f,
            "Jul 02 08:11:43 vc-1 kernel: [ 9020.114455] ZBTRFS_TXN_COMMIT_PHASE_DONE:2650: FS[vpsa3] txn[88] took {took} ms, open=1 ms, flushed={flushed} Kb"
        )
        .unwrap();
    }
    writeln!(f, "Jul 02 08:11:44 vc-1 kernel: [ 9021.000000] unrelated").unwrap();
    drop(f);

    let output = dir.path().join("buckets.csv");
    write_legacy_buckets(
        output.to_str().unwrap(),
        &[input.to_str().unwrap().to_string()],
    )
    .unwrap();
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "commit_size_mb,num_commits,avg_commit_time_ms,max_commit_time_ms\n1,2,20,30\n8,1,100,100\n12,1,7,7\n"
    );
}

#[test]
fn test_legacy_buckets_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("buckets.csv");
    let r = write_legacy_buckets(output.to_str().unwrap(), &["/nonexistent/kern.log".to_string()]);
    assert!(r.is_err());
    assert!(!output.exists());
}
