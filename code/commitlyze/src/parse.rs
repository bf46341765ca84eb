/// `parse` prints every recognized line of the input as a record, one per line, without any
/// correlation.  This is for looking at how a log classifies when the `commits` output is
/// surprising.
use crate::format;
use crate::ParsePrintArgs;

use anyhow::Result;
use commitlog::{for_each_line, open_input, LineClassifier, LogEvent};
use std::collections::HashMap;
use std::io;

pub struct ParsedLine {
    pub file: String,
    pub line: u64,
    pub event: LogEvent,
}

/// Records are formatted and printed this many at a time, so that memory use does not grow with
/// the input.  In fixed format the column widths are computed per chunk, and in json format each
/// chunk is its own array.

const CHUNK_SIZE: usize = 1000;

/// Classify every line of the named inputs and print the recognized ones.

pub fn print_parsed_inputs(
    output: &mut dyn io::Write,
    print_args: &ParsePrintArgs,
    filenames: &[String],
) -> Result<()> {
    print_in_chunks(output, print_args, filenames, CHUNK_SIZE)
}

fn print_in_chunks(
    output: &mut dyn io::Write,
    print_args: &ParsePrintArgs,
    filenames: &[String],
    chunk_size: usize,
) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = if let Some(ref fmt) = print_args.fmt {
        fmt
    } else {
        FMT_DEFAULTS
    };
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let mut opts = format::standard_options(&others);
    // `parse` defaults to headerless un-named csv.
    if !opts.fixed && !opts.csv && !opts.json {
        opts.csv = true;
        opts.header = false;
    }

    let classifier = LineClassifier::new()?;
    let mut chunk = Vec::with_capacity(chunk_size);
    let mut printed = false;
    for filename in filenames {
        log::info!("=== Opening input file: {filename} ===");
        let mut reader = open_input(filename)?;
        let mut lineno = 0u64;
        for_each_line(&mut *reader, |l| {
            lineno += 1;
            if let Some(event) = classifier.classify(l) {
                chunk.push(ParsedLine {
                    file: filename.clone(),
                    line: lineno,
                    event,
                });
                if chunk.len() >= chunk_size {
                    format::format_data(&mut *output, &fields, &formatters, &opts, &chunk)?;
                    chunk.clear();
                    // The header goes with the first chunk only
                    opts.header = false;
                    printed = true;
                }
            }
            Ok(())
        })?;
    }
    if !chunk.is_empty() || !printed {
        format::format_data(output, &fields, &formatters, &opts, &chunk)?;
    }
    Ok(())
}

pub fn fmt_help() -> format::Help {
    let (formatters, aliases) = my_formatters();
    format::Help::new(&formatters, &aliases, FMT_DEFAULTS)
}

const FMT_DEFAULTS: &str = "line,kind,device,txn,root";

fn my_formatters() -> (format::Formatters<ParsedLine>, format::Aliases) {
    let mut formatters: format::Formatters<ParsedLine> = HashMap::new();
    let mut aliases: format::Aliases = HashMap::new();
    formatters.insert("file".to_string(), &format_file);
    formatters.insert("line".to_string(), &format_line);
    formatters.insert("kind".to_string(), &format_kind);
    formatters.insert("device".to_string(), &format_device);
    formatters.insert("prefix".to_string(), &format_prefix);
    formatters.insert("txn".to_string(), &format_txn);
    formatters.insert("took".to_string(), &format_took);
    formatters.insert("open".to_string(), &format_open);
    formatters.insert("read".to_string(), &format_read);
    formatters.insert("flushed_commit".to_string(), &format_flushed_commit);
    formatters.insert("flushed_total".to_string(), &format_flushed_total);
    formatters.insert("rdr1".to_string(), &format_rdr1);
    formatters.insert("rdr2".to_string(), &format_rdr2);
    formatters.insert("rdr3".to_string(), &format_rdr3);
    formatters.insert("root".to_string(), &format_root);
    formatters.insert("secs".to_string(), &format_secs);

    aliases.insert(
        "all".to_string(),
        vec![
            "file".to_string(),
            "line".to_string(),
            "kind".to_string(),
            "device".to_string(),
            "prefix".to_string(),
            "txn".to_string(),
            "took".to_string(),
            "open".to_string(),
            "read".to_string(),
            "flushed_commit".to_string(),
            "flushed_total".to_string(),
            "rdr1".to_string(),
            "rdr2".to_string(),
            "rdr3".to_string(),
            "root".to_string(),
            "secs".to_string(),
        ],
    );

    aliases.insert(
        "txn-fields".to_string(),
        vec![
            "txn".to_string(),
            "took".to_string(),
            "open".to_string(),
            "read".to_string(),
            "flushed_commit".to_string(),
            "flushed_total".to_string(),
            "rdr1".to_string(),
            "rdr2".to_string(),
            "rdr3".to_string(),
        ],
    );

    (formatters, aliases)
}

// Fields that do not apply to the line's kind print as the empty string.

fn opt(v: Option<u64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "".to_string(),
    }
}

fn format_file(p: &ParsedLine) -> String {
    p.file.clone()
}

fn format_line(p: &ParsedLine) -> String {
    p.line.to_string()
}

fn format_kind(p: &ParsedLine) -> String {
    p.event.kind().name().to_string()
}

fn format_device(p: &ParsedLine) -> String {
    match p.event.device() {
        Some(d) => d.to_string(),
        None => "".to_string(),
    }
}

fn format_prefix(p: &ParsedLine) -> String {
    match p.event {
        LogEvent::Reboot { ref prefix } | LogEvent::Unmount { ref prefix, .. } => prefix.clone(),
        _ => "".to_string(),
    }
}

fn format_txn(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnOpen { txn, .. }
        | LogEvent::TxnMid { txn, .. }
        | LogEvent::TxnTerminal { txn, .. } => Some(txn),
        _ => None,
    })
}

fn format_took(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnOpen { ref fields, .. } => Some(fields.took_ms),
        _ => None,
    })
}

fn format_open(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnOpen { ref fields, .. } => Some(fields.open_ms),
        _ => None,
    })
}

fn format_read(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnOpen { ref fields, .. } => Some(fields.read_kb),
        _ => None,
    })
}

fn format_flushed_commit(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnOpen { ref fields, .. } => Some(fields.flushed_commit_kb),
        _ => None,
    })
}

fn format_flushed_total(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnOpen { ref fields, .. } => Some(fields.flushed_total_kb),
        _ => None,
    })
}

fn format_rdr1(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnMid { rdr1_ms, .. } => Some(rdr1_ms),
        _ => None,
    })
}

fn format_rdr2(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnMid { rdr2_ms, .. } => Some(rdr2_ms),
        _ => None,
    })
}

fn format_rdr3(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::TxnTerminal { rdr3_ms, .. } => Some(rdr3_ms),
        _ => None,
    })
}

fn format_root(p: &ParsedLine) -> String {
    match p.event {
        LogEvent::DeletionStart { root, .. } | LogEvent::DeletionEnd { root, .. } => {
            root.to_string()
        }
        _ => "".to_string(),
    }
}

fn format_secs(p: &ParsedLine) -> String {
    opt(match p.event {
        LogEvent::DeletionStart { secs, .. } | LogEvent::DeletionEnd { secs, .. } => Some(secs),
        _ => None,
    })
}

#[cfg(test)]
fn sample_log() -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "Oct 16 10:00:00 node1 sshd[311]: Accepted publickey for root").unwrap();
    writeln!(
        f,
        "Oct 16 10:00:01 node1 kernel: [  101.000001] ZBTRFS_TXN_COMMIT_PHASE_DONE:3042: FS[vpsa1]: txn[7] took 120ms phases: open=5ms commit=17ms read=200KB flushed=300/4096Kb"
    )
    .unwrap();
    writeln!(
        f,
        "Oct 16 10:00:05 node1 kernel: [ 10.500000] btrfs_drop_snapshot:8120: FS[vpsa1]: starting DELETION of root=(5,100)"
    )
    .unwrap();
    writeln!(
        f,
        "Oct 16 10:00:09 node1 kernel: [ 25.250000] btrfs_drop_snapshot:8290: FS[vpsa1]: root=(5,100) DELETED err=0"
    )
    .unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn test_parse_and_print() {
    let f = sample_log();
    let name = f.path().to_str().unwrap().to_string();

    let mut out = Vec::new();
    print_parsed_inputs(&mut out, &Default::default(), &[name.clone()]).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "2,txn-open,vpsa1,7,\n3,delete-start,vpsa1,,5-100\n4,delete-end,vpsa1,,5-100\n"
    );

    let mut out = Vec::new();
    let args = ParsePrintArgs {
        fmt: Some("kind,txn-fields,secs,csv,header".to_string()),
    };
    print_parsed_inputs(&mut out, &args, &[name]).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with(
        "kind,txn,took,open,read,flushed_commit,flushed_total,rdr1,rdr2,rdr3,secs\ntxn-open,7,120,5,200,300,4096,,,,\n"
    ));
}

#[test]
fn test_parse_prints_in_chunks() {
    let f = sample_log();
    let name = f.path().to_str().unwrap().to_string();
    let args = ParsePrintArgs {
        fmt: Some("line,kind,csv,header".to_string()),
    };

    // One record per chunk: same output, and the header is printed once
    let mut out = Vec::new();
    print_in_chunks(&mut out, &args, &[name.clone()], 1).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "line,kind\n2,txn-open\n3,delete-start\n4,delete-end\n"
    );

    // Chunk boundary at the end of the input: nothing extra
    let mut out = Vec::new();
    print_in_chunks(&mut out, &args, &[name], 3).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "line,kind\n2,txn-open\n3,delete-start\n4,delete-end\n"
    );
}

#[test]
fn test_parse_no_records() {
    let f = tempfile::NamedTempFile::new().unwrap();
    let name = f.path().to_str().unwrap().to_string();
    let args = ParsePrintArgs {
        fmt: Some("line,kind,csv,header".to_string()),
    };
    let mut out = Vec::new();
    print_in_chunks(&mut out, &args, &[name], 2).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "line,kind\n");
}
