/// Line sources.
///
/// Input files are read one after the other, each to completion.  A record that is split across
/// two files is not reassembled.  Bytes that are not UTF-8 are replaced rather than rejected:
/// kernel logs occasionally carry garbage after a crash and a bad line must never stop the run.
use crate::engine::Engine;
use crate::sink::SessionSink;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};

/// Open a named input, where "-" is standard input.

pub fn open_input(filename: &str) -> Result<Box<dyn BufRead>> {
    if filename == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        let file = File::open(filename).with_context(|| format!("Opening input file {filename}"))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Call `f` on every line of `reader`, without the line terminator.  Returns the number of lines.

pub fn for_each_line<F>(reader: &mut dyn BufRead, mut f: F) -> Result<u64>
where
    F: FnMut(&str) -> Result<()>,
{
    let mut buf = vec![];
    let mut lines = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let mut end = buf.len();
        while end > 0 && (buf[end - 1] == b'\n' || buf[end - 1] == b'\r') {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&buf[..end]);
        f(&line)?;
        lines += 1;
    }
    Ok(lines)
}

/// Feed every line of `reader` to the engine.  The engine is not finished; more input may follow.

pub fn process_reader(
    engine: &mut Engine,
    reader: &mut dyn BufRead,
    sink: &mut dyn SessionSink,
) -> Result<u64> {
    for_each_line(reader, |line| engine.feed_line(line, sink))
}

/// Feed the named inputs to the engine in order, then flush whatever sessions remain.

pub fn process_inputs(
    engine: &mut Engine,
    filenames: &[String],
    sink: &mut dyn SessionSink,
) -> Result<()> {
    for filename in filenames {
        log::info!("=== Opening input file: {filename} ===");
        let mut reader = open_input(filename)?;
        let n = process_reader(engine, &mut *reader, sink)?;
        log::info!("{filename}: {n} lines");
    }
    engine.finish(sink)
}

#[cfg(test)]
use crate::grammar::samples;
#[cfg(test)]
use crate::sink::MemorySink;

#[test]
fn test_for_each_line() {
    let text = b"one\r\ntwo\n\nbad \xff byte\nlast";
    let mut reader: &[u8] = text;
    let mut seen = vec![];
    let n = for_each_line(&mut reader, |l| {
        seen.push(l.to_string());
        Ok(())
    })
    .unwrap();
    assert!(n == 5);
    assert!(seen[0] == "one");
    assert!(seen[1] == "two");
    assert!(seen[2] == "");
    assert!(seen[3] == "bad \u{FFFD} byte");
    assert!(seen[4] == "last");
}

#[test]
fn test_process_reader_keeps_state_across_sources() {
    // A transaction split across two sources is still assembled, since the engine carries over,
    // but processing is strictly one source after the other.
    let first = format!(
        "{}\n{}\n",
        samples::open("A", 7, 120, 5, 200, 300, 4096),
        samples::mid("A", 7, 1, 2)
    );
    let second = format!("{}\n", samples::terminal("A", 7, 3));
    let mut engine = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    let mut r1: &[u8] = first.as_bytes();
    let mut r2: &[u8] = second.as_bytes();
    assert!(process_reader(&mut engine, &mut r1, &mut sink).unwrap() == 2);
    assert!(process_reader(&mut engine, &mut r2, &mut sink).unwrap() == 1);
    engine.finish(&mut sink).unwrap();
    assert!(sink.sessions.len() == 1);
    assert!(sink.sessions[0].commits.len() == 1);
}

#[test]
fn test_process_inputs_missing_file() {
    let mut engine = Engine::new(Default::default()).unwrap();
    let mut sink = MemorySink::new();
    let r = process_inputs(
        &mut engine,
        &["/nonexistent/kern.log.1".to_string()],
        &mut sink,
    );
    assert!(r.is_err());
}
