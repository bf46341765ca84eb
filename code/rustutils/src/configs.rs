/// Read analyzer configuration from a json file.
///
/// File format:
///
/// An object { ... } with the following named fields and value types, all optional:
///
///   output-prefix - string, the prefix for the names of the CSV files written per flushed
///      session; the command line -o option overrides it
///   skip-empty-sessions - bool, if true then a session that recorded neither commits nor
///      snapshot deletions produces no output when it is flushed (default false)
///   devices - array of strings, device name patterns (see devglob.rs); when present only lines
///      for matching devices are analyzed, all other device lines are ignored
///
/// Any field name starting with '#' is reserved for arbitrary comments.  Any other field name is
/// an error, since a misspelled option would otherwise be silently ignored.
use anyhow::{bail, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path;

// See above comment block for field documentation.

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub output_prefix: Option<String>,
    pub skip_empty_sessions: bool,
    pub devices: Vec<String>,
}

/// Since the input is human-generated and all fields are optional, I've opted to use the generic
/// JSON parser followed by explicit decoding of the fields, rather than a (derived) strongly-typed
/// parser.

pub fn read_analyzer_config(filename: &str) -> Result<AnalyzerConfig> {
    let file = File::open(path::Path::new(filename))?;
    let reader = BufReader::new(file);
    let v = serde_json::from_reader(reader)?;
    decode_analyzer_config(&v)
}

pub fn decode_analyzer_config(v: &Value) -> Result<AnalyzerConfig> {
    let fields = if let Value::Object(fields) = v {
        fields
    } else {
        bail!("Expected an object value")
    };
    for name in fields.keys() {
        match name.as_str() {
            "output-prefix" | "skip-empty-sessions" | "devices" => {}
            s if s.starts_with('#') => {}
            s => bail!("Unknown field '{s}'"),
        }
    }
    let mut cfg: AnalyzerConfig = Default::default();
    cfg.output_prefix = grab_string_opt(fields, "output-prefix")?;
    cfg.skip_empty_sessions = grab_bool_opt(fields, "skip-empty-sessions")?.unwrap_or(false);
    cfg.devices = grab_strings_opt(fields, "devices")?;
    Ok(cfg)
}

fn grab_string_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<String>> {
    if let Some(val) = fields.get(name) {
        if let Value::String(s) = val {
            if s.is_empty() {
                bail!("Field '{name}' must not be empty");
            }
            Ok(Some(s.to_string()))
        } else {
            bail!("Field '{name}' must have a string value");
        }
    } else {
        Ok(None)
    }
}

fn grab_strings_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Vec<String>> {
    let mut result = vec![];
    match fields.get(name) {
        Some(Value::Array(vals)) => {
            for v in vals {
                if let Value::String(s) = v {
                    result.push(s.to_string());
                } else {
                    bail!("Field '{name}' must have string values");
                }
            }
        }
        Some(_) => bail!("Field '{name}' must be an array"),
        None => {}
    }
    Ok(result)
}

fn grab_bool_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<bool>> {
    if let Some(d) = fields.get(name) {
        if let Value::Bool(b) = d {
            Ok(Some(*b))
        } else {
            bail!("Field '{name}' must have a boolean value");
        }
    } else {
        Ok(None)
    }
}

// Basic whitebox test that the reading of configs works.

#[test]
fn test_config() {
    let conf = read_analyzer_config("../tests/rustutils/whitebox-config.json").unwrap();
    assert!(conf.output_prefix == Some("/tmp/vpsa-commits".to_string()));
    assert!(conf.skip_empty_sessions == true);
    assert!(conf.devices.len() == 2 && conf.devices[0] == "vpsa[1-4]" && conf.devices[1] == "pool-*");
}

#[test]
fn test_config_defaults() {
    let conf = decode_analyzer_config(&serde_json::json!({ "#note": "nothing here" })).unwrap();
    assert!(conf == AnalyzerConfig::default());
    assert!(conf.output_prefix.is_none());
    assert!(!conf.skip_empty_sessions);
    assert!(conf.devices.is_empty());
}

#[test]
fn test_config_errors() {
    assert!(decode_analyzer_config(&serde_json::json!([])).is_err());
    assert!(decode_analyzer_config(&serde_json::json!({ "devcies": ["x"] })).is_err());
    assert!(decode_analyzer_config(&serde_json::json!({ "devices": "x" })).is_err());
    assert!(decode_analyzer_config(&serde_json::json!({ "devices": [1] })).is_err());
    assert!(decode_analyzer_config(&serde_json::json!({ "skip-empty-sessions": 1 })).is_err());
    assert!(decode_analyzer_config(&serde_json::json!({ "output-prefix": "" })).is_err());
    assert!(read_analyzer_config("../tests/rustutils/no-such-config.json").is_err());
}
