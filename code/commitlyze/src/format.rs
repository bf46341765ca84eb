/// Generic formatting code for a set of records to be presented columnar, as csv, or as json, and
/// (except for json) with or without a header and with or without named fields.
///
/// A command defines a table of named formatters for its record type plus a set of aliases, and
/// the user selects among them with `--fmt=field,field,...,control,...`.
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::io;

pub type Formatters<DataT> = HashMap<String, &'static dyn Fn(&DataT) -> String>;
pub type Aliases = HashMap<String, Vec<String>>;

pub struct Help {
    pub fields: Vec<String>,
    pub aliases: Vec<(String, Vec<String>)>,
    pub defaults: String,
}

impl Help {
    pub fn new<DataT: 'static>(formatters: &Formatters<DataT>, aliases: &Aliases, defaults: &str) -> Help {
        Help {
            fields: formatters.keys().cloned().collect::<Vec<String>>(),
            aliases: aliases
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<(String, Vec<String>)>>(),
            defaults: defaults.to_string(),
        }
    }
}

/// If `fmt` asks for help then print the help text from `f` and return true.

pub fn maybe_help<F>(fmt: &Option<String>, f: F) -> bool
where
    F: Fn() -> Help,
{
    if let Some(ref s) = fmt {
        if s.starts_with("help") {
            let mut help = f();
            println!("Syntax:\n  --fmt=(field|alias|control),...");
            println!("\nFields:");
            help.fields.sort();
            for f in help.fields {
                println!("  {f}");
            }
            if !help.aliases.is_empty() {
                println!("\nAliases:");
                help.aliases.sort();
                for (name, mut fields) in help.aliases {
                    fields.sort();
                    let explication = fields.join(",");
                    println!("  {name} --> {explication}");
                }
            }
            println!("\nDefaults:\n  {}", help.defaults);
            println!("\nControl:\n  csv\n  csvnamed\n  fixed\n  json\n  header\n  noheader");
            return true;
        }
    }
    false
}

/// Return a vector of the known fields in `spec` wrt the formatters, and a HashSet of any other
/// strings found in `spec`.  It returns an error if zero output fields were selected.

pub fn parse_fields<'a, DataT: 'static>(
    spec: &'a str,
    formatters: &Formatters<DataT>,
    aliases: &'a Aliases,
) -> Result<(Vec<&'a str>, HashSet<&'a str>)> {
    let mut others = HashSet::new();
    let mut fields = vec![];
    for x in spec.split(',') {
        if formatters.contains_key(x) {
            fields.push(x);
        } else if let Some(aliases) = aliases.get(x) {
            for alias in aliases {
                if formatters.contains_key(alias) {
                    fields.push(alias.as_ref());
                } else {
                    others.insert(alias.as_ref());
                }
            }
        } else {
            others.insert(x);
        }
    }
    if fields.is_empty() {
        bail!("No output fields were selected")
    }
    for x in &others {
        match *x {
            "csv" | "csvnamed" | "json" | "fixed" | "header" | "noheader" => {}
            "" => {}
            _ => bail!("Unknown field or control '{x}', try --fmt=help"),
        }
    }
    Ok((fields, others))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub json: bool,   // json explicitly requested
    pub csv: bool,    // csv or csvnamed explicitly requested
    pub fixed: bool,  // fixed output explicitly requested
    pub named: bool,  // csvnamed explicitly requested
    pub header: bool, // true if nothing requested b/c fixed+header is default
}

pub fn standard_options(others: &HashSet<&str>) -> FormatOptions {
    let csvnamed = others.contains("csvnamed");
    let csv = others.contains("csv") || csvnamed;
    let json = others.contains("json") && !csv;
    let fixed = others.contains("fixed") && !csv && !json;
    // json gets no header, even if one is requested
    let header =
        (!csv && !json && !others.contains("noheader")) || (csv && others.contains("header"));
    FormatOptions {
        csv,
        json,
        fixed,
        named: csvnamed,
        header,
    }
}

/// The `fields` are the names of formatting functions to get from the `formatters`, these are
/// applied to the `data`.  Set `opts.header` to true to print a first row with field names as a
/// header (independent of csv).  Set `opts.csv` to true to get CSV output instead of fixed-format.

pub fn format_data<DataT: 'static>(
    output: &mut dyn io::Write,
    fields: &[&str],
    formatters: &Formatters<DataT>,
    opts: &FormatOptions,
    data: &[DataT],
) -> Result<()> {
    let fmts = fields
        .iter()
        .map(|kwd| match formatters.get(*kwd) {
            Some(f) => Ok(*f),
            None => bail!("Unknown field '{kwd}'"),
        })
        .collect::<Result<Vec<&'static dyn Fn(&DataT) -> String>>>()?;

    let mut cols = Vec::<Vec<String>>::new();
    cols.resize(fields.len(), vec![]);
    for x in data {
        for (i, f) in fmts.iter().enumerate() {
            cols[i].push(f(x));
        }
    }

    if opts.csv {
        format_csv(output, fields, opts, cols)
    } else if opts.json {
        format_json(output, fields, cols)
    } else {
        format_fixed_width(output, fields, opts, cols);
        Ok(())
    }
}

fn format_fixed_width(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) {
    // The column width is the max across all the entries in the column (including header,
    // if present).
    let mut widths = vec![0; fields.len()];
    if opts.header {
        for (i, kwd) in fields.iter().enumerate() {
            widths[i] = usize::max(widths[i], kwd.len());
        }
    }
    for (i, col) in cols.iter().enumerate() {
        for val in col {
            widths[i] = usize::max(widths[i], val.len());
        }
    }

    let nrows = cols.first().map(|c| c.len()).unwrap_or(0);

    if opts.header {
        let mut s = "".to_string();
        for (i, kwd) in fields.iter().enumerate() {
            let w = widths[i];
            s += format!("{:w$}  ", kwd).as_str();
        }
        // Ignore errors here, they are common for broken pipelines
        let _ = output.write(s.trim_end().as_bytes());
        let _ = output.write(b"\n");
    }

    for row in 0..nrows {
        let mut s = "".to_string();
        for (col, vals) in cols.iter().enumerate() {
            let w = widths[col];
            s += format!("{:w$}  ", vals[row]).as_str();
        }
        // Ignore errors here, they are common for broken pipelines
        let _ = output.write(s.trim_end().as_bytes());
        let _ = output.write(b"\n");
    }
}

fn format_csv(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);

    if opts.header {
        writer.write_record(fields)?;
    }

    let nrows = cols.first().map(|c| c.len()).unwrap_or(0);
    for row in 0..nrows {
        let mut out_fields = Vec::new();
        for (col, vals) in cols.iter().enumerate() {
            let val = &vals[row];
            if opts.named {
                out_fields.push(format!("{}={}", fields[col], val));
            } else {
                out_fields.push(val.to_string());
            }
        }
        writer.write_record(out_fields)?;
    }

    writer.flush()?;
    Ok(())
}

fn format_json(output: &mut dyn io::Write, fields: &[&str], cols: Vec<Vec<String>>) -> Result<()> {
    let nrows = cols.first().map(|c| c.len()).unwrap_or(0);
    let mut objects = vec![];
    for row in 0..nrows {
        let mut obj = json::JsonValue::new_object();
        for (col, vals) in cols.iter().enumerate() {
            obj[fields[col]] = vals[row].clone().into();
        }
        objects.push(obj);
    }
    output.write_all(json::stringify(objects).as_bytes())?;
    output.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
struct Pair {
    name: &'static str,
    n: u32,
}

#[cfg(test)]
fn format_pair_name(p: &Pair) -> String {
    p.name.to_string()
}

#[cfg(test)]
fn format_pair_n(p: &Pair) -> String {
    p.n.to_string()
}

#[cfg(test)]
fn pair_formatters() -> (Formatters<Pair>, Aliases) {
    let mut formatters: Formatters<Pair> = HashMap::new();
    formatters.insert("name".to_string(), &format_pair_name);
    formatters.insert("n".to_string(), &format_pair_n);
    let mut aliases: Aliases = HashMap::new();
    aliases.insert("all".to_string(), vec!["name".to_string(), "n".to_string()]);
    (formatters, aliases)
}

#[cfg(test)]
fn render(spec: &str, data: &[Pair]) -> String {
    let (formatters, aliases) = pair_formatters();
    let (fields, others) = parse_fields(spec, &formatters, &aliases).unwrap();
    let opts = standard_options(&others);
    let mut out = Vec::new();
    format_data(&mut out, &fields, &formatters, &opts, data).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_format_modes() {
    let data = [Pair { name: "vpsa1", n: 7 }, Pair { name: "b", n: 12 }];
    assert_eq!(render("all", &data), "name   n\nvpsa1  7\nb      12\n");
    assert_eq!(render("all,noheader", &data), "vpsa1  7\nb      12\n");
    assert_eq!(render("n,name,csv", &data), "7,vpsa1\n12,b\n");
    assert_eq!(render("name,csv,header", &data), "name\nvpsa1\nb\n");
    assert_eq!(render("name,n,csvnamed", &data), "name=vpsa1,n=7\nname=b,n=12\n");
    assert_eq!(
        render("name,n,json", &data),
        "[{\"name\":\"vpsa1\",\"n\":\"7\"},{\"name\":\"b\",\"n\":\"12\"}]\n"
    );
}

#[test]
fn test_parse_fields_errors() {
    let (formatters, aliases) = pair_formatters();
    assert!(parse_fields("csv", &formatters, &aliases).is_err());
    assert!(parse_fields("name,bogus", &formatters, &aliases).is_err());
    let (fields, others) = parse_fields("all,fixed", &formatters, &aliases).unwrap();
    assert!(fields == vec!["name", "n"]);
    let opts = standard_options(&others);
    assert!(opts.fixed && opts.header && !opts.csv && !opts.json);
}
