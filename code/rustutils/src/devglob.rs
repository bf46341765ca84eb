/// Matcher for device (file system instance) names.
///
/// Grammar for patterns:
///
///  pattern ::= element+
///  element ::= literal | star | set
///  literal ::= <any character other than '[' or '*'>
///  star ::= '*'
///  set ::= '[' set-elt ("," set-elt)* ']'
///  set-elt ::= number | number "-" number
///
/// A star matches any run of characters, including the empty run.  A set is expanded into the
/// alternation of the numbers it contains.  The pattern must match the entire device name.
///
/// Device names come from the `FS[...]` tag of kernel log lines and are things like `vpsa12`,
/// `pool-3` or a UUID, so there is no element structure as there is for host names.
use anyhow::{bail, Result};
use regex::Regex;

/// A `DeviceGlobber` holds a number of patterns, added with `insert`.  The `matches` method
/// returns true if any of them match its argument.

pub struct DeviceGlobber {
    // Matcher + source pattern, for posterity.
    matchers: Vec<(Regex, String)>,
}

impl DeviceGlobber {
    /// Create a new, empty filter.

    pub fn new() -> DeviceGlobber {
        DeviceGlobber { matchers: vec![] }
    }

    /// Add the pattern to the set of patterns in the matcher.

    pub fn insert(&mut self, pattern: &str) -> Result<()> {
        let re = compile_globber(pattern)?;
        self.matchers.push((re, pattern.to_string()));
        Ok(())
    }

    /// Return true iff the filter has no patterns.

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// The source patterns, in insertion order.

    pub fn patterns(&self) -> Vec<&str> {
        self.matchers.iter().map(|(_, p)| p.as_str()).collect()
    }

    /// Match s against the patterns and return true iff it matches at least one pattern.

    pub fn matches(&self, s: &str) -> bool {
        self.matchers.iter().any(|(re, _)| re.is_match(s))
    }
}

impl Default for DeviceGlobber {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_globber(p: &str) -> Result<Regex> {
    if p.is_empty() {
        bail!("Empty device pattern");
    }
    let cs = p.chars().collect::<Vec<char>>();
    let mut i = 0usize;
    let mut r = "^".to_string();
    while i < cs.len() {
        if r.len() > 50000 {
            bail!("Expression too large, use more '*'")
        }
        match cs[i] {
            '*' => {
                i += 1;
                r += ".*";
            }
            '[' => {
                i += 1;
                let mut set = vec![];
                loop {
                    let mut n0;
                    (n0, i) = read_int(&cs, i)?;
                    if i < cs.len() && cs[i] == '-' {
                        i += 1;
                        let n1;
                        (n1, i) = read_int(&cs, i)?;
                        if n0 > n1 {
                            bail!("Invalid range");
                        }
                        while n0 <= n1 {
                            set.push(n0.to_string());
                            n0 += 1;
                            if set.len() > 10000 {
                                bail!("Range too large, use more '*'");
                            }
                        }
                    } else {
                        set.push(n0.to_string());
                    }
                    if i < cs.len() && cs[i] == ']' {
                        i += 1;
                        break;
                    }
                    if i >= cs.len() || cs[i] != ',' {
                        bail!("Expected ','");
                    }
                    i += 1;
                }
                r += "(?:";
                r += &set.join("|");
                r += ")";
            }
            c => {
                r += &regex::escape(&c.to_string());
                i += 1;
            }
        }
    }
    r += "$";
    Ok(Regex::new(&r)?)
}

fn read_int(cs: &[char], mut i: usize) -> Result<(usize, usize)> {
    let first = i;
    let mut n = 0u64;
    while i < cs.len() && cs[i].is_ascii_digit() {
        n = n * 10 + (u32::from(cs[i]) - 48) as u64;
        if n > 0xFFFFFFFF {
            bail!("Number out of range in glob set");
        }
        i += 1;
    }
    if i == first {
        bail!("Invalid number in glob set");
    }
    Ok((n as usize, i))
}

#[test]
fn test_devglob_literal_and_star() {
    let mut g = DeviceGlobber::new();
    assert!(g.is_empty());
    g.insert("vpsa1").unwrap();
    g.insert("pool-*").unwrap();
    assert!(!g.is_empty());

    assert!(g.matches("vpsa1"));
    assert!(!g.matches("vpsa12"));
    assert!(!g.matches("xvpsa1"));
    assert!(g.matches("pool-"));
    assert!(g.matches("pool-3a"));
    assert!(!g.matches("pool"));
    assert!(g.patterns() == vec!["vpsa1", "pool-*"]);
}

#[test]
fn test_devglob_sets() {
    let mut g = DeviceGlobber::new();
    g.insert("vpsa[1-3,7]").unwrap();
    assert!(g.matches("vpsa1"));
    assert!(g.matches("vpsa3"));
    assert!(g.matches("vpsa7"));
    assert!(!g.matches("vpsa4"));
    assert!(!g.matches("vpsa10"));

    let mut g = DeviceGlobber::new();
    g.insert("vpsa[1-2]*").unwrap();
    assert!(g.matches("vpsa10"));
    assert!(g.matches("vpsa2.x"));
    assert!(!g.matches("vpsa3"));
}

#[test]
fn test_devglob_escapes_regex_chars() {
    let mut g = DeviceGlobber::new();
    g.insert("a.b").unwrap();
    assert!(g.matches("a.b"));
    assert!(!g.matches("axb"));
}

#[test]
fn test_devglob_errors() {
    let mut g = DeviceGlobber::new();
    assert!(g.insert("").is_err());
    assert!(g.insert("x[").is_err());
    assert!(g.insert("x[3-1]").is_err());
    assert!(g.insert("x[a]").is_err());
    assert!(g.insert("x[1;2]").is_err());
    assert!(g.is_empty());
}
