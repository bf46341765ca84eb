/// `commitlyze` -- Analyze transaction commits and snapshot deletions in kernel logs
///
/// Run with --help for brief help.
///
/// Quirks
///
/// The output prefix can come from the command line or from the config file; the command line wins.
/// The same goes for the device patterns, except that patterns from both places are combined.
///
/// Sessions are numbered in the order they are flushed, not the order they are created, and the
/// number is the only thing that keeps two sessions for the same device apart in the output file
/// names.  Two runs over different slices of the same log will number things differently.
///
/// Input files are processed in the order given and state carries over from one to the next, so
/// rotated logs should be given oldest first.  A transaction whose lines straddle a rotation is
/// still assembled.
mod buckets;
mod csvsink;
mod format;
mod parse;
mod report;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use commitlog::{Engine, EngineConfig};
use rustutils::DeviceGlobber;
use std::io;
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Correlate commits and snapshot deletions per device session and write CSV files
    Commits(CommitsCmdArgs),

    /// Classify the log lines and print raw, comma-separated values
    Parse(ParseCmdArgs),

    /// Bucket commits from logs in the older single-line format into one CSV file
    Buckets(BucketsCmdArgs),
}

#[derive(Args, Debug)]
pub struct CommitsCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    config_args: CommitsConfigArgs,

    #[command(flatten)]
    print_args: CommitsPrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct ParseCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    print_args: ParsePrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct BucketsCmdArgs {
    /// File to store the CSV output
    #[arg(long, short)]
    output_file: String,

    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Log files to analyze, in order, "-" for stdin
    #[arg(required = true)]
    logfiles: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct CommitsConfigArgs {
    /// Prefix for the names of the CSV output files [default: from --config-file]
    #[arg(long, short)]
    output_prefix: Option<String>,

    /// File containing JSON data with analyzer configuration [default: none]
    #[arg(long)]
    config_file: Option<String>,

    /// Analyze only devices matching this pattern, eg vpsa[1-4] or pool-* (repeatable) [default: all]
    #[arg(long)]
    device: Vec<String>,

    /// Do not write output for sessions that recorded neither commits nor deletions
    #[arg(long, default_value_t = false)]
    skip_empty_sessions: bool,
}

#[derive(Args, Debug, Default)]
pub struct CommitsPrintArgs {
    /// Select fields and format for the session summary, "help" for help
    #[arg(long)]
    fmt: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct ParsePrintArgs {
    /// Select fields and format for the output, "help" for help
    #[arg(long)]
    fmt: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct MetaArgs {
    /// Log progress and statistics to stderr (RUST_LOG overrides)
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() {
    match commitlyze() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            process::exit(1);
        }
    }
}

fn commitlyze() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        // Syntax:
        //  - components of the version string are space-separated but there are spaces nowhere else
        //  - the keyword "commitlyze" is always the first component
        //  - every component is keyword(value)
        println!("commitlyze version({})", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if match cli.command {
        Commands::Commits(ref commits_args) => {
            format::maybe_help(&commits_args.print_args.fmt, &report::fmt_help)
        }
        Commands::Parse(ref parse_args) => {
            format::maybe_help(&parse_args.print_args.fmt, &parse::fmt_help)
        }
        Commands::Buckets(_) | Commands::Version => false,
    } {
        return Ok(());
    }

    let meta_args = match cli.command {
        Commands::Commits(ref commits_args) => &commits_args.meta_args,
        Commands::Parse(ref parse_args) => &parse_args.meta_args,
        Commands::Buckets(ref buckets_args) => &buckets_args.meta_args,
        Commands::Version => bail!("Unexpected"),
    };
    init_logging(meta_args);

    match cli.command {
        Commands::Commits(ref commits_args) => {
            let (prefix, config) = commits_config(&commits_args.config_args)?;
            let mut engine = Engine::new(config)?;
            let mut sink = csvsink::CsvFileSink::new(&prefix);
            commitlog::process_inputs(&mut engine, &commits_args.source_args.logfiles, &mut sink)?;
            report::print_summaries(
                &mut io::stdout(),
                &commits_args.print_args,
                sink.summaries(),
                engine.stats(),
            )
        }
        Commands::Parse(ref parse_args) => parse::print_parsed_inputs(
            &mut io::stdout(),
            &parse_args.print_args,
            &parse_args.source_args.logfiles,
        ),
        Commands::Buckets(ref buckets_args) => buckets::write_legacy_buckets(
            &buckets_args.output_file,
            &buckets_args.source_args.logfiles,
        ),
        Commands::Version => bail!("Unexpected"),
    }
}

fn init_logging(meta_args: &MetaArgs) {
    let level = if meta_args.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Merge the config file, if any, with the command line.  Returns the output prefix and the engine
/// configuration.

fn commits_config(args: &CommitsConfigArgs) -> Result<(String, EngineConfig)> {
    let file_config = if let Some(ref config_filename) = args.config_file {
        rustutils::read_analyzer_config(config_filename)?
    } else {
        Default::default()
    };

    let prefix = if let Some(ref p) = args.output_prefix {
        p.clone()
    } else if let Some(ref p) = file_config.output_prefix {
        p.clone()
    } else {
        bail!("No output prefix, use -o or set output-prefix in the config file")
    };

    let mut devices = DeviceGlobber::new();
    for pattern in file_config.devices.iter().chain(args.device.iter()) {
        devices.insert(pattern)?;
    }
    if !devices.is_empty() {
        log::info!("Analyzing devices: {}", devices.patterns().join(" "));
    }

    Ok((
        prefix,
        EngineConfig {
            skip_empty_sessions: args.skip_empty_sessions || file_config.skip_empty_sessions,
            devices,
        },
    ))
}

#[test]
fn test_commits_config() {
    let args = CommitsConfigArgs {
        output_prefix: Some("/tmp/x".to_string()),
        device: vec!["vpsa[1,3]".to_string()],
        ..Default::default()
    };
    let (prefix, config) = commits_config(&args).unwrap();
    assert!(prefix == "/tmp/x");
    assert!(!config.skip_empty_sessions);
    assert!(config.devices.matches("vpsa3"));
    assert!(!config.devices.matches("vpsa2"));

    // No prefix anywhere
    assert!(commits_config(&Default::default()).is_err());

    // The config file supplies the prefix and more patterns
    let args = CommitsConfigArgs {
        config_file: Some("../tests/rustutils/whitebox-config.json".to_string()),
        device: vec!["other".to_string()],
        ..Default::default()
    };
    let (prefix, config) = commits_config(&args).unwrap();
    assert!(prefix == "/tmp/vpsa-commits");
    assert!(config.skip_empty_sessions);
    assert!(config.devices.matches("vpsa4"));
    assert!(config.devices.matches("pool-east"));
    assert!(config.devices.matches("other"));
    assert!(!config.devices.matches("vpsa5"));
}

#[test]
fn test_commits_end_to_end() {
    use std::fs;
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("kern.log");
    let mut f = fs::File::create(&input).unwrap();
    let lines = [
        "Oct 16 10:00:00 node1 kernel: [    0.000000] Linux version 3.14.79-zadara (gcc 4.8)",
        "Oct 16 10:00:01 node1 kernel: [  101.000001] ZBTRFS_TXN_COMMIT_PHASE_DONE:3042: FS[vpsa1]: txn[7] took 120ms phases: open=5ms commit=17ms read=200KB flushed=300/4096Kb",
        "Oct 16 10:00:01 node1 kernel: [  101.000002] ZBTRFS_TXN_COMMIT_PHASE_DONE:3050: FS[vpsa1]: txn[7] rdr1:1 wait rdr2:2",
        "Oct 16 10:00:01 node1 kernel: [  101.000003] ZBTRFS_TXN_COMMIT_PHASE_DONE:3057: FS[vpsa1] txn[7] done rdr3:3",
        "Oct 16 10:00:05 node1 kernel: [ 110.500000] btrfs_drop_snapshot:8120: FS[vpsa2]: starting DELETION of root=(5,100)",
        "Oct 16 10:00:09 node1 kernel: [ 125.250000] btrfs_drop_snapshot:8290: FS[vpsa2]: root=(5,100) DELETED err=0",
        "Oct 16 11:00:00 node1 kernel: [ 3600.100200] zbtrfs_fs_info_fini:1201: FS[vpsa1]: FINI",
    ];
    for l in lines {
        writeln!(f, "{l}").unwrap();
    }
    drop(f);

    let prefix = dir.path().join("out").to_str().unwrap().to_string();
    let args = CommitsConfigArgs {
        output_prefix: Some(prefix.clone()),
        ..Default::default()
    };
    let (prefix, config) = commits_config(&args).unwrap();
    let mut engine = Engine::new(config).unwrap();
    let mut sink = csvsink::CsvFileSink::new(&prefix);
    commitlog::process_inputs(
        &mut engine,
        &[input.to_str().unwrap().to_string()],
        &mut sink,
    )
    .unwrap();

    // vpsa1 is flushed by its unmount, vpsa2 at the end of the input
    let s = sink.summaries();
    assert!(s.len() == 2);
    assert!(s[0].device == "vpsa1" && s[0].reason == "unmount" && s[0].commits == 1);
    assert!(s[1].device == "vpsa2" && s[1].reason == "eof" && s[1].deletions == 1);

    let raw = fs::read_to_string(format!("{prefix}.0000.vpsa1.raw_commit_stats.csv")).unwrap();
    assert!(raw.ends_with("\n7,120,5,200,300,4096,1,2,3\n"));
    let dels = fs::read_to_string(format!("{prefix}.0001.vpsa2.snap_deletion_stats.csv")).unwrap();
    assert!(dels.ends_with("\n0,110,15,5-100\n"));
}
