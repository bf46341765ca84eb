/// A commit log is the kernel log of a storage node, as written by syslog: mostly noise, with
/// interleaved reports from the file system about transaction commits and snapshot deletions, for
/// any number of file system instances (*devices*) at once.
///
/// Each completed transaction commit is reported on three lines in a fixed order: an *open* line
/// with the duration and flushed amounts, a *mid* line with two reader wait times, and a
/// *terminal* line with the third wait time.  A snapshot deletion is reported on two lines, a start
/// and an end, each stamped with the kernel's uptime clock.  Lines for different devices interleave
/// freely but the lines for one device's transaction never do.
///
/// The data for a device are gathered into a *session* that starts the first time the device is
/// seen and ends when the device is unmounted, when the node reboots (all devices), or when the
/// input runs out.  At its end the session is *flushed*: its tables are handed to a `SessionSink`
/// and forgotten.  The same device name may appear in several sessions; each flush gets a
/// sequence number that is unique across the run.
///
/// This library has as its fundamental task to reconstruct complete commit and deletion records
/// from the log and provide per-session statistics over them:
///
/// - Classify lines by an ordered set of grammars, dropping everything else.
///
/// - Assemble transactions and deletions per device, reporting deviations from the expected line
///   order as anomalies without ever stopping.
///
/// - Bucket commit durations by commit size.
///
/// - Flush sessions at the right points, in a deterministic order.
mod anomaly;
mod engine;
mod grammar;
mod histogram;
mod legacy;
mod reader;
mod session;
mod sink;
mod snapdel;
mod txn;

// A deviation from the expected line order, or an impossible clock reading.  Anomalies are logged
// and counted and never abort processing.

pub use anomaly::Anomaly;

// The correlation engine, its configuration, and its running totals.

pub use engine::Engine;
pub use engine::EngineConfig;
pub use engine::EngineStats;

// Line classification: the kinds of interesting lines, the event decoded from one, and the
// classifier that applies the grammars in order.

pub use grammar::EventKind;
pub use grammar::LineClassifier;
pub use grammar::LogEvent;

// The syslog prefix of a line (timestamp and host), the text before "kernel:".

pub use grammar::line_prefix;

// Commit size buckets and the histogram over them.

pub use histogram::bucket_for;
pub use histogram::BucketStats;
pub use histogram::CommitHistogram;
pub use histogram::HistogramRow;

// The older single-line commit format, which only feeds a histogram.

pub use legacy::LegacyClassifier;
pub use legacy::LegacyCommit;

// Open an input ("-" is stdin), iterate over its lines, and run inputs through an engine.

pub use reader::for_each_line;
pub use reader::open_input;
pub use reader::process_inputs;
pub use reader::process_reader;

// The live state for one device.

pub use session::DeviceSession;

// The flushed form of a session and the interface for consuming it.

pub use sink::FlushReason;
pub use sink::FlushedSession;
pub use sink::MemorySink;
pub use sink::SessionSink;

// Snapshot deletion tracking.

pub use snapdel::PendingDeletion;
pub use snapdel::RootId;
pub use snapdel::SnapshotDeletionRecord;
pub use snapdel::SnapshotDeletionTracker;

// Transaction assembly.

pub use txn::CommitRecord;
pub use txn::OpenFields;
pub use txn::PendingTransaction;
pub use txn::TransactionAssembler;
pub use txn::TxnPhase;
