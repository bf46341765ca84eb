// Misc utilities useful to both commitlog and commitlyze.

mod configs;
mod devglob;

// A structure representing the analyzer configuration.

pub use configs::AnalyzerConfig;

// Read the analyzer configuration from a file, or decode it from an already-parsed JSON value.

pub use configs::decode_analyzer_config;
pub use configs::read_analyzer_config;

// Structure representing a device name filter: a set of glob patterns matched against the full
// device name.

pub use devglob::DeviceGlobber;
