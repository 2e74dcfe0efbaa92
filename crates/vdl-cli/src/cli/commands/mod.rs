//! CLI command handlers, one file per subcommand.

mod completions;
mod formats;
mod get;
mod man;
mod probe;
mod targets;
mod watch;

pub use completions::run_completions;
pub use formats::run_formats;
pub use get::run_get;
pub use man::run_man;
pub use probe::run_probe;
pub use targets::collect_targets;
