//! Logging initialization shared by all four binaries.
//!
//! Non-`-v` runs only ever print prompts, stdout/stderr passthrough, and
//! a one-line disconnect reason (spec §7); everything else — kind,
//! `msg_id`, `seq` of each envelope, transport internals — goes through
//! `log` at `debug`/`trace` and only surfaces with `-v`.

use env_logger::Builder;
use log::LevelFilter;

/// Initialize the global logger.
///
/// `verbose` raises the default filter from `warn` to `debug`; `RUST_LOG`
/// always takes precedence when set, matching `env_logger`'s normal
/// override order.
pub fn init(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let mut builder = Builder::new();
    builder.filter_level(default_level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    let _ = builder.try_init();
}
