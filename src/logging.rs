//! Logging setup: `log` facade with an `env_logger` backend.
//!
//! Level priority:
//!
//! 1. `RUST_LOG`, when set
//! 2. `--quiet` (errors only), or `-v` / `-vv` (debug / trace)
//! 3. info
//!
//! Logs go to stderr so that `find` output and `--json` summaries on stdout
//! stay machine-readable.
//!
//! ```rust,no_run
//! use dupler::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("visible with -v");
//! ```

use std::env;
use std::io::Write;

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Install the global logger.
///
/// Calling it again is harmless: the first logger stays installed.
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = env::var_os("RUST_LOG").is_some();

    let mut builder = Builder::new();
    builder.target(Target::Stderr);
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(level_for(verbose, quiet));
    }
    configure_format(&mut builder, verbose);

    if builder.try_init().is_err() {
        return;
    }
    if from_env {
        log::debug!("Log filter taken from RUST_LOG");
    } else {
        log::debug!("Logging at level {}", level_for(verbose, quiet));
    }
}

/// Level selected by the CLI flags alone.
#[must_use]
pub fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        if verbose >= 1 {
            writeln!(
                buf,
                "{} {style}{:<5}{style:#} [{}] {}",
                buf.timestamp_seconds(),
                record.level(),
                record.module_path().unwrap_or("dupler"),
                record.args()
            )
        } else {
            writeln!(
                buf,
                "{} {style}{:<5}{style:#} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        }
    });

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(buf, "{style}{:<5}{style:#} {}", record.level(), record.args())
        });
    }
}
