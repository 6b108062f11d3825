// Urban Sound Classifier Core
// Log-mel feature extraction, CNN training and a prediction service for
// short urban sound clips

// Module declarations
pub mod audio;
pub mod cache;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod features;
pub mod http;
pub mod model;
pub mod testing;

use std::str::FromStr;

use tracing::Level;

/// Environment variable selecting the log level (`error` .. `trace`)
pub const LOG_LEVEL_ENV: &str = "US8K_LOG";

/// Install the fmt subscriber for the binaries
///
/// `verbose` forces `debug`; otherwise `$US8K_LOG` decides, defaulting to
/// `info`. Records emitted through the `log` facade are forwarded too.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else {
        std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|raw| Level::from_str(raw.trim()).ok())
            .unwrap_or(Level::INFO)
    };

    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_err()
    {
        log::debug!("Logging already initialized");
    }
}
