//! Logging bootstrap for the binary. The core itself only uses the `log`
//! macros and stays agnostic of the installed logger.

use log::LevelFilter;

/// Initializes env_logger. `RUST_LOG` overrides the default level.
pub fn init() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    log::info!("Logging initialized");
}
