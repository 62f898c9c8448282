//! Tracing subscriber setup.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set, so operators can
/// turn on per-target directives without touching the config file. JSON
/// output flattens event fields for the log shipper; the human format
/// stays compact with targets visible.
pub fn init_logging(
    settings: &LoggingSettings,
    force_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let directives =
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| settings.level.clone());
    let filter = EnvFilter::try_new(&directives)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if force_json || settings.json_format {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    info!("Log filter active: {directives}");
    Ok(())
}

/// Logs the startup header: what this build is and what it runs.
pub fn announce_startup() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("unversioned");
    info!("🛡  Squad Aegis control plane v{version}");
    info!("    fleet RCON pool · typed event bus · plugin runtime");
    info!("    identity resolver · ban propagation · live feeds");
}
