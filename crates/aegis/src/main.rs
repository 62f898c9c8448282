//! Squad Aegis control plane entry point.

use clap::Parser;
use lib_aegis::app::Application;
use lib_aegis::cli::CliArgs;
use lib_aegis::config::AppConfig;
use lib_aegis::logging::init_logging;
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging needs the config, but config loading wants to log; peek at the
    // file once with defaults applied, then initialize properly.
    let config = AppConfig::load_from_file(&args.config)
        .await
        .unwrap_or_default();
    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    init_logging(&logging, args.json_logs)?;

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Startup failed: {e}");
            return Err(e);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Runtime failure: {e}");
        return Err(e);
    }
    Ok(())
}
