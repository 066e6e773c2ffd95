//! flowdeck server entry point
//!
//! Loads configuration from the environment, initializes tracing in the
//! configured format, and starts the HTTP server with the workflow
//! management API, dynamic endpoints, and the cron scheduler.

use flowdeck::{config::Config, server::start_server};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    if config.log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .init();
    }

    tracing::info!("starting flowdeck server");
    start_server(config).await?;
    Ok(())
}
