#![cfg(not(tarpaulin_include))]

use sheetforms::app;
use sheetforms::config::Config;

/// Main entry point for the web application
///
/// Loads `.env` if present, reads the configuration from the environment
/// and serves the form application until the process is stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    log::info!(
        "Reading forms from '{}', writing to '{}' by default",
        config.input_sheet,
        config.target_sheet
    );

    app::run(config).await
}
