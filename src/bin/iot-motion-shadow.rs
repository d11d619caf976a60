//! Shadow agent: mirrors the PIR sensor state into a device shadow.

use clap::Parser;
use iot_motion_sensor::cli::ShadowArgs;
use iot_motion_sensor::observability::init_default_logging;
use iot_motion_sensor::runtime::run_agent;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = ShadowArgs::parse();

    init_default_logging();

    info!("Starting iot-motion-shadow v{}", env!("CARGO_PKG_VERSION"));

    let print_config = args.common.print_config;
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if print_config {
        match config.to_toml() {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                error!("Failed to render configuration: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = run_agent(config).await {
        error!("Agent failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}
