//! SQS ⇄ IRC Gateway - Entry Point
//!
//! Loads the configuration, connects to IRC and SQS, and routes until the
//! IRC server disconnects.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sqs_irc_gateway::config::config_path_from_args;
use sqs_irc_gateway::{Config, Gateway, GatewayError, SqsClient};

async fn start() -> Result<(), GatewayError> {
    let path = config_path_from_args(env::args().skip(1))?;
    let config = Config::load(&path)?;

    info!("starting {}", config.nickname);

    let client = Arc::new(SqsClient::from_config(&config).await);
    Gateway::new(config, client).run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=sqs_irc_gateway=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sqs_irc_gateway=info")),
        )
        .init();

    ExitCode::from(exit_status(start().await))
}

/// Process exit status for the gateway's outcome: 0 after the server closed
/// the connection, 1 after any fatal error
fn exit_status(result: Result<(), GatewayError>) -> u8 {
    match result {
        Ok(()) => {
            info!("gateway stopped");
            0
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}
