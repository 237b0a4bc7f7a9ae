pub mod config;

use std::process::ExitCode;

use config::IopinConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iopin=debug,iopin_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(path), None) = (args.next(), args.next()) else {
        error!("usage: iopin <config.yaml>");
        return ExitCode::FAILURE;
    };

    //nothing touches hardware until the whole file has parsed
    let config = match IopinConfig::load(&path) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to parse config {}: {}", path, err);
            return ExitCode::FAILURE;
        }
    };

    info!("iopin starting {}", config.name.as_deref().unwrap_or(&path));
    match config.start().await {
        Ok(()) => {
            info!("iopin shut down");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("iopin stopped: {}", err);
            ExitCode::FAILURE
        }
    }
}
