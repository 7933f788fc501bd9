mod cli;
mod commands;
mod error;

use clap::Parser;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use aerolink_api::{DeviceClient, DeviceConfig};

use crate::cli::{Cli, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("error: {err}");
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let client = DeviceClient::new(build_config(&cli.global));
    commands::dispatch(cli.command, &client).await
}

fn build_config(global: &GlobalOpts) -> DeviceConfig {
    let mut config = DeviceConfig::new(
        global.host.clone(),
        SecretString::from(global.password.clone()),
    );
    config.port = global.port;
    config.username = global.username.clone();
    config.use_tls = !global.plain;
    config
}
