//! Command-line definition.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "aerolink",
    about = "Control Siegenia AEROPAC ventilation devices",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device hostname or IP address.
    #[arg(long, short = 'H', env = "AEROLINK_HOST")]
    pub host: String,

    /// Device WebSocket port.
    #[arg(long, default_value_t = 443, env = "AEROLINK_PORT")]
    pub port: u16,

    /// Login user.
    #[arg(long, short, default_value = "admin", env = "AEROLINK_USERNAME")]
    pub username: String,

    /// Login password.
    #[arg(long, short, env = "AEROLINK_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Connect without TLS (older firmware without HTTPS).
    #[arg(long)]
    pub plain: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show device identity (type, serial, firmware/hardware versions).
    Info,
    /// Show current operational parameters.
    Params,
    /// Show current device state.
    State,
    /// Switch the device on.
    On,
    /// Switch the device off.
    Off,
    /// Set the ventilation level (0 through 7; 0 is off).
    Fan {
        level: u8,
    },
    /// Stream push updates from the device until interrupted.
    Watch,
}
