//! Command handlers.
//!
//! Every command runs inside one connect → login → command → disconnect
//! cycle; the device client does the actual work.

use aerolink_api::{DeviceClient, device_type_name};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::cli::Command;
use crate::error::CliError;

pub async fn dispatch(command: Command, client: &DeviceClient) -> Result<(), CliError> {
    client.connect().await?;
    if !client.login().await? {
        client.disconnect().await;
        return Err(CliError::AuthFailed);
    }

    let result = run(command, client).await;
    client.disconnect().await;
    result
}

async fn run(command: Command, client: &DeviceClient) -> Result<(), CliError> {
    match command {
        Command::Info => {
            let mut info = client.get_device_info().await?;
            // The firmware reports a numeric product code; resolve it for
            // human eyes but keep the raw field intact.
            if let Some(code) = info.get("type").and_then(Value::as_u64) {
                info.insert("type_name".into(), device_type_name(code).into());
            }
            print_object(&info);
            Ok(())
        }

        Command::Params => {
            print_object(&client.get_device_params().await?);
            Ok(())
        }

        Command::State => {
            print_object(&client.get_device_state().await?);
            Ok(())
        }

        Command::On => acknowledge(client.set_device_active(true).await?, "device switched on"),

        Command::Off => acknowledge(client.set_device_active(false).await?, "device switched off"),

        Command::Fan { level } => acknowledge(
            client.set_fan_level(level).await?,
            &format!("fan level set to {level}"),
        ),

        Command::Watch => watch(client).await,
    }
}

/// Print push updates as JSON lines until Ctrl-C.
async fn watch(client: &DeviceClient) -> Result<(), CliError> {
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    client.set_push_observer(move |data| {
        let _ = push_tx.send(data);
    });

    eprintln!("watching for device updates, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = push_rx.recv() => match update {
                Some(data) => print_line(&data),
                None => {
                    debug!("push queue closed");
                    break;
                }
            },
        }
    }
    Ok(())
}

fn acknowledge(accepted: bool, message: &str) -> Result<(), CliError> {
    if accepted {
        eprintln!("{message}");
        Ok(())
    } else {
        Err(CliError::Refused)
    }
}

fn print_object(map: &Map<String, Value>) {
    println!(
        "{}",
        serde_json::to_string_pretty(map).expect("JSON object serialization cannot fail")
    );
}

fn print_line(map: &Map<String, Value>) {
    println!(
        "{}",
        serde_json::to_string(map).expect("JSON object serialization cannot fail")
    );
}
