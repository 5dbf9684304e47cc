// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Parser;
use netcfg_checkpoint::{
    checkpoint::CheckpointService,
    cli::{format_event, Cli, Console, ConsoleCommand, Reply},
    config::CheckpointConfig,
    network::InMemoryNetwork,
};
use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CheckpointConfig::from_file(path)?,
        None => CheckpointConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;

    let devices: Vec<&str> = cli.devices.iter().map(String::as_str).collect();
    let network = Arc::new(InMemoryNetwork::with_devices(&devices));
    info!(devices = ?network.device_names(), prefix = %config.object_path_prefix, "Starting checkpoint console");

    let handle = CheckpointService::spawn(&config, network.clone());

    let mut events = handle.subscribe_rollbacks();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Rollback events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let console = Console::new(handle.clone(), network);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };

        let command = match ConsoleCommand::parse_line(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match console.execute(command).await? {
            Reply::Output(text) => println!("{}", text),
            Reply::Quit => break,
        }
    }

    handle.shutdown().await;
    printer.abort();
    Ok(())
}
