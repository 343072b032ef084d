//! Console client for an Archipelago room.
//!
//! Connects one slot, prints server messages, and sends console input as
//! chat. Lines starting with `/` are handled locally; see `/help`.
//!
//! Run with: `cargo run -p archipelago-text-client -- --slot Player1`

mod commands;
mod render;

use std::sync::Arc;

use archipelago_client::{
    BusEvent, ConnectionInfo, ConnectionState, DataPackageRetention, DisconnectReason,
    ItemsHandling, ReconnectConfig, ServerPacket, Session, SessionConfig, SessionError, Topic,
    reconnect_loop,
};
use archipelago_config::{CliArgs, Config, ConfigError};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::commands::{Command, Flow};
use crate::render::Renderer;

/// Tag announced when no game is configured.
const TEXT_ONLY_TAG: &str = "TextOnly";

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    archipelago_log::init_logging(Some(&config));

    if config.slot.name.is_empty() {
        eprintln!("No slot name: pass --slot or set slot.name in config.ron");
        std::process::exit(2);
    }

    let mut session = Session::websocket(session_config(&config));
    let info = connection_info(&config);

    let room = Arc::clone(session.room());
    let data_package = Arc::clone(session.data_package());
    session.subscribe(
        Topic::Packet(archipelago_client::PacketKind::PrintJson),
        move |event: &BusEvent| {
            if let Some(ServerPacket::PrintJson(message)) = event.packet() {
                println!("{}", Renderer::new(&room, &data_package).message(message));
            }
        },
    );

    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
    session.subscribe(Topic::ConnectionLost, move |event: &BusEvent| {
        if let BusEvent::ConnectionLost(reason) = event {
            let _ = lost_tx.send(reason.clone());
        }
    });

    if let Err(e) = connect(&mut session, &config, &info).await {
        eprintln!("Failed to connect to {}: {e}", config.server.address);
        std::process::exit(1);
    }
    // Attempts that failed on the way in already reported their own loss.
    while lost_rx.try_recv().is_ok() {}

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin closed");
                        break;
                    }
                };
                match Command::parse(&line).execute(&session) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => eprintln!("{e}"),
                }
            }
            Some(reason) = lost_rx.recv() => {
                if reason == DisconnectReason::Requested
                    || session.status() == ConnectionState::Connected
                {
                    continue;
                }
                eprintln!("Connection lost: {reason}");
                if !config.client.reconnect {
                    std::process::exit(1);
                }
                if let Err(e) = reconnect_loop(
                    &mut session,
                    &config.server.address,
                    &info,
                    reconnect_config(&config),
                )
                .await
                {
                    eprintln!("Giving up: {e}");
                    std::process::exit(1);
                }
                while lost_rx.try_recv().is_ok() {}
            }
        }
    }

    session.disconnect().await;
    info!("bye");
}

fn load_config(args: &CliArgs) -> Result<Config, ConfigError> {
    let mut config = match args.config.clone().or_else(Config::default_dir) {
        Some(dir) => Config::load_or_create(&dir)?,
        None => Config::default(),
    };
    config.apply_cli_overrides(args);
    Ok(config)
}

fn session_config(config: &Config) -> SessionConfig {
    SessionConfig {
        handshake_timeout: config.client.handshake_timeout(),
        data_package_retention: if config.client.retain_data_package {
            DataPackageRetention::Retain
        } else {
            DataPackageRetention::Discard
        },
        fetch_data_package: config.client.fetch_data_package,
    }
}

fn connection_info(config: &Config) -> ConnectionInfo {
    let mut tags = config.slot.tags.clone();
    if config.slot.game.is_empty() && !tags.iter().any(|t| t == TEXT_ONLY_TAG) {
        tags.push(TEXT_ONLY_TAG.to_string());
    }
    let info = ConnectionInfo::new(config.slot.game.clone(), config.slot.name.clone())
        .with_items_handling(ItemsHandling(config.slot.items_handling & 0b111))
        .with_tags(tags);
    match &config.slot.password {
        Some(password) => info.with_password(password.clone()),
        None => info,
    }
}

fn reconnect_config(config: &Config) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts: config.client.max_reconnect_attempts,
        ..Default::default()
    }
}

async fn connect(
    session: &mut Session,
    config: &Config,
    info: &ConnectionInfo,
) -> Result<(), Box<dyn std::error::Error>> {
    let address = &config.server.address;
    match session.connect(address, info).await {
        Ok(connected) => {
            info!(slot = connected.slot, team = connected.team, "connected");
            Ok(())
        }
        Err(e @ (SessionError::ConnectionRefused(_) | SessionError::InvalidAddress(_))) => {
            Err(e.into())
        }
        Err(e) if config.client.reconnect => {
            warn!(error = %e, "initial connect failed, retrying");
            reconnect_loop(session, address, info, reconnect_config(config)).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
