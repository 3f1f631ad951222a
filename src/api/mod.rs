//! Spotify Web API client module

pub mod client;
mod player;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;

pub use client::{ApiError, PlayerClient};

use crate::auth;
use crate::config::Config;
use crate::device::{normalize_player_error, ConnectSdk, DeviceAdapter, SdkLoader};

/// List the account's Connect devices and what is playing (prints to stdout).
pub async fn list_devices() -> Result<()> {
    let config = Config::load()?;
    let token = auth::require_token(&config)?;
    let client = PlayerClient::new(&config.api_url);

    let list = client
        .devices(&token)
        .await
        .context("Failed to fetch devices")?;

    println!("\nDevices:");
    println!("{:-<60}", "");
    if list.devices.is_empty() {
        println!("  (no devices found)");
        return Ok(());
    }

    for device in &list.devices {
        let marker = if device.is_active { "*" } else { " " };
        let volume = device
            .volume_percent
            .map(|v| format!("{}%", v))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:<28} {:<10} {:>5}  {}",
            marker,
            device.name,
            device.device_type,
            volume,
            device.id.as_deref().unwrap_or("(restricted)")
        );
    }

    match client.playback_state(&token).await {
        Ok(Some(state)) => {
            let track = state
                .item
                .as_ref()
                .map(|i| i.name.clone().unwrap_or_else(|| i.uri.clone()))
                .unwrap_or_else(|| "-".to_string());
            let device = state.device.map(|d| d.name).unwrap_or_default();
            println!(
                "\n{} {} on {}",
                if state.is_playing { "Playing:" } else { "Paused: " },
                track,
                device
            );
            if let Some(context) = state.context {
                println!("  context:  {}", context.uri);
            }
            if let (Some(progress), Some(duration)) = (
                state.progress_ms,
                state.item.and_then(|i| i.duration_ms),
            ) {
                println!("  position: {}s / {}s", progress / 1000, duration / 1000);
            }
        }
        Ok(None) => println!("\nNothing is playing."),
        Err(e) => tracing::warn!("Could not read playback state: {}", e),
    }

    Ok(())
}

/// Connect the configured device, move playback to it and start a context
/// or an explicit track list.
pub async fn play(context_uri: Option<String>, uris: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let token = auth::require_token(&config)?;

    if let Some(ref uri) = context_uri {
        if uri.trim().is_empty() {
            bail!("Context URI is empty");
        }
    }

    let loader = Arc::new(SdkLoader::new(ConnectSdk::new(&config.api_url)));
    let adapter = DeviceAdapter::new(loader, &config.device_name);
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();

    println!("Waiting for device '{}'... (Ctrl-C to stop)", config.device_name);
    let player = tokio::select! {
        result = adapter.create_player(&token, Some(err_tx)) => {
            result.map_err(|e| anyhow!(normalize_player_error(&e.to_string())))?
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Cancelled.");
            return Ok(());
        }
    };
    println!("Device ready: {}", player.device_id);

    let client = PlayerClient::new(&config.api_url);
    let context = context_uri.unwrap_or_else(|| config.default_context_uri.clone());
    let started = start_playback(&client, &token, &player.device_id, &context, &uris).await;

    player.device.disconnect();
    while let Ok(message) = err_rx.try_recv() {
        eprintln!("Device: {}", normalize_player_error(&message));
    }

    started.map_err(|e| anyhow!(normalize_player_error(&e.to_string())))?;
    println!("Playback started.");
    Ok(())
}

/// Transfer, then start either the track list or the context.
pub async fn start_playback(
    client: &PlayerClient,
    token: &str,
    device_id: &str,
    context_uri: &str,
    uris: &[String],
) -> Result<(), ApiError> {
    client.transfer_playback(token, device_id, true).await?;
    if uris.is_empty() {
        client.start_context(token, device_id, context_uri).await
    } else {
        client.start_track_uris(token, device_id, uris).await
    }
}
