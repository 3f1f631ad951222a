//! Playback device adapter
//!
//! A playback SDK is loaded once per process, hands out devices, and reports
//! device health as a stream of events. `DeviceAdapter::create_player` turns
//! that stream into a single answer to "can we start using this device":
//! the first `Ready` or the first error settles it, everything that happens
//! afterwards goes to the caller's error sink only.

pub mod connect;
pub mod loader;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::client::ApiError;

pub use connect::ConnectSdk;
pub use loader::{LoadStatus, SdkLoader};

/// Shown instead of any error that mentions Premium.
pub const PREMIUM_NOTICE: &str = "Spotify Premium is required to use this player.";

/// Sent to the error sink when a ready device drops off.
pub const OFFLINE_NOTICE: &str =
    "The player's Spotify device is temporarily offline. Try connecting again.";

/// Volume a new device starts with, 0.0..=1.0.
pub const INITIAL_VOLUME: f32 = 0.8;

/// Supplies the bearer token whenever the device needs one.
pub type TokenProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Side channel for device errors that arrive outside a pending call.
pub type ErrorSink = mpsc::UnboundedSender<String>;

/// Events emitted by a connected device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Ready { device_id: String },
    NotReady { device_id: String },
    InitializationError(String),
    AuthenticationError(String),
    AccountError(String),
    PlaybackError(String),
}

impl DeviceEvent {
    /// Message for the four error events, `None` for readiness changes.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            DeviceEvent::InitializationError(m)
            | DeviceEvent::AuthenticationError(m)
            | DeviceEvent::AccountError(m)
            | DeviceEvent::PlaybackError(m) => Some(m),
            DeviceEvent::Ready { .. } | DeviceEvent::NotReady { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("could not load playback SDK: {0}")]
    Load(String),
    /// Error event reported by the device; displays as the raw message.
    #[error("{0}")]
    Event(String),
    #[error("device went away before it became ready")]
    Closed,
    #[error("device is not ready")]
    NotReady,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Settings for a new device.
#[derive(Clone)]
pub struct DeviceOptions {
    pub name: String,
    pub volume: f32,
    pub token: TokenProvider,
}

impl std::fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("name", &self.name)
            .field("volume", &self.volume)
            .finish_non_exhaustive()
    }
}

/// A playback SDK: loaded lazily, creates devices.
#[async_trait]
pub trait PlaybackSdk: Send + Sync + 'static {
    /// One-time initialization. Called at most once per loader.
    async fn load(&self) -> Result<(), DeviceError>;

    fn create_device(&self, options: DeviceOptions)
        -> Result<Arc<dyn PlaybackDevice>, DeviceError>;
}

/// A device created by a `PlaybackSdk`.
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Start registering. Events arrive on the returned receiver.
    fn connect(&self) -> mpsc::UnboundedReceiver<DeviceEvent>;
    fn disconnect(&self);
    async fn toggle_play(&self) -> Result<(), DeviceError>;
    async fn previous_track(&self) -> Result<(), DeviceError>;
    async fn next_track(&self) -> Result<(), DeviceError>;
    /// `volume` in 0.0..=1.0
    async fn set_volume(&self, volume: f32) -> Result<(), DeviceError>;
}

/// A device that reported ready, with its id.
#[derive(Clone)]
pub struct Player {
    pub device: Arc<dyn PlaybackDevice>,
    pub device_id: String,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Replace Premium-related errors with the fixed notice.
pub fn normalize_player_error(message: &str) -> String {
    if message.to_lowercase().contains("premium") {
        PREMIUM_NOTICE.to_string()
    } else {
        message.to_string()
    }
}

fn notify(sink: &Option<ErrorSink>, message: &str) {
    if let Some(sink) = sink {
        // A closed sink means nobody is listening any more.
        let _ = sink.send(message.to_string());
    }
}

/// Creates players on top of a shared SDK loader.
pub struct DeviceAdapter<K: PlaybackSdk> {
    loader: Arc<SdkLoader<K>>,
    device_name: String,
}

impl<K: PlaybackSdk> DeviceAdapter<K> {
    pub fn new(loader: Arc<SdkLoader<K>>, device_name: impl Into<String>) -> Self {
        Self {
            loader,
            device_name: device_name.into(),
        }
    }

    pub fn loader(&self) -> &Arc<SdkLoader<K>> {
        &self.loader
    }

    /// Load the SDK if needed, create and connect a device, and wait for the
    /// first `Ready` or error event.
    ///
    /// There is no timeout: a device that never reports anything keeps this
    /// future pending.
    pub async fn create_player(
        &self,
        token: &str,
        on_error: Option<ErrorSink>,
    ) -> Result<Player, DeviceError> {
        self.loader.ensure_loaded().await?;

        let token = token.to_string();
        let device = self.loader.sdk().create_device(DeviceOptions {
            name: self.device_name.clone(),
            volume: INITIAL_VOLUME,
            token: Arc::new(move || token.clone()),
        })?;

        tracing::info!("Connecting device '{}'", self.device_name);
        let mut events = device.connect();

        while let Some(event) = events.recv().await {
            match event {
                DeviceEvent::Ready { device_id } => {
                    tracing::info!("Device ready: {}", device_id);
                    tokio::spawn(forward_events(events, on_error));
                    return Ok(Player { device, device_id });
                }
                DeviceEvent::NotReady { device_id } => {
                    tracing::warn!("Device {} went offline", device_id);
                    notify(&on_error, OFFLINE_NOTICE);
                }
                other => {
                    let message = other.error_message().unwrap_or_default().to_string();
                    tracing::warn!("Device error before ready: {}", message);
                    notify(&on_error, &message);
                    tokio::spawn(forward_events(events, on_error));
                    return Err(DeviceError::Event(message));
                }
            }
        }

        Err(DeviceError::Closed)
    }
}

/// Drain events after settlement, feeding the error sink.
async fn forward_events(
    mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    on_error: Option<ErrorSink>,
) {
    while let Some(event) = events.recv().await {
        match event {
            DeviceEvent::Ready { device_id } => {
                tracing::info!("Device {} is back online", device_id);
            }
            DeviceEvent::NotReady { device_id } => {
                tracing::warn!("Device {} went offline", device_id);
                notify(&on_error, OFFLINE_NOTICE);
            }
            other => {
                let message = other.error_message().unwrap_or_default();
                tracing::warn!("Device error: {}", message);
                notify(&on_error, message);
            }
        }
    }
    tracing::debug!("Device event stream closed");
}
