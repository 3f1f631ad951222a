//! Spotify Connect backed playback SDK
//!
//! The actual audio endpoint is a Connect receiver running next to this
//! client (librespot, spotifyd, a desktop app...) that advertises the
//! configured device name. A `ConnectDevice` registers by watching the
//! account's device list until that name shows up, and keeps watching so it
//! can report the device dropping off again.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DeviceError, DeviceEvent, DeviceOptions, PlaybackDevice, PlaybackSdk};
use crate::api::client::{is_auth_failure, ApiError, PlayerClient};

/// Delay between device list polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ConnectSdk {
    api_url: String,
    poll_interval: Duration,
    client: OnceLock<PlayerClient>,
}

impl ConnectSdk {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            poll_interval: POLL_INTERVAL,
            client: OnceLock::new(),
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl PlaybackSdk for ConnectSdk {
    async fn load(&self) -> Result<(), DeviceError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hidden-player/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeviceError::Load(e.to_string()))?;
        let _ = self
            .client
            .set(PlayerClient::with_http(http, self.api_url.clone()));
        tracing::info!("Connect SDK loaded ({})", self.api_url);
        Ok(())
    }

    fn create_device(
        &self,
        options: DeviceOptions,
    ) -> Result<Arc<dyn PlaybackDevice>, DeviceError> {
        let client = self
            .client
            .get()
            .cloned()
            .ok_or_else(|| DeviceError::Load("SDK used before load".to_string()))?;
        Ok(Arc::new(ConnectDevice {
            client,
            options,
            poll_interval: self.poll_interval,
            device_id: Arc::new(Mutex::new(None)),
            events: Mutex::new(None),
            watcher: Mutex::new(None),
        }))
    }
}

pub struct ConnectDevice {
    client: PlayerClient,
    options: DeviceOptions,
    poll_interval: Duration,
    /// Set while the device is listed
    device_id: Arc<Mutex<Option<String>>>,
    /// Weak so the stream closes when the watcher stops
    events: Mutex<Option<mpsc::WeakUnboundedSender<DeviceEvent>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectDevice {
    fn token(&self) -> String {
        (self.options.token)()
    }

    fn ready_id(&self) -> Result<String, DeviceError> {
        self.device_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(DeviceError::NotReady)
    }

    /// Report a failed control call on the event stream as well.
    fn reported(&self, result: Result<(), ApiError>) -> Result<(), DeviceError> {
        if let Err(ref e) = result {
            let sender = self.events.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(tx) = sender.as_ref().and_then(|w| w.upgrade()) {
                let _ = tx.send(DeviceEvent::PlaybackError(e.to_string()));
            }
        }
        Ok(result?)
    }
}

#[async_trait]
impl PlaybackDevice for ConnectDevice {
    fn connect(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.downgrade());

        let watch = Watch {
            client: self.client.clone(),
            options: self.options.clone(),
            interval: self.poll_interval,
            device_id: Arc::clone(&self.device_id),
            tx,
        };
        let handle = tokio::spawn(watch.run());
        if let Some(old) = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            old.abort();
        }
        rx
    }

    fn disconnect(&self) {
        if let Some(handle) = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.device_id.lock().unwrap_or_else(|e| e.into_inner()).take();
        tracing::info!("Device '{}' disconnected", self.options.name);
    }

    async fn toggle_play(&self) -> Result<(), DeviceError> {
        let id = self.ready_id()?;
        let token = self.token();
        let result = match self.client.playback_state(&token).await {
            Ok(state) => {
                let playing_here = state
                    .map(|s| {
                        s.is_playing
                            && s.device.and_then(|d| d.id).as_deref() == Some(id.as_str())
                    })
                    .unwrap_or(false);
                if playing_here {
                    self.client.pause(&token, &id).await
                } else {
                    self.client.resume(&token, &id).await
                }
            }
            Err(e) => Err(e),
        };
        self.reported(result)
    }

    async fn previous_track(&self) -> Result<(), DeviceError> {
        let id = self.ready_id()?;
        let result = self.client.previous_track(&self.token(), &id).await;
        self.reported(result)
    }

    async fn next_track(&self) -> Result<(), DeviceError> {
        let id = self.ready_id()?;
        let result = self.client.next_track(&self.token(), &id).await;
        self.reported(result)
    }

    async fn set_volume(&self, volume: f32) -> Result<(), DeviceError> {
        let id = self.ready_id()?;
        let result = self
            .client
            .set_volume(&self.token(), &id, volume_percent(volume))
            .await;
        self.reported(result)
    }
}

fn volume_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Background device-list watcher for one connection.
struct Watch {
    client: PlayerClient,
    options: DeviceOptions,
    interval: Duration,
    device_id: Arc<Mutex<Option<String>>>,
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl Watch {
    fn current(&self) -> Option<String> {
        self.device_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_current(&self, id: Option<String>) {
        *self.device_id.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut seen_ready = false;

        loop {
            ticker.tick().await;
            if self.tx.is_closed() {
                break;
            }

            let token = (self.options.token)();
            let ready = self.current();

            match self.client.devices(&token).await {
                Ok(list) => {
                    let found = list
                        .find_by_name(&self.options.name)
                        .and_then(|d| d.id.clone());
                    match (ready, found) {
                        (None, Some(id)) => {
                            self.set_current(Some(id.clone()));
                            let _ = self.tx.send(DeviceEvent::Ready {
                                device_id: id.clone(),
                            });
                            if !seen_ready {
                                seen_ready = true;
                                self.apply_initial_volume(&token, &id).await;
                            }
                        }
                        (Some(old), Some(id)) if old != id => {
                            self.set_current(Some(id.clone()));
                            let _ = self.tx.send(DeviceEvent::Ready { device_id: id });
                        }
                        (Some(old), None) => {
                            self.set_current(None);
                            let _ = self.tx.send(DeviceEvent::NotReady { device_id: old });
                        }
                        _ => {}
                    }
                }
                Err(e) if !seen_ready => {
                    let message = e.to_string();
                    let event = match e.status() {
                        Some(status) if is_auth_failure(status) => {
                            DeviceEvent::AuthenticationError(message)
                        }
                        Some(403) => DeviceEvent::AccountError(message),
                        _ => DeviceEvent::InitializationError(message),
                    };
                    let _ = self.tx.send(event);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Device list poll failed: {}", e);
                    let _ = self.tx.send(DeviceEvent::PlaybackError(e.to_string()));
                }
            }
        }

        tracing::debug!("Device watcher for '{}' stopped", self.options.name);
    }

    async fn apply_initial_volume(&self, token: &str, id: &str) {
        let percent = volume_percent(self.options.volume);
        if let Err(e) = self.client.set_volume(token, id, percent).await {
            tracing::debug!("Could not apply initial volume: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> DeviceOptions {
        DeviceOptions {
            name: "Hidden Player".to_string(),
            volume: 0.8,
            token: Arc::new(|| "tok".to_string()),
        }
    }

    async fn loaded_sdk(server: &MockServer) -> ConnectSdk {
        let sdk = ConnectSdk::new(server.uri()).with_poll_interval(Duration::from_millis(10));
        sdk.load().await.unwrap();
        sdk
    }

    fn devices_with(id: &str) -> serde_json::Value {
        json!({"devices": [
            {"id": "other", "name": "Kitchen", "type": "Speaker", "is_active": false,
             "is_restricted": false, "volume_percent": 40},
            {"id": id, "name": "Hidden Player", "type": "Computer", "is_active": false,
             "is_restricted": false, "volume_percent": 100}
        ]})
    }

    #[test]
    fn test_volume_percent() {
        assert_eq!(volume_percent(0.8), 80);
        assert_eq!(volume_percent(1.7), 100);
        assert_eq!(volume_percent(-1.0), 0);
    }

    #[tokio::test]
    async fn test_create_before_load_fails() {
        let sdk = ConnectSdk::new("http://127.0.0.1:9");
        assert!(matches!(
            sdk.create_device(options()),
            Err(DeviceError::Load(_))
        ));
    }

    #[tokio::test]
    async fn test_ready_when_device_listed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(devices_with("dev-1")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/volume"))
            .and(query_param("volume_percent", "80"))
            .and(query_param("device_id", "dev-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sdk = loaded_sdk(&server).await;
        let device = sdk.create_device(options()).unwrap();
        let mut events = device.connect();

        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::Ready {
                device_id: "dev-1".to_string()
            })
        );
        // Give the watcher a moment to apply the initial volume.
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.disconnect();
    }

    #[tokio::test]
    async fn test_unauthorized_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"status": 401, "message": "Invalid access token"}
            })))
            .mount(&server)
            .await;

        let sdk = loaded_sdk(&server).await;
        let device = sdk.create_device(options()).unwrap();
        let mut events = device.connect();

        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::AuthenticationError(
                "Invalid access token".to_string()
            ))
        );
        // Watcher stops after a pre-ready error.
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_forbidden_is_account_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"status": 403, "message": "Premium required"}
            })))
            .mount(&server)
            .await;

        let sdk = loaded_sdk(&server).await;
        let device = sdk.create_device(options()).unwrap();
        let mut events = device.connect();

        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::AccountError("Premium required".to_string()))
        );
    }

    #[tokio::test]
    async fn test_device_disappearing_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(devices_with("dev-1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"devices": []})))
            .mount(&server)
            .await;

        let sdk = loaded_sdk(&server).await;
        let device = sdk.create_device(options()).unwrap();
        let mut events = device.connect();

        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::Ready {
                device_id: "dev-1".to_string()
            })
        );
        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::NotReady {
                device_id: "dev-1".to_string()
            })
        );
        assert!(matches!(
            device.next_track().await,
            Err(DeviceError::NotReady)
        ));
        device.disconnect();
    }

    #[tokio::test]
    async fn test_toggle_pauses_when_playing_here() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(devices_with("dev-1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device": {"id": "dev-1", "name": "Hidden Player", "type": "Computer",
                           "is_active": true, "is_restricted": false, "volume_percent": 80},
                "is_playing": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/pause"))
            .and(query_param("device_id", "dev-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sdk = loaded_sdk(&server).await;
        let device = sdk.create_device(options()).unwrap();
        let mut events = device.connect();
        assert!(matches!(
            events.recv().await,
            Some(DeviceEvent::Ready { .. })
        ));

        device.toggle_play().await.unwrap();
        device.disconnect();
    }

    #[tokio::test]
    async fn test_failed_control_is_reported_on_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(devices_with("dev-1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/next"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"status": 404, "message": "No active device found"}
            })))
            .mount(&server)
            .await;

        let sdk = loaded_sdk(&server).await;
        let device = sdk.create_device(options()).unwrap();
        let mut events = device.connect();
        assert!(matches!(
            events.recv().await,
            Some(DeviceEvent::Ready { .. })
        ));

        let err = device.next_track().await.unwrap_err();
        assert_eq!(err.to_string(), "No active device found");
        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::PlaybackError(
                "No active device found".to_string()
            ))
        );
        device.disconnect();
    }
}
