//! Async backend: runs logins, device registration and playback requests
//! off the UI loop.
//!
//! The TUI sends `BackendCommand` values over an mpsc channel and a
//! background task answers with `BackendResponse` values. The task owns the
//! authenticator (and so the credential store) and the current player.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::api::{self, PlayerClient};
use crate::auth::{Authenticator, Navigator};
use crate::config::Config;
use crate::device::{
    ConnectSdk, DeviceAdapter, DeviceError, PlaybackDevice, Player, SdkLoader,
};
use crate::store::FileStore;

/// Commands sent from the TUI event loop to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    /// Pick up a token from a redirect URL, or the stored one.
    RestoreSession { redirect_url: Option<String> },
    StartLogin,
    CompleteLogin { redirect_url: String },
    Connect,
    Start { context_uri: String },
    TogglePlay,
    PreviousTrack,
    NextTrack,
    SetVolume(f32),
    Logout,
}

/// Responses from the backend to the TUI. Error payloads are raw messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResponse {
    /// Whether a valid token is available now.
    Session { logged_in: bool },
    /// Authorization URL the user has to open.
    LoginUrl(String),
    LoginFailed(String),
    Connected(Result<String, String>),
    /// Device error that arrived outside any pending command.
    PlayerError(String),
    Started(Result<(), String>),
    ControlFailed(String),
    LoggedOut(Result<(), String>),
    /// Backend could not be set up; nothing else will be answered.
    ClientError(String),
}

/// Hands the authorization URL to the UI instead of printing it.
pub struct ChannelNavigator {
    resp_tx: mpsc::UnboundedSender<BackendResponse>,
}

impl Navigator for ChannelNavigator {
    fn assign(&self, url: &Url) -> Result<()> {
        self.resp_tx
            .send(BackendResponse::LoginUrl(url.to_string()))
            .context("UI is gone")
    }

    fn replace(&self, url: &str) -> Result<()> {
        tracing::debug!("Login finished, landing page is {}", url);
        Ok(())
    }
}

/// Handle for interacting with the backend from the TUI side.
pub struct Backend {
    cmd_tx: mpsc::UnboundedSender<BackendCommand>,
    resp_rx: mpsc::UnboundedReceiver<BackendResponse>,
}

impl Backend {
    /// Spawn the backend task.
    pub fn start(config: Config) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();

        tokio::spawn(backend_loop(config, cmd_rx, resp_tx));

        Self { cmd_tx, resp_rx }
    }

    /// Send a command (non-blocking).
    pub fn send(&self, cmd: BackendCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Backend channel closed -- command dropped");
        }
    }

    /// Next response. `None` once the backend task has exited.
    /// Designed to be used inside `tokio::select!`.
    pub async fn recv(&mut self) -> Option<BackendResponse> {
        self.resp_rx.recv().await
    }
}

/// Outcome of a connect attempt, tagged with the attempt it belongs to.
type Connection = (u64, Result<Player, DeviceError>);

struct State {
    auth: Authenticator<FileStore, ChannelNavigator>,
    adapter: Arc<DeviceAdapter<ConnectSdk>>,
    client: PlayerClient,
    player: Option<Player>,
    resp_tx: mpsc::UnboundedSender<BackendResponse>,
    connect_tx: mpsc::UnboundedSender<Connection>,
    /// Pending `create_player` task, if any.
    connect_task: Option<JoinHandle<()>>,
    /// Bumped whenever a connect attempt starts or is cancelled.
    connect_generation: u64,
}

fn build_state(
    config: &Config,
    store: FileStore,
    resp_tx: &mpsc::UnboundedSender<BackendResponse>,
    connect_tx: mpsc::UnboundedSender<Connection>,
) -> Result<State> {
    let navigator = ChannelNavigator {
        resp_tx: resp_tx.clone(),
    };
    let auth = Authenticator::new(config.oauth()?, store, navigator);
    let loader = Arc::new(SdkLoader::new(ConnectSdk::new(&config.api_url)));

    Ok(State {
        auth,
        adapter: Arc::new(DeviceAdapter::new(loader, &config.device_name)),
        client: PlayerClient::new(&config.api_url),
        player: None,
        resp_tx: resp_tx.clone(),
        connect_tx,
        connect_task: None,
        connect_generation: 0,
    })
}

/// Background loop. Commands run one at a time; device registration can
/// stay pending indefinitely so it runs in its own task and reports back on
/// `connect_rx`.
async fn backend_loop(
    config: Config,
    mut cmd_rx: mpsc::UnboundedReceiver<BackendCommand>,
    resp_tx: mpsc::UnboundedSender<BackendResponse>,
) {
    let (connect_tx, mut connect_rx) = mpsc::unbounded_channel();
    let state = FileStore::open_default()
        .context("Failed to open credential store")
        .and_then(|store| build_state(&config, store, &resp_tx, connect_tx));
    let mut state = match state {
        Ok(state) => state,
        Err(e) => {
            let _ = resp_tx.send(BackendResponse::ClientError(format!("{:#}", e)));
            return;
        }
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => state.handle(cmd).await,
                None => break,
            },
            Some(connection) = connect_rx.recv() => state.on_connected(connection),
        }
    }

    state.cancel_connect();
    if let Some(player) = state.player.take() {
        player.device.disconnect();
    }
    tracing::debug!("Backend loop finished");
}

impl State {
    fn respond(&self, resp: BackendResponse) {
        let _ = self.resp_tx.send(resp);
    }

    async fn handle(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::RestoreSession { redirect_url } => {
                let token = match redirect_url {
                    Some(url) => self
                        .auth
                        .handle_redirect_and_get_token(&url)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!("Could not use redirect URL: {}", e);
                            None
                        }),
                    None => None,
                };
                let logged_in = token.or_else(|| self.auth.stored_token()).is_some();
                self.respond(BackendResponse::Session { logged_in });
            }
            BackendCommand::StartLogin => {
                if let Err(e) = self.auth.start_login() {
                    self.respond(BackendResponse::LoginFailed(e.to_string()));
                }
            }
            BackendCommand::CompleteLogin { redirect_url } => {
                match self.auth.handle_redirect_and_get_token(&redirect_url).await {
                    Ok(Some(_)) => self.respond(BackendResponse::Session { logged_in: true }),
                    Ok(None) => self.respond(BackendResponse::LoginFailed(
                        "No authorization code in that URL".to_string(),
                    )),
                    Err(e) => self.respond(BackendResponse::LoginFailed(e.to_string())),
                }
            }
            BackendCommand::Connect => self.connect(),
            BackendCommand::Start { context_uri } => {
                let result = self.start(&context_uri).await;
                self.respond(BackendResponse::Started(result));
            }
            BackendCommand::TogglePlay => {
                self.control(|device| async move { device.toggle_play().await })
            }
            BackendCommand::PreviousTrack => {
                self.control(|device| async move { device.previous_track().await })
            }
            BackendCommand::NextTrack => {
                self.control(|device| async move { device.next_track().await })
            }
            BackendCommand::SetVolume(volume) => {
                self.control(move |device| async move { device.set_volume(volume).await })
            }
            BackendCommand::Logout => {
                self.cancel_connect();
                if let Some(player) = self.player.take() {
                    player.device.disconnect();
                }
                let result = self.auth.logout().map_err(|e| e.to_string());
                self.respond(BackendResponse::LoggedOut(result));
            }
        }
    }

    fn connect(&mut self) {
        let Some(token) = self.auth.stored_token() else {
            self.respond(BackendResponse::Connected(Err("Not logged in".to_string())));
            return;
        };
        self.cancel_connect();
        if let Some(previous) = self.player.take() {
            previous.device.disconnect();
        }
        let generation = self.connect_generation;
        tracing::debug!("Connecting, SDK load state {:?}", self.adapter.loader().status());

        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<String>();
        let resp_tx = self.resp_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = err_rx.recv().await {
                if resp_tx.send(BackendResponse::PlayerError(message)).is_err() {
                    break;
                }
            }
        });

        let adapter = Arc::clone(&self.adapter);
        let connect_tx = self.connect_tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let result = adapter.create_player(&token, Some(err_tx)).await;
            let _ = connect_tx.send((generation, result));
        }));
    }

    /// Drop any pending connect attempt. The device it was creating stops
    /// polling once its event stream is dropped.
    fn cancel_connect(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.connect_generation += 1;
    }

    fn on_connected(&mut self, (generation, result): Connection) {
        if generation != self.connect_generation {
            tracing::debug!("Discarding result of a cancelled connect");
            if let Ok(player) = result {
                player.device.disconnect();
            }
            return;
        }
        self.connect_task = None;
        match result {
            Ok(player) => {
                let device_id = player.device_id.clone();
                self.player = Some(player);
                self.respond(BackendResponse::Connected(Ok(device_id)));
            }
            Err(e) => self.respond(BackendResponse::Connected(Err(e.to_string()))),
        }
    }

    async fn start(&self, context_uri: &str) -> Result<(), String> {
        let token = self
            .auth
            .stored_token()
            .ok_or_else(|| "Not logged in".to_string())?;
        let player = self
            .player
            .as_ref()
            .ok_or_else(|| "Player is not connected".to_string())?;

        tracing::info!("Starting {} on {}", context_uri, player.device_id);
        api::start_playback(&self.client, &token, &player.device_id, context_uri, &[])
            .await
            .map_err(|e| e.to_string())
    }

    /// Run a transport control in its own task; only failures are reported.
    fn control<F, Fut>(&self, action: F)
    where
        F: FnOnce(Arc<dyn PlaybackDevice>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), DeviceError>> + Send + 'static,
    {
        let Some(player) = self.player.as_ref() else {
            self.respond(BackendResponse::ControlFailed(
                "Player is not connected".to_string(),
            ));
            return;
        };
        let device = Arc::clone(&player.device);
        let resp_tx = self.resp_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = action(device).await {
                let _ = resp_tx.send(BackendResponse::ControlFailed(e.to_string()));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct RecordingDevice {
        disconnected: AtomicBool,
    }

    #[async_trait]
    impl PlaybackDevice for RecordingDevice {
        fn connect(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
            mpsc::unbounded_channel().1
        }

        fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }

        async fn toggle_play(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn previous_track(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn next_track(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn set_volume(&self, _volume: f32) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn test_state(dir: &tempfile::TempDir) -> (State, mpsc::UnboundedReceiver<BackendResponse>) {
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let (connect_tx, _) = mpsc::unbounded_channel();
        let config = Config {
            client_id: "test-client".to_string(),
            ..Config::default()
        };
        let store = FileStore::open(dir.path().join("credentials.toml")).unwrap();
        let state = build_state(&config, store, &resp_tx, connect_tx).unwrap();
        (state, resp_rx)
    }

    fn player(device: &Arc<RecordingDevice>) -> Player {
        Player {
            device: device.clone(),
            device_id: "dev-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_logout_cancels_pending_connect() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, mut resp_rx) = test_state(&dir);

        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        state.connect_task = Some(tokio::spawn(async move {
            let _alive = alive_tx;
            futures::future::pending::<()>().await;
        }));
        let attempt = state.connect_generation;

        state.handle(BackendCommand::Logout).await;
        assert!(alive_rx.await.is_err());
        assert!(state.connect_task.is_none());
        assert_eq!(
            resp_rx.try_recv().unwrap(),
            BackendResponse::LoggedOut(Ok(()))
        );

        // A result from the cancelled attempt is dropped and its device released.
        let device = Arc::new(RecordingDevice::default());
        state.on_connected((attempt, Ok(player(&device))));
        assert!(state.player.is_none());
        assert!(device.disconnected.load(Ordering::SeqCst));
        assert!(resp_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_current_connect_result_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, mut resp_rx) = test_state(&dir);

        let device = Arc::new(RecordingDevice::default());
        let attempt = state.connect_generation;
        state.on_connected((attempt, Ok(player(&device))));

        assert_eq!(
            state.player.as_ref().map(|p| p.device_id.as_str()),
            Some("dev-1")
        );
        assert!(!device.disconnected.load(Ordering::SeqCst));
        assert_eq!(
            resp_rx.try_recv().unwrap(),
            BackendResponse::Connected(Ok("dev-1".to_string()))
        );
    }

    #[test]
    fn test_navigator_forwards_login_url() {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        let navigator = ChannelNavigator { resp_tx };
        let url = Url::parse("https://accounts.example/authorize?client_id=abc").unwrap();

        navigator.assign(&url).unwrap();
        navigator.replace("http://127.0.0.1:8888/").unwrap();

        assert_eq!(
            resp_rx.try_recv().unwrap(),
            BackendResponse::LoginUrl(url.to_string())
        );
        assert!(resp_rx.try_recv().is_err());
    }

    #[test]
    fn test_navigator_reports_closed_ui() {
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        drop(resp_rx);
        let navigator = ChannelNavigator { resp_tx };
        let url = Url::parse("https://accounts.example/authorize").unwrap();
        assert!(navigator.assign(&url).is_err());
    }
}
