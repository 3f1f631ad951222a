//! TUI application state and main event loop

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{
    DisableBracketedPaste, EnableBracketedPaste, Event, EventStream, KeyCode, KeyEvent,
    KeyEventKind, KeyModifiers,
};
use futures::FutureExt;
use ratatui::DefaultTerminal;
use tokio_stream::StreamExt;

use super::backend::{Backend, BackendCommand, BackendResponse};
use super::input::InputState;
use super::log_capture::LogBuffer;
use super::ui;
use crate::config::Config;
use crate::device::{normalize_player_error, INITIAL_VOLUME};

/// Redraw interval, also how often the log pane picks up new lines.
const TICK: Duration = Duration::from_millis(250);

/// Log lines kept for the log pane.
const LOG_HISTORY: usize = 200;

/// Volume change per key press.
const VOLUME_STEP: f32 = 0.05;

pub const STATUS_LOGGED_OUT: &str = "Not logged in";
pub const STATUS_IDLE: &str = "Logged in - player not connected yet";
pub const STATUS_CONNECTING: &str = "Creating Spotify player...";
pub const STATUS_CONNECTED: &str = "This terminal is registered as a Spotify device";
pub const STATUS_CONNECT_FAILED: &str = "Could not connect the player";
pub const STATUS_STARTING: &str = "Sending playback to this device...";
pub const STATUS_STARTED: &str = "Playback started";
pub const STATUS_START_FAILED: &str = "Could not start playback";

/// Which input, if any, receives typed characters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Normal,
    EditContext,
    PasteRedirect,
}

/// Application state
pub struct App {
    pub should_exit: bool,
    pub logged_in: bool,
    pub device_id: Option<String>,
    pub connected: bool,
    pub status: String,
    pub error: Option<String>,
    pub is_connecting: bool,
    pub is_starting: bool,
    /// 0.0..=1.0
    pub volume: f32,
    pub context: InputState,
    /// Authorization URL waiting to be opened by the user.
    pub login_url: Option<String>,
    pub redirect: InputState,
    pub mode: InputMode,
    pub show_log: bool,
    pub log_lines: VecDeque<String>,
}

impl App {
    pub fn new(default_context_uri: &str) -> Self {
        Self {
            should_exit: false,
            logged_in: false,
            device_id: None,
            connected: false,
            status: STATUS_LOGGED_OUT.to_string(),
            error: None,
            is_connecting: false,
            is_starting: false,
            volume: INITIAL_VOLUME,
            context: InputState::with_value(default_context_uri),
            login_url: None,
            redirect: InputState::default(),
            mode: InputMode::Normal,
            show_log: false,
            log_lines: VecDeque::new(),
        }
    }

    /// Transport controls only work with a token and a ready device.
    pub fn can_control(&self) -> bool {
        self.logged_in && self.connected && self.device_id.is_some()
    }

    /// Handle a key press. Returns the backend command it triggers, if any.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<BackendCommand> {
        match self.mode {
            InputMode::EditContext => self.handle_context_key(key),
            InputMode::PasteRedirect => self.handle_redirect_key(key),
            InputMode::Normal => self.handle_normal_key(key),
        }
    }

    /// Bracketed paste goes to whichever input is active.
    pub fn handle_paste(&mut self, text: &str) {
        match self.mode {
            InputMode::EditContext => self.context.insert_str(text),
            InputMode::PasteRedirect => self.redirect.insert_str(text),
            InputMode::Normal => {}
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Option<BackendCommand> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_exit = true;
            return None;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_exit = true;
                None
            }
            KeyCode::Char('L') => {
                self.show_log = !self.show_log;
                None
            }
            KeyCode::Char('l') if !self.logged_in => {
                self.error = None;
                Some(BackendCommand::StartLogin)
            }
            KeyCode::Char('v') if !self.logged_in && self.login_url.is_some() => {
                self.mode = InputMode::PasteRedirect;
                None
            }
            KeyCode::Char('o') if self.logged_in => Some(BackendCommand::Logout),
            KeyCode::Char('c') if self.logged_in && !self.is_connecting => {
                self.error = None;
                self.is_connecting = true;
                self.status = STATUS_CONNECTING.to_string();
                Some(BackendCommand::Connect)
            }
            KeyCode::Char('e') if self.can_control() => {
                self.mode = InputMode::EditContext;
                None
            }
            KeyCode::Char('s') | KeyCode::Enter if self.can_control() => self.start(),
            KeyCode::Char(' ') if self.can_control() => Some(BackendCommand::TogglePlay),
            KeyCode::Char('n') if self.can_control() => Some(BackendCommand::NextTrack),
            KeyCode::Char('p') if self.can_control() => Some(BackendCommand::PreviousTrack),
            KeyCode::Char('+') | KeyCode::Char('=') if self.can_control() => {
                self.change_volume(VOLUME_STEP)
            }
            KeyCode::Char('-') if self.can_control() => self.change_volume(-VOLUME_STEP),
            _ => None,
        }
    }

    fn handle_context_key(&mut self, key: KeyEvent) -> Option<BackendCommand> {
        match key.code {
            KeyCode::Esc => self.mode = InputMode::Normal,
            KeyCode::Enter => {
                self.mode = InputMode::Normal;
                return self.start();
            }
            code => edit(&mut self.context, code, key.modifiers),
        }
        None
    }

    fn handle_redirect_key(&mut self, key: KeyEvent) -> Option<BackendCommand> {
        match key.code {
            KeyCode::Esc => self.mode = InputMode::Normal,
            KeyCode::Enter => {
                let redirect_url = self.redirect.value().trim().to_string();
                if redirect_url.is_empty() {
                    return None;
                }
                self.mode = InputMode::Normal;
                self.redirect.clear();
                return Some(BackendCommand::CompleteLogin { redirect_url });
            }
            code => edit(&mut self.redirect, code, key.modifiers),
        }
        None
    }

    fn start(&mut self) -> Option<BackendCommand> {
        let context_uri = self.context.value().trim().to_string();
        if self.is_starting || context_uri.is_empty() {
            return None;
        }
        self.error = None;
        self.is_starting = true;
        self.status = STATUS_STARTING.to_string();
        Some(BackendCommand::Start { context_uri })
    }

    fn change_volume(&mut self, delta: f32) -> Option<BackendCommand> {
        let volume = ((self.volume + delta) * 100.0).round() / 100.0;
        self.volume = volume.clamp(0.0, 1.0);
        Some(BackendCommand::SetVolume(self.volume))
    }

    /// Apply a backend response to the state.
    pub fn apply(&mut self, resp: BackendResponse) {
        match resp {
            BackendResponse::Session { logged_in } => self.set_logged_in(logged_in),
            BackendResponse::LoginUrl(url) => {
                self.login_url = Some(url);
                self.redirect.clear();
                self.mode = InputMode::PasteRedirect;
            }
            BackendResponse::LoginFailed(message) => {
                self.mode = InputMode::Normal;
                self.error = Some(message);
            }
            // A connect that finishes after logout is stale.
            BackendResponse::Connected(_) if !self.logged_in => {}
            BackendResponse::Connected(Ok(device_id)) => {
                self.is_connecting = false;
                self.device_id = Some(device_id);
                self.connected = true;
                self.status = STATUS_CONNECTED.to_string();
            }
            BackendResponse::Connected(Err(message)) => {
                self.is_connecting = false;
                self.show_player_error(&message);
                self.status = STATUS_CONNECT_FAILED.to_string();
            }
            BackendResponse::PlayerError(message) | BackendResponse::ControlFailed(message) => {
                self.show_player_error(&message);
            }
            BackendResponse::Started(Ok(())) => {
                self.is_starting = false;
                self.status = STATUS_STARTED.to_string();
            }
            BackendResponse::Started(Err(message)) => {
                self.is_starting = false;
                self.show_player_error(&message);
                self.status = STATUS_START_FAILED.to_string();
            }
            BackendResponse::LoggedOut(Ok(())) => {
                self.error = None;
                self.set_logged_in(false);
            }
            BackendResponse::LoggedOut(Err(message)) => self.error = Some(message),
            BackendResponse::ClientError(message) => self.error = Some(message),
        }
    }

    /// Token presence drives the whole view: logging in resets the device
    /// state, logging out forgets it.
    fn set_logged_in(&mut self, logged_in: bool) {
        self.logged_in = logged_in;
        self.device_id = None;
        self.connected = false;
        self.is_connecting = false;
        self.is_starting = false;
        if logged_in {
            self.login_url = None;
            self.redirect.clear();
            self.error = None;
            self.status = STATUS_IDLE.to_string();
        } else {
            self.status = STATUS_LOGGED_OUT.to_string();
        }
        self.mode = InputMode::Normal;
    }

    fn show_player_error(&mut self, message: &str) {
        self.error = Some(normalize_player_error(message));
    }

    /// Move captured log lines into the pane history.
    pub fn collect_logs(&mut self, logs: &LogBuffer) {
        for line in logs.drain() {
            if self.log_lines.len() >= LOG_HISTORY {
                self.log_lines.pop_front();
            }
            self.log_lines.push_back(line);
        }
    }
}

fn edit(input: &mut InputState, code: KeyCode, modifiers: KeyModifiers) {
    match code {
        KeyCode::Char('u') if modifiers.contains(KeyModifiers::CONTROL) => input.clear(),
        KeyCode::Char(c) => input.insert_char(c),
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.move_left(),
        KeyCode::Right => input.move_right(),
        KeyCode::Home => input.move_home(),
        KeyCode::End => input.move_end(),
        _ => {}
    }
}

/// Run the TUI with panic-safe terminal restore.
pub async fn run(config: Config, redirect_url: Option<String>, logs: LogBuffer) -> Result<()> {
    let mut terminal = ratatui::init();
    if let Err(e) = crossterm::execute!(std::io::stdout(), EnableBracketedPaste) {
        tracing::debug!("Bracketed paste unavailable: {}", e);
    }

    let result = AssertUnwindSafe(run_app(&mut terminal, config, redirect_url, &logs))
        .catch_unwind()
        .await;

    let _ = crossterm::execute!(std::io::stdout(), DisableBracketedPaste);
    ratatui::restore();

    match result {
        Ok(r) => r,
        Err(e) => std::panic::resume_unwind(e),
    }
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    config: Config,
    redirect_url: Option<String>,
    logs: &LogBuffer,
) -> Result<()> {
    let mut app = App::new(&config.default_context_uri);
    let mut backend = Backend::start(config);
    backend.send(BackendCommand::RestoreSession { redirect_url });

    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    while !app.should_exit {
        terminal.draw(|frame| ui::render(frame, &app))?;

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if let Some(cmd) = app.handle_key(key) {
                        backend.send(cmd);
                    }
                }
                Some(Ok(Event::Paste(text))) => app.handle_paste(&text),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            Some(resp) = backend.recv() => app.apply(resp),
            _ = tick.tick() => app.collect_logs(logs),
        }
    }

    Ok(())
}
