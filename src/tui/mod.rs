//! Terminal user interface
//!
//! Login, device connection and playback controls in one screen, using
//! Ratatui. Network work happens in the backend task.

mod app;
mod backend;
mod input;
mod log_capture;
mod ui;

pub use app::run;
pub use log_capture::LogBuffer;
