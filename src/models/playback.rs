//! Playback state models

use serde::{Deserialize, Serialize};

use super::Device;

/// Current playback as returned by `GET /v1/me/player`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackState {
    pub device: Option<Device>,
    #[serde(default)]
    pub is_playing: bool,
    pub progress_ms: Option<u64>,
    pub context: Option<PlaybackContext>,
    pub item: Option<PlayingItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackContext {
    pub uri: String,
}

/// Track or episode being played.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayingItem {
    pub uri: String,
    pub name: Option<String>,
    pub duration_ms: Option<u64>,
}
