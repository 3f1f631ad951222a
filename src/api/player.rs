//! Player endpoints (`/v1/me/player/...`)

use reqwest::StatusCode;
use serde_json::json;

use super::client::{ApiError, PlayerClient};
use crate::models::{DevicesResponse, PlaybackState};

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn with_device(path: &str, device_id: &str) -> String {
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{}{}device_id={}", path, sep, encode(device_id))
}

impl PlayerClient {
    /// Move playback to `device_id`, optionally starting it.
    pub async fn transfer_playback(
        &self,
        token: &str,
        device_id: &str,
        play: bool,
    ) -> Result<(), ApiError> {
        let body = json!({ "device_ids": [device_id], "play": play });
        self.put(token, "/v1/me/player", Some(&body)).await?;
        Ok(())
    }

    /// Start a playlist/album/artist context on `device_id`.
    pub async fn start_context(
        &self,
        token: &str,
        device_id: &str,
        context_uri: &str,
    ) -> Result<(), ApiError> {
        let body = json!({ "context_uri": context_uri });
        self.put(token, &with_device("/v1/me/player/play", device_id), Some(&body))
            .await?;
        Ok(())
    }

    /// Start an explicit list of tracks on `device_id`.
    pub async fn start_track_uris(
        &self,
        token: &str,
        device_id: &str,
        uris: &[String],
    ) -> Result<(), ApiError> {
        let body = json!({ "uris": uris });
        self.put(token, &with_device("/v1/me/player/play", device_id), Some(&body))
            .await?;
        Ok(())
    }

    /// Resume whatever is loaded on the device.
    pub async fn resume(&self, token: &str, device_id: &str) -> Result<(), ApiError> {
        self.put(token, &with_device("/v1/me/player/play", device_id), None)
            .await?;
        Ok(())
    }

    pub async fn pause(&self, token: &str, device_id: &str) -> Result<(), ApiError> {
        self.put(token, &with_device("/v1/me/player/pause", device_id), None)
            .await?;
        Ok(())
    }

    pub async fn next_track(&self, token: &str, device_id: &str) -> Result<(), ApiError> {
        self.post(token, &with_device("/v1/me/player/next", device_id))
            .await?;
        Ok(())
    }

    pub async fn previous_track(&self, token: &str, device_id: &str) -> Result<(), ApiError> {
        self.post(token, &with_device("/v1/me/player/previous", device_id))
            .await?;
        Ok(())
    }

    /// Set volume, 0..=100.
    pub async fn set_volume(
        &self,
        token: &str,
        device_id: &str,
        percent: u8,
    ) -> Result<(), ApiError> {
        let path = format!("/v1/me/player/volume?volume_percent={}", percent.min(100));
        self.put(token, &with_device(&path, device_id), None).await?;
        Ok(())
    }

    /// Current playback, or `None` when nothing is active (HTTP 204).
    pub async fn playback_state(&self, token: &str) -> Result<Option<PlaybackState>, ApiError> {
        let url = format!("{}/v1/me/player", self.base_url());
        let resp = self.get(token, "/v1/me/player").await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        resp.json()
            .await
            .map(Some)
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// Devices visible to the account.
    pub async fn devices(&self, token: &str) -> Result<DevicesResponse, ApiError> {
        let url = format!("{}/v1/me/player/devices", self.base_url());
        let resp = self.get(token, "/v1/me/player/devices").await?;
        resp.json()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }
}
