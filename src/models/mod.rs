//! Data models for Spotify Web API entities

mod device;
mod playback;

pub use device::*;
pub use playback::*;
