//! Connect device models

use serde::{Deserialize, Serialize};

/// A Spotify Connect device as listed by `/v1/me/player/devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// May be null for restricted devices
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    pub volume_percent: Option<u8>,
}

/// Response envelope for the device list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl DevicesResponse {
    /// First device with an id whose name matches exactly.
    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.name == name && d.id.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let json = r#"{
            "devices": [
                {"id": null, "name": "Hidden Player", "type": "Speaker", "is_active": false,
                 "is_restricted": true, "volume_percent": null},
                {"id": "abc", "name": "Hidden Player", "type": "Computer", "is_active": true,
                 "is_private_session": false, "is_restricted": false, "volume_percent": 80,
                 "supports_volume": true}
            ]
        }"#;
        let resp: DevicesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.devices.len(), 2);

        let found = resp.find_by_name("Hidden Player").unwrap();
        assert_eq!(found.id.as_deref(), Some("abc"));
        assert_eq!(found.volume_percent, Some(80));
        assert!(resp.find_by_name("Kitchen").is_none());
    }
}
