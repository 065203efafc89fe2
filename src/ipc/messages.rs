//! Message types for settings surface → content script communication

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::convert::ConversionMode;

/// Requests sent from the settings surface to the active tab's content script
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ContentRequest {
    /// Replace the content script's cached settings and re-render the page
    #[serde(rename_all = "camelCase")]
    UpdateState {
        mode: ConversionMode,
        globally_enabled: bool,
        disabled_sites: Vec<String>,
        /// Absent in senders without whitelist support
        #[serde(default)]
        enabled_sites: Vec<String>,
    },
}

impl ContentRequest {
    pub fn update_state(settings: &Settings) -> Self {
        Self::UpdateState {
            mode: settings.mode,
            globally_enabled: settings.globally_enabled,
            disabled_sites: settings.disabled_sites.clone(),
            enabled_sites: settings.enabled_sites.clone(),
        }
    }
}

/// Acknowledgment sent back by the content script
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentResponse {
    pub success: bool,
}

impl ContentResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

impl From<ContentRequest> for Settings {
    fn from(request: ContentRequest) -> Self {
        match request {
            ContentRequest::UpdateState {
                mode,
                globally_enabled,
                disabled_sites,
                enabled_sites,
            } => Settings {
                mode,
                globally_enabled,
                disabled_sites,
                enabled_sites,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_state_wire_shape() {
        let request = ContentRequest::UpdateState {
            mode: ConversionMode::To24Hour,
            globally_enabled: true,
            disabled_sites: vec!["a.com".to_string()],
            enabled_sites: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "action": "updateState",
                "mode": "12to24",
                "globallyEnabled": true,
                "disabledSites": ["a.com"],
                "enabledSites": []
            })
        );
    }

    #[test]
    fn test_update_state_without_enabled_sites() {
        let request: ContentRequest = serde_json::from_value(json!({
            "action": "updateState",
            "mode": "24to12",
            "globallyEnabled": false,
            "disabledSites": []
        }))
        .unwrap();
        let settings = Settings::from(request);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = serde_json::from_value::<ContentRequest>(json!({ "action": "reload" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_response_shape() {
        assert_eq!(serde_json::to_string(&ContentResponse::ok()).unwrap(), r#"{"success":true}"#);
    }
}
