//! Admin-managed system settings, stored as a single record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSettings {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default)]
    pub daily_reward: u64,
    #[serde(default)]
    pub signup_bonus: u64,
    #[serde(default)]
    pub allowed_classes: Vec<String>,
    /// Generation provider keys, rotated by the generator.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_app_name() -> String {
    "NST".to_string()
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            maintenance_mode: false,
            daily_reward: 0,
            signup_bonus: 0,
            allowed_classes: Vec::new(),
            api_keys: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl SystemSettings {
    /// True when `class` is selectable. An empty list allows every class.
    pub fn allows_class(&self, class: &str) -> bool {
        self.allowed_classes.is_empty() || self.allowed_classes.iter().any(|c| c == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_record_fills_defaults() {
        let settings: SystemSettings =
            serde_json::from_value(json!({"maintenanceMode": true, "marquee": "Hi"})).unwrap();
        assert!(settings.maintenance_mode);
        assert_eq!(settings.app_name, "NST");
        assert_eq!(settings.extra["marquee"], json!("Hi"));
    }

    #[test]
    fn test_allows_class() {
        let mut settings = SystemSettings::default();
        assert!(settings.allows_class("9"));
        settings.allowed_classes = vec!["10".to_string()];
        assert!(settings.allows_class("10"));
        assert!(!settings.allows_class("9"));
    }
}
