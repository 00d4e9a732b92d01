//! Typed configuration for the notification engine.
//!
//! Every field has a default, so an empty TOML file is a valid config.

use std::path::Path;

use channels::email::EmailConfig;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// The site the engine runs for.  Log rows from other sites of a network
/// are rendered with a reference to their origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub id: i64,
    pub name: String,
    pub url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: 1, name: "Planner".into(), url: "http://localhost".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Defer every delivery to the task runner instead of sending inline.
    pub use_cron: bool,
    /// Post types that produce events at all.
    pub supported_post_types: Vec<String>,
    /// Window in which an equivalent dispatch is suppressed.  `0` disables
    /// suppression; workflows may override it.
    pub duplicate_threshold_minutes: u32,
    /// Delay before the first scheduled delivery of a dispatch.
    pub cron_initial_delay_secs: u64,
    /// Extra delay added per receiver to spread a burst of deliveries.
    pub cron_offset_step_secs: u64,
    /// Channel used when neither the workflow nor a policy picks one.
    pub default_channel: String,
    /// Whether the acting user receives notifications about their own actions.
    pub notify_actor: bool,
    pub site: SiteConfig,
    /// `chrono` format strings used by the `date` and `time` shortcode fields.
    pub date_format: String,
    pub time_format: String,
    pub log_per_page: u32,
    pub email: EmailConfig,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            use_cron: false,
            supported_post_types: vec!["post".into(), "page".into()],
            duplicate_threshold_minutes: 10,
            cron_initial_delay_secs: 0,
            cron_offset_step_secs: 5,
            default_channel: channels::email::EMAIL_CHANNEL.into(),
            notify_actor: false,
            site: SiteConfig::default(),
            date_format: "%B %-d, %Y".into(),
            time_format: "%-I:%M %p".into(),
            log_per_page: 20,
            email: EmailConfig::default(),
        }
    }
}

impl NotificationsConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn supports_post_type(&self, post_type: &str) -> bool {
        self.supported_post_types.iter().any(|t| t == post_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = NotificationsConfig::from_toml_str("").unwrap();
        assert!(!config.use_cron);
        assert_eq!(config.duplicate_threshold_minutes, 10);
        assert!(config.supports_post_type("post"));
        assert!(!config.supports_post_type("attachment"));
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let config = NotificationsConfig::from_toml_str(
            r#"
            use_cron = true
            supported_post_types = ["article"]

            [site]
            id = 3

            [email]
            smtp_host = "mail.example.com"
            "#,
        )
        .unwrap();
        assert!(config.use_cron);
        assert!(config.supports_post_type("article"));
        assert!(!config.supports_post_type("post"));
        assert_eq!(config.site.id, 3);
        assert_eq!(config.site.name, "Planner");
        assert_eq!(config.email.smtp_host, "mail.example.com");
        assert_eq!(config.email.smtp_port, 25);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        assert!(matches!(
            NotificationsConfig::from_toml_str("use_cron = \"sometimes\""),
            Err(EngineError::Config(_))
        ));
    }
}
