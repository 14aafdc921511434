use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub action: ActionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Inference API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Bodies longer than this are truncated before classification
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
    /// What to do when the model answers neither "True" nor "False":
    /// "retain" marks the message done without touching it, "fail" records a
    /// failure so the next run retries it
    #[serde(default = "default_on_ambiguous")]
    pub on_ambiguous: AmbiguousPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguousPolicy {
    Retain,
    Fail,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_body_chars: default_max_body_chars(),
            on_ambiguous: default_on_ambiguous(),
        }
    }
}

/// What happens to a message judged promotional
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default = "default_action_mode")]
    pub mode: ActionMode,
    /// Label name for mode = "label"; created if it does not exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// Remove the UNREAD label only
    MarkRead,
    /// Remove UNREAD and INBOX
    Archive,
    /// Remove UNREAD and add a label
    Label,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            mode: default_action_mode(),
            label_name: None,
        }
    }
}

/// Retry, timeout, and quota settings for both external services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Total attempts per external call (initial + retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Per-call timeout; an expired call counts as a transient failure
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Gmail quota units refilled per second (reads cost 5, writes 50)
    #[serde(default = "default_mail_units_per_sec")]
    pub mail_units_per_sec: f64,
    /// Gmail quota burst capacity
    #[serde(default = "default_mail_units_burst")]
    pub mail_units_burst: f64,
    /// Classifier requests allowed per minute
    #[serde(default = "default_classifier_rpm")]
    pub classifier_requests_per_minute: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            page_size: default_page_size(),
            mail_units_per_sec: default_mail_units_per_sec(),
            mail_units_burst: default_mail_units_burst(),
            classifier_requests_per_minute: default_classifier_rpm(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_body_chars() -> usize {
    5000
}

fn default_on_ambiguous() -> AmbiguousPolicy {
    AmbiguousPolicy::Retain
}

fn default_action_mode() -> ActionMode {
    ActionMode::MarkRead
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_mail_units_per_sec() -> f64 {
    250.0
}

fn default_mail_units_burst() -> f64 {
    500.0
}

fn default_classifier_rpm() -> f64 {
    60.0
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.classifier.model.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "classifier.model must not be empty".to_string(),
            ));
        }

        if self.classifier.max_body_chars == 0 {
            return Err(TriageError::ConfigError(
                "classifier.max_body_chars must be at least 1".to_string(),
            ));
        }

        if matches!(self.action.mode, ActionMode::Label)
            && self
                .action
                .label_name
                .as_deref()
                .map(str::trim)
                .map_or(true, str::is_empty)
        {
            return Err(TriageError::ConfigError(
                "action.label_name is required when action.mode is 'label'".to_string(),
            ));
        }

        if self.limits.max_attempts == 0 {
            return Err(TriageError::ConfigError(
                "limits.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.limits.max_attempts > 10 {
            return Err(TriageError::ConfigError(
                "limits.max_attempts cannot exceed 10".to_string(),
            ));
        }

        if self.limits.call_timeout_secs == 0 {
            return Err(TriageError::ConfigError(
                "limits.call_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.limits.page_size == 0 || self.limits.page_size > 500 {
            return Err(TriageError::ConfigError(
                "limits.page_size must be between 1 and 500".to_string(),
            ));
        }

        if self.limits.mail_units_per_sec <= 0.0
            || self.limits.mail_units_per_sec > 250.0
        {
            return Err(TriageError::ConfigError(
                "limits.mail_units_per_sec must be between 1 and 250 (Gmail's per-user quota)"
                    .to_string(),
            ));
        }

        if self.limits.mail_units_burst < self.limits.mail_units_per_sec {
            return Err(TriageError::ConfigError(
                "limits.mail_units_burst must be at least mail_units_per_sec".to_string(),
            ));
        }

        if self.limits.classifier_requests_per_minute <= 0.0 {
            return Err(TriageError::ConfigError(
                "limits.classifier_requests_per_minute must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Write a commented example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let example = r#"# inbox-triage configuration

[classifier]
# OpenAI chat model used for the promotional/not-promotional verdict
model = "gpt-4o"
# Bodies longer than this are truncated before being sent to the model
max_body_chars = 5000
# When the model answers neither "True" nor "False":
#   "retain" - leave the message untouched and mark it done
#   "fail"   - record a failure so the next run retries it
on_ambiguous = "retain"

[action]
# What happens to a promotional message:
#   "mark_read" - remove the UNREAD label
#   "archive"   - remove UNREAD and INBOX
#   "label"     - remove UNREAD and add label_name (created if missing)
mode = "mark_read"
# label_name = "Promotions/Filtered"

[limits]
# Total attempts per external call (initial + retries)
max_attempts = 4
initial_backoff_ms = 500
max_backoff_secs = 30
call_timeout_secs = 30
page_size = 100
# Gmail meters quota units per user per second; reads cost 5, writes 50
mail_units_per_sec = 250.0
mail_units_burst = 500.0
classifier_requests_per_minute = 60.0
"#;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        tokio::fs::write(path, example)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classifier.model, "gpt-4o");
        assert_eq!(config.classifier.max_body_chars, 5000);
        assert_eq!(config.action.mode, ActionMode::MarkRead);
        assert_eq!(config.limits.max_attempts, 4);
    }

    #[test]
    fn test_validate_empty_model() {
        let mut config = Config::default();
        config.classifier.model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_label_mode_requires_name() {
        let mut config = Config::default();
        config.action.mode = ActionMode::Label;
        assert!(config.validate().is_err());

        config.action.label_name = Some("Promotions".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_attempt_bounds() {
        let mut config = Config::default();
        config.limits.max_attempts = 0;
        assert!(config.validate().is_err());

        config.limits.max_attempts = 11;
        assert!(config.validate().is_err());

        config.limits.max_attempts = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_quota_bounds() {
        let mut config = Config::default();
        config.limits.mail_units_per_sec = 0.0;
        assert!(config.validate().is_err());

        config.limits.mail_units_per_sec = 500.0;
        assert!(config.validate().is_err());

        config.limits.mail_units_per_sec = 100.0;
        config.limits.mail_units_burst = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_config_fills_defaults() {
        let toml_str = r#"
            [classifier]
            model = "gpt-4o-mini"

            [action]
            mode = "archive"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.classifier.model, "gpt-4o-mini");
        assert_eq!(config.action.mode, ActionMode::Archive);
        // Untouched sections come from defaults
        assert_eq!(config.limits.page_size, 100);
        assert_eq!(config.classifier.on_ambiguous, AmbiguousPolicy::Retain);
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.classifier.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.classifier.model = "gpt-4.1".to_string();
        config.action.mode = ActionMode::Label;
        config.action.label_name = Some("Triage/Promotional".to_string());

        config.save(&path).await.unwrap();
        let loaded = Config::load(&path).await.unwrap();

        assert_eq!(loaded.classifier.model, "gpt-4.1");
        assert_eq!(loaded.action.mode, ActionMode::Label);
        assert_eq!(loaded.action.label_name.as_deref(), Some("Triage/Promotional"));
    }

    #[tokio::test]
    async fn test_create_example_parses() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        Config::create_example(&path).await.unwrap();
        let loaded = Config::load(&path).await.unwrap();
        assert!(loaded.validate().is_ok());
    }
}
