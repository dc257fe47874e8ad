//! Configuration management for class-chat.

use anyhow::{Context, Result};
use classroom_chat_client::ChatConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full CLI configuration: controller settings plus demo identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Controller configuration (`[store]`, `[events]`, `[logging]`).
    #[serde(flatten)]
    pub chat: ChatConfig,
    /// Demo scenario settings.
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Who takes part in the demo conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Channel the demo runs in.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// User id of the person running the demo.
    #[serde(default = "default_user")]
    pub user: String,
    /// Email shown to others for `user`.
    #[serde(default = "default_user_email")]
    pub user_email: String,
    /// User id of the scripted classmate.
    #[serde(default = "default_classmate")]
    pub classmate: String,
    /// Email shown for the classmate.
    #[serde(default = "default_classmate_email")]
    pub classmate_email: String,
}

fn default_channel() -> String {
    "class-1".to_string()
}

fn default_user() -> String {
    "student-1".to_string()
}

fn default_user_email() -> String {
    "student1@school.edu".to_string()
}

fn default_classmate() -> String {
    "student-2".to_string()
}

fn default_classmate_email() -> String {
    "student2@school.edu".to_string()
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            user: default_user(),
            user_email: default_user_email(),
            classmate: default_classmate(),
            classmate_email: default_classmate_email(),
        }
    }
}

impl CliConfig {
    /// Load configuration from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn no_path_gives_defaults() {
        let config = CliConfig::load(None).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.demo.channel, "class-1");
    }

    #[test]
    fn load_reads_both_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[store]
max_pending = 4

[demo]
channel = "biology"
classmate_email = "lab-partner@school.edu"
"#
        )
        .unwrap();

        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.chat.store.max_pending, 4);
        assert_eq!(config.chat.events.capacity, 128);
        assert_eq!(config.demo.channel, "biology");
        assert_eq!(config.demo.classmate_email, "lab-partner@school.edu");
        assert_eq!(config.demo.user, "student-1");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CliConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn rendered_config_loads_back() {
        let mut config = CliConfig::default();
        config.chat.store.max_pending = 9;
        config.demo.channel = "history".into();

        let rendered = config.to_toml().unwrap();
        let parsed: CliConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
