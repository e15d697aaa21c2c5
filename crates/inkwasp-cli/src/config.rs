use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Name variants used for the addressing fallback when no structured
    /// mention metadata arrives.
    #[serde(default = "default_bot_names")]
    pub names: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            names: default_bot_names(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub webhook_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            webhook_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig {
    Gemini {
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
    },
    /// Offline stub: classifies everything as a memo. For development.
    Stub,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig::Stub
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_bot_names() -> Vec<String> {
    vec!["@inkwasp".to_string(), "inkwasp".to_string()]
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_db_path() -> String {
    "inkwasp.db".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot.names.is_empty() {
            bail!("bot.names must list at least one name variant");
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            bail!("server.bind is not a valid socket address: {}", self.server.bind);
        }
        if let ExtractorConfig::Gemini { api_key, .. } = &self.extractor {
            if api_key.is_empty() {
                bail!("extractor.api_key must not be empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert!(matches!(config.extractor, ExtractorConfig::Stub));
        assert_eq!(config.bot.names.len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
bot:
  names: ["@Bot", "Bot"]
server:
  bind: "127.0.0.1:8080"
  webhook_token: s3cret
extractor:
  kind: gemini
  api_key: key-123
  model: gemini-2.0-flash
storage:
  path: /tmp/records.db
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.webhook_token.as_deref(), Some("s3cret"));
        match config.extractor {
            ExtractorConfig::Gemini { api_key, model } => {
                assert_eq!(api_key, "key-123");
                assert_eq!(model, "gemini-2.0-flash");
            }
            _ => panic!("expected gemini extractor"),
        }
    }

    #[test]
    fn invalid_bind_fails_validation() {
        let raw = "server:\n  bind: not-an-addr\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_gemini_key_fails_validation() {
        let raw = "extractor:\n  kind: gemini\n  api_key: \"\"\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inkwasp.yaml");
        std::fs::write(&path, "server:\n  bind: \"127.0.0.1:9000\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/inkwasp.yaml")).is_err());
    }
}
