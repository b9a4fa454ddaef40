use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BRANCH: &str = "main";

/// skillpush configuration stored in a toml file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// load config from file, falling back to defaults when it is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// deadline applied to every remote call
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs.max(1))
    }
}

/// remote api settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    /// per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// deployment settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// branch created in new repositories
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// glob patterns skipped when loading a skill directory
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            exclude: default_excludes(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    format!("skillpush/{}", env!("CARGO_PKG_VERSION"))
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_excludes() -> Vec<String> {
    vec![
        ".git".to_string(),
        ".git/**".to_string(),
        "**/.DS_Store".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config {
            api: ApiConfig {
                base_url: "https://ghe.example.com/api/v3".to_string(),
                timeout_secs: 5,
                user_agent: "test".to_string(),
            },
            deploy: DeployConfig {
                default_branch: "trunk".to_string(),
                exclude: vec!["*.tmp".to_string()],
            },
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        assert_eq!(config.deploy.default_branch, "main");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_partial_section() {
        let toml_str = r#"
[api]
timeout_secs = 0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        // a zero timeout would fail every call immediately
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skillpush.toml");

        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());

        let mut config = Config::default();
        config.deploy.default_branch = "release".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.deploy.default_branch, "release");
    }
}
