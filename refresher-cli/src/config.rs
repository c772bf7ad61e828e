//! TOML-backed application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use refresher::config::{BatchConfig, LoginConfig, PoolConfig};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mailbox: MailboxSection,
    pub pool: PoolSection,
    pub login: LoginSection,
    pub helper: HelperSection,
    pub batch: BatchSection,
    /// Snapshot file location; defaults next to the config file.
    pub store_path: Option<PathBuf>,

    #[serde(skip)]
    loaded_from: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailboxSection {
    pub base_url: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub base_url: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginSection {
    pub entry_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HelperSection {
    /// External browser-automation helper binary.
    pub command: String,
    pub args: Vec<String>,
}

impl Default for HelperSection {
    fn default() -> Self {
        Self {
            command: "refresher-helper".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub window: usize,
    pub wave_pause_secs: u64,
}

impl Default for BatchSection {
    fn default() -> Self {
        let defaults = BatchConfig::default();
        Self {
            window: defaults.window,
            wave_pause_secs: defaults.wave_pause.as_secs(),
        }
    }
}

impl AppConfig {
    /// Loads from `path`, or from the default location
    /// (`<config dir>/refresher/config.toml`) when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()
                .ok_or_else(|| CliError::Config("no config directory available".to_string()))?,
        };
        if !path.exists() {
            return Err(CliError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut config: AppConfig =
            toml::from_str(&raw).map_err(|e| CliError::Config(e.to_string()))?;
        config.loaded_from = Some(path);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("mailbox.base_url", &self.mailbox.base_url),
            ("mailbox.email", &self.mailbox.email),
            ("mailbox.password", &self.mailbox.password),
            ("pool.base_url", &self.pool.base_url),
            ("pool.password", &self.pool.password),
            ("login.entry_url", &self.login.entry_url),
        ]
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CliError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    /// Snapshot file: explicit setting, else `accounts.toml` next to the
    /// loaded config file.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store_path {
            return Ok(path.clone());
        }
        let base = self
            .loaded_from
            .as_deref()
            .and_then(Path::parent)
            .ok_or_else(|| CliError::Config("cannot derive store path".to_string()))?;
        Ok(base.join("accounts.toml"))
    }

    pub fn login_config(&self) -> LoginConfig {
        LoginConfig::new(&self.login.entry_url)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(&self.pool.base_url, &self.pool.password)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            window: self.batch.window,
            wave_pause: Duration::from_secs(self.batch.wave_pause_secs),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("refresher").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[mailbox]
base_url = "https://mail.example.com"
email = "master@example.com"
password = "pw"

[pool]
base_url = "https://pool.example.com"
password = "admin-pw"

[login]
entry_url = "https://auth.example.com/signin"
"#;

    #[test]
    fn minimal_config_loads_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.batch.window, 3);
        assert_eq!(config.helper.command, "refresher-helper");
        assert!(config.store_path().unwrap().ends_with("accounts.toml"));
    }

    #[test]
    fn missing_required_settings_are_named() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[mailbox]\nemail = \"m@example.com\"\n")
            .unwrap();

        let err = AppConfig::load(Some(file.path())).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("pool.base_url"));
        assert!(message.contains("login.entry_url"));
        assert!(!message.contains("mailbox.email"));
    }
}
