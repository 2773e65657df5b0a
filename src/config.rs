use crate::defaults;
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
}

/// Listening socket and per-request limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Humantime duration, e.g. "90s" or "2m"
    pub request_timeout: String,
}

/// Remote transcription service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            request_timeout: defaults::REQUEST_TIMEOUT_STR.to_string(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: defaults::UPSTREAM_URL.to_string(),
            model: defaults::MODEL.to_string(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                RelayError::from(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(RelayError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Resolve the effective configuration: an explicit path must exist, the
    /// default path may be missing. Environment overrides are applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) => Self::load_or_default(&path)?,
                None => Self::default(),
            },
        };
        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - OPENAI_API_KEY → upstream.api_key
    /// - VOXRELAY_HOST → server.host
    /// - VOXRELAY_PORT → server.port (ignored if not a number)
    /// - VOXRELAY_UPSTREAM_URL → upstream.url
    /// - VOXRELAY_MODEL → upstream.model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(defaults::API_KEY_ENV)
            && !key.is_empty()
        {
            self.upstream.api_key = Some(key);
        }

        if let Ok(host) = std::env::var("VOXRELAY_HOST")
            && !host.is_empty()
        {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("VOXRELAY_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }

        if let Ok(url) = std::env::var("VOXRELAY_UPSTREAM_URL")
            && !url.is_empty()
        {
            self.upstream.url = url;
        }

        if let Ok(model) = std::env::var("VOXRELAY_MODEL")
            && !model.is_empty()
        {
            self.upstream.model = model;
        }

        self
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "must be between 1 and 65535"));
        }
        self.request_timeout()?;
        if self.upstream.url.trim().is_empty() {
            return Err(invalid("upstream.url", "must not be empty"));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(invalid("upstream.model", "must not be empty"));
        }
        Ok(())
    }

    /// Parsed `server.request_timeout`.
    pub fn request_timeout(&self) -> Result<Duration> {
        let timeout = humantime::parse_duration(self.server.request_timeout.trim())
            .map_err(|e| invalid("server.request_timeout", &e.to_string()))?;
        if timeout.is_zero() {
            return Err(invalid("server.request_timeout", "must be greater than zero"));
        }
        Ok(timeout)
    }

    /// The upstream credential. Required to serve.
    pub fn api_key(&self) -> Result<&str> {
        self.upstream
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(RelayError::MissingApiKey)
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// TOML rendering with the credential masked, for display.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.upstream.api_key.is_some() {
            shown.upstream.api_key = Some("<redacted>".to_string());
        }
        toml::to_string_pretty(&shown).map_err(|e| RelayError::Other(e.to_string()))
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxrelay/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxrelay").join("config.toml"))
    }
}

fn invalid(key: &str, message: &str) -> RelayError {
    RelayError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_env() {
        remove_env("OPENAI_API_KEY");
        remove_env("VOXRELAY_HOST");
        remove_env("VOXRELAY_PORT");
        remove_env("VOXRELAY_UPSTREAM_URL");
        remove_env("VOXRELAY_MODEL");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(120));
        assert_eq!(config.upstream.model, "gpt-4o-mini-transcribe");
        assert_eq!(
            config.upstream.url,
            "https://api.openai.com/v1/audio/transcriptions"
        );
        assert_eq!(config.upstream.api_key, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let file = write_config(
            r#"
            [server]
            port = 9090
            request_timeout = "30s"

            [upstream]
            model = "whisper-1"
            "#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0", "unset fields keep defaults");
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(config.upstream.model, "whisper-1");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let file = write_config("[server\nport = ");
        assert!(matches!(
            Config::load(file.path()),
            Err(RelayError::ConfigParse { .. })
        ));
        assert!(Config::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/nonexistent/voxrelay/config.toml");
        assert!(matches!(
            Config::load(path),
            Err(RelayError::ConfigFileNotFound { .. })
        ));
        assert_eq!(Config::load_or_default(path).unwrap(), Config::default());
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        let result = Config::resolve(Some(Path::new("/nonexistent/voxrelay.toml")));
        assert!(matches!(result, Err(RelayError::ConfigFileNotFound { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();
        set_env("OPENAI_API_KEY", "sk-env");
        set_env("VOXRELAY_HOST", "127.0.0.1");
        set_env("VOXRELAY_PORT", "3000");
        set_env("VOXRELAY_UPSTREAM_URL", "http://localhost:9999/v1/audio/transcriptions");
        set_env("VOXRELAY_MODEL", "whisper-1");

        let config = Config::default().with_env_overrides();
        clear_env();

        assert_eq!(config.api_key().unwrap(), "sk-env");
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.upstream.url, "http://localhost:9999/v1/audio/transcriptions");
        assert_eq!(config.upstream.model, "whisper-1");
    }

    #[test]
    fn test_env_override_ignores_bad_port_and_empty_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();
        set_env("VOXRELAY_PORT", "eighty");
        set_env("VOXRELAY_MODEL", "");

        let config = Config::default().with_env_overrides();
        clear_env();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.upstream.model, "gpt-4o-mini-transcribe");
    }

    #[test]
    fn test_missing_api_key() {
        let config = Config::default();
        assert_eq!(config.api_key(), Err(RelayError::MissingApiKey));

        let mut blank = Config::default();
        blank.upstream.api_key = Some("  ".to_string());
        assert_eq!(blank.api_key(), Err(RelayError::MissingApiKey));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(
            config.validate(),
            Err(RelayError::ConfigInvalidValue { key, .. }) if key == "server.port"
        ));

        let mut config = Config::default();
        config.server.request_timeout = "soon".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.request_timeout = "0s".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upstream.model = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upstream.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_toml_hides_key() {
        let mut config = Config::default();
        config.upstream.api_key = Some("sk-secret".to_string());
        let shown = config.to_redacted_toml().unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
        assert!(shown.contains("[server]"));
    }

    #[test]
    fn test_default_path_ends_with_voxrelay() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("voxrelay/config.toml"));
        }
    }
}
