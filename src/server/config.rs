//! Configuration loading for ferryd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.ferry/config.toml` (user)
//! 3. `/etc/ferry/config.toml` (system)
//!
//! The bearer token is a secret and is loaded separately, with mandatory
//! permission checks:
//! 1. `~/.ferry/secrets.toml` (user, must be 0600)
//! 2. `/etc/ferry/secrets.toml` (system, must be 0600)
//! 3. `FERRY_TOKEN` environment variable

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::ChunkSize;
use crate::engine::{DEFAULT_STREAM_BUFFER, TransferPolicy};
use crate::{Result, TransferError};

/// Environment variable consulted when no secrets file provides a token.
pub const TOKEN_ENV_VAR: &str = "FERRY_TOKEN";

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    /// TLS identity. Without it the server runs in plaintext.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:50051).
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            limits: LimitsConfig::default(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:50051".to_string()
}

/// Resource limits.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent calls per connection (default: unlimited).
    #[serde(default)]
    pub max_concurrent_calls: Option<usize>,
    /// Upper bound on any call's duration in seconds (default: none).
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
}

impl LimitsConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Storage location.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the served files (default: ./storage).
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./storage")
}

/// Chunking and pacing.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Download chunk size in bytes (default: 65536).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Delay between download chunks in milliseconds (default: none).
    #[serde(default)]
    pub pacing_ms: Option<u64>,
    /// Outbound messages buffered per call (default: 16).
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Progress notifications buffered per call (default: 1).
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            pacing_ms: None,
            stream_buffer: default_stream_buffer(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

fn default_chunk_size() -> usize {
    ChunkSize::default().get()
}

fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

fn default_progress_buffer() -> usize {
    1
}

impl TransferConfig {
    /// Build the engine policy; fails on a zero chunk size.
    pub fn policy(&self) -> Result<TransferPolicy> {
        let mut policy = TransferPolicy::new()
            .chunk_size(ChunkSize::new(self.chunk_size)?)
            .stream_buffer(self.stream_buffer)
            .progress_buffer(self.progress_buffer);
        if let Some(ms) = self.pacing_ms {
            policy = policy.pacing(Duration::from_millis(ms));
        }
        Ok(policy)
    }
}

/// PEM certificate chain and private key.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Secrets configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub token: Option<String>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.ferry/config.toml`
    /// 3. `/etc/ferry/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            TransferError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            TransferError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(TransferError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".ferry").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/ferry/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(TransferError::Configuration(
            "No config file found. Create ~/.ferry/config.toml or /etc/ferry/config.toml"
                .to_string(),
        ))
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the token may come from
    /// the environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".ferry").join("secrets.toml");
            if user_secrets.exists() {
                Self::check_permissions(&user_secrets)?;
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/ferry/secrets.toml");
        if system_secrets.exists() {
            Self::check_permissions(&system_secrets)?;
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TransferError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            TransferError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            TransferError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(TransferError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// The expected bearer token, falling back to `FERRY_TOKEN`.
    pub fn token(&self) -> Result<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
            .ok_or_else(|| {
                TransferError::Configuration(format!(
                    "no bearer token configured; set `token` in secrets.toml or {TOKEN_ENV_VAR}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.address, "127.0.0.1:50051");
        assert_eq!(config.storage.root, PathBuf::from("./storage"));
        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert!(config.transfer.pacing_ms.is_none());
        assert!(config.server.limits.call_timeout().is_none());
        assert!(config.tls.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [server]
            address = "0.0.0.0:50051"

            [server.limits]
            max_concurrent_calls = 32
            call_timeout_secs = 600

            [storage]
            root = "/srv/ferry"

            [transfer]
            chunk_size = 5
            pacing_ms = 1000

            [tls]
            cert = "ssl/localhost.pem"
            key = "ssl/localhost-key.pem"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.address, "0.0.0.0:50051");
        assert_eq!(config.server.limits.max_concurrent_calls, Some(32));
        assert_eq!(
            config.server.limits.call_timeout(),
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.storage.root, PathBuf::from("/srv/ferry"));

        let policy = config.transfer.policy().unwrap();
        assert_eq!(policy.chunk_size, ChunkSize::REFERENCE);
        assert_eq!(policy.pacing, Some(Duration::from_secs(1)));

        let tls = config.tls.unwrap();
        assert_eq!(tls.cert, PathBuf::from("ssl/localhost.pem"));
        assert_eq!(tls.key, PathBuf::from("ssl/localhost-key.pem"));
    }

    #[test]
    fn zero_chunk_size_is_a_configuration_error() {
        let config: Config = toml::from_str("[transfer]\nchunk_size = 0").unwrap();
        assert!(matches!(
            config.transfer.policy(),
            Err(TransferError::Configuration(_))
        ));
    }

    #[test]
    fn parse_secrets() {
        let secrets: Secrets = toml::from_str(r#"token = "test-token""#).unwrap();
        assert_eq!(secrets.token().unwrap(), "test-token");
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_secrets_are_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "token = \"t\"").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(Secrets::check_permissions(&path).is_err());

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        assert!(Secrets::check_permissions(&path).is_ok());
        assert_eq!(
            Secrets::load_from_file(&path).unwrap().token,
            Some("t".to_string())
        );
    }
}
