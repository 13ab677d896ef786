//! Configuration parsing and structures

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tonic::Code;

use crate::client::is_valid_provider_name;

/// Directory provider plugins place their sockets in unless configured otherwise.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/secrets-store-csi-providers";

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider connection settings
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Volumes to mount
    #[serde(default)]
    pub mounts: Vec<RawMountConfig>,
}

/// Raw mount configuration before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawMountConfig {
    /// Name of the provider plugin serving this volume
    pub provider: String,

    /// Absolute path the payloads are written under
    pub target_path: PathBuf,

    /// File mode as a decimal string (e.g. "420" for 0644)
    #[serde(default = "default_permission")]
    pub permission: String,

    /// Volume attributes handed to the provider
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Secrets handed to the provider
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Object versions from the previous mount of this volume
    #[serde(default)]
    pub object_versions: HashMap<String, String>,
}

fn default_permission() -> String {
    "420".to_string()
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Provider connection settings
    pub providers: ProvidersConfig,

    /// Volumes to mount (fully resolved)
    pub mounts: Vec<MountConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Provider connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Directory holding `<provider>.sock` files
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Upper bound on a single mount call, including retries
    #[serde(default = "default_mount_timeout")]
    #[serde(with = "humantime_serde")]
    pub mount_timeout: Duration,

    /// Retry behaviour for provider RPCs
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_DIR)
}

fn default_mount_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
            mount_timeout: default_mount_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Retry policy applied to every provider RPC.
///
/// The defaults match what provider plugins have historically been tested
/// against: three attempts, backing off from one second towards ten, and
/// only retrying when the provider is unavailable.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Ceiling for the delay between attempts
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Growth factor applied to the delay after every retry
    pub backoff_multiplier: f64,

    /// Status codes worth retrying
    #[serde(with = "code_names")]
    pub retryable_codes: Vec<Code>,

    /// Wait for the socket to accept connections before retrying
    pub wait_for_ready: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 1.1,
            retryable_codes: vec![Code::Unavailable],
            wait_for_ready: true,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt with this code may be retried
    pub fn is_retryable(&self, code: Code) -> bool {
        self.retryable_codes.contains(&code)
    }

    /// Delay to use after `current`, capped at `max_backoff`
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(self.max_backoff)
    }
}

/// Serde helper for status codes written as upper-case gRPC names.
mod code_names {
    use serde::{Deserialize, Deserializer};
    use tonic::Code;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Code>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        names
            .iter()
            .map(|name| {
                parse(name).ok_or_else(|| {
                    serde::de::Error::custom(format!("unknown status code {name:?}"))
                })
            })
            .collect()
    }

    fn parse(name: &str) -> Option<Code> {
        let code = match name.to_ascii_uppercase().as_str() {
            "CANCELLED" => Code::Cancelled,
            "UNKNOWN" => Code::Unknown,
            "INVALID_ARGUMENT" => Code::InvalidArgument,
            "DEADLINE_EXCEEDED" => Code::DeadlineExceeded,
            "NOT_FOUND" => Code::NotFound,
            "ALREADY_EXISTS" => Code::AlreadyExists,
            "PERMISSION_DENIED" => Code::PermissionDenied,
            "RESOURCE_EXHAUSTED" => Code::ResourceExhausted,
            "FAILED_PRECONDITION" => Code::FailedPrecondition,
            "ABORTED" => Code::Aborted,
            "OUT_OF_RANGE" => Code::OutOfRange,
            "UNIMPLEMENTED" => Code::Unimplemented,
            "INTERNAL" => Code::Internal,
            "UNAVAILABLE" => Code::Unavailable,
            "DATA_LOSS" => Code::DataLoss,
            "UNAUTHENTICATED" => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }
}

/// A volume mount (resolved)
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Provider plugin name
    pub provider: String,

    /// Absolute path the payloads are written under
    pub target_path: PathBuf,

    /// File mode as a decimal string
    pub permission: String,

    /// Attributes, serialized the way providers expect them
    pub attributes: String,

    /// Secrets, serialized the way providers expect them
    pub secrets: String,

    /// Object versions from the previous mount generation
    pub object_versions: HashMap<String, String>,
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by serializing mount parameters
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            providers,
            mounts,
        } = self;

        let mut resolved_mounts = Vec::with_capacity(mounts.len());
        for raw_mount in mounts {
            resolved_mounts.push(Self::resolve_mount(raw_mount)?);
        }

        Ok(Config {
            logging,
            providers,
            mounts: resolved_mounts,
        })
    }

    fn resolve_mount(raw: RawMountConfig) -> Result<MountConfig, ConfigError> {
        let attributes = serde_json::to_string(&raw.attributes).map_err(|e| {
            ConfigError::ValidationError(format!(
                "Mount {:?}: cannot serialize attributes: {}",
                raw.target_path, e
            ))
        })?;
        let secrets = serde_json::to_string(&raw.secrets).map_err(|e| {
            ConfigError::ValidationError(format!(
                "Mount {:?}: cannot serialize secrets: {}",
                raw.target_path, e
            ))
        })?;

        Ok(MountConfig {
            provider: raw.provider,
            target_path: raw.target_path,
            permission: raw.permission,
            attributes,
            secrets,
            object_versions: raw.object_versions,
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.providers.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                retry.backoff_multiplier
            )));
        }

        if self.mounts.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one mount is required".to_string(),
            ));
        }

        let mut paths = std::collections::HashSet::new();
        for mount in &self.mounts {
            if !is_valid_provider_name(&mount.provider) {
                return Err(ConfigError::ValidationError(format!(
                    "Mount {:?}: invalid provider name {:?}",
                    mount.target_path, mount.provider
                )));
            }
            if !mount.target_path.is_absolute() {
                return Err(ConfigError::ValidationError(format!(
                    "Mount {:?}: target_path must be absolute",
                    mount.target_path
                )));
            }
            if !paths.insert(&mount.target_path) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate target path: {:?}",
                    mount.target_path
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let yaml = r#"
mounts:
  - provider: vault
    target_path: /mnt/secrets
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.providers.socket_dir, PathBuf::from(DEFAULT_SOCKET_DIR));
        assert_eq!(config.providers.mount_timeout, Duration::from_secs(30));
        assert_eq!(config.providers.retry, RetryPolicy::default());

        let mount = &config.mounts[0];
        assert_eq!(mount.permission, "420");
        assert_eq!(mount.attributes, "{}");
        assert_eq!(mount.secrets, "{}");
        assert!(mount.object_versions.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
logging:
  level: debug

providers:
  socket_dir: /tmp/providers
  mount_timeout: 5s
  retry:
    max_attempts: 5
    initial_backoff: 100ms
    max_backoff: 2s
    backoff_multiplier: 2.0
    retryable_codes: [UNAVAILABLE, deadline_exceeded]
    wait_for_ready: false

mounts:
  - provider: azure
    target_path: /mnt/kv
    permission: "256"
    attributes:
      keyvaultName: kv1
      objects: "array: []"
    secrets:
      clientid: abc
    object_versions:
      secret/foo: v1
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.providers.socket_dir, PathBuf::from("/tmp/providers"));
        assert_eq!(config.providers.mount_timeout, Duration::from_secs(5));

        let retry = &config.providers.retry;
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(retry.max_backoff, Duration::from_secs(2));
        assert_eq!(retry.retryable_codes, vec![Code::Unavailable, Code::DeadlineExceeded]);
        assert!(!retry.wait_for_ready);

        let mount = &config.mounts[0];
        assert_eq!(mount.provider, "azure");
        assert_eq!(mount.permission, "256");
        assert_eq!(mount.attributes, r#"{"keyvaultName":"kv1","objects":"array: []"}"#);
        assert_eq!(mount.secrets, r#"{"clientid":"abc"}"#);
        assert_eq!(mount.object_versions.get("secret/foo"), Some(&"v1".to_string()));
    }

    #[test]
    fn test_partial_retry_keeps_defaults() {
        let yaml = r#"
providers:
  retry:
    max_attempts: 1
mounts:
  - provider: gcp
    target_path: /mnt/gcp
"#;

        let config = Config::from_str(yaml).unwrap();
        let retry = &config.providers.retry;
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(retry.retryable_codes, vec![Code::Unavailable]);
    }

    #[test]
    fn test_unknown_status_code_rejected() {
        let yaml = r#"
providers:
  retry:
    retryable_codes: [NOT_A_CODE]
mounts: []
"#;

        let err = Config::from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("NOT_A_CODE"), "{}", err);
    }

    #[test]
    fn test_validate_empty_mounts() {
        let config = Config {
            logging: LoggingConfig::default(),
            providers: ProvidersConfig::default(),
            mounts: vec![],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_mounts() {
        let yaml = r#"
mounts:
  - provider: "bad/name"
    target_path: /mnt/a
"#;
        let err = Config::from_str(yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("invalid provider name"), "{}", err);

        let yaml = r#"
mounts:
  - provider: vault
    target_path: relative/dir
"#;
        let err = Config::from_str(yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("must be absolute"), "{}", err);

        let yaml = r#"
mounts:
  - provider: vault
    target_path: /mnt/a
  - provider: gcp
    target_path: /mnt/a
"#;
        let err = Config::from_str(yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate target path"), "{}", err);
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut config = Config::from_str(
            r#"
mounts:
  - provider: vault
    target_path: /mnt/a
"#,
        )
        .unwrap();

        config.providers.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.providers.retry.max_attempts = 3;
        config.providers.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_retry_policy() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(retry.max_backoff, Duration::from_secs(10));
        assert_eq!(retry.backoff_multiplier, 1.1);
        assert_eq!(retry.retryable_codes, vec![Code::Unavailable]);
        assert!(retry.wait_for_ready);
        assert!(retry.is_retryable(Code::Unavailable));
        assert!(!retry.is_retryable(Code::Unknown));
    }

    #[test]
    fn test_next_backoff_is_capped() {
        let policy = RetryPolicy::default();
        let second = policy.next_backoff(policy.initial_backoff);
        assert!(second > Duration::from_secs(1));
        assert!(second < Duration::from_millis(1101));
        assert_eq!(policy.next_backoff(Duration::from_secs(20)), Duration::from_secs(10));
    }
}
