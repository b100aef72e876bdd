use crate::chain;
use alloy::primitives::Address;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from watchtower.toml.
///
/// Every field is optional in the file; environment variables and CLI flags
/// are layered on top before the result is frozen into [`Settings`].
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct WatchtowerConfig {
    pub chain: ChainConfig,
    pub watch: WatchConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub timeout_secs: i64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub beneficiary: Option<String>,
}

// --- Default implementations ---

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_secs: 10,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: None,
            password: None,
            beneficiary: None,
        }
    }
}

/// Values supplied on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Default)]
pub struct Overrides {
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    pub timeout_secs: Option<i64>,
    pub poll_interval_secs: Option<u64>,
}

/// Errors that abort startup before the watch loop ever runs.
#[derive(Debug)]
pub enum ConfigError {
    /// One or more required settings are absent (listed by env var name).
    Missing { names: Vec<&'static str> },
    /// A setting is present but cannot be used.
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    /// The contract address is not `0x` followed by 40 hex digits.
    InvalidAddress { address: String },
    /// The config file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// The RPC endpoint failed the startup connectivity check.
    Unreachable { url: String, detail: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing { names } => {
                write!(
                    f,
                    "missing required settings: {} (set them in the environment or the config file)",
                    names.join(", ")
                )
            }
            ConfigError::InvalidValue {
                name,
                value,
                reason,
            } => {
                write!(f, "invalid value for {name} ({value:?}): {reason}")
            }
            ConfigError::InvalidAddress { address } => {
                write!(
                    f,
                    "invalid contract address {address:?}: expected 0x followed by 40 hex digits"
                )
            }
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Unreachable { url, detail } => {
                write!(f, "failed to connect to RPC endpoint {url}: {detail}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl WatchtowerConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Layer environment variables over the file values.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map. Empty
    /// values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RPC_URL") {
            self.chain.rpc_url = Some(v);
        }
        if let Some(v) = get("CONTRACT_ADDRESS") {
            self.chain.contract_address = Some(v);
        }
        if let Some(v) = get("TIMEOUT") {
            self.watch.timeout_secs = parse_number("TIMEOUT", &v)?;
        }
        if let Some(v) = get("EMAIL_HOST") {
            self.email.host = v;
        }
        if let Some(v) = get("EMAIL_PORT") {
            self.email.port = parse_number("EMAIL_PORT", &v)?;
        }
        if let Some(v) = get("EMAIL_USER") {
            self.email.username = Some(v);
        }
        if let Some(v) = get("EMAIL_PASS") {
            self.email.password = Some(v);
        }
        if let Some(v) = get("BENEFICIARY_EMAIL") {
            self.email.beneficiary = Some(v);
        }
        Ok(())
    }

    /// Layer CLI flags over everything else.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(ref v) = overrides.rpc_url {
            self.chain.rpc_url = Some(v.clone());
        }
        if let Some(ref v) = overrides.contract_address {
            self.chain.contract_address = Some(v.clone());
        }
        if let Some(v) = overrides.timeout_secs {
            self.watch.timeout_secs = v;
        }
        if let Some(v) = overrides.poll_interval_secs {
            self.watch.poll_interval_secs = v;
        }
    }

    /// Report every absent required setting at once.
    pub fn check_required(&self) -> Result<(), ConfigError> {
        let mut names = Vec::new();
        if is_unset(&self.chain.rpc_url) {
            names.push("RPC_URL");
        }
        if is_unset(&self.chain.contract_address) {
            names.push("CONTRACT_ADDRESS");
        }
        if is_unset(&self.email.username) {
            names.push("EMAIL_USER");
        }
        if is_unset(&self.email.password) {
            names.push("EMAIL_PASS");
        }
        if names.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing { names })
        }
    }
}

fn is_unset(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Outbound mail settings.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Validated, immutable settings shared by reference with every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub rpc_url: String,
    pub contract_address: Address,
    pub timeout_secs: i64,
    pub poll_interval: Duration,
    pub smtp: SmtpSettings,
    pub beneficiary: String,
}

impl Settings {
    /// Freeze a layered config plus the resolved beneficiary into settings.
    pub fn resolve(config: WatchtowerConfig, beneficiary: String) -> Result<Self, ConfigError> {
        config.check_required()?;

        let WatchtowerConfig { chain, watch, email } = config;
        let contract = chain.contract_address.unwrap_or_default().trim().to_string();
        let contract_address = chain::parse_address(&contract)
            .ok_or(ConfigError::InvalidAddress { address: contract })?;

        // The login name doubles as the From mailbox.
        let username = email.username.unwrap_or_default();
        if let Err(e) = username.parse::<lettre::message::Mailbox>() {
            return Err(ConfigError::InvalidValue {
                name: "EMAIL_USER",
                value: username,
                reason: e.to_string(),
            });
        }

        if let Err(e) = beneficiary.parse::<lettre::Address>() {
            return Err(ConfigError::InvalidValue {
                name: "BENEFICIARY_EMAIL",
                value: beneficiary,
                reason: e.to_string(),
            });
        }

        if watch.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "poll_interval_secs",
                value: "0".to_string(),
                reason: "poll interval must be at least one second".to_string(),
            });
        }

        Ok(Self {
            rpc_url: chain.rpc_url.unwrap_or_default().trim().to_string(),
            contract_address,
            timeout_secs: watch.timeout_secs,
            poll_interval: Duration::from_secs(watch.poll_interval_secs),
            smtp: SmtpSettings {
                host: email.host,
                port: email.port,
                username,
                password: email.password.unwrap_or_default(),
            },
            beneficiary,
        })
    }

    /// Human-readable dump for `--dry-run`. The password is never printed.
    pub fn summary(&self) -> String {
        format!(
            "RPC endpoint:     {}\n\
             Contract address: {}\n\
             Timeout:          {}s\n\
             Poll interval:    {}s\n\
             SMTP server:      {}:{}\n\
             SMTP user:        {}\n\
             SMTP password:    ********\n\
             Beneficiary:      {}",
            self.rpc_url,
            self.contract_address,
            self.timeout_secs,
            self.poll_interval.as_secs(),
            self.smtp.host,
            self.smtp.port,
            self.smtp.username,
            self.beneficiary,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn complete_env() -> impl Fn(&str) -> Option<String> {
        env(&[
            ("RPC_URL", "http://127.0.0.1:8545"),
            ("CONTRACT_ADDRESS", ADDRESS),
            ("EMAIL_USER", "watcher@mail.test"),
            ("EMAIL_PASS", "hunter2"),
        ])
    }

    #[test]
    fn test_defaults() {
        let config = WatchtowerConfig::default();
        assert_eq!(config.watch.timeout_secs, 300);
        assert_eq!(config.watch.poll_interval_secs, 10);
        assert_eq!(config.email.host, "smtp.gmail.com");
        assert_eq!(config.email.port, 587);
        assert!(config.chain.rpc_url.is_none());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchtowerConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.watch.timeout_secs, 300);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchtower.toml");
        std::fs::write(
            &path,
            "[chain]\nrpc_url = \"http://node:8545\"\n\n[watch]\ntimeout_secs = 60\n",
        )
        .unwrap();

        let config = WatchtowerConfig::load(&path).unwrap();
        assert_eq!(config.chain.rpc_url.as_deref(), Some("http://node:8545"));
        assert_eq!(config.watch.timeout_secs, 60);
        assert_eq!(config.watch.poll_interval_secs, 10);
        assert_eq!(config.email.port, 587);
    }

    #[test]
    fn test_load_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchtower.toml");
        std::fs::write(&path, "[watch]\ntimeout_secs = \"soon\"\n").unwrap();

        let err = WatchtowerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = WatchtowerConfig::default();
        config.email.host = "smtp.file.test".to_string();
        config
            .apply_env(env(&[
                ("EMAIL_HOST", "smtp.env.test"),
                ("EMAIL_PORT", "2525"),
                ("TIMEOUT", "120"),
                ("BENEFICIARY_EMAIL", "heir@mail.test"),
            ]))
            .unwrap();
        assert_eq!(config.email.host, "smtp.env.test");
        assert_eq!(config.email.port, 2525);
        assert_eq!(config.watch.timeout_secs, 120);
        assert_eq!(config.email.beneficiary.as_deref(), Some("heir@mail.test"));
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut config = WatchtowerConfig::default();
        config.chain.rpc_url = Some("http://file:8545".to_string());
        config.apply_env(env(&[("RPC_URL", "  ")])).unwrap();
        assert_eq!(config.chain.rpc_url.as_deref(), Some("http://file:8545"));
    }

    #[test]
    fn test_non_numeric_timeout_is_invalid_value() {
        let mut config = WatchtowerConfig::default();
        let err = config.apply_env(env(&[("TIMEOUT", "five")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "TIMEOUT", .. }));
    }

    #[test]
    fn test_out_of_range_port_is_invalid_value() {
        let mut config = WatchtowerConfig::default();
        let err = config.apply_env(env(&[("EMAIL_PORT", "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "EMAIL_PORT", .. }));
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        config.apply_overrides(&Overrides {
            rpc_url: Some("http://cli:8545".to_string()),
            timeout_secs: Some(5),
            poll_interval_secs: Some(2),
            ..Default::default()
        });
        assert_eq!(config.chain.rpc_url.as_deref(), Some("http://cli:8545"));
        assert_eq!(config.chain.contract_address.as_deref(), Some(ADDRESS));
        assert_eq!(config.watch.timeout_secs, 5);
        assert_eq!(config.watch.poll_interval_secs, 2);
    }

    #[test]
    fn test_missing_settings_are_reported_together() {
        let mut config = WatchtowerConfig::default();
        config
            .apply_env(env(&[("RPC_URL", "http://127.0.0.1:8545")]))
            .unwrap();
        match config.check_required().unwrap_err() {
            ConfigError::Missing { names } => {
                assert_eq!(names, vec!["CONTRACT_ADDRESS", "EMAIL_USER", "EMAIL_PASS"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_complete_config() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        let settings = Settings::resolve(config, "heir@mail.test".to_string()).unwrap();

        assert_eq!(settings.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(settings.contract_address.to_string(), ADDRESS);
        assert_eq!(settings.timeout_secs, 300);
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.smtp.username, "watcher@mail.test");
        assert_eq!(settings.beneficiary, "heir@mail.test");
    }

    #[test]
    fn test_resolve_rejects_bad_address() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        config.chain.contract_address = Some("0x1234".to_string());
        let err = Settings::resolve(config, "heir@mail.test".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }

    #[test]
    fn test_resolve_rejects_zero_poll_interval() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        config.watch.poll_interval_secs = 0;
        let err = Settings::resolve(config, "heir@mail.test".to_string()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "poll_interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_beneficiary() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        let err = Settings::resolve(config, "not an address".to_string()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "BENEFICIARY_EMAIL",
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_rejects_username_that_is_not_a_mailbox() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        config.email.username = Some("apikey".to_string());
        let err = Settings::resolve(config, "heir@mail.test".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "EMAIL_USER", .. }));
        assert!(err.to_string().contains("apikey"));
    }

    #[test]
    fn test_resolve_accepts_lowercase_address() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        config.chain.contract_address = Some(ADDRESS.to_lowercase());
        let settings = Settings::resolve(config, "heir@mail.test".to_string()).unwrap();
        assert_eq!(settings.contract_address.to_string(), ADDRESS);
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        let settings = Settings::resolve(config, "heir@mail.test".to_string()).unwrap();
        let dump = format!("{:?}", settings);
        assert!(dump.contains("watcher@mail.test"));
        assert!(!dump.contains("hunter2"));
    }

    #[test]
    fn test_resolve_accepts_zero_timeout() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        config.watch.timeout_secs = 0;
        let settings = Settings::resolve(config, "heir@mail.test".to_string()).unwrap();
        assert_eq!(settings.timeout_secs, 0);
    }

    #[test]
    fn test_summary_redacts_password() {
        let mut config = WatchtowerConfig::default();
        config.apply_env(complete_env()).unwrap();
        let settings = Settings::resolve(config, "heir@mail.test".to_string()).unwrap();
        let summary = settings.summary();
        assert!(summary.contains("smtp.gmail.com:587"));
        assert!(summary.contains("heir@mail.test"));
        assert!(!summary.contains("hunter2"));
    }
}
