//! CLI configuration.
//!
//! All settings live in a single `config.toml`, by default at
//! `~/.config/crmsync/config.toml`. `access_token` and `webhook_token`
//! accept secret references:
//!
//! - `pass::path/in/store` takes the first line of `pass show path/in/store`
//! - `env::VAR_NAME` reads `$VAR_NAME`
//! - anything else is a literal
//!
//! References are resolved only when a command needs the value, and
//! `config dump` prints them as written while masking literals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crmsync_engine::{EngineConfig, RenewalConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CliError, CliResult};

const REDACTED: &str = "<redacted>";

/// Where a secret-bearing setting gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretSource<'a> {
    Literal(&'a str),
    Env(&'a str),
    Pass(&'a str),
}

impl<'a> SecretSource<'a> {
    fn parse(value: &'a str) -> Self {
        if let Some(path) = value.strip_prefix("pass::") {
            Self::Pass(path)
        } else if let Some(var) = value.strip_prefix("env::") {
            Self::Env(var)
        } else {
            Self::Literal(value)
        }
    }

    fn is_reference(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }

    /// Resolves the value of `[google].<key>`. An empty secret is an error.
    fn resolve(&self, key: &str) -> CliResult<String> {
        let value = match *self {
            Self::Literal(value) => value.to_string(),
            Self::Env(var) => std::env::var(var).map_err(|_| {
                CliError::config(format!(
                    "{key}: environment variable `{var}` is not set"
                ))
            })?,
            Self::Pass(path) => read_pass(path).map_err(|e| CliError::config(format!("{key}: {e}")))?,
        };
        if value.trim().is_empty() {
            return Err(CliError::config(format!("{key} resolved to an empty value")));
        }
        Ok(value)
    }
}

fn read_pass(path: &str) -> Result<String, String> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run `pass show {}`: {}", path, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "`pass show {}` failed (exit {}): {}",
            path,
            output.status,
            stderr.trim()
        ));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| format!("`pass show {}` produced no output", path))
}

/// Keeps references, masks literals.
fn redact(value: &Option<String>) -> Option<String> {
    value.as_deref().map(|v| {
        if SecretSource::parse(v).is_reference() {
            v.to_string()
        } else {
            REDACTED.to_string()
        }
    })
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmsyncConfig {
    /// Google Calendar settings.
    pub google: Option<GoogleSettings>,

    /// Retry and timeout settings for remote calls.
    pub sync: SyncSettings,

    /// Channel renewal settings.
    pub renewal: RenewalSettings,

    /// Local database settings.
    pub store: StoreSettings,
}

/// `[google]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleSettings {
    /// Bearer token for the Calendar API (supports secret references).
    pub access_token: Option<String>,

    /// HTTPS endpoint the remote posts notifications to.
    pub webhook_address: Option<String>,

    /// Token echoed on every notification (supports secret references).
    pub webhook_token: Option<String>,

    /// Requested channel lifetime in seconds.
    pub channel_ttl_secs: Option<u64>,

    /// `maxResults` for list calls.
    pub page_size: Option<u32>,

    /// HTTP timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// API root override.
    pub api_base: Option<String>,
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: retry.max_backoff.as_millis() as u64,
            backoff_multiplier: retry.backoff_multiplier,
            request_timeout_secs: EngineConfig::default().request_timeout.as_secs(),
        }
    }
}

/// `[renewal]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalSettings {
    /// Renew channels expiring within this many seconds.
    pub margin_secs: u64,
    /// Seconds between renewal passes.
    pub check_interval_secs: u64,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        let renewal = RenewalConfig::default();
        Self {
            margin_secs: renewal.margin.as_secs(),
            check_interval_secs: renewal.check_interval.as_secs(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database file.
    pub path: Option<PathBuf>,
}

impl CrmsyncConfig {
    /// Loads `path`, or the default file if it exists, or the defaults.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Loads configuration from a specific file.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CliResult<Self> {
        toml::from_str(content).map_err(|e| CliError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crmsync")
            .join("config.toml")
    }

    /// Returns the default database path.
    pub fn default_store_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crmsync")
            .join("crmsync.db")
    }

    /// The database file to open.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(Self::default_store_path)
    }

    fn google(&self) -> CliResult<&GoogleSettings> {
        self.google.as_ref().ok_or_else(|| {
            CliError::config(format!(
                "no [google] section in {}",
                Self::default_path().display()
            ))
        })
    }

    /// Builds the engine settings, resolving the webhook token.
    pub fn engine_config(&self) -> CliResult<EngineConfig> {
        let google = self.google()?;
        let address = google
            .webhook_address
            .as_deref()
            .ok_or_else(|| CliError::config("webhook_address is missing from [google]"))?;
        let url = Url::parse(address)
            .map_err(|e| CliError::config(format!("invalid webhook_address {:?}: {}", address, e)))?;
        if url.scheme() != "https" {
            return Err(CliError::config(format!(
                "webhook_address must use https, got {}",
                url.scheme()
            )));
        }

        let mut config = EngineConfig::new(address)
            .with_request_timeout(Duration::from_secs(self.sync.request_timeout_secs))
            .with_retry(self.retry_policy());
        if let Some(raw) = &google.webhook_token {
            let token = SecretSource::parse(raw).resolve("webhook_token")?;
            config = config.with_webhook_token(token);
        }
        if let Some(ttl) = google.channel_ttl_secs {
            config = config.with_channel_ttl(Duration::from_secs(ttl));
        }

        config.validate()?;
        Ok(config)
    }

    /// A copy safe to print: literal secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(google) = copy.google.as_mut() {
            google.access_token = redact(&google.access_token);
            google.webhook_token = redact(&google.webhook_token);
        }
        copy
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.sync.max_attempts)
            .with_backoff(
                Duration::from_millis(self.sync.initial_backoff_ms),
                Duration::from_millis(self.sync.max_backoff_ms),
                self.sync.backoff_multiplier,
            )
    }

    pub fn renewal_config(&self) -> RenewalConfig {
        RenewalConfig::default()
            .with_margin(Duration::from_secs(self.renewal.margin_secs))
            .with_check_interval(Duration::from_secs(self.renewal.check_interval_secs.max(1)))
    }

    /// Builds the Calendar client settings, resolving the access token.
    #[cfg(feature = "google")]
    pub fn google_config(&self) -> CliResult<crmsync_remote::google::GoogleConfig> {
        use crmsync_remote::google::GoogleConfig;

        let google = self.google()?;
        let raw = google
            .access_token
            .as_deref()
            .ok_or_else(|| CliError::config("access_token is missing from [google]"))?;
        let token = SecretSource::parse(raw).resolve("access_token")?;

        let mut config = GoogleConfig::new(token);
        if let Some(base) = &google.api_base {
            config = config.with_api_base(base);
        }
        if let Some(secs) = google.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(size) = google.page_size {
            config = config.with_page_size(size);
        }
        config.validate().map_err(CliError::Config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[google]
access_token = "ya29.inline"
webhook_address = "https://crm.example.com/hooks/calendar"
webhook_token = "s3cret"
channel_ttl_secs = 86400
page_size = 500

[sync]
max_attempts = 5
initial_backoff_ms = 100

[renewal]
margin_secs = 7200

[store]
path = "/var/lib/crmsync/mirror.db"
"#;

    #[test]
    fn empty_file_uses_defaults() {
        let config = CrmsyncConfig::parse("").unwrap();
        assert!(config.google.is_none());
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.request_timeout_secs, 30);
        assert_eq!(config.renewal.margin_secs, 3600);
        assert!(config.store_path().ends_with("crmsync/crmsync.db"));
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn full_file() {
        let config = CrmsyncConfig::parse(FULL).unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/crmsync/mirror.db"));

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.webhook_token.as_deref(), Some("s3cret"));
        assert_eq!(engine.channel_ttl, Some(Duration::from_secs(86400)));
        assert_eq!(engine.retry.max_attempts, 5);
        assert_eq!(engine.retry.initial_backoff, Duration::from_millis(100));

        let renewal = config.renewal_config();
        assert_eq!(renewal.margin, Duration::from_secs(7200));
        assert_eq!(renewal.check_interval, Duration::from_secs(300));
    }

    #[cfg(feature = "google")]
    #[test]
    fn google_config_resolves_env_token() {
        unsafe {
            std::env::set_var("_CRMSYNC_TEST_ACCESS_TOKEN", "ya29.from-env");
        }
        let config = CrmsyncConfig::parse(
            "[google]\naccess_token = \"env::_CRMSYNC_TEST_ACCESS_TOKEN\"\npage_size = 100\n",
        )
        .unwrap();
        let google = config.google_config().unwrap();
        assert_eq!(google.access_token, "ya29.from-env");
        assert_eq!(google.page_size, Some(100));
        unsafe {
            std::env::remove_var("_CRMSYNC_TEST_ACCESS_TOKEN");
        }
    }

    #[test]
    fn secret_sources() {
        assert_eq!(SecretSource::parse("ya29.literal"), SecretSource::Literal("ya29.literal"));
        assert_eq!(SecretSource::parse("env::TOKEN"), SecretSource::Env("TOKEN"));
        assert_eq!(SecretSource::parse("pass::crm/google"), SecretSource::Pass("crm/google"));
        assert_eq!(
            SecretSource::parse("ya29.literal").resolve("access_token").unwrap(),
            "ya29.literal"
        );
    }

    #[test]
    fn unresolvable_secret_names_its_key() {
        let err = SecretSource::parse("env::_CRMSYNC_NONEXISTENT_VAR_12345")
            .resolve("webhook_token")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("webhook_token"));
        assert!(message.contains("not set"));

        assert!(
            SecretSource::parse("pass::crmsync/nonexistent/entry/12345")
                .resolve("access_token")
                .is_err()
        );
    }

    #[test]
    fn empty_webhook_token_is_rejected() {
        unsafe {
            std::env::set_var("_CRMSYNC_TEST_EMPTY_TOKEN", "");
        }
        let config = CrmsyncConfig::parse(
            "[google]\nwebhook_address = \"https://crm.example.com/hook\"\nwebhook_token = \"env::_CRMSYNC_TEST_EMPTY_TOKEN\"\n",
        )
        .unwrap();
        let err = config.engine_config().unwrap_err();
        assert!(err.to_string().contains("webhook_token resolved to an empty value"));
        unsafe {
            std::env::remove_var("_CRMSYNC_TEST_EMPTY_TOKEN");
        }
    }

    #[test]
    fn redacted_masks_literals_only() {
        let config = CrmsyncConfig::parse(
            "[google]\naccess_token = \"ya29.inline\"\nwebhook_token = \"pass::crm/webhook\"\n",
        )
        .unwrap();
        let google = config.redacted().google.unwrap();
        assert_eq!(google.access_token.as_deref(), Some(REDACTED));
        assert_eq!(google.webhook_token.as_deref(), Some("pass::crm/webhook"));
        assert_eq!(
            config.google.unwrap().access_token.as_deref(),
            Some("ya29.inline")
        );
    }

    #[test]
    fn plain_http_webhook_is_rejected() {
        let config = CrmsyncConfig::parse(
            "[google]\nwebhook_address = \"http://crm.example.com/hook\"\n",
        )
        .unwrap();
        let err = config.engine_config().unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn missing_webhook_is_rejected() {
        let config = CrmsyncConfig::parse("[google]\naccess_token = \"t\"\n").unwrap();
        assert!(config.engine_config().unwrap_err().to_string().contains("webhook_address"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(CrmsyncConfig::load(Some(&missing)).is_err());

        let path = dir.path().join("config.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = CrmsyncConfig::load(Some(&path)).unwrap();
        assert!(config.google.is_some());
    }
}
