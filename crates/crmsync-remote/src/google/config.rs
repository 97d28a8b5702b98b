//! Google Calendar client configuration.

use std::time::Duration;

use url::Url;

/// Configuration for [`GoogleCalendarClient`](super::GoogleCalendarClient).
///
/// The access token is minted elsewhere (service account or OAuth); this
/// crate only presents it.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Bearer token for the Calendar API.
    pub access_token: String,

    /// API root, overridable for tests and proxies.
    pub api_base: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// `maxResults` for list calls. `None` uses the API default (250).
    pub page_size: Option<u32>,

    /// User agent string for API requests.
    pub user_agent: String,
}

impl GoogleConfig {
    /// Base URL for Google Calendar API v3.
    pub const DEFAULT_API_BASE: &'static str = "https://www.googleapis.com/calendar/v3";

    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Largest page the events endpoint accepts.
    pub const MAX_PAGE_SIZE: u32 = 2500;

    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            page_size: None,
            user_agent: format!("crmsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Checks the settings before any request is made.
    pub fn validate(&self) -> Result<(), String> {
        if self.access_token.trim().is_empty() {
            return Err("access_token is required".to_string());
        }
        let base = Url::parse(&self.api_base)
            .map_err(|e| format!("invalid api_base {:?}: {}", self.api_base, e))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(format!("api_base must be http(s), got {}", base.scheme()));
        }
        if let Some(size) = self.page_size
            && (size == 0 || size > Self::MAX_PAGE_SIZE)
        {
            return Err(format!(
                "page_size must be between 1 and {}",
                Self::MAX_PAGE_SIZE
            ));
        }
        if self.timeout.is_zero() {
            return Err("timeout must be non-zero".to_string());
        }
        Ok(())
    }

    /// Joins a path onto the API root without doubling slashes.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
