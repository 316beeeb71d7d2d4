//! Per-source configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SourceError, SourceResult};

/// Default openFDA drug label endpoint.
pub const LABEL_BASE_URL: &str = "https://api.fda.gov/drug/label.json";

/// Default EMA medicine data downloads.
pub const AUTHORIZATION_MEDICINES_URL: &str =
    "https://www.ema.europa.eu/en/documents/report/medicines-output-medicines_json-report_en.json";
pub const AUTHORIZATION_SHORTAGES_URL: &str =
    "https://www.ema.europa.eu/en/documents/report/medicines-output-shortages_json-report_en.json";
pub const AUTHORIZATION_DHPC_URL: &str =
    "https://www.ema.europa.eu/en/documents/report/dhpc-output-json-report_en.json";

/// Configuration for one external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Endpoint (source A) or medicines dataset URL (source B)
    pub base_url: String,
    /// Optional extra dataset URLs (source B shortages and DHPCs)
    pub shortages_url: Option<String>,
    pub dhpc_url: Option<String>,
    /// Request ceilings. Availability checks take a slot like lookups do.
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    /// Bound on one lookup
    pub request_timeout_secs: u64,
    /// Bound on an availability check, which for source B downloads the record sets
    pub download_timeout_secs: u64,
    /// Lifetime of cached non-matches and availability results
    pub negative_ttl_secs: u64,
    /// Lifetime of cached matches and resolved records
    pub content_ttl_secs: u64,
    /// How long an availability check result is trusted
    pub health_recheck_secs: u64,
    /// Entries per lookup/record cache
    pub cache_capacity: usize,
    /// Results requested per label search
    pub result_limit: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::label_defaults()
    }
}

impl SourceConfig {
    /// Defaults for the label database.
    pub fn label_defaults() -> Self {
        Self {
            base_url: LABEL_BASE_URL.to_string(),
            shortages_url: None,
            dhpc_url: None,
            requests_per_minute: 240,
            requests_per_hour: 1000,
            request_timeout_secs: 8,
            download_timeout_secs: 8,
            negative_ttl_secs: 6 * 3600,
            content_ttl_secs: 7 * 24 * 3600,
            health_recheck_secs: 60,
            cache_capacity: 2000,
            result_limit: 1,
        }
    }

    /// Defaults for the authorization database.
    pub fn authorization_defaults() -> Self {
        Self {
            base_url: AUTHORIZATION_MEDICINES_URL.to_string(),
            shortages_url: Some(AUTHORIZATION_SHORTAGES_URL.to_string()),
            dhpc_url: Some(AUTHORIZATION_DHPC_URL.to_string()),
            requests_per_minute: 600,
            requests_per_hour: 20_000,
            download_timeout_secs: 120,
            ..Self::label_defaults()
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets both rate limits.
    #[must_use]
    pub fn with_rate_limits(mut self, per_minute: u32, per_hour: u32) -> Self {
        self.requests_per_minute = per_minute;
        self.requests_per_hour = per_hour;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub fn content_ttl(&self) -> Duration {
        Duration::from_secs(self.content_ttl_secs)
    }

    pub fn health_recheck(&self) -> Duration {
        Duration::from_secs(self.health_recheck_secs)
    }

    /// Parsed base URL.
    pub fn base_url(&self) -> SourceResult<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    /// Reject values that would make the source unusable.
    pub fn validate(&self) -> SourceResult<()> {
        let url = self.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::InvalidConfig(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        for extra in [&self.shortages_url, &self.dhpc_url].into_iter().flatten() {
            Url::parse(extra)?;
        }
        if self.requests_per_minute == 0 || self.requests_per_hour == 0 {
            return Err(SourceError::InvalidConfig(
                "rate limits must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(SourceError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.cache_capacity == 0 || self.result_limit == 0 {
            return Err(SourceError::InvalidConfig(
                "cache capacity and result limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SourceConfig::label_defaults().validate().is_ok());
        assert!(SourceConfig::authorization_defaults().validate().is_ok());
    }

    #[test]
    fn test_label_limits() {
        let config = SourceConfig::label_defaults();
        assert_eq!(config.requests_per_minute, 240);
        assert_eq!(config.requests_per_hour, 1000);
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.negative_ttl(), Duration::from_secs(21_600));
    }

    #[test]
    fn test_authorization_timeouts() {
        let config = SourceConfig::authorization_defaults();
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.download_timeout(), Duration::from_secs(120));
        assert_eq!(config.requests_per_minute, 600);

        let config = SourceConfig {
            download_timeout_secs: 0,
            ..SourceConfig::authorization_defaults()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = SourceConfig::label_defaults().with_base_url("not a url");
        assert!(matches!(config.validate(), Err(SourceError::InvalidConfig(_))));

        let config = SourceConfig::label_defaults().with_base_url("ftp://example.com/x");
        assert!(matches!(config.validate(), Err(SourceError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let config = SourceConfig::label_defaults().with_rate_limits(0, 10);
        assert!(config.validate().is_err());
    }
}
