//! Client configuration and builder pattern.

use crate::error::{ClientError, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default catalog root.
pub const DEFAULT_BASE_URL: &str = "https://data-warehouse.pivot/bulk/api/";

/// Default lifetime of a cached query page (2 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7200);

/// Configuration for the Bulk API client.
///
/// # Security
///
/// The `Debug` implementation masks the token to prevent accidental exposure
/// in logs. The token is shown as `"***REDACTED***"` in debug output.
#[derive(Clone)]
pub struct ClientConfig {
    /// Catalog root URL; always ends with `/`
    pub base_url: String,
    /// User token with access to the catalog
    pub token: String,
    /// Lifetime of a cached query page (default: 2 hours, 0 to disable)
    pub cache_ttl: Duration,
    /// Directory holding cached query pages
    pub cache_dir: PathBuf,
    /// Maximum number of pages kept in memory in front of the disk cache
    pub memory_cache_capacity: usize,
    /// Location of the schema document, relative to `base_url`
    pub schema_path: String,
    /// Optional PEM bundle used to verify the server certificate
    pub ca_bundle: Option<PathBuf>,
    /// Whether to verify TLS certificates (default: true)
    pub tls_verify: bool,
    /// Request timeout; none unless set explicitly
    pub timeout: Option<Duration>,
    /// User-Agent header value
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: String::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_dir: std::env::temp_dir().join("bulk-api-cache"),
            memory_cache_capacity: 64,
            schema_path: "swagger.json".to_string(),
            ca_bundle: None,
            tls_verify: true,
            timeout: None,
            user_agent: format!("bulk-api-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"***REDACTED***")
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_dir", &self.cache_dir)
            .field("memory_cache_capacity", &self.memory_cache_capacity)
            .field("schema_path", &self.schema_path)
            .field("ca_bundle", &self.ca_bundle)
            .field("tls_verify", &self.tls_verify)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder(token: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(token)
    }

    /// Build a configuration from the process environment.
    ///
    /// Reads:
    /// - `BULK_API_TOKEN`: user token (required)
    /// - `BULK_API_URL`: catalog root (default: [`DEFAULT_BASE_URL`])
    /// - `BULK_API_EXPIRATION_TIME`: cache lifetime in seconds (default: 7200)
    /// - `BULK_API_CACHE_DIR`: cache directory
    /// - `BULK_API_CA_BUNDLE`: PEM bundle for TLS verification
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("BULK_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ClientError::Config("Environment variable BULK_API_TOKEN was not found.".into())
            })?;

        let mut builder = ClientConfigBuilder::new(token);

        if let Ok(url) = std::env::var("BULK_API_URL") {
            builder = builder.base_url(url);
        }

        if let Ok(secs) = std::env::var("BULK_API_EXPIRATION_TIME") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ClientError::Config(format!(
                    "BULK_API_EXPIRATION_TIME must be a number of seconds, got '{}'",
                    secs
                ))
            })?;
            builder = builder.cache_ttl(Duration::from_secs(secs));
        }

        if let Ok(dir) = std::env::var("BULK_API_CACHE_DIR") {
            builder = builder.cache_dir(dir);
        }

        if let Ok(bundle) = std::env::var("BULK_API_CA_BUNDLE") {
            builder = builder.ca_bundle(bundle);
        }

        builder.build()
    }

    /// Parsed catalog root.
    pub fn base(&self) -> Result<url::Url> {
        url::Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", self.base_url, e)))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(ClientError::Config("base_url cannot be empty".to_string()));
        }

        url::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("Invalid base_url: {}", e)))?;

        if self.token.is_empty() {
            return Err(ClientError::Config("token cannot be empty".to_string()));
        }

        if self.memory_cache_capacity == 0 && !self.cache_ttl.is_zero() {
            return Err(ClientError::Config(
                "memory_cache_capacity must be > 0 when caching is enabled".to_string(),
            ));
        }

        if self.schema_path.is_empty() {
            return Err(ClientError::Config("schema_path cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Builder for client configuration.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with the given token and default settings.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                token: token.into(),
                ..Default::default()
            },
        }
    }

    /// Set the catalog root URL. A trailing `/` is added when missing.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.is_empty() && !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.config.base_url = base_url;
        self
    }

    /// Set the cache lifetime. Set to Duration::ZERO to disable caching.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Set the directory holding cached query pages.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Set how many pages the in-memory cache level keeps.
    pub fn memory_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.memory_cache_capacity = capacity;
        self
    }

    /// Disable caching entirely.
    pub fn no_cache(mut self) -> Self {
        self.config.cache_ttl = Duration::ZERO;
        self
    }

    /// Set the schema document location, relative to the catalog root.
    pub fn schema_path(mut self, path: impl Into<String>) -> Self {
        self.config.schema_path = path.into();
        self
    }

    /// Verify the server against the certificates in this PEM bundle.
    pub fn ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_bundle = Some(path.into());
        self
    }

    /// Set whether to verify TLS certificates.
    pub fn tls_verify(mut self, verify: bool) -> Self {
        self.config.tls_verify = verify;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set a custom User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration, validating all settings.
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
