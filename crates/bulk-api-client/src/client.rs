//! Catalog client: discovery, navigation, cache management and downloads.

use crate::cache::{CacheStats, ResponseCache};
use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::error::{ClientError, Result};
use crate::navigator::{App, Model};
use crate::record::FileContent;
use crate::registry::SchemaRegistry;
use crate::transport::{RequestOptions, Transport};
use reqwest::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// State shared by the client and every handle derived from it.
pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Transport,
    pub(crate) cache: ResponseCache,
    pub(crate) registry: SchemaRegistry,
}

/// Bulk API client.
///
/// Each client owns its catalog maps and response cache handle; two clients
/// never share discovery state. Cloning is cheap and shares everything.
#[derive(Clone)]
pub struct BulkClient {
    inner: Arc<ClientInner>,
}

impl BulkClient {
    /// Start a configuration for the given token.
    pub fn builder(token: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(token)
    }

    /// Connect and read the app map from the catalog root.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let transport = Transport::new(&config)?;
        let cache = ResponseCache::new(
            config.cache_dir.clone(),
            config.memory_cache_capacity,
            config.cache_ttl,
        );
        let registry = SchemaRegistry::discover(&transport, &config.schema_path).await?;

        tracing::debug!(
            base_url = %config.base_url,
            cache_dir = %config.cache_dir.display(),
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "Connected to bulk api"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                cache,
                registry,
            }),
        })
    }

    /// Connect with [`ClientConfig::from_env`].
    pub async fn from_env() -> Result<Self> {
        Self::connect(ClientConfig::from_env()?).await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Catalog root URL.
    pub fn base_url(&self) -> &str {
        self.inner.transport.base().as_str()
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Labels of every app in the catalog, sorted.
    pub fn app_labels(&self) -> Vec<String> {
        self.inner.registry.app_labels()
    }

    /// Handle for one app.
    pub fn app(&self, label: &str) -> Result<App> {
        let entry = self.inner.registry.app(label)?;
        Ok(App {
            client: Arc::clone(&self.inner),
            entry,
        })
    }

    /// Shorthand for `app(label)?.model(name)`.
    pub async fn model(&self, app_label: &str, model_name: &str) -> Result<Model> {
        self.app(app_label)?.model(model_name).await
    }

    // =========================================================================
    // Cache Management
    // =========================================================================

    /// Drop every cached query page and every cached model map.
    pub async fn clear_cache(&self) -> Result<()> {
        self.inner.cache.clear().await?;
        self.inner.registry.forget_models().await;
        Ok(())
    }

    /// Get cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    // =========================================================================
    // Downloads
    // =========================================================================

    /// Open a file from the download area as a stream.
    ///
    /// `name` is either a path below `<base_url>download/` or an absolute
    /// download URL.
    pub async fn open_download(&self, name: &str) -> Result<FileContent> {
        let url = self.download_url(name)?;
        let response = self
            .inner
            .transport
            .call(Method::GET, &url, &[], RequestOptions::default())
            .await?;
        Ok(FileContent::new(url, response))
    }

    /// Stream a file from the download area into `dir`.
    ///
    /// The local file is named `local_name`, or after the last segment of
    /// `name`. Returns the path written.
    pub async fn download_file(
        &self,
        name: &str,
        dir: impl AsRef<Path>,
        local_name: Option<&str>,
    ) -> Result<PathBuf> {
        let dir = dir.as_ref();
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            return Err(ClientError::validation(format!(
                "Local path {} does not exist.",
                dir.display()
            )));
        }

        let file_name = match local_name {
            Some(n) => n.to_string(),
            None => name
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ClientError::validation(format!("cannot derive a file name from {}", name))
                })?
                .to_string(),
        };
        let target = dir.join(file_name);

        let mut content = self.open_download(name).await?;
        let mut file = tokio::fs::File::create(&target).await?;
        let written = content.copy_to(&mut file).await?;

        tracing::debug!(url = %content.url(), path = %target.display(), bytes = written, "Downloaded file");
        Ok(target)
    }

    fn download_url(&self, name: &str) -> Result<String> {
        if url::Url::parse(name).is_ok() {
            return Ok(name.to_string());
        }
        let path = name
            .trim_start_matches('/')
            .split('/')
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(self
            .inner
            .transport
            .resolve(&format!("download/{}", path))?
            .to_string())
    }
}

impl std::fmt::Debug for BulkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkClient")
            .field("config", &self.inner.config)
            .finish()
    }
}
