//! App and model handles.
//!
//! An [`App`] binds the client to one app label; a [`Model`] additionally
//! binds one model's collection URL and field descriptors. Both are cheap to
//! clone and compare by name.

use crate::client::ClientInner;
use crate::error::Result;
use crate::registry::{AppEntry, ModelEntry};
use crate::types::ModelSchema;
use std::fmt;
use std::sync::Arc;

/// Handle for one app of the catalog.
#[derive(Clone)]
pub struct App {
    pub(crate) client: Arc<ClientInner>,
    pub(crate) entry: Arc<AppEntry>,
}

impl App {
    /// App label.
    pub fn label(&self) -> &str {
        &self.entry.label
    }

    /// App root URL as advertised by the catalog.
    pub fn url(&self) -> &str {
        &self.entry.url
    }

    /// Names of the models in this app, sorted.
    pub async fn model_names(&self) -> Result<Vec<String>> {
        let map = self
            .client
            .registry
            .model_map(&self.client.transport, &self.entry)
            .await?;
        Ok(map.keys().cloned().collect())
    }

    /// Resolve a model by name. Names are matched case-insensitively.
    pub async fn model(&self, name: &str) -> Result<Model> {
        let entry = self
            .client
            .registry
            .model(&self.client.transport, &self.entry, name)
            .await?;
        Ok(Model {
            client: Arc::clone(&self.client),
            entry,
        })
    }
}

impl PartialEq for App {
    fn eq(&self, other: &Self) -> bool {
        self.entry.label == other.entry.label
    }
}

impl Eq for App {}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("label", &self.entry.label)
            .field("url", &self.entry.url)
            .finish()
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "App: {}", self.entry.label)
    }
}

/// Handle for one model; the entry point for queries and record operations.
#[derive(Clone)]
pub struct Model {
    pub(crate) client: Arc<ClientInner>,
    pub(crate) entry: Arc<ModelEntry>,
}

impl Model {
    /// Label of the owning app.
    pub fn app_label(&self) -> &str {
        &self.entry.app_label
    }

    /// Lowercased model name.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// `app.model`
    pub fn qualified_name(&self) -> String {
        self.entry.qualified_name()
    }

    /// Absolute collection URL, ending in `/`.
    pub fn url(&self) -> &str {
        &self.entry.url
    }

    /// Field descriptors of this model.
    pub fn schema(&self) -> &ModelSchema {
        &self.entry.schema
    }

    /// Handle of the owning app.
    pub fn app(&self) -> Result<App> {
        let entry = self.client.registry.app(&self.entry.app_label)?;
        Ok(App {
            client: Arc::clone(&self.client),
            entry,
        })
    }

    /// Identity URI of the record with primary key `pk`.
    pub fn record_uri(&self, pk: impl fmt::Display) -> String {
        format!("{}{}", self.entry.url, pk)
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.entry.app_label == other.entry.app_label && self.entry.name == other.entry.name
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("app", &self.entry.app_label)
            .field("name", &self.entry.name)
            .field("url", &self.entry.url)
            .finish()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model: {}.{}", self.entry.app_label, self.entry.name)
    }
}
