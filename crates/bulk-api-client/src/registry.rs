//! Catalog discovery state owned by one client.
//!
//! The app map is read once when the client connects. Each app's model map
//! is fetched on the first model lookup in that app and kept until
//! [`SchemaRegistry::forget_models`]. The schema document is fetched at most
//! once, on the first model lookup of any app.

use crate::error::{CatalogEntry, ClientError, Result};
use crate::transport::Transport;
use crate::types::{ModelSchema, SchemaDocument};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

/// One discovered app.
#[derive(Debug)]
pub(crate) struct AppEntry {
    pub label: String,
    pub url: String,
}

/// One resolved model, shared by every handle for it.
#[derive(Debug)]
pub(crate) struct ModelEntry {
    pub app_label: String,
    pub name: String,
    /// Collection URL, absolute, with a trailing `/`
    pub url: String,
    pub schema: Arc<ModelSchema>,
}

impl ModelEntry {
    /// `app.model`, the key of the schema document.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.app_label, self.name)
    }
}

type ModelMap = Arc<BTreeMap<String, String>>;

pub(crate) struct SchemaRegistry {
    apps: BTreeMap<String, String>,
    app_entries: Mutex<HashMap<String, Arc<AppEntry>>>,
    model_maps: tokio::sync::Mutex<HashMap<String, ModelMap>>,
    model_entries: Mutex<HashMap<(String, String), Arc<ModelEntry>>>,
    definitions: OnceCell<BTreeMap<String, Arc<ModelSchema>>>,
    schema_path: String,
}

impl SchemaRegistry {
    /// Read the app map from the catalog root.
    pub async fn discover(transport: &Transport, schema_path: &str) -> Result<Self> {
        let root = transport.base().to_string();
        let apps: BTreeMap<String, String> = transport.get_json(&root).await?;
        tracing::debug!(apps = apps.len(), "Discovered catalog apps");
        Ok(Self::with_apps(apps, schema_path))
    }

    pub fn with_apps(apps: BTreeMap<String, String>, schema_path: &str) -> Self {
        Self {
            apps,
            app_entries: Mutex::new(HashMap::new()),
            model_maps: tokio::sync::Mutex::new(HashMap::new()),
            model_entries: Mutex::new(HashMap::new()),
            definitions: OnceCell::new(),
            schema_path: schema_path.to_string(),
        }
    }

    pub fn app_labels(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    /// Resolve an app label; repeated calls share one entry.
    pub fn app(&self, label: &str) -> Result<Arc<AppEntry>> {
        let url = self.apps.get(label).ok_or_else(|| ClientError::NotFound {
            kind: CatalogEntry::App,
            name: label.to_string(),
        })?;

        let mut entries = self
            .app_entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(label.to_string()).or_insert_with(|| {
            Arc::new(AppEntry {
                label: label.to_string(),
                url: url.clone(),
            })
        });
        Ok(Arc::clone(entry))
    }

    /// Model name -> collection URL for one app, fetched on first use.
    pub async fn model_map(&self, transport: &Transport, app: &AppEntry) -> Result<ModelMap> {
        // Held across the fetch so concurrent first lookups share one request.
        let mut maps = self.model_maps.lock().await;
        if let Some(map) = maps.get(&app.label) {
            return Ok(Arc::clone(map));
        }

        let map: BTreeMap<String, String> = transport.get_json(&app.url).await?;
        tracing::debug!(app = %app.label, models = map.len(), "Loaded model map");
        let map = Arc::new(map);
        maps.insert(app.label.clone(), Arc::clone(&map));
        Ok(map)
    }

    /// Resolve a model by case-insensitive name.
    pub async fn model(
        &self,
        transport: &Transport,
        app: &AppEntry,
        name: &str,
    ) -> Result<Arc<ModelEntry>> {
        let name = name.to_lowercase();
        let key = (app.label.clone(), name.clone());

        let cached = {
            let entries = self
                .model_entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entries.get(&key).cloned()
        };
        if let Some(entry) = cached {
            return Ok(entry);
        }

        let map = self.model_map(transport, app).await?;
        let path = map.get(&name).ok_or_else(|| ClientError::NotFound {
            kind: CatalogEntry::Model,
            name: name.clone(),
        })?;

        let mut url = transport.resolve(path)?.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }

        let qualified = format!("{}.{}", app.label, name);
        let schema = self.schema(transport, &qualified).await?;

        let entry = Arc::new(ModelEntry {
            app_label: app.label.clone(),
            name,
            url,
            schema,
        });
        let mut entries = self
            .model_entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(entries.entry(key).or_insert(entry)))
    }

    /// Field descriptors of `app.model`.
    ///
    /// A model the schema document does not describe gets an empty schema,
    /// so none of its fields are accessible through a record.
    pub async fn schema(&self, transport: &Transport, qualified: &str) -> Result<Arc<ModelSchema>> {
        let definitions = self
            .definitions
            .get_or_try_init(|| async {
                let doc: SchemaDocument = transport.get_json(&self.schema_path).await?;
                tracing::debug!(models = doc.definitions.len(), "Loaded schema document");
                Ok::<_, ClientError>(
                    doc.definitions
                        .into_iter()
                        .map(|(k, v)| (k, Arc::new(v)))
                        .collect(),
                )
            })
            .await?;

        match definitions.get(qualified) {
            Some(schema) => Ok(Arc::clone(schema)),
            None => {
                tracing::warn!(model = %qualified, "Model missing from schema document");
                Ok(Arc::new(ModelSchema::default()))
            }
        }
    }

    /// Drop every cached model map so the next lookup refetches it.
    pub async fn forget_models(&self) {
        self.model_maps.lock().await.clear();
        self.model_entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::with_apps(
            BTreeMap::from([
                ("bulk_importer".to_string(), "/bulk/api/bulk_importer/".to_string()),
                ("uav".to_string(), "/bulk/api/uav/".to_string()),
            ]),
            "swagger.json",
        )
    }

    #[test]
    fn test_app_labels_sorted() {
        assert_eq!(registry().app_labels(), vec!["bulk_importer", "uav"]);
    }

    #[test]
    fn test_app_entry_is_shared() {
        let reg = registry();
        let a = reg.app("uav").unwrap();
        let b = reg.app("uav").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.url, "/bulk/api/uav/");
    }

    #[test]
    fn test_unknown_app() {
        let err = registry().app("nope").unwrap_err();
        assert_eq!(err.to_string(), "App nope does not exist in bulk api");
    }
}
