//! Schema-driven records.
//!
//! A [`Record`] holds its model handle, an optional identity URI and a local
//! field map. Every access goes through [`Record::get`] / [`Record::set`],
//! which look the field up in the owning model's descriptors, so a record
//! only ever exposes the fields its own model declares.
//!
//! Field data is loaded at most once: a record created from a URI alone
//! fetches its fields the first time one of them is missing locally. Related
//! records are resolved on first access and cached on the record; the
//! relation URI stored in the field map stays the source of truth.

use crate::error::{ClientError, Result};
use crate::mapper::{FieldInput, FieldValues, FileUpload};
use crate::navigator::Model;
use crate::transport::RequestOptions;
use crate::types::{FieldDescriptor, FieldKind};
use bytes::Bytes;
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Value read from a record field.
#[derive(Debug)]
pub enum FieldValue {
    /// Absent or null.
    Null,
    /// Scalar value.
    Value(Value),
    /// Related record, resolved lazily.
    Record(Record),
    /// Streamed content of a file field.
    File(FileContent),
    /// File assigned locally and not yet saved.
    Upload(FileUpload),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FieldValue::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            FieldValue::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_file(self) -> Option<FileContent> {
        match self {
            FieldValue::File(f) => Some(f),
            _ => None,
        }
    }
}

/// Readable handle over a downloaded file.
pub struct FileContent {
    url: String,
    response: reqwest::Response,
}

impl FileContent {
    pub(crate) fn new(url: String, response: reqwest::Response) -> Self {
        Self { url, response }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Size announced by the server, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Next chunk of the body; `None` at the end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }

    /// Read the remaining body into memory.
    pub async fn bytes(self) -> Result<Bytes> {
        Ok(self.response.bytes().await?)
    }

    /// Stream the remaining body into `writer`; returns the byte count.
    pub async fn copy_to<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<u64> {
        let mut written = 0u64;
        while let Some(chunk) = self.response.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent")
            .field("url", &self.url)
            .field("status", &self.response.status())
            .finish()
    }
}

#[derive(Default)]
struct RecordState {
    data: Map<String, Value>,
    /// Whether the server copy has been merged into `data`.
    loaded: bool,
    related: HashMap<String, Record>,
    uploads: BTreeMap<String, FileUpload>,
}

struct RecordInner {
    model: Model,
    uri: OnceLock<String>,
    state: Mutex<RecordState>,
}

/// One remote entity of a model.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

impl Record {
    fn build(model: Model, uri: Option<String>, state: RecordState) -> Self {
        let cell = OnceLock::new();
        if let Some(uri) = uri {
            let _ = cell.set(uri);
        }
        Self {
            inner: Arc::new(RecordInner {
                model,
                uri: cell,
                state: Mutex::new(state),
            }),
        }
    }

    pub(crate) fn lazy(model: Model, uri: String) -> Self {
        Self::build(model, Some(uri), RecordState::default())
    }

    pub(crate) fn unsaved(model: Model) -> Self {
        Self::build(
            model,
            None,
            RecordState {
                loaded: true,
                ..RecordState::default()
            },
        )
    }

    pub(crate) fn loaded(model: Model, uri: Option<String>, data: Map<String, Value>) -> Self {
        Self::build(
            model,
            uri,
            RecordState {
                data,
                loaded: true,
                ..RecordState::default()
            },
        )
    }

    /// Identity URI; `None` until the record has been created.
    pub fn uri(&self) -> Option<&str> {
        self.inner.uri.get().map(String::as_str)
    }

    /// Owning model.
    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    fn descriptor(&self, field: &str) -> Result<&FieldDescriptor> {
        self.inner
            .model
            .schema()
            .field(field)
            .ok_or_else(|| ClientError::UnknownField {
                model: self.inner.model.qualified_name(),
                field: field.to_string(),
            })
    }

    fn require_uri(&self) -> Result<&str> {
        self.uri().ok_or_else(|| {
            ClientError::validation(format!(
                "{} record has not been created yet",
                self.inner.model.qualified_name()
            ))
        })
    }

    async fn ensure_loaded(&self, state: &mut RecordState) -> Result<()> {
        if state.loaded {
            return Ok(());
        }
        let Some(uri) = self.uri() else {
            state.loaded = true;
            return Ok(());
        };

        let fetched = self.inner.model.fetch(uri).await?;
        tracing::debug!(uri = %uri, fields = fetched.len(), "Loaded record");
        // Local assignments win over the server copy.
        for (k, v) in fetched {
            state.data.entry(k).or_insert(v);
        }
        state.loaded = true;
        Ok(())
    }

    /// Read one field.
    ///
    /// Scalars come back as stored. Relation fields resolve into a [`Record`]
    /// (cached on this record); file fields are fetched and returned as a
    /// [`FileContent`] stream.
    pub async fn get(&self, field: &str) -> Result<FieldValue> {
        let descriptor = self.descriptor(field)?;
        let mut state = self.inner.state.lock().await;
        if !state.data.contains_key(field) && !state.uploads.contains_key(field) {
            self.ensure_loaded(&mut state).await?;
        }

        match descriptor.kind() {
            FieldKind::Relation => {
                if let Some(related) = state.related.get(field) {
                    return Ok(FieldValue::Record(related.clone()));
                }
                let uri = match state.data.get(field) {
                    None | Some(Value::Null) => return Ok(FieldValue::Null),
                    Some(Value::String(uri)) => uri.clone(),
                    Some(other) => {
                        return Err(ClientError::InvalidResponse(format!(
                            "{} is not a relation uri: {}",
                            field, other
                        )))
                    }
                };
                let related = self.resolve_relation(&uri).await?;
                state.related.insert(field.to_string(), related.clone());
                Ok(FieldValue::Record(related))
            }
            FieldKind::File => {
                if let Some(upload) = state.uploads.get(field) {
                    return Ok(FieldValue::Upload(upload.clone()));
                }
                let url = match state.data.get(field) {
                    None | Some(Value::Null) => return Ok(FieldValue::Null),
                    Some(Value::String(url)) => url.clone(),
                    Some(other) => return Ok(FieldValue::Value(other.clone())),
                };
                drop(state);
                let response = self
                    .inner
                    .model
                    .client
                    .transport
                    .call(Method::GET, &url, &[], RequestOptions::default())
                    .await?;
                Ok(FieldValue::File(FileContent::new(url, response)))
            }
            FieldKind::Scalar => Ok(match state.data.get(field) {
                None | Some(Value::Null) => FieldValue::Null,
                Some(v) => FieldValue::Value(v.clone()),
            }),
        }
    }

    /// Assign one field locally. Nothing is sent until [`Record::save`].
    ///
    /// Read-only fields and non-record values for relation fields are
    /// rejected without touching the local data.
    pub async fn set(&self, field: &str, value: impl Into<FieldInput>) -> Result<()> {
        let descriptor = self.descriptor(field)?;
        let model = || self.inner.model.qualified_name();
        if descriptor.read_only {
            return Err(ClientError::ReadOnly {
                model: model(),
                field: field.to_string(),
            });
        }

        let value = value.into();
        let mut state = self.inner.state.lock().await;
        match (descriptor.kind(), value) {
            (FieldKind::Relation, FieldInput::Record(related)) => {
                let uri = related.require_uri()?.to_string();
                state.data.insert(field.to_string(), Value::String(uri));
                state.related.insert(field.to_string(), related);
            }
            (FieldKind::Relation, _) => {
                return Err(ClientError::RelationType {
                    model: model(),
                    field: field.to_string(),
                });
            }
            (_, FieldInput::Record(other)) => {
                let uri = other.require_uri()?.to_string();
                state.uploads.remove(field);
                state.data.insert(field.to_string(), Value::String(uri));
            }
            (_, FieldInput::File(upload)) => {
                state.uploads.insert(field.to_string(), upload);
            }
            (_, FieldInput::Value(v)) => {
                state.uploads.remove(field);
                state.data.insert(field.to_string(), v);
            }
        }
        Ok(())
    }

    /// Local field map, loaded from the server first if needed.
    pub async fn data(&self) -> Result<Map<String, Value>> {
        let mut state = self.inner.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(state.data.clone())
    }

    /// Write the whole local field map back.
    ///
    /// A record with an identity URI is replaced with PUT; a new record is
    /// created with POST and takes the identity of the server's copy.
    pub async fn save(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let mut values: FieldValues = state
            .data
            .iter()
            .map(|(k, v)| (k.clone(), FieldInput::Value(v.clone())))
            .collect();
        for (k, upload) in &state.uploads {
            values.insert(k.clone(), FieldInput::File(upload.clone()));
        }

        let model = &self.inner.model;
        let data = match self.uri() {
            Some(uri) => model.update(uri, &values, false).await?,
            None => {
                let data = model.post(&values).await?;
                let pk = crate::mapper::primary_key(&data).ok_or_else(|| {
                    ClientError::InvalidResponse(format!(
                        "{} record without an id",
                        model.qualified_name()
                    ))
                })?;
                let _ = self.inner.uri.set(model.record_uri(pk));
                data
            }
        };

        replace_data(&mut state, data);
        state.uploads.clear();
        Ok(())
    }

    /// PATCH the given fields; the local map becomes the server's copy.
    pub async fn update(&self, values: FieldValues) -> Result<()> {
        let uri = self.require_uri()?;
        let data = self.inner.model.update(uri, &values, true).await?;

        let mut state = self.inner.state.lock().await;
        for k in values.keys() {
            state.uploads.remove(k);
        }
        replace_data(&mut state, data);
        Ok(())
    }

    /// DELETE the record on the server.
    pub async fn delete(&self) -> Result<()> {
        let uri = self.require_uri()?;
        self.inner.model.delete(uri).await
    }

    /// Re-fetch the field map, discarding local changes and cached relations.
    pub async fn refresh(&self) -> Result<()> {
        let uri = self.require_uri()?;
        let data = self.inner.model.fetch(uri).await?;

        let mut state = self.inner.state.lock().await;
        state.data = data;
        state.loaded = true;
        state.related.clear();
        state.uploads.clear();
        Ok(())
    }

    /// Build the record a relation URI points at.
    ///
    /// The last three path segments name the app, the model and the key.
    async fn resolve_relation(&self, uri: &str) -> Result<Record> {
        let client = &self.inner.model.client;
        let url = client.transport.resolve(uri)?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let [app_label, model_name, _pk] = match segments.as_slice() {
            [.., a, m, k] => [*a, *m, *k],
            _ => {
                return Err(ClientError::InvalidResponse(format!(
                    "malformed relation uri: {}",
                    uri
                )))
            }
        };

        let app = client.registry.app(app_label)?;
        let entry = client
            .registry
            .model(&client.transport, &app, model_name)
            .await?;
        let model = Model {
            client: Arc::clone(client),
            entry,
        };
        Ok(Record::lazy(model, uri.to_string()))
    }
}

fn replace_data(state: &mut RecordState, data: Map<String, Value>) {
    // Keep resolved relations that still point at the same record.
    state.related.retain(|field, related| {
        matches!(
            (data.get(field), related.uri()),
            (Some(Value::String(new)), Some(old)) if new == old
        )
    });
    state.data = data;
    state.loaded = true;
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        match (self.uri(), other.uri()) {
            (Some(a), Some(b)) => a == b,
            _ => Arc::ptr_eq(&self.inner, &other.inner),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.inner.model.qualified_name())
            .field("uri", &self.uri())
            .finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uri() {
            Some(uri) => write!(f, "Record: {}", uri),
            None => write!(f, "Record: <unsaved {}>", self.inner.model.qualified_name()),
        }
    }
}
