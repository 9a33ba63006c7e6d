//! Record operations on a model: list, create, get, update, delete.

use crate::error::{ClientError, Result};
use crate::navigator::Model;
use crate::query::{check_page, normalize_filter, FilterArg};
use crate::record::Record;
use crate::transport::{decode_json, RequestOptions};
use crate::types::ListResponse;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A file sent as part of a multipart create or update.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub content: Bytes,
    pub mime: Option<String>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            mime: None,
        }
    }

    /// Read a local file; the upload is named after it.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, content))
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// A value written to a record field.
#[derive(Debug, Clone)]
pub enum FieldInput {
    /// Plain JSON value.
    Value(Value),
    /// Another record; sent as its identity URI.
    Record(Record),
    /// File content; forces a multipart request.
    File(FileUpload),
}

impl From<Value> for FieldInput {
    fn from(v: Value) -> Self {
        FieldInput::Value(v)
    }
}

impl From<Record> for FieldInput {
    fn from(r: Record) -> Self {
        FieldInput::Record(r)
    }
}

impl From<&Record> for FieldInput {
    fn from(r: &Record) -> Self {
        FieldInput::Record(r.clone())
    }
}

impl From<FileUpload> for FieldInput {
    fn from(f: FileUpload) -> Self {
        FieldInput::File(f)
    }
}

impl From<&str> for FieldInput {
    fn from(s: &str) -> Self {
        FieldInput::Value(Value::from(s))
    }
}

impl From<String> for FieldInput {
    fn from(s: String) -> Self {
        FieldInput::Value(Value::from(s))
    }
}

impl From<i64> for FieldInput {
    fn from(n: i64) -> Self {
        FieldInput::Value(Value::from(n))
    }
}

impl From<f64> for FieldInput {
    fn from(n: f64) -> Self {
        FieldInput::Value(Value::from(n))
    }
}

impl From<bool> for FieldInput {
    fn from(b: bool) -> Self {
        FieldInput::Value(Value::from(b))
    }
}

/// Field name -> value, as sent on create and update.
pub type FieldValues = BTreeMap<String, FieldInput>;

/// Collect `(name, value)` pairs into [`FieldValues`].
pub fn field_values<K, V, I>(pairs: I) -> FieldValues
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FieldInput>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Arguments of [`Model::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub page: Option<i64>,
    pub filter: Option<FilterArg>,
    pub order: Option<String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn filter(mut self, filter: impl Into<FilterArg>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }
}

/// Build a JSON body, or a multipart form when any value is a file.
pub(crate) fn encode_body(values: &FieldValues) -> Result<RequestOptions> {
    let has_files = values.values().any(|v| matches!(v, FieldInput::File(_)));

    if !has_files {
        let mut body = Map::new();
        for (name, input) in values {
            let value = match input {
                FieldInput::Value(v) => v.clone(),
                FieldInput::Record(r) => Value::from(related_uri(name, r)?),
                FieldInput::File(_) => {
                    return Err(ClientError::validation("file uploads require multipart"))
                }
            };
            body.insert(name.clone(), value);
        }
        return Ok(RequestOptions::json(serde_json::to_vec(&body)?));
    }

    let mut form = Form::new();
    for (name, input) in values {
        form = match input {
            FieldInput::Value(Value::Null) => form,
            FieldInput::Value(Value::String(s)) => form.text(name.clone(), s.clone()),
            FieldInput::Value(other) => form.text(name.clone(), other.to_string()),
            FieldInput::Record(r) => form.text(name.clone(), related_uri(name, r)?),
            FieldInput::File(upload) => {
                let mut part =
                    Part::bytes(upload.content.to_vec()).file_name(upload.file_name.clone());
                if let Some(ref mime) = upload.mime {
                    part = part.mime_str(mime)?;
                }
                form.part(name.clone(), part)
            }
        };
    }
    Ok(RequestOptions::multipart(form))
}

fn related_uri(field: &str, record: &Record) -> Result<String> {
    record.uri().map(str::to_string).ok_or_else(|| {
        ClientError::validation(format!(
            "related record for {} has not been created yet",
            field
        ))
    })
}

/// Primary key of a record payload as it appears in URIs.
pub(crate) fn primary_key(data: &Map<String, Value>) -> Option<String> {
    match data.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Row errors reported in `results.errors` of a create response.
fn row_errors(data: &Map<String, Value>) -> Vec<String> {
    data.get("results")
        .and_then(|r| r.get("errors"))
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| match e {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl Model {
    /// A record known only by its identity URI; fields load on first access.
    pub fn record(&self, uri: impl Into<String>) -> Record {
        Record::lazy(self.clone(), uri.into())
    }

    /// A local record with no identity yet; [`Record::save`] creates it.
    pub fn new_record(&self) -> Record {
        Record::unsaved(self.clone())
    }

    /// One page of records from the collection endpoint. Never cached.
    pub async fn list(&self, params: ListParams) -> Result<Vec<Record>> {
        let page = check_page(params.page)?;
        let filter = params.filter.as_ref().map(normalize_filter).transpose()?;

        let query = [
            ("page", Some(page.to_string())),
            ("filter", filter),
            ("order", params.order.clone()),
        ];
        let response = self
            .client
            .transport
            .call(Method::GET, self.url(), &query, RequestOptions::default())
            .await?;
        let list: ListResponse = decode_json(response).await?;

        tracing::debug!(model = %self.qualified_name(), page, rows = list.results.len(), "Listed records");
        list.results
            .into_iter()
            .map(|data| self.wrap(data))
            .collect()
    }

    /// POST a new record.
    ///
    /// Fails with [`ClientError::Rejected`] if the server reports row errors.
    pub async fn create(&self, values: FieldValues) -> Result<Record> {
        let data = self.post(&values).await?;
        self.wrap(data)
    }

    pub(crate) async fn post(&self, values: &FieldValues) -> Result<Map<String, Value>> {
        let options = encode_body(values)?;
        let response = self
            .client
            .transport
            .call(Method::POST, self.url(), &[], options)
            .await?;
        let data: Map<String, Value> = decode_json(response).await?;

        let errors = row_errors(&data);
        if !errors.is_empty() {
            return Err(ClientError::Rejected(errors));
        }

        tracing::debug!(model = %self.qualified_name(), id = ?data.get("id"), "Created record");
        Ok(data)
    }

    /// Fetch one record by primary key. Never cached.
    pub async fn get(&self, pk: impl fmt::Display) -> Result<Record> {
        let uri = self.record_uri(pk);
        let data = self.fetch(&uri).await?;
        Ok(Record::loaded(self.clone(), Some(uri), data))
    }

    /// PATCH (`partial`) or PUT a record and return the server's copy.
    ///
    /// Anything other than `200 OK` is [`ClientError::Unsuccessful`].
    pub async fn update(
        &self,
        uri: &str,
        values: &FieldValues,
        partial: bool,
    ) -> Result<Map<String, Value>> {
        let method = if partial { Method::PATCH } else { Method::PUT };
        let options = encode_body(values)?;
        let response = self
            .client
            .transport
            .call(method, uri, &[], options)
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Unsuccessful {
                operation: "update",
                status: status.as_u16(),
                body,
            });
        }
        decode_json(response).await
    }

    /// DELETE a record. Anything other than `204 No Content` is
    /// [`ClientError::Unsuccessful`].
    pub async fn delete(&self, uri: &str) -> Result<()> {
        let response = self
            .client
            .transport
            .call(Method::DELETE, uri, &[], RequestOptions::default())
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Unsuccessful {
                operation: "delete",
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(uri = %uri, "Deleted record");
        Ok(())
    }

    /// GET the current field map of a record.
    pub(crate) async fn fetch(&self, uri: &str) -> Result<Map<String, Value>> {
        let response = self
            .client
            .transport
            .call(Method::GET, uri, &[], RequestOptions::default())
            .await?;
        decode_json(response).await
    }

    /// Wrap a server payload; the identity URI comes from its `id`.
    pub(crate) fn wrap(&self, data: Map<String, Value>) -> Result<Record> {
        let pk = primary_key(&data).ok_or_else(|| {
            ClientError::InvalidResponse(format!(
                "{} record without an id",
                self.qualified_name()
            ))
        })?;
        Ok(Record::loaded(self.clone(), Some(self.record_uri(pk)), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_primary_key_forms() {
        assert_eq!(primary_key(&as_map(json!({"id": 7}))), Some("7".to_string()));
        assert_eq!(primary_key(&as_map(json!({"id": "abc"}))), Some("abc".to_string()));
        assert_eq!(primary_key(&as_map(json!({"id": null}))), None);
        assert_eq!(primary_key(&as_map(json!({"text": "x"}))), None);
    }

    #[test]
    fn test_row_errors() {
        let data = as_map(json!({
            "id": 1016,
            "results": {"errors": ["Invalid datetime.", "Please enter a number."]}
        }));
        assert_eq!(
            row_errors(&data),
            vec!["Invalid datetime.", "Please enter a number."]
        );
        assert!(row_errors(&as_map(json!({"id": 1}))).is_empty());
    }

    #[test]
    fn test_json_body_without_files() {
        let values = field_values([("text", json!("hello")), ("integer", json!(5))]);
        let options = encode_body(&values).unwrap();
        assert_eq!(options.headers["content-type"], "application/json");
        match options.body {
            Some(crate::transport::RequestBody::Json(bytes)) => {
                let back: Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(back, json!({"integer": 5, "text": "hello"}));
            }
            _ => panic!("expected a JSON body"),
        }
    }

    #[test]
    fn test_file_switches_to_multipart() {
        let mut values = field_values([("text", "model_text")]);
        values.insert(
            "data_file".to_string(),
            FileUpload::new("text.txt", &b"abc123"[..]).into(),
        );
        let options = encode_body(&values).unwrap();
        assert!(options.headers.get("content-type").is_none());
        assert!(matches!(
            options.body,
            Some(crate::transport::RequestBody::Multipart(_))
        ));
    }
}
