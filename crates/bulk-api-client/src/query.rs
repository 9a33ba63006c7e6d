//! Paged tabular queries with a response cache.
//!
//! [`Model::query`] walks `<model_url>query` one page at a time, starting at
//! page 1, until the `page_count` response header says nothing is left, and
//! concatenates the pages into one [`Table`]. Every page goes through
//! [`Model::query_page`], which consults the [`ResponseCache`] first.
//!
//! `fields` and `filter` travel as YAML documents. Arguments given as
//! strings are parsed and re-serialized, so a filter passed as YAML and the
//! same filter passed as a map produce the same wire form (and the same
//! cache entry).
//!
//! [`ResponseCache`]: crate::cache::ResponseCache

use crate::cache::CachedPage;
use crate::error::{ClientError, Result};
use crate::filter::Q;
use crate::navigator::Model;
use crate::table::Table;
use crate::transport::RequestOptions;
use bytes::Bytes;
use reqwest::Method;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Name of the response header carrying the total page count.
pub const PAGE_COUNT_HEADER: &str = "page_count";

const FIELDS_ERROR: &str = "fields must be a list or yaml string containing a list";
const FILTER_ERROR: &str = "filter must be a dict or yaml string containing a dict";
const PAGE_ERROR: &str = "page must be a positive integer";
const PAGE_SIZE_ERROR: &str = "page size must be a positive integer";

/// Field selection: a list of names or a YAML document holding one.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldsArg {
    /// Field names.
    List(Vec<String>),
    /// YAML text, must parse to a list.
    Yaml(String),
}

impl From<Vec<String>> for FieldsArg {
    fn from(v: Vec<String>) -> Self {
        FieldsArg::List(v)
    }
}

impl From<Vec<&str>> for FieldsArg {
    fn from(v: Vec<&str>) -> Self {
        FieldsArg::List(v.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldsArg {
    fn from(v: [&str; N]) -> Self {
        FieldsArg::List(v.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&str> for FieldsArg {
    fn from(s: &str) -> Self {
        FieldsArg::Yaml(s.to_string())
    }
}

impl From<String> for FieldsArg {
    fn from(s: String) -> Self {
        FieldsArg::Yaml(s)
    }
}

/// Row filter: an expression, a JSON map, or a YAML document holding a map.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArg {
    /// Built with [`Q`].
    Expr(Q),
    /// Any JSON value; must be an object.
    Json(Value),
    /// YAML text, must parse to a map.
    Yaml(String),
}

impl From<Q> for FilterArg {
    fn from(q: Q) -> Self {
        FilterArg::Expr(q)
    }
}

impl From<Value> for FilterArg {
    fn from(v: Value) -> Self {
        FilterArg::Json(v)
    }
}

impl From<Map<String, Value>> for FilterArg {
    fn from(m: Map<String, Value>) -> Self {
        FilterArg::Json(Value::Object(m))
    }
}

impl From<&str> for FilterArg {
    fn from(s: &str) -> Self {
        FilterArg::Yaml(s.to_string())
    }
}

impl From<String> for FilterArg {
    fn from(s: String) -> Self {
        FilterArg::Yaml(s)
    }
}

/// Arguments of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub fields: Option<FieldsArg>,
    pub filter: Option<FilterArg>,
    /// Field name, optionally prefixed with `-`; passed through untouched.
    pub order: Option<String>,
    /// Page number for [`Model::query_page`]; [`Model::query`] ignores it.
    pub page: Option<i64>,
    /// Rows per page; the server default applies when unset.
    pub page_size: Option<i64>,
    /// Ask the server for distinct rows only.
    pub distinct: bool,
    /// Bypass the response cache for both lookup and store.
    pub skip_cache: bool,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(mut self, fields: impl Into<FieldsArg>) -> Self {
        self.fields = Some(fields.into());
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

    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    /// Validate and serialize to wire form. No I/O.
    pub(crate) fn normalize(&self) -> Result<WireParams> {
        let fields = self.fields.as_ref().map(normalize_fields).transpose()?;
        let filter = self.filter.as_ref().map(normalize_filter).transpose()?;
        let page = check_positive(self.page, PAGE_ERROR)?.unwrap_or(1);
        let page_size = check_positive(self.page_size, PAGE_SIZE_ERROR)?;
        Ok(WireParams {
            fields,
            filter,
            order: self.order.clone(),
            distinct: self.distinct,
            page,
            page_size,
        })
    }
}

/// Validated query-string parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WireParams {
    pub fields: Option<String>,
    pub filter: Option<String>,
    pub order: Option<String>,
    pub distinct: bool,
    pub page: i64,
    pub page_size: Option<i64>,
}

impl WireParams {
    pub fn query_pairs(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("fields", self.fields.clone()),
            ("filter", self.filter.clone()),
            ("order", self.order.clone()),
            // Always sent, capitalized
            ("distinct", Some(if self.distinct { "True" } else { "False" }.to_string())),
            ("page", Some(self.page.to_string())),
            ("page_size", self.page_size.map(|p| p.to_string())),
        ]
    }

    /// Stable digest of the parameters and the URL they are sent to.
    pub fn fingerprint(&self, url: &str) -> String {
        let mut canonical: BTreeMap<&str, Value> = BTreeMap::new();
        canonical.insert("url", Value::from(url));
        canonical.insert("fields", self.fields.clone().into());
        canonical.insert("filter", self.filter.clone().into());
        canonical.insert("order", self.order.clone().into());
        canonical.insert("distinct", Value::from(self.distinct));
        canonical.insert("page", Value::from(self.page));
        canonical.insert("page_size", self.page_size.into());

        // BTreeMap keys serialize sorted
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

fn normalize_fields(fields: &FieldsArg) -> Result<String> {
    let value = match fields {
        FieldsArg::List(names) => Value::from(names.clone()),
        FieldsArg::Yaml(text) => serde_yaml::from_str::<Value>(text)
            .map_err(|_| ClientError::validation(FIELDS_ERROR))?,
    };
    if !value.is_array() {
        return Err(ClientError::validation(FIELDS_ERROR));
    }
    Ok(serde_yaml::to_string(&value)?)
}

pub(crate) fn normalize_filter(filter: &FilterArg) -> Result<String> {
    let value = match filter {
        FilterArg::Expr(q) => q.output_filter(),
        FilterArg::Json(v) => v.clone(),
        FilterArg::Yaml(text) => serde_yaml::from_str::<Value>(text)
            .map_err(|_| ClientError::validation(FILTER_ERROR))?,
    };
    if !value.is_object() {
        return Err(ClientError::validation(FILTER_ERROR));
    }
    Ok(serde_yaml::to_string(&value)?)
}

pub(crate) fn check_positive(value: Option<i64>, message: &str) -> Result<Option<i64>> {
    match value {
        Some(v) if v <= 0 => Err(ClientError::validation(message)),
        other => Ok(other),
    }
}

pub(crate) fn check_page(page: Option<i64>) -> Result<i64> {
    Ok(check_positive(page, PAGE_ERROR)?.unwrap_or(1))
}

/// One decoded page of a query.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub table: Table,
    pub page: i64,
    /// Total page count reported by the server
    pub page_count: i64,
    /// Whether the page came from the response cache
    pub from_cache: bool,
}

impl QueryPage {
    /// Pages after this one; zero or negative means this was the last.
    pub fn remaining_pages(&self) -> i64 {
        self.page_count - self.page
    }
}

impl Model {
    /// URL of the tabular query endpoint.
    pub fn query_url(&self) -> String {
        format!("{}query", self.url())
    }

    /// Fetch every page of a query and concatenate them in page order.
    ///
    /// `params.page` is ignored; pages are requested one after another from
    /// page 1.
    pub async fn query(&self, params: QueryParams) -> Result<Table> {
        let mut pages = Vec::new();
        let mut page = 1;
        loop {
            let result = self.query_page(&params.clone().page(page)).await?;
            let remaining = result.remaining_pages();
            pages.push(result.table);
            if remaining <= 0 {
                break;
            }
            page += 1;
        }

        tracing::debug!(model = %self.qualified_name(), pages = pages.len(), "Query complete");
        Table::concat(pages)
    }

    /// Fetch a single page, from the cache when a fresh copy exists.
    ///
    /// With `skip_cache` set the cache is neither read nor written. A cached
    /// body that no longer decodes is dropped and fetched again.
    pub async fn query_page(&self, params: &QueryParams) -> Result<QueryPage> {
        let wire = params.normalize()?;
        let url = self.query_url();
        let fingerprint = wire.fingerprint(&url);
        let cache = &self.client.cache;

        if !params.skip_cache {
            if let Some(cached) = cache.get(&fingerprint).await {
                match Table::from_csv(&cached.body[..]) {
                    Ok(table) => {
                        tracing::debug!(url = %url, page = wire.page, "Serving page from cache");
                        return Ok(QueryPage {
                            table,
                            page: wire.page,
                            page_count: cached.page_count,
                            from_cache: true,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            url = %url,
                            page = wire.page,
                            error = %e,
                            "Discarding undecodable cached page"
                        );
                        if let Err(e) = cache.remove(&fingerprint).await {
                            tracing::warn!(error = %e, "Failed to remove cache entry");
                        }
                    }
                }
            }
        }

        let response = self
            .client
            .transport
            .call(Method::GET, &url, &wire.query_pairs(), RequestOptions::default())
            .await?;

        let page_count = match response
            .headers()
            .get(PAGE_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            Some(count) => count,
            None => {
                tracing::warn!(url = %url, "Response has no usable page_count header");
                wire.page
            }
        };

        let body: Bytes = response.bytes().await?;
        if !params.skip_cache {
            if let Err(e) = cache
                .put(&fingerprint, CachedPage::new(body.clone(), page_count))
                .await
            {
                tracing::warn!(error = %e, "Failed to store page in cache");
            }
        }

        Ok(QueryPage {
            table: Table::from_csv(&body[..])?,
            page: wire.page,
            page_count,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let wire = QueryParams::new().normalize().unwrap();
        assert_eq!(wire.page, 1);
        assert_eq!(wire.fields, None);
        assert_eq!(wire.page_size, None);
        assert!(!wire.distinct);
        assert!(wire
            .query_pairs()
            .contains(&("distinct", Some("False".to_string()))));
    }

    #[test]
    fn test_fields_list_and_yaml_agree() {
        let a = QueryParams::new().fields(["id", "text"]).normalize().unwrap();
        let b = QueryParams::new().fields("[id, text]").normalize().unwrap();
        assert_eq!(a.fields.as_deref(), Some("- id\n- text\n"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_filter_forms_agree() {
        let a = QueryParams::new()
            .filter(json!({"text": "a", "id": 1}))
            .normalize()
            .unwrap();
        let b = QueryParams::new()
            .filter("{id: 1, text: a}")
            .normalize()
            .unwrap();
        assert_eq!(a.filter, b.filter);
        assert_eq!(a.fingerprint("u"), b.fingerprint("u"));
    }

    #[test]
    fn test_expression_filter() {
        let wire = QueryParams::new()
            .filter(Q::field("id", 1) | Q::field("id", 2))
            .normalize()
            .unwrap();
        let back: Value = serde_yaml::from_str(wire.filter.as_deref().unwrap()).unwrap();
        assert_eq!(back, json!({"or": [{"id": 1}, {"id": 2}]}));
    }

    #[test]
    fn test_invalid_arguments() {
        let cases = [
            (QueryParams::new().fields("invalid_field"), FIELDS_ERROR),
            (QueryParams::new().filter(json!(123)), FILTER_ERROR),
            (QueryParams::new().filter("invalid"), FILTER_ERROR),
            (QueryParams::new().page(0), PAGE_ERROR),
            (QueryParams::new().page(-1), PAGE_ERROR),
            (QueryParams::new().page_size(0), PAGE_SIZE_ERROR),
        ];
        for (params, message) in cases {
            match params.normalize() {
                Err(ClientError::Validation(m)) => assert_eq!(m, message),
                other => panic!("expected validation error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_fingerprint_depends_on_every_parameter() {
        let base = QueryParams::new().fields(["id"]).page_size(10);
        let fp = base.normalize().unwrap().fingerprint("http://x/q");

        assert_eq!(fp, base.normalize().unwrap().fingerprint("http://x/q"));
        assert_eq!(fp.len(), 64);
        assert_ne!(fp, base.normalize().unwrap().fingerprint("http://y/q"));
        assert_ne!(fp, base.clone().page(2).normalize().unwrap().fingerprint("http://x/q"));
        assert_ne!(fp, base.clone().order("-id").normalize().unwrap().fingerprint("http://x/q"));
        assert_ne!(fp, base.clone().distinct(true).normalize().unwrap().fingerprint("http://x/q"));
        // Cache bypass is not part of the request
        assert_eq!(fp, base.clone().skip_cache(true).normalize().unwrap().fingerprint("http://x/q"));
    }

    #[test]
    fn test_remaining_pages() {
        let page = QueryPage {
            table: Table::default(),
            page: 2,
            page_count: 3,
            from_cache: false,
        };
        assert_eq!(page.remaining_pages(), 1);
    }
}
