//! Bulk API Client
//!
//! An async Rust client for the Bulk API data catalog. The catalog is
//! organized as apps containing models; this crate discovers it, pages
//! through tabular query results, and maps individual records onto the
//! field schema the catalog publishes.
//!
//! # Features
//!
//! - **Discovery**: app and model maps fetched lazily, once per client
//! - **Queries**: paged CSV results merged into a single [`Table`]
//! - **Caching**: two-level (memory + disk) page cache with TTL expiry
//! - **Records**: schema-checked field access, lazy relation traversal,
//!   file fields, create/update/delete round trips
//! - **Filters**: `and` / `or` / `not` expressions with [`Q`]
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bulk_api_client::{BulkClient, ClientConfig, QueryParams, Q};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BulkClient::connect(
//!         ClientConfig::builder("my-token")
//!             .base_url("https://data-warehouse.pivot/bulk/api/")
//!             .cache_ttl(Duration::from_secs(600))
//!             .build()?,
//!     )
//!     .await?;
//!
//!     let model = client.app("bulk_importer")?.model("ExampleForTesting").await?;
//!
//!     // Every page of a query, concatenated
//!     let table = model
//!         .query(
//!             QueryParams::new()
//!                 .fields(["id", "text"])
//!                 .filter(Q::field("integer", 5) | Q::field("integer", 7))
//!                 .order("-id"),
//!         )
//!         .await?;
//!     println!("{} rows", table.len());
//!
//!     // Records
//!     let record = model.get(1016).await?;
//!     record.set("text", "updated").await?;
//!     record.save().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Caching
//!
//! Query pages are cached by a SHA-256 fingerprint of the query URL and its
//! normalized parameters:
//!
//! - Entries expire after the configured TTL (2 hours by default) and are
//!   overwritten by the next fetch
//! - Listing and fetching single records always go to the server
//! - Use `cache_ttl(Duration::ZERO)` or `no_cache()` to disable caching
//!
//! # Error Handling
//!
//! All operations return `Result<T, ClientError>`. Errors include:
//!
//! - `Api` / `Status`: the server answered with a non-success status
//! - `NotFound`: unknown app label or model name
//! - `Validation`: malformed query arguments, raised before any request
//! - `ReadOnly` / `RelationType`: rejected field assignments
//!
//! Nothing is retried.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod mapper;
pub mod navigator;
pub mod query;
pub mod record;
mod registry;
pub mod table;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use cache::{CacheStats, CachedPage, ResponseCache};
pub use client::BulkClient;
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_BASE_URL, DEFAULT_CACHE_TTL};
pub use error::{CatalogEntry, ClientError, Result};
pub use filter::{Connector, Q};
pub use mapper::{field_values, FieldInput, FieldValues, FileUpload, ListParams};
pub use navigator::{App, Model};
pub use query::{FieldsArg, FilterArg, QueryPage, QueryParams};
pub use record::{FieldValue, FileContent, Record};
pub use table::Table;
pub use types::{FieldDescriptor, FieldKind, ModelSchema};
