//! Error types for the Bulk API client.

use reqwest::StatusCode;
use std::fmt;

/// Which kind of catalog entry a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogEntry {
    /// An app label.
    App,
    /// A model name within an app.
    Model,
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogEntry::App => f.write_str("App"),
            CatalogEntry::Model => f.write_str("Model"),
        }
    }
}

/// Errors that can occur when using the Bulk API client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, body read, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the request and explained why in a JSON body.
    ///
    /// The body is carried verbatim.
    #[error("{body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// URL of the failing request
        url: String,
        /// Structured error payload from the server
        body: serde_json::Value,
    },

    /// The server rejected the request without a structured body.
    #[error("{message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// URL of the failing request
        url: String,
        /// Generic diagnostic naming the status and URL
        message: String,
    },

    /// App or model absent from the discovered catalog.
    #[error("{kind} {name} does not exist in bulk api")]
    NotFound {
        /// What was looked up
        kind: CatalogEntry,
        /// The label or model name that was not found
        name: String,
    },

    /// Malformed query arguments, raised before any network call.
    #[error("{0}")]
    Validation(String),

    /// Attempt to assign a field the schema marks read-only.
    #[error("Cannot set a read only property: {model}.{field}")]
    ReadOnly {
        /// Qualified model name (`app.model`)
        model: String,
        /// Field name
        field: String,
    },

    /// Attempt to assign a non-record value to a relation field.
    #[error("New related model must be a Record: {model}.{field}")]
    RelationType {
        /// Qualified model name (`app.model`)
        model: String,
        /// Field name
        field: String,
    },

    /// Field is not declared by the model's schema.
    #[error("{model} has no field {field}")]
    UnknownField {
        /// Qualified model name (`app.model`)
        model: String,
        /// Field name
        field: String,
    },

    /// Update or delete answered with a status other than the expected one.
    #[error("{operation} not successful. Status code {status}; {body}")]
    Unsuccessful {
        /// `update` or `delete`
        operation: &'static str,
        /// HTTP status code received
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The server stored the request but reported row-level errors.
    #[error("{}", .0.join("\n"))]
    Rejected(Vec<String>),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid or unresolvable URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Response cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML wire-format error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Tabular decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Build the transport error for a non-success response body.
    ///
    /// JSON bodies are kept as-is; anything else becomes a diagnostic that
    /// names the status and the failing URL.
    pub(crate) fn from_response_body(status: StatusCode, url: &str, body: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(body) => ClientError::Api {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            },
            Err(_) => ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                message: format!(
                    "{} Error raised: something went wrong.\nPlease send this message to \
                     the data services team, including the link below:\n\n{}\nIf you are \
                     curious as to the nature of the problem following the above link might \
                     provide some help.",
                    status.as_u16(),
                    url
                ),
            },
        }
    }

    /// Shorthand for a validation error.
    pub(crate) fn validation(detail: impl Into<String>) -> Self {
        ClientError::Validation(detail.into())
    }

    /// Returns the HTTP status code if the error came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. }
            | ClientError::Status { status, .. }
            | ClientError::Unsuccessful { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns the structured error payload, if the server sent one.
    pub fn api_body(&self) -> Option<&serde_json::Value> {
        match self {
            ClientError::Api { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_body_is_kept_verbatim() {
        let err = ClientError::from_response_body(
            StatusCode::FORBIDDEN,
            "http://test.org/api/x",
            br#"{"detail": "You do not have permission to perform this action."}"#,
        );
        assert_eq!(err.status(), Some(403));
        assert_eq!(
            err.api_body().unwrap()["detail"],
            "You do not have permission to perform this action."
        );
    }

    #[test]
    fn test_plain_body_gets_generic_message() {
        let err = ClientError::from_response_body(
            StatusCode::NOT_FOUND,
            "http://test.org/api/missing",
            b"<html>nope</html>",
        );
        let msg = err.to_string();
        assert!(msg.starts_with("404 Error raised"));
        assert!(msg.contains("http://test.org/api/missing"));
        assert!(err.api_body().is_none());
    }

    #[test]
    fn test_rejected_joins_lines() {
        let err = ClientError::Rejected(vec![
            "Invalid datetime.".to_string(),
            "Please enter a number.".to_string(),
        ]);
        assert_eq!(err.to_string(), "Invalid datetime.\nPlease enter a number.");
    }

    #[test]
    fn test_not_found_message() {
        let err = ClientError::NotFound {
            kind: CatalogEntry::Model,
            name: "widget".to_string(),
        };
        assert_eq!(err.to_string(), "Model widget does not exist in bulk api");
        assert_eq!(err.status(), None);
    }
}
