//! Authenticated HTTP calls against the catalog.
//!
//! Every request goes through [`Transport::call`], which is the single place
//! where non-success responses turn into [`ClientError`]s. Nothing is
//! retried.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

/// Request body variants.
pub enum RequestBody {
    /// Pre-serialized JSON document.
    Json(Vec<u8>),
    /// `multipart/form-data` upload.
    Multipart(reqwest::multipart::Form),
}

/// Per-request extras for [`Transport::call`].
#[derive(Default)]
pub struct RequestOptions {
    /// Headers merged over the defaults; these win on conflicts
    pub headers: HeaderMap,
    /// Optional request body
    pub body: Option<RequestBody>,
}

impl RequestOptions {
    /// JSON body with matching `Content-Type` and `Accept` headers.
    pub fn json(body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        Self {
            headers,
            body: Some(RequestBody::Json(body)),
        }
    }

    /// Multipart body; the boundary header is set by the form itself.
    pub fn multipart(form: reqwest::multipart::Form) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        Self {
            headers,
            body: Some(RequestBody::Multipart(form)),
        }
    }
}

/// Low-level HTTP wrapper that injects authentication.
pub struct Transport {
    http: reqwest::Client,
    base: Url,
    auth: HeaderValue,
}

impl Transport {
    /// Build the transport from a validated configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = config.base()?;

        let mut auth = HeaderValue::from_str(&format!("Token {}", config.token))
            .map_err(|_| ClientError::Config("Invalid token format".to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("bulk-api-client")),
        );

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.tls_verify);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(ref bundle) = config.ca_bundle {
            let pem = std::fs::read(bundle).map_err(|e| {
                ClientError::Config(format!("cannot read CA bundle {}: {}", bundle.display(), e))
            })?;
            for cert in reqwest::Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(Self {
            http: builder.build()?,
            base,
            auth,
        })
    }

    /// Catalog root.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve an absolute URL or a path relative to the catalog root.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.base
            .join(url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))
    }

    /// Issue one request and return the streaming response.
    ///
    /// `params` with a `None` value are left out of the query string. On a
    /// non-success status the body is read and turned into
    /// [`ClientError::Api`] (JSON body) or [`ClientError::Status`].
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, Option<String>)],
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        let url = self.resolve(url)?;
        let start = std::time::Instant::now();

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.auth.clone());
        for (name, value) in options.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        let query: Vec<(&str, &str)> = params
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
            .collect();

        tracing::debug!(
            method = %method,
            url = %url,
            "Sending request"
        );

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .headers(headers)
            .query(&query);
        request = match options.body {
            Some(RequestBody::Json(body)) => request.body(body),
            Some(RequestBody::Multipart(form)) => request.multipart(form),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let duration = start.elapsed();

        tracing::debug!(
            method = %method,
            url = %url,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Received response"
        );

        if status.is_success() {
            return Ok(response);
        }

        let final_url = response.url().to_string();
        let body = response.bytes().await.unwrap_or_default();
        let err = ClientError::from_response_body(status, &final_url, &body);

        tracing::warn!(
            method = %method,
            url = %final_url,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            error = %err,
            "Request failed"
        );

        Err(err)
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .call(Method::GET, url, &[], RequestOptions::default())
            .await?;
        decode_json(response).await
    }
}

/// Read a response body as JSON.
pub(crate) async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| {
        ClientError::InvalidResponse(format!(
            "Failed to parse response: {} (body: {})",
            e,
            String::from_utf8_lossy(&body)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> Transport {
        let config = ClientConfig::builder("secret").base_url(base).build().unwrap();
        Transport::new(&config).unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let t = transport("http://test.org/bulk/api/");
        assert_eq!(
            t.resolve("bulk_importer/").unwrap().as_str(),
            "http://test.org/bulk/api/bulk_importer/"
        );
        assert_eq!(
            t.resolve("/bulk/api/uav/").unwrap().as_str(),
            "http://test.org/bulk/api/uav/"
        );
        assert_eq!(
            t.resolve("https://other.org/x").unwrap().as_str(),
            "https://other.org/x"
        );
    }

    #[test]
    fn test_missing_ca_bundle_is_config_error() {
        let config = ClientConfig::builder("secret")
            .ca_bundle("/definitely/not/here.pem")
            .build()
            .unwrap();
        assert!(matches!(
            Transport::new(&config),
            Err(ClientError::Config(_))
        ));
    }
}
