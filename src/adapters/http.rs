//! Shared HTTP plumbing for the REST adapters
//!
//! Builds the reqwest client from [`DatastoreConfig`], attaches the API key and
//! maps transport failures and HTTP statuses onto [`DatastoreError`].

use crate::config::{DatastoreConfig, SecretString};
use crate::domain::{DatastoreError, DeidError, Result};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Authenticated REST client rooted at the datastore base URL
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    client: Client,
    api_key: Option<SecretString>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

impl ApiClient {
    /// Builds a client from configuration
    ///
    /// `api_key` overrides `config.api_key` when given.
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::Configuration`] if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &DatastoreConfig, api_key: Option<SecretString>) -> Result<Self> {
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base).map_err(|e| {
            DeidError::Configuration(format!("Invalid datastore.base_url '{}': {e}", config.base_url))
        })?;

        let mut builder = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(30));
        if !config.tls_verify {
            tracing::warn!("TLS certificate verification disabled for datastore");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|e| {
            DeidError::Configuration(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            base_url,
            client,
            api_key: api_key.or_else(|| config.api_key.clone()),
        })
    }

    /// URL made of percent-encoded `segments` under the base URL
    pub fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, DatastoreError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                DatastoreError::InvalidResponse(format!(
                    "base URL cannot carry a path: {}",
                    self.base_url
                ))
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    /// Request with the API key attached
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.api_key {
            Some(key) => request.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", key.expose_secret().as_ref()),
            ),
            None => request,
        }
    }

    /// Sends the request and returns the response if its status is a success
    pub async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, DatastoreError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, body))
    }

    /// Sends the request and decodes a JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<T, DatastoreError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| DatastoreError::InvalidResponse(e.to_string()))
    }
}

/// Maps a reqwest transport failure
pub fn map_transport_error(err: reqwest::Error) -> DatastoreError {
    if err.is_timeout() {
        DatastoreError::Timeout(err.to_string())
    } else {
        DatastoreError::ConnectionFailed(err.to_string())
    }
}

/// Maps a non-success HTTP status
pub fn map_status(status: StatusCode, body: String) -> DatastoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DatastoreError::AuthenticationFailed(format!("{status}: {body}"))
        }
        StatusCode::NOT_FOUND => DatastoreError::NotFound(body),
        s if s.is_server_error() => DatastoreError::ServerError {
            status: s.as_u16(),
            message: body,
        },
        s => DatastoreError::ClientError {
            status: s.as_u16(),
            message: body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{secret_string, RetryConfig};

    fn config(base_url: &str) -> DatastoreConfig {
        DatastoreConfig {
            base_url: base_url.to_string(),
            api_key: None,
            timeout_seconds: 5,
            tls_verify: true,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = ApiClient::new(&config("https://data.example.org/api/"), None).unwrap();
        let url = client.endpoint(&["acquisitions", "a1", "files", "scan 1.dcm"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://data.example.org/api/acquisitions/a1/files/scan%201.dcm"
        );
    }

    #[test]
    fn test_api_key_override_and_debug() {
        let mut cfg = config("https://data.example.org/api");
        cfg.api_key = Some(secret_string("from-config".to_string()));
        let client = ApiClient::new(&cfg, Some(secret_string("from-cli".to_string()))).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("authenticated: true"));
        assert!(!debug.contains("from-cli"));
    }

    #[test]
    fn test_map_status() {
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, String::new()),
            DatastoreError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "gone".to_string()),
            DatastoreError::NotFound(_)
        ));
        assert!(map_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(map_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(!map_status(StatusCode::CONFLICT, String::new()).is_retryable());
    }
}
