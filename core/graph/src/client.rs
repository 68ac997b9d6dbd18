//! Microsoft Graph HTTP client.
//!
//! Every call is a single attempt: bearer auth, JSON or raw body, non-2xx
//! mapped to a typed error.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use integrator_common::{Error, Result};

/// Microsoft Graph v1.0 endpoint.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Byte stream returned by streaming downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Graph client settings.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// API root, without trailing slash.
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: GRAPH_API_BASE.to_string(),
            timeout: Duration::from_secs(60),
            user_agent: "Integrator/0.1".to_string(),
        }
    }
}

/// Collection envelope of Graph list responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// Continuation link; present when more pages exist.
    #[serde(rename = "@odata.nextLink", default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Low-level Graph API client.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new Graph client.
    ///
    /// # Errors
    /// - HTTP client cannot be built
    pub fn new(config: GraphConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create with default configuration against `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::new(GraphConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    /// Full URL for an endpoint path; absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// GET and parse a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<T> {
        let response = self.send(self.http.get(self.url(path)).bearer_auth(token), "GET", path).await?;
        self.handle_response(response).await
    }

    /// GET a text body (e.g. page HTML).
    pub async fn get_text(&self, token: &str, path: &str) -> Result<String> {
        let response = self.send(self.http.get(self.url(path)).bearer_auth(token), "GET", path).await?;
        let response = self.check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Failed to read response: {}", e)))
    }

    /// GET raw bytes as a stream.
    pub async fn get_stream(&self, token: &str, path: &str) -> Result<ByteStream> {
        let response = self.send(self.http.get(self.url(path)).bearer_auth(token), "GET", path).await?;
        let response = self.check_status(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Network(format!("Stream read error: {}", e))));

        Ok(Box::pin(stream))
    }

    /// POST a JSON body and parse the JSON response.
    pub async fn post_json<B, T>(&self, token: &str, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.http.post(self.url(path)).bearer_auth(token).json(body);
        let response = self.send(request, "POST", path).await?;
        self.handle_response(response).await
    }

    /// POST a raw body with an explicit content type.
    pub async fn post_raw<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<T> {
        let request = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, content_type)
            .body(body);
        let response = self.send(request, "POST", path).await?;
        self.handle_response(response).await
    }

    /// PUT raw bytes and parse the JSON response.
    pub async fn put_bytes<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<T> {
        tracing::debug!("PUT {} ({} bytes)", path, data.len());
        let request = self
            .http
            .put(self.url(path))
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, content_type)
            .body(data);
        let response = self.send(request, "PUT", path).await?;
        self.handle_response(response).await
    }

    /// PATCH a JSON body, expecting no content back.
    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        token: &str,
        path: &str,
        body: &B,
    ) -> Result<()> {
        let request = self.http.patch(self.url(path)).bearer_auth(token).json(body);
        let response = self.send(request, "PATCH", path).await?;
        self.check_status(response).await.map(|_| ())
    }

    /// DELETE a resource.
    pub async fn delete(&self, token: &str, path: &str) -> Result<()> {
        let request = self.http.delete(self.url(path)).bearer_auth(token);
        let response = self.send(request, "DELETE", path).await?;
        self.check_status(response).await.map(|_| ())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<reqwest::Response> {
        tracing::debug!("{} {}", method, path);
        request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {} failed: {}", method, path, e)))
    }

    /// Handle API response with error checking.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);

        if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(message))
        } else {
            if status == StatusCode::UNAUTHORIZED {
                tracing::warn!("Request rejected with 401; the access token may be stale");
            }
            Err(Error::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Graph error message from a response body, falling back to the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => {
            format!("{}: {}", envelope.error.code, envelope.error.message)
        }
        _ if body.is_empty() => "Resource not found".to_string(),
        _ => body.to_string(),
    }
}
