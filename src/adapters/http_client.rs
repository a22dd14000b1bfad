use anyhow::Result;
use http::StatusCode;
use std::collections::HashMap;
use tracing::trace;

/// HTTP method enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PATCH,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PATCH => "PATCH",
        }
    }
}

/// A very simple version that only holds response data
#[derive(Debug, Clone)]
pub struct SimpleHttpResponse {
    /// HTTP status code
    status_code: u16,
    /// Response body
    body: String,
}

impl SimpleHttpResponse {
    /// Create a new response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status_code: status,
            body: body.into(),
        }
    }

    /// Get the status code
    pub fn status(&self) -> u16 {
        self.status_code
    }

    /// Get a reference to the response body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Typed status, `None` for codes outside 100..=999
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status_code).ok()
    }

    /// Check if successful (2xx status)
    pub fn is_success(&self) -> bool {
        self.status_code().map_or(false, |s| s.is_success())
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().map_or(false, |s| s.is_server_error())
    }
}

/// Headers for a JSON request, with an optional bearer token
pub fn json_headers(bearer: Option<&str>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    if let Some(token) = bearer {
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    }
    headers
}

/// Trait for HTTP client operations, allowing for mocking
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform HTTP GET request and return a SimpleHttpResponse
    async fn get(&self, url: &str, headers: HashMap<String, String>) -> Result<SimpleHttpResponse>;

    /// Perform HTTP POST request and return a SimpleHttpResponse
    async fn post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse>;

    /// Perform HTTP PATCH request and return a SimpleHttpResponse
    async fn patch(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse>;
}

/// Implementation of HttpClient using reqwest
pub struct ReqwestHttpClient {
    /// Internal reqwest client
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new ReqwestHttpClient
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a new client with custom configuration
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Result<SimpleHttpResponse> {
        let mut request = match method {
            HttpMethod::GET => self.client.get(url),
            HttpMethod::POST => self.client.post(url),
            HttpMethod::PATCH => self.client.patch(url),
        };

        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        trace!(method = method.as_str(), url, status, "HTTP request completed");

        Ok(SimpleHttpResponse::new(status, body))
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: HashMap<String, String>) -> Result<SimpleHttpResponse> {
        self.send(HttpMethod::GET, url, headers, None).await
    }

    async fn post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse> {
        self.send(HttpMethod::POST, url, headers, Some(body)).await
    }

    async fn patch(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse> {
        self.send(HttpMethod::PATCH, url, headers, Some(body)).await
    }
}
