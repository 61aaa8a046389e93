//! HTTP request types and builder.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use super::client::{Authentication, HttpClient};
use super::response::HttpResponse;
use crate::error::Result;

/// HTTP request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP PATCH method.
    Patch,
    /// HTTP HEAD method.
    Head,
}

impl HttpMethod {
    /// Convert to reqwest method.
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Head => reqwest::Method::HEAD,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
        }
    }
}

/// The body of an HTTP request.
#[derive(Clone, Debug)]
pub enum RequestBody {
    /// No body.
    None,
    /// JSON body (serialized from a value).
    Json(serde_json::Value),
    /// Raw binary body, used for tus `PATCH` chunk payloads.
    Bytes(Bytes),
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::None
    }
}

/// A built HTTP request ready to be sent.
#[derive(Debug)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: HttpMethod,
    /// The request URL.
    pub url: String,
    /// Request headers.
    pub headers: http::HeaderMap,
    /// Request body.
    pub body: RequestBody,
    /// Request timeout override.
    pub timeout: Option<Duration>,
    /// Authentication.
    pub auth: Option<Authentication>,
}

/// Builder for constructing HTTP requests.
pub struct HttpRequestBuilder {
    client: HttpClient,
    method: HttpMethod,
    url: String,
    headers: http::HeaderMap,
    body: RequestBody,
    timeout: Option<Duration>,
    auth: Option<Authentication>,
}

impl HttpRequestBuilder {
    /// Create a new request builder.
    pub(crate) fn new(client: HttpClient, method: HttpMethod, url: String) -> Self {
        Self {
            client,
            method,
            url,
            headers: http::HeaderMap::new(),
            body: RequestBody::None,
            timeout: None,
            auth: None,
        }
    }

    /// Add a header to the request.
    pub fn header(
        mut self,
        name: impl TryInto<http::HeaderName>,
        value: impl TryInto<http::HeaderValue>,
    ) -> Self {
        if let (Ok(name), Ok(value)) = (name.try_into(), value.try_into()) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set a JSON body from a serializable value.
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = RequestBody::Json(value),
            Err(e) => {
                tracing::error!(target: "tus_client::http", "failed to serialize JSON body: {e}");
            }
        }
        self
    }

    /// Set a raw binary body.
    pub fn bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    /// Set bearer token authentication.
    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Authentication::Bearer(token.into()));
        self
    }

    /// Set a timeout for this specific request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the request without sending it.
    pub fn build(self) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
            auth: self.auth,
        }
    }

    /// Send the request and wait for the response.
    pub async fn send(self) -> Result<HttpResponse> {
        let client = self.client.clone();
        let request = self.build();

        let url = url::Url::parse(&request.url)?;

        let mut req_builder = client
            .reqwest_client()
            .request(request.method.to_reqwest(), url);

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if let Some(auth) = &request.auth {
            match auth {
                Authentication::Basic { username, password } => {
                    req_builder = req_builder.basic_auth(username, password.as_ref());
                }
                Authentication::Bearer(token) => {
                    req_builder = req_builder.bearer_auth(token);
                }
            }
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        match request.body {
            RequestBody::None => {}
            RequestBody::Json(value) => {
                req_builder = req_builder.json(&value);
            }
            RequestBody::Bytes(bytes) => {
                req_builder = req_builder.body(bytes);
            }
        }

        let response = req_builder.send().await?;
        Ok(HttpResponse::from_reqwest(response))
    }
}
