//! # HTTP Retrieval Utilities
//!
//! A thin asynchronous client around `reqwest` with retry middleware, shared
//! by every HTTP adapter (price feed, solar feed, time-series sink).
//!
//! Retries are per client: a free public API can afford a few, a quota-limited
//! one cannot. Transport failures and undecodable bodies surface as
//! [`HttpError`]; non-2xx answers are not errors at this level and come back
//! in an [`ApiResponse`] with `success == false`.

use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::ports::FetchError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure below the HTTP status level.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The base URL or a joined path is not a valid absolute URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// Connect, TLS, timeout or other transport failure after all retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// A 2xx body that does not decode into the expected type.
    #[error("undecodable body: {0}")]
    Decode(String),

    /// The underlying client could not be constructed.
    #[error("client build failed: {0}")]
    Build(String),
}

impl From<HttpError> for FetchError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Decode(msg) => FetchError::Parse(msg),
            other => FetchError::Transient(other.to_string()),
        }
    }
}

/// How a client authenticates.
#[derive(Clone)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: Token <token>` (InfluxDB 2).
    Token(String),
    /// HTTP basic auth.
    Basic {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(***)"),
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Basic { user, .. } => write!(f, "Basic({user}, ***)"),
        }
    }
}

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body of a 2xx response.
    pub data: Option<T>,
    /// The raw body of a non-2xx response.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// Retrying HTTP client bound to one base URL.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl ApiClient {
    /// Client with 3 retries and the default timeout.
    pub fn new(base_url: &str) -> Result<Self, HttpError> {
        Self::with_options(base_url, 3, DEFAULT_TIMEOUT)
    }

    /// Client with an explicit retry budget and per-request timeout.
    ///
    /// `max_retries == 0` installs no retry middleware at all.
    pub fn with_options(base_url: &str, max_retries: u32, timeout: Duration) -> Result<Self, HttpError> {
        let base_url = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;

        let mut builder = ClientBuilder::new(client);
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self { inner: builder.build(), base_url, credentials: None })
    }

    /// Attaches credentials sent with every request.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The base all paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        headers: Option<HeaderMap>,
    ) -> Result<reqwest_middleware::RequestBuilder, HttpError> {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(h) = headers {
            req = req.headers(h);
        }
        req = match &self.credentials {
            Some(Credentials::Bearer(token)) => req.header(AUTHORIZATION, format!("Bearer {token}")),
            Some(Credentials::Token(token)) => req.header(AUTHORIZATION, format!("Token {token}")),
            Some(Credentials::Basic { user, password }) => req.basic_auth(user, Some(password)),
            None => req,
        };
        Ok(req)
    }

    /// `GET` and decode a JSON body.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<ApiResponse<T>, HttpError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .build(Method::GET, path, query, None)?
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await.map_err(|e| HttpError::Decode(e.to_string()))?;
            Ok(ApiResponse { data: Some(data), error_body: None, status: status.as_u16(), success: true, headers })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiResponse { data: None, error_body, status: status.as_u16(), success: false, headers })
        }
    }

    /// `POST` a plain-text body. The response body is returned as text.
    pub async fn post_text(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: String,
    ) -> Result<ApiResponse<String>, HttpError> {
        self.post_body(path, query, "text/plain; charset=utf-8", body).await
    }

    /// `POST` `body` with an explicit content type. The response body is returned as text.
    pub async fn post_body(
        &self,
        path: &str,
        query: &[(&str, &str)],
        content_type: &'static str,
        body: String,
    ) -> Result<ApiResponse<String>, HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, reqwest::header::HeaderValue::from_static(content_type));

        let response = self
            .build(Method::POST, path, query, Some(headers))?
            .body(body)
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.ok();
        let success = status.is_success();

        Ok(ApiResponse {
            data: if success { text.clone() } else { None },
            error_body: if success { None } else { text },
            status: status.as_u16(),
            success,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::test_server::serve_once;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        ok: bool,
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let (base, server) = serve_once("200 OK", "application/json", r#"{"ok":true}"#);
        let client = ApiClient::with_options(&base, 0, DEFAULT_TIMEOUT).unwrap();

        let resp: ApiResponse<Pong> = client.get_json("ping", &[("a", "1")]).await.unwrap();
        let request = server.join().unwrap();

        assert!(resp.success);
        assert_eq!(resp.data, Some(Pong { ok: true }));
        assert!(request.starts_with("GET /ping?a=1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_non_success_keeps_error_body() {
        let (base, server) = serve_once("404 Not Found", "text/plain", "no such day");
        let client = ApiClient::with_options(&base, 0, DEFAULT_TIMEOUT).unwrap();

        let resp: ApiResponse<Pong> = client.get_json("missing", &[]).await.unwrap();
        server.join().unwrap();

        assert!(!resp.success);
        assert_eq!(resp.status, 404);
        assert_eq!(resp.error_body.as_deref(), Some("no such day"));
    }

    #[tokio::test]
    async fn test_bad_json_is_a_decode_error() {
        let (base, server) = serve_once("200 OK", "application/json", "<html>");
        let client = ApiClient::with_options(&base, 0, DEFAULT_TIMEOUT).unwrap();

        let err = client.get_json::<Pong>("ping", &[]).await.unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, HttpError::Decode(_)));
        assert!(matches!(FetchError::from(err), FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn test_token_credentials_are_sent() {
        let (base, server) = serve_once("204 No Content", "text/plain", "");
        let client = ApiClient::with_options(&base, 0, DEFAULT_TIMEOUT)
            .unwrap()
            .with_credentials(Credentials::Token("s3cret".into()));

        let resp = client.post_text("write", &[], "m f=1".into()).await.unwrap();
        let request = server.join().unwrap();

        assert!(resp.success);
        assert!(request.to_ascii_lowercase().contains("authorization: token s3cret"));
        assert!(request.ends_with("m f=1"));
    }

    #[test]
    fn test_relative_base_is_rejected() {
        assert!(matches!(ApiClient::new("not a url"), Err(HttpError::Url(_))));
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let basic = Credentials::Basic { user: "admin".into(), password: "hunter2".into() };
        assert_eq!(format!("{basic:?}"), "Basic(admin, ***)");
    }
}
