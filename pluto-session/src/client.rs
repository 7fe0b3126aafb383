//! Authentication service client
//!
//! `AuthApi` is the seam between the session manager and the remote identity
//! service; `HttpAuthApi` implements it over `reqwest`.

use async_trait::async_trait;
use pluto_core::{ApiConfig, ErrorContext, PlutoError, PlutoResult};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::types::{
    LoginRequest, MessageResponse, PasswordResetConfirm, PasswordResetRequest, QuotaInfo,
    RegisterRequest, TokenResponse, UserRecord,
};

/// Remote authentication/identity service
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// POST /auth/login
    async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ApiError>;

    /// POST /auth/register
    async fn register(&self, request: &RegisterRequest) -> Result<TokenResponse, ApiError>;

    /// GET /auth/me
    async fn current_user(&self, token: &str) -> Result<UserRecord, ApiError>;

    /// GET /auth/quota
    async fn quota(&self, token: &str) -> Result<QuotaInfo, ApiError>;

    /// POST /auth/refresh
    async fn refresh(&self, token: &str) -> Result<TokenResponse, ApiError>;

    /// POST /auth/reset-password
    async fn request_password_reset(
        &self,
        request: &PasswordResetRequest,
    ) -> Result<MessageResponse, ApiError>;

    /// POST /auth/reset-password/confirm
    async fn confirm_password_reset(
        &self,
        request: &PasswordResetConfirm,
    ) -> Result<MessageResponse, ApiError>;
}

/// `AuthApi` over HTTP
pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthApi {
    /// Create a client for the service at `config.base_url`
    pub fn new(config: &ApiConfig) -> PlutoResult<Self> {
        let client = create_http_client(config)?;

        info!("Created auth API client for {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying client, for collaborators calling other gateway endpoints
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<T, ApiError> {
        debug!("Sending auth API request to {}", endpoint);

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Auth API {} returned HTTP {}", endpoint, status.as_u16());
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail: parse_detail(&body),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
            message: format!("{}: {}", endpoint, e),
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ApiError> {
        let endpoint = "auth/login";
        let builder = self.client.post(self.url(endpoint)).json(request);
        self.send_json(builder, endpoint).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<TokenResponse, ApiError> {
        let endpoint = "auth/register";
        let builder = self.client.post(self.url(endpoint)).json(request);
        self.send_json(builder, endpoint).await
    }

    async fn current_user(&self, token: &str) -> Result<UserRecord, ApiError> {
        let endpoint = "auth/me";
        let builder = self.client.get(self.url(endpoint)).bearer_auth(token);
        self.send_json(builder, endpoint).await
    }

    async fn quota(&self, token: &str) -> Result<QuotaInfo, ApiError> {
        let endpoint = "auth/quota";
        let builder = self.client.get(self.url(endpoint)).bearer_auth(token);
        self.send_json(builder, endpoint).await
    }

    async fn refresh(&self, token: &str) -> Result<TokenResponse, ApiError> {
        let endpoint = "auth/refresh";
        let builder = self.client.post(self.url(endpoint)).bearer_auth(token);
        self.send_json(builder, endpoint).await
    }

    async fn request_password_reset(
        &self,
        request: &PasswordResetRequest,
    ) -> Result<MessageResponse, ApiError> {
        let endpoint = "auth/reset-password";
        let builder = self.client.post(self.url(endpoint)).json(request);
        self.send_json(builder, endpoint).await
    }

    async fn confirm_password_reset(
        &self,
        request: &PasswordResetConfirm,
    ) -> Result<MessageResponse, ApiError> {
        let endpoint = "auth/reset-password/confirm";
        let builder = self.client.post(self.url(endpoint)).json(request);
        self.send_json(builder, endpoint).await
    }
}

/// Build the shared HTTP client with user agent, JSON accept header and timeout
pub(crate) fn create_http_client(config: &ApiConfig) -> PlutoResult<reqwest::Client> {
    let mut headers = HeaderMap::new();

    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent).map_err(|e| PlutoError::Config {
            message: format!("Invalid user agent: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| PlutoError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}

/// Extract the server's `detail` message from an error body.
///
/// `detail` is either a string or a list of validation entries with `msg`.
pub(crate) fn parse_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    match value.get("detail")? {
        Value::String(detail) if !detail.is_empty() => Some(detail.clone()),
        Value::Array(entries) => {
            let messages: Vec<&str> = entries
                .iter()
                .filter_map(|entry| entry.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}
