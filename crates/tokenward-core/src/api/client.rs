//! API client that keeps requests authenticated.
//!
//! `ApiClient::execute` attaches the session's bearer token, and when the
//! server answers 401 it recovers through the `TokenRefresher` and sends the
//! original request once more. A second 401 is returned to the caller as-is;
//! there is never more than one retry.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::{
    SessionExpiryHandler, SessionSnapshot, SessionStore, SessionTerminator, TokenPair, UserRecord,
};
use crate::config::Config;

use super::{ApiError, TokenRefresher};

/// Username and password sent to the login endpoint.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
    #[serde(default)]
    user: Option<UserRecord>,
}

/// One logical request, kept around so it can be sent a second time.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    /// `path` is resolved against the configured base URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A fully read response. Non-2xx statuses are not errors at this level.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    async fn read(response: reqwest::Response) -> Result<Self, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON body: {}", e)))
    }

    /// Turn a non-2xx response into the matching `ApiError`
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.text()))
        }
    }
}

/// Clone is cheap - the HTTP client, store and refresher are all shared.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    login_url: Url,
    store: Arc<SessionStore>,
    terminator: SessionTerminator,
    refresher: TokenRefresher,
}

impl ApiClient {
    pub fn new(
        config: &Config,
        store: Arc<SessionStore>,
        handler: Arc<dyn SessionExpiryHandler>,
    ) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        let terminator = SessionTerminator::new(store.clone(), handler);
        let refresher = TokenRefresher::new(
            http.clone(),
            config.endpoint_url(&config.refresh_path)?,
            terminator.clone(),
        );

        Ok(Self {
            http,
            base_url: config.base_url()?,
            login_url: config.endpoint_url(&config.login_path)?,
            store,
            terminator,
            refresher,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    /// What the UI reads: authentication flag and user
    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn set_user(&self, user: Option<UserRecord>) {
        self.store.set_user(user);
    }

    /// Log in and establish the session. On failure the session is left untouched.
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionSnapshot, ApiError> {
        let response = self
            .http
            .post(self.login_url.clone())
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::login_rejected(status, &body));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse login response: {}", e)))?;

        self.store
            .establish(TokenPair::new(login.access, login.refresh), login.user);
        info!(username = %credentials.username, "Logged in");
        Ok(self.store.snapshot())
    }

    pub fn logout(&self) {
        self.terminator.logout();
    }

    /// Send `request` with the current access token, recovering once from a 401.
    ///
    /// Responses other than 401 and transport errors are returned untouched.
    /// When recovery is impossible the session is terminated and the original
    /// 401 response is returned.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.store.access_token();
        let response = self.send(request, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(method = %request.method, path = %request.path, "Request unauthorized, refreshing token");
        match self.refresher.recover(token.as_deref()).await {
            Some(fresh) => self.send(request, Some(&fresh)).await,
            None => Ok(response),
        }
    }

    /// GET `path` and decode a successful JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(&ApiRequest::get(path))
            .await?
            .error_for_status()?
            .json()
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError> {
        let url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", request.path, e)))?;

        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        ApiResponse::read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::post("/rooms/")
            .query("floor", "2")
            .json(json!({"name": "A-101"}));

        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/rooms/");
        assert_eq!(request.query, vec![("floor".to_string(), "2".to_string())]);
        assert_eq!(request.body, Some(json!({"name": "A-101"})));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("dilnoza", "hunter2"));
        assert!(rendered.contains("dilnoza"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_login_response_user_is_optional() {
        let login: LoginResponse = serde_json::from_str(r#"{"access":"A1","refresh":"R1"}"#).unwrap();
        assert_eq!(login.access, "A1");
        assert!(login.user.is_none());
    }

    #[test]
    fn test_response_error_for_status() {
        let response = ApiResponse {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: b"missing".to_vec(),
        };
        assert!(matches!(
            response.error_for_status(),
            Err(ApiError::Status { status: StatusCode::NOT_FOUND, body }) if body == "missing"
        ));
    }

    #[test]
    fn test_response_json() {
        let response = ApiResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: br#"{"id": 3}"#.to_vec(),
        };
        let value: Value = response.json().unwrap();
        assert_eq!(value["id"], 3);
        assert!(response.json::<Vec<u8>>().is_err());
    }
}
