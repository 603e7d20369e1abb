//! # HTTP Upstream Clients
//!
//! REST clients for the device repository, the permission search and the
//! import services. Every response is classified into an [`UpstreamError`]
//! so the cache can decide what to retry.
//!
//! ## Status Classification
//!
//! | Status | Error |
//! |--------|-------|
//! | 401 | `Unauthorized` |
//! | 403 | `Forbidden` |
//! | 404 | `NotFound` |
//! | 408, 429, 5xx, connect errors | `Transient` |
//! | other non-2xx | `Fatal` |
//! | undecodable body | `Invalid` |

use super::{
    Action, DeviceFilter, DeviceRepository, ImportRepository, PermissionOracle, ResourceKind,
    UpstreamError,
};
use async_trait::async_trait;
use device_selection_core::{
    Aspect, Concept, Device, DeviceGroup, DeviceType, Function, Import, ImportType,
};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Per-call timeout; the request deadline usually fires first.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// SHARED CLIENT
// =============================================================================

/// A JSON client bound to one base URL.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Create a client for `base_url`, sharing the connection pool of `http`.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a request with optional Bearer auth.
    fn request(&self, path: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.get(&url).timeout(CALL_TIMEOUT);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Send a request and handle connection errors.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, UpstreamError> {
        req.send()
            .await
            .map_err(|e| UpstreamError::Transient(format!("{}: {}", self.base_url, e)))
    }

    /// Check status codes and decode the JSON body.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
        what: &str,
    ) -> Result<T, UpstreamError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, what, body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("{}: {}", what, e)))
    }

    /// GET `path` and decode the body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> Result<T, UpstreamError> {
        let resp = self.send(self.request(path, token)).await?;
        self.handle_response(resp, path).await
    }

    /// GET `path` with query parameters and decode the body.
    pub async fn get_json_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<T, UpstreamError> {
        let resp = self.send(self.request(path, token).query(query)).await?;
        self.handle_response(resp, path).await
    }
}

/// Map a non-success status to an error kind.
pub fn classify_status(status: reqwest::StatusCode, what: &str, body: String) -> UpstreamError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED => UpstreamError::Unauthorized,
        StatusCode::FORBIDDEN => UpstreamError::Forbidden,
        StatusCode::NOT_FOUND => UpstreamError::NotFound(what.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            UpstreamError::Transient(format!("{} ({})", what, status.as_u16()))
        }
        s if s.is_server_error() => {
            UpstreamError::Transient(format!("{} ({}): {}", what, s.as_u16(), body))
        }
        s => UpstreamError::Fatal(format!("{} ({}): {}", what, s.as_u16(), body)),
    }
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

// =============================================================================
// DEVICE REPOSITORY
// =============================================================================

pub struct HttpDeviceRepository {
    client: HttpClient,
}

impl HttpDeviceRepository {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceRepository for HttpDeviceRepository {
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, UpstreamError> {
        let mut query = Vec::new();
        let function_ids = filter.function_ids();
        if !function_ids.is_empty() {
            query.push(("function_ids", function_ids.join(",")));
        }
        if let Some(ids) = &filter.ids {
            query.push(("ids", ids.join(",")));
        }
        self.client.get_json_query("/devices", &query, None).await
    }

    async fn device(&self, id: &str) -> Result<Device, UpstreamError> {
        self.client
            .get_json(&format!("/devices/{}", segment(id)), None)
            .await
    }

    async fn device_type(&self, id: &str) -> Result<DeviceType, UpstreamError> {
        self.client
            .get_json(&format!("/device-types/{}", segment(id)), None)
            .await
    }

    async fn list_device_types(&self) -> Result<Vec<DeviceType>, UpstreamError> {
        self.client.get_json("/device-types", None).await
    }

    async fn list_aspects(&self) -> Result<Vec<Aspect>, UpstreamError> {
        self.client.get_json("/aspects", None).await
    }

    async fn list_functions(&self) -> Result<Vec<Function>, UpstreamError> {
        self.client.get_json("/functions", None).await
    }

    async fn list_concepts(&self) -> Result<Vec<Concept>, UpstreamError> {
        self.client.get_json("/concepts", None).await
    }

    async fn list_device_groups(&self) -> Result<Vec<DeviceGroup>, UpstreamError> {
        self.client.get_json("/device-groups", None).await
    }
}

// =============================================================================
// PERMISSION SEARCH
// =============================================================================

pub struct HttpPermissionOracle {
    client: HttpClient,
}

impl HttpPermissionOracle {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PermissionOracle for HttpPermissionOracle {
    async fn check(
        &self,
        token: &str,
        kind: ResourceKind,
        id: &str,
        action: Action,
    ) -> Result<bool, UpstreamError> {
        let path = format!("/check/{}/{}", kind, segment(id));
        self.client
            .get_json_query(&path, &[("action", action.as_str().to_string())], Some(token))
            .await
    }

    async fn list_readable(
        &self,
        token: &str,
        kind: ResourceKind,
    ) -> Result<Vec<String>, UpstreamError> {
        let path = format!("/accessible/{}", kind);
        self.client
            .get_json_query(&path, &[("action", Action::Read.as_str().to_string())], Some(token))
            .await
    }
}

// =============================================================================
// IMPORTS
// =============================================================================

/// Import types come from the import repository, running instances from
/// the import deployment service.
pub struct HttpImportRepository {
    types: HttpClient,
    instances: HttpClient,
}

impl HttpImportRepository {
    pub fn new(types: HttpClient, instances: HttpClient) -> Self {
        Self { types, instances }
    }
}

#[async_trait]
impl ImportRepository for HttpImportRepository {
    async fn list_import_types(&self, token: &str) -> Result<Vec<ImportType>, UpstreamError> {
        self.types.get_json("/import-types", Some(token)).await
    }

    async fn list_imports(&self, token: &str) -> Result<Vec<Import>, UpstreamError> {
        self.instances.get_json("/instances", Some(token)).await
    }
}

// =============================================================================
// TESTS
// =============================================================================
