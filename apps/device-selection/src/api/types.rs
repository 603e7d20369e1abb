//! # API Request/Response Types
//!
//! Query structures, criteria decoding and the JSON error body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use device_selection_core::{FilterCriterion, Interaction, SelectionError, SelectionOptions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body: `{ "error": kind, "detail": message }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
}

/// A request failure rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SelectionError);

impl From<SelectionError> for ApiError {
    fn from(e: SelectionError) -> Self {
        Self(e)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.0 {
            SelectionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SelectionError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SelectionError::Forbidden(_) => StatusCode::FORBIDDEN,
            SelectionError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SelectionError::UpstreamInvalid(_) => StatusCode::BAD_GATEWAY,
            SelectionError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            SelectionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(event = "request_failed", kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(event = "request_rejected", kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// CRITERIA DECODING
// =============================================================================

fn bad_request(msg: impl Into<String>) -> SelectionError {
    SelectionError::BadRequest(msg.into())
}

/// Decode criteria from the `json` or `base64` query parameter.
///
/// `json` arrives URL-decoded. `base64` may be standard or URL-safe, padded
/// or not; a `+` turned into a space by form decoding is restored.
pub fn decode_criteria(
    json: Option<&str>,
    base64: Option<&str>,
) -> Result<Option<Vec<FilterCriterion>>, SelectionError> {
    let raw: Vec<u8> = match (json, base64) {
        (Some(json), _) => json.as_bytes().to_vec(),
        (None, Some(encoded)) => {
            let encoded = encoded.trim().replace(' ', "+");
            [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
                .iter()
                .find_map(|engine| engine.decode(&encoded).ok())
                .ok_or_else(|| bad_request("criteria are not valid base64"))?
        }
        (None, None) => return Ok(None),
    };
    let criteria: Vec<FilterCriterion> = serde_json::from_slice(&raw)
        .map_err(|e| bad_request(format!("criteria are not valid JSON: {}", e)))?;
    Ok(Some(criteria))
}

/// Decode a JSON request body, reporting failures as bad requests.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, SelectionError> {
    serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid request body: {}", e)))
}

/// Split a comma separated query value, dropping empty items.
#[must_use]
pub fn split_list(value: Option<&str>) -> Option<Vec<String>> {
    value.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn parse_interactions(value: Option<&str>) -> Result<Vec<Interaction>, SelectionError> {
    split_list(value)
        .unwrap_or_default()
        .iter()
        .map(|s| s.replace(' ', "+").parse::<Interaction>().map_err(bad_request))
        .collect()
}

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// `GET /selectables`: one criterion in the query, or `json`/`base64`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacySelectablesQuery {
    pub json: Option<String>,
    pub base64: Option<String>,
    pub function_id: Option<String>,
    pub device_class_id: Option<String>,
    pub aspect_id: Option<String>,
    pub filter_protocols: Option<String>,
    pub complete_services: Option<bool>,
}

impl LegacySelectablesQuery {
    pub fn criteria(&self) -> Result<Vec<FilterCriterion>, SelectionError> {
        if let Some(criteria) = decode_criteria(self.json.as_deref(), self.base64.as_deref())? {
            return Ok(criteria);
        }
        match &self.function_id {
            Some(function_id) if !function_id.is_empty() => Ok(vec![FilterCriterion {
                function_id: function_id.clone(),
                aspect_id: self.aspect_id.clone().unwrap_or_default(),
                device_class_id: self.device_class_id.clone().unwrap_or_default(),
                interaction: None,
            }]),
            _ => Err(bad_request("criteria must not be empty")),
        }
    }

    /// Legacy requests only ever select devices.
    #[must_use]
    pub fn options(&self) -> SelectionOptions {
        SelectionOptions {
            filter_protocols: split_list(self.filter_protocols.as_deref()).unwrap_or_default(),
            complete_services: self.complete_services.unwrap_or(false),
            ..SelectionOptions::default()
        }
    }
}

/// Flags shared by `GET /v2/selectables` and `POST /v2/query/selectables`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectablesQuery {
    pub json: Option<String>,
    pub base64: Option<String>,
    pub include_devices: Option<bool>,
    pub include_groups: Option<bool>,
    pub include_imports: Option<bool>,
    pub include_id_modified: Option<bool>,
    pub filter_interaction: Option<String>,
    pub filter_protocols: Option<String>,
    pub with_device_ids: Option<String>,
    pub with_local_device_ids: Option<String>,
    pub local_device_owner: Option<String>,
    pub complete_services: Option<bool>,
    pub trim_path_prefix: Option<bool>,
}

impl SelectablesQuery {
    pub fn options(&self) -> Result<SelectionOptions, SelectionError> {
        let defaults = SelectionOptions::default();
        Ok(SelectionOptions {
            include_devices: self.include_devices.unwrap_or(defaults.include_devices),
            include_groups: self.include_groups.unwrap_or(defaults.include_groups),
            include_imports: self.include_imports.unwrap_or(defaults.include_imports),
            include_id_modified: self.include_id_modified.unwrap_or(defaults.include_id_modified),
            filter_interaction: parse_interactions(self.filter_interaction.as_deref())?,
            filter_protocols: split_list(self.filter_protocols.as_deref()).unwrap_or_default(),
            with_device_ids: split_list(self.with_device_ids.as_deref()),
            with_local_device_ids: split_list(self.with_local_device_ids.as_deref()),
            local_device_owner: self.local_device_owner.clone().unwrap_or_default(),
            complete_services: self.complete_services.unwrap_or(defaults.complete_services),
            trim_path_prefix: self.trim_path_prefix.unwrap_or(defaults.trim_path_prefix),
        })
    }

    /// Criteria from `json`/`base64`; absent is a bad request.
    pub fn criteria(&self) -> Result<Vec<FilterCriterion>, SelectionError> {
        decode_criteria(self.json.as_deref(), self.base64.as_deref())?
            .ok_or_else(|| bad_request("criteria must not be empty"))
    }
}

/// `POST /device-group-helper`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupHelperQuery {
    pub maintains_group_usability: Option<bool>,
}

/// `GET /device-types`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceTypesQuery {
    pub include_id_modified: Option<bool>,
    pub filter: Option<String>,
}

impl DeviceTypesQuery {
    /// Criteria from `filter`; absent or empty keeps every type.
    pub fn criteria(&self) -> Result<Vec<FilterCriterion>, SelectionError> {
        Ok(decode_criteria(self.filter.as_deref(), None)?.unwrap_or_default())
    }

    #[must_use]
    pub fn options(&self) -> SelectionOptions {
        SelectionOptions {
            include_id_modified: self.include_id_modified.unwrap_or(false),
            ..SelectionOptions::default()
        }
    }
}

/// `POST /invalidations` answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationResponse {
    pub accepted: bool,
    pub families: Vec<String>,
}
