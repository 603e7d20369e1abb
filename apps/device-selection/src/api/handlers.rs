//! # API Endpoint Handlers

use super::{
    AppState,
    auth::{Token, tokens_match},
    types::{
        ApiError, DeviceTypesQuery, GroupHelperQuery, HealthResponse, InvalidationResponse,
        LegacySelectablesQuery, SelectablesQuery, parse_body,
    },
};
use crate::invalidation::InvalidationEvent;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use device_selection_core::{
    DeviceGroupFilterCriterion, DeviceType, FilterCriterion, GroupHelperResult, Selectable,
    SelectionError,
};

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// SELECTABLES
// =============================================================================

/// `GET /selectables`: devices only, legacy parameters.
pub async fn legacy_selectables_handler(
    State(state): State<AppState>,
    Extension(Token(token)): Extension<Token>,
    Query(query): Query<LegacySelectablesQuery>,
) -> Result<Json<Vec<Selectable>>, ApiError> {
    let criteria = query.criteria()?;
    let selectables = state
        .engine
        .selectables(&token, &criteria, &query.options())
        .await?;
    Ok(Json(selectables))
}

/// `GET /v2/selectables`: criteria in `json` or `base64`.
pub async fn selectables_handler(
    State(state): State<AppState>,
    Extension(Token(token)): Extension<Token>,
    Query(query): Query<SelectablesQuery>,
) -> Result<Json<Vec<Selectable>>, ApiError> {
    let criteria = query.criteria()?;
    let options = query.options()?;
    let selectables = state.engine.selectables(&token, &criteria, &options).await?;
    Ok(Json(selectables))
}

/// `POST /v2/query/selectables`: criteria in the body.
pub async fn query_selectables_handler(
    State(state): State<AppState>,
    Extension(Token(token)): Extension<Token>,
    Query(query): Query<SelectablesQuery>,
    body: Bytes,
) -> Result<Json<Vec<Selectable>>, ApiError> {
    let criteria: Vec<FilterCriterion> = parse_body(&body)?;
    let options = query.options()?;
    let selectables = state.engine.selectables(&token, &criteria, &options).await?;
    Ok(Json(selectables))
}

// =============================================================================
// DEVICE GROUPS
// =============================================================================

/// `POST /device-group-helper`: body is the current member ids.
pub async fn group_helper_handler(
    State(state): State<AppState>,
    Extension(Token(token)): Extension<Token>,
    Query(query): Query<GroupHelperQuery>,
    body: Bytes,
) -> Result<Json<GroupHelperResult>, ApiError> {
    let device_ids: Vec<String> = parse_body(&body)?;
    let result = state
        .engine
        .group_helper(
            &token,
            &device_ids,
            query.maintains_group_usability.unwrap_or(false),
        )
        .await?;
    Ok(Json(result))
}

/// `POST /device-group-criteria`: body is the member ids.
pub async fn group_criteria_handler(
    State(state): State<AppState>,
    Extension(Token(token)): Extension<Token>,
    body: Bytes,
) -> Result<Json<Vec<DeviceGroupFilterCriterion>>, ApiError> {
    let device_ids: Vec<String> = parse_body(&body)?;
    let criteria = state
        .engine
        .device_group_criteria(&token, &device_ids)
        .await?;
    Ok(Json(criteria))
}

// =============================================================================
// DEVICE TYPES
// =============================================================================

/// `GET /device-types`.
pub async fn device_types_handler(
    State(state): State<AppState>,
    Query(query): Query<DeviceTypesQuery>,
) -> Result<Json<Vec<DeviceType>>, ApiError> {
    let criteria = query.criteria()?;
    let device_types = state
        .engine
        .device_types(&criteria, &query.options())
        .await?;
    Ok(Json(device_types))
}

// =============================================================================
// INVALIDATION
// =============================================================================

/// `POST /invalidations`: publish a catalog change on the bus.
pub async fn invalidation_handler(
    State(state): State<AppState>,
    Extension(Token(token)): Extension<Token>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(expected) = &state.invalidation_token
        && !tokens_match(&token, expected)
    {
        tracing::warn!(
            event = "auth_failure",
            reason = "invalid_invalidation_token",
            "Invalidation rejected"
        );
        return Err(ApiError(SelectionError::Forbidden(
            "token may not publish invalidations".into(),
        )));
    }
    let event: InvalidationEvent = parse_body(&body)?;
    let families: Vec<String> = event
        .families()
        .iter()
        .map(|f| f.as_str().to_string())
        .collect();
    let accepted = !families.is_empty();
    if accepted {
        state.bus.publish(event);
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(InvalidationResponse { accepted, families }),
    ))
}
