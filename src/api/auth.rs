//! Handlers for the three linking entry points.
//!
//! These stay thin: parameter extraction and response shaping only. The
//! state machine lives in [`crate::flow`].

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::flow::{CallbackParams, RefreshOutcome};
use crate::AppState;

/// GET /auth
///
/// Starts the linking flow: 302 to the provider authorization page.
pub async fn begin(State(state): State<AppState>) -> Response {
    redirect(&state.link.begin())
}

/// GET /auth/callback?code=&state=&error=
///
/// Provider redirect target: 302 to the frontend success or error landing
/// page. Never returns anything but a redirect.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    redirect(&state.link.complete(&params).await)
}

/// POST /auth/refresh
///
/// Requires `Authorization: Bearer <session token>`. Refreshes the stored
/// provider credentials if they are near expiry.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let outcome = state.link.refresh(auth_header).await?;
    let body = match outcome {
        RefreshOutcome::StillValid => json!({ "message": "Token still valid" }),
        RefreshOutcome::Refreshed { expires_at } => json!({
            "message": "Token refreshed successfully",
            "expires_at": expires_at,
        }),
    };

    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Plain 302 with a Location header.
fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
