pub mod auth;
pub mod health;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

/// Build the full application router.
///
/// Route layout:
/// ```text
/// /health           GET    liveness
/// /auth             GET    start account linking (302 to provider)
/// /auth/callback    GET    provider redirect target (302 to frontend)
/// /auth/refresh     POST   refresh stored provider credentials (Bearer JWT)
/// ```
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/auth", get(auth::begin))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/refresh", post(auth::refresh))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_router_creates_router() {
        // Smoke test: ensure the router builds without panicking.
        let _router: Router<AppState> = build_router();
    }
}
