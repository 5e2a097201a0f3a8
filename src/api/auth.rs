//! Bearer token authentication for every route except `/health`

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::error::ApiError;
use super::AppState;

pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    let Some(token) = token else {
        return Err(ApiError::unauthorized("missing bearer token"));
    };

    if !token_matches(token, &state.api_key) {
        warn!("rejected request to {} with invalid token", request.uri().path());
        return Err(ApiError::forbidden("invalid API key"));
    }

    Ok(next.run(request).await)
}

fn token_matches(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}
