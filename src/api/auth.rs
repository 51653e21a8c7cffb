//! Bearer token authentication middleware

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use super::{error::ApiError, AppState};

/// Reject requests without the configured bearer token.
///
/// With no token configured, requests are refused unless the service was
/// started with anonymous access allowed.
pub async fn bearer_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        if state.allow_anonymous {
            return Ok(next.run(request).await);
        }
        tracing::error!(path = %request.uri().path(), "no API token configured, refusing request");
        return Err(ApiError::unauthorized());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "invalid bearer token provided");
            Err(ApiError::unauthorized())
        }
        None => {
            tracing::debug!(path = %request.uri().path(), "no bearer token provided");
            Err(ApiError::unauthorized())
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
