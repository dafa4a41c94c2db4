//! Identity middleware
//!
//! Verifies and decodes the signed hub session cookie, rejects expired
//! records and attaches the admitted [`HubUser`] to the request.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::AppState;
use crate::identity::{cookie_value, AuthRecord};

pub async fn require_user(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let record = cookie_value(request.headers(), &state.config.auth.cookie_name)
        .and_then(|value| AuthRecord::decode(value, &state.config.auth.cookie_secret));
    let Some(record) = record else {
        debug!(path = %request.uri().path(), "Missing, unsigned or malformed session cookie");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if record.is_expired(chrono::Utc::now().timestamp()) {
        debug!(user = %record.name, "Session cookie expired");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.authenticator.admit(&record).await {
        Ok(Some(user)) => {
            state.controller.remember(&user).await;
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => e.into_response(),
    }
}
