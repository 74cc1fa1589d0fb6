use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, header::WWW_AUTHENTICATE, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::{SCOPE_READ, SCOPE_WRITE};
use crate::server::AppState;
use crate::types::Actor;

/// The caller's actor, anonymous when no valid credentials were presented.
pub struct OptionalActor(pub Actor);

/// Extractor that requires an authenticated caller holding `assets:read`.
pub struct RequireRead(pub Actor);

/// Extractor that requires an authenticated caller holding `assets:write`.
pub struct RequireWrite(pub Actor);

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    MissingScope(&'static str),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            AuthError::InvalidScheme => (
                StatusCode::UNAUTHORIZED,
                "Invalid authorization scheme".to_string(),
            ),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
            AuthError::MissingScope(scope) => (
                StatusCode::FORBIDDEN,
                format!("Missing required scope: {scope}"),
            ),
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"trove\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for OptionalActor {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match authenticate(parts, state) {
            Ok(actor) => Ok(OptionalActor(actor)),
            Err(e) => {
                tracing::debug!("Treating caller as anonymous: {e:?}");
                Ok(OptionalActor(Actor::anonymous()))
            }
        }
    }
}

impl FromRequestParts<Arc<AppState>> for RequireRead {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let actor = require_scope(parts, state, SCOPE_READ)?;
        Ok(RequireRead(actor))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireWrite {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let actor = require_scope(parts, state, SCOPE_WRITE)?;
        Ok(RequireWrite(actor))
    }
}

fn require_scope(
    parts: &Parts,
    state: &Arc<AppState>,
    scope: &'static str,
) -> Result<Actor, AuthError> {
    let actor = authenticate(parts, state)?;
    if !actor.has_scope(scope) {
        return Err(AuthError::MissingScope(scope));
    }
    Ok(actor)
}

fn authenticate(parts: &Parts, state: &Arc<AppState>) -> Result<Actor, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuth)?;

    let token = bearer_token(header)?;

    state
        .identity
        .authenticate(token)
        .ok_or(AuthError::InvalidToken)
}

fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::InvalidScheme)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidScheme);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(token)
}
