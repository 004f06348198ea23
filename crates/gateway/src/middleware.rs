//! Middleware for authentication and other cross-cutting concerns

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::state::GatewayState;

/// Extract a bearer token from the `Authorization` header or, for
/// WebSocket connections where headers are awkward, from a `token` query
/// parameter.
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::to_owned);

    if header_token.is_some() {
        return header_token;
    }

    query.and_then(|query| {
        query.split('&').find_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some("token"), Some(value)) => {
                    Some(urlencoding::decode(value).ok()?.into_owned())
                }
                _ => None,
            }
        })
    })
}

/// Authentication middleware that resolves the bearer credential to a
/// [`studycircle_auth::UserIdentity`] and stores it in request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let token = extract_token(request.headers(), request.uri().query()).ok_or_else(|| {
        GatewayError::AuthenticationFailed("missing authentication token".to_string())
    })?;

    let (identity, _session) = state.authenticator.authenticate_token(&token).await?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
