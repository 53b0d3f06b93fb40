use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use crate::errors::{AppError, ErrorCode};
use crate::types::auth::{parse_bearer, AuthUser, TokenVerifier};

/// Router state that can verify bearer credentials.
pub trait AuthState {
    fn token_verifier(&self) -> &TokenVerifier;
}

impl<T: AuthState> AuthState for Arc<T> {
    fn token_verifier(&self) -> &TokenVerifier {
        (**self).token_verifier()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: AuthState + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        state.token_verifier().verify(token)
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    parse_bearer(auth_header)
}
