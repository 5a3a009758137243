use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use crate::auth;
use crate::state::AppState;

/// Extractor that validates authentication via Bearer header or query token.
pub struct Authenticated;

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = StatusCode;

    fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let bearer = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "));

        let query_token = auth::extract_token_from_query(&parts.uri);

        let ok = auth::validate_auth(&state.config, bearer, query_token.as_deref());

        async move {
            if ok {
                Ok(Authenticated)
            } else {
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}
