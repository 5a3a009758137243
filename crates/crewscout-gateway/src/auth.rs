use std::collections::HashMap;

use axum::extract::Query;
use axum::http::Uri;

use crewscout_core::config::GatewayConfig;

/// Check a request's credentials against `gateway.token`.
///
/// With no token configured every request passes. Otherwise a Bearer header,
/// when present, must match; without one the `?token=` query parameter must.
pub fn validate_auth(
    config: &GatewayConfig,
    bearer: Option<&str>,
    query_token: Option<&str>,
) -> bool {
    let Some(expected) = config.token.as_deref() else {
        return true;
    };

    match bearer {
        Some(b) => b == expected,
        None => query_token == Some(expected),
    }
}

/// Extract the percent-decoded `?token=` value from a request URI.
pub fn extract_token_from_query(uri: &Uri) -> Option<String> {
    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.remove("token")
}
