use crate::error::ApiError;
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use imago::access::AccessControl;
use serde::Deserialize;

/// The public key a request authenticates as.
///
/// Taken from the `X-Public-Key` header, falling back to the `publicKey`
/// query parameter. Verifying the request signature against the paired
/// private key is left to a fronting layer; this service decides what the
/// claimed key may do.
pub struct RequesterKey(pub String);

#[derive(Deserialize, Default)]
struct AuthParams {
    #[serde(rename = "publicKey")]
    public_key: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for RequesterKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts
            .headers
            .get("x-public-key")
            .and_then(|v| v.to_str().ok())
        {
            return Ok(RequesterKey(value.to_string()));
        }

        let auth = Query::<AuthParams>::try_from_uri(&parts.uri)
            .map(|Query(params)| params)
            .unwrap_or_default();

        auth.public_key
            .map(RequesterKey)
            .ok_or(ApiError::MissingPublicKey)
    }
}

/// Gates a handler on the access-control decision.
///
/// `Ok(false)` from the backend becomes [`ApiError::AccessDenied`]; a
/// backend failure propagates as an internal error and is never treated as
/// a denial.
pub async fn ensure_access(
    access: &dyn AccessControl,
    requester: &RequesterKey,
    resource: &str,
    user: Option<&str>,
) -> Result<(), ApiError> {
    if access.has_access(&requester.0, resource, user).await? {
        Ok(())
    } else {
        Err(ApiError::AccessDenied)
    }
}
