//! Tenant extraction.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the gateway has stamped the caller's numeric id into
//! `x-user-id`. Everything below the handlers works on the derived
//! [`TenantRoot`] only.

use crate::{errors::AppError, services::path_canonicalizer::TenantRoot};
use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's storage root, resolved from the trusted identity header.
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantRoot);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| AppError::unauthorized("missing or invalid user identity"))?;

        Ok(Tenant(TenantRoot::for_user(user_id)))
    }
}
