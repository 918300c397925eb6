//! Tenant identity handed over by the fronting auth layer.

use crate::{errors::AppError, services::keys::KeyDeriver, state::AppState};
use axum::{extract::FromRequestParts, http::request::Parts};

/// The authenticated tenant, read from the configured header.
#[derive(Debug, Clone)]
pub struct Tenant(pub String);

impl Tenant {
    pub fn keys(&self) -> KeyDeriver {
        KeyDeriver::for_tenant(self.0.as_str())
    }
}

impl FromRequestParts<AppState> for Tenant {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(&state.tenant_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Tenant(value.to_string()))
            .ok_or_else(|| {
                AppError::forbidden(
                    "auth",
                    format!("missing tenant header `{}`", state.tenant_header),
                )
            })
    }
}
