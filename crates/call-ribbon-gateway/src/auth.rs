//! Authentication extractors.
//!
//! Tenant endpoints authenticate with the tenant's API key in the
//! `x-api-key` header. Admin endpoints take the operator token as
//! `Authorization: Bearer <token>`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use call_ribbon_engine::{tenants, CallEngine, Tenant, TenantId};

use crate::error::ApiError;
use crate::state::GatewayState;

/// Header carrying a tenant API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// An authenticated, active tenant.
#[derive(Debug, Clone)]
pub struct TenantAuth {
    /// The tenant record.
    pub tenant: Tenant,
}

impl TenantAuth {
    /// The tenant's identifier.
    #[must_use]
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant.tenant_id
    }
}

#[async_trait]
impl<E> FromRequestParts<Arc<GatewayState<E>>> for TenantAuth
where
    E: CallEngine + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<E>>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {API_KEY_HEADER} header")))?;

        let tenant = state.engine.authenticate(api_key).await?;
        tenants::require_active(&tenant)?;

        Ok(Self { tenant })
    }
}

/// An operator authenticated with the admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl<E> FromRequestParts<Arc<GatewayState<E>>> for AdminAuth
where
    E: CallEngine + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<E>>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_deref() else {
            return Err(ApiError::Forbidden("admin access is disabled".into()));
        };

        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("missing admin token".into()))?;

        if tokens_match(token, expected) {
            Ok(Self)
        } else {
            tracing::warn!("Rejected admin request with a wrong token");
            Err(ApiError::Unauthorized("invalid admin token".into()))
        }
    }
}

/// Compare tokens through their hashes; `blake3::Hash` equality is constant-time.
fn tokens_match(given: &str, expected: &str) -> bool {
    blake3::hash(given.as_bytes()) == blake3::hash(expected.as_bytes())
}
