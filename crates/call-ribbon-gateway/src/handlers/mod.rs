//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the gateway API.

pub mod admin;
pub mod customers;
pub mod health;
pub mod reports;
pub mod ribbon;
pub mod sessions;

use call_ribbon_core::{SessionId, TenantId};

use crate::error::ApiError;

/// Parse a session ID from a path segment.
pub(crate) fn parse_session_id(s: &str) -> Result<SessionId, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid session ID: {s}")))
}

/// Parse a tenant ID from a path segment.
pub(crate) fn parse_tenant_id(s: &str) -> Result<TenantId, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid tenant ID: {s}")))
}
