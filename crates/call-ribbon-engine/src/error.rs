//! Error types for the call engine.
//!
//! This module defines all errors that can occur during session lifecycle,
//! event ingestion, usage accounting and analytics operations.

use call_ribbon_core::{SessionId, TenantId};
use call_ribbon_store::{CallState, StoreError};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A result type using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The tenant is unknown, the API key is wrong, or the tenant is suspended.
    #[error("invalid tenant: {0}")]
    InvalidTenant(String),

    /// The widget origin is not on the tenant's allow-list.
    #[error("origin not allowed: {origin}")]
    OriginNotAllowed {
        /// The origin the request came from.
        origin: String,
    },

    /// The tenant has used up its monthly call quota.
    #[error("monthly call quota exceeded for tenant {tenant_id}: {used} of {limit} calls used, 0 remaining")]
    QuotaExceeded {
        /// The tenant that is over quota.
        tenant_id: TenantId,
        /// The monthly call limit.
        limit: u64,
        /// Calls already counted this month.
        used: u64,
    },

    /// No session matches the given reference.
    #[error("session not found: {0}")]
    UnknownSession(String),

    /// No customer matches the given reference.
    #[error("customer not found: {0}")]
    UnknownCustomer(String),

    /// The event is not legal in the session's current state.
    #[error("illegal transition for session {session_id}: cannot go from {from} to {to}")]
    IllegalTransition {
        /// The session being transitioned.
        session_id: SessionId,
        /// The current state.
        from: CallState,
        /// The requested target state.
        to: CallState,
    },

    /// A time range whose start lies after its end.
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange {
        /// Range start.
        start: DateTime<Utc>,
        /// Range end.
        end: DateTime<Utc>,
    },

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Concurrent writers kept winning the race for this session.
    #[error("session {0} is being modified concurrently")]
    Conflict(SessionId),

    /// A storage operation did not finish within the request timeout.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidTenant(_) => 401,
            Self::OriginNotAllowed { .. } => 403,
            Self::UnknownSession(_) | Self::UnknownCustomer(_) => 404,
            Self::IllegalTransition { .. } | Self::Conflict(_) => 409,
            Self::QuotaExceeded { .. } => 429,
            Self::InvalidRange { .. } | Self::InvalidRequest(_) => 400,
            Self::Timeout { .. } => 503,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Conflict(_) | Self::Store(_) | Self::Internal(_)
        )
    }
}
