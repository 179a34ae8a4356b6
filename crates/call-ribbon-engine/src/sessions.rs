//! Call session operations.
//!
//! This module provides session creation, direct transitions, lookups and
//! filtered queries. Sessions are created once, change only through
//! events, and are never deleted.

use call_ribbon_core::{SessionId, TenantId};
use call_ribbon_store::{CallSession, CallState, Store, StoreError};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::events::{self, PendingEvent, RejectPolicy};
use crate::types::{CreateSessionRequest, EngineConfig, SessionFilter, SessionPage, TransitionRequest};
use crate::{accounting, customers, tenants};

/// Source tag of events applied through [`transition`].
pub const TRANSITION_SOURCE: &str = "engine";

/// Create a call session in `initiated`.
///
/// Creation is idempotent on the provider call ID: if the tenant already has
/// a session for it, that session is returned unchanged.
///
/// # Errors
///
/// Returns:
/// - `EngineError::InvalidTenant` if the tenant is unknown or suspended
/// - `EngineError::QuotaExceeded` if the monthly quota is used up
/// - `EngineError::UnknownCustomer` if the referenced customer doesn't exist
/// - `EngineError::InvalidRequest` if the call ID is empty
pub fn create_session<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    request: CreateSessionRequest,
    now: DateTime<Utc>,
) -> Result<CallSession> {
    let tenant = tenants::get_tenant(store, tenant_id)?;
    tenants::require_active(&tenant)?;

    let external_call_id = request.external_call_id.trim().to_string();
    if external_call_id.is_empty() {
        return Err(EngineError::InvalidRequest(
            "external_call_id must not be empty".into(),
        ));
    }

    if let Some(existing) = store.get_session_by_external_call_id(tenant_id, &external_call_id)? {
        debug!(session_id = %existing.session_id, "Session already exists for call");
        return Ok(existing);
    }

    accounting::check_and_reserve(store, &tenant, now)?;

    let customer_id = match (request.customer_id, request.customer_external_id.as_deref()) {
        (Some(customer_id), _) => {
            store
                .get_customer(&customer_id)?
                .filter(|c| c.tenant_id == *tenant_id)
                .ok_or_else(|| EngineError::UnknownCustomer(customer_id.to_string()))?;
            Some(customer_id)
        }
        (None, Some(external_id)) if !external_id.is_empty() => Some(
            store
                .get_customer_by_external_id(tenant_id, external_id)?
                .ok_or_else(|| EngineError::UnknownCustomer(external_id.to_string()))?
                .customer_id,
        ),
        _ => None,
    };

    let session = CallSession {
        session_id: SessionId::generate(),
        tenant_id: *tenant_id,
        customer_id,
        external_call_id,
        phone_number: customers::normalize_phone(&request.phone_number),
        direction: request.direction,
        call_type: request.call_type,
        state: CallState::Initiated,
        agent_id: request.agent_id,
        agent_name: request.agent_name,
        initiated_at: now,
        ringing_at: None,
        connected_at: None,
        ended_at: None,
        duration_seconds: None,
        end_reason: None,
        metadata: request.metadata,
        event_count: 0,
        updated_at: now,
    };

    match store.insert_session(&session) {
        Ok(()) => {}
        // Lost a race against a concurrent create of the same call
        Err(StoreError::AlreadyExists) => {
            return store
                .get_session_by_external_call_id(tenant_id, &session.external_call_id)?
                .ok_or_else(|| EngineError::Internal("call id index points nowhere".into()));
        }
        Err(e) => return Err(e.into()),
    }

    info!(
        session_id = %session.session_id,
        tenant_id = %tenant_id,
        direction = session.direction.as_str(),
        "Call session created"
    );
    Ok(session)
}

/// Apply a lifecycle event to a session.
///
/// A terminal event on an already-terminal session is a no-op that returns
/// the existing record.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the session doesn't belong to
/// the tenant and `EngineError::IllegalTransition` if the event is not legal
/// in the session's state; the session is left unchanged.
pub fn transition<S: Store>(
    store: &S,
    config: &EngineConfig,
    tenant_id: &TenantId,
    session_id: &SessionId,
    request: TransitionRequest,
    now: DateTime<Utc>,
) -> Result<CallSession> {
    get_session(store, tenant_id, session_id)?;

    let pending = PendingEvent {
        event_type: request.event_type,
        payload: request.payload,
        source: request
            .source
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| TRANSITION_SOURCE.to_string()),
        domain: None,
        reported_at: request.timestamp,
    };
    let receipt = events::apply_event(store, config, session_id, &pending, RejectPolicy::Refuse, now)?;
    Ok(receipt.session)
}

/// Get a session of a tenant.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the session doesn't exist or
/// belongs to another tenant.
pub fn get_session<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    session_id: &SessionId,
) -> Result<CallSession> {
    store
        .get_session(session_id)?
        .filter(|session| session.tenant_id == *tenant_id)
        .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
}

/// Query a tenant's sessions, newest first.
///
/// # Errors
///
/// Returns `EngineError::InvalidRange` if the window is inverted.
pub fn query_sessions<S: Store>(
    store: &S,
    config: &EngineConfig,
    tenant_id: &TenantId,
    filter: &SessionFilter,
) -> Result<SessionPage> {
    filter.range.validate()?;
    let limit = filter
        .limit
        .unwrap_or(config.default_page_size)
        .clamp(1, config.max_page_size.max(1));

    let matching = matching_sessions(store, tenant_id, filter)?;
    let total = matching.len();
    let sessions = matching
        .into_iter()
        .skip(filter.offset)
        .take(limit)
        .collect();

    Ok(SessionPage {
        sessions,
        total,
        offset: filter.offset,
        limit,
    })
}

/// All sessions of a tenant matching `filter`, newest first, ignoring paging.
pub(crate) fn matching_sessions<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    filter: &SessionFilter,
) -> Result<Vec<CallSession>> {
    let customer_id = match (filter.customer_id, filter.customer_external_id.as_deref()) {
        (Some(id), _) => Some(id),
        (None, Some(external_id)) => match store.get_customer_by_external_id(tenant_id, external_id)? {
            Some(customer) => Some(customer.customer_id),
            None => return Ok(Vec::new()),
        },
        (None, None) => None,
    };

    Ok(store
        .list_sessions_by_tenant(tenant_id, filter.range.start, filter.range.end)?
        .into_iter()
        .filter(|s| customer_id.map_or(true, |id| s.customer_id == Some(id)))
        .filter(|s| filter.direction.map_or(true, |d| s.direction == d))
        .filter(|s| filter.state.map_or(true, |state| s.state == state))
        .collect())
}

/// List a tenant's calls in progress, newest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list_active_sessions<S: Store>(store: &S, tenant_id: &TenantId) -> Result<Vec<CallSession>> {
    let mut sessions = store.list_active_sessions(tenant_id)?;
    sessions.sort_by(|a, b| b.initiated_at.cmp(&a.initiated_at));
    Ok(sessions)
}
