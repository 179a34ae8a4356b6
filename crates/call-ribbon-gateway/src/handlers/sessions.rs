//! Call session endpoints.
//!
//! This module provides handlers for session creation, lifecycle events,
//! queries, the per-session event log and call notes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use call_ribbon_engine::{
    AddNoteRequest, CallDirection, CallEngine, CallEvent, CallNote, CallSession, CallState,
    CreateSessionRequest, CustomerId, SessionFilter, TimeRange, TransitionRequest,
};

use super::parse_session_id;
use crate::auth::TenantAuth;
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query parameters shared by session listings and exports.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    /// Earliest initiation time, inclusive.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Latest initiation time, inclusive.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Only sessions of this customer.
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// Only sessions of the customer with this external ID.
    #[serde(default)]
    pub customer_external_id: Option<String>,
    /// Only sessions with this direction.
    #[serde(default)]
    pub direction: Option<CallDirection>,
    /// Only sessions in this state.
    #[serde(default)]
    pub state: Option<CallState>,
    /// Number of sessions to skip.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SessionQuery {
    /// Convert into an engine filter.
    #[must_use]
    pub fn into_filter(self) -> SessionFilter {
        SessionFilter {
            range: TimeRange {
                start: self.start,
                end: self.end,
            },
            customer_id: self.customer_id,
            customer_external_id: self.customer_external_id.filter(|id| !id.is_empty()),
            direction: self.direction,
            state: self.state,
            offset: self.offset.unwrap_or(0),
            limit: self.limit,
        }
    }
}

/// Response for listing sessions without paging.
#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    /// List of sessions.
    pub sessions: Vec<CallSession>,
}

/// Response for a session's event log.
#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    /// Events in timestamp order.
    pub events: Vec<CallEvent>,
}

/// Response for a session's notes.
#[derive(Debug, Serialize)]
pub struct ListNotesResponse {
    /// Notes, newest first.
    pub notes: Vec<CallNote>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a call session.
///
/// Returns 201 with the session; repeating the request for the same
/// provider call ID returns the existing session.
///
/// # Errors
///
/// Returns 429 when the monthly quota is used up and 404 for an unknown
/// customer reference.
pub async fn create_session<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let session = state.engine.create_session(auth.tenant_id(), body).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Query sessions, newest first.
///
/// # Errors
///
/// Returns 400 for an inverted time range.
pub async fn query_sessions<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let page = state
        .engine
        .query_sessions(auth.tenant_id(), query.into_filter())
        .await?;
    Ok(Json(page))
}

/// List calls in progress.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub async fn list_active_sessions<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let sessions = state.engine.list_active_sessions(auth.tenant_id()).await?;
    Ok(Json(ListSessionsResponse { sessions }))
}

/// Get a session by ID.
///
/// # Errors
///
/// Returns 404 if the session doesn't belong to the tenant.
pub async fn get_session<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let session_id = parse_session_id(&session_id)?;
    let session = state.engine.get_session(auth.tenant_id(), &session_id).await?;
    Ok(Json(session))
}

/// Apply a lifecycle event to a session.
///
/// # Errors
///
/// Returns 409 if the event is not legal in the session's state; the
/// session is left unchanged.
pub async fn transition<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(session_id): Path<String>,
    Json(body): Json<TransitionRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let session_id = parse_session_id(&session_id)?;
    let session = state
        .engine
        .transition(auth.tenant_id(), &session_id, body)
        .await?;
    Ok(Json(session))
}

/// List a session's events in timestamp order.
///
/// # Errors
///
/// Returns 404 if the session doesn't belong to the tenant.
pub async fn list_events<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let session_id = parse_session_id(&session_id)?;
    let events = state
        .engine
        .list_session_events(auth.tenant_id(), &session_id)
        .await?;
    Ok(Json(ListEventsResponse { events }))
}

/// Replay a session's event log against its stored record.
///
/// # Errors
///
/// Returns 404 if the session doesn't belong to the tenant.
pub async fn replay_session<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let session_id = parse_session_id(&session_id)?;
    let report = state
        .engine
        .replay_session(auth.tenant_id(), &session_id)
        .await?;
    Ok(Json(report))
}

/// Attach a note to a session.
///
/// # Errors
///
/// Returns 400 for an empty note and 404 if the session doesn't belong to
/// the tenant.
pub async fn add_note<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(session_id): Path<String>,
    Json(body): Json<AddNoteRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let session_id = parse_session_id(&session_id)?;
    let note = state
        .engine
        .add_note(auth.tenant_id(), &session_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// List a session's notes, newest first.
///
/// # Errors
///
/// Returns 404 if the session doesn't belong to the tenant.
pub async fn list_notes<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let session_id = parse_session_id(&session_id)?;
    let notes = state.engine.list_notes(auth.tenant_id(), &session_id).await?;
    Ok(Json(ListNotesResponse { notes }))
}
