//! Widget endpoints.
//!
//! The embeddable call ribbon talks to these: it authorizes itself with the
//! tenant API key, reads its configuration and reports call events.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::ORIGIN;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use call_ribbon_engine::{
    CallEngine, CallState, EventOutcome, RecordEventRequest, SessionId, WidgetGrant,
};

use crate::auth::TenantAuth;
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body of `POST /api/ribbon/init`.
#[derive(Debug, Deserialize)]
pub struct InitRequest {
    /// The tenant API key.
    #[serde(alias = "apiKey")]
    pub api_key: String,
    /// The embedding page's domain; the `Origin` header when absent.
    #[serde(default)]
    pub domain: Option<String>,
}

/// Response of `POST /api/ribbon/init`.
#[derive(Debug, Serialize)]
pub struct InitResponse {
    /// Always true; failures are reported as errors.
    pub success: bool,
    /// What the widget may do.
    #[serde(flatten)]
    pub grant: WidgetGrant,
}

/// Response of `POST /api/ribbon/log-call`.
#[derive(Debug, Serialize)]
pub struct LogCallResponse {
    /// Always true; failures are reported as errors.
    pub success: bool,
    /// The session the event was recorded against.
    pub session_id: SessionId,
    /// Session state after the event.
    pub state: CallState,
    /// What the event did.
    pub outcome: EventOutcome,
    /// Position of the event in the session's log.
    pub sequence: u32,
}

// =============================================================================
// Handlers
// =============================================================================

/// Authorize a widget and hand it the tenant's provider credentials.
///
/// # Errors
///
/// Returns 401 for an unknown key or suspended tenant, 403 for an origin
/// that is not allowed, and 429 when the monthly quota is used up.
pub async fn init<E>(
    State(state): State<Arc<GatewayState<E>>>,
    headers: HeaderMap,
    Json(body): Json<InitRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let origin = body.domain.or_else(|| header_origin(&headers));
    let grant = state
        .engine
        .authorize_widget(&body.api_key, origin.as_deref())
        .await?;

    Ok(Json(InitResponse {
        success: true,
        grant,
    }))
}

/// Get the calling tenant's configuration and quota position.
///
/// # Errors
///
/// Returns an error if the tenant cannot be loaded.
pub async fn config<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let config = state.engine.tenant_config(auth.tenant_id()).await?;
    Ok(Json(config))
}

/// Record a call event reported by the widget.
///
/// Events that are illegal for the session's state are kept with outcome
/// `rejected` and still answer 200.
///
/// # Errors
///
/// Returns 404 if the event matches no session of the tenant.
pub async fn log_call<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    headers: HeaderMap,
    Json(mut body): Json<RecordEventRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    if body.domain.is_none() {
        body.domain = header_origin(&headers);
    }

    let receipt = state.engine.record_event(auth.tenant_id(), body).await?;

    Ok(Json(LogCallResponse {
        success: true,
        session_id: receipt.session.session_id,
        state: receipt.session.state,
        outcome: receipt.event.outcome,
        sequence: receipt.event.sequence,
    }))
}

fn header_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
