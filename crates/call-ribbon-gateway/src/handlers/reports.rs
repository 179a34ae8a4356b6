//! Analytics, usage and export endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use call_ribbon_engine::export;
use call_ribbon_engine::{
    CallEngine, ExportFormat, MonthlyUsage, QuotaStatus, TimeRange, UsageMonth,
};

use super::sessions::SessionQuery;
use crate::auth::TenantAuth;
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query parameters for analytics.
#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    /// Earliest initiation time, inclusive.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Latest initiation time, inclusive.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Length of the top-customers ranking.
    #[serde(default)]
    pub top: Option<usize>,
}

/// Query parameters for usage.
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Month as `YYYY-MM`; the current month when absent.
    #[serde(default)]
    pub month: Option<UsageMonth>,
}

/// Response for usage.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Quota position for the current month.
    pub quota: QuotaStatus,
    /// Usage in the requested month.
    pub usage: MonthlyUsage,
}

/// Query parameters selecting the export format.
#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    /// Output format, CSV when absent.
    #[serde(default)]
    pub format: Option<ExportFormat>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Compute call analytics over a window.
///
/// # Errors
///
/// Returns 400 for an inverted time range.
pub async fn analytics<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let range = TimeRange {
        start: query.start,
        end: query.end,
    };
    let analytics = state
        .engine
        .analytics(auth.tenant_id(), range, query.top)
        .await?;
    Ok(Json(analytics))
}

/// Get usage counters of a month.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub async fn usage<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Query(query): Query<UsageQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let month = query
        .month
        .unwrap_or_else(|| UsageMonth::of(Utc::now().date_naive()));
    let quota = state.engine.quota_status(auth.tenant_id()).await?;
    let usage = state.engine.monthly_usage(auth.tenant_id(), month).await?;
    Ok(Json(UsageResponse { quota, usage }))
}

/// Export the sessions matching the query as CSV or JSON.
///
/// # Errors
///
/// Returns 400 for an inverted time range.
pub async fn export_sessions<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Query(format): Query<FormatQuery>,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let format = format.format.unwrap_or_default();
    let rows = state
        .engine
        .export_sessions(auth.tenant_id(), query.into_filter())
        .await?;
    let body = export::render(&rows, format)?;

    let filename = match format {
        ExportFormat::Csv => "call-sessions.csv",
        ExportFormat::Json => "call-sessions.json",
    };
    Ok((
        [
            (CONTENT_TYPE, format.content_type().to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    ))
}
