//! Operator endpoints.
//!
//! Every handler here requires the admin bearer token.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use call_ribbon_engine::{
    CallEngine, Feature, PlanTier, Tenant, TenantId, TenantRegistration, TenantStatus,
    TenantUsage, UsageMonth,
};

use super::parse_tenant_id;
use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response of `GET /admin/stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Number of tenants.
    pub total_tenants: usize,
    /// Calls counted this month across all tenants.
    pub total_calls_this_month: u64,
    /// Per-tenant usage.
    pub tenants: Vec<TenantUsage>,
}

/// A tenant without its secrets.
#[derive(Debug, Serialize)]
pub struct TenantSummary {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Display name.
    pub name: String,
    /// Billing plan.
    pub plan: PlanTier,
    /// Enabled widget capabilities.
    pub features: BTreeSet<Feature>,
    /// Allowed embedding origins.
    pub allowed_origins: Vec<String>,
    /// Monthly call quota.
    pub monthly_call_limit: u64,
    /// Account status.
    pub status: TenantStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<Tenant> for TenantSummary {
    fn from(tenant: Tenant) -> Self {
        Self {
            tenant_id: tenant.tenant_id,
            name: tenant.name,
            plan: tenant.plan,
            features: tenant.features,
            allowed_origins: tenant.allowed_origins,
            monthly_call_limit: tenant.monthly_call_limit,
            status: tenant.status,
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
        }
    }
}

/// Request body for changing a tenant's status.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    /// The new status.
    pub status: TenantStatus,
}

/// Query parameters for reconciliation.
#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    /// Month as `YYYY-MM`.
    pub month: UsageMonth,
}

// =============================================================================
// Handlers
// =============================================================================

/// Usage overview of every tenant.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub async fn stats<E>(
    State(state): State<Arc<GatewayState<E>>>,
    _admin: AdminAuth,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let tenants = state.engine.list_tenant_usage().await?;
    Ok(Json(StatsResponse {
        total_tenants: tenants.len(),
        total_calls_this_month: tenants.iter().map(|t| t.calls_this_month).sum(),
        tenants,
    }))
}

/// Register or replace a tenant.
///
/// # Errors
///
/// Returns 400 if the registration is invalid.
pub async fn register_tenant<E>(
    State(state): State<Arc<GatewayState<E>>>,
    _admin: AdminAuth,
    Json(body): Json<TenantRegistration>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let tenant = state.engine.register_tenant(body).await?;
    Ok((StatusCode::CREATED, Json(TenantSummary::from(tenant))))
}

/// Suspend or reactivate a tenant.
///
/// # Errors
///
/// Returns 401 if the tenant doesn't exist.
pub async fn set_tenant_status<E>(
    State(state): State<Arc<GatewayState<E>>>,
    _admin: AdminAuth,
    Path(tenant_id): Path<String>,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let tenant_id = parse_tenant_id(&tenant_id)?;
    let tenant = state
        .engine
        .set_tenant_status(&tenant_id, body.status)
        .await?;
    tracing::info!(tenant_id = %tenant_id, status = ?tenant.status, "Tenant status changed");
    Ok(Json(TenantSummary::from(tenant)))
}

/// Recompute a tenant's monthly counter from its sessions.
///
/// # Errors
///
/// Returns 401 if the tenant doesn't exist.
pub async fn reconcile<E>(
    State(state): State<Arc<GatewayState<E>>>,
    _admin: AdminAuth,
    Path(tenant_id): Path<String>,
    Query(query): Query<ReconcileQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let tenant_id = parse_tenant_id(&tenant_id)?;
    let report = state.engine.reconcile_month(&tenant_id, query.month).await?;
    Ok(Json(report))
}
