//! Customer directory endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use call_ribbon_engine::{CallEngine, Customer, UpsertCustomerRequest};

use crate::auth::TenantAuth;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Query parameters for customer lookup.
#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    /// Phone number to match.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Response for customer lookup.
#[derive(Debug, Serialize)]
pub struct ListCustomersResponse {
    /// Matching customers.
    pub customers: Vec<Customer>,
}

/// Create or update a customer.
///
/// # Errors
///
/// Returns 400 if the external ID is empty.
pub async fn upsert_customer<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Json(body): Json<UpsertCustomerRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let customer = state.engine.upsert_customer(auth.tenant_id(), body).await?;
    Ok(Json(customer))
}

/// Find customers by phone number.
///
/// # Errors
///
/// Returns 400 if no phone number is given.
pub async fn find_customers<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Query(query): Query<CustomerQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let phone = query
        .phone
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("phone query parameter is required".into()))?;
    let customers = state
        .engine
        .find_customers_by_phone(auth.tenant_id(), &phone)
        .await?;
    Ok(Json(ListCustomersResponse { customers }))
}

/// Get a customer by the tenant's identifier.
///
/// # Errors
///
/// Returns 404 if no such customer exists.
pub async fn get_customer<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    let customer = state
        .engine
        .get_customer(auth.tenant_id(), &external_id)
        .await?;
    Ok(Json(customer))
}

/// Delete a customer; its sessions are kept.
///
/// # Errors
///
/// Returns 404 if no such customer exists.
pub async fn delete_customer<E>(
    State(state): State<Arc<GatewayState<E>>>,
    auth: TenantAuth,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    E: CallEngine + 'static,
{
    state
        .engine
        .delete_customer(auth.tenant_id(), &external_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
