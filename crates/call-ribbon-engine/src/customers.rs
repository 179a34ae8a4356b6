//! Customer directory.
//!
//! Customers are unique per `(tenant, external id)`. Sessions reference
//! them weakly: deleting a customer leaves its sessions intact.
//!
//! Phone numbers are stored and matched in the form [`normalize_phone`]
//! produces.

use call_ribbon_core::TenantId;
use call_ribbon_store::{Customer, Store};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::types::UpsertCustomerRequest;

/// Customer type recorded when the request leaves it unset.
pub const DEFAULT_CUSTOMER_TYPE: &str = "customer";

/// Reduce a phone number to its digits, keeping a leading `+`.
///
/// Input without any digits is returned trimmed.
#[must_use]
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        trimmed.to_string()
    } else if trimmed.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}

/// Create or update a customer.
///
/// # Errors
///
/// Returns `EngineError::InvalidRequest` if the external ID is empty.
pub fn upsert_customer<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    request: UpsertCustomerRequest,
    now: DateTime<Utc>,
) -> Result<Customer> {
    let external_id = request.external_id.trim();
    if external_id.is_empty() {
        return Err(EngineError::InvalidRequest(
            "external_id must not be empty".into(),
        ));
    }

    let mut profile = request.profile;
    if profile.customer_type.as_deref().map_or(true, str::is_empty) {
        profile.customer_type = Some(DEFAULT_CUSTOMER_TYPE.to_string());
    }
    if let Some(phone) = &profile.phone_number {
        profile.phone_number = Some(normalize_phone(phone)).filter(|p| !p.is_empty());
    }

    let customer = store.upsert_customer(tenant_id, external_id, &profile, now)?;
    debug!(
        tenant_id = %tenant_id,
        customer_id = %customer.customer_id,
        external_id = %customer.external_id,
        "Customer upserted"
    );
    Ok(customer)
}

/// Look up a customer by the tenant's identifier.
///
/// # Errors
///
/// Returns `EngineError::UnknownCustomer` if no such customer exists.
pub fn get_customer<S: Store>(store: &S, tenant_id: &TenantId, external_id: &str) -> Result<Customer> {
    store
        .get_customer_by_external_id(tenant_id, external_id)?
        .ok_or_else(|| EngineError::UnknownCustomer(external_id.to_string()))
}

/// List a tenant's customers with the given phone number.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find_by_phone<S: Store>(store: &S, tenant_id: &TenantId, phone: &str) -> Result<Vec<Customer>> {
    Ok(store.find_customers_by_phone(tenant_id, &normalize_phone(phone))?)
}

/// Delete a customer.
///
/// # Errors
///
/// Returns `EngineError::UnknownCustomer` if no such customer exists.
pub fn delete_customer<S: Store>(store: &S, tenant_id: &TenantId, external_id: &str) -> Result<()> {
    let customer = get_customer(store, tenant_id, external_id)?;
    store.delete_customer(&customer.customer_id).map_err(|e| match e {
        call_ribbon_store::StoreError::NotFound => {
            EngineError::UnknownCustomer(external_id.to_string())
        }
        other => other.into(),
    })?;

    info!(tenant_id = %tenant_id, customer_id = %customer.customer_id, "Customer deleted");
    Ok(())
}
