//! Tenant registry.
//!
//! Tenants are looked up by the hash of their API key. Widgets are
//! authorized when the key is known, the tenant is active, the embedding
//! origin is on the allow-list and the monthly quota is not exhausted.

use call_ribbon_core::{ApiKeyHash, TenantId};
use call_ribbon_store::{Store, StoreError, Tenant, TenantStatus};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::accounting;
use crate::error::{EngineError, Result};
use crate::types::{TenantConfig, TenantRegistration, WidgetGrant};

/// Create or replace a tenant.
///
/// A registration without a tenant ID updates the tenant already holding its
/// API key, if any. Re-registering an existing tenant keeps its creation time.
///
/// # Errors
///
/// Returns `EngineError::InvalidRequest` if the key or name is empty or the
/// key already belongs to another tenant.
pub fn register_tenant<S: Store>(
    store: &S,
    registration: TenantRegistration,
    now: DateTime<Utc>,
) -> Result<Tenant> {
    if registration.api_key.trim().is_empty() {
        return Err(EngineError::InvalidRequest("api_key must not be empty".into()));
    }
    if registration.name.trim().is_empty() {
        return Err(EngineError::InvalidRequest("name must not be empty".into()));
    }

    let api_key_hash = ApiKeyHash::of(&registration.api_key);
    let existing = match registration.tenant_id {
        Some(tenant_id) => store.get_tenant(&tenant_id)?,
        None => store.get_tenant_by_api_key(&api_key_hash)?,
    };
    let tenant_id = registration
        .tenant_id
        .or_else(|| existing.as_ref().map(|t| t.tenant_id))
        .unwrap_or_else(TenantId::generate);

    let tenant = Tenant {
        tenant_id,
        api_key_hash,
        name: registration.name,
        plan: registration.plan,
        features: registration.features,
        allowed_origins: registration.allowed_origins,
        monthly_call_limit: registration.monthly_call_limit,
        status: registration.status,
        credentials: registration.credentials,
        created_at: existing.as_ref().map_or(now, |t| t.created_at),
        updated_at: now,
        last_activity_at: existing.and_then(|t| t.last_activity_at),
    };

    store.put_tenant(&tenant).map_err(|e| match e {
        StoreError::AlreadyExists => {
            EngineError::InvalidRequest("api_key is already in use by another tenant".into())
        }
        other => other.into(),
    })?;

    info!(tenant_id = %tenant.tenant_id, name = %tenant.name, "Tenant registered");
    Ok(tenant)
}

/// Resolve a tenant from a plaintext API key.
///
/// Suspended tenants resolve too; use [`require_active`] where that matters.
///
/// # Errors
///
/// Returns `EngineError::InvalidTenant` if no tenant has this key.
pub fn authenticate<S: Store>(store: &S, api_key: &str) -> Result<Tenant> {
    store
        .get_tenant_by_api_key(&ApiKeyHash::of(api_key))?
        .ok_or_else(|| EngineError::InvalidTenant("unknown api key".into()))
}

/// Look up a tenant by ID.
///
/// # Errors
///
/// Returns `EngineError::InvalidTenant` if the tenant doesn't exist.
pub fn get_tenant<S: Store>(store: &S, tenant_id: &TenantId) -> Result<Tenant> {
    store
        .get_tenant(tenant_id)?
        .ok_or_else(|| EngineError::InvalidTenant(format!("unknown tenant {tenant_id}")))
}

/// Fail unless the tenant may place calls.
///
/// # Errors
///
/// Returns `EngineError::InvalidTenant` if the tenant is suspended.
pub fn require_active(tenant: &Tenant) -> Result<()> {
    match tenant.status {
        TenantStatus::Active => Ok(()),
        TenantStatus::Suspended => Err(EngineError::InvalidTenant(format!(
            "tenant {} is suspended",
            tenant.tenant_id
        ))),
    }
}

/// Returns true if `origin` matches one of the allow-list `patterns`.
///
/// Patterns are `*` (any origin), an exact host, or `*.suffix` (any
/// subdomain of `suffix`). Origins may carry a scheme, port or path; only
/// the host is compared, case-insensitively. A missing origin only passes
/// the `*` pattern.
#[must_use]
pub fn origin_allowed(patterns: &[String], origin: Option<&str>) -> bool {
    if patterns.iter().any(|p| p == "*") {
        return true;
    }
    let Some(host) = origin.map(origin_host).filter(|h| !h.is_empty()) else {
        return false;
    };

    patterns.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|rest| rest.ends_with('.')),
            None => host == pattern,
        }
    })
}

fn origin_host(origin: &str) -> String {
    let without_scheme = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or_default();
    let host = authority.split(':').next().unwrap_or_default();
    host.to_ascii_lowercase()
}

/// Authorize a widget and hand out the tenant's provider credentials.
///
/// # Errors
///
/// Returns `EngineError::InvalidTenant` for an unknown key or suspended
/// tenant, `EngineError::OriginNotAllowed` for a foreign origin, and
/// `EngineError::QuotaExceeded` when the monthly quota is used up.
pub fn authorize_widget<S: Store>(
    store: &S,
    api_key: &str,
    origin: Option<&str>,
    now: DateTime<Utc>,
) -> Result<WidgetGrant> {
    let tenant = authenticate(store, api_key)?;
    require_active(&tenant)?;

    if !origin_allowed(&tenant.allowed_origins, origin) {
        warn!(
            tenant_id = %tenant.tenant_id,
            origin = origin.unwrap_or("<none>"),
            "Widget origin not allowed"
        );
        return Err(EngineError::OriginNotAllowed {
            origin: origin.unwrap_or_default().to_string(),
        });
    }

    let quota = accounting::check_and_reserve(store, &tenant, now)?;
    info!(tenant_id = %tenant.tenant_id, remaining = quota.remaining, "Widget authorized");

    Ok(WidgetGrant {
        tenant_id: tenant.tenant_id,
        name: tenant.name,
        plan: tenant.plan,
        features: tenant.features,
        credentials: tenant.credentials,
        remaining_calls: quota.remaining,
    })
}

/// Build the configuration view of a tenant.
///
/// # Errors
///
/// Returns `EngineError::InvalidTenant` if the tenant doesn't exist.
pub fn tenant_config<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    now: DateTime<Utc>,
) -> Result<TenantConfig> {
    let tenant = get_tenant(store, tenant_id)?;
    let usage = accounting::quota_status(store, &tenant, now)?;

    Ok(TenantConfig {
        tenant_id: tenant.tenant_id,
        name: tenant.name,
        plan: tenant.plan,
        features: tenant.features,
        status: tenant.status,
        usage,
    })
}

/// Suspend or reactivate a tenant.
///
/// # Errors
///
/// Returns `EngineError::InvalidTenant` if the tenant doesn't exist.
pub fn set_tenant_status<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    status: TenantStatus,
    now: DateTime<Utc>,
) -> Result<Tenant> {
    let tenant = store
        .update_tenant_status(tenant_id, status, now)
        .map_err(|e| match e {
            StoreError::NotFound => EngineError::InvalidTenant(format!("unknown tenant {tenant_id}")),
            other => other.into(),
        })?;

    info!(tenant_id = %tenant_id, status = ?status, "Tenant status changed");
    Ok(tenant)
}
