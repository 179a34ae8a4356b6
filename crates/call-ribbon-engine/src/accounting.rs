//! Usage accounting.
//!
//! Quota is checked against the live per-month counter when a call starts.
//! The counter and the daily usage record are charged when a session
//! completes, in the same write as the transition (see [`crate::events`]),
//! so a completion is counted exactly once. Usage is charged to the UTC date
//! the completing event was received, never to a client-reported time.

use call_ribbon_core::TenantId;
use call_ribbon_store::{
    CallSession, CallState, EventOutcome, Store, Tenant, UsageIncrement, UsageMonth,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::types::{MonthlyUsage, QuotaStatus, ReconcileReport, TenantUsage};

/// Minutes billed for a call of `duration_seconds`, rounded up.
#[must_use]
pub const fn billed_minutes(duration_seconds: u64) -> u64 {
    duration_seconds.div_ceil(60)
}

/// The usage a session charges, if it completed.
///
/// The usage day is the UTC date of `received_at`, the time the completing
/// event reached the engine.
#[must_use]
pub fn completion_increment(
    session: &CallSession,
    received_at: DateTime<Utc>,
) -> Option<UsageIncrement> {
    if session.state != CallState::Completed {
        return None;
    }
    Some(UsageIncrement {
        tenant_id: session.tenant_id,
        date: received_at.date_naive(),
        calls: 1,
        minutes: billed_minutes(session.duration_seconds.unwrap_or(0)),
    })
}

/// Read the tenant's quota position for the month containing `now`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn quota_status<S: Store>(store: &S, tenant: &Tenant, now: DateTime<Utc>) -> Result<QuotaStatus> {
    let month = UsageMonth::of(now.date_naive());
    let used = store.get_monthly_calls(&tenant.tenant_id, month)?;
    Ok(QuotaStatus::new(used, tenant.monthly_call_limit))
}

/// Gate a new call against the tenant's monthly quota.
///
/// Nothing is mutated: the counter moves only when a call completes.
///
/// # Errors
///
/// Returns `EngineError::QuotaExceeded` if the tenant is at or over its limit.
pub fn check_and_reserve<S: Store>(
    store: &S,
    tenant: &Tenant,
    now: DateTime<Utc>,
) -> Result<QuotaStatus> {
    let status = quota_status(store, tenant, now)?;
    if status.is_exhausted() {
        warn!(
            tenant_id = %tenant.tenant_id,
            used = status.calls_this_month,
            limit = status.limit,
            "Monthly call quota exhausted"
        );
        return Err(EngineError::QuotaExceeded {
            tenant_id: tenant.tenant_id,
            limit: status.limit,
            used: status.calls_this_month,
        });
    }
    Ok(status)
}

/// Summarize a tenant's usage in one month.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn monthly_usage<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    month: UsageMonth,
) -> Result<MonthlyUsage> {
    let days = store.list_usage_records(tenant_id, month)?;
    let total_calls = days.iter().map(|day| day.call_count).sum();
    let total_call_minutes = days.iter().map(|day| day.call_minutes).sum();
    let counted_calls = store.get_monthly_calls(tenant_id, month)?;

    Ok(MonthlyUsage {
        tenant_id: *tenant_id,
        month,
        total_calls,
        total_call_minutes,
        counted_calls,
        days,
    })
}

/// Recompute a monthly counter from the completed sessions charged in it.
///
/// A session is charged on the receipt date of the event that completed
/// it; sessions without that event in their log fall back to `ended_at`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn reconcile_month<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    month: UsageMonth,
) -> Result<ReconcileReport> {
    let previous = store.get_monthly_calls(tenant_id, month)?;

    // Sessions may end in a later month than they started, so scan from the
    // beginning of the tenant's history up to now.
    let mut recomputed = 0u64;
    for session in store.list_sessions_by_tenant(tenant_id, None, None)? {
        if session.state != CallState::Completed {
            continue;
        }
        if charged_at(store, &session)?.is_some_and(|at| month.contains(at.date_naive())) {
            recomputed += 1;
        }
    }

    if recomputed != previous {
        store.set_monthly_calls(tenant_id, month, recomputed)?;
        info!(
            tenant_id = %tenant_id,
            month = %month,
            previous,
            recomputed,
            "Usage counter reconciled"
        );
    }

    Ok(ReconcileReport {
        tenant_id: *tenant_id,
        month,
        previous,
        recomputed,
    })
}

/// When a completed session was charged.
fn charged_at<S: Store>(store: &S, session: &CallSession) -> Result<Option<DateTime<Utc>>> {
    let completing = store
        .list_events_by_session(&session.session_id)?
        .into_iter()
        .filter(|event| event.outcome == EventOutcome::Applied)
        .max_by_key(|event| event.sequence);
    Ok(completing.map(|event| event.received_at).or(session.ended_at))
}

/// Build a tenant's line of the admin usage overview.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn tenant_usage<S: Store>(store: &S, tenant: &Tenant, now: DateTime<Utc>) -> Result<TenantUsage> {
    let status = quota_status(store, tenant, now)?;
    #[allow(clippy::cast_precision_loss)]
    let utilization_percent = if status.limit == 0 {
        100.0
    } else {
        status.calls_this_month as f64 * 100.0 / status.limit as f64
    };

    Ok(TenantUsage {
        tenant_id: tenant.tenant_id,
        name: tenant.name.clone(),
        plan: tenant.plan,
        status: tenant.status,
        calls_this_month: status.calls_this_month,
        limit: status.limit,
        utilization_percent,
        last_activity_at: tenant.last_activity_at,
    })
}
