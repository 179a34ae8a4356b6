//! Shared fixtures for the engine's unit tests.

use std::collections::BTreeSet;

use call_ribbon_core::{SessionId, TenantId};
use call_ribbon_store::{
    CallDirection, CallSession, CallState, Feature, Metadata, PlanTier, ProviderCredentials,
    RocksStore, Store, Tenant, UsageIncrement,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use crate::tenants;
use crate::types::TenantRegistration;

pub fn create_test_store() -> (RocksStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    (store, dir)
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
}

pub fn registration(api_key: &str) -> TenantRegistration {
    TenantRegistration {
        tenant_id: None,
        api_key: api_key.to_string(),
        name: "Collections CRM".to_string(),
        plan: PlanTier::Professional,
        features: BTreeSet::from([Feature::Call, Feature::Mute, Feature::Hold, Feature::Dtmf]),
        allowed_origins: vec!["*".to_string()],
        monthly_call_limit: 100,
        status: call_ribbon_store::TenantStatus::Active,
        credentials: ProviderCredentials {
            token: "provider-token".to_string(),
            user_id: "provider-user".to_string(),
        },
    }
}

pub fn create_test_tenant(store: &RocksStore, api_key: &str) -> Tenant {
    tenants::register_tenant(store, registration(api_key), t0()).unwrap()
}

/// Charge one completed call of `minutes` to the tenant's counters.
pub fn charge_call(store: &RocksStore, tenant_id: &TenantId, date: NaiveDate, minutes: u64) {
    let increment = UsageIncrement {
        tenant_id: *tenant_id,
        date,
        calls: 1,
        minutes,
    };
    store.record_usage(&increment, t0()).unwrap();
}

/// A terminal session that is not stored yet.
pub fn ended_session(
    tenant_id: &TenantId,
    state: CallState,
    ended_at: DateTime<Utc>,
    duration_seconds: u64,
) -> CallSession {
    let talk = Duration::seconds(i64::try_from(duration_seconds).unwrap());
    let connected_at = (state == CallState::Completed).then(|| ended_at - talk);
    let initiated_at = ended_at - talk - Duration::seconds(5);
    CallSession {
        session_id: SessionId::generate(),
        tenant_id: *tenant_id,
        customer_id: None,
        external_call_id: format!("call-{}", SessionId::generate()),
        phone_number: "+15550100".to_string(),
        direction: CallDirection::Outbound,
        call_type: None,
        state,
        agent_id: None,
        agent_name: None,
        initiated_at,
        ringing_at: None,
        connected_at,
        ended_at: Some(ended_at),
        duration_seconds: Some(if connected_at.is_some() { duration_seconds } else { 0 }),
        end_reason: Some("hangup".to_string()),
        metadata: Metadata::new(),
        event_count: 1,
        updated_at: ended_at,
    }
}
