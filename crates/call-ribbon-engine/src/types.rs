//! Request and response types for engine operations.
//!
//! These types define the API contracts for tenants, customers, sessions,
//! events and usage.

use std::collections::BTreeSet;

use call_ribbon_core::{CustomerId, SessionId, TenantId};
use call_ribbon_store::{
    CallDirection, CallEvent, CallEventType, CallSession, CallState, CustomerProfile, Feature,
    LifecycleSnapshot, Metadata, PlanTier, ProviderCredentials, TenantStatus, UsageMonth,
    UsageRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the engine service.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Page size used when a query does not ask for one.
    pub default_page_size: usize,
    /// Hard maximum page size.
    pub max_page_size: usize,
    /// Upper bound on a single storage operation (seconds).
    pub store_timeout_seconds: u64,
    /// How often a session commit is retried after losing a race.
    pub max_commit_attempts: u32,
    /// Ranking length used when a top-customers query does not ask for one.
    pub default_top_customers: usize,
    /// Hard maximum ranking length.
    pub max_top_customers: usize,
    /// Maximum rows in one export.
    pub max_export_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
            store_timeout_seconds: 5,
            max_commit_attempts: 5,
            default_top_customers: 10,
            max_top_customers: 100,
            max_export_rows: 10_000,
        }
    }
}

// =============================================================================
// Tenants
// =============================================================================

/// A tenant definition, as accepted at registration and in bootstrap files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRegistration {
    /// Fixed tenant ID. A new one is generated when absent.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    /// Plaintext API key; only its hash is stored.
    pub api_key: String,
    /// Display name.
    pub name: String,
    /// Billing plan.
    #[serde(default = "TenantRegistration::default_plan")]
    pub plan: PlanTier,
    /// Enabled widget capabilities.
    #[serde(default = "TenantRegistration::default_features")]
    pub features: BTreeSet<Feature>,
    /// Origins allowed to embed the widget.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Monthly call quota.
    #[serde(default = "TenantRegistration::default_monthly_call_limit")]
    pub monthly_call_limit: u64,
    /// Initial status.
    #[serde(default = "TenantRegistration::default_status")]
    pub status: TenantStatus,
    /// Provider credentials brokered to the widget.
    pub credentials: ProviderCredentials,
}

impl TenantRegistration {
    const fn default_plan() -> PlanTier {
        PlanTier::Trial
    }

    fn default_features() -> BTreeSet<Feature> {
        BTreeSet::from([Feature::Call])
    }

    const fn default_monthly_call_limit() -> u64 {
        100
    }

    const fn default_status() -> TenantStatus {
        TenantStatus::Active
    }
}

/// Quota position of a tenant for the current month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// Calls counted so far this month.
    pub calls_this_month: u64,
    /// Monthly call limit.
    pub limit: u64,
    /// Calls left before new sessions are refused.
    pub remaining: u64,
}

impl QuotaStatus {
    /// Build the status from the live counter and the limit.
    #[must_use]
    pub const fn new(calls_this_month: u64, limit: u64) -> Self {
        Self {
            calls_this_month,
            limit,
            remaining: limit.saturating_sub(calls_this_month),
        }
    }

    /// Returns true if no further calls may start.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.calls_this_month >= self.limit
    }
}

/// What an authorized widget receives.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetGrant {
    /// The authorized tenant.
    pub tenant_id: TenantId,
    /// Tenant display name.
    pub name: String,
    /// Billing plan.
    pub plan: PlanTier,
    /// Enabled widget capabilities.
    pub features: BTreeSet<Feature>,
    /// Provider credentials for the widget.
    pub credentials: ProviderCredentials,
    /// Calls left this month.
    pub remaining_calls: u64,
}

/// The configuration view of a tenant.
#[derive(Debug, Clone, Serialize)]
pub struct TenantConfig {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Display name.
    pub name: String,
    /// Billing plan.
    pub plan: PlanTier,
    /// Enabled widget capabilities.
    pub features: BTreeSet<Feature>,
    /// Account status.
    pub status: TenantStatus,
    /// Quota position for the current month.
    pub usage: QuotaStatus,
}

/// A tenant's usage line in the admin overview.
#[derive(Debug, Clone, Serialize)]
pub struct TenantUsage {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Display name.
    pub name: String,
    /// Billing plan.
    pub plan: PlanTier,
    /// Account status.
    pub status: TenantStatus,
    /// Calls counted this month.
    pub calls_this_month: u64,
    /// Monthly call limit.
    pub limit: u64,
    /// `calls_this_month / limit` as a percentage.
    pub utilization_percent: f64,
    /// Last time a call of this tenant completed.
    pub last_activity_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Customers
// =============================================================================

/// Request to create or update a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertCustomerRequest {
    /// The tenant's identifier for the customer.
    pub external_id: String,
    /// Attributes to store.
    #[serde(flatten)]
    pub profile: CustomerProfile,
}

// =============================================================================
// Notes
// =============================================================================

/// Request to attach a note to a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNoteRequest {
    /// Note body.
    #[serde(alias = "noteText")]
    pub text: String,
    /// Category; `general` when absent.
    #[serde(default, alias = "noteType")]
    pub note_type: Option<String>,
    /// Who wrote the note.
    #[serde(default, alias = "createdBy")]
    pub author: Option<String>,
    /// Hidden from customer-facing views.
    #[serde(default, alias = "isInternal")]
    pub is_internal: bool,
}

// =============================================================================
// Sessions
// =============================================================================

/// Request to create a call session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// The provider's call identifier.
    pub external_call_id: String,
    /// Remote phone number.
    pub phone_number: String,
    /// Call direction.
    #[serde(default)]
    pub direction: CallDirection,
    /// Free-form type tag.
    #[serde(default)]
    pub call_type: Option<String>,
    /// Internal customer reference.
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// Customer reference by the tenant's own identifier.
    #[serde(default)]
    pub customer_external_id: Option<String>,
    /// Agent handling the call.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Agent display name.
    #[serde(default)]
    pub agent_name: Option<String>,
    /// Arbitrary attributes.
    #[serde(default)]
    pub metadata: Metadata,
}

impl CreateSessionRequest {
    /// Create a request for an outbound call with no customer.
    #[must_use]
    pub fn new(external_call_id: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            external_call_id: external_call_id.into(),
            phone_number: phone_number.into(),
            ..Self::default()
        }
    }
}

/// A lifecycle event applied directly to a known session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// Event kind.
    pub event_type: CallEventType,
    /// Event data (`status`, `reason`, `duration`, ...).
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the event happened; receipt time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Who emitted the event.
    #[serde(default)]
    pub source: Option<String>,
}

impl TransitionRequest {
    /// Create a request with an empty payload.
    #[must_use]
    pub const fn new(event_type: CallEventType) -> Self {
        Self {
            event_type,
            payload: serde_json::Value::Null,
            timestamp: None,
            source: None,
        }
    }

    /// Set the event time.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the event payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// An event reported by a widget or provider.
///
/// The session is located by `session_id`, else by `external_call_id`, else
/// (degraded) by the most recent active session with `phone_number`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEventRequest {
    /// Session reference.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Provider call reference.
    #[serde(default)]
    pub external_call_id: Option<String>,
    /// Phone number used when no other reference is present.
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Event kind.
    pub event_type: CallEventType,
    /// Raw event data.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Who emitted the event.
    #[serde(default)]
    pub source: Option<String>,
    /// Origin domain of the reporting widget.
    #[serde(default)]
    pub domain: Option<String>,
    /// When the event happened; receipt time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RecordEventRequest {
    /// Create a request for an event on a known session.
    #[must_use]
    pub const fn for_session(session_id: SessionId, event_type: CallEventType) -> Self {
        Self {
            session_id: Some(session_id),
            external_call_id: None,
            phone_number: None,
            event_type,
            payload: serde_json::Value::Null,
            source: None,
            domain: None,
            timestamp: None,
        }
    }
}

/// The result of recording an event.
#[derive(Debug, Clone, Serialize)]
pub struct EventReceipt {
    /// The session after the event.
    pub session: CallSession,
    /// The appended event, including its outcome.
    pub event: CallEvent,
}

/// An inclusive, optionally open time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Window end.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Create a closed window.
    #[must_use]
    pub const fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Fail if the start lies after the end.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidRange` for an inverted window.
    pub fn validate(&self) -> Result<()> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(EngineError::InvalidRange { start, end }),
            _ => Ok(()),
        }
    }

    /// Returns true if `at` lies within the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

/// Filter and page selection for session queries.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Initiation time window.
    pub range: TimeRange,
    /// Only sessions of this customer.
    pub customer_id: Option<CustomerId>,
    /// Only sessions of the customer with this external ID.
    pub customer_external_id: Option<String>,
    /// Only sessions with this direction.
    pub direction: Option<CallDirection>,
    /// Only sessions in this state.
    pub state: Option<CallState>,
    /// Number of matching sessions to skip.
    pub offset: usize,
    /// Page size; the configured default when absent.
    pub limit: Option<usize>,
}

/// One page of a session query.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPage {
    /// Sessions, newest first.
    pub sessions: Vec<CallSession>,
    /// Total number of matching sessions.
    pub total: usize,
    /// Offset of this page.
    pub offset: usize,
    /// Page size applied.
    pub limit: usize,
}

/// The outcome of replaying a session's event log.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// The replayed session.
    pub session_id: SessionId,
    /// Number of events folded.
    pub events_replayed: usize,
    /// Lifecycle as stored.
    pub stored: LifecycleSnapshot,
    /// Lifecycle rebuilt from the events.
    pub replayed: LifecycleSnapshot,
    /// Whether both agree.
    pub consistent: bool,
}

// =============================================================================
// Usage
// =============================================================================

/// Usage of a tenant in one month.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyUsage {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The month.
    pub month: UsageMonth,
    /// Sum of the daily call counts.
    pub total_calls: u64,
    /// Sum of the daily billed minutes.
    pub total_call_minutes: u64,
    /// The live quota counter.
    pub counted_calls: u64,
    /// Daily records, oldest first.
    pub days: Vec<UsageRecord>,
}

/// The result of recomputing a monthly counter from the session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The month.
    pub month: UsageMonth,
    /// Counter value before reconciliation.
    pub previous: u64,
    /// Completed calls that ended in the month.
    pub recomputed: u64,
}
