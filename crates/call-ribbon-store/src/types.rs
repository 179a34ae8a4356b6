//! Domain types stored in the database.
//!
//! These types represent the persisted state of tenants, customers, call
//! sessions, call events and daily usage.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use call_ribbon_core::{ApiKeyHash, CustomerId, EventId, NoteId, SessionId, TenantId};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Free-form JSON attributes attached to customers and sessions.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Tenants
// =============================================================================

/// A tenant record: one client application embedding the call widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique identifier for the tenant.
    pub tenant_id: TenantId,
    /// Hash of the tenant's API key, used for lookups.
    pub api_key_hash: ApiKeyHash,
    /// Display name.
    pub name: String,
    /// Billing plan.
    pub plan: PlanTier,
    /// Widget capabilities enabled for this tenant.
    pub features: BTreeSet<Feature>,
    /// Origins allowed to embed the widget (`*`, exact host, or `*.suffix`).
    pub allowed_origins: Vec<String>,
    /// Maximum completed calls per calendar month.
    pub monthly_call_limit: u64,
    /// Whether the tenant may place calls.
    pub status: TenantStatus,
    /// Telephony provider credentials handed to authorized widgets.
    pub credentials: ProviderCredentials,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Last time a call of this tenant completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Tenant {
    /// Returns true if the tenant has the given capability.
    #[must_use]
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// Billing plan of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Evaluation plan.
    Trial,
    /// Public demo plan.
    Demo,
    /// Paid plan for small teams.
    Professional,
    /// Paid plan for large teams.
    Enterprise,
}

/// Widget capabilities that can be enabled per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Place and receive calls.
    Call,
    /// Mute the microphone.
    Mute,
    /// Put a call on hold.
    Hold,
    /// Send DTMF tones.
    Dtmf,
    /// Transfer a call.
    Transfer,
}

/// Tenant account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// The tenant may authorize widgets and place calls.
    Active,
    /// The tenant is blocked.
    Suspended,
}

/// Telephony provider credentials brokered to a tenant's widgets.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    /// Provider access token.
    pub token: String,
    /// Provider user identifier.
    pub user_id: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

// =============================================================================
// Customers
// =============================================================================

/// A customer directory entry, unique per `(tenant, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Internal identifier referenced by sessions.
    pub customer_id: CustomerId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The tenant's own identifier for this customer.
    pub external_id: String,
    /// Mutable attributes, overwritten on every upsert.
    pub profile: CustomerProfile,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Best available display name.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = &self.profile.full_name {
            return Some(name.clone());
        }
        match (&self.profile.first_name, &self.profile.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(name), None) | (None, Some(name)) => Some(name.clone()),
            (None, None) => None,
        }
    }
}

/// The mutable attributes of a customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerProfile {
    /// Full display name.
    pub full_name: Option<String>,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Contact phone number.
    pub phone_number: Option<String>,
    /// Employer or account name.
    pub company_name: Option<String>,
    /// Kind of counterparty, `customer` when unset.
    pub customer_type: Option<String>,
    /// Business segment.
    pub segment: Option<String>,
    /// Business priority.
    pub priority: Option<String>,
    /// Free-form labels.
    pub tags: Vec<String>,
    /// Tenant-defined attributes.
    pub custom_fields: Metadata,
}

// =============================================================================
// Call sessions
// =============================================================================

/// A call session: the lifecycle record of one call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    /// Unique identifier for the session.
    pub session_id: SessionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Counterparty, if known. Weak reference: the customer may be deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    /// The telephony provider's call identifier.
    pub external_call_id: String,
    /// Remote phone number.
    pub phone_number: String,
    /// Call direction.
    pub direction: CallDirection,
    /// Free-form type tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Current lifecycle state.
    pub state: CallState,
    /// Agent handling the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Agent display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// When the session was created.
    pub initiated_at: DateTime<Utc>,
    /// When the remote side started ringing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ringing_at: Option<DateTime<Utc>>,
    /// When the call was answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// When the call reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Talk time in whole seconds, set once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Why the call ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    /// Arbitrary caller-supplied attributes.
    #[serde(default)]
    pub metadata: Metadata,
    /// Number of events recorded against this session.
    ///
    /// Every mutation records exactly one event, so this doubles as the
    /// record version for compare-and-swap commits.
    pub event_count: u32,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl CallSession {
    /// Overwrite the lifecycle-derived fields.
    pub fn set_lifecycle(&mut self, lifecycle: LifecycleSnapshot) {
        self.state = lifecycle.state;
        self.ringing_at = lifecycle.ringing_at;
        self.connected_at = lifecycle.connected_at;
        self.ended_at = lifecycle.ended_at;
        self.duration_seconds = lifecycle.duration_seconds;
        self.end_reason = lifecycle.end_reason;
    }

    /// Returns true if the session can no longer change state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The timestamp of the most recent lifecycle change.
    #[must_use]
    pub fn last_transition_at(&self) -> DateTime<Utc> {
        [self.ringing_at, self.connected_at, self.ended_at]
            .into_iter()
            .flatten()
            .fold(self.initiated_at, std::cmp::max)
    }

    /// The lifecycle-derived part of the session.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            state: self.state,
            ringing_at: self.ringing_at,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
            end_reason: self.end_reason.clone(),
        }
    }
}

/// The fields of a session that are derived from its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    /// Lifecycle state.
    pub state: CallState,
    /// Ringing timestamp.
    pub ringing_at: Option<DateTime<Utc>>,
    /// Connection timestamp.
    pub connected_at: Option<DateTime<Utc>>,
    /// End timestamp.
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in seconds.
    pub duration_seconds: Option<u64>,
    /// End reason.
    pub end_reason: Option<String>,
}

impl LifecycleSnapshot {
    /// The lifecycle of a freshly created session.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            state: CallState::Initiated,
            ringing_at: None,
            connected_at: None,
            ended_at: None,
            duration_seconds: None,
            end_reason: None,
        }
    }
}

/// Direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// The customer called in.
    Inbound,
    /// The agent dialed out.
    #[default]
    Outbound,
}

impl CallDirection {
    /// The wire name of the direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl FromStr for CallDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(format!("unknown call direction: {other}")),
        }
    }
}

/// Lifecycle states for a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CallState {
    /// Session created, nothing heard from the provider yet.
    Initiated = 1,
    /// The remote side is ringing.
    Ringing = 2,
    /// The call was answered.
    Connected = 3,
    /// The call ended normally.
    Completed = 4,
    /// The call was never answered.
    Missed = 5,
    /// The call could not be placed or dropped on error.
    Failed = 6,
}

impl CallState {
    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `CallState`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Initiated),
            2 => Some(Self::Ringing),
            3 => Some(Self::Connected),
            4 => Some(Self::Completed),
            5 => Some(Self::Missed),
            6 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Missed | Self::Failed)
    }

    /// The wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Missed => "missed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "ringing" => Ok(Self::Ringing),
            "connected" => Ok(Self::Connected),
            "completed" => Ok(Self::Completed),
            "missed" => Ok(Self::Missed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown call state: {other}")),
        }
    }
}

// =============================================================================
// Call events
// =============================================================================

/// An immutable entry of a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    /// Unique identifier for the event.
    pub event_id: EventId,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Position in the session's log, starting at 1.
    pub sequence: u32,
    /// Event kind.
    pub event_type: CallEventType,
    /// Raw event data as sent by the upstream.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Who emitted the event (`widget`, `provider`, `engine`, ...).
    pub source: String,
    /// Origin domain the event was reported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Effective event time used for ordering and derivation.
    ///
    /// This is the reported time (or receipt time when none was reported),
    /// capped at the receipt time and raised to the session's last
    /// transition time if it lies before it.
    pub timestamp: DateTime<Utc>,
    /// Event time as reported by the upstream, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
    /// When the event was received.
    pub received_at: DateTime<Utc>,
    /// What the event did to the session.
    pub outcome: EventOutcome,
}

/// Kinds of call and widget events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventType {
    /// An inbound call is being offered.
    Incoming,
    /// An outbound call is ringing at the remote side.
    Ringing,
    /// The call was answered.
    Connected,
    /// The call ended.
    #[serde(alias = "callEnded")]
    CallEnded,
    /// The agent toggled hold.
    #[serde(alias = "holdtoggle")]
    HoldToggle,
    /// The agent toggled mute.
    #[serde(alias = "mutetoggle")]
    MuteToggle,
    /// The widget registered with the provider.
    Registered,
    /// The widget lost its provider registration.
    Unregistered,
}

impl CallEventType {
    /// The wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Ringing => "ringing",
            Self::Connected => "connected",
            Self::CallEnded => "call_ended",
            Self::HoldToggle => "hold_toggle",
            Self::MuteToggle => "mute_toggle",
            Self::Registered => "registered",
            Self::Unregistered => "unregistered",
        }
    }
}

impl fmt::Display for CallEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The effect an event had on its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The event moved the session to a new state.
    Applied,
    /// The event repeated a termination the session already had.
    Duplicate,
    /// The event carries no lifecycle meaning (mute, hold, registration).
    NoTransition,
    /// The event was not legal for the session's state.
    Rejected,
}

// =============================================================================
// Call notes
// =============================================================================

/// A note an agent attached to a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallNote {
    /// Unique identifier for the note.
    pub note_id: NoteId,
    /// Session the note is about.
    pub session_id: SessionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Customer of the session when the note was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    /// Note body.
    pub text: String,
    /// Free-form category (`general`, `promise_to_pay`, ...).
    pub note_type: String,
    /// Who wrote the note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Hidden from customer-facing views.
    #[serde(default)]
    pub is_internal: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Usage
// =============================================================================

/// Per-tenant, per-day usage aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// UTC calendar day.
    pub date: NaiveDate,
    /// Completed calls on that day.
    pub call_count: u64,
    /// Billed call minutes on that day.
    pub call_minutes: u64,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// An addition to a tenant's usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageIncrement {
    /// Tenant to charge.
    pub tenant_id: TenantId,
    /// UTC day the usage belongs to; also selects the monthly counter.
    pub date: NaiveDate,
    /// Calls to add.
    pub calls: u64,
    /// Billed minutes to add.
    pub minutes: u64,
}

/// A calendar month, formatted as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsageMonth {
    year: i32,
    month: u32,
}

impl UsageMonth {
    /// Create a month, returning `None` if `month` is not in `1..=12`.
    #[must_use]
    pub const fn new(year: i32, month: u32) -> Option<Self> {
        if month >= 1 && month <= 12 {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The month containing `date`.
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The calendar year.
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// The month number, 1-based.
    #[must_use]
    pub const fn month(self) -> u32 {
        self.month
    }

    /// Returns true if `date` falls in this month.
    #[must_use]
    pub fn contains(self, date: NaiveDate) -> bool {
        Self::of(date) == self
    }
}

impl fmt::Display for UsageMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for UsageMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid month (expected YYYY-MM): {s}");
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for UsageMonth {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UsageMonth> for String {
    fn from(month: UsageMonth) -> Self {
        month.to_string()
    }
}
