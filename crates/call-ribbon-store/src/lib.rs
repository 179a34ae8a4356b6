//! `RocksDB` storage layer for call-ribbon.
//!
//! This crate provides persistent storage for tenants, customers, call
//! sessions, call events and usage counters using `RocksDB` with column
//! families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `tenants` / `tenants_by_api_key`: tenant records and the API key index
//! - `customers` / `customers_by_external_id` / `customers_by_phone`: the customer directory
//! - `sessions` / `sessions_by_tenant` / `sessions_by_call_id` / `active_sessions`:
//!   call sessions with a time index per tenant
//! - `events`: the per-session event log in timestamp order
//! - `notes`: agent notes per session
//! - `usage_monthly` / `usage_daily`: live quota counters and daily usage records
//!
//! # Example
//!
//! ```no_run
//! use call_ribbon_store::{RocksStore, Store};
//! use call_ribbon_core::TenantId;
//!
//! let store = RocksStore::open("/tmp/call-ribbon-db").unwrap();
//!
//! // List the calls still in progress for a tenant
//! let tenant_id = TenantId::from_bytes([0u8; 16]);
//! let active = store.list_active_sessions(&tenant_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod locks;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    CallDirection, CallEvent, CallEventType, CallNote, CallSession, CallState, Customer,
    CustomerProfile, EventOutcome, Feature, LifecycleSnapshot, Metadata, PlanTier,
    ProviderCredentials, Tenant, TenantStatus, UsageIncrement, UsageMonth, UsageRecord,
};

use call_ribbon_core::{ApiKeyHash, CustomerId, SessionId, TenantId};
use chrono::{DateTime, Utc};

/// A session mutation together with the event that caused it.
///
/// Committed atomically: the session record, the event, the active-session
/// index and (optionally) the usage counters are written in one batch.
#[derive(Debug, Clone)]
pub struct SessionCommit {
    /// The new session record. Its `event_count` must be `expected_event_count + 1`.
    pub session: CallSession,
    /// The event to append. Its `sequence` must equal the new `event_count`.
    pub event: CallEvent,
    /// The `event_count` the caller read before deriving the new record.
    pub expected_event_count: u32,
    /// Usage to charge together with this commit.
    pub usage: Option<UsageIncrement>,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Tenant Operations
    // =========================================================================

    /// Insert or update a tenant record.
    ///
    /// This also maintains the API key index.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the API key belongs to another tenant.
    fn put_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Get a tenant by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>>;

    /// Get a tenant by the hash of its API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_tenant_by_api_key(&self, api_key_hash: &ApiKeyHash) -> Result<Option<Tenant>>;

    /// List all tenants.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Set a tenant's status.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the tenant doesn't exist.
    fn update_tenant_status(
        &self,
        tenant_id: &TenantId,
        status: TenantStatus,
        now: DateTime<Utc>,
    ) -> Result<Tenant>;

    // =========================================================================
    // Customer Operations
    // =========================================================================

    /// Insert or update the customer identified by `(tenant_id, external_id)`.
    ///
    /// An existing customer keeps its ID and creation time; the profile is
    /// overwritten. The phone index follows the new profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn upsert_customer(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
        profile: &CustomerProfile,
        now: DateTime<Utc>,
    ) -> Result<Customer>;

    /// Get a customer by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_customer(&self, customer_id: &CustomerId) -> Result<Option<Customer>>;

    /// Get a customer by its natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_customer_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<Option<Customer>>;

    /// List a tenant's customers with the given phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_customers_by_phone(&self, tenant_id: &TenantId, phone: &str) -> Result<Vec<Customer>>;

    /// Delete a customer and its index entries.
    ///
    /// Sessions referencing the customer are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the customer doesn't exist.
    fn delete_customer(&self, customer_id: &CustomerId) -> Result<()>;

    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Insert a new session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the tenant already has a session
    /// with the same external call ID.
    fn insert_session(&self, session: &CallSession) -> Result<()>;

    /// Get a session by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_session(&self, session_id: &SessionId) -> Result<Option<CallSession>>;

    /// Get a session by the provider's call identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_session_by_external_call_id(
        &self,
        tenant_id: &TenantId,
        external_call_id: &str,
    ) -> Result<Option<CallSession>>;

    /// List a tenant's sessions initiated within `[from, to]`, newest first.
    ///
    /// Open bounds are unbounded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_sessions_by_tenant(
        &self,
        tenant_id: &TenantId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallSession>>;

    /// List a tenant's non-terminal sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_active_sessions(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>>;

    /// Atomically apply a session mutation and append its event.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the session doesn't exist and
    /// `StoreError::Conflict` if its `event_count` is no longer
    /// `expected_event_count`. Nothing is written in either case.
    fn commit_session_event(&self, commit: &SessionCommit) -> Result<()>;

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// List a session's events ordered by timestamp, then sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_events_by_session(&self, session_id: &SessionId) -> Result<Vec<CallEvent>>;

    // =========================================================================
    // Note Operations
    // =========================================================================

    /// Append a note to a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_note(&self, note: &CallNote) -> Result<()>;

    /// List a session's notes, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_notes_by_session(&self, session_id: &SessionId) -> Result<Vec<CallNote>>;

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Atomically add to a tenant's monthly counter and daily usage record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_usage(&self, increment: &UsageIncrement, now: DateTime<Utc>) -> Result<()>;

    /// Get the live call counter for a month (zero if nothing was recorded).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_monthly_calls(&self, tenant_id: &TenantId, month: UsageMonth) -> Result<u64>;

    /// Overwrite the live call counter for a month.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn set_monthly_calls(&self, tenant_id: &TenantId, month: UsageMonth, calls: u64)
        -> Result<()>;

    /// List a tenant's daily usage records for a month, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage_records(&self, tenant_id: &TenantId, month: UsageMonth)
        -> Result<Vec<UsageRecord>>;
}
