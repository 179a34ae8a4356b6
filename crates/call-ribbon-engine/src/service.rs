//! Engine service implementation.
//!
//! This module provides the `CallEngine` trait and `CallEngineService`
//! implementation that the gateway drives. Every operation runs its store
//! work on the blocking pool under a timeout, with "now" taken from the
//! service clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use call_ribbon_core::{SessionId, TenantId};
use call_ribbon_store::{
    CallEvent, CallNote, CallSession, Customer, Store, Tenant, TenantStatus, UsageMonth,
};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::analytics::{self, CallAnalytics};
use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, Result};
use crate::export::{self, ExportRow};
use crate::types::{
    AddNoteRequest, CreateSessionRequest, EngineConfig, EventReceipt, MonthlyUsage, QuotaStatus,
    ReconcileReport, RecordEventRequest, ReplayReport, SessionFilter, SessionPage, TenantConfig,
    TenantRegistration, TenantUsage, TimeRange, TransitionRequest, UpsertCustomerRequest,
    WidgetGrant,
};
use crate::{accounting, customers, events, notes, sessions, tenants};

/// Trait defining the engine operations.
///
/// Every tenant-scoped operation only sees records of that tenant; records
/// of other tenants behave as if they did not exist.
#[async_trait]
pub trait CallEngine: Send + Sync {
    // =========================================================================
    // Tenants
    // =========================================================================

    /// Create or replace a tenant.
    async fn register_tenant(&self, registration: TenantRegistration) -> Result<Tenant>;

    /// Resolve a tenant from its API key.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTenant` if the key is unknown.
    async fn authenticate(&self, api_key: &str) -> Result<Tenant>;

    /// Authorize a widget embedded at `origin`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTenant`, `EngineError::OriginNotAllowed`
    /// or `EngineError::QuotaExceeded`.
    async fn authorize_widget(&self, api_key: &str, origin: Option<&str>) -> Result<WidgetGrant>;

    /// Get the configuration view of a tenant.
    async fn tenant_config(&self, tenant_id: &TenantId) -> Result<TenantConfig>;

    /// Suspend or reactivate a tenant.
    async fn set_tenant_status(&self, tenant_id: &TenantId, status: TenantStatus) -> Result<Tenant>;

    /// Usage overview of every tenant for the current month.
    async fn list_tenant_usage(&self) -> Result<Vec<TenantUsage>>;

    // =========================================================================
    // Customers
    // =========================================================================

    /// Create or update a customer.
    async fn upsert_customer(&self, tenant_id: &TenantId, request: UpsertCustomerRequest) -> Result<Customer>;

    /// Get a customer by the tenant's identifier.
    async fn get_customer(&self, tenant_id: &TenantId, external_id: &str) -> Result<Customer>;

    /// Find customers by phone number.
    async fn find_customers_by_phone(&self, tenant_id: &TenantId, phone: &str) -> Result<Vec<Customer>>;

    /// Delete a customer. Sessions referencing it are kept.
    async fn delete_customer(&self, tenant_id: &TenantId, external_id: &str) -> Result<()>;

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Create a call session, or return the existing one for the call ID.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::QuotaExceeded` if the monthly quota is used up.
    async fn create_session(&self, tenant_id: &TenantId, request: CreateSessionRequest) -> Result<CallSession>;

    /// Apply a lifecycle event to a session.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::IllegalTransition` if the event is not legal in
    /// the session's state.
    async fn transition(
        &self,
        tenant_id: &TenantId,
        session_id: &SessionId,
        request: TransitionRequest,
    ) -> Result<CallSession>;

    /// Get a session.
    async fn get_session(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<CallSession>;

    /// Query sessions, newest first.
    async fn query_sessions(&self, tenant_id: &TenantId, filter: SessionFilter) -> Result<SessionPage>;

    /// List calls in progress, newest first.
    async fn list_active_sessions(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>>;

    // =========================================================================
    // Events
    // =========================================================================

    /// Record an event reported by a widget or provider.
    async fn record_event(&self, tenant_id: &TenantId, request: RecordEventRequest) -> Result<EventReceipt>;

    /// List a session's events in timestamp order.
    async fn list_session_events(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<Vec<CallEvent>>;

    /// Rebuild a session from its events and compare with the stored record.
    async fn replay_session(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<ReplayReport>;

    // =========================================================================
    // Notes
    // =========================================================================

    /// Attach a note to a session.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidRequest` if the note text is empty.
    async fn add_note(
        &self,
        tenant_id: &TenantId,
        session_id: &SessionId,
        request: AddNoteRequest,
    ) -> Result<CallNote>;

    /// List a session's notes, newest first.
    async fn list_notes(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<Vec<CallNote>>;

    // =========================================================================
    // Usage
    // =========================================================================

    /// Quota position for the current month.
    async fn quota_status(&self, tenant_id: &TenantId) -> Result<QuotaStatus>;

    /// Usage in one month.
    async fn monthly_usage(&self, tenant_id: &TenantId, month: UsageMonth) -> Result<MonthlyUsage>;

    /// Recompute a monthly counter from the session history.
    async fn reconcile_month(&self, tenant_id: &TenantId, month: UsageMonth) -> Result<ReconcileReport>;

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Analytics over a window.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidRange` if the window is inverted.
    async fn analytics(
        &self,
        tenant_id: &TenantId,
        range: TimeRange,
        top_limit: Option<usize>,
    ) -> Result<CallAnalytics>;

    /// Export rows for the sessions matching `filter`.
    async fn export_sessions(&self, tenant_id: &TenantId, filter: SessionFilter) -> Result<Vec<ExportRow>>;
}

/// The main engine service implementation.
pub struct CallEngineService<S: Store> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl<S: Store + 'static> CallEngineService<S> {
    /// Create a new engine service on the system clock.
    #[must_use]
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, EngineConfig::default())
    }

    /// Create a service reading time from `clock`.
    #[must_use]
    pub fn with_clock(store: Arc<S>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            clock,
        }
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run store work on the blocking pool, bounded by the store timeout.
    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S, &EngineConfig, DateTime<Utc>) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let now = self.clock.now();
        let timeout = Duration::from_secs(self.config.store_timeout_seconds);

        let task = tokio::task::spawn_blocking(move || work(&store, &config, now));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EngineError::Internal(format!("{operation} task failed: {e}"))),
            Err(_) => {
                warn!(operation, timeout_secs = timeout.as_secs(), "Store operation timed out");
                Err(EngineError::Timeout { operation })
            }
        }
    }
}

#[async_trait]
impl<S: Store + 'static> CallEngine for CallEngineService<S> {
    async fn register_tenant(&self, registration: TenantRegistration) -> Result<Tenant> {
        self.run("register_tenant", move |store, _, now| {
            tenants::register_tenant(store, registration, now)
        })
        .await
    }

    async fn authenticate(&self, api_key: &str) -> Result<Tenant> {
        let api_key = api_key.to_string();
        self.run("authenticate", move |store, _, _| {
            tenants::authenticate(store, &api_key)
        })
        .await
    }

    async fn authorize_widget(&self, api_key: &str, origin: Option<&str>) -> Result<WidgetGrant> {
        let api_key = api_key.to_string();
        let origin = origin.map(str::to_string);
        self.run("authorize_widget", move |store, _, now| {
            tenants::authorize_widget(store, &api_key, origin.as_deref(), now)
        })
        .await
    }

    async fn tenant_config(&self, tenant_id: &TenantId) -> Result<TenantConfig> {
        let tenant_id = *tenant_id;
        self.run("tenant_config", move |store, _, now| {
            tenants::tenant_config(store, &tenant_id, now)
        })
        .await
    }

    async fn set_tenant_status(&self, tenant_id: &TenantId, status: TenantStatus) -> Result<Tenant> {
        let tenant_id = *tenant_id;
        self.run("set_tenant_status", move |store, _, now| {
            tenants::set_tenant_status(store, &tenant_id, status, now)
        })
        .await
    }

    async fn list_tenant_usage(&self) -> Result<Vec<TenantUsage>> {
        self.run("list_tenant_usage", move |store, _, now| {
            store
                .list_tenants()?
                .iter()
                .map(|tenant| accounting::tenant_usage(store, tenant, now))
                .collect()
        })
        .await
    }

    async fn upsert_customer(&self, tenant_id: &TenantId, request: UpsertCustomerRequest) -> Result<Customer> {
        let tenant_id = *tenant_id;
        self.run("upsert_customer", move |store, _, now| {
            customers::upsert_customer(store, &tenant_id, request, now)
        })
        .await
    }

    async fn get_customer(&self, tenant_id: &TenantId, external_id: &str) -> Result<Customer> {
        let tenant_id = *tenant_id;
        let external_id = external_id.to_string();
        self.run("get_customer", move |store, _, _| {
            customers::get_customer(store, &tenant_id, &external_id)
        })
        .await
    }

    async fn find_customers_by_phone(&self, tenant_id: &TenantId, phone: &str) -> Result<Vec<Customer>> {
        let tenant_id = *tenant_id;
        let phone = phone.to_string();
        self.run("find_customers_by_phone", move |store, _, _| {
            customers::find_by_phone(store, &tenant_id, &phone)
        })
        .await
    }

    async fn delete_customer(&self, tenant_id: &TenantId, external_id: &str) -> Result<()> {
        let tenant_id = *tenant_id;
        let external_id = external_id.to_string();
        self.run("delete_customer", move |store, _, _| {
            customers::delete_customer(store, &tenant_id, &external_id)
        })
        .await
    }

    async fn create_session(&self, tenant_id: &TenantId, request: CreateSessionRequest) -> Result<CallSession> {
        let tenant_id = *tenant_id;
        self.run("create_session", move |store, _, now| {
            sessions::create_session(store, &tenant_id, request, now)
        })
        .await
    }

    async fn transition(
        &self,
        tenant_id: &TenantId,
        session_id: &SessionId,
        request: TransitionRequest,
    ) -> Result<CallSession> {
        let tenant_id = *tenant_id;
        let session_id = *session_id;
        self.run("transition", move |store, config, now| {
            sessions::transition(store, config, &tenant_id, &session_id, request, now)
        })
        .await
    }

    async fn get_session(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<CallSession> {
        let tenant_id = *tenant_id;
        let session_id = *session_id;
        self.run("get_session", move |store, _, _| {
            sessions::get_session(store, &tenant_id, &session_id)
        })
        .await
    }

    async fn query_sessions(&self, tenant_id: &TenantId, filter: SessionFilter) -> Result<SessionPage> {
        let tenant_id = *tenant_id;
        self.run("query_sessions", move |store, config, _| {
            sessions::query_sessions(store, config, &tenant_id, &filter)
        })
        .await
    }

    async fn list_active_sessions(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>> {
        let tenant_id = *tenant_id;
        self.run("list_active_sessions", move |store, _, _| {
            sessions::list_active_sessions(store, &tenant_id)
        })
        .await
    }

    async fn record_event(&self, tenant_id: &TenantId, request: RecordEventRequest) -> Result<EventReceipt> {
        let tenant_id = *tenant_id;
        self.run("record_event", move |store, config, now| {
            events::record_event(store, config, &tenant_id, request, now)
        })
        .await
    }

    async fn list_session_events(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<Vec<CallEvent>> {
        let tenant_id = *tenant_id;
        let session_id = *session_id;
        self.run("list_session_events", move |store, _, _| {
            events::list_session_events(store, &tenant_id, &session_id)
        })
        .await
    }

    async fn replay_session(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<ReplayReport> {
        let tenant_id = *tenant_id;
        let session_id = *session_id;
        self.run("replay_session", move |store, _, _| {
            events::replay_session(store, &tenant_id, &session_id)
        })
        .await
    }

    async fn add_note(
        &self,
        tenant_id: &TenantId,
        session_id: &SessionId,
        request: AddNoteRequest,
    ) -> Result<CallNote> {
        let tenant_id = *tenant_id;
        let session_id = *session_id;
        self.run("add_note", move |store, _, now| {
            notes::add_note(store, &tenant_id, &session_id, request, now)
        })
        .await
    }

    async fn list_notes(&self, tenant_id: &TenantId, session_id: &SessionId) -> Result<Vec<CallNote>> {
        let tenant_id = *tenant_id;
        let session_id = *session_id;
        self.run("list_notes", move |store, _, _| {
            notes::list_notes(store, &tenant_id, &session_id)
        })
        .await
    }

    async fn quota_status(&self, tenant_id: &TenantId) -> Result<QuotaStatus> {
        let tenant_id = *tenant_id;
        self.run("quota_status", move |store, _, now| {
            let tenant = tenants::get_tenant(store, &tenant_id)?;
            accounting::quota_status(store, &tenant, now)
        })
        .await
    }

    async fn monthly_usage(&self, tenant_id: &TenantId, month: UsageMonth) -> Result<MonthlyUsage> {
        let tenant_id = *tenant_id;
        self.run("monthly_usage", move |store, _, _| {
            accounting::monthly_usage(store, &tenant_id, month)
        })
        .await
    }

    async fn reconcile_month(&self, tenant_id: &TenantId, month: UsageMonth) -> Result<ReconcileReport> {
        let tenant_id = *tenant_id;
        self.run("reconcile_month", move |store, _, _| {
            tenants::get_tenant(store, &tenant_id)?;
            accounting::reconcile_month(store, &tenant_id, month)
        })
        .await
    }

    async fn analytics(
        &self,
        tenant_id: &TenantId,
        range: TimeRange,
        top_limit: Option<usize>,
    ) -> Result<CallAnalytics> {
        let tenant_id = *tenant_id;
        self.run("analytics", move |store, config, _| {
            analytics::call_analytics(store, config, &tenant_id, range, top_limit)
        })
        .await
    }

    async fn export_sessions(&self, tenant_id: &TenantId, filter: SessionFilter) -> Result<Vec<ExportRow>> {
        let tenant_id = *tenant_id;
        self.run("export_sessions", move |store, config, _| {
            export::export_rows(store, config, &tenant_id, &filter)
        })
        .await
    }
}
