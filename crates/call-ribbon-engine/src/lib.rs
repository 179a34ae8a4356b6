//! Call session lifecycle and usage accounting for call-ribbon.
//!
//! This crate provides the business logic behind the call widget: the tenant
//! registry, the customer directory, call sessions and their event log,
//! monthly quotas and usage counters, analytics and exports.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Gateway (HTTP)                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CallEngineService                        │
//! │  ┌──────────┐ ┌──────────┐ ┌────────────┐ ┌─────────────┐   │
//! │  │ Tenants  │ │ Sessions │ │ Event log  │ │ Accounting  │   │
//! │  │ Customers│ │ Lifecycle│ │ + replay   │ │ Analytics   │   │
//! │  └──────────┘ └──────────┘ └────────────┘ └─────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                       ┌──────────────┐
//!                       │    Store     │
//!                       │  (RocksDB)   │
//!                       └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use call_ribbon_engine::{CallEngine, CallEngineService, CreateSessionRequest};
//! use call_ribbon_store::RocksStore;
//!
//! # async fn example(tenant_id: call_ribbon_core::TenantId) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/call-ribbon")?);
//! let engine = CallEngineService::with_defaults(store);
//!
//! let request = CreateSessionRequest::new("provider-call-42", "+15550100");
//! let session = engine.create_session(&tenant_id, request).await?;
//!
//! println!("Created session: {}", session.session_id);
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! Sessions follow a strict state machine:
//!
//! - `Initiated` → `Ringing`, `Connected`, `Completed`, `Missed` or `Failed`
//! - `Ringing` → `Connected`, `Completed`, `Missed` or `Failed`
//! - `Connected` → `Completed`, `Missed` or `Failed`
//! - `Completed`, `Missed` and `Failed` are terminal
//!
//! Each completed call is charged to its tenant exactly once, in the same
//! commit that moves the session into `Completed`. See the [`lifecycle`]
//! and [`events`] modules.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod accounting;
pub mod analytics;
pub mod clock;
pub mod customers;
pub mod error;
pub mod events;
pub mod export;
pub mod lifecycle;
pub mod notes;
pub mod service;
pub mod sessions;
pub mod tenants;
pub mod types;

#[cfg(test)]
mod testing;

pub use analytics::{
    BasicStats, CallAnalytics, DurationBuckets, HourlyHistogram, TopCustomer, WeeklyHistogram,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, Result};
pub use events::RejectPolicy;
pub use export::{ExportFormat, ExportRow};
pub use service::{CallEngine, CallEngineService};
pub use types::{
    AddNoteRequest, CreateSessionRequest, EngineConfig, EventReceipt, MonthlyUsage, QuotaStatus,
    ReconcileReport, RecordEventRequest, ReplayReport, SessionFilter, SessionPage, TenantConfig,
    TenantRegistration, TenantUsage, TimeRange, TransitionRequest, UpsertCustomerRequest,
    WidgetGrant,
};

// Re-export commonly used types from dependencies for convenience
pub use call_ribbon_core::{CustomerId, EventId, NoteId, SessionId, TenantId};
pub use call_ribbon_store::{
    CallDirection, CallEvent, CallEventType, CallNote, CallSession, CallState, Customer,
    CustomerProfile, EventOutcome, Feature, PlanTier, Tenant, TenantStatus, UsageMonth,
    UsageRecord,
};
