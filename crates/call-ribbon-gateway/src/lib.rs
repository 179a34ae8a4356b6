//! HTTP gateway for call-ribbon.
//!
//! This crate provides the public-facing API of the call widget backend.
//! It handles:
//!
//! - Widget authorization by tenant API key and embedding origin
//! - Call session creation, lifecycle events and queries
//! - Customer directory, analytics, usage and exports
//! - Operator endpoints behind an admin token
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Call widgets / CRM back offices                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   call-ribbon-gateway                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Auth      │ │   Router    │ │    Error mapping    │    │
//! │  │  Extractors │ │  + Handlers │ │    (JSON bodies)    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌──────────────────┐
//!                    │ CallEngine       │
//!                    │ (RocksDB store)  │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use call_ribbon_gateway::{GatewayConfig, GatewayState, create_router};
//! use call_ribbon_engine::CallEngineService;
//! use call_ribbon_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/call-ribbon")?);
//! let engine = Arc::new(CallEngineService::with_defaults(store));
//!
//! let state = GatewayState::new(engine, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;

// Re-export key types for convenience
pub use auth::{AdminAuth, TenantAuth};
