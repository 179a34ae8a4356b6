//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use call_ribbon_engine::CallEngine;

use crate::handlers::{admin, customers, health, reports, ribbon, sessions};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `POST /api/ribbon/init` - Authorize a widget (API key in the body)
///
/// ## Widget (`x-api-key`)
/// - `GET /api/ribbon/config` - Tenant configuration and quota
/// - `POST /api/ribbon/log-call` - Record a call event
///
/// ## Sessions (`x-api-key`)
/// - `POST /v1/sessions` - Create session
/// - `GET /v1/sessions` - Query sessions
/// - `GET /v1/sessions/active` - Calls in progress
/// - `GET /v1/sessions/:session_id` - Get session
/// - `GET /v1/sessions/:session_id/events` - Event log
/// - `POST /v1/sessions/:session_id/events` - Apply a lifecycle event
/// - `GET /v1/sessions/:session_id/replay` - Replay the event log
///
/// ## Customers (`x-api-key`)
/// - `PUT /v1/customers` - Create or update customer
/// - `GET /v1/customers?phone=` - Find by phone
/// - `GET /v1/customers/:external_id` - Get customer
/// - `DELETE /v1/customers/:external_id` - Delete customer
///
/// ## Reports (`x-api-key`)
/// - `GET /v1/analytics` - Call analytics
/// - `GET /v1/usage` - Monthly usage and quota
/// - `GET /v1/export` - CSV or JSON export
///
/// ## Admin (bearer admin token)
/// - `GET /admin/stats` - Usage of every tenant
/// - `POST /admin/tenants` - Register tenant
/// - `PUT /admin/tenants/:tenant_id/status` - Suspend or reactivate
/// - `POST /admin/tenants/:tenant_id/reconcile` - Recompute a monthly counter
pub fn create_router<E>(state: GatewayState<E>) -> Router
where
    E: CallEngine + 'static,
{
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Widget
        .route("/api/ribbon/init", post(ribbon::init::<E>))
        .route("/api/ribbon/config", get(ribbon::config::<E>))
        .route("/api/ribbon/log-call", post(ribbon::log_call::<E>))
        // Sessions
        .route(
            "/v1/sessions",
            post(sessions::create_session::<E>).get(sessions::query_sessions::<E>),
        )
        .route(
            "/v1/sessions/active",
            get(sessions::list_active_sessions::<E>),
        )
        .route("/v1/sessions/:session_id", get(sessions::get_session::<E>))
        .route(
            "/v1/sessions/:session_id/events",
            get(sessions::list_events::<E>).post(sessions::transition::<E>),
        )
        .route(
            "/v1/sessions/:session_id/replay",
            get(sessions::replay_session::<E>),
        )
        .route(
            "/v1/sessions/:session_id/notes",
            get(sessions::list_notes::<E>).post(sessions::add_note::<E>),
        )
        // Customers
        .route(
            "/v1/customers",
            put(customers::upsert_customer::<E>).get(customers::find_customers::<E>),
        )
        .route(
            "/v1/customers/:external_id",
            get(customers::get_customer::<E>).delete(customers::delete_customer::<E>),
        )
        // Reports
        .route("/v1/analytics", get(reports::analytics::<E>))
        .route("/v1/usage", get(reports::usage::<E>))
        .route("/v1/export", get(reports::export_sessions::<E>))
        // Admin
        .route("/admin/stats", get(admin::stats::<E>))
        .route("/admin/tenants", post(admin::register_tenant::<E>))
        .route(
            "/admin/tenants/:tenant_id/status",
            put(admin::set_tenant_status::<E>),
        )
        .route(
            "/admin/tenants/:tenant_id/reconcile",
            post(admin::reconcile::<E>),
        )
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(RequestBodyLimitLayer::new(max_body_bytes))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
