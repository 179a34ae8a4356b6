//! Gateway application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use call_ribbon_engine::CallEngine;

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
pub struct GatewayState<E>
where
    E: CallEngine,
{
    /// The engine behind every endpoint.
    pub engine: Arc<E>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<E> GatewayState<E>
where
    E: CallEngine,
{
    /// Create a new gateway state.
    #[must_use]
    pub fn new(engine: Arc<E>, config: GatewayConfig) -> Self {
        Self { engine, config }
    }
}

impl<E> Clone for GatewayState<E>
where
    E: CallEngine,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
        }
    }
}
