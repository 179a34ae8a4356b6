//! Call Ribbon Gateway - HTTP API for the call widget backend.
//!
//! # Environment
//!
//! - `LISTEN_ADDR`: bind address, `0.0.0.0:8080` by default
//! - `DATA_DIR`: RocksDB directory, `/data/call-ribbon` by default
//! - `ADMIN_TOKEN`: bearer token for `/admin`; admin endpoints are off when unset
//! - `TENANTS_FILE`: JSON array of tenant registrations applied at startup

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_ribbon_engine::{CallEngine, CallEngineService, EngineConfig, TenantRegistration};
use call_ribbon_gateway::{create_router, GatewayConfig, GatewayState};
use call_ribbon_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,call_ribbon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Call Ribbon Gateway");

    // Load configuration from environment
    let mut gateway_config = GatewayConfig::default().with_admin_token(std::env::var("ADMIN_TOKEN").ok());
    if let Ok(listen_addr) = std::env::var("LISTEN_ADDR") {
        gateway_config.listen_addr = listen_addr;
    }
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/call-ribbon".into());
    let tenants_file = std::env::var("TENANTS_FILE").ok();

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = %data_dir,
        tenants_file = ?tenants_file,
        admin_enabled = gateway_config.admin_token.is_some(),
        "Gateway configuration loaded"
    );
    if gateway_config.admin_token.is_none() {
        tracing::warn!("No ADMIN_TOKEN set - admin endpoints are disabled");
    }

    // Initialize RocksDB store
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&data_dir)?);
    let engine = Arc::new(CallEngineService::new(store, EngineConfig::default()));

    if let Some(path) = tenants_file {
        bootstrap_tenants(engine.as_ref(), Path::new(&path)).await?;
    }

    let listen_addr = gateway_config.listen_addr.clone();
    let app = create_router(GatewayState::new(engine, gateway_config));
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Register every tenant listed in a JSON file.
async fn bootstrap_tenants<E: CallEngine>(
    engine: &E,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let registrations: Vec<TenantRegistration> = serde_json::from_str(&contents)?;

    for registration in registrations {
        let tenant = engine.register_tenant(registration).await?;
        tracing::info!(tenant_id = %tenant.tenant_id, name = %tenant.name, "Tenant bootstrapped");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn bootstrap_is_repeatable_across_restarts() {
        let dir = TempDir::new().unwrap();
        let tenants_file = dir.path().join("tenants.json");
        tokio::fs::write(
            &tenants_file,
            r#"[{
                "api_key": "crm-key",
                "name": "Collections CRM",
                "credentials": { "token": "provider-token", "user_id": "provider-user" }
            }]"#,
        )
        .await
        .unwrap();

        let data_dir = dir.path().join("db");
        let first_boot = {
            let store = Arc::new(RocksStore::open(&data_dir).unwrap());
            let engine = CallEngineService::new(store, EngineConfig::default());
            bootstrap_tenants(&engine, &tenants_file).await.unwrap();
            engine.authenticate("crm-key").await.unwrap()
        };

        let store = Arc::new(RocksStore::open(&data_dir).unwrap());
        let engine = CallEngineService::new(store, EngineConfig::default());
        bootstrap_tenants(&engine, &tenants_file).await.unwrap();

        let tenant = engine.authenticate("crm-key").await.unwrap();
        assert_eq!(tenant.tenant_id, first_boot.tenant_id);
        assert_eq!(engine.list_tenant_usage().await.unwrap().len(), 1);
    }
}
