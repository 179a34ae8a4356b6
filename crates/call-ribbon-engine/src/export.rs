//! Session export.
//!
//! Exports flatten a filtered session list into rows joined with the
//! customer directory. Customers deleted since the call leave their
//! columns blank.

use std::collections::HashMap;
use std::str::FromStr;

use call_ribbon_core::{CustomerId, SessionId, TenantId};
use call_ribbon_store::{CallDirection, CallState, Customer, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::sessions;
use crate::types::{EngineConfig, SessionFilter};

/// Output format of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated values with a header row.
    #[default]
    Csv,
    /// A JSON array of rows.
    Json,
}

impl ExportFormat {
    /// The MIME type of the rendered export.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// One exported session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    /// Session identifier.
    pub session_id: SessionId,
    /// Customer display name.
    pub customer_name: Option<String>,
    /// The tenant's identifier for the customer.
    pub customer_external_id: Option<String>,
    /// Remote phone number.
    pub phone_number: String,
    /// Call direction.
    pub direction: CallDirection,
    /// Lifecycle state.
    pub state: CallState,
    /// Creation time.
    pub initiated_at: DateTime<Utc>,
    /// Answer time.
    pub connected_at: Option<DateTime<Utc>>,
    /// End time.
    pub ended_at: Option<DateTime<Utc>>,
    /// Talk time in seconds.
    pub duration_seconds: Option<u64>,
    /// Why the call ended.
    pub end_reason: Option<String>,
}

/// Build export rows for a tenant's sessions matching `filter`, newest first.
///
/// Paging in `filter` is ignored; the result is capped at the configured
/// maximum row count.
///
/// # Errors
///
/// Returns `EngineError::InvalidRange` if the window is inverted.
pub fn export_rows<S: Store>(
    store: &S,
    config: &EngineConfig,
    tenant_id: &TenantId,
    filter: &SessionFilter,
) -> Result<Vec<ExportRow>> {
    filter.range.validate()?;
    let matching = sessions::matching_sessions(store, tenant_id, filter)?;
    if matching.len() > config.max_export_rows {
        warn!(
            tenant_id = %tenant_id,
            matching = matching.len(),
            max = config.max_export_rows,
            "Export truncated"
        );
    }

    let mut directory: HashMap<CustomerId, Option<Customer>> = HashMap::new();
    let mut rows = Vec::with_capacity(matching.len().min(config.max_export_rows));
    for session in matching.into_iter().take(config.max_export_rows) {
        let customer = match session.customer_id {
            Some(id) => {
                if !directory.contains_key(&id) {
                    directory.insert(id, store.get_customer(&id)?);
                }
                directory.get(&id).and_then(Option::as_ref)
            }
            None => None,
        };

        rows.push(ExportRow {
            session_id: session.session_id,
            customer_name: customer.and_then(Customer::display_name),
            customer_external_id: customer.map(|c| c.external_id.clone()),
            phone_number: session.phone_number,
            direction: session.direction,
            state: session.state,
            initiated_at: session.initiated_at,
            connected_at: session.connected_at,
            ended_at: session.ended_at,
            duration_seconds: session.duration_seconds,
            end_reason: session.end_reason,
        });
    }

    debug!(tenant_id = %tenant_id, rows = rows.len(), "Export built");
    Ok(rows)
}

/// Render rows as CSV with a header row.
///
/// # Errors
///
/// Returns `EngineError::Internal` if a row cannot be encoded.
pub fn to_csv(rows: &[ExportRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| EngineError::Internal(format!("csv encoding failed: {e}")))?;
    }
    if rows.is_empty() {
        writer
            .write_record(HEADER)
            .map_err(|e| EngineError::Internal(format!("csv encoding failed: {e}")))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| EngineError::Internal(format!("csv flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| EngineError::Internal(format!("csv is not utf-8: {e}")))
}

/// Render rows in `format`.
///
/// # Errors
///
/// Returns `EngineError::Internal` if encoding fails.
pub fn render(rows: &[ExportRow], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => to_csv(rows),
        ExportFormat::Json => serde_json::to_string(rows)
            .map_err(|e| EngineError::Internal(format!("json encoding failed: {e}"))),
    }
}

const HEADER: [&str; 11] = [
    "session_id",
    "customer_name",
    "customer_external_id",
    "phone_number",
    "direction",
    "state",
    "initiated_at",
    "connected_at",
    "ended_at",
    "duration_seconds",
    "end_reason",
];
