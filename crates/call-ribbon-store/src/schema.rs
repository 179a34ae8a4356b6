//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary tenant records, keyed by `tenant_id`.
    pub const TENANTS: &str = "tenants";

    /// Index: tenants by API key, keyed by `api_key_hash`, value `tenant_id`.
    pub const TENANTS_BY_API_KEY: &str = "tenants_by_api_key";

    /// Primary customer records, keyed by `customer_id`.
    pub const CUSTOMERS: &str = "customers";

    /// Unique index: customers by `tenant_id || external_id`, value `customer_id`.
    pub const CUSTOMERS_BY_EXTERNAL_ID: &str = "customers_by_external_id";

    /// Index: customers by `tenant_id || phone || 0x00 || customer_id`.
    pub const CUSTOMERS_BY_PHONE: &str = "customers_by_phone";

    /// Primary call session records, keyed by `session_id`.
    pub const SESSIONS: &str = "sessions";

    /// Index: sessions by `tenant_id || initiated_at || session_id`.
    pub const SESSIONS_BY_TENANT: &str = "sessions_by_tenant";

    /// Unique index: sessions by `tenant_id || external_call_id`, value `session_id`.
    pub const SESSIONS_BY_CALL_ID: &str = "sessions_by_call_id";

    /// Index: non-terminal sessions by `tenant_id || session_id`.
    pub const ACTIVE_SESSIONS: &str = "active_sessions";

    /// Event log, keyed by `session_id || timestamp || sequence`.
    pub const EVENTS: &str = "events";

    /// Call notes, keyed by `session_id || created_at || note_id`.
    pub const NOTES: &str = "notes";

    /// Live monthly call counters, keyed by `tenant_id || year || month`.
    pub const USAGE_MONTHLY: &str = "usage_monthly";

    /// Daily usage records, keyed by `tenant_id || year || month || day`.
    pub const USAGE_DAILY: &str = "usage_daily";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::TENANTS,
        cf::TENANTS_BY_API_KEY,
        cf::CUSTOMERS,
        cf::CUSTOMERS_BY_EXTERNAL_ID,
        cf::CUSTOMERS_BY_PHONE,
        cf::SESSIONS,
        cf::SESSIONS_BY_TENANT,
        cf::SESSIONS_BY_CALL_ID,
        cf::ACTIVE_SESSIONS,
        cf::EVENTS,
        cf::NOTES,
        cf::USAGE_MONTHLY,
        cf::USAGE_DAILY,
    ]
}
