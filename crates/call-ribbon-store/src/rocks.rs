//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Read-modify-write operations hold a striped lock for the record they
//! modify. When several are needed they are taken in the order
//! session, tenant, API key, usage.

use std::path::Path;
use std::sync::Arc;

use call_ribbon_core::{ApiKeyHash, CustomerId, SessionId, TenantId};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::StripedLocks;
use crate::schema::{all_column_families, cf};
use crate::types::{
    CallEvent, CallNote, CallSession, Customer, CustomerProfile, Tenant, TenantStatus,
    UsageIncrement, UsageMonth, UsageRecord,
};
use crate::{SessionCommit, Store};

type KeyValue = (Box<[u8]>, Box<[u8]>);

#[derive(Default)]
struct LockTables {
    tenants: StripedLocks,
    api_keys: StripedLocks,
    customers: StripedLocks,
    call_ids: StripedLocks,
    sessions: StripedLocks,
    usage: StripedLocks,
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: LockTables,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: LockTables::default(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        self.get_raw(cf_name, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Read a 16-byte identifier stored as an index value.
    fn get_id(&self, cf_name: &str, key: &[u8]) -> Result<Option<[u8; 16]>> {
        self.get_raw(cf_name, key)?
            .map(|data| {
                <[u8; 16]>::try_from(data.as_slice()).map_err(|_| {
                    StoreError::Database(format!("corrupt index entry in {cf_name}"))
                })
            })
            .transpose()
    }

    /// Collect every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            entries.push((key, value));
        }
        Ok(entries)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Add the monthly counter and daily record updates for `increment` to `batch`.
    ///
    /// The caller must hold the usage lock of the tenant.
    fn stage_usage(
        &self,
        batch: &mut WriteBatch,
        increment: &UsageIncrement,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let cf_monthly = self.cf(cf::USAGE_MONTHLY)?;
        let cf_daily = self.cf(cf::USAGE_DAILY)?;

        let month_key =
            keys::monthly_usage_key(&increment.tenant_id, UsageMonth::of(increment.date));
        let calls: u64 = self.get_value(cf::USAGE_MONTHLY, &month_key)?.unwrap_or(0);
        batch.put_cf(
            &cf_monthly,
            &month_key,
            Self::serialize(&calls.saturating_add(increment.calls))?,
        );

        let day_key = keys::daily_usage_key(&increment.tenant_id, increment.date);
        let mut record = self
            .get_value::<UsageRecord>(cf::USAGE_DAILY, &day_key)?
            .unwrap_or(UsageRecord {
                tenant_id: increment.tenant_id,
                date: increment.date,
                call_count: 0,
                call_minutes: 0,
                updated_at: now,
            });
        record.call_count = record.call_count.saturating_add(increment.calls);
        record.call_minutes = record.call_minutes.saturating_add(increment.minutes);
        record.updated_at = now;
        batch.put_cf(&cf_daily, &day_key, Self::serialize(&record)?);

        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Tenant Operations
    // =========================================================================

    fn put_tenant(&self, tenant: &Tenant) -> Result<()> {
        let cf_tenants = self.cf(cf::TENANTS)?;
        let cf_by_key = self.cf(cf::TENANTS_BY_API_KEY)?;

        let tenant_key = keys::tenant_key(&tenant.tenant_id);
        let api_key_key = keys::api_key_key(&tenant.api_key_hash);
        let _guard = self.locks.tenants.lock(&tenant_key);

        let old_hash = self
            .get_value::<Tenant>(cf::TENANTS, &tenant_key)?
            .map(|t| t.api_key_hash);
        let old_api_key_key = old_hash
            .filter(|old| *old != tenant.api_key_hash)
            .map(|old| keys::api_key_key(&old));

        let mut key_locks = vec![api_key_key.as_slice()];
        if let Some(old) = &old_api_key_key {
            key_locks.push(old.as_slice());
        }
        let _key_guards = self.locks.api_keys.lock_all(&key_locks);

        if let Some(owner) = self.get_id(cf::TENANTS_BY_API_KEY, &api_key_key)? {
            if owner != *tenant.tenant_id.as_bytes() {
                return Err(StoreError::AlreadyExists);
            }
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_tenants, &tenant_key, Self::serialize(tenant)?);
        batch.put_cf(&cf_by_key, &api_key_key, tenant.tenant_id.as_bytes());

        // Drop the index entry of a rotated key
        if let Some(old) = &old_api_key_key {
            batch.delete_cf(&cf_by_key, old);
        }

        self.write(batch)
    }

    fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        self.get_value(cf::TENANTS, &keys::tenant_key(tenant_id))
    }

    fn get_tenant_by_api_key(&self, api_key_hash: &ApiKeyHash) -> Result<Option<Tenant>> {
        match self.get_id(cf::TENANTS_BY_API_KEY, &keys::api_key_key(api_key_hash))? {
            Some(bytes) => self.get_tenant(&TenantId::from_bytes(bytes)),
            None => Ok(None),
        }
    }

    fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let cf = self.cf(cf::TENANTS)?;

        let mut tenants = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            tenants.push(Self::deserialize(&value)?);
        }

        Ok(tenants)
    }

    fn update_tenant_status(
        &self,
        tenant_id: &TenantId,
        status: TenantStatus,
        now: DateTime<Utc>,
    ) -> Result<Tenant> {
        let cf = self.cf(cf::TENANTS)?;
        let key = keys::tenant_key(tenant_id);
        let _guard = self.locks.tenants.lock(&key);

        let mut tenant: Tenant = self
            .get_value(cf::TENANTS, &key)?
            .ok_or(StoreError::NotFound)?;
        tenant.status = status;
        tenant.updated_at = now;

        self.db
            .put_cf(&cf, &key, Self::serialize(&tenant)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(tenant)
    }

    // =========================================================================
    // Customer Operations
    // =========================================================================

    fn upsert_customer(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
        profile: &CustomerProfile,
        now: DateTime<Utc>,
    ) -> Result<Customer> {
        let cf_customers = self.cf(cf::CUSTOMERS)?;
        let cf_by_external = self.cf(cf::CUSTOMERS_BY_EXTERNAL_ID)?;
        let cf_by_phone = self.cf(cf::CUSTOMERS_BY_PHONE)?;

        let natural_key = keys::customer_external_key(tenant_id, external_id);
        let _guard = self.locks.customers.lock(&natural_key);

        let existing = self.get_customer_by_external_id(tenant_id, external_id)?;
        let old_phone = existing
            .as_ref()
            .and_then(|c| c.profile.phone_number.clone());

        let customer = match existing {
            Some(mut customer) => {
                customer.profile = profile.clone();
                customer.updated_at = now;
                customer
            }
            None => Customer {
                customer_id: CustomerId::generate(),
                tenant_id: *tenant_id,
                external_id: external_id.to_string(),
                profile: profile.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_customers,
            keys::customer_key(&customer.customer_id),
            Self::serialize(&customer)?,
        );
        batch.put_cf(&cf_by_external, &natural_key, customer.customer_id.as_bytes());

        let new_phone = profile.phone_number.as_deref().filter(|p| !p.is_empty());
        if let Some(old) = old_phone.as_deref() {
            if Some(old) != new_phone {
                batch.delete_cf(
                    &cf_by_phone,
                    keys::customer_phone_key(tenant_id, old, &customer.customer_id),
                );
            }
        }
        if let Some(phone) = new_phone {
            batch.put_cf(
                &cf_by_phone,
                keys::customer_phone_key(tenant_id, phone, &customer.customer_id),
                [],
            );
        }

        self.write(batch)?;
        Ok(customer)
    }

    fn get_customer(&self, customer_id: &CustomerId) -> Result<Option<Customer>> {
        self.get_value(cf::CUSTOMERS, &keys::customer_key(customer_id))
    }

    fn get_customer_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<Option<Customer>> {
        let key = keys::customer_external_key(tenant_id, external_id);
        match self.get_id(cf::CUSTOMERS_BY_EXTERNAL_ID, &key)? {
            Some(bytes) => self.get_customer(&CustomerId::from_bytes(bytes)),
            None => Ok(None),
        }
    }

    fn find_customers_by_phone(&self, tenant_id: &TenantId, phone: &str) -> Result<Vec<Customer>> {
        let prefix = keys::customer_phone_prefix(tenant_id, phone);

        let mut customers = Vec::new();
        for (key, _) in self.scan_prefix(cf::CUSTOMERS_BY_PHONE, &prefix)? {
            let customer_id = keys::extract_customer_id_from_phone_key(&key);
            if let Some(customer) = self.get_customer(&customer_id)? {
                customers.push(customer);
            }
        }

        Ok(customers)
    }

    fn delete_customer(&self, customer_id: &CustomerId) -> Result<()> {
        let cf_customers = self.cf(cf::CUSTOMERS)?;
        let cf_by_external = self.cf(cf::CUSTOMERS_BY_EXTERNAL_ID)?;
        let cf_by_phone = self.cf(cf::CUSTOMERS_BY_PHONE)?;

        // Find the natural key, then re-read under its lock
        let found = self.get_customer(customer_id)?.ok_or(StoreError::NotFound)?;
        let natural_key = keys::customer_external_key(&found.tenant_id, &found.external_id);
        let _guard = self.locks.customers.lock(&natural_key);
        let customer = self.get_customer(customer_id)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_customers, keys::customer_key(customer_id));
        batch.delete_cf(&cf_by_external, &natural_key);
        if let Some(phone) = customer.profile.phone_number.as_deref() {
            batch.delete_cf(
                &cf_by_phone,
                keys::customer_phone_key(&customer.tenant_id, phone, customer_id),
            );
        }

        self.write(batch)
    }

    // =========================================================================
    // Session Operations
    // =========================================================================

    fn insert_session(&self, session: &CallSession) -> Result<()> {
        let cf_sessions = self.cf(cf::SESSIONS)?;
        let cf_by_tenant = self.cf(cf::SESSIONS_BY_TENANT)?;
        let cf_by_call_id = self.cf(cf::SESSIONS_BY_CALL_ID)?;
        let cf_active = self.cf(cf::ACTIVE_SESSIONS)?;

        let call_id_key = keys::session_call_id_key(&session.tenant_id, &session.external_call_id);
        let _guard = self.locks.call_ids.lock(&call_id_key);

        if self.get_raw(cf::SESSIONS_BY_CALL_ID, &call_id_key)?.is_some() {
            return Err(StoreError::AlreadyExists);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_sessions,
            keys::session_key(&session.session_id),
            Self::serialize(session)?,
        );
        batch.put_cf(
            &cf_by_tenant,
            keys::tenant_session_key(&session.tenant_id, session.initiated_at, &session.session_id),
            [],
        );
        batch.put_cf(&cf_by_call_id, &call_id_key, session.session_id.as_bytes());
        if !session.is_terminal() {
            batch.put_cf(
                &cf_active,
                keys::active_session_key(&session.tenant_id, &session.session_id),
                [],
            );
        }

        self.write(batch)
    }

    fn get_session(&self, session_id: &SessionId) -> Result<Option<CallSession>> {
        self.get_value(cf::SESSIONS, &keys::session_key(session_id))
    }

    fn get_session_by_external_call_id(
        &self,
        tenant_id: &TenantId,
        external_call_id: &str,
    ) -> Result<Option<CallSession>> {
        let key = keys::session_call_id_key(tenant_id, external_call_id);
        match self.get_id(cf::SESSIONS_BY_CALL_ID, &key)? {
            Some(bytes) => self.get_session(&SessionId::from_bytes(bytes)),
            None => Ok(None),
        }
    }

    fn list_sessions_by_tenant(
        &self,
        tenant_id: &TenantId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallSession>> {
        let cf_by_tenant = self.cf(cf::SESSIONS_BY_TENANT)?;
        let lower = keys::tenant_session_lower_bound(tenant_id, from);
        let upper = keys::tenant_session_upper_bound(tenant_id, to);

        // Walk the time index backwards so the newest session comes first
        let iter = self
            .db
            .iterator_cf(&cf_by_tenant, IteratorMode::From(&upper, Direction::Reverse));

        let mut sessions = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if key.as_ref() < lower.as_slice() {
                break;
            }

            let session_id = keys::extract_session_id_from_tenant_session_key(&key);
            if let Some(session) = self.get_session(&session_id)? {
                sessions.push(session);
            }
        }

        Ok(sessions)
    }

    fn list_active_sessions(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>> {
        let prefix = keys::tenant_prefix(tenant_id);

        let mut sessions = Vec::new();
        for (key, _) in self.scan_prefix(cf::ACTIVE_SESSIONS, &prefix)? {
            let session_id = keys::extract_session_id_from_active_key(&key);
            if let Some(session) = self.get_session(&session_id)? {
                sessions.push(session);
            }
        }

        Ok(sessions)
    }

    fn commit_session_event(&self, commit: &SessionCommit) -> Result<()> {
        let cf_sessions = self.cf(cf::SESSIONS)?;
        let cf_active = self.cf(cf::ACTIVE_SESSIONS)?;
        let cf_events = self.cf(cf::EVENTS)?;

        let session = &commit.session;
        let event = &commit.event;
        debug_assert_eq!(session.session_id, event.session_id);
        debug_assert_eq!(session.event_count, event.sequence);

        let session_key = keys::session_key(&session.session_id);
        let _session_guard = self.locks.sessions.lock(&session_key);

        let current: CallSession = self
            .get_value(cf::SESSIONS, &session_key)?
            .ok_or(StoreError::NotFound)?;
        if current.event_count != commit.expected_event_count {
            return Err(StoreError::Conflict {
                expected: commit.expected_event_count,
                found: current.event_count,
            });
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_sessions, &session_key, Self::serialize(session)?);
        batch.put_cf(
            &cf_events,
            keys::event_key(&event.session_id, event.timestamp, event.sequence),
            Self::serialize(event)?,
        );
        if session.is_terminal() && !current.is_terminal() {
            batch.delete_cf(
                &cf_active,
                keys::active_session_key(&session.tenant_id, &session.session_id),
            );
        }

        let Some(increment) = commit.usage else {
            return self.write(batch);
        };

        let cf_tenants = self.cf(cf::TENANTS)?;
        let tenant_key = keys::tenant_key(&increment.tenant_id);
        let _tenant_guard = self.locks.tenants.lock(&tenant_key);
        let _usage_guard = self.locks.usage.lock(&tenant_key);

        self.stage_usage(&mut batch, &increment, event.received_at)?;
        if let Some(mut tenant) = self.get_value::<Tenant>(cf::TENANTS, &tenant_key)? {
            tenant.last_activity_at = session.ended_at.or(Some(event.received_at));
            batch.put_cf(&cf_tenants, &tenant_key, Self::serialize(&tenant)?);
        }

        self.write(batch)
    }

    // =========================================================================
    // Event Operations
    // =========================================================================

    fn list_events_by_session(&self, session_id: &SessionId) -> Result<Vec<CallEvent>> {
        self.scan_prefix(cf::EVENTS, &keys::event_prefix(session_id))?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }

    // =========================================================================
    // Note Operations
    // =========================================================================

    fn insert_note(&self, note: &CallNote) -> Result<()> {
        let cf = self.cf(cf::NOTES)?;
        let key = keys::note_key(&note.session_id, note.created_at, &note.note_id);
        self.db
            .put_cf(&cf, key, Self::serialize(note)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_notes_by_session(&self, session_id: &SessionId) -> Result<Vec<CallNote>> {
        self.scan_prefix(cf::NOTES, &keys::note_prefix(session_id))?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    fn record_usage(&self, increment: &UsageIncrement, now: DateTime<Utc>) -> Result<()> {
        let tenant_key = keys::tenant_key(&increment.tenant_id);
        let _guard = self.locks.usage.lock(&tenant_key);

        let mut batch = WriteBatch::default();
        self.stage_usage(&mut batch, increment, now)?;
        self.write(batch)
    }

    fn get_monthly_calls(&self, tenant_id: &TenantId, month: UsageMonth) -> Result<u64> {
        let key = keys::monthly_usage_key(tenant_id, month);
        Ok(self.get_value(cf::USAGE_MONTHLY, &key)?.unwrap_or(0))
    }

    fn set_monthly_calls(
        &self,
        tenant_id: &TenantId,
        month: UsageMonth,
        calls: u64,
    ) -> Result<()> {
        let cf = self.cf(cf::USAGE_MONTHLY)?;
        let _guard = self.locks.usage.lock(&keys::tenant_key(tenant_id));

        self.db
            .put_cf(
                &cf,
                keys::monthly_usage_key(tenant_id, month),
                Self::serialize(&calls)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_usage_records(
        &self,
        tenant_id: &TenantId,
        month: UsageMonth,
    ) -> Result<Vec<UsageRecord>> {
        self.scan_prefix(cf::USAGE_DAILY, &keys::monthly_usage_key(tenant_id, month))?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CallDirection, CallEventType, CallState, EventOutcome, Metadata, PlanTier,
        ProviderCredentials,
    };
    use call_ribbon_core::{EventId, NoteId};
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn create_test_tenant(api_key: &str) -> Tenant {
        Tenant {
            tenant_id: TenantId::generate(),
            api_key_hash: ApiKeyHash::of(api_key),
            name: "Collections CRM".to_string(),
            plan: PlanTier::Professional,
            features: BTreeSet::new(),
            allowed_origins: vec!["*".to_string()],
            monthly_call_limit: 100,
            status: TenantStatus::Active,
            credentials: ProviderCredentials {
                token: "token".to_string(),
                user_id: "user".to_string(),
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_activity_at: None,
        }
    }

    fn create_test_session(
        tenant_id: &TenantId,
        call_id: &str,
        initiated_at: DateTime<Utc>,
    ) -> CallSession {
        CallSession {
            session_id: SessionId::generate(),
            tenant_id: *tenant_id,
            customer_id: None,
            external_call_id: call_id.to_string(),
            phone_number: "+15550100".to_string(),
            direction: CallDirection::Outbound,
            call_type: None,
            state: CallState::Initiated,
            agent_id: None,
            agent_name: None,
            initiated_at,
            ringing_at: None,
            connected_at: None,
            ended_at: None,
            duration_seconds: None,
            end_reason: None,
            metadata: Metadata::new(),
            event_count: 0,
            updated_at: initiated_at,
        }
    }

    fn create_test_event(session: &CallSession, event_type: CallEventType) -> CallEvent {
        CallEvent {
            event_id: EventId::generate(),
            session_id: session.session_id,
            tenant_id: session.tenant_id,
            sequence: session.event_count,
            event_type,
            payload: serde_json::Value::Null,
            source: "test".to_string(),
            domain: None,
            timestamp: session.last_transition_at(),
            reported_at: None,
            received_at: session.last_transition_at(),
            outcome: EventOutcome::Applied,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    #[test]
    fn tenant_crud_and_api_key_lookup() {
        let (store, _dir) = create_test_store();
        let mut tenant = create_test_tenant("key-1");

        store.put_tenant(&tenant).unwrap();
        let found = store
            .get_tenant_by_api_key(&ApiKeyHash::of("key-1"))
            .unwrap()
            .unwrap();
        assert_eq!(found.tenant_id, tenant.tenant_id);

        // Rotating the key drops the old index entry
        tenant.api_key_hash = ApiKeyHash::of("key-2");
        store.put_tenant(&tenant).unwrap();
        assert!(store
            .get_tenant_by_api_key(&ApiKeyHash::of("key-1"))
            .unwrap()
            .is_none());
        assert!(store
            .get_tenant_by_api_key(&ApiKeyHash::of("key-2"))
            .unwrap()
            .is_some());

        let suspended = store
            .update_tenant_status(&tenant.tenant_id, TenantStatus::Suspended, Utc::now())
            .unwrap();
        assert_eq!(suspended.status, TenantStatus::Suspended);
        assert_eq!(store.list_tenants().unwrap().len(), 1);
    }

    #[test]
    fn api_key_is_unique_across_tenants() {
        let (store, _dir) = create_test_store();
        store.put_tenant(&create_test_tenant("shared")).unwrap();

        let result = store.put_tenant(&create_test_tenant("shared"));
        assert!(matches!(result, Err(StoreError::AlreadyExists)));
    }

    #[test]
    fn concurrent_registrations_of_one_key_admit_one_tenant() {
        let (store, _dir) = create_test_store();
        let tenants: Vec<Tenant> = (0..8).map(|_| create_test_tenant("contested")).collect();

        let winners: Vec<TenantId> = std::thread::scope(|scope| {
            let handles: Vec<_> = tenants
                .iter()
                .map(|tenant| {
                    let store = &store;
                    scope.spawn(move || store.put_tenant(tenant).ok().map(|()| tenant.tenant_id))
                })
                .collect();
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(winners.len(), 1);
        let owner = store
            .get_tenant_by_api_key(&ApiKeyHash::of("contested"))
            .unwrap()
            .unwrap();
        assert_eq!(owner.tenant_id, winners[0]);
        assert_eq!(store.list_tenants().unwrap().len(), 1);
    }

    #[test]
    fn customer_upsert_keeps_identity() {
        let (store, _dir) = create_test_store();
        let tenant_id = TenantId::generate();
        let mut profile = CustomerProfile {
            full_name: Some("Asha Rao".to_string()),
            phone_number: Some("+15550100".to_string()),
            ..CustomerProfile::default()
        };

        let first = store
            .upsert_customer(&tenant_id, "cust-1", &profile, Utc::now())
            .unwrap();
        profile.phone_number = Some("+15550199".to_string());
        let second = store
            .upsert_customer(&tenant_id, "cust-1", &profile, Utc::now())
            .unwrap();

        assert_eq!(first.customer_id, second.customer_id);
        assert_eq!(first.created_at, second.created_at);
        assert!(store
            .find_customers_by_phone(&tenant_id, "+15550100")
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .find_customers_by_phone(&tenant_id, "+15550199")
                .unwrap()
                .len(),
            1
        );

        store.delete_customer(&first.customer_id).unwrap();
        assert!(store
            .get_customer_by_external_id(&tenant_id, "cust-1")
            .unwrap()
            .is_none());
        assert!(matches!(
            store.delete_customer(&first.customer_id),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn session_call_id_is_unique_per_tenant() {
        let (store, _dir) = create_test_store();
        let tenant_a = TenantId::generate();
        let tenant_b = TenantId::generate();

        store
            .insert_session(&create_test_session(&tenant_a, "call-1", at(9, 0)))
            .unwrap();
        let duplicate = store.insert_session(&create_test_session(&tenant_a, "call-1", at(9, 1)));
        assert!(matches!(duplicate, Err(StoreError::AlreadyExists)));

        // Another tenant may reuse the provider call id
        store
            .insert_session(&create_test_session(&tenant_b, "call-1", at(9, 2)))
            .unwrap();
        let found = store
            .get_session_by_external_call_id(&tenant_a, "call-1")
            .unwrap()
            .unwrap();
        assert_eq!(found.initiated_at, at(9, 0));
    }

    #[test]
    fn sessions_listed_newest_first_within_range() {
        let (store, _dir) = create_test_store();
        let tenant_id = TenantId::generate();
        let other = TenantId::generate();

        for (i, minute) in [0, 10, 20, 30].into_iter().enumerate() {
            let session = create_test_session(&tenant_id, &format!("call-{i}"), at(10, minute));
            store.insert_session(&session).unwrap();
        }
        store
            .insert_session(&create_test_session(&other, "call-x", at(10, 15)))
            .unwrap();

        let all = store.list_sessions_by_tenant(&tenant_id, None, None).unwrap();
        let times: Vec<_> = all.iter().map(|s| s.initiated_at).collect();
        assert_eq!(times, vec![at(10, 30), at(10, 20), at(10, 10), at(10, 0)]);

        let ranged = store
            .list_sessions_by_tenant(&tenant_id, Some(at(10, 10)), Some(at(10, 20)))
            .unwrap();
        assert_eq!(ranged.len(), 2);
    }

    #[test]
    fn commit_rejects_stale_version() {
        let (store, _dir) = create_test_store();
        let tenant_id = TenantId::generate();
        let session = create_test_session(&tenant_id, "call-1", at(11, 0));
        store.insert_session(&session).unwrap();

        let mut ringing = session.clone();
        ringing.state = CallState::Ringing;
        ringing.ringing_at = Some(at(11, 1));
        ringing.event_count = 1;
        let commit = SessionCommit {
            event: create_test_event(&ringing, CallEventType::Ringing),
            session: ringing,
            expected_event_count: 0,
            usage: None,
        };
        store.commit_session_event(&commit).unwrap();

        // Same base version again loses
        let result = store.commit_session_event(&commit);
        assert!(matches!(
            result,
            Err(StoreError::Conflict {
                expected: 0,
                found: 1
            })
        ));
        assert_eq!(store.list_events_by_session(&session.session_id).unwrap().len(), 1);
    }

    #[test]
    fn terminal_commit_charges_usage_once() {
        let (store, _dir) = create_test_store();
        let tenant = create_test_tenant("key");
        store.put_tenant(&tenant).unwrap();
        let session = create_test_session(&tenant.tenant_id, "call-1", at(12, 0));
        store.insert_session(&session).unwrap();
        assert_eq!(store.list_active_sessions(&tenant.tenant_id).unwrap().len(), 1);

        let mut ended = session.clone();
        ended.state = CallState::Completed;
        ended.connected_at = Some(at(12, 0));
        ended.ended_at = Some(at(12, 2));
        ended.duration_seconds = Some(120);
        ended.event_count = 1;
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let commit = SessionCommit {
            event: create_test_event(&ended, CallEventType::CallEnded),
            session: ended,
            expected_event_count: 0,
            usage: Some(UsageIncrement {
                tenant_id: tenant.tenant_id,
                date,
                calls: 1,
                minutes: 2,
            }),
        };
        store.commit_session_event(&commit).unwrap();
        assert!(store.commit_session_event(&commit).is_err());

        let month = UsageMonth::of(date);
        assert_eq!(store.get_monthly_calls(&tenant.tenant_id, month).unwrap(), 1);
        let records = store.list_usage_records(&tenant.tenant_id, month).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].call_minutes, 2);
        assert!(store.list_active_sessions(&tenant.tenant_id).unwrap().is_empty());
        let tenant = store.get_tenant(&tenant.tenant_id).unwrap().unwrap();
        assert_eq!(tenant.last_activity_at, Some(at(12, 2)));
    }

    #[test]
    fn events_are_listed_in_time_order() {
        let (store, _dir) = create_test_store();
        let mut session = create_test_session(&TenantId::generate(), "call-1", at(13, 0));
        store.insert_session(&session).unwrap();

        for (count, event_type) in [CallEventType::MuteToggle, CallEventType::HoldToggle]
            .into_iter()
            .enumerate()
        {
            let expected = session.event_count;
            session.event_count += 1;
            let mut event = create_test_event(&session, event_type);
            event.timestamp += Duration::seconds(i64::try_from(count).unwrap());
            store
                .commit_session_event(&SessionCommit {
                    session: session.clone(),
                    event,
                    expected_event_count: expected,
                    usage: None,
                })
                .unwrap();
        }

        let events = store.list_events_by_session(&session.session_id).unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![CallEventType::MuteToggle, CallEventType::HoldToggle]);
        assert_eq!(events[1].sequence, 2);
    }

    #[test]
    fn notes_are_scoped_to_their_session() {
        let (store, _dir) = create_test_store();
        let tenant_id = TenantId::generate();
        let session = create_test_session(&tenant_id, "call-1", at(14, 0));
        let other = create_test_session(&tenant_id, "call-2", at(14, 0));

        let note = |session: &CallSession, text: &str, created_at| CallNote {
            note_id: NoteId::generate(),
            session_id: session.session_id,
            tenant_id,
            customer_id: None,
            text: text.to_string(),
            note_type: "general".to_string(),
            author: Some("agent-7".to_string()),
            is_internal: false,
            created_at,
        };
        store.insert_note(&note(&session, "promised to pay friday", at(14, 5))).unwrap();
        store.insert_note(&note(&session, "asked for a callback", at(14, 1))).unwrap();
        store.insert_note(&note(&other, "wrong number", at(14, 2))).unwrap();

        let notes = store.list_notes_by_session(&session.session_id).unwrap();
        let texts: Vec<_> = notes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["asked for a callback", "promised to pay friday"]);
    }

    #[test]
    fn concurrent_usage_increments_are_not_lost() {
        let (store, _dir) = create_test_store();
        let tenant_id = TenantId::generate();
        let date = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        let increment = UsageIncrement {
            tenant_id,
            date,
            calls: 1,
            minutes: 3,
        };

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        store.record_usage(&increment, Utc::now()).unwrap();
                    }
                });
            }
        });

        let month = UsageMonth::of(date);
        assert_eq!(store.get_monthly_calls(&tenant_id, month).unwrap(), 200);
        let records = store.list_usage_records(&tenant_id, month).unwrap();
        assert_eq!(records[0].call_count, 200);
        assert_eq!(records[0].call_minutes, 600);

        // A new month starts from zero
        let next = UsageMonth::new(2024, 5).unwrap();
        assert_eq!(store.get_monthly_calls(&tenant_id, next).unwrap(), 0);
    }
}
