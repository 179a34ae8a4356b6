//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions to encode and decode keys for the primary
//! records and their indexes. Composite keys put the scan dimension first so
//! every listing is a prefix or range scan. Timestamps are encoded so that
//! byte order equals chronological order.

use call_ribbon_core::{ApiKeyHash, CustomerId, NoteId, SessionId, TenantId};
use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::types::UsageMonth;

const ID_LEN: usize = 16;
const TIMESTAMP_LEN: usize = 8;

/// Encode a timestamp as 8 big-endian bytes that sort chronologically.
#[must_use]
pub fn encode_timestamp(at: DateTime<Utc>) -> [u8; TIMESTAMP_LEN] {
    // Flipping the sign bit maps i64 order onto unsigned byte order.
    #[allow(clippy::cast_sign_loss)]
    let biased = (at.timestamp_millis() as u64) ^ (1 << 63);
    biased.to_be_bytes()
}

fn id_from(key: &[u8], offset: usize) -> [u8; ID_LEN] {
    let mut bytes = [0u8; ID_LEN];
    bytes.copy_from_slice(&key[offset..offset + ID_LEN]);
    bytes
}

/// Encode a tenant key (just the tenant ID bytes).
#[must_use]
pub fn tenant_key(tenant_id: &TenantId) -> Vec<u8> {
    tenant_id.as_bytes().to_vec()
}

/// Encode an API key index key (just the hash bytes).
#[must_use]
pub fn api_key_key(hash: &ApiKeyHash) -> Vec<u8> {
    hash.as_bytes().to_vec()
}

/// Encode a tenant prefix for scanning any tenant-scoped index.
#[must_use]
pub fn tenant_prefix(tenant_id: &TenantId) -> Vec<u8> {
    tenant_id.as_bytes().to_vec()
}

/// Encode a customer key (just the customer ID bytes).
#[must_use]
pub fn customer_key(customer_id: &CustomerId) -> Vec<u8> {
    customer_id.as_bytes().to_vec()
}

/// Encode a customer natural key: `tenant_id || external_id`.
#[must_use]
pub fn customer_external_key(tenant_id: &TenantId, external_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + external_id.len());
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(external_id.as_bytes());
    key
}

/// Encode a phone prefix: `tenant_id || phone || 0x00`.
#[must_use]
pub fn customer_phone_prefix(tenant_id: &TenantId, phone: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + phone.len() + 1 + ID_LEN);
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(phone.as_bytes());
    key.push(0);
    key
}

/// Encode a phone index key: `tenant_id || phone || 0x00 || customer_id`.
#[must_use]
pub fn customer_phone_key(tenant_id: &TenantId, phone: &str, customer_id: &CustomerId) -> Vec<u8> {
    let mut key = customer_phone_prefix(tenant_id, phone);
    key.extend_from_slice(customer_id.as_bytes());
    key
}

/// Extract the customer ID from the tail of a phone index key.
///
/// # Panics
///
/// Panics if the key is shorter than 16 bytes.
#[must_use]
pub fn extract_customer_id_from_phone_key(key: &[u8]) -> CustomerId {
    CustomerId::from_bytes(id_from(key, key.len() - ID_LEN))
}

/// Encode a session key (just the session ID bytes).
#[must_use]
pub fn session_key(session_id: &SessionId) -> Vec<u8> {
    session_id.as_bytes().to_vec()
}

/// Encode a tenant-session index key: `tenant_id || initiated_at || session_id`.
///
/// Scanning a tenant prefix yields sessions in initiation order.
#[must_use]
pub fn tenant_session_key(
    tenant_id: &TenantId,
    initiated_at: DateTime<Utc>,
    session_id: &SessionId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + TIMESTAMP_LEN + ID_LEN);
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(&encode_timestamp(initiated_at));
    key.extend_from_slice(session_id.as_bytes());
    key
}

/// Lower bound of the tenant-session index for sessions initiated at or after `from`.
#[must_use]
pub fn tenant_session_lower_bound(tenant_id: &TenantId, from: Option<DateTime<Utc>>) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    if let Some(from) = from {
        key.extend_from_slice(&encode_timestamp(from));
    }
    key
}

/// Upper bound of the tenant-session index for sessions initiated at or before `to`.
#[must_use]
pub fn tenant_session_upper_bound(tenant_id: &TenantId, to: Option<DateTime<Utc>>) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    match to {
        Some(to) => key.extend_from_slice(&encode_timestamp(to)),
        None => key.extend_from_slice(&[0xff; TIMESTAMP_LEN]),
    }
    key.extend_from_slice(&[0xff; ID_LEN]);
    key
}

/// Extract the session ID from a tenant-session index key.
///
/// # Panics
///
/// Panics if the key is not at least 40 bytes.
#[must_use]
pub fn extract_session_id_from_tenant_session_key(key: &[u8]) -> SessionId {
    SessionId::from_bytes(id_from(key, ID_LEN + TIMESTAMP_LEN))
}

/// Encode a call-id index key: `tenant_id || external_call_id`.
#[must_use]
pub fn session_call_id_key(tenant_id: &TenantId, external_call_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + external_call_id.len());
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(external_call_id.as_bytes());
    key
}

/// Encode an active-session index key: `tenant_id || session_id`.
#[must_use]
pub fn active_session_key(tenant_id: &TenantId, session_id: &SessionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(session_id.as_bytes());
    key
}

/// Extract the session ID from an active-session index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_session_id_from_active_key(key: &[u8]) -> SessionId {
    SessionId::from_bytes(id_from(key, ID_LEN))
}

/// Encode an event key: `session_id || timestamp || sequence`.
#[must_use]
pub fn event_key(session_id: &SessionId, timestamp: DateTime<Utc>, sequence: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + TIMESTAMP_LEN + 4);
    key.extend_from_slice(session_id.as_bytes());
    key.extend_from_slice(&encode_timestamp(timestamp));
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Encode a session prefix for scanning a session's events.
#[must_use]
pub fn event_prefix(session_id: &SessionId) -> Vec<u8> {
    session_id.as_bytes().to_vec()
}

/// Encode a note key: `session_id || created_at || note_id`.
#[must_use]
pub fn note_key(session_id: &SessionId, created_at: DateTime<Utc>, note_id: &NoteId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + TIMESTAMP_LEN + ID_LEN);
    key.extend_from_slice(session_id.as_bytes());
    key.extend_from_slice(&encode_timestamp(created_at));
    key.extend_from_slice(note_id.as_bytes());
    key
}

/// Encode a session prefix for scanning a session's notes.
#[must_use]
pub fn note_prefix(session_id: &SessionId) -> Vec<u8> {
    session_id.as_bytes().to_vec()
}

fn encode_year(year: i32) -> [u8; 4] {
    #[allow(clippy::cast_sign_loss)]
    let biased = (year as u32) ^ (1 << 31);
    biased.to_be_bytes()
}

/// Encode a monthly counter key: `tenant_id || year || month`.
#[must_use]
pub fn monthly_usage_key(tenant_id: &TenantId, month: UsageMonth) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + 5);
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(&encode_year(month.year()));
    #[allow(clippy::cast_possible_truncation)]
    key.push(month.month() as u8);
    key
}

/// Encode a daily usage key: `tenant_id || year || month || day`.
///
/// The monthly counter key of the same month is a prefix of this key.
#[must_use]
pub fn daily_usage_key(tenant_id: &TenantId, date: NaiveDate) -> Vec<u8> {
    let mut key = monthly_usage_key(tenant_id, UsageMonth::of(date));
    #[allow(clippy::cast_possible_truncation)]
    key.push(date.day() as u8);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn timestamps_sort_chronologically() {
        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let later = epoch + Duration::milliseconds(1);

        assert!(encode_timestamp(before_epoch) < encode_timestamp(epoch));
        assert!(encode_timestamp(epoch) < encode_timestamp(later));
    }

    #[test]
    fn tenant_session_key_roundtrip() {
        let tenant_id = TenantId::from_bytes([1u8; 16]);
        let session_id = SessionId::generate();
        let key = tenant_session_key(&tenant_id, Utc::now(), &session_id);

        assert_eq!(key.len(), 40);
        assert!(key.starts_with(&tenant_prefix(&tenant_id)));
        assert_eq!(extract_session_id_from_tenant_session_key(&key), session_id);
    }

    #[test]
    fn tenant_session_bounds_enclose_range() {
        let tenant_id = TenantId::from_bytes([1u8; 16]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let inside = tenant_session_key(&tenant_id, start + Duration::days(3), &SessionId::generate());
        let at_end = tenant_session_key(&tenant_id, end, &SessionId::generate());
        let after = tenant_session_key(&tenant_id, end + Duration::seconds(1), &SessionId::generate());

        let lower = tenant_session_lower_bound(&tenant_id, Some(start));
        let upper = tenant_session_upper_bound(&tenant_id, Some(end));

        assert!(lower <= inside && inside <= upper);
        assert!(at_end <= upper);
        assert!(after > upper);
    }

    #[test]
    fn phone_key_roundtrip() {
        let tenant_id = TenantId::from_bytes([1u8; 16]);
        let customer_id = CustomerId::generate();
        let key = customer_phone_key(&tenant_id, "+919876543210", &customer_id);

        assert!(key.starts_with(&customer_phone_prefix(&tenant_id, "+919876543210")));
        assert!(!key.starts_with(&customer_phone_prefix(&tenant_id, "+91987654321")));
        assert_eq!(extract_customer_id_from_phone_key(&key), customer_id);
    }

    #[test]
    fn events_order_by_time_then_sequence() {
        let session_id = SessionId::generate();
        let t0 = Utc::now();
        let first = event_key(&session_id, t0, 2);
        let tie = event_key(&session_id, t0, 3);
        let later = event_key(&session_id, t0 + Duration::seconds(1), 1);

        assert!(first < tie);
        assert!(tie < later);
    }

    #[test]
    fn notes_order_by_creation() {
        let session_id = SessionId::generate();
        let t0 = Utc::now();
        let first = note_key(&session_id, t0, &NoteId::from_bytes([9u8; 16]));
        let later = note_key(
            &session_id,
            t0 + Duration::milliseconds(1),
            &NoteId::from_bytes([0u8; 16]),
        );

        assert!(first < later);
        assert!(first.starts_with(&note_prefix(&session_id)));
    }

    #[test]
    fn daily_keys_share_monthly_prefix() {
        let tenant_id = TenantId::from_bytes([2u8; 16]);
        let date = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        let monthly = monthly_usage_key(&tenant_id, UsageMonth::of(date));
        let daily = daily_usage_key(&tenant_id, date);

        assert!(daily.starts_with(&monthly));
        let next_month = daily_usage_key(&tenant_id, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert!(!next_month.starts_with(&monthly));
    }
}
