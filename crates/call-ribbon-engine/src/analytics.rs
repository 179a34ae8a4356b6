//! Call analytics.
//!
//! Aggregates are computed at query time over the terminal sessions a tenant
//! initiated in an inclusive UTC window. Histograms bucket by initiation
//! time and are always dense.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use call_ribbon_core::{CustomerId, TenantId};
use call_ribbon_store::{CallDirection, CallSession, CallState, Store};
use chrono::{Datelike, Timelike};
use serde::Serialize;

use crate::error::Result;
use crate::types::{EngineConfig, TimeRange};

/// Headline counters over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BasicStats {
    /// Terminal sessions in the window.
    pub total_calls: u64,
    /// Sessions that completed.
    pub completed_calls: u64,
    /// Sessions that were never answered.
    pub missed_calls: u64,
    /// Sessions that failed.
    pub failed_calls: u64,
    /// Inbound sessions.
    pub inbound_calls: u64,
    /// Outbound sessions.
    pub outbound_calls: u64,
    /// Talk time of completed sessions, in seconds.
    pub total_duration_seconds: u64,
    /// Mean talk time of completed sessions, 0 when there are none.
    pub average_duration_seconds: f64,
    /// Distinct customers called.
    pub unique_customers: u64,
}

/// Calls per UTC hour of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyHistogram {
    /// `hours[h]` counts calls initiated in hour `h`.
    pub hours: [u64; 24],
}

/// Calls per UTC day of week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyHistogram {
    /// `days[d]` counts calls initiated on weekday `d`, 0 being Sunday.
    pub days: [u64; 7],
}

/// A customer in the top-customers ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopCustomer {
    /// The customer.
    pub customer_id: CustomerId,
    /// The tenant's identifier, absent if the customer was deleted.
    pub external_id: Option<String>,
    /// Display name, absent if unknown or deleted.
    pub name: Option<String>,
    /// Completed calls with this customer.
    pub completed_calls: u64,
    /// Talk time of those calls, in seconds.
    pub total_duration_seconds: u64,
}

/// Completed calls by talk time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DurationBuckets {
    /// Under 30 seconds.
    #[serde(rename = "0-30s")]
    pub under_30s: u64,
    /// 30 seconds up to a minute.
    #[serde(rename = "30s-1m")]
    pub under_1m: u64,
    /// One up to three minutes.
    #[serde(rename = "1m-3m")]
    pub under_3m: u64,
    /// Three up to five minutes.
    #[serde(rename = "3m-5m")]
    pub under_5m: u64,
    /// Five minutes or more.
    #[serde(rename = "5m+")]
    pub over_5m: u64,
}

impl DurationBuckets {
    /// Count one call of `seconds`.
    pub fn add(&mut self, seconds: u64) {
        let bucket = match seconds {
            0..=29 => &mut self.under_30s,
            30..=59 => &mut self.under_1m,
            60..=179 => &mut self.under_3m,
            180..=299 => &mut self.under_5m,
            _ => &mut self.over_5m,
        };
        *bucket += 1;
    }
}

/// Everything the analytics dashboard shows for one window.
#[derive(Debug, Clone, Serialize)]
pub struct CallAnalytics {
    /// The window.
    pub range: TimeRange,
    /// Headline counters.
    pub stats: BasicStats,
    /// Calls per hour of day.
    pub hourly: HourlyHistogram,
    /// Calls per day of week.
    pub weekly: WeeklyHistogram,
    /// Customers with the most completed calls.
    pub top_customers: Vec<TopCustomer>,
    /// Completed calls by talk time.
    pub durations: DurationBuckets,
}

/// The terminal sessions a tenant initiated within `range`.
///
/// # Errors
///
/// Returns `EngineError::InvalidRange` if the window is inverted.
pub fn terminal_sessions<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    range: &TimeRange,
) -> Result<Vec<CallSession>> {
    range.validate()?;
    Ok(store
        .list_sessions_by_tenant(tenant_id, range.start, range.end)?
        .into_iter()
        .filter(CallSession::is_terminal)
        .collect())
}

/// Compute the headline counters.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn basic_stats(sessions: &[CallSession]) -> BasicStats {
    let mut stats = BasicStats::default();
    let mut customers = HashSet::new();

    for session in sessions {
        stats.total_calls += 1;
        match session.state {
            CallState::Completed => {
                stats.completed_calls += 1;
                stats.total_duration_seconds += session.duration_seconds.unwrap_or(0);
            }
            CallState::Missed => stats.missed_calls += 1,
            CallState::Failed => stats.failed_calls += 1,
            CallState::Initiated | CallState::Ringing | CallState::Connected => {}
        }
        match session.direction {
            CallDirection::Inbound => stats.inbound_calls += 1,
            CallDirection::Outbound => stats.outbound_calls += 1,
        }
        if let Some(customer_id) = session.customer_id {
            customers.insert(customer_id);
        }
    }

    if stats.completed_calls > 0 {
        stats.average_duration_seconds =
            stats.total_duration_seconds as f64 / stats.completed_calls as f64;
    }
    stats.unique_customers = customers.len() as u64;
    stats
}

/// Count calls per UTC hour of initiation.
#[must_use]
pub fn hourly_histogram(sessions: &[CallSession]) -> HourlyHistogram {
    let mut hours = [0u64; 24];
    for session in sessions {
        hours[session.initiated_at.hour() as usize] += 1;
    }
    HourlyHistogram { hours }
}

/// Count calls per UTC weekday of initiation.
#[must_use]
pub fn weekly_histogram(sessions: &[CallSession]) -> WeeklyHistogram {
    let mut days = [0u64; 7];
    for session in sessions {
        days[session.initiated_at.weekday().num_days_from_sunday() as usize] += 1;
    }
    WeeklyHistogram { days }
}

/// Bucket completed calls by talk time.
#[must_use]
pub fn duration_buckets(sessions: &[CallSession]) -> DurationBuckets {
    let mut buckets = DurationBuckets::default();
    for session in sessions.iter().filter(|s| s.state == CallState::Completed) {
        buckets.add(session.duration_seconds.unwrap_or(0));
    }
    buckets
}

/// Rank customers by completed calls, then by talk time.
///
/// Customer details are looked up in the directory; deleted customers keep
/// their place in the ranking with blank details.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn top_customers<S: Store>(
    store: &S,
    sessions: &[CallSession],
    limit: usize,
) -> Result<Vec<TopCustomer>> {
    let mut totals: HashMap<CustomerId, (u64, u64)> = HashMap::new();
    for session in sessions.iter().filter(|s| s.state == CallState::Completed) {
        if let Some(customer_id) = session.customer_id {
            let entry = totals.entry(customer_id).or_default();
            entry.0 += 1;
            entry.1 += session.duration_seconds.unwrap_or(0);
        }
    }

    let mut ranked: Vec<(CustomerId, (u64, u64))> = totals.into_iter().collect();
    ranked.sort_by_key(|&(id, (calls, seconds))| (Reverse(calls), Reverse(seconds), id));
    ranked.truncate(limit);

    ranked
        .into_iter()
        .map(|(customer_id, (completed_calls, total_duration_seconds))| {
            let customer = store.get_customer(&customer_id)?;
            Ok(TopCustomer {
                customer_id,
                external_id: customer.as_ref().map(|c| c.external_id.clone()),
                name: customer.as_ref().and_then(call_ribbon_store::Customer::display_name),
                completed_calls,
                total_duration_seconds,
            })
        })
        .collect()
}

/// Compute all analytics for a tenant's window.
///
/// `top_limit` defaults to the configured ranking length and is capped at
/// the configured maximum.
///
/// # Errors
///
/// Returns `EngineError::InvalidRange` if the window is inverted.
pub fn call_analytics<S: Store>(
    store: &S,
    config: &EngineConfig,
    tenant_id: &TenantId,
    range: TimeRange,
    top_limit: Option<usize>,
) -> Result<CallAnalytics> {
    let sessions = terminal_sessions(store, tenant_id, &range)?;
    let limit = top_limit
        .unwrap_or(config.default_top_customers)
        .min(config.max_top_customers);

    Ok(CallAnalytics {
        range,
        stats: basic_stats(&sessions),
        hourly: hourly_histogram(&sessions),
        weekly: weekly_histogram(&sessions),
        top_customers: top_customers(store, &sessions, limit)?,
        durations: duration_buckets(&sessions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers;
    use crate::error::EngineError;
    use crate::testing::{create_test_store, create_test_tenant, ended_session, t0};
    use crate::types::UpsertCustomerRequest;
    use call_ribbon_store::CustomerProfile;
    use chrono::Duration;

    #[test]
    fn duration_bucket_boundaries() {
        let mut buckets = DurationBuckets::default();
        for seconds in [0, 29, 30, 59, 60, 179, 180, 299, 300, 3600] {
            buckets.add(seconds);
        }
        assert_eq!(
            buckets,
            DurationBuckets {
                under_30s: 2,
                under_1m: 2,
                under_3m: 2,
                under_5m: 2,
                over_5m: 2,
            }
        );
    }

    #[test]
    fn duration_buckets_serialize_with_range_labels() {
        let json = serde_json::to_value(DurationBuckets::default()).unwrap();
        for label in ["0-30s", "30s-1m", "1m-3m", "3m-5m", "5m+"] {
            assert_eq!(json[label], 0);
        }
    }

    #[test]
    fn histograms_are_dense() {
        let hourly = hourly_histogram(&[]);
        let weekly = weekly_histogram(&[]);
        assert_eq!(hourly.hours.len(), 24);
        assert_eq!(weekly.days.len(), 7);

        let json = serde_json::to_value(&hourly).unwrap();
        assert_eq!(json["hours"].as_array().unwrap().len(), 24);
    }

    #[test]
    fn basic_stats_counts_by_state_and_direction() {
        let tenant_id = TenantId::generate();
        let customer = CustomerId::generate();
        let mut sessions = vec![
            ended_session(&tenant_id, CallState::Completed, t0(), 30),
            ended_session(&tenant_id, CallState::Completed, t0(), 90),
            ended_session(&tenant_id, CallState::Missed, t0(), 0),
            ended_session(&tenant_id, CallState::Failed, t0(), 0),
        ];
        sessions[0].customer_id = Some(customer);
        sessions[1].customer_id = Some(customer);
        sessions[2].direction = CallDirection::Inbound;

        let stats = basic_stats(&sessions);
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.completed_calls, 2);
        assert_eq!(stats.missed_calls, 1);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.inbound_calls, 1);
        assert_eq!(stats.outbound_calls, 3);
        assert_eq!(stats.total_duration_seconds, 120);
        assert!((stats.average_duration_seconds - 60.0).abs() < f64::EPSILON);
        assert_eq!(stats.unique_customers, 1);

        let buckets = duration_buckets(&sessions);
        assert_eq!(buckets.under_1m, 1);
        assert_eq!(buckets.under_3m, 1);
    }

    #[test]
    fn weekly_histogram_starts_on_sunday() {
        let tenant_id = TenantId::generate();
        // 2024-07-07 is a Sunday
        let mut session = ended_session(&tenant_id, CallState::Missed, t0(), 0);
        session.initiated_at = t0() + Duration::days(6);

        let weekly = weekly_histogram(&[session.clone()]);
        assert_eq!(weekly.days[0], 1);
        let hourly = hourly_histogram(&[session]);
        assert_eq!(hourly.hours[9], 1);
    }

    #[test]
    fn top_customers_rank_by_count_then_duration() {
        let (store, _dir) = create_test_store();
        let tenant = create_test_tenant(&store, "key");
        let mut ids = Vec::new();
        for external_id in ["a", "b", "c"] {
            let customer = customers::upsert_customer(
                &store,
                &tenant.tenant_id,
                UpsertCustomerRequest {
                    external_id: external_id.to_string(),
                    profile: CustomerProfile {
                        full_name: Some(format!("Customer {external_id}")),
                        ..CustomerProfile::default()
                    },
                },
                t0(),
            )
            .unwrap();
            ids.push(customer.customer_id);
        }

        let call = |customer: CustomerId, seconds| {
            let mut session = ended_session(&tenant.tenant_id, CallState::Completed, t0(), seconds);
            session.customer_id = Some(customer);
            session
        };
        let sessions = vec![
            call(ids[0], 10),
            call(ids[1], 100),
            call(ids[1], 10),
            call(ids[2], 200),
            call(ids[2], 50),
        ];
        customers::delete_customer(&store, &tenant.tenant_id, "c").unwrap();

        let ranked = top_customers(&store, &sessions, 2).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].customer_id, ids[2]);
        assert_eq!(ranked[0].total_duration_seconds, 250);
        assert_eq!(ranked[0].external_id, None);
        assert_eq!(ranked[1].customer_id, ids[1]);
        assert_eq!(ranked[1].name.as_deref(), Some("Customer b"));
    }

    #[test]
    fn analytics_read_terminal_sessions_in_range() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let tenant = create_test_tenant(&store, "key");

        let inside = ended_session(&tenant.tenant_id, CallState::Completed, t0(), 30);
        let outside = ended_session(
            &tenant.tenant_id,
            CallState::Completed,
            t0() + Duration::days(3),
            300,
        );
        let mut active = ended_session(&tenant.tenant_id, CallState::Connected, t0(), 0);
        active.ended_at = None;
        active.duration_seconds = None;
        for session in [&inside, &outside, &active] {
            store.insert_session(session).unwrap();
        }

        let range = TimeRange::between(t0() - Duration::hours(1), t0() + Duration::hours(1));
        let analytics = call_analytics(&store, &config, &tenant.tenant_id, range, None).unwrap();
        assert_eq!(analytics.stats.total_calls, 1);
        assert_eq!(analytics.durations.under_1m, 1);
        assert_eq!(analytics.durations.over_5m, 0);

        let inverted = TimeRange::between(t0(), t0() - Duration::hours(1));
        let result = call_analytics(&store, &config, &tenant.tenant_id, inverted, None);
        assert!(matches!(result, Err(EngineError::InvalidRange { .. })));
    }
}
