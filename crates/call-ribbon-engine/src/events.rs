//! Event ingestion and the session event log.
//!
//! Every event recorded against a session goes through [`apply_event`]:
//! the session is read, the event's effect is derived, and the new session
//! record is committed together with the event under a compare-and-swap on
//! the session's `event_count`. A writer that loses the race re-reads and
//! derives again, so concurrent duplicates of a terminal event resolve to
//! one `applied` and otherwise `duplicate` outcomes.

use call_ribbon_core::{EventId, SessionId, TenantId};
use call_ribbon_store::{
    CallEvent, CallEventType, CallSession, CallState, SessionCommit, Store, StoreError,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::accounting;
use crate::customers;
use crate::error::{EngineError, Result};
use crate::lifecycle::{self, Derivation};
use crate::types::{EngineConfig, EventReceipt, RecordEventRequest, ReplayReport};

/// Source tag of events reported without one.
pub const DEFAULT_EVENT_SOURCE: &str = "widget";

/// What to do with an event that asks for an illegal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectPolicy {
    /// Append it with outcome `rejected` and report success.
    Record,
    /// Append nothing and fail with `IllegalTransition`.
    Refuse,
}

/// An event waiting to be applied to a session.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    /// Event kind.
    pub event_type: CallEventType,
    /// Raw event data.
    pub payload: Value,
    /// Who emitted the event.
    pub source: String,
    /// Origin domain of the reporter.
    pub domain: Option<String>,
    /// Event time as reported, if any.
    pub reported_at: Option<DateTime<Utc>>,
}

/// Apply an event to a session and append it to the session's log.
///
/// The effective event time is the reported time (receipt time when none),
/// capped at the receipt time and raised to the session's last lifecycle
/// timestamp. If the session completes, its usage is charged to the receipt
/// date in the same commit.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the session doesn't exist,
/// `EngineError::IllegalTransition` for an illegal event under
/// [`RejectPolicy::Refuse`], and `EngineError::Conflict` if every commit
/// attempt lost a race.
pub fn apply_event<S: Store>(
    store: &S,
    config: &EngineConfig,
    session_id: &SessionId,
    pending: &PendingEvent,
    policy: RejectPolicy,
    now: DateTime<Utc>,
) -> Result<EventReceipt> {
    for attempt in 1..=config.max_commit_attempts.max(1) {
        let session = store
            .get_session(session_id)?
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;

        let reported = pending.reported_at.map_or(now, |at| at.min(now));
        let timestamp = std::cmp::max(reported, session.last_transition_at());
        let derivation = lifecycle::derive(
            &session.lifecycle(),
            pending.event_type,
            &pending.payload,
            timestamp,
        );

        if let Derivation::Rejected { to } = derivation {
            warn!(
                session_id = %session_id,
                event_type = %pending.event_type,
                from = %session.state,
                to = %to,
                "Illegal transition rejected"
            );
            if policy == RejectPolicy::Refuse {
                return Err(EngineError::IllegalTransition {
                    session_id: *session_id,
                    from: session.state,
                    to,
                });
            }
        }

        let mut next = session.clone();
        if let Derivation::Applied(lifecycle) = &derivation {
            next.set_lifecycle(lifecycle.clone());
        }
        next.event_count = session
            .event_count
            .checked_add(1)
            .ok_or_else(|| EngineError::Internal(format!("event log of {session_id} is full")))?;
        next.updated_at = now;

        let event = CallEvent {
            event_id: EventId::generate(),
            session_id: *session_id,
            tenant_id: session.tenant_id,
            sequence: next.event_count,
            event_type: pending.event_type,
            payload: pending.payload.clone(),
            source: pending.source.clone(),
            domain: pending.domain.clone(),
            timestamp,
            reported_at: pending.reported_at,
            received_at: now,
            outcome: derivation.outcome(),
        };

        let completed = matches!(derivation, Derivation::Applied(_))
            && next.state == CallState::Completed;
        let commit = SessionCommit {
            usage: if completed {
                accounting::completion_increment(&next, now)
            } else {
                None
            },
            session: next,
            event,
            expected_event_count: session.event_count,
        };

        match store.commit_session_event(&commit) {
            Ok(()) => {
                log_outcome(&commit, session.state);
                return Ok(EventReceipt {
                    session: commit.session,
                    event: commit.event,
                });
            }
            Err(StoreError::Conflict { expected, found }) => {
                debug!(
                    session_id = %session_id,
                    attempt,
                    expected,
                    found,
                    "Session changed concurrently, retrying"
                );
            }
            Err(StoreError::NotFound) => {
                return Err(EngineError::UnknownSession(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }

    warn!(session_id = %session_id, "Giving up on contended session commit");
    Err(EngineError::Conflict(*session_id))
}

fn log_outcome(commit: &SessionCommit, previous: CallState) {
    let session = &commit.session;
    let event = &commit.event;
    match event.outcome {
        call_ribbon_store::EventOutcome::Applied => {
            info!(
                session_id = %session.session_id,
                tenant_id = %session.tenant_id,
                from = %previous,
                to = %session.state,
                charged = commit.usage.is_some(),
                "Call state changed"
            );
        }
        call_ribbon_store::EventOutcome::Duplicate => {
            debug!(session_id = %session.session_id, event_type = %event.event_type, "Duplicate event");
        }
        call_ribbon_store::EventOutcome::NoTransition => {
            debug!(session_id = %session.session_id, event_type = %event.event_type, "Event recorded");
        }
        call_ribbon_store::EventOutcome::Rejected => {}
    }
}

/// Find the session an event refers to.
///
/// Lookup order is session ID, then provider call ID, then phone number. The
/// phone match only considers active sessions and picks the most recently
/// initiated one.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if nothing matches and
/// `EngineError::InvalidRequest` if the request carries no reference at all.
pub fn resolve_session<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    request: &RecordEventRequest,
) -> Result<CallSession> {
    if let Some(session_id) = request.session_id {
        return store
            .get_session(&session_id)?
            .filter(|session| session.tenant_id == *tenant_id)
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()));
    }

    if let Some(call_id) = non_empty(request.external_call_id.as_deref()) {
        return store
            .get_session_by_external_call_id(tenant_id, call_id)?
            .ok_or_else(|| EngineError::UnknownSession(call_id.to_string()));
    }

    let Some(phone) = non_empty(request.phone_number.as_deref()) else {
        return Err(EngineError::InvalidRequest(
            "event needs a session_id, external_call_id or phone_number".into(),
        ));
    };

    let phone = customers::normalize_phone(phone);
    let candidates: Vec<CallSession> = store
        .list_active_sessions(tenant_id)?
        .into_iter()
        .filter(|session| customers::normalize_phone(&session.phone_number) == phone)
        .collect();
    if candidates.len() > 1 {
        warn!(
            tenant_id = %tenant_id,
            matches = candidates.len(),
            "Ambiguous phone match, using the most recent session"
        );
    }

    let session = candidates
        .into_iter()
        .max_by_key(|session| session.initiated_at)
        .ok_or_else(|| EngineError::UnknownSession(format!("active call to {phone}")))?;
    warn!(
        tenant_id = %tenant_id,
        session_id = %session.session_id,
        "Event matched to session by phone number"
    );
    Ok(session)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Record a reported event.
///
/// Illegal events are kept in the log with outcome `rejected` and leave the
/// session unchanged.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the event matches no session of
/// the tenant.
pub fn record_event<S: Store>(
    store: &S,
    config: &EngineConfig,
    tenant_id: &TenantId,
    request: RecordEventRequest,
    now: DateTime<Utc>,
) -> Result<EventReceipt> {
    let session = resolve_session(store, tenant_id, &request)?;
    let pending = PendingEvent {
        event_type: request.event_type,
        payload: request.payload,
        source: request
            .source
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_SOURCE.to_string()),
        domain: request.domain,
        reported_at: request.timestamp,
    };
    apply_event(
        store,
        config,
        &session.session_id,
        &pending,
        RejectPolicy::Record,
        now,
    )
}

/// List a session's events in timestamp order.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the session doesn't belong to the tenant.
pub fn list_session_events<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    session_id: &SessionId,
) -> Result<Vec<CallEvent>> {
    crate::sessions::get_session(store, tenant_id, session_id)?;
    Ok(store.list_events_by_session(session_id)?)
}

/// Rebuild a session's lifecycle from its event log and compare it with the
/// stored record.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the session doesn't belong to the tenant.
pub fn replay_session<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    session_id: &SessionId,
) -> Result<ReplayReport> {
    let session = crate::sessions::get_session(store, tenant_id, session_id)?;
    let events = store.list_events_by_session(session_id)?;

    let replayed = lifecycle::replay(&events);
    let stored = session.lifecycle();
    let consistent = replayed == stored;
    if !consistent {
        warn!(session_id = %session_id, "Stored session differs from its event log");
    }

    Ok(ReplayReport {
        session_id: *session_id,
        events_replayed: events.len(),
        stored,
        replayed,
        consistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::create_session;
    use crate::testing::{create_test_store, create_test_tenant, registration, t0};
    use crate::types::{CreateSessionRequest, TenantRegistration};
    use crate::tenants;
    use chrono::TimeZone;
    use call_ribbon_store::{EventOutcome, UsageMonth};
    use chrono::Duration;
    use serde_json::json;

    fn event(session_id: SessionId, event_type: CallEventType, at: DateTime<Utc>) -> RecordEventRequest {
        RecordEventRequest {
            timestamp: Some(at),
            ..RecordEventRequest::for_session(session_id, event_type)
        }
    }

    #[test]
    fn connected_then_ended_computes_duration() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let tenant = create_test_tenant(&store, "key");
        let session = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();
        let id = session.session_id;

        let connected = record_event(
            &store,
            &config,
            &tenant.tenant_id,
            event(id, CallEventType::Connected, t0() + Duration::seconds(5)),
            t0() + Duration::seconds(5),
        )
        .unwrap();
        assert_eq!(connected.session.state, CallState::Connected);
        assert_eq!(connected.session.duration_seconds, None);

        let ended = record_event(
            &store,
            &config,
            &tenant.tenant_id,
            event(id, CallEventType::CallEnded, t0() + Duration::seconds(125)),
            t0() + Duration::seconds(125),
        )
        .unwrap();
        assert_eq!(ended.session.state, CallState::Completed);
        assert_eq!(ended.session.duration_seconds, Some(120));
        assert_eq!(ended.event.sequence, 2);

        let month = UsageMonth::of(t0().date_naive());
        assert_eq!(store.get_monthly_calls(&tenant.tenant_id, month).unwrap(), 1);
        let days = store.list_usage_records(&tenant.tenant_id, month).unwrap();
        assert_eq!(days[0].call_minutes, 2);
    }

    #[test]
    fn repeated_end_event_is_charged_once() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let tenant = create_test_tenant(&store, "key");
        let session = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();

        let end = || RecordEventRequest {
            payload: json!({ "status": "completed" }),
            ..event(session.session_id, CallEventType::CallEnded, t0())
        };
        let first = record_event(&store, &config, &tenant.tenant_id, end(), t0()).unwrap();
        let second = record_event(&store, &config, &tenant.tenant_id, end(), t0()).unwrap();

        assert_eq!(first.event.outcome, EventOutcome::Applied);
        assert_eq!(second.event.outcome, EventOutcome::Duplicate);
        assert_eq!(second.session.ended_at, first.session.ended_at);
        let month = UsageMonth::of(t0().date_naive());
        assert_eq!(store.get_monthly_calls(&tenant.tenant_id, month).unwrap(), 1);
    }

    #[test]
    fn illegal_event_is_logged_but_changes_nothing() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let tenant = create_test_tenant(&store, "key");
        let session = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();
        let id = session.session_id;

        record_event(&store, &config, &tenant.tenant_id, event(id, CallEventType::CallEnded, t0()), t0())
            .unwrap();
        let late = record_event(
            &store,
            &config,
            &tenant.tenant_id,
            event(id, CallEventType::Connected, t0()),
            t0(),
        )
        .unwrap();

        assert_eq!(late.event.outcome, EventOutcome::Rejected);
        assert_eq!(late.session.state, CallState::Missed);
        assert_eq!(list_session_events(&store, &tenant.tenant_id, &id).unwrap().len(), 2);
    }

    #[test]
    fn events_resolve_by_call_id_and_phone() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let tenant = create_test_tenant(&store, "key");
        let older = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();
        let newer = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-2", "+15550100"),
            t0() + Duration::seconds(30),
        )
        .unwrap();

        let by_call_id = RecordEventRequest {
            session_id: None,
            external_call_id: Some("call-1".to_string()),
            ..RecordEventRequest::for_session(older.session_id, CallEventType::Ringing)
        };
        let receipt = record_event(&store, &config, &tenant.tenant_id, by_call_id, t0()).unwrap();
        assert_eq!(receipt.session.session_id, older.session_id);

        let by_phone = RecordEventRequest {
            session_id: None,
            phone_number: Some("+1 (555) 0100".to_string()),
            ..RecordEventRequest::for_session(older.session_id, CallEventType::MuteToggle)
        };
        let receipt = record_event(&store, &config, &tenant.tenant_id, by_phone, t0()).unwrap();
        assert_eq!(receipt.session.session_id, newer.session_id);
        assert_eq!(receipt.event.outcome, EventOutcome::NoTransition);
    }

    #[test]
    fn foreign_session_is_unknown() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let owner = create_test_tenant(&store, "owner");
        let other = create_test_tenant(&store, "other");
        let session = create_session(
            &store,
            &owner.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();

        let result = record_event(
            &store,
            &config,
            &other.tenant_id,
            event(session.session_id, CallEventType::Ringing, t0()),
            t0(),
        );
        assert!(matches!(result, Err(EngineError::UnknownSession(_))));
    }

    #[test]
    fn early_timestamps_are_raised_and_replay_matches() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let tenant = create_test_tenant(&store, "key");
        let session = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();
        let id = session.session_id;
        let at = |s| t0() + Duration::seconds(s);

        record_event(&store, &config, &tenant.tenant_id, event(id, CallEventType::Ringing, at(10)), at(10))
            .unwrap();
        // Reported before the ringing it follows
        let connected = record_event(
            &store,
            &config,
            &tenant.tenant_id,
            event(id, CallEventType::Connected, at(4)),
            at(12),
        )
        .unwrap();
        assert_eq!(connected.event.timestamp, at(10));
        assert_eq!(connected.event.reported_at, Some(at(4)));
        record_event(&store, &config, &tenant.tenant_id, event(id, CallEventType::MuteToggle, at(90)), at(90))
            .unwrap();
        record_event(&store, &config, &tenant.tenant_id, event(id, CallEventType::CallEnded, at(70)), at(95))
            .unwrap();

        let report = replay_session(&store, &tenant.tenant_id, &id).unwrap();
        assert!(report.consistent, "{report:?}");
        assert_eq!(report.events_replayed, 4);
        assert_eq!(report.stored.duration_seconds, Some(60));
    }

    #[test]
    fn concurrent_end_events_apply_once() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig {
            max_commit_attempts: 64,
            ..EngineConfig::default()
        };
        let tenant = create_test_tenant(&store, "key");
        let session = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();

        let outcomes: Vec<EventOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let request = RecordEventRequest {
                            payload: json!({ "status": "completed" }),
                            ..event(session.session_id, CallEventType::CallEnded, t0())
                        };
                        record_event(&store, &config, &tenant.tenant_id, request, t0())
                            .unwrap()
                            .event
                            .outcome
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let applied = outcomes.iter().filter(|o| **o == EventOutcome::Applied).count();
        assert_eq!(applied, 1);
        let month = UsageMonth::of(t0().date_naive());
        assert_eq!(store.get_monthly_calls(&tenant.tenant_id, month).unwrap(), 1);
        assert_eq!(
            store.list_events_by_session(&session.session_id).unwrap().len(),
            8
        );
    }

    #[test]
    fn future_timestamps_are_capped_at_receipt() {
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let limited = TenantRegistration {
            monthly_call_limit: 1,
            ..registration("key")
        };
        let tenant = tenants::register_tenant(&store, limited, t0()).unwrap();
        let session = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-1", "+15550100"),
            t0(),
        )
        .unwrap();

        let far_future = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        let received_at = t0() + Duration::seconds(30);
        let ended = record_event(
            &store,
            &config,
            &tenant.tenant_id,
            RecordEventRequest {
                payload: json!({ "status": "completed" }),
                ..event(session.session_id, CallEventType::CallEnded, far_future)
            },
            received_at,
        )
        .unwrap();
        assert_eq!(ended.session.state, CallState::Completed);
        assert_eq!(ended.session.ended_at, Some(received_at));
        assert_eq!(ended.event.timestamp, received_at);
        assert_eq!(ended.event.reported_at, Some(far_future));

        let month = UsageMonth::of(t0().date_naive());
        assert_eq!(store.get_monthly_calls(&tenant.tenant_id, month).unwrap(), 1);
        let future_month = UsageMonth::of(far_future.date_naive());
        assert_eq!(store.get_monthly_calls(&tenant.tenant_id, future_month).unwrap(), 0);

        let next = create_session(
            &store,
            &tenant.tenant_id,
            CreateSessionRequest::new("call-2", "+15550100"),
            received_at,
        );
        assert!(matches!(next, Err(EngineError::QuotaExceeded { limit: 1, used: 1, .. })));
    }

    #[test]
    fn parallel_completions_are_all_counted() {
        const CALLS: usize = 16;
        let (store, _dir) = create_test_store();
        let config = EngineConfig::default();
        let tenant = create_test_tenant(&store, "key");

        std::thread::scope(|scope| {
            for i in 0..CALLS {
                let (store, config, tenant_id) = (&store, &config, tenant.tenant_id);
                scope.spawn(move || {
                    let session = create_session(
                        store,
                        &tenant_id,
                        CreateSessionRequest::new(&format!("call-{i}"), "+15550100"),
                        t0(),
                    )
                    .unwrap();
                    let connected_at = t0() + Duration::seconds(1);
                    let ended_at = t0() + Duration::seconds(61);
                    record_event(
                        store,
                        config,
                        &tenant_id,
                        event(session.session_id, CallEventType::Connected, connected_at),
                        connected_at,
                    )
                    .unwrap();
                    let ended = record_event(
                        store,
                        config,
                        &tenant_id,
                        event(session.session_id, CallEventType::CallEnded, ended_at),
                        ended_at,
                    )
                    .unwrap();
                    assert_eq!(ended.session.state, CallState::Completed);
                });
            }
        });

        let month = UsageMonth::of(t0().date_naive());
        let calls = u64::try_from(CALLS).unwrap();
        assert_eq!(store.get_monthly_calls(&tenant.tenant_id, month).unwrap(), calls);
        let days = store.list_usage_records(&tenant.tenant_id, month).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].call_count, calls);
        assert_eq!(days[0].call_minutes, calls);
    }
}
