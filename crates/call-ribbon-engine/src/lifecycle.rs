//! Call session lifecycle state machine.
//!
//! This module defines the valid state transitions for call sessions and
//! derives the effect of an event on a session's lifecycle. The same
//! derivation drives live ingestion and event log replay, so a session
//! rebuilt from its events always equals the stored one.
//!
//! # State Machine
//!
//! ```text
//!   ┌───────────┐        ┌──────────┐        ┌───────────┐
//!   │ Initiated │───────▶│ Ringing  │───────▶│ Connected │
//!   └─────┬─────┘        └────┬─────┘        └─────┬─────┘
//!         │  └────────────────┼───────────────────▶│
//!         │                   │                    │
//!         ▼                   ▼                    ▼
//!   ┌────────────────────────────────────────────────────┐
//!   │        Completed   |   Missed   |   Failed          │
//!   └────────────────────────────────────────────────────┘
//! ```
//!
//! Terminal states are final.

use call_ribbon_core::SessionId;
use call_ribbon_store::{CallEvent, CallEventType, CallState, EventOutcome, LifecycleSnapshot};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// End reason recorded for a completed call without an explicit reason.
pub const REASON_HANGUP: &str = "hangup";
/// End reason recorded for a missed call without an explicit reason.
pub const REASON_NO_ANSWER: &str = "no_answer";
/// End reason recorded for a failed call without an explicit reason.
pub const REASON_FAILED: &str = "failed";

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `EngineError::IllegalTransition` if the transition is not allowed.
pub fn validate_transition(
    session_id: &SessionId,
    from: CallState,
    to: CallState,
) -> Result<CallState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(EngineError::IllegalTransition {
            session_id: *session_id,
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: CallState, to: CallState) -> bool {
    use CallState::{Completed, Connected, Failed, Initiated, Missed, Ringing};

    matches!(
        (from, to),
        (Initiated, Ringing | Connected)
            | (Ringing, Connected)
            // Any live state may end, answered or not
            | (Initiated | Ringing | Connected, Completed | Missed | Failed)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: CallState) -> Vec<CallState> {
    use CallState::{Completed, Connected, Failed, Initiated, Missed, Ringing};

    match state {
        Initiated => vec![Ringing, Connected, Completed, Missed, Failed],
        Ringing => vec![Connected, Completed, Missed, Failed],
        Connected => vec![Completed, Missed, Failed],
        Completed | Missed | Failed => vec![],
    }
}

/// The effect of one event on a lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derivation {
    /// The event moves the session to a new lifecycle.
    Applied(LifecycleSnapshot),
    /// The event repeats the state the session is already in.
    Duplicate,
    /// The event has no lifecycle meaning.
    NoTransition,
    /// The event asks for an illegal transition.
    Rejected {
        /// The state the event asked for.
        to: CallState,
    },
}

impl Derivation {
    /// The outcome recorded on the event.
    #[must_use]
    pub const fn outcome(&self) -> EventOutcome {
        match self {
            Self::Applied(_) => EventOutcome::Applied,
            Self::Duplicate => EventOutcome::Duplicate,
            Self::NoTransition => EventOutcome::NoTransition,
            Self::Rejected { .. } => EventOutcome::Rejected,
        }
    }
}

/// Derive what an event does to a session in `current`.
///
/// `at` is the effective event time. It must not lie before the last
/// lifecycle timestamp of `current`.
#[must_use]
pub fn derive(
    current: &LifecycleSnapshot,
    event_type: CallEventType,
    payload: &Value,
    at: DateTime<Utc>,
) -> Derivation {
    if event_type == CallEventType::CallEnded && current.state.is_terminal() {
        return Derivation::Duplicate;
    }

    let Some(target) = target_state(event_type, current, payload) else {
        return Derivation::NoTransition;
    };

    if target == current.state {
        return Derivation::Duplicate;
    }
    if !is_valid_transition(current.state, target) {
        return Derivation::Rejected { to: target };
    }

    Derivation::Applied(apply(current, target, payload, at))
}

/// The state an event asks for, if it has lifecycle meaning.
#[must_use]
pub fn target_state(
    event_type: CallEventType,
    current: &LifecycleSnapshot,
    payload: &Value,
) -> Option<CallState> {
    match event_type {
        CallEventType::Incoming | CallEventType::Ringing => Some(CallState::Ringing),
        CallEventType::Connected => Some(CallState::Connected),
        CallEventType::CallEnded => Some(terminal_state(payload, current.connected_at.is_some())),
        CallEventType::HoldToggle
        | CallEventType::MuteToggle
        | CallEventType::Registered
        | CallEventType::Unregistered => None,
    }
}

/// The terminal state a `call_ended` event leads to.
///
/// An explicit payload `status` wins; otherwise an answered call completed
/// and an unanswered one was missed.
#[must_use]
pub fn terminal_state(payload: &Value, was_connected: bool) -> CallState {
    let status = payload_str(payload, "status").map(str::to_ascii_lowercase);
    match status.as_deref() {
        Some("completed") => CallState::Completed,
        Some("missed" | "no_answer" | "busy") => CallState::Missed,
        Some("failed" | "error" | "network_error") => CallState::Failed,
        _ if was_connected => CallState::Completed,
        _ => CallState::Missed,
    }
}

fn apply(
    current: &LifecycleSnapshot,
    target: CallState,
    payload: &Value,
    at: DateTime<Utc>,
) -> LifecycleSnapshot {
    let mut next = current.clone();
    next.state = target;

    match target {
        CallState::Initiated => {}
        CallState::Ringing => next.ringing_at = Some(at),
        CallState::Connected => next.connected_at = Some(at),
        CallState::Completed | CallState::Missed | CallState::Failed => {
            let talked = current
                .connected_at
                .map_or(0, |connected| seconds_between(connected, at));
            next.ended_at = Some(at);
            next.duration_seconds = Some(payload_duration(payload).unwrap_or(talked));
            next.end_reason = Some(end_reason(payload, target));
        }
    }

    next
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_seconds()).unwrap_or(0)
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn payload_duration(payload: &Value) -> Option<u64> {
    payload.get("duration").and_then(Value::as_u64)
}

fn end_reason(payload: &Value, state: CallState) -> String {
    payload_str(payload, "reason")
        .or_else(|| payload_str(payload, "end_reason"))
        .map_or_else(
            || {
                match state {
                    CallState::Missed => REASON_NO_ANSWER,
                    CallState::Failed => REASON_FAILED,
                    _ => REASON_HANGUP,
                }
                .to_string()
            },
            str::to_string,
        )
}

/// Rebuild a lifecycle by folding events in log order.
///
/// Rejected events are skipped; everything else goes through [`derive`].
#[must_use]
pub fn replay<'a>(events: impl IntoIterator<Item = &'a CallEvent>) -> LifecycleSnapshot {
    events
        .into_iter()
        .filter(|event| event.outcome != EventOutcome::Rejected)
        .fold(LifecycleSnapshot::initial(), |current, event| {
            match derive(&current, event.event_type, &event.payload, event.timestamp) {
                Derivation::Applied(next) => next,
                Derivation::Duplicate | Derivation::NoTransition | Derivation::Rejected { .. } => {
                    current
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_ribbon_core::{EventId, TenantId};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap()
    }

    fn applied(derivation: Derivation) -> LifecycleSnapshot {
        match derivation {
            Derivation::Applied(next) => next,
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[test]
    fn valid_transitions() {
        use CallState::*;

        assert!(is_valid_transition(Initiated, Ringing));
        // Outbound calls have no ringing signal
        assert!(is_valid_transition(Initiated, Connected));
        assert!(is_valid_transition(Ringing, Connected));
        assert!(is_valid_transition(Initiated, Missed));
        assert!(is_valid_transition(Ringing, Failed));
        assert!(is_valid_transition(Connected, Completed));
    }

    #[test]
    fn invalid_transitions() {
        use CallState::*;

        assert!(!is_valid_transition(Connected, Ringing));
        assert!(!is_valid_transition(Ringing, Initiated));
        assert!(!is_valid_transition(Completed, Connected));
        assert!(!is_valid_transition(Missed, Completed));
        assert!(!is_valid_transition(Failed, Ringing));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for state in [CallState::Completed, CallState::Missed, CallState::Failed] {
            assert!(valid_transitions_from(state).is_empty());
        }
        assert!(valid_transitions_from(CallState::Initiated).contains(&CallState::Connected));
    }

    #[test]
    fn validate_transition_err() {
        let session_id = SessionId::from_bytes([1u8; 16]);
        let result = validate_transition(&session_id, CallState::Completed, CallState::Connected);

        match result {
            Err(EngineError::IllegalTransition { from, to, .. }) => {
                assert_eq!(from, CallState::Completed);
                assert_eq!(to, CallState::Connected);
            }
            _ => panic!("expected IllegalTransition error"),
        }
    }

    #[test]
    fn duration_measured_from_connection() {
        let initial = LifecycleSnapshot::initial();
        let connected = applied(derive(
            &initial,
            CallEventType::Connected,
            &Value::Null,
            t0() + Duration::seconds(5),
        ));
        assert_eq!(connected.duration_seconds, None);

        let ended = applied(derive(
            &connected,
            CallEventType::CallEnded,
            &Value::Null,
            t0() + Duration::seconds(125),
        ));
        assert_eq!(ended.state, CallState::Completed);
        assert_eq!(ended.duration_seconds, Some(120));
        assert_eq!(ended.end_reason.as_deref(), Some(REASON_HANGUP));
    }

    #[test]
    fn unanswered_call_is_missed_with_zero_duration() {
        let ringing = applied(derive(
            &LifecycleSnapshot::initial(),
            CallEventType::Ringing,
            &Value::Null,
            t0(),
        ));
        let ended = applied(derive(
            &ringing,
            CallEventType::CallEnded,
            &Value::Null,
            t0() + Duration::seconds(30),
        ));
        assert_eq!(ended.state, CallState::Missed);
        assert_eq!(ended.duration_seconds, Some(0));
        assert_eq!(ended.end_reason.as_deref(), Some(REASON_NO_ANSWER));
    }

    #[test]
    fn payload_status_reason_and_duration_win() {
        let connected = applied(derive(
            &LifecycleSnapshot::initial(),
            CallEventType::Connected,
            &Value::Null,
            t0(),
        ));
        let ended = applied(derive(
            &connected,
            CallEventType::CallEnded,
            &json!({ "status": "network_error", "reason": "media timeout", "duration": 42 }),
            t0() + Duration::seconds(60),
        ));
        assert_eq!(ended.state, CallState::Failed);
        assert_eq!(ended.duration_seconds, Some(42));
        assert_eq!(ended.end_reason.as_deref(), Some("media timeout"));
    }

    #[test]
    fn terminal_event_on_terminal_session_is_duplicate() {
        let ended = applied(derive(
            &LifecycleSnapshot::initial(),
            CallEventType::CallEnded,
            &Value::Null,
            t0(),
        ));
        let again = derive(&ended, CallEventType::CallEnded, &json!({"status": "failed"}), t0());
        assert_eq!(again, Derivation::Duplicate);
    }

    #[test]
    fn connected_after_end_is_rejected() {
        let ended = applied(derive(
            &LifecycleSnapshot::initial(),
            CallEventType::CallEnded,
            &json!({"status": "completed"}),
            t0(),
        ));
        let late = derive(&ended, CallEventType::Connected, &Value::Null, t0());
        assert_eq!(
            late,
            Derivation::Rejected {
                to: CallState::Connected
            }
        );
        assert_eq!(late.outcome(), EventOutcome::Rejected);
    }

    #[test]
    fn ui_events_do_not_transition() {
        let initial = LifecycleSnapshot::initial();
        for event_type in [
            CallEventType::MuteToggle,
            CallEventType::HoldToggle,
            CallEventType::Registered,
            CallEventType::Unregistered,
        ] {
            assert_eq!(
                derive(&initial, event_type, &Value::Null, t0()),
                Derivation::NoTransition
            );
        }
    }

    #[test]
    fn replay_skips_rejected_events() {
        let session_id = SessionId::generate();
        let tenant_id = TenantId::generate();
        let event = |sequence: u32, event_type, offset: i64, outcome| CallEvent {
            event_id: EventId::generate(),
            session_id,
            tenant_id,
            sequence,
            event_type,
            payload: Value::Null,
            source: "test".to_string(),
            domain: None,
            timestamp: t0() + Duration::seconds(offset),
            reported_at: None,
            received_at: t0() + Duration::seconds(offset),
            outcome,
        };
        let events = vec![
            event(1, CallEventType::Connected, 5, EventOutcome::Applied),
            event(2, CallEventType::MuteToggle, 10, EventOutcome::NoTransition),
            event(3, CallEventType::CallEnded, 125, EventOutcome::Applied),
            event(4, CallEventType::Connected, 130, EventOutcome::Rejected),
            event(5, CallEventType::CallEnded, 131, EventOutcome::Duplicate),
        ];

        let rebuilt = replay(&events);
        assert_eq!(rebuilt.state, CallState::Completed);
        assert_eq!(rebuilt.duration_seconds, Some(120));
        assert_eq!(rebuilt.ended_at, Some(t0() + Duration::seconds(125)));
    }
}
