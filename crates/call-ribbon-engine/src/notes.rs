//! Agent notes on calls.
//!
//! Notes are append-only and listed newest first. A note records the
//! session's customer at the time it was written.

use call_ribbon_core::{NoteId, SessionId, TenantId};
use call_ribbon_store::{CallNote, Store};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::sessions;
use crate::types::AddNoteRequest;

/// Category recorded when the request leaves it unset.
pub const DEFAULT_NOTE_TYPE: &str = "general";

/// Attach a note to a session.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the session doesn't belong to
/// the tenant and `EngineError::InvalidRequest` if the text is empty.
pub fn add_note<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    session_id: &SessionId,
    request: AddNoteRequest,
    now: DateTime<Utc>,
) -> Result<CallNote> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(EngineError::InvalidRequest("note text must not be empty".into()));
    }
    let session = sessions::get_session(store, tenant_id, session_id)?;

    let note = CallNote {
        note_id: NoteId::generate(),
        session_id: *session_id,
        tenant_id: *tenant_id,
        customer_id: session.customer_id,
        text: text.to_string(),
        note_type: request
            .note_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_NOTE_TYPE.to_string()),
        author: request.author.filter(|a| !a.trim().is_empty()),
        is_internal: request.is_internal,
        created_at: now,
    };
    store.insert_note(&note)?;

    debug!(session_id = %session_id, note_id = %note.note_id, "Note added");
    Ok(note)
}

/// List a session's notes, newest first.
///
/// # Errors
///
/// Returns `EngineError::UnknownSession` if the session doesn't belong to the tenant.
pub fn list_notes<S: Store>(
    store: &S,
    tenant_id: &TenantId,
    session_id: &SessionId,
) -> Result<Vec<CallNote>> {
    sessions::get_session(store, tenant_id, session_id)?;
    let mut notes = store.list_notes_by_session(session_id)?;
    notes.reverse();
    Ok(notes)
}
