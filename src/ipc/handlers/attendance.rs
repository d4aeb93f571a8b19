use std::path::PathBuf;

use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::eligibility::{self, RECENT_HISTORY_LEN};
use crate::ingest;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::events::load_event;
use crate::ipc::helpers::{
    db_conn, get_bool, get_optional_str, get_required_str, load_member, require_admin, with_conn,
    ConnHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceRecord, AttendanceStatus, AuditAction, NewAuditEntry};
use crate::reconcile::{ReconcileError, ReconcileSession, SessionState};
use crate::store::{self, SqliteStore};

impl From<ReconcileError> for HandlerErr {
    fn from(e: ReconcileError) -> Self {
        let details = match &e {
            ReconcileError::NotToggleable { member_id } => Some(json!({ "memberId": member_id })),
            ReconcileError::Ingest(ingest::IngestError::Io { path, .. }) => {
                Some(json!({ "path": path }))
            }
            ReconcileError::Ingest(ingest::IngestError::Parse { line: Some(line), .. }) => {
                Some(json!({ "line": line }))
            }
            _ => None,
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

fn session_view(session: &ReconcileSession) -> serde_json::Value {
    let matched: Vec<serde_json::Value> = session
        .result
        .matched
        .iter()
        .map(|m| {
            json!({
                "memberId": m.member_id,
                "identifier": m.identifier,
                "name": m.display_name,
                "branch": m.branch,
                "selected": session.selection.contains(&m.member_id),
            })
        })
        .collect();
    let expected: Vec<serde_json::Value> = session
        .expected
        .iter()
        .map(|m| {
            let present = session.selection.contains(&m.id);
            json!({
                "memberId": m.id,
                "name": m.name,
                "qid": m.qid,
                "status": if present { "present" } else { "no_show" },
            })
        })
        .collect();
    json!({
        "sessionId": session.id,
        "eventId": session.event_id,
        "eventTitle": session.event_title,
        "state": session.state,
        "matched": matched,
        "unmatched": session.result.unmatched,
        "duplicates": session.result.duplicates,
        "expected": expected,
        "selectedCount": session.selection.len(),
    })
}

fn begin_session(conn: &Connection, params: &serde_json::Value) -> Result<ReconcileSession, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let event_id = get_required_str(params, "eventId")?;
    let event = load_event(conn, &event_id)?;

    let candidates = match (params.get("csvText").and_then(|v| v.as_str()), get_optional_str(params, "inPath")) {
        (Some(text), _) => ingest::ingest_text(text),
        (None, Some(path)) => ingest::ingest_file(&PathBuf::from(path)),
        (None, None) => return Err(HandlerErr::new("bad_params", "missing csvText or inPath")),
    }
    .map_err(|e| {
        tracing::warn!(event = %event_id, error = %e, "attendance upload rejected");
        HandlerErr::from(ReconcileError::from(e))
    })?;

    let expected = store::rsvp_members(conn, &event_id)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|(m, _)| m)
        .collect();
    let session = ReconcileSession::begin(
        Uuid::new_v4().to_string(),
        event.id,
        event.title,
        actor,
        expected,
        &candidates,
        &SqliteStore::new(conn),
    )?;
    Ok(session)
}

fn handle_reconcile_begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match begin_session(conn, &req.params) {
        Ok(session) => {
            let view = session_view(&session);
            state.sessions.insert(session.id.clone(), session);
            ok(&req.id, view)
        }
        Err(error) => error.response(&req.id),
    }
}

fn session_id(req: &Request) -> Result<String, serde_json::Value> {
    get_required_str(&req.params, "sessionId").map_err(|e| e.response(&req.id))
}

fn unknown_session(req: &Request, id: &str) -> serde_json::Value {
    err(
        &req.id,
        "not_found",
        "reconciliation session not found",
        Some(json!({ "sessionId": id })),
    )
}

fn handle_reconcile_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match session_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.sessions.get(&id) {
        Some(session) => ok(&req.id, session_view(session)),
        None => unknown_session(req, &id),
    }
}

fn handle_reconcile_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match session_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let member_id = match get_required_str(&req.params, "memberId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(session) = state.sessions.get_mut(&id) else {
        return unknown_session(req, &id);
    };
    match session.toggle(&member_id) {
        Ok(selected) => {
            let mut view = session_view(session);
            view["toggled"] = json!({ "memberId": member_id, "selected": selected });
            ok(&req.id, view)
        }
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_reconcile_commit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match session_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.sessions.get_mut(&id) else {
        return unknown_session(req, &id);
    };
    // A closed or empty session never opens a transaction.
    if session.state == SessionState::Committed {
        return HandlerErr::from(ReconcileError::SessionClosed).response(&req.id);
    }
    if session.selection.is_empty() {
        return HandlerErr::from(ReconcileError::EmptySelection).response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return HandlerErr::tx(e).response(&req.id),
    };
    let summary = match session.commit(&SqliteStore::new(&tx)) {
        Ok(v) => v,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    if let Err(e) = tx.commit() {
        tracing::warn!(session = %id, error = %e, "attendance commit rolled back");
        session.state = SessionState::Review;
        return HandlerErr::commit(e).response(&req.id);
    }

    let mut view = session_view(session);
    view["committed"] = json!(summary);
    ok(&req.id, view)
}

fn handle_reconcile_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match session_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.sessions.remove(&id) {
        Some(session) => {
            tracing::info!(session = %id, state = ?session.state, "reconciliation session closed");
            ok(&req.id, json!({ "sessionId": id, "cancelled": true }))
        }
        None => unknown_session(req, &id),
    }
}

fn attendance_set_manual(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let event_id = get_required_str(params, "eventId")?;
    let member_id = get_required_str(params, "memberId")?;
    let present = get_bool(params, "present")?
        .ok_or_else(|| HandlerErr::new("bad_params", "missing present"))?;
    load_event(conn, &event_id)?;
    let member = load_member(conn, &member_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if present {
        store::upsert_attendance(
            &tx,
            &[AttendanceRecord {
                event_id: event_id.clone(),
                member_id: member_id.clone(),
                status: AttendanceStatus::Present,
            }],
        )
        .map_err(HandlerErr::update)?;
    } else {
        store::delete_attendance(&tx, &event_id, &member_id).map_err(HandlerErr::update)?;
    }
    let label = if present { "PRESENT" } else { "ABSENT" };
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor: actor.clone(),
            action: AuditAction::ManualAttendanceEdit,
            details: format!("Changed {}'s attendance to {}.", member.name, label),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(event = %event_id, member = %member_id, present, actor = %actor.id, "attendance edited");
    Ok(json!({ "eventId": event_id, "memberId": member_id, "present": present }))
}

fn attendance_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    load_member(conn, &member_id)?;
    let events = store::event_facts(conn).map_err(HandlerErr::query)?;
    let present = store::present_event_ids(conn, &member_id).map_err(HandlerErr::query)?;
    let now = Utc::now();
    let mut recent = eligibility::member_history(&events, &present, now);
    recent.truncate(RECENT_HISTORY_LEN);
    Ok(json!({
        "memberId": member_id,
        "stats": eligibility::member_stats(&events, &present, now),
        "thresholdPercent": eligibility::ELIGIBILITY_THRESHOLD_PERCENT,
        "categories": eligibility::category_breakdown(&events, &present, now),
        "recent": recent,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: ConnHandler = match req.method.as_str() {
        "attendance.reconcile.begin" => return Some(handle_reconcile_begin(state, req)),
        "attendance.reconcile.get" => return Some(handle_reconcile_get(state, req)),
        "attendance.reconcile.toggle" => return Some(handle_reconcile_toggle(state, req)),
        "attendance.reconcile.commit" => return Some(handle_reconcile_commit(state, req)),
        "attendance.reconcile.cancel" => return Some(handle_reconcile_cancel(state, req)),
        "attendance.setManual" => attendance_set_manual,
        "attendance.summary" => attendance_summary,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
