use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::export;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, get_optional_str, get_required_str, require_admin, with_conn, ConnHandler,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_rfc3339, parse_timestamp, AuditAction, Event, EventKind, NewAuditEntry};
use crate::store;

pub fn load_event(conn: &Connection, event_id: &str) -> Result<Event, HandlerErr> {
    store::get_event(conn, event_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "event not found").with_details(json!({ "eventId": event_id }))
        })
}

fn events_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let title = get_required_str(params, "title")?;
    let raw_kind = get_required_str(params, "kind")?;
    let kind = EventKind::parse(&raw_kind).ok_or_else(|| {
        HandlerErr::new("bad_params", "kind must be Visit, Event, Meeting or Campaign")
            .with_details(json!({ "kind": raw_kind }))
    })?;
    let raw_date = get_required_str(params, "date")?;
    let date = parse_timestamp(&raw_date).ok_or_else(|| {
        HandlerErr::new("bad_params", "date is not a recognised timestamp")
            .with_details(json!({ "date": raw_date }))
    })?;

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO events(id, title, kind, date, location, description, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &title,
            kind.as_str(),
            date.to_rfc3339_opts(SecondsFormat::Secs, true),
            get_optional_str(params, "location").unwrap_or_default(),
            get_optional_str(params, "description").unwrap_or_default(),
            now_rfc3339(),
        ),
    )
    .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor: actor.clone(),
            action: AuditAction::CreatedEvent,
            details: format!("Created a new {}: {}", kind.as_str(), title),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(event = %id, kind = kind.as_str(), actor = %actor.id, "event created");
    Ok(json!({ "event": load_event(conn, &id)? }))
}

fn delete_event(conn: &Connection, params: &serde_json::Value) -> Result<Event, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let event_id = get_required_str(params, "eventId")?;
    let event = load_event(conn, &event_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    // RSVPs and attendance go with the event through ON DELETE CASCADE.
    tx.execute("DELETE FROM events WHERE id = ?", [&event_id])
        .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor: actor.clone(),
            action: AuditAction::DeletedEvent,
            details: format!("Deleted event: {}", event.title),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(event = %event_id, actor = %actor.id, "event deleted");
    Ok(event)
}

fn handle_events_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match delete_event(conn, &req.params) {
        Ok(event) => {
            let before = state.sessions.len();
            state.sessions.retain(|_, s| s.event_id != event.id);
            ok(
                &req.id,
                json!({
                    "eventId": event.id,
                    "closedSessions": before - state.sessions.len(),
                }),
            )
        }
        Err(error) => error.response(&req.id),
    }
}

const EVENT_ROW_SQL: &str = "SELECT e.id, e.title, e.kind, e.date, e.location, e.description, e.created_at,
        (SELECT COUNT(*) FROM event_rsvps r WHERE r.event_id = e.id),
        (SELECT COUNT(*) FROM attendance_records a WHERE a.event_id = e.id)
 FROM events e";

fn event_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let event = store::event_from_row(r)?;
    let upcoming = event.starts_at().map(|t| t >= Utc::now()).unwrap_or(false);
    let mut v = json!(event);
    v["rsvpCount"] = json!(r.get::<_, i64>(7)?);
    v["attendanceCount"] = json!(r.get::<_, i64>(8)?);
    v["upcoming"] = json!(upcoming);
    Ok(v)
}

fn events_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kind = match get_optional_str(params, "kind") {
        Some(raw) => Some(EventKind::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", "unknown event kind").with_details(json!({ "kind": raw }))
        })?),
        None => None,
    };
    let mut stmt = conn
        .prepare(&format!("{EVENT_ROW_SQL} ORDER BY e.date, e.rowid"))
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], event_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let rows: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|v| match kind {
            Some(k) => v.get("kind").and_then(|x| x.as_str()) == Some(k.as_str()),
            None => true,
        })
        .collect();
    Ok(json!({ "events": rows }))
}

fn events_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let event_id = get_required_str(params, "eventId")?;
    let mut stmt = conn
        .prepare(&format!("{EVENT_ROW_SQL} WHERE e.id = ?"))
        .map_err(HandlerErr::query)?;
    let mut rows = stmt
        .query_map([&event_id], event_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let Some(event) = rows.pop() else {
        return Err(HandlerErr::new("not_found", "event not found")
            .with_details(json!({ "eventId": event_id })));
    };
    let rsvps: Vec<serde_json::Value> = store::rsvp_members(conn, &event_id)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|(m, at)| {
            json!({
                "memberId": m.id,
                "name": m.name,
                "qid": m.qid,
                "rsvpAt": at,
            })
        })
        .collect();
    Ok(json!({ "event": event, "rsvps": rsvps }))
}

fn events_export_rsvps(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_admin(conn, params)?;
    let event_id = get_required_str(params, "eventId")?;
    let event = load_event(conn, &event_id)?;
    let members: Vec<_> = store::rsvp_members(conn, &event_id)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|(m, _)| m)
        .collect();
    if members.is_empty() {
        return Err(HandlerErr::new("no_rsvps", "No RSVPs to export")
            .with_details(json!({ "eventId": event_id })));
    }

    let text = export::rsvp_csv(&members).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    let path = match get_optional_str(params, "outDir") {
        Some(dir) => Some(
            export::write_rsvp_csv(&PathBuf::from(&dir), &event.title, &text).map_err(|e| {
                HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "outDir": dir }))
            })?,
        ),
        None => None,
    };
    tracing::info!(event = %event_id, rows = members.len(), "rsvp sheet exported");
    Ok(json!({
        "fileName": export::rsvp_filename(&event.title),
        "rowCount": members.len(),
        "csv": text,
        "path": path.map(|p| p.to_string_lossy().to_string()),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: ConnHandler = match req.method.as_str() {
        "events.create" => events_create,
        "events.list" => events_list,
        "events.get" => events_get,
        "events.exportRsvps" => events_export_rsvps,
        "events.delete" => return Some(handle_events_delete(state, req)),
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
