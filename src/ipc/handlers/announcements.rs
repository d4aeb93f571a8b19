use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{
    get_optional_str, get_required_str, require_admin, with_conn, ConnHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_rfc3339, AuditAction, NewAuditEntry};
use crate::store;

const URGENCIES: [&str; 2] = ["normal", "urgent"];

fn announcements_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let title = get_required_str(params, "title")?;
    let content = get_required_str(params, "content")?;
    let urgency = get_optional_str(params, "urgency")
        .map(|u| u.to_ascii_lowercase())
        .unwrap_or_else(|| "normal".to_string());
    if !URGENCIES.contains(&urgency.as_str()) {
        return Err(HandlerErr::new("bad_params", "urgency must be normal or urgent")
            .with_details(json!({ "urgency": urgency })));
    }

    let id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO announcements(id, title, content, urgency, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, &title, &content, &urgency, &created_at),
    )
    .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor,
            action: AuditAction::CreatedNotice,
            details: format!("Posted announcement: {}", title),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    Ok(json!({
        "announcement": {
            "id": id,
            "title": title,
            "content": content,
            "urgency": urgency,
            "createdAt": created_at,
        }
    }))
}

fn announcements_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let id = get_required_str(params, "announcementId")?;
    let title: Option<String> = conn
        .query_row("SELECT title FROM announcements WHERE id = ?", [&id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(title) = title else {
        return Err(HandlerErr::new("not_found", "announcement not found")
            .with_details(json!({ "announcementId": id })));
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM announcements WHERE id = ?", [&id])
        .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor,
            action: AuditAction::DeletedNotice,
            details: format!("Deleted announcement: {}", title),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "announcementId": id, "deleted": true }))
}

fn announcements_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, content, urgency, created_at
             FROM announcements
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "content": r.get::<_, String>(2)?,
                "urgency": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "announcements": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: ConnHandler = match req.method.as_str() {
        "announcements.create" => announcements_create,
        "announcements.delete" => announcements_delete,
        "announcements.list" => announcements_list,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
