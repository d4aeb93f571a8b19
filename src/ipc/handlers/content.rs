use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{
    get_optional_str, get_required_str, require_admin, with_conn, ConnHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_rfc3339, AuditAction, NewAuditEntry};
use crate::store;

const SECTIONS: [&str; 4] = ["gallery", "legacy", "team", "syllabus"];

fn parse_section(raw: &str) -> Result<String, HandlerErr> {
    let s = raw.trim().to_ascii_lowercase();
    if SECTIONS.contains(&s.as_str()) {
        Ok(s)
    } else {
        Err(HandlerErr::new("bad_params", "unknown content section")
            .with_details(json!({ "section": raw, "allowed": SECTIONS })))
    }
}

fn content_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "section": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "subtitle": r.get::<_, String>(3)?,
        "body": r.get::<_, String>(4)?,
        "category": r.get::<_, String>(5)?,
        "mediaUrl": r.get::<_, Option<String>>(6)?,
        "createdAt": r.get::<_, String>(7)?,
    }))
}

const CONTENT_COLUMNS: &str = "id, section, title, subtitle, body, category, media_url, created_at";

fn content_publish(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let section = parse_section(&get_required_str(params, "section")?)?;
    let title = get_required_str(params, "title")?;

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO site_content(id, section, title, subtitle, body, category, media_url, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &section,
            &title,
            get_optional_str(params, "subtitle").unwrap_or_default(),
            get_optional_str(params, "body").unwrap_or_default(),
            get_optional_str(params, "category").unwrap_or_default(),
            get_optional_str(params, "mediaUrl"),
            now_rfc3339(),
        ),
    )
    .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor,
            action: AuditAction::PublishedContent,
            details: format!("Published to {}: {}", section, title),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    let item = conn
        .query_row(
            &format!("SELECT {CONTENT_COLUMNS} FROM site_content WHERE id = ?"),
            [&id],
            content_row,
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({ "item": item }))
}

fn content_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let id = get_required_str(params, "itemId")?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT section, title FROM site_content WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((section, title)) = row else {
        return Err(HandlerErr::new("not_found", "content item not found")
            .with_details(json!({ "itemId": id })));
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM site_content WHERE id = ?", [&id])
        .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor,
            action: AuditAction::DeletedContent,
            details: format!("Removed content from {}: {}", section, title),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "itemId": id, "deleted": true }))
}

fn content_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let section = get_optional_str(params, "section")
        .map(|s| parse_section(&s))
        .transpose()?;
    let order = "ORDER BY created_at DESC, rowid DESC";
    let rows = match &section {
        Some(s) => {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CONTENT_COLUMNS} FROM site_content WHERE section = ? {order}"
                ))
                .map_err(HandlerErr::query)?;
            let rows = stmt
                .query_map([s], content_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::query)?;
            rows
        }
        None => {
            let mut stmt = conn
                .prepare(&format!("SELECT {CONTENT_COLUMNS} FROM site_content {order}"))
                .map_err(HandlerErr::query)?;
            let rows = stmt
                .query_map([], content_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::query)?;
            rows
        }
    };
    Ok(json!({ "items": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: ConnHandler = match req.method.as_str() {
        "content.publish" => content_publish,
        "content.delete" => content_delete,
        "content.list" => content_list,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
