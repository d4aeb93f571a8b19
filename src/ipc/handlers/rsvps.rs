use rusqlite::Connection;
use serde_json::json;

use crate::ipc::handlers::events::load_event;
use crate::ipc::helpers::{get_required_str, load_member, with_conn, ConnHandler, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_rfc3339, MemberStatus};

fn rsvps_toggle(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let event_id = get_required_str(params, "eventId")?;
    let member = load_member(conn, &member_id)?;
    if member.status != MemberStatus::Approved {
        return Err(HandlerErr::new("forbidden", "only approved members can RSVP")
            .with_details(json!({ "memberId": member_id, "status": member.status })));
    }
    load_event(conn, &event_id)?;

    let removed = conn
        .execute(
            "DELETE FROM event_rsvps WHERE event_id = ? AND member_id = ?",
            (&event_id, &member_id),
        )
        .map_err(HandlerErr::update)?;
    if removed == 0 {
        conn.execute(
            "INSERT INTO event_rsvps(event_id, member_id, created_at) VALUES(?, ?, ?)",
            (&event_id, &member_id, now_rfc3339()),
        )
        .map_err(HandlerErr::update)?;
    }
    let rsvped = removed == 0;
    tracing::debug!(event = %event_id, member = %member_id, rsvped, "rsvp toggled");
    Ok(json!({ "eventId": event_id, "memberId": member_id, "rsvped": rsvped }))
}

fn rsvps_list_for_member(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    load_member(conn, &member_id)?;
    let mut stmt = conn
        .prepare("SELECT event_id FROM event_rsvps WHERE member_id = ? ORDER BY created_at, rowid")
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map([&member_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "memberId": member_id, "eventIds": ids }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: ConnHandler = match req.method.as_str() {
        "rsvps.toggle" => rsvps_toggle,
        "rsvps.listForMember" => rsvps_list_for_member,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
