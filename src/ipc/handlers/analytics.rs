use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::analytics;
use crate::eligibility;
use crate::ipc::helpers::{require_admin, with_conn, ConnHandler, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn analytics_overview(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_admin(conn, params)?;
    let members = store::list_members(conn, None).map_err(HandlerErr::query)?;
    let events = store::event_facts(conn).map_err(HandlerErr::query)?;
    let overview = analytics::overview(&members, &events, Utc::now());
    let mut v = json!(overview);
    v["thresholdPercent"] = json!(eligibility::ELIGIBILITY_THRESHOLD_PERCENT);
    Ok(v)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: ConnHandler = match req.method.as_str() {
        "analytics.overview" => analytics_overview,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
