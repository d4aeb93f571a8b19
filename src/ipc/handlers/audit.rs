use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, require_admin, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_audit_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }
    let limit = state
        .config
        .audit_page(req.params.get("limit").and_then(|v| v.as_u64()));
    match store::list_audit(conn, limit) {
        Ok(entries) => ok(&req.id, json!({ "entries": entries, "limit": limit })),
        Err(e) => HandlerErr::query(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}
