use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{Actor, Member, MemberStatus};
use crate::store;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn update(e: rusqlite::Error) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn commit(e: rusqlite::Error) -> Self {
        Self::new("db_commit_failed", e.to_string())
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Trimmed string param; absent, null and blank all read as `None`.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be boolean", key))),
    }
}

pub fn load_member(conn: &Connection, member_id: &str) -> Result<Member, HandlerErr> {
    store::get_member(conn, member_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "member not found")
                .with_details(json!({ "memberId": member_id }))
        })
}

/// Resolves `params.actorId` to an approved admin or superadmin.
pub fn require_admin(conn: &Connection, params: &serde_json::Value) -> Result<Actor, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let member = store::get_member(conn, &actor_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "actor not found")
                .with_details(json!({ "actorId": actor_id }))
        })?;
    if !member.role.is_admin() || member.status != MemberStatus::Approved {
        tracing::warn!(actor = %actor_id, "admin method refused");
        return Err(HandlerErr::new("forbidden", "admin role required")
            .with_details(json!({ "actorId": actor_id })));
    }
    Ok(Actor {
        id: member.id,
        name: member.name,
    })
}

pub type ConnHandler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

/// Runs a handler that needs nothing but the open workspace connection.
pub fn with_conn(state: &AppState, req: &Request, f: ConnHandler) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
