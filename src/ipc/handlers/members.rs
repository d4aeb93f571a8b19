use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::eligibility::{self, AttendanceStats};
use crate::ipc::helpers::{
    get_bool, get_optional_str, get_required_str, load_member, require_admin, with_conn,
    ConnHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_rfc3339, AuditAction, Member, MemberRole, MemberStatus, NewAuditEntry};
use crate::store;

const DEFAULT_BRANCH: &str = "NA";
const DEFAULT_HOUSING: &str = "Day Scholar";
const PROFILE_FIELDS: [&str; 5] = ["phone", "course", "branch", "section", "gender"];

fn directory_row(m: &Member, stats: AttendanceStats) -> serde_json::Value {
    let mut v = json!(m);
    v["stats"] = json!(stats);
    v
}

fn members_register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let qid = get_required_str(params, "qid")?;
    if store::qid_taken(conn, &qid).map_err(HandlerErr::query)? {
        tracing::warn!(qid = %qid, "registration refused: qid already registered");
        return Err(HandlerErr::new("duplicate_qid", "this QID is already registered")
            .with_details(json!({ "qid": qid })));
    }

    let has_admin = conn
        .query_row(
            "SELECT 1 FROM members WHERE role IN ('admin', 'superadmin') LIMIT 1",
            [],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    // The first member of an admin-less workspace owns it.
    let (role, status) = if has_admin {
        (MemberRole::Member, MemberStatus::Pending)
    } else {
        (MemberRole::Superadmin, MemberStatus::Approved)
    };

    let id = get_optional_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let field = |key: &str| get_optional_str(params, key).unwrap_or_default();
    conn.execute(
        "INSERT INTO members(id, uid, qid, name, email, phone, gender, course, branch, section, housing, role, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            format!("P{qid}"),
            qid,
            name,
            field("email"),
            field("phone"),
            field("gender"),
            field("course"),
            get_optional_str(params, "branch").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            field("section"),
            get_optional_str(params, "housing").unwrap_or_else(|| DEFAULT_HOUSING.to_string()),
            role.as_str(),
            status.as_str(),
            now_rfc3339(),
        ],
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            HandlerErr::new("duplicate_qid", "member id or QID already registered")
        }
        _ => HandlerErr::update(e),
    })?;

    let member = load_member(conn, &id)?;
    tracing::info!(
        member = %member.id,
        qid = %member.qid,
        role = member.role.as_str(),
        "member registered"
    );
    Ok(json!({ "member": member }))
}

fn matches_search(m: &Member, needle: &str) -> bool {
    m.name.to_lowercase().contains(&needle.to_lowercase())
        || m.qid.contains(needle)
        || m.uid.contains(needle)
}

fn members_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_admin(conn, params)?;
    let status = match get_optional_str(params, "status") {
        Some(raw) => Some(MemberStatus::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", "unknown status").with_details(json!({ "status": raw }))
        })?),
        None => None,
    };
    let search = get_optional_str(params, "search");
    let low_only = get_bool(params, "lowAttendance")?.unwrap_or(false);

    let members = store::list_members(conn, status).map_err(HandlerErr::query)?;
    let events = store::event_facts(conn).map_err(HandlerErr::query)?;
    let present = store::present_event_ids_by_member(conn).map_err(HandlerErr::query)?;
    let now = Utc::now();
    let empty = HashSet::new();

    let mut rows = Vec::new();
    for m in &members {
        if let Some(needle) = search.as_deref() {
            if !matches_search(m, needle) {
                continue;
            }
        }
        let stats = eligibility::member_stats(&events, present.get(&m.id).unwrap_or(&empty), now);
        if low_only && stats.eligible {
            continue;
        }
        rows.push(directory_row(m, stats));
    }
    Ok(json!({
        "members": rows,
        "thresholdPercent": eligibility::ELIGIBILITY_THRESHOLD_PERCENT,
    }))
}

fn members_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let member = load_member(conn, &member_id)?;
    let events = store::event_facts(conn).map_err(HandlerErr::query)?;
    let present = store::present_event_ids(conn, &member_id).map_err(HandlerErr::query)?;
    let now = Utc::now();
    Ok(json!({
        "member": member,
        "stats": eligibility::member_stats(&events, &present, now),
        "history": eligibility::member_history(&events, &present, now),
    }))
}

fn members_set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let member_id = get_required_str(params, "memberId")?;
    let raw = get_required_str(params, "status")?;
    let status = MemberStatus::parse(&raw).ok_or_else(|| {
        HandlerErr::new("bad_params", "unknown status").with_details(json!({ "status": raw }))
    })?;
    let target = load_member(conn, &member_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE members SET status = ? WHERE id = ?",
        (status.as_str(), &member_id),
    )
    .map_err(HandlerErr::update)?;
    let details = format!(
        "{} changed {}'s status to {}.",
        actor.name,
        target.name,
        status.as_str().to_ascii_uppercase()
    );
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor: actor.clone(),
            action: AuditAction::for_status_change(status),
            details,
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(member = %member_id, status = status.as_str(), actor = %actor.id, "member status changed");
    Ok(json!({ "member": load_member(conn, &member_id)? }))
}

fn members_set_role(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    if load_member(conn, &actor.id)?.role != MemberRole::Superadmin {
        return Err(HandlerErr::new("forbidden", "superadmin role required")
            .with_details(json!({ "actorId": actor.id })));
    }
    let member_id = get_required_str(params, "memberId")?;
    let raw = get_required_str(params, "role")?;
    let role = MemberRole::parse_strict(&raw).ok_or_else(|| {
        HandlerErr::new("bad_params", "unknown role").with_details(json!({ "role": raw }))
    })?;
    if member_id == actor.id {
        return Err(HandlerErr::new("bad_params", "cannot change your own role"));
    }
    let target = load_member(conn, &member_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE members SET role = ? WHERE id = ?",
        (role.as_str(), &member_id),
    )
    .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor: actor.clone(),
            action: AuditAction::ChangedRole,
            details: format!(
                "{} changed {}'s role to {}.",
                actor.name,
                target.name,
                role.as_str().to_ascii_uppercase()
            ),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(member = %member_id, role = role.as_str(), actor = %actor.id, "member role changed");
    Ok(json!({ "member": load_member(conn, &member_id)? }))
}

fn members_request_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    load_member(conn, &member_id)?;
    let values: Vec<Option<String>> = PROFILE_FIELDS
        .iter()
        .map(|k| get_optional_str(params, k))
        .collect();
    if values.iter().all(Option::is_none) {
        return Err(HandlerErr::new("bad_params", "no profile fields to update")
            .with_details(json!({ "fields": PROFILE_FIELDS })));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO profile_update_requests(id, member_id, phone, course, branch, section, gender, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        rusqlite::params![
            id,
            member_id,
            values[0],
            values[1],
            values[2],
            values[3],
            values[4],
            now_rfc3339(),
        ],
    )
    .map_err(HandlerErr::update)?;
    tracing::info!(member = %member_id, request = %id, "profile update requested");
    Ok(json!({ "requestId": id }))
}

fn members_update_requests_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(conn, params)?;
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.member_id, m.name, m.qid, r.phone, r.course, r.branch, r.section, r.gender, r.created_at
             FROM profile_update_requests r
             JOIN members m ON m.id = r.member_id
             WHERE r.status = 'pending'
             ORDER BY r.created_at, r.rowid",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "memberId": r.get::<_, String>(1)?,
                "memberName": r.get::<_, String>(2)?,
                "qid": r.get::<_, String>(3)?,
                "changes": {
                    "phone": r.get::<_, Option<String>>(4)?,
                    "course": r.get::<_, Option<String>>(5)?,
                    "branch": r.get::<_, Option<String>>(6)?,
                    "section": r.get::<_, Option<String>>(7)?,
                    "gender": r.get::<_, Option<String>>(8)?,
                },
                "createdAt": r.get::<_, String>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "requests": rows }))
}

fn members_update_requests_resolve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let request_id = get_required_str(params, "requestId")?;
    let approve = get_bool(params, "approve")?
        .ok_or_else(|| HandlerErr::new("bad_params", "missing approve"))?;

    let row = conn
        .query_row(
            "SELECT member_id, status FROM profile_update_requests WHERE id = ?",
            [&request_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((member_id, status)) = row else {
        return Err(HandlerErr::new("not_found", "profile update request not found")
            .with_details(json!({ "requestId": request_id })));
    };
    if status != "pending" {
        return Err(HandlerErr::new("bad_params", "request already resolved")
            .with_details(json!({ "requestId": request_id, "status": status })));
    }
    let target = load_member(conn, &member_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if approve {
        tx.execute(
            "UPDATE members SET
               phone = COALESCE((SELECT phone FROM profile_update_requests WHERE id = ?1), phone),
               course = COALESCE((SELECT course FROM profile_update_requests WHERE id = ?1), course),
               branch = COALESCE((SELECT branch FROM profile_update_requests WHERE id = ?1), branch),
               section = COALESCE((SELECT section FROM profile_update_requests WHERE id = ?1), section),
               gender = COALESCE((SELECT gender FROM profile_update_requests WHERE id = ?1), gender)
             WHERE id = ?2",
            (&request_id, &member_id),
        )
        .map_err(HandlerErr::update)?;
    }
    let (new_status, action, verb) = if approve {
        ("approved", AuditAction::ApprovedProfileUpdate, "approved")
    } else {
        ("rejected", AuditAction::RejectedProfileUpdate, "rejected")
    };
    tx.execute(
        "UPDATE profile_update_requests SET status = ? WHERE id = ?",
        (new_status, &request_id),
    )
    .map_err(HandlerErr::update)?;
    store::append_audit(
        &tx,
        &NewAuditEntry {
            actor: actor.clone(),
            action,
            details: format!("{} {} the profile update for {}.", actor.name, verb, target.name),
        },
    )
    .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(request = %request_id, member = %member_id, approved = approve, "profile update resolved");
    Ok(json!({
        "requestId": request_id,
        "status": new_status,
        "member": load_member(conn, &member_id)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: ConnHandler = match req.method.as_str() {
        "members.register" => members_register,
        "members.list" => members_list,
        "members.get" => members_get,
        "members.setStatus" => members_set_status,
        "members.setRole" => members_set_role,
        "members.requestUpdate" => members_request_update,
        "members.updateRequests.list" => members_update_requests_list,
        "members.updateRequests.resolve" => members_update_requests_resolve,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
