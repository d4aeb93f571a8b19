use std::collections::{HashMap, HashSet};

use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::eligibility::EventFacts;
use crate::model::{
    now_rfc3339, parse_timestamp, AttendanceRecord, AuditEntry, Event, EventKind, Member,
    MemberRole, MemberStatus, NewAuditEntry,
};
use crate::reconcile::{AttendanceLedger, MemberDirectory, StorageError};

// SQLite's default host-parameter ceiling is 999 on older builds.
const IN_LIST_CHUNK: usize = 500;

pub const MEMBER_COLUMNS: &str = "id, uid, qid, name, email, phone, gender, course, branch, section, housing, role, status, created_at";

pub fn member_from_row(r: &Row<'_>) -> rusqlite::Result<Member> {
    let role: String = r.get(11)?;
    let status: String = r.get(12)?;
    Ok(Member {
        id: r.get(0)?,
        uid: r.get(1)?,
        qid: r.get(2)?,
        name: r.get(3)?,
        email: r.get(4)?,
        phone: r.get(5)?,
        gender: r.get(6)?,
        course: r.get(7)?,
        branch: r.get(8)?,
        section: r.get(9)?,
        housing: r.get(10)?,
        role: MemberRole::parse(&role),
        status: MemberStatus::parse(&status).unwrap_or(MemberStatus::Pending),
        created_at: r.get(13)?,
    })
}

pub fn get_member(conn: &Connection, member_id: &str) -> rusqlite::Result<Option<Member>> {
    conn.query_row(
        &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?"),
        [member_id],
        member_from_row,
    )
    .optional()
}

pub fn list_members(conn: &Connection, status: Option<MemberStatus>) -> rusqlite::Result<Vec<Member>> {
    match status {
        Some(s) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMBER_COLUMNS} FROM members WHERE status = ? ORDER BY name COLLATE NOCASE"
            ))?;
            let rows = stmt.query_map([s.as_str()], member_from_row)?;
            rows.collect()
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMBER_COLUMNS} FROM members ORDER BY name COLLATE NOCASE"
            ))?;
            let rows = stmt.query_map([], member_from_row)?;
            rows.collect()
        }
    }
}

pub fn find_members_by_qids(conn: &Connection, qids: &[String]) -> rusqlite::Result<Vec<Member>> {
    let mut out = Vec::new();
    for chunk in qids.chunks(IN_LIST_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE qid IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), member_from_row)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

pub fn qid_taken(conn: &Connection, qid: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM members WHERE qid = ?", [qid], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

pub const EVENT_COLUMNS: &str = "id, title, kind, date, location, description, created_at";

pub fn event_from_row(r: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: r.get(0)?,
        title: r.get(1)?,
        kind: r.get(2)?,
        date: r.get(3)?,
        location: r.get(4)?,
        description: r.get(5)?,
        created_at: r.get(6)?,
    })
}

pub fn get_event(conn: &Connection, event_id: &str) -> rusqlite::Result<Option<Event>> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"),
        [event_id],
        event_from_row,
    )
    .optional()
}

/// Every event with the number of attendance records it carries.
pub fn event_facts(conn: &Connection) -> rusqlite::Result<Vec<EventFacts>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.title, e.kind, e.date,
                (SELECT COUNT(*) FROM attendance_records a WHERE a.event_id = e.id)
         FROM events e",
    )?;
    let rows = stmt.query_map([], |r| {
        let kind: String = r.get(2)?;
        let date: String = r.get(3)?;
        Ok(EventFacts {
            id: r.get(0)?,
            title: r.get(1)?,
            kind: EventKind::parse(&kind),
            starts_at: parse_timestamp(&date),
            attendance_count: r.get::<_, i64>(4)?.max(0) as usize,
        })
    })?;
    rows.collect()
}

/// Event ids the member has a Present record for.
pub fn present_event_ids(conn: &Connection, member_id: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT event_id FROM attendance_records WHERE member_id = ? AND status = 'Present'",
    )?;
    let rows = stmt.query_map([member_id], |r| r.get::<_, String>(0))?;
    rows.collect()
}

pub fn present_event_ids_by_member(
    conn: &Connection,
) -> rusqlite::Result<HashMap<String, HashSet<String>>> {
    let mut stmt =
        conn.prepare("SELECT member_id, event_id FROM attendance_records WHERE status = 'Present'")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    let mut out: HashMap<String, HashSet<String>> = HashMap::new();
    for row in rows {
        let (member_id, event_id) = row?;
        out.entry(member_id).or_default().insert(event_id);
    }
    Ok(out)
}

/// RSVP'd members of one event with their RSVP time, earliest first.
pub fn rsvp_members(conn: &Connection, event_id: &str) -> rusqlite::Result<Vec<(Member, String)>> {
    let cols = MEMBER_COLUMNS
        .split(", ")
        .map(|c| format!("m.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {cols}, r.created_at
         FROM event_rsvps r
         JOIN members m ON m.id = r.member_id
         WHERE r.event_id = ?
         ORDER BY r.created_at, r.rowid"
    ))?;
    let rows = stmt.query_map([event_id], |r| Ok((member_from_row(r)?, r.get::<_, String>(14)?)))?;
    rows.collect()
}

pub fn upsert_attendance(conn: &Connection, records: &[AttendanceRecord]) -> rusqlite::Result<()> {
    let now = now_rfc3339();
    let mut stmt = conn.prepare(
        "INSERT INTO attendance_records(event_id, member_id, status, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(event_id, member_id) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
    )?;
    for r in records {
        stmt.execute((&r.event_id, &r.member_id, r.status.as_str(), &now))?;
    }
    Ok(())
}

pub fn delete_attendance(conn: &Connection, event_id: &str, member_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM attendance_records WHERE event_id = ? AND member_id = ?",
        (event_id, member_id),
    )
}

pub fn append_audit(conn: &Connection, entry: &NewAuditEntry) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO audit_logs(id, actor_id, actor_name, action, details, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &entry.actor.id,
            &entry.actor.name,
            entry.action.as_str(),
            &entry.details,
            now_rfc3339(),
        ),
    )?;
    Ok(id)
}

/// Newest first.
pub fn list_audit(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, actor_id, actor_name, action, details, created_at
         FROM audit_logs
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt.query_map([limit as i64], |r| {
        Ok(AuditEntry {
            id: r.get(0)?,
            actor_id: r.get(1)?,
            actor_name: r.get(2)?,
            action: r.get(3)?,
            details: r.get(4)?,
            created_at: r.get(5)?,
        })
    })?;
    rows.collect()
}

/// Reconciliation storage over a connection or an open transaction.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MemberDirectory for SqliteStore<'_> {
    fn find_members_by_identifiers(&self, identifiers: &[String]) -> Result<Vec<Member>, StorageError> {
        Ok(find_members_by_qids(self.conn, identifiers)?)
    }
}

impl AttendanceLedger for SqliteStore<'_> {
    fn upsert_attendance(&self, records: &[AttendanceRecord]) -> Result<(), StorageError> {
        Ok(upsert_attendance(self.conn, records)?)
    }

    fn append_audit(&self, entry: &NewAuditEntry) -> Result<(), StorageError> {
        append_audit(self.conn, entry)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ingest::CandidateRecord;
    use crate::model::{Actor, AttendanceStatus, AuditAction};
    use crate::reconcile::{ReconcileError, ReconcileSession, SessionState};

    fn seeded() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open db");
        for (id, qid, name) in [("m1", "A1", "Asha"), ("m2", "A2", "Bilal")] {
            conn.execute(
                "INSERT INTO members(id, uid, qid, name, role, status, created_at)
                 VALUES(?, ?, ?, ?, 'member', 'approved', ?)",
                (id, format!("P{qid}"), qid, name, now_rfc3339()),
            )
            .expect("insert member");
        }
        conn.execute(
            "INSERT INTO events(id, title, kind, date, location, description, created_at)
             VALUES('e1', 'Drive', 'Visit', '2024-01-01T09:00', '', '', ?)",
            [now_rfc3339()],
        )
        .expect("insert event");
        (dir, conn)
    }

    #[test]
    fn qid_lookup_is_exact() {
        let (_dir, conn) = seeded();
        let found = find_members_by_qids(&conn, &["A1".into(), "a2".into(), "A9".into()]).expect("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m1");
    }

    #[test]
    fn attendance_upsert_overwrites_the_pair() {
        let (_dir, conn) = seeded();
        let record = AttendanceRecord {
            event_id: "e1".into(),
            member_id: "m1".into(),
            status: AttendanceStatus::Present,
        };
        upsert_attendance(&conn, &[record.clone()]).expect("first");
        upsert_attendance(&conn, &[record]).expect("second");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance_records", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
        assert!(present_event_ids(&conn, "m1").expect("present").contains("e1"));
    }

    #[test]
    fn audit_entries_come_back_newest_first() {
        let (_dir, conn) = seeded();
        let actor = Actor {
            id: "m1".into(),
            name: "Asha".into(),
        };
        for details in ["one", "two", "three"] {
            append_audit(
                &conn,
                &NewAuditEntry {
                    actor: actor.clone(),
                    action: AuditAction::CreatedEvent,
                    details: details.into(),
                },
            )
            .expect("append");
        }
        let entries = list_audit(&conn, 2).expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].details, "three");
        assert_eq!(entries[0].action, "CREATED_EVENT");
    }

    #[test]
    fn event_facts_count_attendance() {
        let (_dir, conn) = seeded();
        upsert_attendance(
            &conn,
            &[AttendanceRecord {
                event_id: "e1".into(),
                member_id: "m2".into(),
                status: AttendanceStatus::Present,
            }],
        )
        .expect("upsert");
        let facts = event_facts(&conn).expect("facts");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].attendance_count, 1);
        assert_eq!(facts[0].kind, Some(EventKind::Visit));
        assert!(facts[0].starts_at.is_some());
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn audit_insert_failure_rolls_back_the_attendance_upserts() {
        let (_dir, conn) = seeded();
        let candidates: Vec<CandidateRecord> = ["A1", "A2"]
            .iter()
            .map(|q| CandidateRecord {
                identifier: q.to_string(),
                display_name: String::new(),
            })
            .collect();
        let actor = Actor {
            id: "m1".into(),
            name: "Asha".into(),
        };
        let mut session = ReconcileSession::begin(
            "s-1".into(),
            "e1".into(),
            "Drive".into(),
            actor,
            Vec::new(),
            &candidates,
            &SqliteStore::new(&conn),
        )
        .expect("begin");
        assert_eq!(session.selection.len(), 2);

        conn.execute_batch(
            "CREATE TRIGGER audit_offline BEFORE INSERT ON audit_logs
             BEGIN SELECT RAISE(ABORT, 'audit offline'); END;",
        )
        .expect("create trigger");
        {
            let tx = conn.unchecked_transaction().expect("tx");
            let err = session.commit(&SqliteStore::new(&tx)).unwrap_err();
            assert!(matches!(err, ReconcileError::Storage(_)));
        }
        assert_eq!(count(&conn, "attendance_records"), 0);
        assert_eq!(count(&conn, "audit_logs"), 0);
        assert_eq!(session.state, SessionState::Review);

        conn.execute_batch("DROP TRIGGER audit_offline").expect("drop trigger");
        let tx = conn.unchecked_transaction().expect("tx");
        let summary = session.commit(&SqliteStore::new(&tx)).expect("retry");
        tx.commit().expect("commit");
        assert_eq!(summary.record_count, 2);
        assert_eq!(count(&conn, "attendance_records"), 2);
        assert_eq!(count(&conn, "audit_logs"), 1);
        assert_eq!(session.state, SessionState::Committed);
    }
}
