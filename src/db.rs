use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "club.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS members(
            id TEXT PRIMARY KEY,
            uid TEXT NOT NULL,
            qid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            gender TEXT NOT NULL DEFAULT '',
            course TEXT NOT NULL DEFAULT '',
            branch TEXT NOT NULL DEFAULT 'NA',
            section TEXT NOT NULL DEFAULT '',
            housing TEXT NOT NULL DEFAULT 'Day Scholar',
            role TEXT NOT NULL DEFAULT 'member',
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_members_status ON members(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profile_update_requests(
            id TEXT PRIMARY KEY,
            member_id TEXT NOT NULL,
            phone TEXT,
            course TEXT,
            branch TEXT,
            section TEXT,
            gender TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            FOREIGN KEY(member_id) REFERENCES members(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profile_update_requests_status ON profile_update_requests(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            date TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_events_date ON events(date)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS event_rsvps(
            event_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(event_id, member_id),
            FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
            FOREIGN KEY(member_id) REFERENCES members(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_event_rsvps_member ON event_rsvps(member_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            event_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(event_id, member_id),
            FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
            FOREIGN KEY(member_id) REFERENCES members(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_member ON attendance_records(member_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            urgency TEXT NOT NULL DEFAULT 'normal',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS site_content(
            id TEXT PRIMARY KEY,
            section TEXT NOT NULL,
            title TEXT NOT NULL,
            subtitle TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            media_url TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_site_content_section ON site_content(section)",
        [],
    )?;

    // Audit rows outlive the members they name, so no foreign key here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_logs(
            id TEXT PRIMARY KEY,
            actor_id TEXT NOT NULL,
            actor_name TEXT NOT NULL,
            action TEXT NOT NULL,
            details TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs(created_at)",
        [],
    )?;

    ensure_attendance_updated_at(&conn)?;

    Ok(conn)
}

// Workspaces created before attendance edits were timestamped lack the column.
fn ensure_attendance_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_records", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance_records ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
