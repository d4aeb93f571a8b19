use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    Approved,
    Rejected,
    Banned,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Approved => "approved",
            MemberStatus::Rejected => "rejected",
            MemberStatus::Banned => "banned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(MemberStatus::Pending),
            "approved" => Some(MemberStatus::Approved),
            "rejected" => Some(MemberStatus::Rejected),
            "banned" => Some(MemberStatus::Banned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Admin,
    Superadmin,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
            MemberRole::Superadmin => "superadmin",
        }
    }

    /// Unknown role strings degrade to a plain member.
    pub fn parse(s: &str) -> Self {
        Self::parse_strict(s).unwrap_or(MemberRole::Member)
    }

    pub fn parse_strict(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Some(MemberRole::Member),
            "admin" => Some(MemberRole::Admin),
            "superadmin" => Some(MemberRole::Superadmin),
            _ => None,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, MemberRole::Admin | MemberRole::Superadmin)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub uid: String,
    pub qid: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub gender: String,
    pub course: String,
    pub branch: String,
    pub section: String,
    pub housing: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub created_at: String,
}

/// The member performing an audited mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Visit,
    Event,
    Meeting,
    Campaign,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Visit,
        EventKind::Event,
        EventKind::Meeting,
        EventKind::Campaign,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Visit => "Visit",
            EventKind::Event => "Event",
            EventKind::Meeting => "Meeting",
            EventKind::Campaign => "Campaign",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "visit" => Some(EventKind::Visit),
            "event" => Some(EventKind::Event),
            "meeting" => Some(EventKind::Meeting),
            "campaign" => Some(EventKind::Campaign),
            _ => None,
        }
    }

    /// Dashboard label for the category breakdown.
    pub fn category_label(self) -> &'static str {
        match self {
            EventKind::Visit => "Village Visits",
            EventKind::Event => "Campus Events",
            EventKind::Meeting => "Meetings",
            EventKind::Campaign => "Campaigns",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub date: String,
    pub location: String,
    pub description: String,
    pub created_at: String,
}

impl Event {
    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub event_id: String,
    pub member_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    BulkAttendance,
    ManualAttendanceEdit,
    ApprovedUser,
    RejectedUser,
    BannedUser,
    UnbannedUser,
    ChangedRole,
    ApprovedProfileUpdate,
    RejectedProfileUpdate,
    CreatedEvent,
    DeletedEvent,
    CreatedNotice,
    DeletedNotice,
    PublishedContent,
    DeletedContent,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::BulkAttendance => "BULK_ATTENDANCE",
            AuditAction::ManualAttendanceEdit => "MANUAL_ATTENDANCE_EDIT",
            AuditAction::ApprovedUser => "APPROVED_USER",
            AuditAction::RejectedUser => "REJECTED_USER",
            AuditAction::BannedUser => "BANNED_USER",
            AuditAction::UnbannedUser => "UNBANNED_USER",
            AuditAction::ChangedRole => "CHANGED_ROLE",
            AuditAction::ApprovedProfileUpdate => "APPROVED_PROFILE_UPDATE",
            AuditAction::RejectedProfileUpdate => "REJECTED_PROFILE_UPDATE",
            AuditAction::CreatedEvent => "CREATED_EVENT",
            AuditAction::DeletedEvent => "DELETED_EVENT",
            AuditAction::CreatedNotice => "CREATED_NOTICE",
            AuditAction::DeletedNotice => "DELETED_NOTICE",
            AuditAction::PublishedContent => "PUBLISHED_CONTENT",
            AuditAction::DeletedContent => "DELETED_CONTENT",
        }
    }

    /// Action recorded when an admin moves a member into `status`.
    pub fn for_status_change(status: MemberStatus) -> Self {
        match status {
            MemberStatus::Approved => AuditAction::ApprovedUser,
            MemberStatus::Rejected => AuditAction::RejectedUser,
            MemberStatus::Banned => AuditAction::BannedUser,
            MemberStatus::Pending => AuditAction::UnbannedUser,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub actor: Actor,
    pub action: AuditAction,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub actor_id: String,
    pub actor_name: String,
    pub action: String,
    pub details: String,
    pub created_at: String,
}

/// Fixed-width so stored timestamps sort lexicographically.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` (browser datetime-local) and bare
/// dates. Naive values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
