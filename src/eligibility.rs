use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{AttendanceStatus, EventKind};

/// Members at or above this attendance percentage are eligible.
pub const ELIGIBILITY_THRESHOLD_PERCENT: u32 = 75;

/// How many valid events the recent-history list shows.
pub const RECENT_HISTORY_LEN: usize = 10;

/// What the percentage math needs to know about one event.
#[derive(Debug, Clone)]
pub struct EventFacts {
    pub id: String,
    pub title: String,
    pub kind: Option<EventKind>,
    pub starts_at: Option<DateTime<Utc>>,
    pub attendance_count: usize,
}

impl EventFacts {
    /// Past events count, and so do events that already carry attendance
    /// (an event marked live before its nominal date).
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.map(|t| t < now).unwrap_or(false) || self.attendance_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub attended: usize,
    pub total: usize,
    pub percentage: u32,
    pub eligible: bool,
}

impl AttendanceStats {
    pub fn new(attended: usize, total: usize) -> Self {
        let percentage = attendance_percentage(attended, total);
        Self {
            attended,
            total,
            percentage,
            eligible: is_eligible(percentage),
        }
    }
}

/// `round(100 * attended / total)`, rounding halves up, clamped to 100.
/// Zero when there is nothing to attend.
pub fn attendance_percentage(attended: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let a = attended as u64;
    let t = total as u64;
    let rounded = (200 * a + t) / (2 * t);
    rounded.min(100) as u32
}

pub fn is_eligible(percentage: u32) -> bool {
    percentage >= ELIGIBILITY_THRESHOLD_PERCENT
}

/// Valid events, newest first. Events without a parseable date sort last.
pub fn valid_events(events: &[EventFacts], now: DateTime<Utc>) -> Vec<&EventFacts> {
    let mut out: Vec<&EventFacts> = events.iter().filter(|e| e.is_valid(now)).collect();
    out.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
    out
}

/// Stats for one member. `present` holds the ids of events the member has a
/// Present record for; records on events outside the valid set are ignored.
pub fn member_stats(
    events: &[EventFacts],
    present: &HashSet<String>,
    now: DateTime<Utc>,
) -> AttendanceStats {
    let valid = valid_events(events, now);
    let attended = valid.iter().filter(|e| present.contains(&e.id)).count();
    AttendanceStats::new(attended, valid.len())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub event_id: String,
    pub title: String,
    pub kind: Option<EventKind>,
    pub date: Option<String>,
    pub status: AttendanceStatus,
}

/// One row per valid event, newest first.
pub fn member_history(
    events: &[EventFacts],
    present: &HashSet<String>,
    now: DateTime<Utc>,
) -> Vec<HistoryRow> {
    valid_events(events, now)
        .into_iter()
        .map(|e| HistoryRow {
            event_id: e.id.clone(),
            title: e.title.clone(),
            kind: e.kind,
            date: e.starts_at.map(|t| t.to_rfc3339()),
            status: if present.contains(&e.id) {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            },
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub kind: EventKind,
    pub label: &'static str,
    #[serde(flatten)]
    pub stats: AttendanceStats,
}

pub fn category_breakdown(
    events: &[EventFacts],
    present: &HashSet<String>,
    now: DateTime<Utc>,
) -> Vec<CategoryStats> {
    let valid = valid_events(events, now);
    let mut totals: HashMap<EventKind, (usize, usize)> = HashMap::new();
    for e in &valid {
        let Some(kind) = e.kind else { continue };
        let entry = totals.entry(kind).or_default();
        entry.1 += 1;
        if present.contains(&e.id) {
            entry.0 += 1;
        }
    }
    EventKind::ALL
        .iter()
        .map(|kind| {
            let (attended, total) = totals.get(kind).copied().unwrap_or((0, 0));
            CategoryStats {
                kind: *kind,
                label: kind.category_label(),
                stats: AttendanceStats::new(attended, total),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn ev(id: &str, kind: EventKind, days_from_now: i64, attendance_count: usize) -> EventFacts {
        EventFacts {
            id: id.to_string(),
            title: format!("Event {id}"),
            kind: Some(kind),
            starts_at: Some(now() + Duration::days(days_from_now)),
            attendance_count,
        }
    }

    fn present(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn three_of_four_is_exactly_eligible() {
        let stats = AttendanceStats::new(3, 4);
        assert_eq!(stats.percentage, 75);
        assert!(stats.eligible);
        assert!(!AttendanceStats::new(2, 3).eligible);
    }

    #[test]
    fn zero_total_is_zero_percent() {
        assert_eq!(attendance_percentage(0, 0), 0);
        assert_eq!(attendance_percentage(5, 0), 0);
    }

    #[test]
    fn rounding_is_half_up_and_clamped() {
        assert_eq!(attendance_percentage(1, 8), 13); // 12.5
        assert_eq!(attendance_percentage(1, 3), 33);
        assert_eq!(attendance_percentage(2, 3), 67);
        assert_eq!(attendance_percentage(7, 5), 100);
    }

    #[test]
    fn future_events_only_count_once_they_have_attendance() {
        let events = vec![
            ev("past", EventKind::Visit, -3, 0),
            ev("live-early", EventKind::Event, 2, 4),
            ev("upcoming", EventKind::Meeting, 5, 0),
        ];
        let valid: Vec<&str> = valid_events(&events, now())
            .into_iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(valid, vec!["live-early", "past"]);
    }

    #[test]
    fn presence_on_invalid_events_does_not_inflate_stats() {
        let events = vec![
            ev("a", EventKind::Visit, -10, 1),
            ev("b", EventKind::Visit, -5, 0),
            ev("future", EventKind::Event, 10, 0),
        ];
        let stats = member_stats(&events, &present(&["a", "future", "deleted-event"]), now());
        assert_eq!(stats.attended, 1);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.percentage, 50);
    }

    #[test]
    fn history_marks_absent_events() {
        let events = vec![ev("a", EventKind::Visit, -10, 1), ev("b", EventKind::Meeting, -1, 0)];
        let history = member_history(&events, &present(&["a"]), now());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event_id, "b");
        assert_eq!(history[0].status, AttendanceStatus::Absent);
        assert_eq!(history[1].status, AttendanceStatus::Present);
    }

    #[test]
    fn categories_cover_every_kind() {
        let events = vec![
            ev("v1", EventKind::Visit, -10, 0),
            ev("v2", EventKind::Visit, -9, 0),
            ev("c1", EventKind::Campaign, -2, 0),
        ];
        let cats = category_breakdown(&events, &present(&["v1"]), now());
        assert_eq!(cats.len(), 4);
        let visit = cats.iter().find(|c| c.kind == EventKind::Visit).unwrap();
        assert_eq!((visit.stats.attended, visit.stats.total), (1, 2));
        assert_eq!(visit.stats.percentage, 50);
        let meeting = cats.iter().find(|c| c.kind == EventKind::Meeting).unwrap();
        assert_eq!(meeting.stats.total, 0);
        assert_eq!(meeting.stats.percentage, 0);
    }
}
