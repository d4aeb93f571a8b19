use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::eligibility::{valid_events, EventFacts};
use crate::model::{Member, MemberStatus};

pub const PULSE_LEN: usize = 5;
const PULSE_TITLE_CHARS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulsePoint {
    pub event_id: String,
    pub label: String,
    pub attendees: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub approved_members: usize,
    pub by_branch: BTreeMap<String, usize>,
    pub by_housing: BTreeMap<String, usize>,
    pub by_gender: BTreeMap<String, usize>,
    pub events_by_kind: BTreeMap<String, usize>,
    pub pulse: Vec<PulsePoint>,
    pub average_attendance: u64,
}

fn branch_bucket(raw: &str) -> String {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("NA") {
        "OTHER".to_string()
    } else {
        t.to_uppercase()
    }
}

fn or_label(raw: &str, empty: &str) -> String {
    let t = raw.trim();
    if t.is_empty() {
        empty.to_string()
    } else {
        t.to_string()
    }
}

pub fn pulse_label(title: &str) -> String {
    if title.chars().count() > PULSE_TITLE_CHARS {
        let head: String = title.chars().take(PULSE_TITLE_CHARS).collect();
        format!("{head}...")
    } else {
        title.to_string()
    }
}

pub fn overview(members: &[Member], events: &[EventFacts], now: DateTime<Utc>) -> Overview {
    let mut out = Overview::default();
    for m in members.iter().filter(|m| m.status == MemberStatus::Approved) {
        out.approved_members += 1;
        *out.by_branch.entry(branch_bucket(&m.branch)).or_default() += 1;
        *out.by_housing.entry(or_label(&m.housing, "Unknown")).or_default() += 1;
        *out.by_gender.entry(or_label(&m.gender, "Not Specified")).or_default() += 1;
    }

    let valid = valid_events(events, now);
    for e in &valid {
        let kind = e.kind.map(|k| k.as_str()).unwrap_or("Other");
        *out.events_by_kind.entry(kind.to_string()).or_default() += 1;
    }

    out.pulse = valid
        .iter()
        .take(PULSE_LEN)
        .rev()
        .map(|e| PulsePoint {
            event_id: e.id.clone(),
            label: pulse_label(&e.title),
            attendees: e.attendance_count,
        })
        .collect();
    if !out.pulse.is_empty() {
        let sum: u64 = out.pulse.iter().map(|p| p.attendees as u64).sum();
        let n = out.pulse.len() as u64;
        out.average_attendance = (2 * sum + n) / (2 * n);
    }
    out
}
