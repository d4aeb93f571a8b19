//! Bulk attendance reconciliation.
//!
//! A [`ReconcileSession`] carries one operator's upload from matching through
//! review to commit. Storage is reached only through [`MemberDirectory`] and
//! [`AttendanceLedger`] so the workflow can run against SQLite or a fake.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::ingest::{CandidateRecord, IngestError};
use crate::model::{
    Actor, AttendanceRecord, AttendanceStatus, AuditAction, Member, NewAuditEntry,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("no members are selected; nothing to commit")]
    EmptySelection,

    #[error("member {member_id} is not a matched attendee of this upload")]
    NotToggleable { member_id: String },

    #[error("this reconciliation session has already been committed")]
    SessionClosed,
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileError::Ingest(e) => e.code(),
            ReconcileError::Storage(_) => "db_update_failed",
            ReconcileError::EmptySelection => "empty_selection",
            ReconcileError::NotToggleable { .. } => "not_toggleable",
            ReconcileError::SessionClosed => "session_closed",
        }
    }
}

pub trait MemberDirectory {
    /// Members whose QID is in `identifiers`. Order is unspecified.
    fn find_members_by_identifiers(&self, identifiers: &[String]) -> Result<Vec<Member>, StorageError>;
}

pub trait AttendanceLedger {
    /// Insert-or-replace keyed by `(event_id, member_id)`.
    fn upsert_attendance(&self, records: &[AttendanceRecord]) -> Result<(), StorageError>;
    fn append_audit(&self, entry: &NewAuditEntry) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedCandidate {
    pub member_id: String,
    pub identifier: String,
    pub display_name: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched: Vec<MatchedCandidate>,
    pub unmatched: Vec<CandidateRecord>,
    /// Later rows repeating an identifier already seen in the same upload.
    pub duplicates: Vec<CandidateRecord>,
}

impl MatchResult {
    pub fn matched_ids(&self) -> impl Iterator<Item = &str> {
        self.matched.iter().map(|m| m.member_id.as_str())
    }
}

/// Resolves candidates against the registry by exact QID equality.
pub fn match_candidates<D: MemberDirectory + ?Sized>(
    directory: &D,
    candidates: &[CandidateRecord],
) -> Result<MatchResult, StorageError> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut duplicates = Vec::new();
    for c in candidates {
        if seen.insert(c.identifier.as_str()) {
            unique.push(c);
        } else {
            duplicates.push(c.clone());
        }
    }

    let identifiers: Vec<String> = unique.iter().map(|c| c.identifier.clone()).collect();
    let members = if identifiers.is_empty() {
        Vec::new()
    } else {
        directory.find_members_by_identifiers(&identifiers)?
    };
    let by_qid: HashMap<&str, &Member> = members.iter().map(|m| (m.qid.as_str(), m)).collect();

    let mut result = MatchResult {
        duplicates,
        ..MatchResult::default()
    };
    for c in unique {
        match by_qid.get(c.identifier.as_str()) {
            Some(member) => result.matched.push(MatchedCandidate {
                member_id: member.id.clone(),
                identifier: c.identifier.clone(),
                display_name: member.name.clone(),
                branch: member.branch.clone(),
            }),
            None => result.unmatched.push(c.clone()),
        }
    }
    Ok(result)
}

/// Members marked present. Only ids from the matched universe may enter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSelection {
    universe: BTreeSet<String>,
    selected: BTreeSet<String>,
}

impl PresenceSelection {
    pub fn seeded_from(result: &MatchResult) -> Self {
        let universe: BTreeSet<String> = result.matched_ids().map(str::to_string).collect();
        Self {
            selected: universe.clone(),
            universe,
        }
    }

    /// Flips one member and reports whether it is now selected.
    pub fn toggle(&mut self, member_id: &str) -> Result<bool, ReconcileError> {
        if !self.universe.contains(member_id) {
            return Err(ReconcileError::NotToggleable {
                member_id: member_id.to_string(),
            });
        }
        if self.selected.remove(member_id) {
            Ok(false)
        } else {
            self.selected.insert(member_id.to_string());
            Ok(true)
        }
    }

    pub fn contains(&self, member_id: &str) -> bool {
        self.selected.contains(member_id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Review,
    Committed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub event_id: String,
    pub record_count: usize,
    pub audit_details: String,
}

#[derive(Debug, Clone)]
pub struct ReconcileSession {
    pub id: String,
    pub event_id: String,
    pub event_title: String,
    pub actor: Actor,
    /// Members who RSVP'd, for the expected-vs-actual view.
    pub expected: Vec<Member>,
    pub result: MatchResult,
    pub selection: PresenceSelection,
    pub state: SessionState,
}

impl ReconcileSession {
    /// Matches an ingested upload and opens it for review with every matched
    /// member pre-selected.
    pub fn begin<D: MemberDirectory + ?Sized>(
        id: String,
        event_id: String,
        event_title: String,
        actor: Actor,
        expected: Vec<Member>,
        candidates: &[CandidateRecord],
        directory: &D,
    ) -> Result<Self, ReconcileError> {
        let result = match_candidates(directory, candidates)?;
        let selection = PresenceSelection::seeded_from(&result);
        info!(
            session = %id,
            event = %event_id,
            candidates = candidates.len(),
            matched = result.matched.len(),
            unmatched = result.unmatched.len(),
            duplicates = result.duplicates.len(),
            "reconciliation session opened"
        );
        Ok(Self {
            id,
            event_id,
            event_title,
            actor,
            expected,
            result,
            selection,
            state: SessionState::Review,
        })
    }

    pub fn toggle(&mut self, member_id: &str) -> Result<bool, ReconcileError> {
        if self.state == SessionState::Committed {
            return Err(ReconcileError::SessionClosed);
        }
        self.selection.toggle(member_id)
    }

    /// Writes one Present record per selected member and then one audit
    /// entry. On error the session is left untouched in review.
    pub fn commit<L: AttendanceLedger + ?Sized>(
        &mut self,
        ledger: &L,
    ) -> Result<CommitSummary, ReconcileError> {
        if self.state == SessionState::Committed {
            return Err(ReconcileError::SessionClosed);
        }
        if self.selection.is_empty() {
            return Err(ReconcileError::EmptySelection);
        }

        let records: Vec<AttendanceRecord> = self
            .selection
            .iter()
            .map(|member_id| AttendanceRecord {
                event_id: self.event_id.clone(),
                member_id: member_id.to_string(),
                status: AttendanceStatus::Present,
            })
            .collect();
        let details = format!(
            "Marked {} members present for \"{}\".",
            records.len(),
            self.event_title
        );

        let written = ledger.upsert_attendance(&records).and_then(|()| {
            ledger.append_audit(&NewAuditEntry {
                actor: self.actor.clone(),
                action: AuditAction::BulkAttendance,
                details: details.clone(),
            })
        });
        if let Err(e) = written {
            warn!(session = %self.id, event = %self.event_id, error = %e, "attendance commit failed");
            return Err(e.into());
        }

        self.state = SessionState::Committed;
        info!(
            session = %self.id,
            event = %self.event_id,
            records = records.len(),
            actor = %self.actor.id,
            "attendance committed"
        );
        Ok(CommitSummary {
            event_id: self.event_id.clone(),
            record_count: records.len(),
            audit_details: details,
        })
    }
}
