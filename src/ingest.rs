//! Attendance sheet ingestion.
//!
//! Turns an uploaded CSV export into [`CandidateRecord`]s. The identifier
//! column is any header containing `qid`; an optional display-name column is
//! any header containing `name`. Both lookups are case-insensitive and pick the
//! first matching header.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

pub const PLACEHOLDER_NAME: &str = "Unknown Name";

const IDENTIFIER_HEADER_NEEDLE: &str = "qid";
const NAME_HEADER_NEEDLE: &str = "name";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub identifier: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not find a column named 'QID' in the CSV")]
    MissingColumn,

    #[error("the CSV file is empty")]
    EmptyFile,

    #[error("malformed CSV: {message}")]
    Parse { line: Option<u64>, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::MissingColumn => "missing_column",
            IngestError::EmptyFile => "empty_file",
            IngestError::Parse { .. } => "parse_failed",
            IngestError::Io { .. } => "io_failed",
        }
    }
}

impl From<csv::Error> for IngestError {
    fn from(e: csv::Error) -> Self {
        let line = e.position().map(|p| p.line());
        let message = match e.kind() {
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => format!("expected {expected_len} fields, found {len}"),
            csv::ErrorKind::Utf8 { err, .. } => format!("invalid UTF-8: {err}"),
            _ => e.to_string(),
        };
        let message = match line {
            Some(l) => format!("line {l}: {message}"),
            None => message,
        };
        IngestError::Parse { line, message }
    }
}

/// Parses a whole sheet. Either every row is accepted or the sheet is rejected.
pub fn ingest_text(text: &str) -> Result<Vec<CandidateRecord>, IngestError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(IngestError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let qid_col = find_header(&headers, IDENTIFIER_HEADER_NEEDLE).ok_or(IngestError::MissingColumn)?;
    let name_col = find_header(&headers, NAME_HEADER_NEEDLE);

    let mut rows = 0usize;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows += 1;

        let identifier = record.get(qid_col).unwrap_or("").trim().to_string();
        if identifier.is_empty() {
            continue;
        }
        let display_name = match name_col {
            Some(col) => record.get(col).unwrap_or("").trim().to_string(),
            None => PLACEHOLDER_NAME.to_string(),
        };
        out.push(CandidateRecord {
            identifier,
            display_name,
        });
    }

    if rows == 0 {
        return Err(IngestError::EmptyFile);
    }
    Ok(out)
}

pub fn ingest_file(path: &Path) -> Result<Vec<CandidateRecord>, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|e| IngestError::Parse {
        line: None,
        message: format!("invalid UTF-8: {e}"),
    })?;
    ingest_text(&text)
}

fn find_header(headers: &[String], needle: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.to_ascii_lowercase().contains(needle))
}
