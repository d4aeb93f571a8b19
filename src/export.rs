use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::model::Member;

pub const RSVP_HEADERS: [&str; 8] = [
    "S.No", "Name", "QID", "Course", "Branch", "Phone", "Housing", "Attendance",
];

const ILLEGAL_FILENAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// `RSVP_<title>.csv` with each whitespace run in the title collapsed to `_`.
/// Path separators and other characters no file system accepts become `_`.
pub fn rsvp_filename(event_title: &str) -> String {
    let mut out = String::from("RSVP_");
    let mut in_space = false;
    for ch in event_title.chars() {
        if ILLEGAL_FILENAME_CHARS.contains(&ch) || (ch.is_control() && !ch.is_whitespace()) {
            out.push('_');
            in_space = false;
        } else if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out.push_str(".csv");
    out
}

/// Sign-in sheet for an event: one row per RSVP in the order given, with a
/// blank Attendance column for marking on paper.
pub fn rsvp_csv(members: &[Member]) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(RSVP_HEADERS)
        .context("failed to write RSVP header")?;
    for (i, m) in members.iter().enumerate() {
        let serial = (i + 1).to_string();
        wtr.write_record([
            serial.as_str(),
            m.name.as_str(),
            m.qid.as_str(),
            m.course.as_str(),
            m.branch.as_str(),
            m.phone.as_str(),
            m.housing.as_str(),
            "",
        ])
        .with_context(|| format!("failed to write RSVP row for {}", m.qid))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush RSVP csv: {}", e.error()))?;
    String::from_utf8(bytes).context("RSVP csv is not valid UTF-8")
}

pub fn write_rsvp_csv(out_dir: &Path, event_title: &str, text: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))?;
    let path = out_dir.join(rsvp_filename(event_title));
    std::fs::write(&path, text)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
    Ok(path)
}
