#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn fixture_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(rel)
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with_env(&[])
}

pub fn spawn_sidecar_with_env(vars: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_clubd");
    let mut cmd = Command::new(exe);
    cmd.env_remove("CLUBD_WORKSPACE")
        .env_remove("CLUBD_LOG_FILE")
        .env_remove("CLUBD_AUDIT_LIMIT")
        .env_remove("CLUBD_LOG");
    for (k, v) in vars {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn clubd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");

    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

/// Raw response; fails only on id mismatch or an unknown method.
pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        assert_ne!(
            error_code(&value),
            "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Asserts the call failed with `code` and returns the error object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    code: &str,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    assert_eq!(error_code(&value), code, "{} error: {}", method, value);
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> String {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

pub fn str_at<'a>(value: &'a serde_json::Value, pointer: &str) -> &'a str {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, value))
}

/// Registers the workspace owner followed by approved members, returning
/// `(owner_id, member_ids)`.
pub fn seed_club(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    members: &[(&str, &str)],
) -> (String, Vec<String>) {
    let owner = request_ok(
        stdin,
        reader,
        "seed-owner",
        "members.register",
        json!({ "name": "Club Owner", "qid": "ADMIN001", "branch": "CSE" }),
    );
    let owner_id = str_at(&owner, "/member/id").to_string();

    let mut ids = Vec::new();
    for (i, (name, qid)) in members.iter().enumerate() {
        let reg = request_ok(
            stdin,
            reader,
            &format!("seed-reg-{i}"),
            "members.register",
            json!({ "name": name, "qid": qid }),
        );
        let id = str_at(&reg, "/member/id").to_string();
        request_ok(
            stdin,
            reader,
            &format!("seed-approve-{i}"),
            "members.setStatus",
            json!({ "actorId": owner_id, "memberId": id, "status": "approved" }),
        );
        ids.push(id);
    }
    (owner_id, ids)
}
