use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn workspace_param(state: &AppState, req: &Request) -> Option<PathBuf> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = workspace_param(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %out_path, error = %e, "workspace export failed");
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    };
    tracing::info!(path = %out_path, sha256 = %export.db_sha256, "workspace exported");

    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let Some(workspace_path) = workspace_param(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;
    state.sessions.clear();

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %in_path, error = %e, "workspace import failed");
            if let Some(previous) = state.workspace.clone() {
                let _ = open_workspace(state, &previous);
            }
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            );
        }
    };

    match open_workspace(state, &workspace_path) {
        Ok(()) => ok(
            &req.id,
            json!({
                "workspacePath": workspace_path.to_string_lossy(),
                "bundleFormatDetected": import.bundle_format_detected,
                "dbSha256": import.db_sha256,
            }),
        ),
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        _ => None,
    }
}
