mod analytics;
mod backup;
mod config;
mod db;
mod eligibility;
mod export;
mod ingest;
mod ipc;
mod model;
mod reconcile;
mod store;

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use config::DaemonConfig;

/// Stdout carries the protocol, so logs go to stderr or to the configured file.
fn init_logging(cfg: &DaemonConfig) {
    let filter = EnvFilter::try_new(&cfg.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));

    let file = cfg.log_file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("clubd: cannot open log file {}: {e}", path.display()))
            .ok()
    });

    match file {
        Some(file) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
            .init(),
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init(),
    }
}

fn main() {
    let (cfg, rejected) = DaemonConfig::from_env();
    init_logging(&cfg);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "clubd starting");
    for setting in &rejected {
        tracing::warn!(value = %setting.value, "ignoring invalid {}", setting.key);
    }

    let mut state = ipc::AppState::new(cfg.clone());
    if let Some(workspace) = cfg.workspace.as_ref() {
        let req = ipc::Request {
            id: "startup".to_string(),
            method: "workspace.select".to_string(),
            params: serde_json::json!({ "path": workspace.to_string_lossy() }),
        };
        let resp = ipc::handle_request(&mut state, req);
        if resp.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            tracing::warn!(workspace = %workspace.display(), "startup workspace could not be opened");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    tracing::info!(open_sessions = state.sessions.len(), "clubd exiting");
}
