use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::DaemonConfig;
use crate::reconcile::ReconcileSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: DaemonConfig,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Open reconciliation sessions keyed by session id.
    pub sessions: HashMap<String, ReconcileSession>,
}

impl AppState {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            sessions: HashMap::new(),
        }
    }
}
