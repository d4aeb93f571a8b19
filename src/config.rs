use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_AUDIT_LIMIT: usize = 100;
pub const MAX_AUDIT_LIMIT: usize = 500;

/// Startup settings, read from `CLUBD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    /// Append logs here instead of stderr.
    pub log_file: Option<PathBuf>,
    pub audit_limit: usize,
}

/// An environment value that was ignored in favour of the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSetting {
    pub key: &'static str,
    pub value: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_file: None,
            audit_limit: DEFAULT_AUDIT_LIMIT,
        }
    }
}

impl DaemonConfig {
    /// Rejected settings come back to the caller for logging once the
    /// subscriber is installed.
    pub fn from_env() -> (Self, Vec<RejectedSetting>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<RejectedSetting>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();
        let mut rejected = Vec::new();
        cfg.workspace = non_empty("CLUBD_WORKSPACE").map(PathBuf::from);
        if let Some(filter) = non_empty("CLUBD_LOG") {
            cfg.log_filter = filter;
        }
        cfg.log_file = non_empty("CLUBD_LOG_FILE").map(PathBuf::from);
        if let Some(raw) = non_empty("CLUBD_AUDIT_LIMIT") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => cfg.audit_limit = n.min(MAX_AUDIT_LIMIT),
                _ => rejected.push(RejectedSetting {
                    key: "CLUBD_AUDIT_LIMIT",
                    value: raw,
                }),
            }
        }
        (cfg, rejected)
    }

    /// Caller-requested audit page size, bounded by the configured cap.
    pub fn audit_page(&self, requested: Option<u64>) -> usize {
        match requested {
            Some(n) if n > 0 => (n as usize).min(MAX_AUDIT_LIMIT),
            _ => self.audit_limit,
        }
    }
}
