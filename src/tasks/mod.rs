//! The named asynchronous tasks of the control plane and the dispatcher
//! that runs them. Every task declares a soft and a hard time limit; the
//! dispatcher enforces both uniformly.
pub mod dispatcher;
pub mod error;
pub mod handlers;

use crate::store::entities::{EccState, Key};
use std::sync::Arc;
use std::time::Duration;

/// One unit of work for the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    EccServerRefreshState {
        ecc: Key,
    },
    EccServerRefreshAll,
    EccServerChangeState {
        ecc: Key,
        target: EccState,
    },
    CheckEccServerOnline {
        ecc: Key,
    },
    CheckEccServerOnlineAll,
    CheckDataRouterStatus {
        router: Key,
    },
    CheckDataRouterStatusAll,
    OrganizeFiles {
        router: Key,
        experiment: String,
        run_number: i32,
    },
    OrganizeFilesAll {
        experiment: String,
        run_number: i32,
    },
}

/// The deadlines of one task: at `soft` the body is signalled to abort
/// cleanly, at `hard` it is killed outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLimits {
    pub soft: Duration,
    pub hard: Duration,
}

const fn limits(soft: u64, hard: u64) -> TaskLimits {
    TaskLimits {
        soft: Duration::from_secs(soft),
        hard: Duration::from_secs(hard),
    }
}

impl Task {
    /// The task-table name, used in log records and for poller
    /// suppression
    pub fn name(&self) -> &'static str {
        match self {
            Self::EccServerRefreshState { .. } => "eccserver_refresh_state",
            Self::EccServerRefreshAll => "eccserver_refresh_all",
            Self::EccServerChangeState { .. } => "eccserver_change_state",
            Self::CheckEccServerOnline { .. } => "check_ecc_server_online",
            Self::CheckEccServerOnlineAll => "check_ecc_server_online_all",
            Self::CheckDataRouterStatus { .. } => "check_data_router_status",
            Self::CheckDataRouterStatusAll => "check_data_router_status_all",
            Self::OrganizeFiles { .. } => "organize_files",
            Self::OrganizeFilesAll { .. } => "organize_files_all",
        }
    }

    pub fn limits(&self) -> TaskLimits {
        match self {
            Self::EccServerRefreshState { .. } => limits(5, 10),
            Self::EccServerRefreshAll => limits(8, 10),
            Self::EccServerChangeState { .. } => limits(45, 60),
            Self::CheckEccServerOnline { .. } => limits(10, 40),
            Self::CheckEccServerOnlineAll => limits(60, 80),
            Self::CheckDataRouterStatus { .. } => limits(10, 40),
            Self::CheckDataRouterStatusAll => limits(60, 80),
            Self::OrganizeFiles { .. } => limits(30, 40),
            Self::OrganizeFilesAll { .. } => limits(30, 40),
        }
    }
}

/// Task-level log sink. Production goes to tracing; tests swap in a
/// capturing sink to assert on the records.
pub trait TaskLog: Send + Sync {
    fn error(&self, message: String);
    fn warning(&self, message: String);
}

/// The production sink
#[derive(Debug, Default)]
pub struct TracingLog;

impl TaskLog for TracingLog {
    fn error(&self, message: String) {
        tracing::error!("{message}");
    }

    fn warning(&self, message: String) {
        tracing::warn!("{message}");
    }
}

pub fn tracing_log() -> Arc<dyn TaskLog> {
    Arc::new(TracingLog)
}

/// Capturing sink for assertions on task-level records
#[cfg(test)]
#[derive(Debug, Default)]
pub struct CapturingLog {
    pub records: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl CapturingLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn matching(&self, needle: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.contains(needle))
            .count()
    }
}

#[cfg(test)]
impl TaskLog for CapturingLog {
    fn error(&self, message: String) {
        self.records.lock().push(message);
    }

    fn warning(&self, message: String) {
        self.records.lock().push(message);
    }
}
