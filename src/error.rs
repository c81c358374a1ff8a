//! Module that contains the errors a process of the ring can run into.

use crate::ring::ProcessId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RingError>;

#[derive(Debug, Error)]
pub enum RingError {
    /// Bad membership list or flags. The process does not start.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Bind, accept or connect failed after the retry budget.
    #[error("process {process}: channel setup failed during {operation}: {source}")]
    ChannelSetup {
        process: ProcessId,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("process {process}: channel unavailable during {operation}: {reason}")]
    ChannelUnavailable {
        process: ProcessId,
        operation: &'static str,
        reason: String,
    },

    #[error(
        "process {process}: snapshot {active} is already in progress, rejected snapshot {requested}"
    )]
    SnapshotAlreadyInProgress {
        process: ProcessId,
        active: u64,
        requested: u64,
    },

    #[error("process {process}: snapshot id {snapshot_id} was already used")]
    SnapshotIdReused { process: ProcessId, snapshot_id: u64 },

    #[error("process {process}: malformed message: {reason}")]
    MalformedMessage { process: ProcessId, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RingError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Function that tells if the process can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SnapshotAlreadyInProgress { .. }
                | Self::SnapshotIdReused { .. }
                | Self::MalformedMessage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_anomalies_are_recoverable() {
        let malformed = RingError::MalformedMessage {
            process: 2,
            reason: "not json".into(),
        };
        let busy = RingError::SnapshotAlreadyInProgress {
            process: 3,
            active: 1,
            requested: 2,
        };
        assert!(malformed.is_recoverable());
        assert!(busy.is_recoverable());
        assert!(!RingError::configuration("missing hostfile").is_recoverable());
    }

    #[test]
    fn display_carries_process_and_operation() {
        let err = RingError::ChannelUnavailable {
            process: 4,
            operation: "forward token",
            reason: "broken pipe".into(),
        };
        assert_eq!(
            err.to_string(),
            "process 4: channel unavailable during forward token: broken pipe"
        );
    }
}
