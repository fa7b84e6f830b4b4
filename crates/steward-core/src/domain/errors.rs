//! Errors and their operational classification.

use thiserror::Error;

/// Operational classification of a firing error.
///
/// - Recoverable: logged, degraded heartbeat, retried on the next firing.
/// - Fatal: the supervisor stops every task and the process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Recoverable,
    Fatal,
}

/// Error returned by one firing of a task.
#[derive(Debug, Error)]
pub enum StewardError {
    /// An external collaborator (prober, submitter, account state, chain)
    /// failed during this firing.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    /// The watchdog saw no new blocks since its previous firing.
    #[error("chain stalled: height {current} is not above previously observed {previous}")]
    Stalled { previous: u64, current: u64 },

    /// The firing panicked; the supervisor caught it at the isolation boundary.
    #[error("firing panicked: {0}")]
    Panicked(String),

    #[error("snapshot: {0}")]
    Snapshot(String),
}

impl StewardError {
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StewardError::Stalled { .. } => ErrorKind::Fatal,
            _ => ErrorKind::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}
