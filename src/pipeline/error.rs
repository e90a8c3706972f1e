//! Error types for the deployment pipeline.

use std::fmt::Display;

use thiserror::Error;

use super::Stage;
use crate::config::ConfigError;
use crate::local::LocalExecError;
use crate::session::{ExitInfo, SessionError, TransferError};

/// Failure raised by a single pipeline stage.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StageError {
    /// A local archive command failed.
    #[error(transparent)]
    LocalExec(#[from] LocalExecError),
    /// The upload failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// A remote command completed unsuccessfully.
    #[error("remote command `{command}` {exit}: {stderr}")]
    RemoteCommand {
        /// Command that failed.
        command: String,
        /// How the command completed.
        exit: ExitInfo,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// The command session broke while running a stage.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors surfaced by a deployment run.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Raised when the configuration cannot be resolved.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Raised when the command session cannot be opened. No stage has run.
    #[error("failed to open session: {0}")]
    Connect(#[source] SessionError),
    /// Raised when a stage fails. The session has been closed.
    #[error("{stage} failed: {message}")]
    Stage {
        /// Stage that failed.
        stage: Stage,
        /// Human-readable description, including any close failure.
        message: String,
        /// Underlying stage failure.
        #[source]
        source: StageError,
    },
    /// Raised when closing the session fails after every stage succeeded.
    #[error("failed to close session: {0}")]
    Teardown(#[source] SessionError),
}

impl DeployError {
    /// Returns the failing stage, if the error came from one.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub(super) fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (closing the session also failed: {teardown})")
    } else {
        message
    }
}
