//! Remote session abstractions.
//!
//! A deployment uses two independently authenticated sessions: a
//! [`CommandSession`] that lives for the whole run, and a
//! [`TransferSession`] opened and closed inside the upload stage. Both are
//! produced by a [`SessionConnector`], which lets tests substitute recording
//! doubles for the `russh` implementation in [`ssh`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::config::Credentials;

pub mod ssh;

pub use ssh::{SftpTransferSession, SshCommandSession, SshConnector};

/// Future returned by session operations.
pub type SessionFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Sink receiving remote output chunks as they arrive.
pub type OutputSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Connection details shared by both sessions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTarget {
    /// Remote host name or address.
    pub host: String,
    /// Remote SSH port.
    pub port: u16,
    /// Remote user name.
    pub username: String,
    /// Credential used to authenticate.
    pub credentials: Credentials,
    /// Bound on connection and authentication.
    pub ready_timeout: Duration,
}

/// How a remote command completed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExitInfo {
    /// The command exited with a status code.
    Status(u32),
    /// The command was terminated by a signal.
    Signal(String),
    /// The channel closed without reporting an exit status.
    Unknown,
}

impl ExitInfo {
    /// Returns `true` for a zero exit status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Status(0))
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "exited with status {code}"),
            Self::Signal(name) => write!(f, "was terminated by signal {name}"),
            Self::Unknown => f.write_str("ended without an exit status"),
        }
    }
}

/// Collected result of a remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Completion status.
    pub exit: ExitInfo,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Persistent session used to run shell commands.
pub trait CommandSession: Send {
    /// Runs `command`, forwarding output chunks to `on_output` and returning
    /// once the remote side reports completion.
    fn exec<'a>(
        &'a mut self,
        command: &'a str,
        on_output: OutputSink<'a>,
    ) -> SessionFuture<'a, RemoteCommandOutput, SessionError>;

    /// Ends the session.
    fn close(&mut self) -> SessionFuture<'_, (), SessionError>;
}

/// Short-lived session used to upload files.
pub trait TransferSession: Send {
    /// Uploads a single local file to the exact remote path.
    fn upload_file<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError>;

    /// Uploads a local directory tree into `remote`, preserving relative
    /// structure and creating remote directories as needed.
    fn upload_tree<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError>;

    /// Ends the session.
    fn close(&mut self) -> SessionFuture<'_, (), TransferError>;
}

/// Opens authenticated sessions against a target.
pub trait SessionConnector {
    /// Command session type produced by this connector.
    type Command: CommandSession;
    /// Transfer session type produced by this connector.
    type Transfer: TransferSession;

    /// Opens the command session.
    fn connect_command<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Command, SessionError>;

    /// Opens a new, independently authenticated transfer session.
    fn connect_transfer<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Transfer, SessionError>;
}

/// Joins remote path segments with POSIX separators.
#[must_use]
pub fn join_remote(base: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        return child.to_owned();
    }
    format!("{}/{child}", base.trim_end_matches('/'))
}

/// Errors raised while establishing or using a remote session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when the session is not ready within the configured timeout.
    #[error("timed out after {timeout_ms}ms connecting to {host}")]
    Timeout {
        /// Target host.
        host: String,
        /// Configured timeout.
        timeout_ms: u128,
    },
    /// Raised when the transport cannot be established.
    #[error("failed to connect to {host}: {message}")]
    Connect {
        /// Target host.
        host: String,
        /// Transport error string.
        message: String,
    },
    /// Raised when the server rejects the credentials.
    #[error("authentication failed for {username}@{host}")]
    Auth {
        /// Target host.
        host: String,
        /// Rejected user name.
        username: String,
    },
    /// Raised when the private key cannot be loaded.
    #[error("failed to load private key {path}: {message}")]
    Key {
        /// Key file path.
        path: String,
        /// Decoding error string.
        message: String,
    },
    /// Raised when a channel cannot be opened or breaks mid-command.
    #[error("session channel error: {message}")]
    Channel {
        /// Protocol error string.
        message: String,
    },
    /// Raised when disconnecting fails.
    #[error("failed to close session: {message}")]
    Close {
        /// Protocol error string.
        message: String,
    },
}

/// Errors raised by the upload stage.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransferError {
    /// Raised when the local artifact does not exist.
    #[error("local path does not exist: {path}")]
    LocalPathMissing {
        /// Missing local path.
        path: Utf8PathBuf,
    },
    /// Raised when no remote target directory was configured.
    #[error("no remote target configured: set `to` to upload the artifact")]
    MissingDestination,
    /// Raised when the local artifact is neither a file nor a directory.
    #[error("unsupported file type: {path}")]
    UnsupportedFileType {
        /// Offending local path.
        path: Utf8PathBuf,
    },
    /// Raised when the transfer session cannot be opened.
    #[error("failed to open transfer session: {0}")]
    Connect(#[source] SessionError),
    /// Raised when reading local files fails.
    #[error("failed to read {path}: {message}")]
    Local {
        /// Local path being read.
        path: String,
        /// I/O error string.
        message: String,
    },
    /// Raised when the remote side rejects an upload.
    #[error("failed to upload {local} to {remote}: {message}")]
    Upload {
        /// Local source path.
        local: String,
        /// Remote destination path.
        remote: String,
        /// Protocol error string.
        message: String,
    },
    /// Raised when closing the transfer session fails.
    #[error("failed to close transfer session: {message}")]
    Close {
        /// Protocol error string.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/var/www/app", "index.html", "/var/www/app/index.html")]
    #[case("/var/www/app/", "index.html", "/var/www/app/index.html")]
    #[case("/", "deploy.tgz", "/deploy.tgz")]
    #[case("/srv", "/assets/app.js", "/srv/assets/app.js")]
    #[case("", "a.txt", "a.txt")]
    fn join_remote_uses_posix_separators(
        #[case] base: &str,
        #[case] child: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(join_remote(base, child), expected);
    }

    #[rstest]
    #[case(ExitInfo::Status(0), true, "exited with status 0")]
    #[case(ExitInfo::Status(2), false, "exited with status 2")]
    #[case(ExitInfo::Signal(String::from("TERM")), false, "was terminated by signal TERM")]
    #[case(ExitInfo::Unknown, false, "ended without an exit status")]
    fn exit_info_reports_outcome(
        #[case] exit: ExitInfo,
        #[case] success: bool,
        #[case] rendered: &str,
    ) {
        assert_eq!(exit.is_success(), success);
        assert_eq!(exit.to_string(), rendered);
    }
}
