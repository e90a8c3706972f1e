//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedRunner`] replays pre-seeded local command results, and
//! [`RecordingConnector`] hands out command and transfer sessions that record
//! every call into a shared [`EventLog`] and fail on demand. Sharing one log
//! between both doubles lets tests assert the exact interleaving of local and
//! remote operations.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Credentials;
use crate::local::{CommandOutput, CommandRunner, LocalExecError};
use crate::session::{
    CommandSession, ExitInfo, OutputSink, RemoteCommandOutput, SessionConnector, SessionError,
    SessionFuture, SessionTarget, TransferError, TransferSession,
};

/// One observable operation performed during a deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    /// A local shell command ran.
    Local(String),
    /// The command session was opened.
    OpenSession,
    /// A remote command ran over the command session.
    Exec(String),
    /// The command session was closed.
    CloseSession,
    /// A transfer session was opened.
    OpenTransfer,
    /// A directory tree was uploaded.
    UploadTree {
        /// Local directory.
        local: Utf8PathBuf,
        /// Remote directory.
        remote: String,
    },
    /// A single file was uploaded.
    UploadFile {
        /// Local file.
        local: Utf8PathBuf,
        /// Remote file path.
        remote: String,
    },
    /// A transfer session was closed.
    CloseTransfer,
}

/// Shared, ordered record of [`SessionEvent`]s.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventLog {
    /// Appends an event.
    pub fn record(&self, event: SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Returns a snapshot of all events recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalInvocation {
    /// Command line as passed to the runner.
    pub command: String,
    /// Output limit passed with the command.
    pub max_output: usize,
}

/// Scripted local command runner that returns pre-seeded outputs in FIFO
/// order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<LocalInvocation>>>,
    log: Option<EventLog>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that also records each command into `log`.
    #[must_use]
    pub fn recording_into(log: &EventLog) -> Self {
        Self {
            log: Some(log.clone()),
            ..Self::default()
        }
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<LocalInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns the command lines run so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(|invocation| invocation.command.clone())
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful `tar --version` banner from GNU tar.
    pub fn push_gnu_tar_version(&self) {
        self.push_output(Some(0), "tar (GNU tar) 1.34\n", "");
    }

    /// Pushes a successful `tar --version` banner from bsdtar.
    pub fn push_bsd_tar_version(&self) {
        self.push_output(Some(0), "bsdtar 3.5.3 - libarchive 3.5.3\n", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, max_output: usize) -> Result<CommandOutput, LocalExecError> {
        self.invocations.borrow_mut().push(LocalInvocation {
            command: command.to_owned(),
            max_output,
        });
        if let Some(ref log) = self.log {
            log.record(SessionEvent::Local(command.to_owned()));
        }
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| LocalExecError::Spawn {
                command: command.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

#[derive(Debug, Default)]
struct State {
    failing_commands: Vec<(String, ExitInfo)>,
    broken_commands: Vec<String>,
    fail_connect: bool,
    fail_transfer_connect: bool,
    fail_upload: bool,
    fail_close: bool,
    fail_transfer_close: bool,
}

/// Connector whose sessions record every call and fail on demand.
#[derive(Clone, Debug, Default)]
pub struct RecordingConnector {
    state: Arc<Mutex<State>>,
    log: EventLog,
}

impl RecordingConnector {
    /// Creates a connector whose sessions always succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared event log.
    #[must_use]
    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes remote commands containing `fragment` complete with `exit`.
    pub fn fail_command(&self, fragment: &str, exit: ExitInfo) {
        self.state().failing_commands.push((fragment.to_owned(), exit));
    }

    /// Makes the session break while running commands containing `fragment`.
    pub fn break_session_on(&self, fragment: &str) {
        self.state().broken_commands.push(fragment.to_owned());
    }

    /// Makes opening the command session fail.
    pub fn fail_connect(&self) {
        self.state().fail_connect = true;
    }

    /// Makes opening a transfer session fail.
    pub fn fail_transfer_connect(&self) {
        self.state().fail_transfer_connect = true;
    }

    /// Makes every upload fail.
    pub fn fail_upload(&self) {
        self.state().fail_upload = true;
    }

    /// Makes closing the command session fail.
    pub fn fail_close(&self) {
        self.state().fail_close = true;
    }

    /// Makes closing a transfer session fail.
    pub fn fail_transfer_close(&self) {
        self.state().fail_transfer_close = true;
    }

    /// Returns a snapshot of all events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.log.snapshot()
    }

    /// Returns the remote commands run so far, in order.
    #[must_use]
    pub fn executed_commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Exec(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Counts recorded events equal to `event`.
    #[must_use]
    pub fn count(&self, event: &SessionEvent) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

impl SessionConnector for RecordingConnector {
    type Command = RecordingSession;
    type Transfer = RecordingTransfer;

    fn connect_command<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Command, SessionError> {
        Box::pin(async move {
            if self.state().fail_connect {
                return Err(SessionError::Connect {
                    host: target.host.clone(),
                    message: String::from("simulated connect failure"),
                });
            }
            self.log.record(SessionEvent::OpenSession);
            Ok(RecordingSession {
                connector: self.clone(),
            })
        })
    }

    fn connect_transfer<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Transfer, SessionError> {
        Box::pin(async move {
            if self.state().fail_transfer_connect {
                return Err(SessionError::Auth {
                    host: target.host.clone(),
                    username: target.username.clone(),
                });
            }
            self.log.record(SessionEvent::OpenTransfer);
            Ok(RecordingTransfer {
                connector: self.clone(),
            })
        })
    }
}

/// Command session produced by [`RecordingConnector`].
#[derive(Debug)]
pub struct RecordingSession {
    connector: RecordingConnector,
}

impl CommandSession for RecordingSession {
    fn exec<'a>(
        &'a mut self,
        command: &'a str,
        on_output: OutputSink<'a>,
    ) -> SessionFuture<'a, RemoteCommandOutput, SessionError> {
        Box::pin(async move {
            self.connector
                .log
                .record(SessionEvent::Exec(command.to_owned()));
            let state = self.connector.state();
            if state
                .broken_commands
                .iter()
                .any(|fragment| command.contains(fragment.as_str()))
            {
                return Err(SessionError::Channel {
                    message: String::from("simulated channel failure"),
                });
            }
            let exit = state
                .failing_commands
                .iter()
                .find(|(fragment, _)| command.contains(fragment.as_str()))
                .map_or(ExitInfo::Status(0), |(_, exit)| exit.clone());
            drop(state);

            let stdout = format!("ran {command}\n");
            on_output(&stdout);
            Ok(RemoteCommandOutput {
                exit,
                stdout,
                stderr: String::new(),
            })
        })
    }

    fn close(&mut self) -> SessionFuture<'_, (), SessionError> {
        Box::pin(async move {
            self.connector.log.record(SessionEvent::CloseSession);
            if self.connector.state().fail_close {
                return Err(SessionError::Close {
                    message: String::from("simulated close failure"),
                });
            }
            Ok(())
        })
    }
}

/// Transfer session produced by [`RecordingConnector`].
#[derive(Debug)]
pub struct RecordingTransfer {
    connector: RecordingConnector,
}

impl RecordingTransfer {
    fn check_upload(&self, local: &Utf8Path, remote: &str) -> Result<(), TransferError> {
        if self.connector.state().fail_upload {
            return Err(TransferError::Upload {
                local: local.to_string(),
                remote: remote.to_owned(),
                message: String::from("simulated upload failure"),
            });
        }
        Ok(())
    }
}

impl TransferSession for RecordingTransfer {
    fn upload_file<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError> {
        Box::pin(async move {
            self.connector.log.record(SessionEvent::UploadFile {
                local: local.to_path_buf(),
                remote: remote.to_owned(),
            });
            self.check_upload(local, remote)
        })
    }

    fn upload_tree<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError> {
        Box::pin(async move {
            self.connector.log.record(SessionEvent::UploadTree {
                local: local.to_path_buf(),
                remote: remote.to_owned(),
            });
            self.check_upload(local, remote)
        })
    }

    fn close(&mut self) -> SessionFuture<'_, (), TransferError> {
        Box::pin(async move {
            self.connector.log.record(SessionEvent::CloseTransfer);
            if self.connector.state().fail_transfer_close {
                return Err(TransferError::Close {
                    message: String::from("simulated close failure"),
                });
            }
            Ok(())
        })
    }
}

/// Session target used by tests; never dialled by the recording doubles.
#[must_use]
pub fn target() -> SessionTarget {
    SessionTarget {
        host: String::from("h"),
        port: 22,
        username: String::from("u"),
        credentials: Credentials::Password(String::from("p")),
        ready_timeout: Duration::from_secs(1),
    }
}
