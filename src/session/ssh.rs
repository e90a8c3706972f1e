//! `russh` implementations of the command and transfer sessions.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use russh::client::{self, AuthResult, Handle};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::{
    CommandSession, ExitInfo, OutputSink, RemoteCommandOutput, SessionConnector, SessionError,
    SessionFuture, SessionTarget, TransferError, TransferSession, join_remote,
};
use crate::config::Credentials;

/// Client handler that accepts the server host key.
///
/// Host keys are not pinned; the deploy target is addressed by the operator
/// and authenticated by the credential exchange.
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens sessions over SSH using `russh`.
#[derive(Clone, Debug, Default)]
pub struct SshConnector;

impl SessionConnector for SshConnector {
    type Command = SshCommandSession;
    type Transfer = SftpTransferSession;

    fn connect_command<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Command, SessionError> {
        Box::pin(async move {
            let handle = open_handle(target).await?;
            Ok(SshCommandSession { handle })
        })
    }

    fn connect_transfer<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Transfer, SessionError> {
        Box::pin(async move {
            let handle = open_handle(target).await?;
            let channel = handle
                .channel_open_session()
                .await
                .map_err(channel_error)?;
            channel
                .request_subsystem(true, "sftp")
                .await
                .map_err(channel_error)?;
            let sftp = SftpSession::new(channel.into_stream())
                .await
                .map_err(|err| SessionError::Channel {
                    message: err.to_string(),
                })?;
            log::info!("Transfer session ready: {}", target.host);
            Ok(SftpTransferSession { handle, sftp })
        })
    }
}

async fn open_handle(target: &SessionTarget) -> Result<Handle<ClientHandler>, SessionError> {
    let establish = async {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (target.host.as_str(), target.port), ClientHandler)
            .await
            .map_err(|err| SessionError::Connect {
                host: target.host.clone(),
                message: err.to_string(),
            })?;
        authenticate(&mut handle, target).await?;
        Ok::<_, SessionError>(handle)
    };

    tokio::time::timeout(target.ready_timeout, establish)
        .await
        .map_err(|_| SessionError::Timeout {
            host: target.host.clone(),
            timeout_ms: target.ready_timeout.as_millis(),
        })?
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    target: &SessionTarget,
) -> Result<(), SessionError> {
    let result = match &target.credentials {
        Credentials::Password(password) => {
            handle
                .authenticate_password(&target.username, password)
                .await
        }
        Credentials::PrivateKey { path, passphrase } => {
            let key = load_secret_key(expand_tilde(path), passphrase.as_deref()).map_err(
                |err| SessionError::Key {
                    path: path.clone(),
                    message: err.to_string(),
                },
            )?;
            handle
                .authenticate_publickey(
                    &target.username,
                    PrivateKeyWithHashAlg::new(Arc::new(key), None),
                )
                .await
        }
    }
    .map_err(|err| SessionError::Connect {
        host: target.host.clone(),
        message: err.to_string(),
    })?;

    match result {
        AuthResult::Success => Ok(()),
        AuthResult::Failure { .. } => Err(SessionError::Auth {
            host: target.host.clone(),
            username: target.username.clone(),
        }),
    }
}

fn channel_error(err: russh::Error) -> SessionError {
    SessionError::Channel {
        message: err.to_string(),
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The input is returned unchanged when `HOME` is not set.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Upper bound on bytes retained from each remote output stream.
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Raw output collected from one exec channel, decoded once on completion
/// so multi-byte characters split across packets survive.
#[derive(Debug)]
struct OutputCapture {
    exit: ExitInfo,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self {
            exit: ExitInfo::Unknown,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

impl OutputCapture {
    fn push_stdout(&mut self, chunk: &[u8]) {
        extend_capped(&mut self.stdout, chunk);
    }

    fn push_stderr(&mut self, chunk: &[u8]) {
        extend_capped(&mut self.stderr, chunk);
    }

    fn finish(self) -> RemoteCommandOutput {
        RemoteCommandOutput {
            exit: self.exit,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

fn extend_capped(buffer: &mut Vec<u8>, chunk: &[u8]) {
    let room = MAX_CAPTURED_OUTPUT.saturating_sub(buffer.len());
    buffer.extend(chunk.iter().take(room));
}

/// Command session backed by one authenticated SSH connection.
pub struct SshCommandSession {
    handle: Handle<ClientHandler>,
}

impl CommandSession for SshCommandSession {
    fn exec<'a>(
        &'a mut self,
        command: &'a str,
        on_output: OutputSink<'a>,
    ) -> SessionFuture<'a, RemoteCommandOutput, SessionError> {
        Box::pin(async move {
            let mut channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(channel_error)?;
            channel.exec(true, command).await.map_err(channel_error)?;

            let mut capture = OutputCapture::default();
            while let Some(message) = channel.wait().await {
                match message {
                    ChannelMsg::Data { ref data } => {
                        on_output(String::from_utf8_lossy(&data[..]).as_ref());
                        capture.push_stdout(&data[..]);
                    }
                    ChannelMsg::ExtendedData { ref data, .. } => {
                        on_output(String::from_utf8_lossy(&data[..]).as_ref());
                        capture.push_stderr(&data[..]);
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        capture.exit = ExitInfo::Status(exit_status);
                    }
                    ChannelMsg::ExitSignal { signal_name, .. } => {
                        capture.exit = ExitInfo::Signal(format!("{signal_name:?}"));
                    }
                    _ => {}
                }
            }
            Ok(capture.finish())
        })
    }

    fn close(&mut self) -> SessionFuture<'_, (), SessionError> {
        Box::pin(async move {
            self.handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .map_err(|err| SessionError::Close {
                    message: err.to_string(),
                })
        })
    }
}

/// SFTP session running over its own SSH connection.
pub struct SftpTransferSession {
    handle: Handle<ClientHandler>,
    sftp: SftpSession,
}

impl SftpTransferSession {
    async fn ensure_remote_dir(&self, remote: &str) -> Result<(), TransferError> {
        let mut current = if remote.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };
        for segment in remote.split('/').filter(|s| !s.is_empty()) {
            current = join_remote(&current, segment);
            let exists = self
                .sftp
                .try_exists(current.as_str())
                .await
                .map_err(|err| upload_error(remote, remote, &err))?;
            if !exists {
                self.sftp
                    .create_dir(current.as_str())
                    .await
                    .map_err(|err| upload_error(remote, &current, &err))?;
            }
        }
        Ok(())
    }

    async fn put(&self, local: &Utf8Path, remote: &str) -> Result<(), TransferError> {
        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|err| TransferError::Local {
                path: local.to_string(),
                message: err.to_string(),
            })?;
        let mut destination = self
            .sftp
            .create(remote)
            .await
            .map_err(|err| upload_error(local.as_str(), remote, &err))?;
        tokio::io::copy(&mut source, &mut destination)
            .await
            .map_err(|err| upload_error(local.as_str(), remote, &err))?;
        destination
            .shutdown()
            .await
            .map_err(|err| upload_error(local.as_str(), remote, &err))?;
        log::debug!("Uploaded {local} -> {remote}");
        Ok(())
    }
}

fn upload_error(local: &str, remote: &str, err: &impl ToString) -> TransferError {
    TransferError::Upload {
        local: local.to_owned(),
        remote: remote.to_owned(),
        message: err.to_string(),
    }
}

/// Lists the entries below `root` as (relative path, is directory) pairs,
/// parents before children.
fn walk_tree(root: &Utf8Path) -> Result<Vec<(Utf8PathBuf, bool)>, TransferError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| TransferError::Local {
            path: root.to_string(),
            message: err.to_string(),
        })?;
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            log::warn!("Skipping unsupported entry {}", entry.path().display());
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(Utf8Path::from_path)
            .ok_or_else(|| TransferError::Local {
                path: entry.path().display().to_string(),
                message: String::from("path is not valid UTF-8"),
            })?;
        entries.push((relative.to_path_buf(), file_type.is_dir()));
    }
    Ok(entries)
}

impl TransferSession for SftpTransferSession {
    fn upload_file<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError> {
        Box::pin(async move { self.put(local, remote).await })
    }

    fn upload_tree<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError> {
        Box::pin(async move {
            self.ensure_remote_dir(remote).await?;
            for (relative, is_dir) in walk_tree(local)? {
                let remote_path = join_remote(remote, relative.as_str());
                if is_dir {
                    self.ensure_remote_dir(&remote_path).await?;
                } else {
                    self.put(&local.join(&relative), &remote_path).await?;
                }
            }
            Ok(())
        })
    }

    fn close(&mut self) -> SessionFuture<'_, (), TransferError> {
        Box::pin(async move {
            self.handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .map_err(|err| TransferError::Close {
                    message: err.to_string(),
                })
        })
    }
}
