//! Remote command construction and execution over the command session.
//!
//! Hooks, the pre-upload cleanup, and the unpack step all run through
//! [`run_remote`], which streams output to the log in debug mode and turns
//! any non-zero or abnormal completion into a [`StageError::RemoteCommand`].

use std::fmt;

use shell_escape::unix::escape;

use crate::archive::ARCHIVE_NAME;
use crate::config::HookCommand;
use crate::pipeline::StageError;
use crate::session::{CommandSession, RemoteCommandOutput, join_remote};

/// Phase a hook runs in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HookPhase {
    /// Before the remote target is touched.
    Before,
    /// After the artifact is in place.
    After,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("Before"),
            Self::After => f.write_str("After"),
        }
    }
}

/// Builds the command that empties the remote target directory.
#[must_use]
pub fn clean_command(to: &str) -> String {
    format!("cd {} && rm -fr *", escape(to.into()))
}

/// Builds the command that unpacks the uploaded archive and deletes it.
#[must_use]
pub fn unpack_command(to: &str) -> String {
    let archive = join_remote(to, ARCHIVE_NAME);
    format!(
        "cd {} && tar -xzvf {ARCHIVE_NAME} && rm {}",
        escape(to.into()),
        escape(archive.as_str().into())
    )
}

/// Runs one remote command, failing unless it exits with status zero.
///
/// # Errors
///
/// Returns [`StageError::Session`] when the session breaks and
/// [`StageError::RemoteCommand`] when the command does not succeed.
pub async fn run_remote<S: CommandSession + ?Sized>(
    session: &mut S,
    command: &str,
    debug: bool,
) -> Result<RemoteCommandOutput, StageError> {
    run_remote_with(session, command, debug, |line| log::info!("{line}")).await
}

async fn run_remote_with<S, F>(
    session: &mut S,
    command: &str,
    debug: bool,
    mut report: F,
) -> Result<RemoteCommandOutput, StageError>
where
    S: CommandSession + ?Sized,
    F: FnMut(&str) + Send,
{
    let mut sink = |chunk: &str| {
        if debug {
            report(chunk.trim_end());
        }
    };
    let output = session.exec(command, &mut sink).await?;
    if output.exit.is_success() {
        return Ok(output);
    }

    Err(StageError::RemoteCommand {
        command: command.to_owned(),
        exit: output.exit,
        stderr: output.stderr,
    })
}

/// Runs a configured hook, one command at a time, stopping at the first
/// failure. A missing hook is a no-op.
///
/// # Errors
///
/// Returns the first [`StageError`] raised by a hook command; later commands
/// are not run.
pub async fn run_hook<S: CommandSession + ?Sized>(
    session: &mut S,
    phase: HookPhase,
    hook: Option<&HookCommand>,
    debug: bool,
) -> Result<(), StageError> {
    let Some(hook) = hook else {
        return Ok(());
    };

    log::info!("{phase} deploy running remote commands:");
    for command in hook.commands() {
        log::info!(" > {command}");
        run_remote(session, command, debug).await?;
    }
    Ok(())
}
