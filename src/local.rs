//! Local process execution for archive creation and removal.

use std::process::Command;

use thiserror::Error;

/// Result of running a local shell command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Abstraction over local command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `command` through the platform shell, capturing its output.
    ///
    /// # Errors
    ///
    /// Returns [`LocalExecError::Spawn`] if the shell cannot be started and
    /// [`LocalExecError::OutputLimit`] when either stream exceeds
    /// `max_output` bytes.
    fn run(&self, command: &str, max_output: usize) -> Result<CommandOutput, LocalExecError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, command: &str, max_output: usize) -> Result<CommandOutput, LocalExecError> {
        let output = shell_command(command)
            .output()
            .map_err(|err| LocalExecError::Spawn {
                command: command.to_owned(),
                message: err.to_string(),
            })?;

        if output.stdout.len() > max_output || output.stderr.len() > max_output {
            return Err(LocalExecError::OutputLimit {
                command: command.to_owned(),
                limit: max_output,
            });
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.args(["/C", command]);
    shell
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.args(["-c", command]);
    shell
}

/// Runs `command` and converts a non-zero exit into an error.
///
/// When `debug` is set the captured streams are written to the log.
///
/// # Errors
///
/// Propagates runner failures and returns [`LocalExecError::CommandFailure`]
/// when the command exits unsuccessfully.
pub fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    command: &str,
    max_output: usize,
    debug: bool,
) -> Result<CommandOutput, LocalExecError> {
    run_checked_with(runner, command, max_output, debug, |line| log::info!("{line}"))
}

fn run_checked_with<R, F>(
    runner: &R,
    command: &str,
    max_output: usize,
    debug: bool,
    mut report: F,
) -> Result<CommandOutput, LocalExecError>
where
    R: CommandRunner + ?Sized,
    F: FnMut(&str),
{
    let output = runner.run(command, max_output)?;
    if debug {
        report(&format!("stdout: {}", output.stdout.trim_end()));
        report(&format!("stderr: {}", output.stderr.trim_end()));
    }
    if output.is_success() {
        return Ok(output);
    }

    Err(LocalExecError::CommandFailure {
        command: command.to_owned(),
        status: output.code,
        status_text: output.status_text(),
        stderr: output.stderr,
    })
}

/// Errors surfaced while running local commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LocalExecError {
    /// Raised when the shell cannot be spawned.
    #[error("failed to spawn `{command}`: {message}")]
    Spawn {
        /// Command that failed to start.
        command: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the command produced more output than allowed.
    #[error("`{command}` produced more than {limit} bytes of output")]
    OutputLimit {
        /// Command whose output overflowed.
        command: String,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// Raised when the command completes with a non-zero exit code.
    #[error("`{command}` exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command that failed.
        command: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}
