//! Tarball creation and removal for zipped deployments.
//!
//! The local `tar` is probed at runtime because the deploying host's
//! toolchain varies: GNU tar accepts `--ignore-failed-read` and needs the
//! archive excluded from itself, while bsdtar and friends reject the former.

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;

use crate::config::DeployConfig;
use crate::local::{CommandRunner, LocalExecError, run_checked};

/// File name of the archive, both locally and on the remote host.
pub const ARCHIVE_NAME: &str = "deploy.tgz";

/// Command used to probe the local tar implementation.
pub const TAR_VERSION_COMMAND: &str = "tar --version";

/// Flag dialect of the local tar implementation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TarDialect {
    /// GNU tar.
    Gnu,
    /// Any other tar (bsdtar, busybox).
    Other,
}

impl TarDialect {
    /// Classifies the output of `tar --version`.
    #[must_use]
    pub fn from_version_output(output: &str) -> Self {
        if output.contains("GNU tar") {
            Self::Gnu
        } else {
            Self::Other
        }
    }
}

/// Local archive produced by [`Archiver::create`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Archive {
    path: Utf8PathBuf,
}

impl Archive {
    /// Path of the archive relative to the working directory.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Builds the archive creation command.
///
/// One `--exclude` flag is emitted per pattern, in the order given. GNU tar
/// additionally excludes the archive itself and tolerates unreadable files.
#[must_use]
pub fn create_command(from: &Utf8Path, exclude: &[String], dialect: TarDialect) -> String {
    let mut command = format!("tar -czvf ./{ARCHIVE_NAME}");
    for pattern in exclude {
        command.push_str(" --exclude=");
        command.push_str(escape(pattern.as_str().into()).as_ref());
    }
    if dialect == TarDialect::Gnu {
        command.push_str(" --exclude=");
        command.push_str(ARCHIVE_NAME);
        command.push_str(" --ignore-failed-read");
    }
    command.push_str(" --directory=");
    command.push_str(escape(from.as_str().into()).as_ref());
    command.push_str(" .");
    command
}

/// Builds the platform command that deletes the local archive.
#[must_use]
pub fn remove_command() -> String {
    if cfg!(windows) {
        format!("del {ARCHIVE_NAME}")
    } else {
        format!("rm {ARCHIVE_NAME}")
    }
}

/// Creates and removes the local archive for one deployment.
#[derive(Debug)]
pub struct Archiver<'a, R: ?Sized> {
    config: &'a DeployConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> Archiver<'a, R> {
    /// Creates an archiver bound to `config` and `runner`.
    #[must_use]
    pub const fn new(config: &'a DeployConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    /// Probes the local tar dialect.
    ///
    /// # Errors
    ///
    /// Returns [`LocalExecError`] when `tar --version` cannot run or fails.
    pub fn detect_dialect(&self) -> Result<TarDialect, LocalExecError> {
        let output = run_checked(
            self.runner,
            TAR_VERSION_COMMAND,
            self.config.max_buffer,
            false,
        )?;
        Ok(TarDialect::from_version_output(&output.stdout))
    }

    /// Packages `from` into the archive when zipping is enabled.
    ///
    /// Returns `Ok(None)` without touching the filesystem when `zip` is off.
    ///
    /// # Errors
    ///
    /// Returns [`LocalExecError`] when probing or archiving fails.
    pub fn create(&self) -> Result<Option<Archive>, LocalExecError> {
        if !self.config.zip {
            return Ok(None);
        }

        let dialect = self.detect_dialect()?;
        let command = create_command(&self.config.from, &self.config.exclude, dialect);
        log::info!("Zipping deploy command:");
        log::info!(" > {command}");
        run_checked(
            self.runner,
            &command,
            self.config.max_buffer,
            self.config.debug,
        )?;

        Ok(Some(Archive {
            path: Utf8PathBuf::from(ARCHIVE_NAME),
        }))
    }

    /// Deletes the local archive.
    ///
    /// # Errors
    ///
    /// Returns [`LocalExecError`] when the delete command fails.
    pub fn remove(&self, archive: &Archive) -> Result<(), LocalExecError> {
        let command = remove_command();
        log::info!("Local cleanup: {}", archive.path());
        log::info!(" > {command}");
        run_checked(
            self.runner,
            &command,
            self.config.max_buffer,
            self.config.debug,
        )
        .map(drop)
    }
}
