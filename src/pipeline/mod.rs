//! Deployment orchestration.
//!
//! A run opens the command session, then executes the stages in
//! [`Stage::ALL`] order. Each stage finishes before the next begins; the first
//! failure stops progression. Whatever the outcome, the command session is
//! closed exactly once before the result is returned. A failed connect is
//! surfaced directly because nothing has been started that needs undoing.

use std::time::{Duration, Instant};

use crate::archive::{Archive, Archiver};
use crate::config::{DeployConfig, DeployOptions};
use crate::local::{CommandRunner, ProcessCommandRunner};
use crate::remote::{HookPhase, clean_command, run_hook, run_remote, unpack_command};
use crate::session::{CommandSession, SessionConnector, SessionTarget, SshConnector};

mod error;
mod transfer;

pub use error::{DeployError, StageError};
pub use transfer::upload;

use error::append_teardown_note;

/// One ordered step of a deployment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Package the local artifact into a tarball.
    Archive,
    /// Run the `before` hook.
    BeforeHooks,
    /// Empty the remote target directory.
    CleanRemote,
    /// Upload the artifact over a transfer session.
    Upload,
    /// Extract the uploaded tarball remotely.
    Unpack,
    /// Run the `after` hook.
    AfterHooks,
    /// Delete the local tarball.
    LocalCleanup,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Self; 7] = [
        Self::Archive,
        Self::BeforeHooks,
        Self::CleanRemote,
        Self::Upload,
        Self::Unpack,
        Self::AfterHooks,
        Self::LocalCleanup,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Archive => "archive",
            Self::BeforeHooks => "before hooks",
            Self::CleanRemote => "remote cleanup",
            Self::Upload => "upload",
            Self::Unpack => "remote unpack",
            Self::AfterHooks => "after hooks",
            Self::LocalCleanup => "local cleanup",
        };
        f.write_str(name)
    }
}

/// Summary of a successful run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeployReport {
    /// Wall-clock time from connect to close.
    pub elapsed: Duration,
}

/// Runs the deployment pipeline against one host.
#[derive(Debug)]
pub struct Deployer<C, R> {
    config: DeployConfig,
    connector: C,
    runner: R,
}

impl Deployer<SshConnector, ProcessCommandRunner> {
    /// Wires the `russh` sessions and the real process runner.
    #[must_use]
    pub const fn with_ssh(config: DeployConfig) -> Self {
        Self::new(config, SshConnector, ProcessCommandRunner)
    }
}

impl<C, R> Deployer<C, R>
where
    C: SessionConnector,
    R: CommandRunner,
{
    /// Creates a deployer from resolved configuration and collaborators.
    #[must_use]
    pub const fn new(config: DeployConfig, connector: C, runner: R) -> Self {
        Self {
            config,
            connector,
            runner,
        }
    }

    /// Runs every stage and closes the session.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Connect`] when the session cannot be opened,
    /// [`DeployError::Stage`] naming the first failing stage, or
    /// [`DeployError::Teardown`] when only the final close fails.
    pub async fn execute(&self) -> Result<DeployReport, DeployError> {
        let started = Instant::now();
        let target = self.config.target();

        log::info!("[ Start Deploy ]");
        log::info!("Connecting: {}", target.host);
        let mut session = self
            .connector
            .connect_command(&target)
            .await
            .map_err(DeployError::Connect)?;
        log::info!("Connected: {}", target.host);

        let outcome = self.run_stages(&mut session, &target).await;
        let closed = session.close().await;
        log::info!("Closed: {}", target.host);

        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                let report = DeployReport {
                    elapsed: started.elapsed(),
                };
                log::info!("Deployed: {}ms", report.elapsed.as_millis());
                Ok(report)
            }
            (Ok(()), Err(err)) => Err(DeployError::Teardown(err)),
            (Err((stage, source)), closed) => {
                log::error!("Error deploying during {stage}: {source}");
                let message = append_teardown_note(source.to_string(), closed.err().as_ref());
                Err(DeployError::Stage {
                    stage,
                    message,
                    source,
                })
            }
        }
    }

    async fn run_stages(
        &self,
        session: &mut C::Command,
        target: &SessionTarget,
    ) -> Result<(), (Stage, StageError)> {
        let mut archive = None;
        for stage in Stage::ALL {
            self.run_stage(stage, session, target, &mut archive)
                .await
                .map_err(|err| (stage, err))?;
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        stage: Stage,
        session: &mut C::Command,
        target: &SessionTarget,
        archive: &mut Option<Archive>,
    ) -> Result<(), StageError> {
        let debug = self.config.debug;
        match stage {
            Stage::Archive => {
                *archive = Archiver::new(&self.config, &self.runner).create()?;
            }
            Stage::BeforeHooks => {
                run_hook(session, HookPhase::Before, self.config.before.as_ref(), debug).await?;
            }
            Stage::CleanRemote => self.clean_remote(session).await?,
            Stage::Upload => {
                upload(&self.connector, &self.config, target, archive.as_ref()).await?;
            }
            Stage::Unpack => {
                if let (Some(_), Some(to)) = (archive.as_ref(), self.config.to.as_deref()) {
                    let command = unpack_command(to);
                    log::info!("Unzip zipfile:");
                    log::info!(" > {command}");
                    run_remote(session, &command, debug).await?;
                }
            }
            Stage::AfterHooks => {
                run_hook(session, HookPhase::After, self.config.after.as_ref(), debug).await?;
            }
            Stage::LocalCleanup => {
                if let Some(local) = archive.take() {
                    Archiver::new(&self.config, &self.runner).remove(&local)?;
                }
            }
        }
        Ok(())
    }

    async fn clean_remote<S: CommandSession>(&self, session: &mut S) -> Result<(), StageError> {
        let Some(to) = self.config.to.as_deref().filter(|_| self.config.clears_remote()) else {
            return Ok(());
        };
        let command = clean_command(to);
        log::info!("Clean remote old files:");
        log::info!(" > {command}");
        run_remote(session, &command, self.config.debug).await?;
        Ok(())
    }
}

/// Resolves `options` and deploys over SSH.
///
/// # Errors
///
/// Returns [`DeployError::Config`] for invalid options and any error from
/// [`Deployer::execute`].
pub async fn deploy(options: DeployOptions) -> Result<DeployReport, DeployError> {
    let config = DeployConfig::resolve(options)?;
    Deployer::with_ssh(config).execute().await
}
