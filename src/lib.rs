//! Core library for the `ssh-deploy` tool.
//!
//! A deployment optionally packs a local build into a tarball, runs `before`
//! hooks on the remote host, clears the remote target, uploads over SFTP,
//! unpacks remotely, runs `after` hooks, and removes the local tarball. The
//! [`Deployer`] runs those stages strictly in order, stops at the first
//! failure, and always closes its SSH session exactly once.

pub mod archive;
pub mod config;
pub mod local;
pub mod pipeline;
pub mod remote;
pub mod session;
pub mod settings;
#[cfg(test)]
mod test_helpers;
pub mod test_support;

pub use archive::{ARCHIVE_NAME, Archive, Archiver, TarDialect};
pub use config::{ConfigError, Credentials, DeployConfig, DeployOptions, HookCommand};
pub use local::{CommandOutput, CommandRunner, LocalExecError, ProcessCommandRunner};
pub use pipeline::{DeployError, DeployReport, Deployer, Stage, StageError, deploy};
pub use remote::HookPhase;
pub use session::{
    CommandSession, ExitInfo, RemoteCommandOutput, SessionConnector, SessionError, SessionTarget,
    SshConnector, TransferError, TransferSession,
};
pub use settings::DeploySettings;
