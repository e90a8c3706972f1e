//! Command-line interface definitions for the `ssh-deploy` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `ssh-deploy` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ssh-deploy",
    about = "Ship a local build to a remote host over SSH and SFTP",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Archive, upload, and unpack the configured artifact.
    #[command(
        name = "deploy",
        about = "Archive, upload, and unpack the configured artifact"
    )]
    Deploy(DeployCommand),
}

/// Arguments for the `ssh-deploy deploy` subcommand.
///
/// Connection details and hooks come from `ssh-deploy.toml` and
/// `SSH_DEPLOY_*` variables; these flags override the loaded values for a
/// single run.
#[derive(Debug, Default, Parser)]
pub(crate) struct DeployCommand {
    /// Local file or directory to deploy.
    #[arg(long, value_name = "PATH")]
    pub(crate) from: Option<String>,
    /// Remote directory the artifact is uploaded into.
    #[arg(long, value_name = "DIR")]
    pub(crate) to: Option<String>,
    /// Upload files as-is instead of shipping a tarball.
    #[arg(long)]
    pub(crate) no_zip: bool,
    /// Empty the remote directory before uploading.
    #[arg(long)]
    pub(crate) clean: bool,
    /// Log command output and raise the log level to debug.
    #[arg(long)]
    pub(crate) debug: bool,
}
