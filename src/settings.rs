//! Layered settings loading via `ortho-config`.
//!
//! Settings merge defaults, a discovered `ssh-deploy.toml`, and
//! `SSH_DEPLOY_*` environment variables. They are converted into
//! [`DeployOptions`] so the resolver applies the same validation regardless of
//! where values came from.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{
    ConfigError, DEFAULT_FROM, DEFAULT_MAX_BUFFER, DEFAULT_PORT, DEFAULT_READY_TIMEOUT_MS,
    DeployOptions, HookCommand,
};

/// Deployment settings loaded from configuration files and the environment.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SSH_DEPLOY",
    discovery(
        app_name = "ssh-deploy",
        env_var = "SSH_DEPLOY_CONFIG_PATH",
        config_file_name = "ssh-deploy.toml",
        dotfile_name = ".ssh-deploy.toml",
        project_file_name = "ssh-deploy.toml"
    )
)]
pub struct DeploySettings {
    /// Remote host name or address.
    pub host: Option<String>,
    /// Remote SSH port.
    #[ortho_config(default = DEFAULT_PORT)]
    pub port: u16,
    /// Remote user name.
    pub username: Option<String>,
    /// Password credential.
    pub password: Option<String>,
    /// Path to a private key file. Supports tilde expansion.
    pub private_key: Option<String>,
    /// Passphrase for the private key.
    pub passphrase: Option<String>,
    /// Local artifact path.
    #[ortho_config(default = DEFAULT_FROM.to_owned())]
    pub from: String,
    /// Remote target directory.
    pub to: Option<String>,
    /// Whether to ship the artifact as a tarball.
    #[ortho_config(default = true)]
    pub zip: bool,
    /// Patterns excluded from the archive.
    #[ortho_config(default = Vec::new())]
    pub exclude: Vec<String>,
    /// Commands run before the upload, in order.
    #[ortho_config(default = Vec::new())]
    pub before: Vec<String>,
    /// Commands run after the upload, in order.
    #[ortho_config(default = Vec::new())]
    pub after: Vec<String>,
    /// Keep existing remote files instead of clearing the target first.
    #[ortho_config(default = true)]
    pub cover: bool,
    /// Surface command output in the log.
    #[ortho_config(default = false)]
    pub debug: bool,
    /// Cap on captured local process output, in bytes.
    #[ortho_config(default = DEFAULT_MAX_BUFFER)]
    pub max_buffer: usize,
    /// Bound on session establishment, in milliseconds.
    #[ortho_config(default = DEFAULT_READY_TIMEOUT_MS)]
    pub ready_timeout_ms: u64,
}

impl DeploySettings {
    /// Loads settings from defaults, configuration files, and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ssh-deploy")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Converts the settings into partial options for the resolver.
    #[must_use]
    pub fn into_options(self) -> DeployOptions {
        DeployOptions {
            host: self.host,
            port: Some(self.port),
            username: self.username,
            password: self.password,
            private_key: self.private_key,
            passphrase: self.passphrase,
            from: Some(Utf8PathBuf::from(self.from)),
            to: self.to,
            zip: Some(self.zip),
            exclude: Some(self.exclude),
            before: HookCommand::from_list(self.before),
            after: HookCommand::from_list(self.after),
            cover: Some(self.cover),
            debug: Some(self.debug),
            max_buffer: Some(self.max_buffer),
            ready_timeout_ms: Some(self.ready_timeout_ms),
        }
    }
}
