//! Deployment options, defaults, and credential resolution.
//!
//! [`DeployOptions`] is the partial, user-supplied view of a deployment. It
//! deserialises from the same keys the settings file uses (camel-case aliases
//! are accepted for callers migrating option objects). [`DeployConfig::resolve`]
//! layers the options over the documented defaults and rejects runs that lack
//! a credential before any connection is attempted.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Deserialize;
use thiserror::Error;

use crate::session::SessionTarget;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default local artifact directory.
pub const DEFAULT_FROM: &str = "build";

/// Default cap on captured local process output, in bytes.
pub const DEFAULT_MAX_BUFFER: usize = 200 * 1024;

/// Default bound on session establishment, in milliseconds.
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 20_000;

/// A hook configured either as one command or as an ordered list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum HookCommand {
    /// A single shell command.
    Single(String),
    /// Commands run strictly in order, stopping at the first failure.
    List(Vec<String>),
}

impl HookCommand {
    /// Returns the commands in execution order.
    #[must_use]
    pub fn commands(&self) -> &[String] {
        match self {
            Self::Single(command) => std::slice::from_ref(command),
            Self::List(commands) => commands,
        }
    }

    /// Builds a hook from a list, returning `None` when the list is empty.
    #[must_use]
    pub fn from_list(mut commands: Vec<String>) -> Option<Self> {
        match commands.len() {
            0 => None,
            1 => commands.pop().map(Self::Single),
            _ => Some(Self::List(commands)),
        }
    }
}

/// Partial deployment options as supplied by the caller.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DeployOptions {
    /// Remote host name or address.
    pub host: Option<String>,
    /// Remote SSH port.
    pub port: Option<u16>,
    /// Remote user name.
    pub username: Option<String>,
    /// Password credential.
    pub password: Option<String>,
    /// Path to a private key file.
    #[serde(alias = "privateKey")]
    pub private_key: Option<String>,
    /// Passphrase for the private key.
    pub passphrase: Option<String>,
    /// Local artifact path.
    pub from: Option<Utf8PathBuf>,
    /// Remote target directory.
    pub to: Option<String>,
    /// Whether to ship the artifact as a tarball.
    pub zip: Option<bool>,
    /// Patterns excluded from the archive.
    pub exclude: Option<Vec<String>>,
    /// Commands run before the upload.
    pub before: Option<HookCommand>,
    /// Commands run after the upload.
    pub after: Option<HookCommand>,
    /// Keep existing remote files instead of clearing the target first.
    pub cover: Option<bool>,
    /// Surface command output in the log.
    pub debug: Option<bool>,
    /// Cap on captured local process output, in bytes.
    #[serde(alias = "maxBuffer")]
    pub max_buffer: Option<usize>,
    /// Bound on session establishment, in milliseconds.
    #[serde(alias = "readyTimeout")]
    pub ready_timeout_ms: Option<u64>,
}

/// Authentication method used for both sessions.
#[derive(Clone, Eq, PartialEq)]
pub enum Credentials {
    /// Password authentication.
    Password(String),
    /// Public key authentication from a key file.
    PrivateKey {
        /// Key file path; a leading `~/` is expanded when the key is loaded.
        path: String,
        /// Optional passphrase protecting the key.
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::PrivateKey { path, passphrase } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Fully resolved deployment configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployConfig {
    /// Remote host name or address.
    pub host: String,
    /// Remote SSH port.
    pub port: u16,
    /// Remote user name.
    pub username: String,
    /// Credential shared by the command and transfer sessions.
    pub credentials: Credentials,
    /// Local artifact path.
    pub from: Utf8PathBuf,
    /// Remote target directory.
    pub to: Option<String>,
    /// Whether to ship the artifact as a tarball.
    pub zip: bool,
    /// Patterns excluded from the archive, in order.
    pub exclude: Vec<String>,
    /// Commands run before the upload.
    pub before: Option<HookCommand>,
    /// Commands run after the upload.
    pub after: Option<HookCommand>,
    /// Keep existing remote files instead of clearing the target first.
    pub cover: bool,
    /// Surface command output in the log.
    pub debug: bool,
    /// Cap on captured local process output, in bytes.
    pub max_buffer: usize,
    /// Bound on session establishment.
    pub ready_timeout: Duration,
}

impl DeployConfig {
    /// Layers `options` over the defaults and validates the result.
    ///
    /// A private key takes precedence over a password when both are given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when `host` or `username` is
    /// absent or blank, and [`ConfigError::MissingCredential`] when neither a
    /// password nor a private key is supplied.
    pub fn resolve(options: DeployOptions) -> Result<Self, ConfigError> {
        let host = require_value(options.host, "host")?;
        let username = require_value(options.username, "username")?;
        let credentials = resolve_credentials(
            non_blank(options.password),
            non_blank(options.private_key),
            non_blank(options.passphrase),
        )?;

        Ok(Self {
            host,
            port: options.port.unwrap_or(DEFAULT_PORT),
            username,
            credentials,
            from: options
                .from
                .filter(|path| !path.as_str().trim().is_empty())
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_FROM)),
            to: non_blank(options.to),
            zip: options.zip.unwrap_or(true),
            exclude: options.exclude.unwrap_or_default(),
            before: options.before,
            after: options.after,
            cover: options.cover.unwrap_or(true),
            debug: options.debug.unwrap_or(false),
            max_buffer: options.max_buffer.unwrap_or(DEFAULT_MAX_BUFFER),
            ready_timeout: Duration::from_millis(
                options.ready_timeout_ms.unwrap_or(DEFAULT_READY_TIMEOUT_MS),
            ),
        })
    }

    /// Connection details shared by the command and transfer sessions.
    #[must_use]
    pub fn target(&self) -> SessionTarget {
        SessionTarget {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            credentials: self.credentials.clone(),
            ready_timeout: self.ready_timeout,
        }
    }

    /// Returns `true` when the remote target must be emptied before upload.
    #[must_use]
    pub const fn clears_remote(&self) -> bool {
        self.to.is_some() && !self.cover
    }
}

fn resolve_credentials(
    password: Option<String>,
    private_key: Option<String>,
    passphrase: Option<String>,
) -> Result<Credentials, ConfigError> {
    match (private_key, password) {
        (Some(path), _) => Ok(Credentials::PrivateKey { path, passphrase }),
        (None, Some(password)) => Ok(Credentials::Password(password)),
        (None, None) => Err(ConfigError::MissingCredential),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn require_value(value: Option<String>, field: &str) -> Result<String, ConfigError> {
    non_blank(value).ok_or_else(|| ConfigError::MissingField {
        field: field.to_owned(),
    })
}

/// Errors raised while resolving deployment configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when neither a password nor a private key was supplied.
    #[error(
        "password or private_key is required: set SSH_DEPLOY_PASSWORD or SSH_DEPLOY_PRIVATE_KEY, or add one to ssh-deploy.toml"
    )]
    MissingCredential,
    /// Raised when a required value is missing or blank.
    #[error("missing {field}: set SSH_DEPLOY_{env_suffix} or add {field} to ssh-deploy.toml", env_suffix = field.to_uppercase())]
    MissingField {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when layered configuration sources cannot be merged.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn options() -> DeployOptions {
        DeployOptions {
            host: Some(String::from("h")),
            username: Some(String::from("u")),
            password: Some(String::from("p")),
            ..DeployOptions::default()
        }
    }

    #[rstest]
    fn resolve_applies_defaults(options: DeployOptions) {
        let config = DeployConfig::resolve(options).expect("options should resolve");

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.from, Utf8PathBuf::from("build"));
        assert!(config.zip);
        assert!(config.cover);
        assert!(!config.debug);
        assert!(config.exclude.is_empty());
        assert_eq!(config.to, None);
        assert_eq!(config.max_buffer, 200 * 1024);
        assert_eq!(config.ready_timeout, Duration::from_secs(20));
        assert_eq!(config.credentials, Credentials::Password(String::from("p")));
    }

    #[rstest]
    fn resolve_keeps_user_values_over_defaults(options: DeployOptions) {
        let config = DeployConfig::resolve(DeployOptions {
            port: Some(2222),
            from: Some(Utf8PathBuf::from("./dist")),
            to: Some(String::from("/var/www/app")),
            zip: Some(false),
            cover: Some(false),
            exclude: Some(vec![String::from("node_modules")]),
            ready_timeout_ms: Some(500),
            ..options
        })
        .expect("options should resolve");

        assert_eq!(config.port, 2222);
        assert_eq!(config.from, Utf8PathBuf::from("./dist"));
        assert_eq!(config.to.as_deref(), Some("/var/www/app"));
        assert!(!config.zip);
        assert!(config.clears_remote());
        assert_eq!(config.exclude, vec![String::from("node_modules")]);
        assert_eq!(config.ready_timeout, Duration::from_millis(500));
    }

    #[rstest]
    #[case(None)]
    #[case(Some(String::from("   ")))]
    fn resolve_rejects_missing_credentials(options: DeployOptions, #[case] password: Option<String>) {
        let err = DeployConfig::resolve(DeployOptions {
            password,
            ..options
        })
        .expect_err("a run without credentials must be rejected");

        assert_eq!(err, ConfigError::MissingCredential);
        assert!(err.to_string().contains("SSH_DEPLOY_PASSWORD"));
    }

    #[rstest]
    fn private_key_takes_precedence_over_password(options: DeployOptions) {
        let config = DeployConfig::resolve(DeployOptions {
            private_key: Some(String::from("~/.ssh/id_ed25519")),
            passphrase: Some(String::from("secret")),
            ..options
        })
        .expect("options should resolve");

        assert_eq!(
            config.credentials,
            Credentials::PrivateKey {
                path: String::from("~/.ssh/id_ed25519"),
                passphrase: Some(String::from("secret")),
            }
        );
    }

    #[rstest]
    #[case::host("host")]
    #[case::username("username")]
    fn resolve_rejects_blank_required_fields(options: DeployOptions, #[case] field: &str) {
        let mut candidate = options;
        match field {
            "host" => candidate.host = Some(String::from(" ")),
            _ => candidate.username = None,
        }

        let err = DeployConfig::resolve(candidate).expect_err("blank field must fail");
        assert_eq!(
            err,
            ConfigError::MissingField {
                field: field.to_owned()
            }
        );
        assert!(err.to_string().contains(&format!("SSH_DEPLOY_{}", field.to_uppercase())));
    }

    #[test]
    fn blank_target_is_treated_as_unset() {
        let config = DeployConfig::resolve(DeployOptions {
            to: Some(String::new()),
            cover: Some(false),
            ..options()
        })
        .expect("options should resolve");

        assert_eq!(config.to, None);
        assert!(!config.clears_remote());
    }

    #[test]
    fn hook_from_list_collapses_single_entries() {
        assert_eq!(HookCommand::from_list(Vec::new()), None);
        assert_eq!(
            HookCommand::from_list(vec![String::from("ls")]),
            Some(HookCommand::Single(String::from("ls")))
        );
        let list = HookCommand::from_list(vec![String::from("a"), String::from("b")])
            .expect("two commands form a list");
        assert_eq!(list.commands(), &[String::from("a"), String::from("b")]);
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let rendered = format!("{:?}", Credentials::Password(String::from("hunter2")));
        assert!(!rendered.contains("hunter2"), "rendered: {rendered}");
    }
}
