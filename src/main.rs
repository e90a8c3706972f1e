//! Binary entry point for the `ssh-deploy` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use ssh_deploy::{ConfigError, DeployConfig, DeployError, DeployOptions, DeploySettings, Deployer};

mod cli;

use cli::{Cli, DeployCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("deployment failed: {0}")]
    Deploy(#[from] DeployError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Deploy(command) => deploy_command(command).await,
    }
}

async fn deploy_command(args: DeployCommand) -> Result<(), CliError> {
    init_logging(args.debug);

    let settings = DeploySettings::load_without_cli_args()?;
    let options = apply_overrides(settings.into_options(), &args);
    let config = DeployConfig::resolve(options)?;
    let report = Deployer::with_ssh(config).execute().await?;

    writeln!(io::stdout(), "Deployed: {}ms", report.elapsed.as_millis()).ok();
    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init()
        .ok();
}

fn apply_overrides(mut options: DeployOptions, args: &DeployCommand) -> DeployOptions {
    if let Some(ref from) = args.from {
        options.from = Some(from.as_str().into());
    }
    if let Some(ref to) = args.to {
        options.to = Some(to.clone());
    }
    if args.no_zip {
        options.zip = Some(false);
    }
    if args.clean {
        options.cover = Some(false);
    }
    if args.debug {
        options.debug = Some(true);
    }
    options
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
