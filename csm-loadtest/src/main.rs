//! This is the load test binary, which runs virtual users against the courseware student module
//! user state storage and prints metrics at the end.
//!
//! See [`csm_loadtest::config`] for the configuration. While running, the binary reloads the
//! connection settings on `SIGHUP` and stops early on `Ctrl-C`, printing the metrics collected so
//! far.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use csm_client::{BoxedClient, HttpUserStateClient, InMemoryClient, SettingsHandle};
use csm_loadtest::config::{self, ClientConfig, Config};
use csm_loadtest::{Scenario, observability};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Load test for the courseware student module user state storage
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Validate(ValidateCommand),
    Version(VersionCommand),
}

/// run the load test (default)
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// replace the configured users with a preset profile, `csm` or `csm-fast`
    #[argh(option)]
    preset: Option<String>,

    /// number of virtual users of the preset profile
    #[argh(option, short = 'u')]
    users: Option<usize>,
}

/// load and validate the configuration, then print it
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "validate")]
struct ValidateCommand {}

/// print the load test version
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let command = args
        .command
        .unwrap_or_else(|| Command::Run(RunCommand::default()));

    let load = |run: Option<&RunCommand>| -> Result<Config> {
        let mut config =
            Config::load(args.config.as_deref()).context("failed to load configuration")?;
        if let Some(RunCommand {
            preset: Some(preset),
            users,
        }) = run
        {
            config.use_preset(preset, *users)?;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    };

    match command {
        Command::Version(_) => {
            println!("csm-loadtest {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Validate(_) => {
            let config = load(None)?;
            println!("{config:#?}");
            Ok(())
        }
        Command::Run(command) => {
            let config = load(Some(&command))?;
            observability::init_tracing(&config.logging);
            tracing::debug!(?config);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name("loadtest-rt")
                .enable_all()
                .build()?;
            runtime.block_on(run(config, args.config.as_deref()))
        }
    }
}

async fn run(config: Config, path: Option<&Path>) -> Result<()> {
    let settings = SettingsHandle::new(config.connection.clone());
    let client: BoxedClient = match &config.client {
        ClientConfig::Http { timeout } => Arc::new(
            HttpUserStateClient::builder(settings.clone())
                .timeout(*timeout)
                .build()
                .context("failed to create HTTP client")?,
        ),
        ClientConfig::Memory => Arc::new(InMemoryClient::new()),
    };

    let cancel = CancellationToken::new();
    tokio::spawn(reload_on_hangup(path.map(Path::to_owned), settings));
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let report = csm_loadtest::run(client, Scenario::from(&config), cancel).await?;
    report.print().context("failed to aggregate metrics")?;

    Ok(())
}

/// Reloads the connection settings whenever the process receives `SIGHUP`.
async fn reload_on_hangup(path: Option<PathBuf>, settings: SettingsHandle) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(error) => {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                "failed to listen for SIGHUP"
            );
            return;
        }
    };

    while hangup.recv().await.is_some() {
        tracing::debug!("received SIGHUP");
        if let Err(error) = config::reload_connection(path.as_deref(), &settings) {
            tracing::error!(
                error = error.as_ref() as &dyn std::error::Error,
                "failed to reload connection settings"
            );
        }
    }
}

/// Cancels the run on the first `Ctrl-C`.
async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupted, stopping virtual users");
        cancel.cancel();
    }
}
