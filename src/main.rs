use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobwatch::cli::{Cli, Command};
use jobwatch::ui::WatchProgress;
use jobwatch::{Arbiter, ArbiterSettings, HttpStatusApi, JobwatchConfig, server};

const EXIT_TIMEOUT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "jobwatch=debug,tower_http=debug"
    } else {
        "jobwatch=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "jobwatch failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = JobwatchConfig::load_with(cli.config.as_deref())?;
    cli.command.apply(&mut config);
    config.validate()?;

    match cli.command {
        Command::Serve { .. } => {
            server::serve(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch { json, .. } => {
            let api = HttpStatusApi::new(config.server_url.clone())?;
            let progress = WatchProgress::start(api.base_url());
            let arbiter = Arbiter::new(api, ArbiterSettings::from_config(&config));

            match arbiter.resolve().await {
                Ok(resolution) => {
                    progress.resolved(&resolution);
                    if json {
                        progress.print_record(&resolution);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    progress.failed(&err);
                    if err.is_timeout() {
                        Ok(ExitCode::from(EXIT_TIMEOUT))
                    } else {
                        Err(err.into())
                    }
                }
            }
        }
    }
}
