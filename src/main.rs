// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use hget::prelude::*;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hget", version, about = "Parallel, resumable file downloader", propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a URL, or every URL listed in a file.
    #[command(alias = "get")]
    Fetch(FetchArgs),
    /// List suspended transfers.
    #[command(alias = "ls")]
    Tasks,
    /// Continue a suspended transfer by URL or task name.
    Resume(ResumeArgs),
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[arg(required_unless_present = "file")]
    url: Option<String>,

    /// File containing one URL per line.
    #[arg(long, conflicts_with = "url")]
    file: Option<PathBuf>,

    /// Expected SHA-256 of the downloaded file.
    #[arg(long)]
    sha256: Option<String>,

    #[command(flatten)]
    net: NetArgs,
}

#[derive(Debug, Args)]
struct ResumeArgs {
    task: String,

    #[command(flatten)]
    net: NetArgs,
}

#[derive(Debug, Args)]
struct NetArgs {
    /// Number of parallel connections.
    #[arg(short = 'n', long)]
    connections: Option<usize>,

    /// Skip certificate verification for https.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    insecure_tls: bool,

    /// Proxy, e.g. 127.0.0.1:12345 (socks5) or http://proxy.com:8080.
    #[arg(long)]
    proxy: Option<String>,

    /// Bandwidth limit, e.g. 10kB or 10MiB.
    #[arg(long, value_parser = parse_rate)]
    rate: Option<u64>,

    /// Directory the finished file is written to.
    #[arg(short = 'o', long, default_value = ".")]
    output_dir: PathBuf,
}

impl NetArgs {
    fn config(self) -> Config {
        let defaults = Config::default();
        Config {
            connections: self.connections.unwrap_or(defaults.connections),
            insecure_tls: self.insecure_tls,
            proxy: self.proxy,
            rate_limit: self.rate,
            output_dir: self.output_dir,
            progress: std::io::stdout().is_terminal(),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.cmd {
        Commands::Tasks => {
            let store = StateStore::new(Config::default().workspace()?);
            let tasks = store.list_tasks().await?;
            println!("Currently ongoing downloads:");
            for task in tasks {
                println!("{task}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resume(args) => {
            let coordinator = TransferCoordinator::new(args.net.config())?;
            let interrupt = interrupt_on_signal()?;
            let outcome = coordinator
                .resume(&args.task, interrupt)
                .await
                .with_context(|| format!("resuming {}", args.task))?;
            Ok(report(outcome))
        }
        Commands::Fetch(args) => {
            let config = Config {
                sha256: args.sha256,
                ..args.net.config()
            };
            let coordinator = TransferCoordinator::new(config)?;
            let interrupt = interrupt_on_signal()?;

            if let Some(list) = args.file {
                let queue = DownloadQueue::from_file(&list).await?;
                info!("Batch of {} urls from {}", queue.len().await, list.display());
                let outcomes = queue.start(&coordinator, interrupt).await?;
                let mut code = ExitCode::SUCCESS;
                for outcome in outcomes {
                    code = report(outcome);
                }
                return Ok(code);
            }

            let Some(url) = args.url else {
                bail!("url is required");
            };
            let outcome = coordinator
                .fetch(&url, interrupt)
                .await
                .with_context(|| format!("downloading {url}"))?;
            Ok(report(outcome))
        }
    }
}

fn report(outcome: TransferOutcome) -> ExitCode {
    match outcome {
        TransferOutcome::Completed { output, bytes } => {
            info!("Downloaded {} ({} bytes)", output.display(), bytes);
            ExitCode::SUCCESS
        }
        TransferOutcome::Suspended { state, .. } => {
            info!("Saved; continue with `hget resume {}`", task_name(&state.url));
            ExitCode::SUCCESS
        }
        TransferOutcome::CheckpointFailed { error, .. } => {
            error!("progress could not be saved: {error}");
            ExitCode::FAILURE
        }
        TransferOutcome::Abandoned => {
            warn!("Transfer was not resumable, nothing was saved");
            ExitCode::SUCCESS
        }
    }
}

/// Cancels the returned token on Ctrl-C, SIGTERM, SIGHUP or SIGQUIT.
fn interrupt_on_signal() -> Result<CancellationToken> {
    let token = CancellationToken::new();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        let mut hup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
        let mut quit = signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?;
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = term.recv() => {},
                _ = hup.recv() => {},
                _ = quit.recv() => {},
            }
            token.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    Ok(token)
}
