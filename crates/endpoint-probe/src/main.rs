mod cmd;
mod config;
mod error;
mod storage;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let secs = d.as_secs();
        let millis = d.subsec_millis();
        write!(w, "[{secs:>3}.{millis:03}s]")
    }
}

#[derive(Parser)]
#[command(name = "endpoint-probe", version)]
struct Cli {
    /// graphql-config file; defaults to .graphqlconfig[.yml|.yaml] in the working directory
    #[arg(long, short, global = true, env = "GRAPHQL_CONFIG")]
    config: Option<PathBuf>,

    /// Handshake timeout per candidate, in milliseconds
    #[arg(long, global = true, env = "ENDPOINT_PROBE_TIMEOUT_MS", default_value_t = 1000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the endpoint state and print it as JSON
    Resolve(Box<cmd::ResolveArgs>),
    /// List the environments declared in the config
    Envs(cmd::EnvsArgs),
    /// Print the subscription endpoint candidates of an endpoint
    Candidates(cmd::CandidatesArgs),
    /// Check one ws:// or wss:// URL for a graphql-ws handshake
    Probe(cmd::ProbeArgs),
    /// Probe the candidates of an endpoint and print the first that answers
    Discover(cmd::DiscoverArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let globals = cmd::Globals {
        config: cli.config,
        timeout: Duration::from_millis(cli.timeout_ms),
    };

    let result = match cli.command {
        Command::Resolve(args) => cmd::run_resolve(&globals, *args)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Envs(args) => cmd::run_envs(&globals, args)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Candidates(args) => {
            cmd::run_candidates(args);
            Ok(ExitCode::SUCCESS)
        }
        Command::Probe(args) => cmd::run_probe(&globals, args).await,
        Command::Discover(args) => Ok(cmd::run_discover(&globals, args).await),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
