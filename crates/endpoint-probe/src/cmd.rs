use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use endpoint_resolver::{
    EndpointStateStore, Error, GraphQlConfig, MemoryStorage, StaticPage, StoreContext,
    StoreOptions, TokenStorage, WsProbe, find_first_valid, generate_candidates,
    normalize::is_realtime_url, probe::probe,
};
use serde::Serialize;

use crate::config::{self, LoadedConfig};
use crate::error::{CliError, CliResult};
use crate::storage::FileStorage;

/// Options shared by every command.
pub struct Globals {
    pub config: Option<PathBuf>,
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct ResolveArgs {
    /// URL of the page the client is served from; its query parameters apply
    #[arg(long, default_value = "http://localhost:3000/")]
    pub page: String,

    /// Explicit endpoint, overrides the page URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Explicit subscription endpoint (absolute or root-relative)
    #[arg(long)]
    pub subscription_endpoint: Option<String>,

    /// Environment to switch to after the initial resolution
    #[arg(long)]
    pub env: Option<String>,

    /// Project of --env
    #[arg(long, requires = "env")]
    pub project: Option<String>,

    /// Platform token, overrides the stored one
    #[arg(long)]
    pub platform_token: Option<String>,

    /// JSON file persisting the platform token between runs
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Wait for subscription endpoint discovery before printing
    #[arg(long)]
    pub wait: bool,
}

pub async fn run_resolve(globals: &Globals, args: ResolveArgs) -> CliResult<()> {
    // An unusable config resolves as if none was given.
    let (config, config_string) = match config::load_or_find(globals.config.as_deref()).await {
        Ok(Some(LoadedConfig { config, text, .. })) => (Some(config), Some(text)),
        Ok(None) => (None, None),
        Err(e) => {
            tracing::warn!("Ignoring graphql config: {e}");
            (None, None)
        }
    };

    let page = Arc::new(StaticPage::new(args.page));
    let storage: Arc<dyn TokenStorage> = match args.state_file {
        Some(path) => Arc::new(FileStorage::new(path)),
        None => Arc::new(MemoryStorage::new()),
    };
    let context = StoreContext::new(page.clone(), storage)
        .with_prober(Arc::new(WsProbe::new(globals.timeout)));

    let mut store = EndpointStateStore::new(
        StoreOptions {
            endpoint: args.endpoint,
            endpoint_url: None,
            subscription_endpoint: args.subscription_endpoint,
            config,
            config_string,
            platform_token: args.platform_token,
        },
        context,
    )?;
    for url in page.replaced() {
        tracing::info!(%url, "Page location rewritten");
    }

    if let Some(env) = &args.env {
        store.select_environment(env, args.project.as_deref())?;
    }

    let state = if args.wait {
        store.wait_for_discovery().await
    } else {
        store.current()
    };
    println!("{}", serde_json::to_string_pretty(&*state)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// envs
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct EnvsArgs {
    /// Print JSON instead of one line per environment
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct EnvEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub env: String,
    pub endpoint: String,
}

/// Every declared environment: top-level ones first, then per project, in
/// declaration order.
pub fn list_environments(config: &GraphQlConfig) -> Vec<EnvEntry> {
    let mut entries = Vec::new();
    let mut push = |project: Option<&str>| {
        if let Some(envs) = endpoint_resolver::config::environments(config, project) {
            for (env, endpoint) in envs.iter() {
                entries.push(EnvEntry {
                    project: project.map(str::to_string),
                    env: env.to_string(),
                    endpoint: endpoint.to_endpoints().endpoint,
                });
            }
        }
    };

    push(None);
    if let Some(projects) = &config.projects {
        for (name, _) in projects.iter() {
            push(Some(name));
        }
    }
    entries
}

pub async fn run_envs(globals: &Globals, args: EnvsArgs) -> CliResult<()> {
    let Some(loaded) = config::load_or_find(globals.config.as_deref()).await? else {
        return Err(CliError::Config("no graphql config file found".to_string()));
    };
    tracing::debug!(path = %loaded.path.display(), "Listing environments");

    let entries = list_environments(&loaded.config);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        match &entry.project {
            Some(project) => println!("{project}/{}\t{}", entry.env, entry.endpoint),
            None => println!("{}\t{}", entry.env, entry.endpoint),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// candidates / probe / discover
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct CandidatesArgs {
    /// HTTP(S) GraphQL endpoint
    pub endpoint: String,
}

pub fn run_candidates(args: CandidatesArgs) {
    for candidate in generate_candidates(&args.endpoint) {
        println!("{candidate}");
    }
}

#[derive(Args)]
pub struct ProbeArgs {
    /// ws:// or wss:// URL to probe
    pub url: String,
}

pub async fn run_probe(globals: &Globals, args: ProbeArgs) -> CliResult<ExitCode> {
    if !is_realtime_url(&args.url) {
        return Err(Error::NotRealtime(args.url).into());
    }
    if probe(&args.url, globals.timeout).await {
        println!("{}: acknowledged", args.url);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}: no acknowledgement", args.url);
        Ok(ExitCode::FAILURE)
    }
}

#[derive(Args)]
pub struct DiscoverArgs {
    /// HTTP(S) GraphQL endpoint
    pub endpoint: String,
}

pub async fn run_discover(globals: &Globals, args: DiscoverArgs) -> ExitCode {
    let candidates = generate_candidates(&args.endpoint);
    match find_first_valid(&candidates, globals.timeout).await {
        Some(url) => {
            println!("{url}");
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("no subscription endpoint found among {} candidates", candidates.len());
            ExitCode::FAILURE
        }
    }
}
