//! scriptproxy CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scriptproxy_config::{load_or_default, Config, LogFormat};
use scriptproxy_runtime::{ShutdownSignal, SignalHandler};
use scriptproxy_scripting::prelude::*;
use scriptproxy_scripting::{ReloadOutcome, RequestDescriptor};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "scriptproxy")]
#[command(about = "Scriptable request/response filter engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SCRIPTPROXY_CONFIG",
        default_value = "scriptproxy.yaml"
    )]
    config: PathBuf,

    /// Override the proxy listen address
    #[arg(long, global = true, env = "SCRIPTPROXY_LISTEN")]
    listen: Option<SocketAddr>,

    /// Log every gate decision and rewrite at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the script directory
    #[arg(long, global = true, env = "SCRIPTPROXY_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the scripts and hot-reload them until interrupted
    Watch,

    /// Validate script files
    Check {
        /// Role of FILE (request or response)
        #[arg(short, long, value_parser = parse_role, requires = "file")]
        role: Option<ScriptRole>,

        /// Script file to check instead of the configured ones
        file: Option<PathBuf>,
    },

    /// Run the request script against a synthetic request
    Gate {
        /// Request URL
        #[arg(long)]
        url: String,

        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request header as 'Name: value' (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Run the response script over a file and print the result
    Rewrite {
        /// File holding the response body text
        file: PathBuf,
    },

    /// Show version information
    Version,
}

fn parse_role(s: &str) -> std::result::Result<ScriptRole, String> {
    ScriptRole::from_name(s).ok_or_else(|| format!("unknown role '{s}' (use request or response)"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("scriptproxy {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = load_or_default(Some(&cli.config))
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    apply_overrides(&mut config, &cli);

    init_tracing(&config)?;

    match cli.command {
        Commands::Watch => watch(config).await,
        Commands::Check { role, file } => check(&config, role, file.as_deref()).await,
        Commands::Gate {
            url,
            method,
            headers,
        } => gate(&config, &url, &method, &headers).await,
        Commands::Rewrite { file } => rewrite(&config, &file).await,
        Commands::Version => Ok(ExitCode::SUCCESS),
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(listen) = cli.listen {
        config.proxy.listen = listen;
    }
    if cli.verbose {
        config.proxy.verbose = true;
    }
    if let Some(dir) = &cli.scripts_dir {
        config.scripts.dir = dir.clone();
    }
}

/// Store, filter and supervisor wired from configuration
struct Engine {
    factory: Arc<dyn EngineFactory>,
    filter: Arc<ScriptFilter>,
    supervisor: Arc<ReloadSupervisor>,
}

impl Engine {
    fn new(config: &Config) -> Self {
        let store = Arc::new(ScriptStore::new());
        let factory: Arc<dyn EngineFactory> =
            Arc::new(RhaiEngineFactory::with_limits(config.scripts.limits.clone()));

        let mut filter = ScriptFilter::new(Arc::clone(&store), Arc::clone(&factory))
            .with_verbose(config.proxy.verbose);
        if !config.scripts.cache_engines {
            filter = filter.without_cache();
        }
        let filter = Arc::new(filter);

        let supervisor = Arc::new(
            ReloadSupervisor::new(store, Arc::clone(&factory), config.scripts.paths())
                .with_filter(Arc::clone(&filter))
                .with_poll_interval(config.scripts.poll_interval),
        );

        Self {
            factory,
            filter,
            supervisor,
        }
    }
}

async fn watch(config: Config) -> Result<ExitCode> {
    tracing::info!(
        listen = %config.proxy.listen,
        scripts = %config.scripts.dir.display(),
        watch = config.scripts.watch,
        cache_engines = config.scripts.cache_engines,
        "Starting scriptproxy filter engine"
    );

    let engine = Engine::new(&config);
    engine.supervisor.load_initial().await;

    let shutdown = ShutdownSignal::new();
    let mut listener = shutdown.subscribe();

    let supervisor = if config.scripts.watch {
        let handle = Arc::clone(&engine.supervisor)
            .spawn(shutdown.subscribe())
            .context("Failed to start script watcher")?;
        Some(handle)
    } else {
        tracing::info!("Script watching disabled");
        None
    };

    tokio::spawn(async move {
        if let Err(e) = SignalHandler::new(shutdown).run().await {
            tracing::error!(error = %e, "Signal handler failed");
        }
    });

    listener.wait().await;

    if let Some(handle) = supervisor {
        handle.await.context("Script watcher task failed")?;
    }

    if let Some(stats) = engine.filter.cache_stats() {
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate(),
            "Engine cache statistics"
        );
    }
    tracing::info!("scriptproxy stopped");
    Ok(ExitCode::SUCCESS)
}

async fn check(config: &Config, role: Option<ScriptRole>, file: Option<&Path>) -> Result<ExitCode> {
    let engine = Engine::new(config);

    if let Some(file) = file {
        let Some(role) = role.or_else(|| infer_role(config, file)) else {
            bail!(
                "Cannot tell the role of {} from its name, pass --role request|response",
                file.display()
            );
        };
        let source = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;

        return Ok(match engine.factory.build(&source, role.entry_point()) {
            Ok(_) => {
                println!("OK    {role:<8} {}", file.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("FAIL  {role:<8} {}: {e}", file.display());
                ExitCode::FAILURE
            }
        });
    }

    let mut failed = false;
    for role in ScriptRole::ALL {
        let path = engine.supervisor.paths().path(role);
        if !path.exists() {
            println!("SKIP  {role:<8} {} (not found, default in use)", path.display());
            continue;
        }

        let event = engine.supervisor.reload(role).await;
        match event.outcome {
            ReloadOutcome::Rejected { error } => {
                failed = true;
                println!("FAIL  {role:<8} {}: {error}", path.display());
            }
            _ => println!("OK    {role:<8} {}", path.display()),
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Role of a script file named like one of the configured script files
fn infer_role(config: &Config, file: &Path) -> Option<ScriptRole> {
    let name = file.file_name()?;
    if config.scripts.request_file.file_name() == Some(name) {
        Some(ScriptRole::RequestGate)
    } else if config.scripts.response_file.file_name() == Some(name) {
        Some(ScriptRole::ResponseRewriter)
    } else {
        None
    }
}

async fn gate(config: &Config, url: &str, method: &str, headers: &[String]) -> Result<ExitCode> {
    let mut builder = http::Request::builder().method(method).uri(url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header '{header}', expected 'Name: value'"))?;
        builder = builder.header(name.trim(), value.trim());
    }
    let request = builder.body(()).context("Invalid request")?;

    let engine = Engine::new(config);
    engine.supervisor.load_initial().await;

    let descriptor = RequestDescriptor::from_request(&request);
    tracing::debug!(request = %serde_json::to_string(&descriptor)?, "Evaluating request gate");

    if engine.filter.evaluate_request_gate(&descriptor) {
        println!("ALLOW");
    } else {
        println!("BLOCK");
    }
    Ok(ExitCode::SUCCESS)
}

async fn rewrite(config: &Config, file: &Path) -> Result<ExitCode> {
    let body = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let engine = Engine::new(config);
    engine.supervisor.load_initial().await;

    print!("{}", engine.filter.evaluate_response_rewriter(&body));
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_level(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    Ok(())
}
