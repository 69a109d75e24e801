//! `mcli` entry point: Java runtime management and supervised game launches.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use mcli_lib::core::config::{default_config_path, JsonConfigStore, RuntimeListStore};
use mcli_lib::core::instance_runner::{InstanceRunner, RunningInstances};
use mcli_lib::core::java::JavaRuntime;
use mcli_lib::core::java_manager::JavaRuntimeRegistry;
use mcli_lib::core::launcher::LaunchCommand;
use mcli_lib::core::ProcessState;
use mcli_lib::logging::init_logging;

#[derive(Parser)]
#[command(name = "mcli")]
#[command(about = "Find Java runtimes and run Minecraft under supervision")]
#[command(version)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directives, e.g. `debug` or `minecraft=info,mcli_lib=debug`
    #[arg(long = "log", global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage known Java runtimes
    #[command(subcommand)]
    Java(JavaCommand),

    /// Start a game command line and stream its output
    Launch {
        /// Working directory of the game
        #[arg(long)]
        dir: PathBuf,
        /// Java executable or home to use
        #[arg(long, conflicts_with = "require")]
        java: Option<PathBuf>,
        /// Required Java major version
        #[arg(long)]
        require: Option<u32>,
        /// Arguments passed to Java
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum JavaCommand {
    /// Show the saved runtimes that are still valid
    List {
        #[arg(long)]
        json: bool,
    },
    /// Search this machine for runtimes and save the result
    Search {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let store = JsonConfigStore::new(cli.config.clone().unwrap_or_else(default_config_path));
    let config = store.config();
    init_logging(cli.log.as_deref().or(config.log_filter.as_deref()));

    let registry = load_registry(&store).await?;
    let auto_search = config.auto_search_java.unwrap_or(true);

    match cli.command {
        Commands::Java(JavaCommand::List { json }) => {
            if registry.is_empty() && config.auto_search_java == Some(true) {
                search(&registry, &store).await?;
            }
            print_runtimes(&registry.get(), json)?;
        }
        Commands::Java(JavaCommand::Search { json }) => {
            search(&registry, &store).await?;
            print_runtimes(&registry.get(), json)?;
        }
        Commands::Launch {
            dir,
            java,
            require,
            args,
        } => {
            let runtime = match java {
                Some(path) => explicit_runtime(&registry, &store, path).await?,
                None => {
                    if registry.best_match(require).is_none() && auto_search {
                        search(&registry, &store).await?;
                    }
                    registry.best_match(require).ok_or_else(|| match require {
                        Some(major) => anyhow!("no Java {major} or newer runtime found"),
                        None => anyhow!("no Java runtime found, run `mcli java search`"),
                    })?
                }
            };
            run(LaunchCommand::for_runtime(&runtime, args, dir)).await?;
        }
    }
    Ok(())
}

async fn search(registry: &Arc<JavaRuntimeRegistry>, store: &JsonConfigStore) -> anyhow::Result<()> {
    registry.refresh();
    registry.wait_for_refresh().await;
    store
        .save_runtime_paths(&registry.runtime_paths())
        .with_context(|| format!("saving runtimes to {}", store.path().display()))
}

/// Probing runs Java, so it stays off the async workers.
async fn load_registry(store: &JsonConfigStore) -> anyhow::Result<Arc<JavaRuntimeRegistry>> {
    let registry = Arc::new(JavaRuntimeRegistry::default());
    let paths = store.load_runtime_paths();
    let loader = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || loader.init(paths)).await??;
    Ok(registry)
}

async fn explicit_runtime(
    registry: &Arc<JavaRuntimeRegistry>,
    store: &JsonConfigStore,
    path: PathBuf,
) -> anyhow::Result<JavaRuntime> {
    if let Some(runtime) = registry.resolve(&path) {
        return Ok(runtime);
    }
    let prober = Arc::clone(registry);
    let runtime =
        tokio::task::spawn_blocking(move || prober.discovery().probe().probe(&path)).await??;
    if registry.add(runtime.clone()) {
        store.save_runtime_paths(&registry.runtime_paths())?;
    }
    Ok(runtime)
}

async fn run(command: LaunchCommand) -> anyhow::Result<()> {
    let instances = RunningInstances::new();
    let process = instances.launch(&command)?;

    let state = tokio::select! {
        state = process.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            process.stop();
            process.wait().await
        }
    };
    info!(pid = process.pid(), ?state, lines = process.logs().len(), "Minecraft instance finished");
    if state == ProcessState::Stopped {
        eprintln!("Stopped.");
    }
    Ok(())
}

fn print_runtimes(runtimes: &[JavaRuntime], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(runtimes)?);
        return Ok(());
    }
    if runtimes.is_empty() {
        println!("No Java runtimes found.");
        return Ok(());
    }
    for runtime in runtimes {
        let bits = runtime
            .platform()
            .bits
            .bits()
            .map(|bits| format!("{bits}-bit"))
            .unwrap_or_else(|| "unknown arch".to_string());
        println!(
            "{runtime}  [{}, {}]",
            runtime.version_name().unwrap_or("?"),
            bits
        );
    }
    Ok(())
}
