use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crewscout_core::config::AppConfig;
use crewscout_core::error::CrewError;
use crewscout_core::event::EventBus;
use crewscout_core::traits::LlmClient;
use crewscout_core::types::AgentEvent;

use crewscout_agent::{competitor_crew, idea_inputs, CrewExecutor};
use crewscout_tools::{GoogleSearchTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "crewscout", version, about = "Startup competitor intelligence crew")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "crewscout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web front end (default)
    Serve,
    /// Analyze one startup idea and print the report
    Run {
        /// The startup idea
        #[arg(trailing_var_arg = true, required = true)]
        idea: Vec<String>,
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Query the search tool directly
    Search {
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
        /// Number of results
        #[arg(short = 'n', long)]
        num: Option<u32>,
    },
    /// Show current configuration with secrets masked
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crewscout=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "crewscout", &mut std::io::stdout());
        return Ok(());
    }

    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to read .env"),
    }

    let mut config = load_config(&cli.config)?;
    crewscout_llm::apply_preset_defaults(&mut config.model);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.masked())?);
        }
        Commands::Search { query, num } => {
            let tool = GoogleSearchTool::new(&config.search);
            let count = num.unwrap_or(config.search.default_results);
            println!("{}", tool.search(&query.join(" "), count).await);
        }
        Commands::Run { idea, output } => {
            let idea = idea.join(" ");
            if idea.trim().is_empty() {
                anyhow::bail!("Please describe your startup idea");
            }
            let report = run_once(&config, &idea).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &report)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), "Report written");
                }
                None => println!("{report}"),
            }
        }
        Commands::Serve => serve(config).await?,
        Commands::Completions { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// `path` if it exists, else `~/.crewscout/config.toml`, else the environment.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        info!(path = %path.display(), "Loading config");
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = AppConfig::home_config_path().filter(|p| p.exists()) {
        info!(path = %home.display(), "Loading config");
        return Ok(AppConfig::load(&home)?);
    }
    info!("No config file found, using environment variables");
    Ok(AppConfig::from_env())
}

fn build_executor(config: &AppConfig, event_bus: Arc<EventBus>) -> CrewExecutor {
    let llm: Arc<dyn LlmClient> = Arc::from(crewscout_llm::create_client(&config.model));
    let mut tools = ToolRegistry::new();
    tools.register(GoogleSearchTool::new(&config.search));
    info!(tools = ?tools.list(), "Tools registered");
    CrewExecutor::new(config, llm, Arc::new(tools), event_bus)
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let event_bus = Arc::new(EventBus::default());
    let executor = Arc::new(build_executor(&config, event_bus));

    info!(
        bind = %config.gateway.bind,
        model = %config.model.model_id,
        "Starting crewscout"
    );
    let server = crewscout_gateway::GatewayServer::new(
        config.gateway.clone(),
        executor,
        competitor_crew()?,
        config.crew.timeout_secs,
    );

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down gateway...");
        cancel_clone.cancel();
    });

    server.run(cancel).await
}

async fn run_once(config: &AppConfig, idea: &str) -> anyhow::Result<String> {
    let event_bus = Arc::new(EventBus::default());
    let mut rx = event_bus.subscribe();

    let cancel = CancellationToken::new();
    let executor = build_executor(config, event_bus).with_cancel(cancel.clone());

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel.cancel();
    });

    // Progress goes to stderr so stdout carries only the report.
    let print_handle = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                AgentEvent::TaskStarted { task_id, role, .. } => {
                    eprintln!("[{task_id}] {role} working...");
                }
                AgentEvent::ToolStart { name, input, .. } => {
                    eprintln!("  [tool: {name}] {input}");
                }
                AgentEvent::ToolEnd { name, result, .. } if result.is_error => {
                    eprintln!("  [{name}: ERROR] {}", truncate(&result.content, 200));
                }
                AgentEvent::TaskComplete {
                    task_id, elapsed_ms, ..
                } => {
                    eprintln!("[{task_id}] done in {:.1}s", elapsed_ms as f64 / 1000.0);
                }
                AgentEvent::RunComplete { .. } | AgentEvent::RunError { .. } => break,
                _ => {}
            }
        }
    });

    let graph = competitor_crew()?;
    let inputs = idea_inputs(idea);
    let limit = Duration::from_secs(config.crew.timeout_secs);

    let result = match tokio::time::timeout(limit, executor.kickoff(&graph, &inputs)).await {
        Ok(result) => result,
        Err(_) => Err(CrewError::Timeout(config.crew.timeout_secs)),
    };
    print_handle.abort();

    let output = result?;
    Ok(output.aggregate(config.crew.aggregation))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
