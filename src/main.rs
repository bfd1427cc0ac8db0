use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::{expand_home, AppConfig};
use weft_core::hooks::HookActionSink;
use weft_engine::{TransformRegistry, WorkflowDefinition, WorkflowEngine};
use weft_memory::{SqliteMemory, VectorMemory};

#[derive(Parser)]
#[command(name = "weft", version, about = "Declarative workflow runner for AI-assisted message triage")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    /// Workflow definition (TOML); overrides `engine.workflow_path`
    #[arg(short, long, global = true)]
    workflow: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP webhook gateway
    Serve,
    /// Run the workflow once on a message and print the reply
    Run {
        /// Raw JSON payload instead of a plain message
        #[arg(long)]
        json: Option<String>,
        /// Print the full run report (context and logs)
        #[arg(long)]
        report: bool,
        /// The message text (read from stdin when empty)
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Validate the workflow definition
    Check,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        let home_config = expand_home("~/.weft/config.toml");
        if home_config.exists() {
            AppConfig::load(&home_config)?
        } else {
            info!("No config file found, using environment");
            AppConfig::from_env()
        }
    };
    if let Some(path) = &cli.workflow {
        config.engine.workflow_path = Some(path.display().to_string());
    }

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Check) => {
            let definition = load_definition(&config)?;
            let warnings = definition.validate(&TransformRegistry::with_builtins())?;
            println!(
                "Workflow '{}': {} nodes, {} warning(s)",
                definition.name,
                definition.len(),
                warnings.len()
            );
            for warning in warnings {
                println!("  warning: {}", warning);
            }
        }
        Some(Commands::Run {
            json,
            report,
            message,
        }) => {
            let input = match json {
                Some(raw) => serde_json::from_str(&raw)?,
                None => {
                    let mut text = message.join(" ");
                    if text.is_empty() {
                        io::stdin().read_to_string(&mut text)?;
                    }
                    serde_json::json!({ "message": text.trim() })
                }
            };

            let engine = build_engine(&config)?;
            let outcome = engine.run(input).await;

            if report {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "success": outcome.succeeded(),
                        "response": outcome.reply(&config.replies),
                        "trace_id": outcome.context.trace_id(),
                    }))?
                );
            }
        }
        Some(Commands::Serve) | None => {
            let engine = Arc::new(build_engine(&config)?);
            let server = weft_gateway::GatewayServer::new(
                config.gateway.clone(),
                engine,
                config.replies.clone(),
            );
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
    }

    Ok(())
}

fn load_definition(config: &AppConfig) -> anyhow::Result<WorkflowDefinition> {
    Ok(match &config.engine.workflow_path {
        Some(path) => WorkflowDefinition::load(&expand_home(path))?,
        None => WorkflowDefinition::support_triage(),
    })
}

/// Wire the configured collaborators into an engine. Missing or broken
/// collaborators leave the engine running in degraded mode.
fn build_engine(config: &AppConfig) -> anyhow::Result<WorkflowEngine> {
    let definition = load_definition(config)?;
    info!(workflow = %definition.name, nodes = definition.len(), "Workflow loaded");

    let mut builder = WorkflowEngine::builder(definition)
        .config(&config.engine)
        .replies(config.replies.clone())
        .actions(Arc::new(HookActionSink::new(config.actions.clone())));

    match &config.model {
        Some(model) => match weft_llm::create_gateway(model) {
            Ok(gateway) => {
                info!(provider = %model.provider, model = %model.model_id, "Generative gateway ready");
                builder = builder.generative(Arc::from(gateway));
            }
            Err(e) => warn!(error = %e, "Generative gateway unavailable, running degraded"),
        },
        None => warn!("No [model] configured, generative nodes will use fallbacks"),
    }

    match (&config.embedding, config.memory_configured()) {
        (Some(embedding), true) => match weft_memory::create_provider(embedding) {
            Ok(provider) => {
                let db_path = config.memory.db_path();
                let store = SqliteMemory::open(&db_path)?;
                info!(path = %db_path.display(), "Memory gateway ready");
                builder = builder.memory(Arc::new(VectorMemory::new(provider, store, &config.memory)));
            }
            Err(e) => warn!(error = %e, "Embedding provider unavailable, memory disabled"),
        },
        _ => warn!("Memory not configured, recall and save are disabled"),
    }

    Ok(builder.build()?)
}
