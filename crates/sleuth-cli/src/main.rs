//! CLI binary for running Sleuth research graphs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;

use sleuth_graph::{
    build_research_graph, research_overrides, Collaborators, EventEmitter, Executor, RunConfig,
    RunEvent, RunResult, StageGraph, StageSettings, Termination,
};
use sleuth_llm::{DynProvider, OpenAiAdapter};
use sleuth_tools::{HttpScraper, SerperSearch};
use sleuth_types::{channels, ResearchConfig};

#[derive(Parser)]
#[command(name = "sleuth", version, about = "Web research agent graph runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a question and print the final report
    Run {
        /// The research question
        question: String,

        /// Maximum number of stage invocations (overrides `run.max_steps`)
        #[arg(long)]
        max_steps: Option<usize>,

        /// Write the final state record as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tenant identifier recorded on the state record
        #[arg(long)]
        tenant: Option<String>,

        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,

        #[arg(long, env = "SERPER_API_KEY", hide_env_values = true)]
        serper_api_key: Option<String>,
    },

    /// Print the research graph as a Mermaid flowchart
    Graph,

    /// Validate and print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            question,
            max_steps,
            output,
            tenant,
            openai_api_key,
            serper_api_key,
        } => {
            let keys = ApiKeys {
                openai: openai_api_key,
                serper: serper_api_key,
            };
            cmd_run(&config, &keys, &question, max_steps, output.as_deref(), tenant.as_deref()).await?;
        }
        Commands::Graph => cmd_graph(&config)?,
        Commands::Config => cmd_config(&config)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ResearchConfig> {
    let config = match path {
        Some(p) => ResearchConfig::load(p)?,
        None => ResearchConfig::default(),
    };
    Ok(config)
}

struct ApiKeys {
    openai: Option<String>,
    serper: Option<String>,
}

fn collaborators(config: &ResearchConfig, keys: &ApiKeys) -> anyhow::Result<Collaborators> {
    let mut openai = OpenAiAdapter::new(keys.openai.clone().unwrap_or_default())
        .with_default_model(config.model.model.clone());
    if let Some(endpoint) = &config.model.model_endpoint {
        openai = openai.with_base_url(endpoint.clone());
    }
    let search = SerperSearch::new(keys.serper.clone().unwrap_or_default())
        .with_endpoint(config.search.endpoint.clone());
    let scraper = HttpScraper::new(&config.scraper)?;

    Ok(Collaborators {
        provider: DynProvider::new(openai),
        search: Arc::new(search),
        scraper: Arc::new(scraper),
    })
}

fn research_graph(config: &ResearchConfig, keys: &ApiKeys) -> anyhow::Result<StageGraph> {
    let graph = build_research_graph(collaborators(config, keys)?, StageSettings::from_config(config))?;
    Ok(graph)
}

async fn cmd_run(
    config: &ResearchConfig,
    keys: &ApiKeys,
    question: &str,
    max_steps: Option<usize>,
    output: Option<&Path>,
    tenant: Option<&str>,
) -> anyhow::Result<()> {
    if keys.openai.is_none() {
        anyhow::bail!("OPENAI_API_KEY is not set (pass --openai-api-key or set it in the environment)");
    }
    if keys.serper.is_none() {
        anyhow::bail!("SERPER_API_KEY is not set (pass --serper-api-key or set it in the environment)");
    }

    let bound = max_steps.unwrap_or(config.run.max_steps);
    let graph = research_graph(config, keys)?;
    let session_id = uuid::Uuid::new_v4().to_string();

    println!("Researching: {question}");
    println!("Session: {session_id}");
    println!("Step limit: {bound}");

    let events = EventEmitter::default();
    let printer = spawn_progress(events.subscribe());
    let mut executor = Executor::new(graph, RunConfig::new(bound)?).with_events(events);

    let result = executor
        .run(research_overrides(question, tenant, Some(&session_id)))
        .await;
    drop(executor);
    let _ = printer.await;

    print_outcome(&result);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&result.record)?;
        std::fs::write(path, json)?;
        println!("State written to {}", path.display());
    }

    Ok(())
}

/// Print run events until the emitter is dropped. Returns how many were printed.
fn spawn_progress(mut events: Receiver<RunEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut printed = 0;
        loop {
            match events.recv().await {
                Ok(event) => {
                    print_event(&event);
                    printed += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress printer fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        printed
    })
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::StageStarted { stage, step } => println!("[{step:>3}] {stage}"),
        RunEvent::StageCompleted {
            stage, duration_ms, ..
        } => tracing::debug!(stage = %stage, duration_ms, "Stage finished"),
        RunEvent::RouteResolved { from, to } if from == "router" => println!("      router -> {to}"),
        _ => {}
    }
}

fn print_outcome(result: &RunResult) {
    println!();
    match &result.termination {
        Termination::Terminal { from } => println!("Run finished after {} steps (last stage: {from})", result.steps),
        Termination::NoOutgoingEdge { from } => {
            println!("Run stopped after {} steps: stage '{from}' has no outgoing edge", result.steps)
        }
        Termination::BoundExceeded { bound } => println!("Run cut off at the step limit of {bound}"),
    }

    if let Some(report) = result.record.last(channels::FINAL_REPORTS) {
        println!("\n{}", report.str_field("report").unwrap_or_else(|| report.as_text()));
    } else if let Some(report) = result.record.last(channels::REPORTER).filter(|e| !e.is_error()) {
        println!("\nLatest draft (not approved by review):\n");
        println!("{}", report.str_field("report").unwrap_or_else(|| report.as_text()));
    }

    let diagnostics: Vec<_> = channels::ALL
        .iter()
        .flat_map(|name| result.record.channel(name).iter().map(move |e| (*name, e)))
        .filter(|(_, e)| e.is_error())
        .collect();
    if !diagnostics.is_empty() {
        println!("\nDiagnostics:");
        for (channel, entry) in diagnostics {
            println!(
                "  [{}] {}: {}",
                entry.error_kind().unwrap_or("error"),
                channel,
                entry.as_text()
            );
        }
    }
}

fn cmd_graph(config: &ResearchConfig) -> anyhow::Result<()> {
    let keys = ApiKeys {
        openai: None,
        serper: None,
    };
    print!("{}", research_graph(config, &keys)?.to_mermaid());
    Ok(())
}

fn cmd_config(config: &ResearchConfig) -> anyhow::Result<()> {
    config.validate()?;
    print!("{}", config.to_toml()?);
    Ok(())
}
