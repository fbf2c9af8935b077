//! Command-line front end for attest.
//!
//! Evaluates a document from disk through the evaluation queue, validates
//! checklists, and prints the resolved runtime configuration.

use anyhow::{bail, Context, Result};
use attest_core::{Checklist, EvaluationMode, MergedSummary, ProviderKind, VerdictStatus};
use attest_runtime::providers::ScriptedFactory;
use attest_runtime::{
    ChecklistFile, DocumentPayload, EvaluationProgress, Orchestrator, ProviderRegistry,
    QueueItemState, RuntimeConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Document compliance evaluation against a requirement checklist.
#[derive(Parser, Debug)]
#[command(name = "attest")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one document against a checklist
    Evaluate {
        /// Document to evaluate (PDF, DOCX, image)
        document: PathBuf,

        /// Checklist file (YAML or JSON)
        #[arg(long, short = 'c', env = "ATTEST_CHECKLIST")]
        checklist: PathBuf,

        /// Backend selection: dual, both, openai, claude, gemini
        #[arg(long, short = 'p')]
        provider: Option<String>,

        /// Evaluate only the first N requirements
        #[arg(long)]
        limit: Option<usize>,

        /// Output format
        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        /// Use in-process scripted backends instead of calling any API
        #[arg(long)]
        dry_run: bool,
    },

    /// Parse and validate a checklist
    ValidateChecklist {
        checklist: PathBuf,
    },

    /// Print the configuration resolved from the environment
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn scripted_registry() -> ProviderRegistry {
    [ProviderKind::Claude, ProviderKind::OpenAi, ProviderKind::Gemini]
        .into_iter()
        .fold(ProviderRegistry::new(), |registry, kind| {
            registry.with(Arc::new(ScriptedFactory::new(kind)))
        })
}

async fn evaluate(
    document: PathBuf,
    checklist: PathBuf,
    provider: Option<String>,
    limit: Option<usize>,
    output: OutputFormat,
    dry_run: bool,
) -> Result<MergedSummary> {
    let mut config = RuntimeConfig::from_env().context("Failed to read configuration")?;
    if let Some(provider) = provider {
        config.mode = provider.parse::<EvaluationMode>()?;
    }
    if let Some(limit) = limit {
        config.evaluator.requirement_limit = limit;
    }

    // Fail on a bad checklist before touching any backend.
    Checklist::from_path(&checklist)
        .with_context(|| format!("Invalid checklist {}", checklist.display()))?;

    let registry = if dry_run {
        scripted_registry()
    } else {
        ProviderRegistry::with_defaults()
    };

    let mut builder = Orchestrator::builder(config, Arc::new(ChecklistFile::new(&checklist))).registry(registry);
    if output == OutputFormat::Table {
        builder = builder.on_progress(Arc::new(|p: EvaluationProgress| {
            tracing::info!(
                provider = %p.provider,
                completed = p.completed,
                total = p.total,
                percent = p.percent,
                "Requirement evaluated"
            );
        }));
    }
    let orchestrator = builder.build()?;

    let payload = DocumentPayload::from_path(&document)
        .await
        .with_context(|| format!("Failed to read {}", document.display()))?;
    let job_id = payload.content_hash().chars().take(16).collect::<String>();
    let label = payload.name().to_string();

    orchestrator.start();
    orchestrator.enqueue(job_id.clone(), payload, label)?;

    let item = loop {
        match orchestrator.item_status(&job_id) {
            Some(item) if item.state.is_terminal() => break item,
            Some(_) => tokio::time::sleep(Duration::from_millis(250)).await,
            None => bail!("Job {} disappeared from the queue", job_id),
        }
    };
    orchestrator.stop().await;

    match (item.state, item.result) {
        (QueueItemState::Completed, Some(summary)) => Ok(summary),
        _ => bail!(
            "Evaluation failed: {}",
            item.error_message.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

fn print_table(summary: &MergedSummary) {
    println!(
        "{} ({} mode, {} bytes)",
        summary.document.name, summary.document.mode, summary.document.size_bytes
    );
    println!();
    println!("{:<16} {:<10} {:<8} {:<16} SOURCE", "REQUIREMENT", "STATUS", "CONF", "AGREEMENT");
    for merged in &summary.verdicts {
        let source = match merged.verdict.fallback_provider {
            Some(fallback) => format!("{} (fallback)", fallback),
            None => merged.source_provider.to_string(),
        };
        println!(
            "{:<16} {:<10} {:<8} {:<16} {}",
            merged.requirement_id(),
            merged.status().as_str(),
            merged.verdict.confidence.to_string(),
            format!("{:?}", merged.agreement_status),
            source
        );
    }

    let stats = &summary.statistics;
    println!();
    println!("Compliance score: {:.1}%", stats.compliance_score);
    for status in VerdictStatus::ALL {
        println!("  {:<10} {}", status.as_str(), stats.count(status));
    }
    println!(
        "Tokens: {} (~${:.4}), fallbacks: {}",
        stats.total_tokens, stats.estimated_cost_usd, stats.fallback_count
    );
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Evaluate {
            document,
            checklist,
            provider,
            limit,
            output,
            dry_run,
        } => {
            let summary = evaluate(document, checklist, provider, limit, output, dry_run).await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Table => print_table(&summary),
            }
        }
        Command::ValidateChecklist { checklist } => {
            let parsed = Checklist::from_path(&checklist)
                .with_context(|| format!("Invalid checklist {}", checklist.display()))?;
            println!(
                "{}: {} requirements{}",
                parsed.name,
                parsed.len(),
                parsed
                    .framework_id
                    .as_deref()
                    .map(|f| format!(" (framework {})", f))
                    .unwrap_or_default()
            );
        }
        Command::Config => {
            let config = RuntimeConfig::from_env()?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
