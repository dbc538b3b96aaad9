//! docflow CLI: run analysis workers and drive the review workflow.

use docflow::analyzer::Analyzer;
use docflow::clock::SystemClock;
use docflow::config::Config;
use docflow::config::secrets::ExposeSecret;
use docflow::content::FsContentSource;
use docflow::db::Db;
use docflow::engine::{AttemptRunner, Claimer, WorkerPool, worker_prefix};
use docflow::llm::{LlmAnalyzer, anthropic_client};
use docflow::model::{Commit, DocumentId, FieldMapping, NewDocument};
use docflow::service::{AnalysisService, RequestOutcome};
use docflow::store::DocumentStore;
use docflow::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docflow", about = "Document analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run analysis worker loops until Ctrl-C
    Worker {
        /// Number of concurrent worker loops in this process
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Document operations
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },
    /// Analysis review operations
    Analysis {
        #[command(subcommand)]
        action: AnalysisAction,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Register an uploaded file
    Add {
        /// Path of the file relative to UPLOAD_DIR
        content_ref: String,
        /// Original filename (defaults to the last path segment)
        #[arg(long)]
        filename: Option<String>,
        /// Metadata entries as key=value
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },
    /// List documents
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a document
    Show {
        /// Document ID (full UUID or prefix)
        id: String,
    },
    /// Delete a document
    Rm {
        id: String,
    },
}

#[derive(Subcommand)]
enum AnalysisAction {
    /// Queue a document for analysis
    Request { id: String },
    /// Show analysis status and result
    Show { id: String },
    /// Commit the analysis into document metadata
    Commit {
        id: String,
        /// TOML field mapping file
        #[arg(long)]
        mapping: Option<PathBuf>,
        /// Store the whole result under this metadata key
        #[arg(long)]
        nest: Option<String>,
        /// Reviewer-edited result (JSON) replacing the produced one
        #[arg(long)]
        edited: Option<String>,
    },
    /// Discard the analysis
    Discard { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "docflow".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    let store: Arc<dyn DocumentStore> = Arc::new(db);

    match cli.command {
        Command::Worker { concurrency } => cmd_worker(&config, store, concurrency).await,
        Command::Doc { action } => {
            let service = AnalysisService::new(store, Arc::new(SystemClock));
            match action {
                DocAction::Add {
                    content_ref,
                    filename,
                    meta,
                } => cmd_doc_add(&service, content_ref, filename, meta).await,
                DocAction::List { limit } => cmd_doc_list(&service, limit).await,
                DocAction::Show { id } => cmd_doc_show(&service, &id).await,
                DocAction::Rm { id } => {
                    let id = resolve_id(&service, &id).await?;
                    service.delete_document(id).await?;
                    println!("Deleted {}", id.0);
                    Ok(())
                }
            }
        }
        Command::Analysis { action } => {
            let service = AnalysisService::new(store, Arc::new(SystemClock));
            match action {
                AnalysisAction::Request { id } => cmd_analysis_request(&service, &id).await,
                AnalysisAction::Show { id } => cmd_analysis_show(&service, &id).await,
                AnalysisAction::Commit {
                    id,
                    mapping,
                    nest,
                    edited,
                } => cmd_analysis_commit(&service, &id, mapping, nest, edited).await,
                AnalysisAction::Discard { id } => {
                    let id = resolve_id(&service, &id).await?;
                    let doc = service.discard(id).await?;
                    println!("Discarded analysis for {} ({})", doc.id.0, doc.analysis.status);
                    Ok(())
                }
            }
        }
    }
}

async fn cmd_worker(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    concurrency: usize,
) -> anyhow::Result<()> {
    if concurrency == 0 {
        anyhow::bail!("--concurrency must be at least 1");
    }

    let client = anthropic_client(config.require_anthropic_key()?)?;
    let analyzer: Arc<dyn Analyzer> =
        Arc::new(LlmAnalyzer::new(client, config.analysis_model.clone()));
    let content = Arc::new(FsContentSource::new(config.upload_dir.clone()));

    let claimer = Claimer::new(store, Arc::new(SystemClock), config.worker.clone());
    let runner = AttemptRunner::new(content, analyzer, config.worker.analysis_timeout);

    let pool = WorkerPool::spawn(concurrency, &worker_prefix(), claimer, runner);

    let shutdown = pool.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown requested");
        shutdown.trigger();
    });

    pool.join().await;
    Ok(())
}

async fn cmd_doc_add(
    service: &AnalysisService,
    content_ref: String,
    filename: Option<String>,
    meta: Vec<String>,
) -> anyhow::Result<()> {
    let filename = filename.unwrap_or_else(|| {
        content_ref
            .rsplit('/')
            .next()
            .unwrap_or(content_ref.as_str())
            .to_string()
    });

    let mut new = NewDocument::new(filename, content_ref.clone());
    for entry in meta {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("metadata must be KEY=VALUE, got {entry:?}"))?;
        new = new.meta(key.trim(), value.trim());
    }

    let doc = service.create_document(new).await?;
    println!("Created document {}", doc.id.0);
    Ok(())
}

async fn cmd_doc_list(service: &AnalysisService, limit: usize) -> anyhow::Result<()> {
    let docs = service.list_documents(limit).await?;

    if docs.is_empty() {
        println!("No documents found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<30}  {:<16}  {:<4}  CREATED",
        "ID", "FILENAME", "ANALYSIS", "TRY"
    );
    println!("{}", "-".repeat(84));

    for doc in &docs {
        let name = if doc.filename.chars().count() > 30 {
            doc.filename.chars().take(30).collect::<String>()
        } else {
            doc.filename.clone()
        };
        println!(
            "{:<8}  {:<30}  {:<16}  {:<4}  {}",
            doc.id,
            name,
            doc.analysis.status,
            doc.analysis.attempt_count,
            doc.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} document(s)", docs.len());
    Ok(())
}

async fn cmd_doc_show(service: &AnalysisService, id: &str) -> anyhow::Result<()> {
    let id = resolve_id(service, id).await?;
    let doc = service.get_document(id).await?;

    println!("ID:         {}", doc.id.0);
    println!("Filename:   {}", doc.filename);
    println!("Content:    {}", doc.content_ref);
    println!("Metadata:   {}", serde_json::to_string_pretty(&doc.metadata)?);
    println!("Analysis:   {}", doc.analysis.status);
    println!("Attempts:   {}", doc.analysis.attempt_count);
    if let Some(ref owner) = doc.analysis.claim_owner {
        println!("Claimed By: {owner}");
    }
    if let Some(deadline) = doc.analysis.claim_deadline {
        println!("Deadline:   {deadline}");
    }
    println!("Created:    {}", doc.created_at);
    println!("Updated:    {}", doc.updated_at);
    Ok(())
}

async fn cmd_analysis_request(service: &AnalysisService, id: &str) -> anyhow::Result<()> {
    let id = resolve_id(service, id).await?;
    match service.request_analysis(id).await? {
        RequestOutcome::Queued(doc) => println!("Queued {} for analysis", doc.id.0),
        RequestOutcome::AlreadyQueued(doc) => {
            println!("Already queued: {} is {}", doc.id.0, doc.analysis.status)
        }
    }
    Ok(())
}

async fn cmd_analysis_show(service: &AnalysisService, id: &str) -> anyhow::Result<()> {
    let id = resolve_id(service, id).await?;
    let view = service.analysis(id).await?;

    println!("Document:   {}", view.document_id.0);
    println!("Status:     {}", view.status);
    println!("Attempts:   {}", view.attempts);
    println!("Updated:    {}", view.last_updated);
    if let Some(ref error) = view.error {
        println!("Error:      {error}");
    }
    if let Some(ref result) = view.result {
        println!("---");
        println!("{}", serde_json::to_string_pretty(result)?);
    }
    Ok(())
}

async fn cmd_analysis_commit(
    service: &AnalysisService,
    id: &str,
    mapping: Option<PathBuf>,
    nest: Option<String>,
    edited: Option<String>,
) -> anyhow::Result<()> {
    let id = resolve_id(service, id).await?;

    let mut field_mapping = match mapping {
        Some(path) => FieldMapping::from_toml_str(&std::fs::read_to_string(&path)?)?,
        None => FieldMapping::new(),
    };
    if let Some(key) = nest {
        field_mapping = field_mapping.nest(key);
    }
    if field_mapping.is_empty() {
        anyhow::bail!("nothing to commit: pass --mapping and/or --nest");
    }

    let mut commit = Commit::new(field_mapping);
    if let Some(json) = edited {
        commit = commit.edited(serde_json::from_str(&json)?);
    }

    let doc = service.commit(id, commit).await?;
    println!("Committed analysis for {}", doc.id.0);
    println!("Metadata:   {}", serde_json::to_string_pretty(&doc.metadata)?);
    Ok(())
}

/// Accept a full UUID or a unique prefix of a recent document's ID.
async fn resolve_id(service: &AnalysisService, id_str: &str) -> anyhow::Result<DocumentId> {
    if id_str.len() >= 36 {
        return Ok(id_str.parse()?);
    }

    let docs = service.list_documents(500).await?;
    let matches: Vec<_> = docs
        .iter()
        .filter(|doc| doc.id.0.to_string().starts_with(id_str))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no document matching prefix '{id_str}'"),
        1 => Ok(matches[0].id),
        n => anyhow::bail!("{n} documents match prefix '{id_str}', be more specific"),
    }
}
