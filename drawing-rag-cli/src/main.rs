//! # drawing-rag CLI
//!
//! Ingest construction drawing PDFs into a Pinecone namespace and ask
//! questions about them.
//!
//! ## Commands
//!
//! - `drawing-rag ingest [PATH...]` - ingest PDFs or directories (default: the data dir)
//! - `drawing-rag ask <QUERY>` - answer a question from the ingested drawings
//! - `drawing-rag clear` - delete every vector in the namespace
//! - `drawing-rag init-index` - create the Pinecone index if it does not exist
//!
//! ## Examples
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! export PINECONE_API_KEY=pc-...
//!
//! drawing-rag init-index
//! drawing-rag --namespace tower-a ingest data/raw/architectural
//! drawing-rag --namespace tower-a ask "what is the wall width on A-101?"
//! drawing-rag ask "and the parapet height?" --history turns.json --format json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drawing_rag::openai::{OpenAIChatModel, OpenAIEmbeddingProvider};
use drawing_rag::pinecone::{IndexSpec, PineconeVectorStore};
use drawing_rag::{
    ConversationTurn, DrawingRagService, IngestReport, QueryAnswer, TesseractOcr, VectorStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod settings;

use settings::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "drawing-rag")]
#[command(about = "Question answering over construction PDF drawings")]
#[command(version)]
struct Cli {
    /// Settings file (default: ./drawing-rag.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `drawing_rag=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Vector store namespace
    #[arg(short, long, global = true, env = "PINECONE_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, global = true, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Pinecone data-plane host; looked up from the index name when unset
    #[arg(long, global = true, env = "PINECONE_INDEX_HOST")]
    pinecone_index_host: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest PDF files and directories
    Ingest {
        /// PDFs or directories to ingest (default: the configured data dir)
        paths: Vec<PathBuf>,

        /// Directory ingested when no paths are given
        #[arg(long, env = "DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Ask a question about the ingested drawings
    Ask {
        query: String,

        /// Number of chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// JSON file with prior turns: [{"role": "user", "text": "..."}, ...]
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Delete every vector in the namespace
    Clear,

    /// Create the Pinecone index if it does not exist
    InitIndex,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut settings = Settings::load(cli.config.as_deref())?;
    let data_dir = match &cli.command {
        Commands::Ingest { data_dir, .. } => data_dir.clone(),
        _ => None,
    };
    settings.apply(Overrides {
        openai_api_key: cli.openai_api_key,
        pinecone_api_key: cli.pinecone_api_key,
        pinecone_index_host: cli.pinecone_index_host,
        namespace: cli.namespace,
        data_dir,
    });

    match cli.command {
        Commands::InitIndex => init_index(&settings).await,
        Commands::Clear => {
            let service = build_service(&settings).await?;
            service.clear_namespace(Some(settings.pinecone.namespace.as_str())).await?;
            println!("Cleared namespace '{}'", settings.pinecone.namespace);
            Ok(())
        }
        Commands::Ingest { paths, .. } => {
            let service = build_service(&settings).await?;
            let report = ingest(&service, &settings, &paths).await?;
            print_report(&report, cli.format)
        }
        Commands::Ask { query, top_k, history } => {
            let history = match history {
                Some(path) => load_history(&path)?,
                None => Vec::new(),
            };
            let service = build_service(&settings).await?;
            let answer = service
                .answer_query(&query, top_k, Some(settings.pinecone.namespace.as_str()), &history)
                .await?;
            print_answer(&answer, cli.format)
        }
    }
}

async fn init_index(settings: &Settings) -> Result<()> {
    let spec = IndexSpec {
        name: settings.pinecone.index_name.clone(),
        dimension: settings.openai.embedding_dim,
        metric: settings.pinecone.metric,
        cloud: settings.pinecone.cloud.clone(),
        region: settings.pinecone.region.clone(),
    };
    let created = PineconeVectorStore::ensure_index(settings.pinecone_api_key()?, &spec).await?;
    if created {
        println!("Created Pinecone index: {}", spec.name);
    } else {
        println!("Pinecone index already exists: {}", spec.name);
    }
    Ok(())
}

async fn build_service(settings: &Settings) -> Result<DrawingRagService> {
    let openai_key = settings.openai_api_key()?;
    let openai_timeout = Duration::from_secs(settings.openai.timeout_secs);

    let embedder = OpenAIEmbeddingProvider::new(openai_key)?
        .with_model(&settings.openai.embedding_model)
        .with_dimensions(settings.openai.embedding_dim)
        .with_timeout(openai_timeout)?;
    let chat = OpenAIChatModel::new(openai_key)?
        .with_model(&settings.openai.chat_model)
        .with_temperature(settings.openai.temperature)
        .with_timeout(openai_timeout)?;

    let pinecone_key = settings.pinecone_api_key()?;
    let store: Arc<dyn VectorStore> = match &settings.pinecone.index_host {
        Some(host) => Arc::new(PineconeVectorStore::with_timeout(
            pinecone_key,
            host,
            Duration::from_secs(settings.pinecone.timeout_secs),
        )?),
        None => Arc::new(
            PineconeVectorStore::connect(pinecone_key, &settings.pinecone.index_name)
                .await
                .context("failed to resolve the Pinecone index host")?,
        ),
    };

    let ocr = TesseractOcr::new()
        .with_binary(&settings.ocr.tesseract)
        .with_language(&settings.ocr.language);

    let service = DrawingRagService::builder()
        .config(settings.rag.clone())
        .embedding_provider(Arc::new(embedder))
        .vector_store(store)
        .chat_model(Arc::new(chat))
        .ocr_engine(Arc::new(ocr))
        .default_namespace(&settings.pinecone.namespace)
        .build()?;
    Ok(service)
}

/// Files are ingested as one batch; directories are expanded first.
async fn ingest(
    service: &DrawingRagService,
    settings: &Settings,
    paths: &[PathBuf],
) -> Result<IngestReport> {
    let namespace = Some(settings.pinecone.namespace.as_str());
    if paths.is_empty() {
        info!(dir = %settings.data.dir.display(), "no paths given, ingesting data dir");
        return Ok(service.ingest_dir(&settings.data.dir, namespace).await?);
    }

    let (dirs, files): (Vec<&PathBuf>, Vec<&PathBuf>) = paths.iter().partition(|p| p.is_dir());
    let mut report = IngestReport { namespace: settings.pinecone.namespace.clone(), ..Default::default() };
    if !files.is_empty() {
        let files: Vec<PathBuf> = files.into_iter().cloned().collect();
        merge(&mut report, service.ingest_pdfs(&files, namespace).await?);
    }
    for dir in dirs {
        merge(&mut report, service.ingest_dir(dir, namespace).await?);
    }
    Ok(report)
}

fn merge(total: &mut IngestReport, part: IngestReport) {
    total.files_ingested += part.files_ingested;
    total.documents_loaded += part.documents_loaded;
    total.chunks_indexed += part.chunks_indexed;
    total.pages_failed += part.pages_failed;
    total.failures.extend(part.failures);
}

fn load_history(path: &Path) -> Result<Vec<ConversationTurn>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read history file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("history file {} is not a JSON list of turns", path.display()))
}

fn print_report(report: &IngestReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            println!("Namespace:        {}", report.namespace);
            println!("Files ingested:   {}", report.files_ingested);
            println!("Documents loaded: {}", report.documents_loaded);
            println!("Chunks indexed:   {}", report.chunks_indexed);
            if report.pages_failed > 0 {
                println!("Pages failed:     {}", report.pages_failed);
            }
            for failure in &report.failures {
                println!("Failed:           {} ({})", failure.path.display(), failure.error);
            }
        }
    }
    Ok(())
}

fn print_answer(answer: &QueryAnswer, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(answer)?),
        OutputFormat::Text => {
            println!("{}\n", answer.answer);
            println!("Confidence: {}", answer.confidence);
            if !answer.drawings_referenced.is_empty() {
                println!("Drawings:   {}", answer.drawings_referenced.join(", "));
            }
            for (rank, source) in answer.sources.iter().enumerate() {
                println!(
                    "  {}. {} page {} (score {:.3})",
                    rank + 1,
                    source.drawing_name,
                    source.page + 1,
                    source.score
                );
            }
        }
    }
    Ok(())
}
