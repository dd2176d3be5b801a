//! # Travel RAG CLI (`trag`)
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/trag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag init` | Create the SQLite database and run schema migrations |
//! | `trag ingest <path>` | Ingest a file or directory of travel documents |
//! | `trag seed` | Ingest the built-in sample travel guides |
//! | `trag delete <id>` | Delete a document and its chunks |
//! | `trag retrieve "<query>"` | Show ranked chunks without generation |
//! | `trag ask "<query>"` | Answer a question with citations |
//! | `trag plan --destination <name>` | Build a travel plan |
//! | `trag info <destination>` | Summarise a destination |
//! | `trag destinations <term>` | List destinations matching a term |
//! | `trag stats` | Index and model statistics |
//! | `trag serve` | Start the HTTP server |
//!
//! Without `--config`, `./config/trag.toml` is used when it exists and the
//! built-in defaults otherwise.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use travel_rag::app::App;
use travel_rag::config::{self, Config};
use travel_rag::ingest::BatchReport;
use travel_rag::service::{QueryRequest, QueryResponse, RetrieveRequest};
use travel_rag::travel::{self, TravelPreferences};
use travel_rag::{loader, logging, server, store::SqliteStore};
use travel_rag_core::models::MetadataFilter;

const DEFAULT_CONFIG: &str = "./config/trag.toml";

/// Travel RAG: a retrieval-augmented travel assistant.
#[derive(Parser)]
#[command(
    name = "trag",
    about = "Travel RAG: ingest travel guides and ask grounded, cited questions about them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a file or a directory of travel documents.
    ///
    /// Supported formats: .txt, .md, .pdf, .docx, .json.
    Ingest {
        path: PathBuf,

        /// Metadata applied to every document, e.g. `--meta destination=Lisbon`.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,

        /// Document id to use instead of the one derived from the path
        /// (single-document files only).
        #[arg(long)]
        id: Option<String>,
    },

    /// Ingest the built-in sample travel guides.
    Seed,

    /// Delete a document by id.
    Delete { id: String },

    /// Show the ranked chunks for a query, without generation.
    Retrieve {
        query: String,

        #[arg(short, long)]
        k: Option<usize>,

        /// Metadata filter, e.g. `--filter destination=Tokyo`.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        query: String,

        #[arg(short, long)]
        k: Option<usize>,

        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Token budget for the query plus context.
        #[arg(long)]
        budget: Option<usize>,

        /// Answer without context if even the top chunk exceeds the budget.
        #[arg(long)]
        allow_zero_context: bool,
    },

    /// Build a travel plan from preferences.
    Plan {
        #[arg(long)]
        destination: Option<String>,

        /// Budget level, e.g. `low`, `moderate`, `luxury`.
        #[arg(long)]
        budget: Option<String>,

        /// Trip length in days.
        #[arg(long)]
        duration: Option<u32>,

        /// Repeatable, e.g. `--interest food --interest museums`.
        #[arg(long = "interest")]
        interests: Vec<String>,

        /// e.g. `solo`, `family`, `backpacking`.
        #[arg(long)]
        style: Option<String>,
    },

    /// Summarise a destination.
    Info { destination: String },

    /// List destinations relevant to a search term.
    Destinations { term: String },

    /// Show index and model statistics.
    Stats,

    /// Start the HTTP server.
    Serve,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init("info");

    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&cfg).await?;
            store.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest { path, meta, id } => {
            let app = App::build(cfg).await?;
            let extra = loader::metadata_from_pairs(&meta);
            let report = app
                .ingestor
                .ingest_path(&path, &extra, id.as_deref())
                .await
                .with_context(|| format!("Failed to ingest {}", path.display()))?;
            print_report(&report, cli.json)?;
            app.shutdown().await;
            if report.succeeded == 0 && report.failed > 0 {
                bail!("no documents were ingested");
            }
        }
        Commands::Seed => {
            let app = App::build(cfg).await?;
            let loaded = travel::sample_documents().into_iter().map(Ok).collect();
            let report = app.ingestor.ingest_batch(loaded).await;
            print_report(&report, cli.json)?;
            app.shutdown().await;
        }
        Commands::Delete { id } => {
            let app = App::build(cfg).await?;
            let deleted = app.ingestor.delete(&id).await?;
            app.shutdown().await;
            if !deleted {
                bail!("document not found: {}", id);
            }
            println!("deleted {}", id);
        }
        Commands::Retrieve { query, k, filters } => {
            let app = App::build(cfg).await?;
            let response = app
                .service
                .retrieve(RetrieveRequest {
                    query_text: query,
                    k,
                    filters: filters.into_iter().collect::<MetadataFilter>(),
                })
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                if response.degraded {
                    println!("(degraded: keyword fallback)");
                }
                for (i, chunk) in response.chunks.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} #{} ({}..{})",
                        i + 1,
                        chunk.score,
                        chunk.source_path,
                        chunk.sequence_index,
                        chunk.start_offset,
                        chunk.end_offset
                    );
                    println!("    {}", snippet(&chunk.text, 160));
                }
                if response.chunks.is_empty() {
                    println!("No results.");
                }
            }
            app.shutdown().await;
        }
        Commands::Ask {
            query,
            k,
            filters,
            budget,
            allow_zero_context,
        } => {
            let app = App::build(cfg).await?;
            let request = QueryRequest {
                query_text: query,
                k,
                filters: filters.into_iter().collect(),
                budget_tokens: budget,
                allow_zero_context,
            };
            let response = app.service.query(request).await?;
            print_answer(&response, cli.json)?;
            app.shutdown().await;
        }
        Commands::Plan {
            destination,
            budget,
            duration,
            interests,
            style,
        } => {
            let app = App::build(cfg).await?;
            let preferences = TravelPreferences {
                destination,
                budget,
                duration_days: duration,
                interests,
                travel_style: style,
            };
            let response = app.service.plan(&preferences).await?;
            print_answer(&response, cli.json)?;
            app.shutdown().await;
        }
        Commands::Info { destination } => {
            let app = App::build(cfg).await?;
            let response = app.service.destination_info(&destination).await?;
            print_answer(&response, cli.json)?;
            app.shutdown().await;
        }
        Commands::Destinations { term } => {
            let app = App::build(cfg).await?;
            let destinations = app.service.search_destinations(&term).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&destinations)?);
            } else if destinations.is_empty() {
                println!("No destinations found for '{}'.", term);
            } else {
                for d in &destinations {
                    println!("{}", d);
                }
            }
            app.shutdown().await;
        }
        Commands::Stats => {
            let app = App::build(cfg).await?;
            let stats = app.service.stats();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("documents: {}", stats.index.documents);
                println!("metric: {}", stats.index.metric);
                for c in &stats.index.collections {
                    println!(
                        "collection {}: {} dims, {} chunks, {} documents",
                        c.model_id, c.dims, c.chunks, c.documents
                    );
                }
                println!("embedding model: {} ({} dims)", stats.embedding_model, stats.embedding_dims);
                println!("generation model: {}", stats.generation_model);
            }
            app.shutdown().await;
        }
        Commands::Serve => {
            let app = App::build(cfg).await?;
            server::run_server(app).await?;
        }
    }

    Ok(())
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for doc in &report.documents {
        match &doc.failure {
            None => println!(
                "  ok      {} ({} chunks) {}",
                doc.source_path,
                doc.chunks,
                doc.document_id.as_deref().unwrap_or_default()
            ),
            Some(f) => println!("  failed  {} [{}] {}", doc.source_path, f.reason, f.message),
        }
    }
    println!(
        "ingested {} documents ({} chunks), {} failed",
        report.succeeded, report.chunks, report.failed
    );
    Ok(())
}

fn print_answer(response: &QueryResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    println!("{}", response.answer_text);
    if !response.cited_chunks.is_empty() {
        println!();
        println!("Sources:");
        for chunk in &response.cited_chunks {
            println!("  {}", chunk.header());
        }
    }
    println!();
    println!(
        "retrieval {} ms, generation {} ms{}",
        response.retrieval_latency_ms,
        response.generation_latency_ms,
        if response.degraded { ", degraded" } else { "" }
    );
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
