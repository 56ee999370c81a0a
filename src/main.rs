//! Docseek CLI
//!
//! Build-or-load a vector index over a document folder and answer top-k
//! retrieval queries from the command line or an interactive prompt.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use docseek_lib::documents::{render_console, save_report};
use docseek_lib::{
    EmbeddingProvider, IndexStats, RetrievalEngine, RetrieverConfig, RetrieverError,
    SearchHit,
};

#[derive(Parser)]
#[command(name = "docseek")]
#[command(about = "Docseek - retrieval over a folder of documents", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/docseek/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Folder containing the documents to index
    #[arg(long, global = true)]
    corpus_dir: Option<PathBuf>,

    /// Folder holding the persisted index
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    /// Document file extension (pdf or txt)
    #[arg(long, global = true)]
    extension: Option<String>,

    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[arg(long, global = true)]
    chunk_overlap: Option<usize>,

    /// Number of passages to return per query
    #[arg(short = 'k', long = "top-k", global = true)]
    top_k: Option<usize>,

    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderArg>,

    /// Embedding model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Rebuild the index even if one is already persisted
    #[arg(long, global = true)]
    force_rebuild: bool,

    /// Report file written after each query
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index, or load it if already persisted
    Build,
    /// Run a single query
    Query {
        /// Query text
        text: String,
    },
    /// Interactive query prompt (default)
    Repl,
    /// Show index statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderArg {
    FeatureHash,
    Openai,
}

impl From<ProviderArg> for EmbeddingProvider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::FeatureHash => EmbeddingProvider::FeatureHash,
            ProviderArg::Openai => EmbeddingProvider::OpenAi,
        }
    }
}

const PROMPT: &str = "> ";

// ============ Output Types ============

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(Some(output)) => println!("{}", output),
        Ok(None) => {}
        Err(e) => {
            let error = ErrorOutput { error: format!("{:#}", e) };
            match serde_json::to_string(&error) {
                Ok(json) => println!("{}", json),
                Err(_) => eprintln!("{:#}", e),
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<Option<String>> {
    let config = load_config(&cli)?;
    let mut engine = RetrievalEngine::from_config(config).context("Failed to set up retrieval engine")?;

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Build => handle_build(&mut engine).map(Some),
        Commands::Query { text } => handle_query(&mut engine, &text).map(Some),
        Commands::Repl => handle_repl(&mut engine).map(|_| None),
        Commands::Stats => handle_stats(&mut engine).map(Some),
    }
}

/// Config file first, then individual flag overrides.
fn load_config(cli: &Cli) -> Result<RetrieverConfig> {
    let mut config = RetrieverConfig::resolve(cli.config.as_deref()).context("Failed to load config")?;

    if let Some(dir) = &cli.corpus_dir {
        config.corpus_dir = dir.clone();
    }
    if let Some(dir) = &cli.index_dir {
        config.index_dir = dir.clone();
    }
    if let Some(ext) = &cli.extension {
        config.document_extension = ext.trim_start_matches('.').to_string();
    }
    if let Some(size) = cli.chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = cli.chunk_overlap {
        config.chunk_overlap = overlap;
    }
    if let Some(k) = cli.top_k {
        config.top_k = k;
    }
    if let Some(provider) = cli.provider {
        config.embedding.provider = provider.into();
    }
    if let Some(model) = &cli.model {
        config.embedding.model = model.clone();
    }
    if let Some(path) = &cli.output {
        config.report_path = path.clone();
    }
    if cli.force_rebuild {
        config.force_rebuild = true;
    }

    Ok(config)
}

// ============ Handlers ============

fn handle_build(engine: &mut RetrievalEngine) -> Result<String> {
    let origin = engine.ensure_index().context("Failed to prepare index")?;
    info!(origin = ?origin, "Index ready");
    Ok(serde_json::to_string(&engine_stats(engine)?)?)
}

fn handle_stats(engine: &mut RetrievalEngine) -> Result<String> {
    engine.ensure_index().context("Failed to prepare index")?;
    Ok(serde_json::to_string(&engine_stats(engine)?)?)
}

fn handle_query(engine: &mut RetrievalEngine, text: &str) -> Result<String> {
    let query = text.trim();
    let hits = engine.retrieve_default(query).context("Query failed")?;
    write_report(engine, query, &hits)?;
    Ok(one_shot_output(query, &hits))
}

/// Console rendering without its final newline; `main` prints it with one.
fn one_shot_output(query: &str, hits: &[SearchHit]) -> String {
    render_console(query, hits).trim_end_matches('\n').to_string()
}

fn handle_repl(engine: &mut RetrievalEngine) -> Result<()> {
    engine.ensure_index().context("Failed to prepare index")?;

    println!("{}", repl_header(engine.config()));

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\n{}", PROMPT);
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        let query = line.trim();

        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        match engine.retrieve_default(query) {
            Ok(hits) => {
                print!("{}", render_console(query, &hits));
                write_report(engine, query, &hits)?;
            }
            Err(RetrieverError::InvalidQuery(reason)) => eprintln!("Invalid query: {}", reason),
            Err(e) => eprintln!("Query failed: {}", e),
        }
    }

    Ok(())
}

fn repl_header(config: &RetrieverConfig) -> String {
    format!(
        "Retrieval-only mode (no LLM). Type a query, or 'exit' to quit.\n\
         {} folder: {}/ | Index folder: {}/ | Top-k: {}",
        config.document_extension.to_uppercase(),
        config.corpus_dir.display(),
        config.index_dir.display(),
        config.top_k
    )
}

fn write_report(engine: &RetrievalEngine, query: &str, hits: &[SearchHit]) -> Result<()> {
    let path = &engine.config().report_path;
    save_report(path, query, hits)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn engine_stats(engine: &RetrievalEngine) -> Result<IndexStats> {
    engine
        .stats()
        .ok_or(RetrieverError::NotInitialized)
        .context("Index unavailable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use docseek_lib::Passage;

    #[test]
    fn test_repl_header_names_document_type() {
        let mut config = RetrieverConfig::default();
        assert!(repl_header(&config).ends_with("PDF folder: data/ | Index folder: vector_index/ | Top-k: 5"));

        config.document_extension = "txt".to_string();
        config.top_k = 3;
        let header = repl_header(&config);
        assert!(header.starts_with("Retrieval-only mode (no LLM). Type a query, or 'exit' to quit.\n"));
        assert!(header.ends_with("TXT folder: data/ | Index folder: vector_index/ | Top-k: 3"));
    }

    #[test]
    fn test_one_shot_output_has_single_trailing_newline() {
        let hits = vec![SearchHit {
            passage: Passage {
                text: "Refunds within 30 days.".to_string(),
                source: "data/handbook.pdf".to_string(),
                page: 0,
                chunk_index: 0,
            },
            score: 0.9,
        }];
        let printed = format!("{}\n", one_shot_output("refund", &hits));
        assert_eq!(printed, render_console("refund", &hits));
        assert!(!printed.ends_with("\n\n"));
    }
}
