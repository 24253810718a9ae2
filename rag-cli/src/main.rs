//! Operator-facing CLI over `rag-service`'s facade: ingest, resync, search, and
//! administer documents/collections/GC against one SQLite-backed store.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rag_model::DocId;
use rag_service::{Config, IngestRequest, RagService};

#[derive(Parser)]
#[command(name = "rag-cli", about = "Document sync orchestrator and hybrid search, from the command line")]
struct Cli {
    /// Path to a TOML config file; falls back to built-in defaults plus RAG_* env overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file (or stdin, with `-`) into a collection, waiting for the pipeline to
    /// reach a terminal state before returning.
    Ingest {
        collection: String,
        /// Path to the file to ingest, or `-` to read from stdin.
        path: String,
        /// Dedup key for the document; defaults to the path.
        #[arg(long)]
        key: Option<String>,
        /// Display name for the document; defaults to the path's file name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Re-arm and re-run a document's pipeline regardless of its current state.
    Resync { doc_id: DocId },
    /// Soft-delete a document; GC's next pass finalises the removal.
    DeleteDocument { doc_id: DocId },
    /// Delete a collection and everything in it.
    DeleteCollection { collection_id: String },
    /// Hybrid keyword + vector search.
    Search {
        query: String,
        #[arg(long)]
        collection_id: Option<String>,
        #[arg(long, default_value_t = hybrid_search::DEFAULT_LIMIT)]
        limit: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Print a document's current sync job state.
    Status { doc_id: DocId },
    /// Run one garbage-collection pass inline and print its report.
    GcRun,
}

fn main() -> ExitCode {
    rag_service::init_tracing();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(2);
        }
    };

    let service = match RagService::open(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open service: {e}");
            return ExitCode::from(3);
        }
    };

    let result = run(&service, cli.command);

    // A dimension mismatch is fatal to the whole process, not just the command that
    // tripped over it first; check for it regardless of which command ran or whether it
    // succeeded, and let it override the command's own exit code.
    if let Some(mismatch) = service.fatal_condition() {
        eprintln!(
            "fatal: vector dimension changed from {} to {} mid-flight; store's vectors no longer match the embedding provider",
            mismatch.recorded, mismatch.observed
        );
        return ExitCode::from(4);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(service: &RagService, command: Command) -> Result<(), String> {
    match command {
        Command::Ingest { collection, path, key, name } => cmd_ingest(service, collection, path, key, name),
        Command::Resync { doc_id } => service.resync(&doc_id).map_err(|e| e.to_string()),
        Command::DeleteDocument { doc_id } => service.delete_document(&doc_id).map_err(|e| e.to_string()),
        Command::DeleteCollection { collection_id } => service.delete_collection(&collection_id).map_err(|e| e.to_string()),
        Command::Search { query, collection_id, limit, page } => cmd_search(service, query, collection_id, limit, page),
        Command::Status { doc_id } => cmd_status(service, doc_id),
        Command::GcRun => cmd_gc_run(service),
    }
}

fn cmd_ingest(service: &RagService, collection: String, path: String, key: Option<String>, name: Option<String>) -> Result<(), String> {
    let content = if path == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).map_err(|e| e.to_string())?;
        buf
    } else {
        std::fs::read(&path).map_err(|e| format!("reading {path}: {e}"))?
    };
    let name = name.unwrap_or_else(|| {
        std::path::Path::new(&path).file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| path.clone())
    });
    let mime = guess_mime(&name);

    let doc_id = service
        .ingest(IngestRequest { collection_name: Some(collection), key: key.unwrap_or_else(|| path.clone()), name, mime, content })
        .map_err(|e| e.to_string())?;

    println!("doc_id: {doc_id}");
    match service.await_outcome(&doc_id) {
        Some(outcome) => println!("outcome: {outcome:?}"),
        None => println!("outcome: unknown (pipeline channel closed before reporting)"),
    }
    Ok(())
}

fn cmd_search(service: &RagService, query: String, collection_id: Option<String>, limit: u32, page: u32) -> Result<(), String> {
    let req = hybrid_search::SearchRequest { query, collection_id, limit, page };
    let resp = service.search(&req).map_err(|e| e.to_string())?;
    if resp.degraded {
        eprintln!("warning: vector search was unavailable; results are keyword-only");
    }
    println!("{} of {} results", resp.results.len(), resp.total);
    for hit in resp.results {
        println!("{:.4}  {}  {}", hit.score, hit.point_id, hit.title.unwrap_or_default());
    }
    Ok(())
}

fn cmd_status(service: &RagService, doc_id: DocId) -> Result<(), String> {
    match service.get_sync_status(&doc_id).map_err(|e| e.to_string())? {
        Some(status) => {
            println!("state: {:?}", status.state);
            println!("retries: {}", status.retries);
            if let Some(err) = status.last_error {
                println!("last_error: {err}");
            }
            Ok(())
        }
        None => Err(format!("no sync job found for {doc_id}")),
    }
}

fn cmd_gc_run(service: &RagService) -> Result<(), String> {
    let report = service.gc_run().map_err(|e| e.to_string())?;
    println!("collections_scanned: {}", report.collections_scanned);
    println!("orphans_deleted_from_vectors: {}", report.orphans_deleted_from_vectors);
    println!("orphans_deleted_from_meta: {}", report.orphans_deleted_from_meta);
    println!("docs_finalised: {}", report.docs_finalised);
    Ok(())
}

fn guess_mime(name: &str) -> String {
    match name.rsplit('.').next() {
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        _ => "application/octet-stream",
    }
    .to_string()
}
