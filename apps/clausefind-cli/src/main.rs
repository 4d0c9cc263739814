use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use clausefind_core::config::{Config, Settings};
use clausefind_core::parser::parser_for;
use clausefind_core::traits::DocumentParser;
use clausefind_core::Chunker;
use clausefind_core::types::SearchResult;
use clausefind_embed::WeightStore;
use clausefind_search::ContractSearch;

const USAGE: &str = "\
Usage: clausefind <command> [args...]

Commands:
  fetch                             download or verify model weights
  verify                            recompute weight digests against the manifest
  search <document> <query> [--top-k N]
  repl <document>                   load a document and query it interactively
  chunks <document>                 print the chunks as JSON, no models needed";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

/// Split `--top-k N` out of the positional arguments.
fn take_top_k(args: &mut Vec<String>) -> anyhow::Result<Option<usize>> {
    let Some(pos) = args.iter().position(|a| a == "--top-k" || a == "-k") else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("--top-k requires a number");
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    value.parse().map(Some).with_context(|| format!("--top-k expects a positive integer, got '{value}'"))
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No matching clauses.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        println!("\n  {}. score={:.4}  coarse={:.4}  at {}", i + 1, r.score, r.coarse_score, r.original_index);
        println!("     {}", r.text);
    }
}

fn fetch(settings: &Settings) -> anyhow::Result<()> {
    let store = WeightStore::hub(&settings.models, &settings.download);
    for repo in [&settings.models.bi_encoder, &settings.models.cross_encoder] {
        let dir = store.ensure(repo)?;
        println!("✅ {repo} ready at {}", dir.display());
    }
    Ok(())
}

fn verify(settings: &Settings) -> anyhow::Result<()> {
    let store = WeightStore::hub(&settings.models, &settings.download);
    let mut failed = false;
    for repo in [&settings.models.bi_encoder, &settings.models.cross_encoder] {
        let bad = store.verify_deep(repo)?;
        if bad.is_empty() {
            println!("✅ {repo}: all files match the manifest");
        } else {
            failed = true;
            println!("❌ {repo}: {} file(s) differ: {}", bad.len(), bad.join(", "));
        }
    }
    if failed {
        bail!("weight verification failed, run `clausefind fetch` again");
    }
    Ok(())
}

async fn open(settings: Settings, document: &str) -> anyhow::Result<ContractSearch> {
    let search = ContractSearch::new(settings)?;
    search.init_engine().await?;
    for w in search.placement_warnings() {
        eprintln!("⚠️  {w}");
    }
    let n = search.process_document(&PathBuf::from(document)).await?;
    println!("📄 Loaded {document} ({n} chunks)");
    Ok(search)
}

async fn repl(search: &ContractSearch) -> anyhow::Result<()> {
    let stdin = io::stdin();
    loop {
        print!("query> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            ":q" | ":quit" | "exit" => break,
            q => match search.search_query(q, None).await {
                Ok(results) => print_results(&results),
                Err(e) => eprintln!("❌ {e}"),
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let settings = Config::load()
        .and_then(|c| c.settings())
        .map_err(|e| {
            eprintln!("Error loading config: {e}");
            e
        })?;
    let (cmd, mut args) = parse_args();
    debug!(command = %cmd, ?settings, "starting");
    match cmd.as_str() {
        "fetch" => tokio::task::spawn_blocking(move || fetch(&settings)).await??,
        "verify" => verify(&settings)?,
        "search" => {
            let top_k = take_top_k(&mut args)?;
            let [document, query, ..] = args.as_slice() else {
                bail!("Usage: clausefind search <document> <query> [--top-k N]");
            };
            let search = open(settings, document).await?;
            print_results(&search.search_query(query, top_k).await?);
        }
        "repl" => {
            let Some(document) = args.first() else {
                bail!("Usage: clausefind repl <document>");
            };
            let search = open(settings, document).await?;
            repl(&search).await?;
        }
        "chunks" => {
            let Some(document) = args.first() else {
                bail!("Usage: clausefind chunks <document>");
            };
            let path = PathBuf::from(document);
            let blocks = parser_for(&path)?.parse(&path)?;
            let chunks = Chunker::new(settings.chunking)?.chunk(&blocks)?;
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
    Ok(())
}
