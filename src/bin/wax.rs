//! Wax CLI - thin shell over the library entry points.
//!
//! Usage:
//!   wax <file.mv2s> ingest <path>
//!   wax <file.mv2s> search <query> [--mode text|hybrid] [--top-k N]
//!   wax <file.mv2s> stats
//!   wax <file.mv2s> flush
//!   wax <file.mv2s> compact
//!
//! Exit codes:
//!   0   success
//!   64  usage error
//!   65  data error (corruption)
//!   66  lock contention
//!   70  internal error

use std::path::PathBuf;
use std::process::ExitCode;

use wax::{Engine, RememberOptions, SearchMode, SearchOptions, StoreOptions, WaxError};

const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_LOCKED: u8 = 66;
const EX_SOFTWARE: u8 = 70;

fn usage() -> ExitCode {
    eprintln!(
        "usage: wax <file.mv2s> <ingest <path> | search <query> [--mode text|hybrid] [--top-k N] | stats | flush | compact>"
    );
    ExitCode::from(EX_USAGE)
}

fn exit_for(err: &WaxError) -> ExitCode {
    if matches!(err, WaxError::Locked) {
        return ExitCode::from(EX_LOCKED);
    }
    if err.is_corruption() {
        return ExitCode::from(EX_DATAERR);
    }
    ExitCode::from(EX_SOFTWARE)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        return usage();
    }
    let file = PathBuf::from(&args[0]);
    let command = args[1].as_str();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("wax: failed to start runtime: {e}");
            return ExitCode::from(EX_SOFTWARE);
        }
    };

    let result = runtime.block_on(run(&file, command, &args[2..]));
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("wax: {err}");
            exit_for(&err)
        }
    }
}

async fn run(file: &PathBuf, command: &str, rest: &[String]) -> Result<ExitCode, WaxError> {
    match command {
        "ingest" => {
            let Some(input) = rest.first() else {
                return Ok(usage());
            };
            let text = std::fs::read_to_string(input)?;
            let engine = Engine::open(file, StoreOptions::default()).await?;
            // Paragraph-level splitting; a token-aware chunker plugs in
            // through the Chunker trait.
            let mut count = 0usize;
            for chunk in text.split("\n\n").filter(|c| !c.trim().is_empty()) {
                engine
                    .remember(chunk.trim(), RememberOptions::default())
                    .await?;
                count += 1;
            }
            engine.close().await?;
            println!("ingested {count} chunks from {input}");
            Ok(ExitCode::SUCCESS)
        }
        "search" => {
            let Some(query) = rest.first() else {
                return Ok(usage());
            };
            let mut opts = SearchOptions::default();
            let mut iter = rest[1..].iter();
            while let Some(flag) = iter.next() {
                match flag.as_str() {
                    "--mode" => match iter.next().map(String::as_str) {
                        Some("text") => opts = opts.mode(SearchMode::Text),
                        Some("hybrid") => opts = opts.mode(SearchMode::Hybrid(None)),
                        _ => return Ok(usage()),
                    },
                    "--top-k" => match iter.next().and_then(|v| v.parse::<usize>().ok()) {
                        Some(k) => opts = opts.top_k(k),
                        None => return Ok(usage()),
                    },
                    _ => return Ok(usage()),
                }
            }
            let engine = Engine::open(file, StoreOptions::default()).await?;
            let hits = engine.search(query, opts).await?;
            for hit in &hits {
                let preview = match engine.get(hit.frame_id).await? {
                    Some((_, payload)) => String::from_utf8_lossy(&payload)
                        .chars()
                        .take(80)
                        .collect::<String>(),
                    None => String::new(),
                };
                println!("{:>6}  {:.4}  {}", hit.frame_id, hit.score, preview);
            }
            if hits.is_empty() {
                println!("no hits");
            }
            engine.close().await?;
            Ok(ExitCode::SUCCESS)
        }
        "stats" => {
            let engine = Engine::open(file, StoreOptions::default()).await?;
            let stats = engine.runtime_stats().await?;
            match serde_json::to_string_pretty(&stats) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("wax: {e}");
                    return Ok(ExitCode::from(EX_SOFTWARE));
                }
            }
            engine.close().await?;
            Ok(ExitCode::SUCCESS)
        }
        "flush" => {
            let engine = Engine::open(file, StoreOptions::default()).await?;
            engine.flush().await?;
            engine.close().await?;
            println!("flushed");
            Ok(ExitCode::SUCCESS)
        }
        "compact" => {
            let engine = Engine::open(file, StoreOptions::default()).await?;
            let before = engine.runtime_stats().await?.file_len;
            engine.compact().await?;
            let after = engine.runtime_stats().await?.file_len;
            engine.close().await?;
            println!("compacted: {before} -> {after} bytes");
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(usage()),
    }
}
