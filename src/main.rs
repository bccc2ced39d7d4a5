use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use veil_channel::{GenerationParams, HttpTransport};
use veil_core::SessionId;
use veil_engine::Exchanger;
use veil_store::{SessionStore, STORE_FILE};

/// Confidential chat client. Each prompt travels under a fresh per-exchange
/// key; plaintext history stays on this machine.
#[derive(Parser)]
#[command(name = "veil", version)]
struct Args {
    /// Base URL of the inference service.
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    service_url: String,

    /// Directory for the session file (defaults to ~/.veil).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 0.7)]
    temperature: f32,

    #[arg(long, default_value_t = 256)]
    max_tokens: u32,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let data_dir = args.data_dir.clone().unwrap_or_else(|| dirs_home().join(".veil"));
    let store_path = data_dir.join(STORE_FILE);
    let store = Arc::new(SessionStore::open(&store_path).expect("Failed to open session store"));
    tracing::info!(path = %store_path.display(), "Session store opened");

    let transport = Arc::new(HttpTransport::new(&args.service_url));
    let exchanger = Exchanger::new(transport, Arc::clone(&store));
    let mut active = store.active_id();

    let params = GenerationParams {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
    };

    println!("veil — commands: :new, :list, :open <id>, :quit");
    print_prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        match line {
            "" => {}
            ":quit" => break,
            ":new" => match store.create() {
                Ok(session) => {
                    active = session.id.clone();
                    println!("{}", session.id);
                }
                Err(e) => eprintln!("error: {e}"),
            },
            ":list" => {
                for session in store.list() {
                    let marker = if session.id == active { "*" } else { " " };
                    println!(
                        "{marker} {}  {} ({} messages)",
                        session.id,
                        session.title,
                        session.message_count()
                    );
                }
            }
            _ if line.starts_with(":open ") => {
                let id = SessionId::from_raw(line[6..].trim());
                match store.set_active(&id) {
                    Ok(()) => active = id,
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            prompt => run_exchange(&exchanger, &active, prompt, params).await,
        }
        print_prompt();
    }

    tracing::info!("Shutting down");
}

/// One exchange, streaming fragments to stdout. Ctrl+C cancels the stream
/// and keeps whatever has already arrived.
async fn run_exchange(
    exchanger: &Exchanger<HttpTransport>,
    session_id: &SessionId,
    prompt: &str,
    params: GenerationParams,
) {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = exchanger
        .exchange(session_id, prompt, params, cancel, |fragment| {
            print!("{fragment}");
            let _ = std::io::stdout().flush();
        })
        .await;
    watcher.abort();

    match result {
        Ok(_) => println!(),
        Err(e) => {
            println!();
            eprintln!("error ({}): {e}", e.error_kind());
        }
    }
}

fn print_prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
