//! Tail a Server-Sent Events stream, printing one JSON line per event.
//!
//! With `--store`, the last event id is kept on disk so a restarted tail
//! resumes where the previous one stopped.

use clap::Parser;
use resumable_sse::{EventSource, JsonFileStore, MessageEvent};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Event stream URL.
    url: String,

    /// Extra request header as `Name: value`. May be repeated.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Basic-auth user name.
    #[arg(long, env = "SSE_TAIL_USER", requires = "password")]
    user: Option<String>,

    /// Basic-auth password.
    #[arg(long, env = "SSE_TAIL_PASSWORD", requires = "user")]
    password: Option<String>,

    /// Named event type to print besides default messages. May be repeated.
    #[arg(short = 'e', long = "event")]
    events: Vec<String>,

    /// JSON file used to persist the last event id.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Initial reconnect delay in milliseconds.
    #[arg(long)]
    retry_ms: Option<u64>,

    /// Exit after this many events.
    #[arg(short = 'n', long)]
    max_events: Option<usize>,
}

fn split_header(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .ok_or_else(|| format!("header must look like 'Name: value', got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut builder = EventSource::builder(&args.url);
    for raw in &args.headers {
        let (name, value) = split_header(raw)?;
        builder = builder.try_header(name, value)?;
    }
    if let (Some(user), Some(password)) = (&args.user, &args.password) {
        let auth = EventSource::basic_auth_header(user, password);
        builder = builder.try_header("Authorization", &auth)?;
    }
    if let Some(path) = &args.store {
        builder = builder.store(Arc::new(JsonFileStore::open(path)?));
    }
    if let Some(ms) = args.retry_ms {
        builder = builder.retry_interval(Duration::from_millis(ms));
    }
    let source = builder.build()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<MessageEvent>();
    let message_tx = tx.clone();
    source.on_message(move |event| {
        let _ = message_tx.send(event);
    });
    for name in &args.events {
        let event_tx = tx.clone();
        source.add_event_listener(name.clone(), move |event| {
            let _ = event_tx.send(event);
        });
    }
    drop(tx);

    let url = args.url.clone();
    source.on_open(move || info!(url = %url, "Stream open"));
    source.on_error(|err| error!(error = %err, "Stream error"));

    if let Some(id) = source.last_event_id() {
        info!(last_event_id = %id, "Resuming");
    }
    source.connect();

    let mut printed = 0usize;
    let mut stdout = std::io::stdout().lock();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
                stdout.flush()?;
                printed += 1;
                if args.max_events.is_some_and(|max| printed >= max) {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    source.close();
    Ok(())
}
