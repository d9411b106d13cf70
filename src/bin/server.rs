use std::process;
use std::sync::Arc;

use clap::Parser;

use durable_streams::protocol::{create_router, AppState};
use durable_streams::store::memory::MemoryStore;
use durable_streams::types::ServerOptions;
use durable_streams::webhook::WebhookManager;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Durable streams server", long_about = None)]
struct Opts {
    /// Port to listen on.
    #[arg(long, default_value_t = 4437)]
    port: u16,

    /// Host/interface to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Data directory for file-backed storage. Omit for the in-memory store.
    #[arg(long)]
    data_dir: Option<String>,

    /// Default long-poll deadline, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    long_poll_timeout_ms: u64,

    /// Forced SSE reconnect cadence, in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    sse_reconnect_interval_ms: u64,

    /// Bounded cap on open segment-file handles (file-backed store only).
    #[arg(long, default_value_t = 100)]
    max_file_handles: usize,

    /// Base URL the webhook manager advertises as the claim endpoint.
    /// Enables the webhook subsystem when set.
    #[arg(long)]
    webhook_callback_url: Option<String>,

    /// Disable gzip/deflate response compression.
    #[arg(long)]
    no_compression: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    if let Err(e) = run(opts).await {
        tracing::error!(error = %e, "server exited with an error");
        process::exit(1);
    }
}

async fn run(opts: Opts) -> Result<(), String> {
    let options = ServerOptions {
        port: opts.port,
        host: opts.host.clone(),
        long_poll_timeout_ms: opts.long_poll_timeout_ms,
        sse_reconnect_interval_ms: opts.sse_reconnect_interval_ms,
        data_dir: opts.data_dir.clone(),
        max_file_handles: opts.max_file_handles,
        compression: !opts.no_compression,
        webhook_callback_url: opts.webhook_callback_url.clone(),
        ..ServerOptions::default()
    };

    let store: Arc<dyn durable_streams::StreamStore> = match &options.data_dir {
        Some(dir) => {
            #[cfg(feature = "file-storage")]
            {
                durable_streams::store::file::FileStore::open(dir, options.max_file_handles)
                    .await
                    .map_err(|e| format!("failed to open data directory {dir}: {e}"))?
            }
            #[cfg(not(feature = "file-storage"))]
            {
                return Err("file-backed storage requested but the file-storage feature is disabled".to_string());
            }
        }
        None => MemoryStore::new(),
    };

    let webhooks = options
        .webhook_callback_url
        .as_ref()
        .map(|_| WebhookManager::new(store.clone()));

    let state = AppState { store, options: options.clone(), webhooks };
    let app = create_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;

    tracing::info!(%addr, webhooks_enabled = options.webhook_callback_url.is_some(), "durable streams server listening");
    axum::serve(listener, app).await.map_err(|e| format!("server error: {e}"))
}
