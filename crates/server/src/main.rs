//! ASR server entry point

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use asr_config::{load_settings, Settings};
use asr_core::SymbolTable;
use asr_decoder::ContextGraph;
use asr_model::OnnxAsrModel;
use asr_server::metrics::init_metrics;
use asr_server::{create_router, AppState};

/// Command line flags; they override file and environment settings
#[derive(Parser, Debug)]
#[command(name = "asr-server", about = "Streaming speech recognition server")]
struct Cli {
    /// Listen port
    #[arg(long = "port")]
    port: Option<u16>,

    /// Inference threads per model session
    #[arg(long = "num_threads")]
    num_threads: Option<usize>,

    /// Model package directory
    #[arg(long = "model_path")]
    model_path: Option<String>,

    /// Unit dictionary file
    #[arg(long = "dict_path")]
    dict_path: Option<String>,

    /// Context phrase list, one phrase per line
    #[arg(long = "context_path")]
    context_path: Option<String>,

    /// Per-token biasing bonus
    #[arg(long = "context_score")]
    context_score: Option<f32>,

    /// Default N-best size
    #[arg(long = "nbest")]
    nbest: Option<usize>,

    /// Attach word-piece timing to final results
    #[arg(long = "timestamp")]
    timestamp: bool,

    /// Rearm after every endpoint instead of closing the utterance stream
    #[arg(long = "continuous_decoding")]
    continuous_decoding: bool,

    /// Encoder chunk size in subsampled frames
    #[arg(long = "chunk_size")]
    chunk_size: Option<usize>,
}

fn apply_cli(settings: &mut Settings, cli: &Cli) {
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(num_threads) = cli.num_threads {
        settings.server.num_threads = num_threads;
    }
    if let Some(model_path) = &cli.model_path {
        settings.model.model_path = model_path.clone();
    }
    if let Some(dict_path) = &cli.dict_path {
        settings.model.dict_path = dict_path.clone();
    }
    if let Some(context_path) = &cli.context_path {
        settings.model.context_path = Some(context_path.clone());
    }
    if let Some(context_score) = cli.context_score {
        settings.model.context_score = context_score;
    }
    if let Some(nbest) = cli.nbest {
        settings.decode.nbest = nbest;
    }
    if cli.timestamp {
        settings.decode.timestamp = true;
    }
    if cli.continuous_decoding {
        settings.decode.continuous_decoding = true;
    }
    if let Some(chunk_size) = cli.chunk_size {
        settings.decode.chunk_size = chunk_size;
    }
}

fn main() -> ExitCode {
    // Exit codes: 0 success, 1 argument/config error, 2 model load error.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    let env = std::env::var("ASR_SERVER_ENV").ok();
    let mut settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::from(1);
        }
    };
    apply_cli(&mut settings, &cli);
    if let Err(e) = settings.validate() {
        eprintln!("invalid configuration: {}", e);
        return ExitCode::from(1);
    }

    init_tracing(&settings);
    tracing::info!("starting asr-server v{}", env!("CARGO_PKG_VERSION"));

    let model = match OnnxAsrModel::load(&settings.model.model_path, settings.server.num_threads)
    {
        Ok(model) => Arc::new(model),
        Err(e) => {
            tracing::error!(path = %settings.model.model_path, "model load failed: {}", e);
            return ExitCode::from(2);
        }
    };

    let symbols = match SymbolTable::from_file(&settings.model.dict_path) {
        Ok(symbols) => Arc::new(symbols),
        Err(e) => {
            tracing::error!(path = %settings.model.dict_path, "dictionary load failed: {}", e);
            return ExitCode::from(2);
        }
    };
    tracing::info!(units = symbols.len(), "loaded unit dictionary");

    let context = match &settings.model.context_path {
        Some(path) => match load_context(path, settings.model.context_score, &symbols) {
            Ok(graph) => {
                tracing::info!(
                    path = %path,
                    states = graph.num_states(),
                    score = settings.model.context_score,
                    "compiled context graph"
                );
                Some(Arc::new(graph))
            }
            Err(e) => {
                tracing::error!(path = %path, "context list load failed: {}", e);
                return ExitCode::from(2);
            }
        },
        None => None,
    };

    let _metrics_handle = init_metrics();

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid listen address {}: {}", addr, e);
            return ExitCode::from(1);
        }
    };

    let state = AppState::new(settings, model, symbols, context);
    match serve(state, addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn serve(state: AppState, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let app = create_router(state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("server shutdown complete");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

/// Initialize tracing from the observability settings
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.observability.log_level.clone().into());

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Load the context phrase list, one phrase per line
fn load_context(
    path: &str,
    context_score: f32,
    symbols: &SymbolTable,
) -> Result<ContextGraph, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let phrases: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    Ok(ContextGraph::from_phrases(&phrases, context_score, symbols))
}
