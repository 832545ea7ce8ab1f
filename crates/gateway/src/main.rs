use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use xp_domain::config::{Config, ConfigSeverity};
use xp_gateway::api;
use xp_gateway::api::core::MemoryStore;
use xp_gateway::state::AppState;
use xp_sessions::{MockBackend, SessionBackend};
use xp_voice::{Discovery, TranscriptStore, VoiceConfig};

#[derive(Parser)]
#[command(name = "experience-server", version)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Print the effective configuration and its validation checks.
    Config,
    /// Print the server version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config) => {
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            print_config(&config);
            let issues = config.validate();
            for issue in &issues {
                println!("[{}] {}: {}", issue.severity, issue.field, issue.message);
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("experience-server {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn print_config(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

/// Structured JSON tracing, installed only for the `serve` command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,xp_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("experience server starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Info => tracing::info!("config: {issue}"),
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.server.api_token_env, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.server.api_token_env,
                "API bearer-token auth DISABLED — server is running in local-only mode"
            );
            None
        }
    };

    // ── Session backend ──────────────────────────────────────────────
    // The Runtime (LLM/tool execution) is an external collaborator this
    // system does not implement; `MockBackend` stands in as the concrete
    // `SessionBackend` until a real Runtime adapter is wired in.
    let session_backend: Arc<dyn SessionBackend> = Arc::new(MockBackend::new());
    tracing::info!("session backend ready (mock)");

    // ── Transcript store & discovery ─────────────────────────────────
    let transcript_store =
        Arc::new(TranscriptStore::new(config.voice_sessions_root.clone(), config.runtime_home.clone()));
    tracing::info!(path = %config.voice_sessions_root.display(), "transcript store ready");

    let discovery = Arc::new(Discovery::new(config.runtime_home.clone()));
    tracing::info!(path = %config.runtime_home.display(), "session discovery ready");

    // ── Voice (Realtime API) config ──────────────────────────────────
    let voice_config = Arc::new(VoiceConfig {
        model: config.voice.model.clone(),
        voice: config.voice.voice.clone(),
        instructions: format!("You are {}, a voice assistant for a coding session.", config.voice.assistant_name),
        tools: Vec::new(),
        openai_api_key: xp_domain::config::resolve_api_token("OPENAI_API_KEY").unwrap_or_default(),
    });

    let state = AppState {
        config: config.clone(),
        session_backend,
        transcript_store,
        discovery,
        voice_config,
        http_client: reqwest::Client::new(),
        voice_connections: Arc::new(Mutex::new(HashMap::new())),
        runtime_home: config.runtime_home.clone(),
        api_token_hash,
        memory: Arc::new(Mutex::new(MemoryStore::default())),
        paused_sessions: Arc::new(Mutex::new(HashSet::new())),
    };

    // ── CORS layer ────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent = std::env::var("EXPERIENCE_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    // ── Bind ───────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "experience server listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Builds a [`CorsLayer`] from the configured allowed origins. A literal
/// `"*"` is fully permissive; entries ending in `:*` match any port on
/// that host via a digit-only-suffix predicate.
fn build_cors_layer(cors: &xp_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
