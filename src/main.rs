//! spindle — interactive storytelling engine.
//! Streams narrated turns, keeps a rolling plot summary, and mines lore
//! suggestions in the background.

use std::sync::Arc;

use clap::Parser;
use spindle::{ai, api, db, jobs, settings, AppState, EmbedCache, SharedDB};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spindle", version, about = "Interactive storytelling engine")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "17000", env = "SPINDLE_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "spindle.db", env = "SPINDLE_DB")]
    db: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let store = db::StoryDB::open(&args.db).expect("failed to open database");
    let shared: SharedDB = Arc::new(store);

    let ai_cfg = ai::AiConfig::from_env();
    let ai_status = match &ai_cfg {
        Some(cfg) => format!(
            "chat={} summary={} embed={}",
            cfg.chat_model, cfg.summary_model, cfg.embed_model
        ),
        None => "disabled".into(),
    };

    let jobs = jobs::JobQueue::start(shared.clone(), ai_cfg.clone());

    // Reconcile the vector index: anything created or edited while the
    // service was down gets re-embedded.
    match shared.lore_ids_missing_vectors() {
        Ok(ids) => {
            if !ids.is_empty() {
                info!(count = ids.len(), "re-embedding stale lore vectors");
            }
            for lore_id in ids {
                jobs.enqueue(jobs::Job::EmbedLore { lore_id });
            }
        }
        Err(e) => tracing::warn!(error = %e, "vector backfill scan failed"),
    }

    let state = AppState {
        db: shared,
        ai: ai_cfg,
        jobs,
        embed_cache: EmbedCache::new(128),
        settings: settings::TurnSettings::from_env(),
        started_at: std::time::Instant::now(),
    };
    let app = api::router(state);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        ai = %ai_status,
        "spindle starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
