pub mod ai;
pub mod api;
pub mod assemble;
pub mod db;
pub mod error;
pub mod jobs;
pub mod prompts;
pub mod retrieve;
pub mod settings;
pub mod suggest;
pub mod summarize;
pub mod turn;
pub mod util;

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

pub type SharedDB = Arc<db::StoryDB>;

/// Run a blocking DB operation on tokio's blocking thread pool.
///
/// All synchronous StoryDB calls in async context MUST go through this
/// to avoid starving tokio worker threads.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::StoryError>
where
    F: FnOnce(&db::StoryDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| error::StoryError::Internal(e.to_string()))
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDB,
    pub ai: Option<ai::AiConfig>,
    pub jobs: jobs::JobQueue,
    pub embed_cache: EmbedCache,
    pub settings: settings::TurnSettings,
    pub started_at: std::time::Instant,
}

impl AppState {
    /// `None` when no model backend is configured — turn endpoints then
    /// answer 503 while CRUD keeps working.
    pub fn turn_runner(&self) -> Option<turn::TurnRunner> {
        let cfg = self.ai.clone()?;
        Some(turn::TurnRunner {
            db: self.db.clone(),
            chat: Arc::new(cfg.clone()),
            embedder: Some(Arc::new(cfg.clone())),
            cache: self.embed_cache.clone(),
            jobs: self.jobs.clone(),
            settings: self.settings.clone(),
            chat_model: cfg.chat_model,
            summary_model: cfg.summary_model,
        })
    }
}

/// Small LRU cache for query embeddings so repeated retrieval of the same
/// input doesn't hit the embedding backend again.
#[derive(Clone)]
pub struct EmbedCache {
    inner: Arc<parking_lot::Mutex<LruCache<String, Vec<f32>>>>,
}

impl EmbedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(128).unwrap()),
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: String, value: Vec<f32>) {
        self.inner.lock().put(key, value);
    }
}
