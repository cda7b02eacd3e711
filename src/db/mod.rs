//! SQLite-backed story storage: stories, messages, summaries, lore,
//! lore vectors and pending lore suggestions.

mod lore;
mod stories;
mod suggestions;
mod vectors;

pub use vectors::LoreVector;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::StoryError;

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents SQLITE_BUSY under concurrent write pressure (jobs + API).
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const MAX_TEXT_LEN: usize = 65_536;
const MAX_TITLE_LEN: usize = 256;

pub const PENDING: &str = "pending";
pub const ACCEPTED: &str = "accepted";
pub const REJECTED: &str = "rejected";

#[derive(Debug, Clone, Serialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub ai_instruction_key: String,
    pub ai_instructions: String,
    pub plot_essentials: String,
    pub author_note: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_prompt_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoryInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub ai_instruction_key: String,
    #[serde(default)]
    pub ai_instructions: String,
    #[serde(default)]
    pub plot_summary: String,
    #[serde(default)]
    pub plot_essentials: String,
    #[serde(default)]
    pub author_note: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary_prompt_key: Option<String>,
    #[serde(default)]
    pub lore: Vec<LoreEntryInput>,
}

/// Partial update for PUT — absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct StoryPatch {
    pub title: Option<String>,
    pub ai_instruction_key: Option<String>,
    pub ai_instructions: Option<String>,
    pub plot_summary: Option<String>,
    pub plot_essentials: Option<String>,
    pub author_note: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub summary_prompt_key: Option<String>,
    pub lore: Option<Vec<LoreEntryInput>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryMessage {
    pub id: String,
    pub story_id: String,
    pub role: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub position: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorySummary {
    pub story_id: String,
    pub summary: String,
    /// Index of the last turn folded into the summary, -1 when none.
    pub last_position: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoreEntry {
    pub id: String,
    pub story_id: String,
    pub title: String,
    pub tag: String,
    pub triggers: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoreEntryInput {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub triggers: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoreSuggestion {
    pub id: String,
    pub story_id: String,
    pub kind: String,
    pub status: String,
    pub title: String,
    pub tag: String,
    pub description: String,
    pub triggers: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_lore_id: Option<String>,
    pub source_user: String,
    pub source_assistant: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct SuggestionInput {
    pub story_id: String,
    pub kind: String,
    pub title: String,
    pub tag: String,
    pub description: String,
    pub triggers: String,
    pub confidence: f64,
    pub target_lore_id: Option<String>,
    pub source_user: String,
    pub source_assistant: String,
}

pub(crate) fn validate_lore_input(input: &LoreEntryInput) -> Result<(), StoryError> {
    if input.title.trim().is_empty() {
        return Err(StoryError::Validation("lore title must not be empty".into()));
    }
    if input.title.chars().count() > MAX_TITLE_LEN {
        return Err(StoryError::Validation("lore title too long".into()));
    }
    if input.description.chars().count() > MAX_TEXT_LEN {
        return Err(StoryError::Validation("lore description too long".into()));
    }
    Ok(())
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stories (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    ai_instruction_key TEXT NOT NULL DEFAULT '',
    ai_instructions TEXT NOT NULL DEFAULT '',
    plot_essentials TEXT NOT NULL DEFAULT '',
    author_note TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',
    summary_prompt_key TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS story_messages (
    id TEXT PRIMARY KEY,
    story_id TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    mode TEXT,
    position INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(story_id, position)
);
CREATE INDEX IF NOT EXISTS idx_messages_story ON story_messages(story_id, position);

CREATE TABLE IF NOT EXISTS story_summaries (
    story_id TEXT PRIMARY KEY REFERENCES stories(id) ON DELETE CASCADE,
    summary TEXT NOT NULL DEFAULT '',
    last_position INTEGER NOT NULL DEFAULT -1,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS lore_entries (
    id TEXT PRIMARY KEY,
    story_id TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    tag TEXT NOT NULL DEFAULT 'Character',
    triggers TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lore_story ON lore_entries(story_id, created_at);

CREATE TABLE IF NOT EXISTS lore_vectors (
    lore_id TEXT PRIMARY KEY REFERENCES lore_entries(id) ON DELETE CASCADE,
    story_id TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    embedding BLOB,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vectors_story ON lore_vectors(story_id);

CREATE TABLE IF NOT EXISTS lore_suggestions (
    id TEXT PRIMARY KEY,
    story_id TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    title TEXT NOT NULL,
    tag TEXT NOT NULL DEFAULT 'Character',
    description TEXT NOT NULL DEFAULT '',
    triggers TEXT NOT NULL DEFAULT '',
    confidence REAL NOT NULL DEFAULT 0,
    target_lore_id TEXT,
    source_user TEXT NOT NULL DEFAULT '',
    source_assistant TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_suggestions_story ON lore_suggestions(story_id, status);
"#;

/// SQLite-backed story store.
pub struct StoryDB {
    pool: Pool<SqliteConnectionManager>,
}

impl StoryDB {
    pub(crate) fn conn(&self) -> Result<PooledConn, StoryError> {
        self.pool.get().map_err(|e| StoryError::Internal(format!("pool: {e}")))
    }

    /// Open (or create) a database at the given path.
    /// Pool size defaults to 8 (1 writer + 7 readers in WAL mode).
    pub fn open(path: &str) -> Result<Self, StoryError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each test gets a unique name to avoid cross-test pollution.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| StoryError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| StoryError::Internal(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        Ok(Self { pool })
    }
}

pub(crate) fn row_to_story(row: &rusqlite::Row) -> rusqlite::Result<Story> {
    let tags_str: String = row.get("tags")?;
    Ok(Story {
        id: row.get("id")?,
        title: row.get("title")?,
        ai_instruction_key: row.get("ai_instruction_key")?,
        ai_instructions: row.get("ai_instructions")?,
        plot_essentials: row.get("plot_essentials")?,
        author_note: row.get("author_note")?,
        description: row.get("description")?,
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        summary_prompt_key: row.get("summary_prompt_key")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<StoryMessage> {
    Ok(StoryMessage {
        id: row.get("id")?,
        story_id: row.get("story_id")?,
        role: row.get("role")?,
        text: row.get("text")?,
        mode: row.get("mode")?,
        position: row.get("position")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn row_to_lore(row: &rusqlite::Row) -> rusqlite::Result<LoreEntry> {
    Ok(LoreEntry {
        id: row.get("id")?,
        story_id: row.get("story_id")?,
        title: row.get("title")?,
        tag: row.get("tag")?,
        triggers: row.get("triggers")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn row_to_suggestion(row: &rusqlite::Row) -> rusqlite::Result<LoreSuggestion> {
    Ok(LoreSuggestion {
        id: row.get("id")?,
        story_id: row.get("story_id")?,
        kind: row.get("kind")?,
        status: row.get("status")?,
        title: row.get("title")?,
        tag: row.get("tag")?,
        description: row.get("description")?,
        triggers: row.get("triggers")?,
        confidence: row.get("confidence")?,
        target_lore_id: row.get("target_lore_id")?,
        source_user: row.get("source_user")?,
        source_assistant: row.get("source_assistant")?,
        created_at: row.get("created_at")?,
    })
}
