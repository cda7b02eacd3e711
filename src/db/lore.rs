//! Lore entry CRUD. Content changes invalidate the entry's vector; the
//! caller re-enqueues embedding afterwards.

use rusqlite::params;

use super::stories::insert_lore_row;
use super::*;

impl StoryDB {
    pub fn insert_lore(
        &self,
        story_id: &str,
        input: LoreEntryInput,
    ) -> Result<LoreEntry, StoryError> {
        validate_lore_input(&input)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let exists: bool =
            tx.query_row("SELECT COUNT(*) FROM stories WHERE id = ?1", [story_id], |r| {
                r.get::<_, i64>(0).map(|n| n > 0)
            })?;
        if !exists {
            return Err(StoryError::NotFound);
        }
        let id = insert_lore_row(&tx, story_id, &input, now_ms())?;
        tx.commit()?;
        self.get_lore(story_id, &id)?.ok_or(StoryError::NotFound)
    }

    /// Ordered by creation time ascending (stable story-editor order).
    pub fn list_lore(&self, story_id: &str) -> Result<Vec<LoreEntry>, StoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM lore_entries WHERE story_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([story_id], row_to_lore)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The `k` most recently created entries — the retrieval fallback when
    /// no embeddings are available.
    pub fn recent_lore(&self, story_id: &str, k: usize) -> Result<Vec<LoreEntry>, StoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM lore_entries WHERE story_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![story_id, k as i64], row_to_lore)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_lore(
        &self,
        story_id: &str,
        entry_id: &str,
    ) -> Result<Option<LoreEntry>, StoryError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT * FROM lore_entries WHERE story_id = ?1 AND id = ?2",
                [story_id, entry_id],
                row_to_lore,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    /// Full-field update. Clears the stored vector embedding in the same
    /// transaction so retrieval never ranks against stale content.
    pub fn update_lore(
        &self,
        story_id: &str,
        entry_id: &str,
        input: LoreEntryInput,
    ) -> Result<Option<LoreEntry>, StoryError> {
        validate_lore_input(&input)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let tag = if input.tag.trim().is_empty() { "Character" } else { input.tag.trim() };
        let n = tx.execute(
            "UPDATE lore_entries SET title = ?1, tag = ?2, triggers = ?3, description = ?4, updated_at = ?5 \
             WHERE story_id = ?6 AND id = ?7",
            params![input.title.trim(), tag, input.triggers, input.description, now_ms(), story_id, entry_id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        tx.execute("UPDATE lore_vectors SET embedding = NULL WHERE lore_id = ?1", [entry_id])?;
        tx.commit()?;
        self.get_lore(story_id, entry_id)
    }

    /// The vector row goes with it (FK cascade).
    pub fn delete_lore(&self, story_id: &str, entry_id: &str) -> Result<bool, StoryError> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM lore_entries WHERE story_id = ?1 AND id = ?2",
            [story_id, entry_id],
        )?;
        Ok(n > 0)
    }

    /// Lookup by entry id alone — background jobs carry no story id.
    pub fn find_lore_by_id(&self, entry_id: &str) -> Result<Option<LoreEntry>, StoryError> {
        let conn = self.conn()?;
        let row = conn
            .query_row("SELECT * FROM lore_entries WHERE id = ?1", [entry_id], row_to_lore)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    /// Entries with no vector row or a NULL embedding — startup backfill.
    pub fn lore_ids_missing_vectors(&self) -> Result<Vec<String>, StoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id FROM lore_entries e \
             LEFT JOIN lore_vectors v ON v.lore_id = e.id \
             WHERE v.lore_id IS NULL OR v.embedding IS NULL",
        )?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
