//! Pending lore suggestions and their accept/reject transitions.
//!
//! Suggestions are advisory: the target entry is existence-checked again
//! at accept time, because background extraction may race with lore
//! edits (see suggest.rs).

use rusqlite::params;

use crate::suggest::{merge_description, union_triggers};

use super::*;

impl StoryDB {
    pub fn insert_suggestion(
        &self,
        input: SuggestionInput,
    ) -> Result<LoreSuggestion, StoryError> {
        let conn = self.conn()?;
        let id = new_id();
        conn.execute(
            "INSERT INTO lore_suggestions (id, story_id, kind, status, title, tag, description, \
             triggers, confidence, target_lore_id, source_user, source_assistant, created_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                input.story_id,
                input.kind,
                input.title,
                input.tag,
                input.description,
                input.triggers,
                input.confidence,
                input.target_lore_id,
                input.source_user,
                input.source_assistant,
                now_ms(),
            ],
        )?;
        self.get_suggestion(&input.story_id, &id)?.ok_or(StoryError::NotFound)
    }

    /// Guard against duplicate extraction runs (retries): one pending
    /// suggestion per (story, title, kind).
    pub fn pending_suggestion_exists(
        &self,
        story_id: &str,
        title: &str,
        kind: &str,
    ) -> Result<bool, StoryError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lore_suggestions \
             WHERE story_id = ?1 AND title = ?2 AND kind = ?3 AND status = 'pending'",
            [story_id, title, kind],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn list_suggestions(
        &self,
        story_id: &str,
        status: Option<&str>,
    ) -> Result<Vec<LoreSuggestion>, StoryError> {
        let conn = self.conn()?;
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM lore_suggestions WHERE story_id = ?1 AND status = ?2 \
                     ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map([story_id, status], row_to_suggestion)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM lore_suggestions WHERE story_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map([story_id], row_to_suggestion)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn get_suggestion(
        &self,
        story_id: &str,
        suggestion_id: &str,
    ) -> Result<Option<LoreSuggestion>, StoryError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT * FROM lore_suggestions WHERE story_id = ?1 AND id = ?2",
                [story_id, suggestion_id],
                row_to_suggestion,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    /// Accept a pending suggestion.
    ///
    /// UPDATE with a live target merges into it: description appended only
    /// when novel, trigger sets unioned. UPDATE whose target vanished, and
    /// NEW, both create a fresh entry. Returns the touched entry; the
    /// caller re-enqueues embedding for it.
    pub fn accept_suggestion(
        &self,
        story_id: &str,
        suggestion_id: &str,
    ) -> Result<LoreEntry, StoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let suggestion = tx
            .query_row(
                "SELECT * FROM lore_suggestions WHERE story_id = ?1 AND id = ?2",
                [story_id, suggestion_id],
                row_to_suggestion,
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Err(StoryError::NotFound),
                other => Err(other.into()),
            })?;
        if suggestion.status != PENDING {
            return Err(StoryError::NotFound);
        }

        let now = now_ms();
        let target = suggestion.target_lore_id.as_deref().and_then(|target_id| {
            tx.query_row(
                "SELECT * FROM lore_entries WHERE story_id = ?1 AND id = ?2",
                [story_id, target_id],
                row_to_lore,
            )
            .ok()
        });

        let entry_id = match (suggestion.kind.as_str(), target) {
            ("UPDATE", Some(entry)) => {
                let description = merge_description(&entry.description, &suggestion.description);
                let triggers = union_triggers(&entry.triggers, &suggestion.triggers);
                tx.execute(
                    "UPDATE lore_entries SET description = ?1, triggers = ?2, updated_at = ?3 \
                     WHERE id = ?4",
                    params![description, triggers, now, entry.id],
                )?;
                tx.execute(
                    "UPDATE lore_vectors SET embedding = NULL WHERE lore_id = ?1",
                    [entry.id.as_str()],
                )?;
                entry.id
            }
            // NEW, or UPDATE whose target no longer exists.
            _ => {
                let id = new_id();
                tx.execute(
                    "INSERT INTO lore_entries (id, story_id, title, tag, triggers, description, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        id,
                        story_id,
                        suggestion.title,
                        suggestion.tag,
                        suggestion.triggers,
                        suggestion.description,
                        now,
                    ],
                )?;
                id
            }
        };

        tx.execute(
            "UPDATE lore_suggestions SET status = ?1 WHERE id = ?2",
            params![ACCEPTED, suggestion_id],
        )?;
        tx.commit()?;
        self.get_lore(story_id, &entry_id)?.ok_or(StoryError::NotFound)
    }

    pub fn reject_suggestion(
        &self,
        story_id: &str,
        suggestion_id: &str,
    ) -> Result<(), StoryError> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE lore_suggestions SET status = ?1 \
             WHERE story_id = ?2 AND id = ?3 AND status = ?4",
            params![REJECTED, story_id, suggestion_id, PENDING],
        )?;
        if n == 0 {
            return Err(StoryError::NotFound);
        }
        Ok(())
    }
}
