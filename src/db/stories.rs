//! Story CRUD, message history and the per-turn commit transaction.

use rusqlite::params;

use super::*;

fn effective_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() { "Untitled Story".into() } else { trimmed.to_string() }
}

impl StoryDB {
    pub fn insert_story(&self, input: StoryInput) -> Result<Story, StoryError> {
        for lore in &input.lore {
            validate_lore_input(lore)?;
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = new_id();
        let now = now_ms();
        tx.execute(
            "INSERT INTO stories (id, title, ai_instruction_key, ai_instructions, plot_essentials, \
             author_note, description, tags, summary_prompt_key, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                effective_title(&input.title),
                input.ai_instruction_key,
                input.ai_instructions,
                input.plot_essentials,
                input.author_note,
                input.description,
                serde_json::to_string(&input.tags).unwrap_or_else(|_| "[]".into()),
                input.summary_prompt_key,
                now,
            ],
        )?;
        if !input.plot_summary.trim().is_empty() {
            tx.execute(
                "INSERT INTO story_summaries (story_id, summary, last_position, updated_at) \
                 VALUES (?1, ?2, -1, ?3)",
                params![id, input.plot_summary.trim(), now],
            )?;
        }
        for lore in &input.lore {
            insert_lore_row(&tx, &id, lore, now)?;
        }
        tx.commit()?;
        self.get_story(&id)?.ok_or(StoryError::NotFound)
    }

    pub fn list_stories(&self) -> Result<Vec<Story>, StoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM stories ORDER BY updated_at DESC")?;
        let rows = stmt
            .query_map([], row_to_story)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_story(&self, id: &str) -> Result<Option<Story>, StoryError> {
        let conn = self.conn()?;
        let story = conn
            .query_row("SELECT * FROM stories WHERE id = ?1", [id], row_to_story)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(story)
    }

    /// Apply a partial update. Returns the updated story plus the ids of
    /// lore entries whose vectors need recomputing (non-empty only when
    /// the patch replaced the lore list).
    pub fn update_story(
        &self,
        id: &str,
        patch: StoryPatch,
    ) -> Result<Option<(Story, Vec<String>)>, StoryError> {
        if let Some(ref lore) = patch.lore {
            for entry in lore {
                validate_lore_input(entry)?;
            }
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let exists: bool =
            tx.query_row("SELECT COUNT(*) FROM stories WHERE id = ?1", [id], |r| {
                r.get::<_, i64>(0).map(|n| n > 0)
            })?;
        if !exists {
            return Ok(None);
        }
        let now = now_ms();

        if let Some(ref title) = patch.title {
            tx.execute(
                "UPDATE stories SET title = ?1 WHERE id = ?2",
                params![effective_title(title), id],
            )?;
        }
        let simple: [(&str, &Option<String>); 5] = [
            ("ai_instruction_key", &patch.ai_instruction_key),
            ("ai_instructions", &patch.ai_instructions),
            ("plot_essentials", &patch.plot_essentials),
            ("author_note", &patch.author_note),
            ("description", &patch.description),
        ];
        for (col, value) in simple {
            if let Some(v) = value {
                tx.execute(&format!("UPDATE stories SET {col} = ?1 WHERE id = ?2"), params![v, id])?;
            }
        }
        if let Some(ref tags) = patch.tags {
            tx.execute(
                "UPDATE stories SET tags = ?1 WHERE id = ?2",
                params![serde_json::to_string(tags).unwrap_or_else(|_| "[]".into()), id],
            )?;
        }
        if let Some(ref key) = patch.summary_prompt_key {
            tx.execute(
                "UPDATE stories SET summary_prompt_key = ?1 WHERE id = ?2",
                params![key, id],
            )?;
        }
        if let Some(ref summary) = patch.plot_summary {
            tx.execute(
                "INSERT INTO story_summaries (story_id, summary, last_position, updated_at) \
                 VALUES (?1, ?2, -1, ?3) \
                 ON CONFLICT(story_id) DO UPDATE SET summary = ?2, updated_at = ?3",
                params![id, summary.trim(), now],
            )?;
        }

        let mut embed_ids = Vec::new();
        if let Some(ref lore) = patch.lore {
            tx.execute("DELETE FROM lore_entries WHERE story_id = ?1", [id])?;
            for entry in lore {
                embed_ids.push(insert_lore_row(&tx, id, entry, now)?);
            }
        }

        tx.execute("UPDATE stories SET updated_at = ?1 WHERE id = ?2", params![now, id])?;
        tx.commit()?;
        let story = self.get_story(id)?.ok_or(StoryError::NotFound)?;
        Ok(Some((story, embed_ids)))
    }

    /// Cascades to messages, summary, lore entries, vectors, suggestions.
    pub fn delete_story(&self, id: &str) -> Result<bool, StoryError> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM stories WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    pub fn summary_record(&self, story_id: &str) -> Result<Option<StorySummary>, StoryError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT story_id, summary, last_position, updated_at \
                 FROM story_summaries WHERE story_id = ?1",
                [story_id],
                |r| {
                    Ok(StorySummary {
                        story_id: r.get(0)?,
                        summary: r.get(1)?,
                        last_position: r.get(2)?,
                        updated_at: r.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    pub fn plot_summary(&self, story_id: &str) -> Result<String, StoryError> {
        Ok(self.summary_record(story_id)?.map(|s| s.summary).unwrap_or_default())
    }

    pub fn list_messages(&self, story_id: &str) -> Result<Vec<StoryMessage>, StoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM story_messages WHERE story_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map([story_id], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn last_assistant_text(&self, story_id: &str) -> Result<Option<String>, StoryError> {
        let conn = self.conn()?;
        let text = conn
            .query_row(
                "SELECT text FROM story_messages \
                 WHERE story_id = ?1 AND role = 'assistant' AND text != '' \
                 ORDER BY position DESC LIMIT 1",
                [story_id],
                |r| r.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(text)
    }

    /// Persist one completed turn: user message, assistant message and the
    /// updated summary in a single transaction, so a crash can never leave
    /// `last_position` ahead of the stored messages.
    ///
    /// Returns the (user, assistant) positions.
    pub fn commit_turn(
        &self,
        story_id: &str,
        mode: &str,
        user_text: &str,
        assistant_text: &str,
        summary: &str,
    ) -> Result<(i64, i64), StoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let exists: bool =
            tx.query_row("SELECT COUNT(*) FROM stories WHERE id = ?1", [story_id], |r| {
                r.get::<_, i64>(0).map(|n| n > 0)
            })?;
        if !exists {
            return Err(StoryError::NotFound);
        }
        let now = now_ms();
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM story_messages WHERE story_id = ?1",
            [story_id],
            |r| r.get(0),
        )?;
        let user_pos = next;
        let assistant_pos = next + 1;
        tx.execute(
            "INSERT INTO story_messages (id, story_id, role, text, mode, position, created_at) \
             VALUES (?1, ?2, 'user', ?3, ?4, ?5, ?6)",
            params![new_id(), story_id, user_text, mode, user_pos, now],
        )?;
        tx.execute(
            "INSERT INTO story_messages (id, story_id, role, text, mode, position, created_at) \
             VALUES (?1, ?2, 'assistant', ?3, NULL, ?4, ?5)",
            params![new_id(), story_id, assistant_text, assistant_pos, now],
        )?;

        // One turn = one user/assistant pair; the summary has now folded in
        // every turn up to and including this one.
        let turn_index = user_pos / 2;
        tx.execute(
            "INSERT INTO story_summaries (story_id, summary, last_position, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(story_id) DO UPDATE SET summary = ?2, last_position = ?3, updated_at = ?4",
            params![story_id, summary, turn_index, now],
        )?;
        tx.execute("UPDATE stories SET updated_at = ?1 WHERE id = ?2", params![now, story_id])?;
        tx.commit()?;
        Ok((user_pos, assistant_pos))
    }
}

/// Shared by story create/replace paths; returns the new entry id.
pub(super) fn insert_lore_row(
    tx: &rusqlite::Transaction,
    story_id: &str,
    input: &LoreEntryInput,
    now: i64,
) -> Result<String, StoryError> {
    let id = input.id.clone().unwrap_or_else(new_id);
    let tag = if input.tag.trim().is_empty() { "Character" } else { input.tag.trim() };
    tx.execute(
        "INSERT INTO lore_entries (id, story_id, title, tag, triggers, description, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, story_id, input.title.trim(), tag, input.triggers, input.description, now],
    )?;
    Ok(id)
}
