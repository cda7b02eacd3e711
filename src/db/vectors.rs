//! Derived lore vectors: an eventually-consistent projection of lore
//! entry text into embedding space. Rows may be absent (not yet
//! computed) or carry a NULL embedding (content changed or the
//! embedding backend was unavailable) — retrieval tolerates both.

use rusqlite::params;

use super::*;

#[derive(Debug, Clone)]
pub struct LoreVector {
    pub lore_id: String,
    pub embedding: Option<Vec<f32>>,
}

impl StoryDB {
    pub fn upsert_lore_vector(
        &self,
        lore_id: &str,
        story_id: &str,
        content: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoryError> {
        let blob = embedding.map(crate::ai::embedding_to_bytes);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO lore_vectors (lore_id, story_id, content, embedding, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(lore_id) DO UPDATE SET content = ?3, embedding = ?4, updated_at = ?5",
            params![lore_id, story_id, content, blob, now_ms()],
        )?;
        Ok(())
    }

    pub fn story_vectors(&self, story_id: &str) -> Result<Vec<LoreVector>, StoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT lore_id, embedding FROM lore_vectors WHERE story_id = ?1",
        )?;
        let rows = stmt
            .query_map([story_id], |r| {
                let blob: Option<Vec<u8>> = r.get(1)?;
                Ok(LoreVector {
                    lore_id: r.get(0)?,
                    embedding: blob.map(|b| crate::ai::bytes_to_embedding(&b)),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
