//! Lore retrieval for a turn: vector similarity when embeddings exist,
//! recency otherwise. Never fails a turn — every error path degrades to
//! the recency fallback, and the fallback's own failure to an empty set.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ai::{cosine_similarity, Embedder};
use crate::db::{LoreEntry, StoryDB};
use crate::{db_call, EmbedCache, SharedDB};

/// Rank entries by cosine similarity to the query embedding, most similar
/// first, stable tie-break by creation time descending. Entries without a
/// stored embedding cannot rank and are skipped.
pub fn rank_by_embedding(
    entries: &[LoreEntry],
    vectors: &HashMap<String, Vec<f32>>,
    query_emb: &[f32],
    k: usize,
) -> Vec<LoreEntry> {
    let mut scored: Vec<(f64, &LoreEntry)> = entries
        .iter()
        .filter_map(|e| {
            let emb = vectors.get(&e.id)?;
            Some((cosine_similarity(query_emb, emb), e))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
    });
    scored.into_iter().take(k).map(|(_, e)| e.clone()).collect()
}

fn recency_fallback(db: &StoryDB, story_id: &str, k: usize) -> Vec<LoreEntry> {
    match db.recent_lore(story_id, k) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, story_id, "lore recency fallback failed");
            Vec::new()
        }
    }
}

/// Retrieve up to `top_k` lore entries relevant to `query`.
///
/// An empty query (continuation turns) suppresses retrieval entirely —
/// continuing prior output should not re-inject potentially-irrelevant
/// lore.
pub async fn retrieve(
    db: &SharedDB,
    embedder: Option<&dyn Embedder>,
    cache: &EmbedCache,
    story_id: &str,
    query: &str,
    top_k: usize,
) -> Vec<LoreEntry> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let query_emb = match embedder {
        Some(embedder) => match cache.get(query) {
            Some(hit) => Some(hit),
            None => {
                let emb = embedder.embed(query).await;
                if let Some(ref v) = emb {
                    cache.insert(query.to_string(), v.clone());
                }
                emb
            }
        },
        None => None,
    };

    let sid = story_id.to_string();
    let loaded = db_call(db, move |db| {
        let entries = db.list_lore(&sid)?;
        let vectors = db.story_vectors(&sid)?;
        Ok::<_, crate::error::StoryError>((entries, vectors))
    })
    .await;

    let (entries, vectors) = match loaded {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) | Err(e) => {
            warn!(error = %e, story_id, "lore load failed, returning no lore");
            return Vec::new();
        }
    };

    if let Some(ref query_emb) = query_emb {
        let embedded: HashMap<String, Vec<f32>> = vectors
            .into_iter()
            .filter_map(|v| Some((v.lore_id, v.embedding?)))
            .collect();
        if !embedded.is_empty() {
            let ranked = rank_by_embedding(&entries, &embedded, query_emb, top_k);
            debug!(story_id, hits = ranked.len(), "lore retrieved by similarity");
            return ranked;
        }
    }

    debug!(story_id, "lore retrieval falling back to recency");
    let sid = story_id.to_string();
    let k = top_k;
    db_call(db, move |db| recency_fallback(db, &sid, k)).await.unwrap_or_default()
}
