mod common;

use std::time::Duration;

use common::{seed_story, test_db};
use spindle::db::LoreEntryInput;
use spindle::jobs::{Job, JobQueue};

async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn embed_job_stores_null_vector_without_backend() {
    let db = test_db();
    let story = seed_story(&db, "Jobs");
    let entry = db
        .insert_lore(
            &story.id,
            LoreEntryInput { title: "Gareth".into(), description: "A knight.".into(), ..Default::default() },
        )
        .unwrap();

    let jobs = JobQueue::start_with(db.clone(), None, 1, 8);
    jobs.enqueue(Job::EmbedLore { lore_id: entry.id.clone() });

    let db_check = db.clone();
    let sid = story.id.clone();
    assert!(wait_for(move || !db_check.story_vectors(&sid).unwrap_or_default().is_empty()).await);
    let vectors = db.story_vectors(&story.id).unwrap();
    assert_eq!(vectors[0].lore_id, entry.id);
    // no embedding backend: the row records "not embedded yet"
    assert!(vectors[0].embedding.is_none());
}

#[tokio::test]
async fn embed_job_tolerates_deleted_entry() {
    let db = test_db();
    let story = seed_story(&db, "Gone");
    let entry = db
        .insert_lore(&story.id, LoreEntryInput { title: "Doomed".into(), ..Default::default() })
        .unwrap();
    db.delete_lore(&story.id, &entry.id).unwrap();

    let jobs = JobQueue::start_with(db.clone(), None, 1, 8);
    jobs.enqueue(Job::EmbedLore { lore_id: entry.id });
    // nothing to assert beyond "no crash, no row"
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(db.story_vectors(&story.id).unwrap().is_empty());
}

#[tokio::test]
async fn full_queue_drops_instead_of_blocking() {
    let db = test_db();
    let jobs = JobQueue::start_with(db, None, 1, 1);
    // enqueue far past capacity; must return immediately every time
    for n in 0..50 {
        jobs.enqueue(Job::EmbedLore { lore_id: format!("x{n}") });
    }
}
