mod common;

use common::{seed_story, test_db};
use spindle::db::{LoreEntryInput, StoryInput, StoryPatch};

#[test]
fn story_crud() {
    let db = test_db();
    let story = db
        .insert_story(StoryInput {
            title: "The Hollow Crown".into(),
            ai_instruction_key: "dark_storyteller".into(),
            ai_instructions: "Narrate grimly.".into(),
            plot_essentials: "The king is dead.".into(),
            tags: vec!["fantasy".into()],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(story.title, "The Hollow Crown");
    assert_eq!(story.tags, vec!["fantasy"]);

    let got = db.get_story(&story.id).unwrap().unwrap();
    assert_eq!(got.ai_instruction_key, "dark_storyteller");

    let (updated, embed_ids) = db
        .update_story(&story.id, StoryPatch { title: Some("Crown".into()), ..Default::default() })
        .unwrap()
        .unwrap();
    assert_eq!(updated.title, "Crown");
    assert!(embed_ids.is_empty());
    // untouched fields survive a partial update
    assert_eq!(updated.plot_essentials, "The king is dead.");

    assert!(db.delete_story(&story.id).unwrap());
    assert!(db.get_story(&story.id).unwrap().is_none());
    assert!(!db.delete_story(&story.id).unwrap());
}

#[test]
fn blank_title_defaults() {
    let db = test_db();
    let story = db.insert_story(StoryInput { title: "   ".into(), ..Default::default() }).unwrap();
    assert_eq!(story.title, "Untitled Story");
}

#[test]
fn create_with_summary_and_lore() {
    let db = test_db();
    let story = db
        .insert_story(StoryInput {
            title: "Seeded".into(),
            plot_summary: "It begins.".into(),
            lore: vec![LoreEntryInput {
                title: "Gareth".into(),
                tag: "Character".into(),
                triggers: "knight".into(),
                description: "A wandering knight.".into(),
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(db.plot_summary(&story.id).unwrap(), "It begins.");
    let record = db.summary_record(&story.id).unwrap().unwrap();
    assert_eq!(record.last_position, -1);
    assert_eq!(db.list_lore(&story.id).unwrap().len(), 1);
}

#[test]
fn commit_turn_positions_and_last_position() {
    let db = test_db();
    let story = seed_story(&db, "Turns");

    for n in 0..4 {
        let (user_pos, assistant_pos) = db
            .commit_turn(&story.id, "story", &format!("input {n}"), &format!("output {n}"), "sum")
            .unwrap();
        assert_eq!(user_pos, n * 2);
        assert_eq!(assistant_pos, n * 2 + 1);

        // after N committed turns: 2N messages, last_position == N-1
        let messages = db.list_messages(&story.id).unwrap();
        assert_eq!(messages.len() as i64, (n + 1) * 2);
        let record = db.summary_record(&story.id).unwrap().unwrap();
        assert_eq!(record.last_position, n);
    }

    let messages = db.list_messages(&story.id).unwrap();
    for (i, msg) in messages.iter().enumerate() {
        assert_eq!(msg.position, i as i64);
        assert_eq!(msg.role, if i % 2 == 0 { "user" } else { "assistant" });
    }
    assert_eq!(messages[0].mode.as_deref(), Some("story"));
    assert_eq!(messages[1].mode, None);
}

#[test]
fn at_most_one_summary_record() {
    let db = test_db();
    let story = seed_story(&db, "Summaries");
    db.commit_turn(&story.id, "story", "a", "b", "first").unwrap();
    db.commit_turn(&story.id, "story", "c", "d", "second").unwrap();
    db.update_story(&story.id, StoryPatch { plot_summary: Some("edited".into()), ..Default::default() })
        .unwrap()
        .unwrap();
    let record = db.summary_record(&story.id).unwrap().unwrap();
    assert_eq!(record.summary, "edited");
    // last_position survives a summary-text edit
    assert_eq!(record.last_position, 1);
}

#[test]
fn commit_turn_missing_story() {
    let db = test_db();
    let err = db.commit_turn("nope", "story", "a", "b", "").unwrap_err();
    assert!(matches!(err, spindle::error::StoryError::NotFound));
}

#[test]
fn last_assistant_skips_empty() {
    let db = test_db();
    let story = seed_story(&db, "History");
    db.commit_turn(&story.id, "story", "one", "The door creaks open.", "").unwrap();
    db.commit_turn(&story.id, "story", "two", "", "").unwrap();
    assert_eq!(
        db.last_assistant_text(&story.id).unwrap().as_deref(),
        Some("The door creaks open.")
    );
}

#[test]
fn lore_crud_and_vector_invalidation() {
    let db = test_db();
    let story = seed_story(&db, "Lore");
    let entry = db
        .insert_lore(
            &story.id,
            LoreEntryInput {
                title: "Old Mill".into(),
                tag: "Location".into(),
                triggers: "mill, river".into(),
                description: "A ruined mill.".into(),
                ..Default::default()
            },
        )
        .unwrap();

    db.upsert_lore_vector(&entry.id, &story.id, "Old Mill", Some(&[0.1, 0.2])).unwrap();
    let vectors = db.story_vectors(&story.id).unwrap();
    assert_eq!(vectors.len(), 1);
    assert!(vectors[0].embedding.is_some());

    // content edits invalidate the stored embedding
    db.update_lore(
        &story.id,
        &entry.id,
        LoreEntryInput { title: "Old Mill".into(), description: "Rebuilt.".into(), ..Default::default() },
    )
    .unwrap()
    .unwrap();
    let vectors = db.story_vectors(&story.id).unwrap();
    assert!(vectors[0].embedding.is_none());
    assert_eq!(db.lore_ids_missing_vectors().unwrap(), vec![entry.id.clone()]);

    // deleting the entry removes its vector row
    assert!(db.delete_lore(&story.id, &entry.id).unwrap());
    assert!(db.story_vectors(&story.id).unwrap().is_empty());
}

#[test]
fn empty_lore_title_rejected() {
    let db = test_db();
    let story = seed_story(&db, "Validation");
    let err = db
        .insert_lore(&story.id, LoreEntryInput { title: "  ".into(), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, spindle::error::StoryError::Validation(_)));
}

#[test]
fn replacing_lore_reports_new_ids() {
    let db = test_db();
    let story = seed_story(&db, "Replace");
    db.insert_lore(&story.id, LoreEntryInput { title: "Old".into(), ..Default::default() }).unwrap();

    let (_, embed_ids) = db
        .update_story(
            &story.id,
            StoryPatch {
                lore: Some(vec![
                    LoreEntryInput { title: "A".into(), ..Default::default() },
                    LoreEntryInput { title: "B".into(), ..Default::default() },
                ]),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(embed_ids.len(), 2);
    let titles: Vec<String> =
        db.list_lore(&story.id).unwrap().into_iter().map(|e| e.title).collect();
    assert_eq!(titles, vec!["A", "B"]);
}

#[test]
fn cascade_delete() {
    let db = test_db();
    let story = seed_story(&db, "Cascade");
    let entry = db
        .insert_lore(&story.id, LoreEntryInput { title: "Gareth".into(), ..Default::default() })
        .unwrap();
    db.upsert_lore_vector(&entry.id, &story.id, "Gareth", Some(&[1.0])).unwrap();
    db.commit_turn(&story.id, "story", "a", "b", "sum").unwrap();

    assert!(db.delete_story(&story.id).unwrap());
    assert!(db.list_messages(&story.id).unwrap().is_empty());
    assert!(db.list_lore(&story.id).unwrap().is_empty());
    assert!(db.story_vectors(&story.id).unwrap().is_empty());
    assert!(db.summary_record(&story.id).unwrap().is_none());
    assert!(db.find_lore_by_id(&entry.id).unwrap().is_none());
}

#[test]
fn recent_lore_orders_newest_first() {
    let db = test_db();
    let story = seed_story(&db, "Recency");
    for n in 0..5 {
        db.insert_lore(&story.id, LoreEntryInput { title: format!("entry {n}"), ..Default::default() })
            .unwrap();
    }
    let recent = db.recent_lore(&story.id, 3).unwrap();
    let titles: Vec<String> = recent.into_iter().map(|e| e.title).collect();
    assert_eq!(titles, vec!["entry 4", "entry 3", "entry 2"]);
}
