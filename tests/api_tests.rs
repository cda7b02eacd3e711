mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use spindle::api::router;
use spindle::{jobs, settings, AppState, EmbedCache};

fn test_state() -> AppState {
    let db = common::test_db();
    AppState {
        jobs: jobs::JobQueue::start_with(db.clone(), None, 1, 8),
        db,
        ai: None,
        embed_cache: EmbedCache::new(16),
        settings: settings::TurnSettings::default(),
        started_at: std::time::Instant::now(),
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_status() {
    let app = router(test_state());
    let resp = app.oneshot(get_req("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["chat_model"].is_null());
}

#[tokio::test]
async fn story_lifecycle_over_http() {
    let app = router(test_state());

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            "/stories",
            serde_json::json!({
                "title": "The Hollow Crown",
                "ai_instructions": "Narrate.",
                "lore": [{"title": "Gareth", "tag": "Character", "triggers": "knight"}],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["lore"][0]["title"], "Gareth");
    assert_eq!(created["plot_summary"], "");

    let resp = app.clone().oneshot(get_req(&format!("/stories/{id}"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(json_req(
            "PUT",
            &format!("/stories/{id}"),
            serde_json::json!({"title": "Renamed"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["title"], "Renamed");

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/stories/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app.oneshot(get_req(&format!("/stories/{id}"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lore_endpoints_404_on_missing_story() {
    let app = router(test_state());
    let resp = app.clone().oneshot(get_req("/stories/ghost/lore")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app
        .oneshot(json_req("POST", "/stories/ghost/lore", serde_json::json!({"title": "X"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lore_crud_over_http() {
    let app = router(test_state());
    let created = body_json(
        app.clone()
            .oneshot(json_req("POST", "/stories", serde_json::json!({"title": "S"})))
            .await
            .unwrap(),
    )
    .await;
    let sid = created["id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            &format!("/stories/{sid}/lore"),
            serde_json::json!({"title": "Mill", "tag": "Location"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let entry = body_json(resp).await;
    let eid = entry["id"].as_str().unwrap().to_string();

    // empty title is a validation error
    let resp = app
        .clone()
        .oneshot(json_req(
            "PUT",
            &format!("/stories/{sid}/lore/{eid}"),
            serde_json::json!({"title": "  "}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/stories/{sid}/lore/{eid}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn turn_without_backend_is_service_unavailable() {
    let app = router(test_state());
    let resp = app
        .oneshot(json_req("POST", "/turn", serde_json::json!({"text": "hello"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn suggestion_review_over_http() {
    let state = test_state();
    let story = common::seed_story(&state.db, "Review");
    state
        .db
        .insert_suggestion(spindle::db::SuggestionInput {
            story_id: story.id.clone(),
            kind: "NEW".into(),
            title: "Ferryman".into(),
            tag: "Character".into(),
            description: "Poles the black river.".into(),
            triggers: "ferry".into(),
            confidence: 0.9,
            target_lore_id: None,
            source_user: "u".into(),
            source_assistant: "a".into(),
        })
        .unwrap();
    let app = router(state.clone());

    let resp = app
        .clone()
        .oneshot(get_req(&format!("/stories/{}/suggestions?status=pending", story.id)))
        .await
        .unwrap();
    let list = body_json(resp).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    let sid = list[0]["id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            &format!("/stories/{}/suggestions/{sid}/accept", story.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["title"], "Ferryman");

    // already accepted — a second accept is 404
    let resp = app
        .oneshot(json_req(
            "POST",
            &format!("/stories/{}/suggestions/{sid}/accept", story.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
