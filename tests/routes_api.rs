#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;

use textboard::auth::{create_jwt, Role};
use textboard::repo::inmem::InMemRepo;
use textboard::storage::FsMediaStore;
use textboard::word_filter::WordFilterStore;
use textboard::{configure, AppState, Board, BoardConfig};

const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

fn token(roles: Vec<Role>) -> String {
    std::env::set_var("JWT_SECRET", SECRET);
    create_jwt("mod-1", roles, chrono::Duration::hours(1)).unwrap()
}

async fn state(dir: &std::path::Path, anti_spam_secs: i64) -> web::Data<AppState> {
    std::env::set_var("JWT_SECRET", SECRET);
    let cfg = BoardConfig {
        anti_spam_secs,
        word_filter_path: dir.join("word_filters.json"),
        media_dir: dir.join("uploads"),
        max_upload_bytes: 1024,
        ..Default::default()
    };
    let media = FsMediaStore::new(&cfg.media_dir, cfg.max_upload_bytes).await.unwrap();
    let board = Board::new(
        Arc::new(InMemRepo::ephemeral()),
        Arc::new(media),
        WordFilterStore::load(&cfg.word_filter_path),
        &cfg,
    );
    board.settings().seed_defaults().await.unwrap();
    web::Data::new(AppState { board })
}

fn multipart(bytes: &[u8], boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f.png\"\r\nContent-Type: application/octet-stream\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

// Minimal 1x1 PNG
fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00,
        0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00,
        0x0A, b'I', b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D,
        0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

#[actix_web::test]
#[serial]
async fn public_thread_reply_and_delete_flow() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(App::new().app_data(state(dir.path(), 0).await).configure(configure)).await;

    // upload, then attach
    let (ct, body) = multipart(&sample_png(), "XBOUNDARY");
    let req = test::TestRequest::post()
        .uri("/api/v1/media")
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let upload: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(upload["mime"], "image/png");
    let media_path = upload["media"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .set_json(&json!({"subject": "First", "message": "OP body", "password": "pw", "media": upload["name"]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let thread_id = created["id"].as_i64().unwrap();
    assert_eq!(created["approved"], true);

    // stored file is served
    let req = test::TestRequest::get().uri(&format!("/{media_path}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/threads/{thread_id}/replies"))
        .set_json(&json!({"message": format!(">>{thread_id} reply")}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let reply: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(reply["thread_id"].as_i64(), Some(thread_id));

    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{thread_id}")).to_request();
    let view: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(view["replies"].as_array().unwrap().len(), 1);
    assert_eq!(view["thread"]["backlinks"], json!([reply["id"]]));
    assert!(view["thread"].get("password_hash").is_none());

    let req = test::TestRequest::get().uri("/api/v1/threads?page=1").to_request();
    let index: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(index["threads"][0]["reply_count"], 1);
    assert_eq!(index["total_pages"], 1);

    let req = test::TestRequest::get().uri("/api/v1/catalog").to_request();
    let catalog: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(catalog.as_array().unwrap().len(), 1);

    let req = test::TestRequest::get().uri(&format!("/api/v1/posts/{}/locate", reply["id"])).to_request();
    let loc: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(loc["thread_id"].as_i64(), Some(thread_id));

    // wrong password and unknown post look identical
    for (id, pw) in [(thread_id, "nope"), (98765, "pw")] {
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/posts/{id}/delete"))
            .set_json(&json!({"password": pw}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
        let body: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert_eq!(body["error"], "not authorized");
    }

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{thread_id}/delete"))
        .set_json(&json!({"password": "pw"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let out: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(out["deleted"], true);

    // file went with it
    let req = test::TestRequest::get().uri(&format!("/{media_path}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{thread_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn upload_rejects_unsupported_and_oversized() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(App::new().app_data(state(dir.path(), 0).await).configure(configure)).await;

    let (ct, body) = multipart(b"just some text", "B1");
    let req = test::TestRequest::post().uri("/api/v1/media").insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 415);

    let mut big = sample_png();
    big.resize(4096, 0);
    let (ct, body) = multipart(&big, "B2");
    let req = test::TestRequest::post().uri("/api/v1/media").insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 413);
}

#[actix_web::test]
#[serial]
async fn uploads_are_screened_and_claimed_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(App::new().app_data(state(dir.path(), 0).await).configure(configure)).await;
    let auth = ("Authorization", format!("Bearer {}", token(vec![Role::Moderator])));
    let upload = |boundary: &str| {
        let (ct, body) = multipart(&sample_png(), boundary);
        test::TestRequest::post().uri("/api/v1/media").insert_header(("Content-Type", ct)).set_payload(body)
    };

    let req = test::TestRequest::put()
        .uri("/api/v1/mod/settings")
        .insert_header(auth.clone())
        .set_json(&json!({"key": "readonly_mode", "value": "1"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let resp = test::call_service(&app, upload("R1").to_request()).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);
    let resp = test::call_service(&app, upload("R2").insert_header(auth.clone()).to_request()).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::put()
        .uri("/api/v1/mod/settings")
        .insert_header(auth)
        .set_json(&json!({"key": "readonly_mode", "value": "0"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let resp = test::call_service(&app, upload("R3").to_request()).await;
    let stored: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let thread = |media: &Value| {
        test::TestRequest::post().uri("/api/v1/threads").set_json(&json!({"message": "pic", "media": media})).to_request()
    };
    assert_eq!(test::call_service(&app, thread(&stored["name"])).await.status(), 201);
    // the same file cannot be attached a second time, by name or by path
    assert_eq!(test::call_service(&app, thread(&stored["name"])).await.status(), 400);
    assert_eq!(test::call_service(&app, thread(&stored["media"])).await.status(), 400);
}

#[actix_web::test]
#[serial]
async fn gate_errors_map_to_statuses() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(App::new().app_data(state(dir.path(), 30).await).configure(configure)).await;

    let req = test::TestRequest::post().uri("/api/v1/threads").set_json(&json!({"message": "   "})).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // a fresh cookie per request does not open a new bucket
    let post = |cookie: &'static str| {
        test::TestRequest::post()
            .uri("/api/v1/threads")
            .peer_addr("203.0.113.9:40000".parse().unwrap())
            .cookie(actix_web::cookie::Cookie::new("tb_session", cookie))
            .set_json(&json!({"message": "hello"}))
            .to_request()
    };
    assert_eq!(test::call_service(&app, post("visitor-1")).await.status(), 201);
    let resp = test::call_service(&app, post("visitor-2")).await;
    assert_eq!(resp.status(), 429);
    let body: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("wait "));

    let req = test::TestRequest::post()
        .uri("/api/v1/threads/424242/replies")
        .peer_addr("198.51.100.4:40000".parse().unwrap())
        .set_json(&json!({"message": "anyone?"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn moderation_endpoints_require_privileged_token() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(App::new().app_data(state(dir.path(), 0).await).configure(configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/mod/pending").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/v1/mod/pending")
        .insert_header(("Authorization", format!("Bearer {}", token(vec![]))))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get()
        .uri("/api/v1/mod/pending")
        .insert_header(("Authorization", "Bearer not-a-jwt"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
#[serial]
async fn moderator_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(App::new().app_data(state(dir.path(), 0).await).configure(configure)).await;
    let auth = ("Authorization", format!("Bearer {}", token(vec![Role::Moderator])));

    // turn on approval
    let req = test::TestRequest::put()
        .uri("/api/v1/mod/settings")
        .insert_header(auth.clone())
        .set_json(&json!({"key": "approval_system", "value": "1"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::post().uri("/api/v1/threads").set_json(&json!({"message": "please approve"})).to_request();
    let created: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(created["approved"], false);
    let id = created["id"].as_i64().unwrap();

    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get().uri(&format!("/api/v1/mod/threads/{id}")).insert_header(auth.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get().uri("/api/v1/mod/pending").insert_header(auth.clone()).to_request();
    let queue: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(queue["threads"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::post().uri(&format!("/api/v1/mod/posts/{id}/approve")).insert_header(auth.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // toggle twice, then explicit set
    for expected in [true, false] {
        let req = test::TestRequest::post().uri(&format!("/api/v1/mod/threads/{id}/lock")).insert_header(auth.clone()).to_request();
        let flag: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
        assert_eq!(flag["value"], expected);
    }
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/mod/threads/{id}/sticky"))
        .insert_header(auth.clone())
        .set_json(&json!({"value": true}))
        .to_request();
    let flag: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(flag["value"], true);

    // capcoded reply skips the queue
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/mod/threads/{id}/replies"))
        .insert_header(auth.clone())
        .set_json(&json!({"message": "noted"}))
        .to_request();
    let reply: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(reply["approved"], true);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/mod/posts/{}", reply["id"]))
        .insert_header(auth.clone())
        .set_json(&json!({"message": "edited"}))
        .to_request();
    let edited: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(edited["message"], "edited");
    assert_eq!(edited["capcode"], "mod");

    // word filters
    let req = test::TestRequest::post()
        .uri("/api/v1/mod/word-filters")
        .insert_header(auth.clone())
        .set_json(&json!({"word": "spam", "type": "fuzzy"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["error"], "bad filter type");

    let req = test::TestRequest::post()
        .uri("/api/v1/mod/word-filters")
        .insert_header(auth.clone())
        .set_json(&json!({"word": "spam", "type": "contains"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get().uri("/api/v1/mod/word-filters").insert_header(auth.clone()).to_request();
    let filters: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(filters["contains"], json!(["spam"]));

    let req = test::TestRequest::delete()
        .uri("/api/v1/mod/word-filters")
        .insert_header(auth.clone())
        .set_json(&json!({"word": "spam", "type": "contains"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // hard delete cascades
    let req = test::TestRequest::delete().uri(&format!("/api/v1/mod/posts/{id}")).insert_header(auth.clone()).to_request();
    let out: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(out["removed"], 2);
    let req = test::TestRequest::delete().uri(&format!("/api/v1/mod/posts/{id}")).insert_header(auth.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::get().uri("/api/v1/mod/settings").insert_header(auth).to_request();
    let settings: Value = serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(settings.as_array().unwrap().len(), 2);
}
