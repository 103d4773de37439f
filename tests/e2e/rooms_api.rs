//! REST API scenarios.

use std::time::Duration;

use serde_json::Value;

use crate::{create_room, spawn_server};

#[actix_rt::test]
async fn created_room_can_be_looked_up() {
    let mut srv = spawn_server(Duration::from_secs(30));

    let code = create_room(&mut srv).await;
    assert_eq!(code.len(), 8);

    let mut response =
        srv.get(format!("/api/rooms/{code}")).send().await.unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], code.as_str());
    assert!(body["createdAt"].is_string());
    assert!(body["url"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/rooms/{code}")));
}

#[actix_rt::test]
async fn distinct_rooms_get_distinct_codes() {
    let mut srv = spawn_server(Duration::from_secs(30));

    let first = create_room(&mut srv).await;
    let second = create_room(&mut srv).await;
    assert_ne!(first, second);
}

#[actix_rt::test]
async fn unknown_room_is_404() {
    let mut srv = spawn_server(Duration::from_secs(30));

    let response = srv.get("/api/rooms/zzzzzzzz").send().await.unwrap();
    assert_eq!(response.status(), awc::http::StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn settings_expose_the_ws_endpoint() {
    let mut srv = spawn_server(Duration::from_secs(30));

    let mut response = srv.get("/api/settings").send().await.unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    let ws_url = body["wsURL"].as_str().unwrap();
    assert!(ws_url.starts_with("ws://"));
    assert!(ws_url.ends_with("/ws"));
    assert_eq!(body["iceMode"], "stun-turn");
    assert!(body["iceServers"].is_array());
}

#[actix_rt::test]
async fn ws_upgrade_is_gated_on_the_room() {
    let mut srv = spawn_server(Duration::from_secs(30));

    // Missing code.
    assert!(srv.ws_at("/ws").await.is_err());
    // Unknown room.
    assert!(srv.ws_at("/ws?room=zzzzzzzz").await.is_err());
}
