//! Signalling scenarios over real WebSockets.

use std::time::Duration;

use futures::SinkExt as _;
use hermes_client_api_proto::{PeerId, ServerMsg};
use serde_json::json;
use serial_test::serial;

use crate::{
    assert_silent, connect, create_room, recv, send_json, spawn_server,
};

fn id(raw: &str) -> PeerId {
    PeerId(raw.to_owned())
}

#[actix_rt::test]
async fn solo_join_gets_exactly_one_welcome() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    match recv(&mut p1).await {
        ServerMsg::Welcome { id: own, state, .. } => {
            assert_eq!(own, id("p1"));
            assert_eq!(state.peers, vec![id("p1")]);
            assert!(state.broadcasting.is_empty());
            assert!(state.usernames.is_empty());
        }
        other => panic!("expected welcome, got {other:?}"),
    }
    assert_silent(&mut p1).await;
}

#[actix_rt::test]
async fn second_join_fans_out_to_the_first() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    drop(recv(&mut p1).await);

    let mut p2 = connect(&mut srv, &code, "p2").await;
    match recv(&mut p2).await {
        ServerMsg::Welcome { id: own, state, .. } => {
            assert_eq!(own, id("p2"));
            assert_eq!(state.peers, vec![id("p1"), id("p2")]);
        }
        other => panic!("expected welcome, got {other:?}"),
    }
    match recv(&mut p1).await {
        ServerMsg::PeerJoined { id: joined, state } => {
            assert_eq!(joined, id("p2"));
            assert_eq!(state.peers, vec![id("p1"), id("p2")]);
        }
        other => panic!("expected peer-joined, got {other:?}"),
    }
    assert_silent(&mut p2).await;
}

#[actix_rt::test]
async fn broadcast_toggle_reaches_everyone_including_the_sender() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    drop(recv(&mut p1).await);
    let mut p2 = connect(&mut srv, &code, "p2").await;
    drop(recv(&mut p2).await);
    drop(recv(&mut p1).await); // peer-joined of p2

    send_json(&mut p2, &json!({"type": "broadcast", "enabled": true})).await;
    for ws in [&mut p1, &mut p2] {
        match recv(ws).await {
            ServerMsg::BroadcastState {
                id: toggled,
                enabled,
                state,
            } => {
                assert_eq!(toggled, id("p2"));
                assert!(enabled);
                assert_eq!(state.broadcasting, vec![id("p2")]);
            }
            other => panic!("expected broadcast-state, got {other:?}"),
        }
    }

    send_json(&mut p2, &json!({"type": "broadcast", "enabled": false})).await;
    for ws in [&mut p1, &mut p2] {
        match recv(ws).await {
            ServerMsg::BroadcastState { enabled, state, .. } => {
                assert!(!enabled);
                assert!(state.broadcasting.is_empty());
            }
            other => panic!("expected broadcast-state, got {other:?}"),
        }
    }
}

#[actix_rt::test]
async fn signal_reaches_only_the_addressed_peer() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    drop(recv(&mut p1).await);
    let mut p2 = connect(&mut srv, &code, "p2").await;
    drop(recv(&mut p2).await);
    drop(recv(&mut p1).await);

    send_json(
        &mut p1,
        &json!({
            "type": "signal",
            "to": "p2",
            "data": {"type": "offer", "sdp": "v=0"},
        }),
    )
    .await;

    match recv(&mut p2).await {
        ServerMsg::Signal { from, to, data } => {
            assert_eq!(from, id("p1"));
            assert_eq!(to, id("p2"));
            assert_eq!(data["sdp"], "v=0");
        }
        other => panic!("expected signal, got {other:?}"),
    }
    assert_silent(&mut p1).await;
}

#[actix_rt::test]
async fn malformed_and_untargetable_frames_do_not_kill_the_connection() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    drop(recv(&mut p1).await);
    let mut p2 = connect(&mut srv, &code, "p2").await;
    drop(recv(&mut p2).await);
    drop(recv(&mut p1).await);

    // Unknown type, invalid JSON, signal to a ghost, signal without a
    // target: every frame is dropped, the connection survives.
    send_json(&mut p1, &json!({"type": "dance"})).await;
    p1.send(awc::ws::Message::Text("{not json".into()))
        .await
        .unwrap();
    send_json(
        &mut p1,
        &json!({"type": "signal", "to": "ghost", "data": {"x": 1}}),
    )
    .await;
    send_json(
        &mut p1,
        &json!({"type": "signal", "to": "", "data": {"x": 1}}),
    )
    .await;

    send_json(
        &mut p1,
        &json!({"type": "signal", "to": "p2", "data": {"alive": true}}),
    )
    .await;
    match recv(&mut p2).await {
        ServerMsg::Signal { data, .. } => assert_eq!(data["alive"], true),
        other => panic!("expected signal, got {other:?}"),
    }
}

#[actix_rt::test]
async fn username_updates_are_trimmed_and_fanned_out() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    drop(recv(&mut p1).await);
    let mut p2 = connect(&mut srv, &code, "p2").await;
    drop(recv(&mut p2).await);
    drop(recv(&mut p1).await);

    send_json(
        &mut p1,
        &json!({"type": "set-username", "username": " Alice "}),
    )
    .await;
    for ws in [&mut p1, &mut p2] {
        match recv(ws).await {
            ServerMsg::Usernames { id: renamed, state } => {
                assert_eq!(renamed, id("p1"));
                assert_eq!(state.usernames.get(&id("p1")).unwrap(), "Alice");
            }
            other => panic!("expected usernames, got {other:?}"),
        }
    }

    // An all-whitespace name deletes the entry.
    send_json(&mut p1, &json!({"type": "set-username", "username": "  "}))
        .await;
    for ws in [&mut p1, &mut p2] {
        match recv(ws).await {
            ServerMsg::Usernames { state, .. } => {
                assert!(state.usernames.is_empty());
            }
            other => panic!("expected usernames, got {other:?}"),
        }
    }
}

#[actix_rt::test]
async fn eviction_scrubs_the_whole_presence_triple() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    drop(recv(&mut p1).await);
    let mut p2 = connect(&mut srv, &code, "p2").await;
    drop(recv(&mut p2).await);
    drop(recv(&mut p1).await);

    send_json(&mut p2, &json!({"type": "broadcast", "enabled": true})).await;
    send_json(&mut p2, &json!({"type": "set-username", "username": "Bob"}))
        .await;
    drop(recv(&mut p1).await); // broadcast-state
    drop(recv(&mut p1).await); // usernames

    drop(p2);

    match recv(&mut p1).await {
        ServerMsg::PeerLeft { id: left, state } => {
            assert_eq!(left, id("p2"));
            assert_eq!(state.peers, vec![id("p1")]);
            assert!(state.broadcasting.is_empty());
            assert!(state.usernames.is_empty());
        }
        other => panic!("expected peer-left, got {other:?}"),
    }
}

#[actix_rt::test]
async fn close_frame_drives_the_same_eviction() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut p1 = connect(&mut srv, &code, "p1").await;
    drop(recv(&mut p1).await);
    let mut p2 = connect(&mut srv, &code, "p2").await;
    drop(recv(&mut p2).await);
    drop(recv(&mut p1).await);

    p2.send(awc::ws::Message::Close(None)).await.unwrap();

    match recv(&mut p1).await {
        ServerMsg::PeerLeft { id: left, .. } => assert_eq!(left, id("p2")),
        other => panic!("expected peer-left, got {other:?}"),
    }
}

#[actix_rt::test]
async fn generated_ids_are_assigned_when_none_is_supplied() {
    let mut srv = spawn_server(Duration::from_secs(30));
    let code = create_room(&mut srv).await;

    let mut ws = srv.ws_at(&format!("/ws?room={code}")).await.unwrap();
    match recv(&mut ws).await {
        ServerMsg::Welcome { id: own, state, .. } => {
            assert!(!own.0.is_empty());
            assert_eq!(state.peers, vec![own]);
        }
        other => panic!("expected welcome, got {other:?}"),
    }
}

#[actix_rt::test]
#[serial]
async fn idle_room_is_torn_down_after_the_grace_period() {
    let mut srv = spawn_server(Duration::from_millis(300));
    let code = create_room(&mut srv).await;

    let p1 = connect(&mut srv, &code, "p1").await;
    drop(p1);

    tokio::time::sleep(Duration::from_millis(900)).await;

    let lookup = srv.get(format!("/api/rooms/{code}")).send().await.unwrap();
    assert_eq!(lookup.status(), awc::http::StatusCode::NOT_FOUND);
    assert!(srv.ws_at(&format!("/ws?room={code}")).await.is_err());
}

#[actix_rt::test]
#[serial]
async fn rejoin_within_the_grace_period_keeps_the_room() {
    let mut srv = spawn_server(Duration::from_millis(300));
    let code = create_room(&mut srv).await;

    let p1 = connect(&mut srv, &code, "p1").await;
    drop(p1);

    // Rejoin before the idle timer fires.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut p1 = connect(&mut srv, &code, "p1").await;
    match recv(&mut p1).await {
        ServerMsg::Welcome { state, .. } => {
            assert_eq!(state.peers, vec![id("p1")]);
        }
        other => panic!("expected welcome, got {other:?}"),
    }

    // Well past the original deadline the room is still there: the
    // rejoin cancelled the cleanup.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let lookup = srv.get(format!("/api/rooms/{code}")).send().await.unwrap();
    assert_eq!(lookup.status(), awc::http::StatusCode::OK);
}
