//! End-to-end tests: a real HTTP server with real WebSocket clients.

#![allow(clippy::module_name_repetitions)]

mod rooms_api;
mod signalling;

use std::{sync::Arc, time::Duration};

use actix::Actor as _;
use actix_codec::{AsyncRead, AsyncWrite, Framed};
use actix_web::{web::Data, App};
use awc::ws::Frame;
use futures::{SinkExt as _, StreamExt as _};
use hermes::{
    api::{self, AppContext},
    registry::{InMemRoomRegistry, RoomRegistry},
    signalling::{hub_manager::PresenceFactory, HubManager},
    store::InMemPresenceRepository,
    Conf,
};
use hermes_client_api_proto::ServerMsg;
use serde_json::Value;
use url::{Position, Url};

/// Spawns a fully wired server on in-process storage.
pub fn spawn_server(hub_idle_timeout: Duration) -> actix_test::TestServer {
    let conf = Conf {
        hub_idle_timeout,
        ..Conf::default()
    };
    let registry: Arc<dyn RoomRegistry> = Arc::new(InMemRoomRegistry::new());
    let presence_factory: PresenceFactory =
        Arc::new(|_| Arc::new(InMemPresenceRepository::new()));
    let hub_manager =
        HubManager::new(&conf, Arc::clone(&registry), presence_factory)
            .start();

    actix_test::start(move || {
        App::new()
            .app_data(Data::new(AppContext {
                conf: conf.clone(),
                registry: Arc::clone(&registry),
                hub_manager: hub_manager.clone(),
            }))
            .configure(api::configure)
    })
}

/// Creates a room through the HTTP API and returns its code.
pub async fn create_room(srv: &mut actix_test::TestServer) -> String {
    let mut response = srv.post("/api/rooms").send().await.unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    body["code"].as_str().unwrap().to_owned()
}

/// Opens a signaling WebSocket into `room` under the given peer id.
pub async fn connect(
    srv: &mut actix_test::TestServer,
    room: &str,
    id: &str,
) -> Framed<impl AsyncRead + AsyncWrite, awc::ws::Codec> {
    let mut endpoint = Url::parse(&srv.url("/ws")).unwrap();
    let _ = endpoint
        .query_pairs_mut()
        .append_pair("room", room)
        .append_pair("id", id);
    srv.ws_at(&endpoint[Position::BeforePath..]).await.unwrap()
}

/// Receives the next data frame, answering pings along the way.
pub async fn recv<Ws: AsyncRead + AsyncWrite + Unpin>(
    ws: &mut Framed<Ws, awc::ws::Codec>,
) -> ServerMsg {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s")
            .expect("connection closed")
            .expect("protocol error");
        match frame {
            Frame::Text(bytes) => {
                return serde_json::from_slice(&bytes).unwrap();
            }
            Frame::Ping(payload) => {
                ws.send(awc::ws::Message::Pong(payload)).await.unwrap();
            }
            Frame::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Asserts that no data frame arrives within a short grace window.
pub async fn assert_silent<Ws: AsyncRead + AsyncWrite + Unpin>(
    ws: &mut Framed<Ws, awc::ws::Codec>,
) {
    let deadline = tokio::time::sleep(Duration::from_millis(300));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => return,
            frame = ws.next() => match frame {
                Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => {}
                other => panic!("expected silence, got {other:?}"),
            },
        }
    }
}

/// Sends one JSON text frame.
pub async fn send_json<Ws: AsyncRead + AsyncWrite + Unpin>(
    ws: &mut Framed<Ws, awc::ws::Codec>,
    value: &Value,
) {
    ws.send(awc::ws::Message::Text(value.to_string().into()))
        .await
        .unwrap();
}
