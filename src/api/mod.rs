//! HTTP surface of the signaling server.

pub mod session;

use std::{path::PathBuf, sync::Arc};

use actix::Addr;
use actix_files::{Files, NamedFile};
use actix_web::{
    dev::{fn_service, ServiceRequest, ServiceResponse},
    middleware,
    web::{self, Data, Path, Payload, Query},
    App, HttpRequest, HttpResponse, HttpServer,
};
use chrono::{DateTime, Utc};
use hermes_client_api_proto::{IceMode, IceServer, PeerId, RoomCode};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use url::Url;

use crate::{
    conf::Conf,
    prelude::*,
    registry::{RegistryError, RoomRegistry},
    signalling::hub_manager::{HubForRoom, HubManager},
};

use self::session::{generate_peer_id, WsSession};

/// Shared context of the [`actix_web`] server.
pub struct AppContext {
    /// Server settings.
    pub conf: Conf,

    /// Registry of room records.
    pub registry: Arc<dyn RoomRegistry>,

    /// Manager resolving rooms to hubs.
    pub hub_manager: Addr<HubManager>,
}

/// Mounts all API routes onto `cfg`.
///
/// Shared between [`run`] and the integration tests, which assemble the
/// [`App`] themselves.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let _ = cfg
        .service(web::resource("/api/rooms").route(web::post().to(create_room)))
        .service(
            web::resource("/api/rooms/{code}").route(web::get().to(get_room)),
        )
        .service(
            web::resource("/api/settings").route(web::get().to(get_settings)),
        )
        .service(web::resource("/ws").route(web::get().to(create_ws)));
}

/// Runs the HTTP server to completion.
///
/// # Errors
///
/// Errors if binding [`Conf::addr`] fails.
pub async fn run(
    conf: Conf,
    registry: Arc<dyn RoomRegistry>,
    hub_manager: Addr<HubManager>,
) -> std::io::Result<()> {
    let addr = conf.addr.clone();
    let static_dir = conf.static_dir.clone();
    let context = Data::new(AppContext {
        conf,
        registry,
        hub_manager,
    });
    info!("Starting HTTP server on {}", addr);
    HttpServer::new(move || {
        // Paths no API route claims serve the SPA shell, so client-side
        // routes like `/rooms/{code}` resolve on full-page loads.
        let index = PathBuf::from(&static_dir).join("index.html");
        App::new()
            .app_data(context.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
            .service(
                Files::new("/", static_dir.clone())
                    .index_file("index.html")
                    .default_handler(fn_service(
                        move |req: ServiceRequest| {
                            let index = index.clone();
                            async move {
                                let (req, _) = req.into_parts();
                                let file =
                                    NamedFile::open_async(index).await?;
                                let res = file.into_response(&req);
                                Ok(ServiceResponse::new(req, res))
                            }
                        },
                    )),
            )
    })
    .bind(addr)?
    .run()
    .await
}

/// Response of `POST /api/rooms`.
#[derive(Debug, Serialize)]
struct CreateRoomResponse {
    /// Code of the created room.
    code: String,

    /// Shareable page URL of the room.
    url: String,
}

/// Creates a new room under a fresh short code.
async fn create_room(
    request: HttpRequest,
    state: Data<AppContext>,
) -> HttpResponse {
    match timeout(state.conf.room_op_timeout, state.registry.create()).await {
        Ok(Ok(room)) => HttpResponse::Ok().json(CreateRoomResponse {
            url: room_url(&request, &room.code),
            code: room.code.0,
        }),
        Ok(Err(e)) => {
            error!("Room creation failed: {}", e);
            HttpResponse::InternalServerError().finish()
        }
        Err(_) => {
            error!("Room creation timed out");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Response of `GET /api/rooms/{code}`.
#[derive(Debug, Serialize)]
struct GetRoomResponse {
    /// Code of the room.
    code: String,

    /// Instant the room was created at.
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,

    /// Shareable page URL of the room.
    url: String,
}

/// Looks a room up by its code.
async fn get_room(
    request: HttpRequest,
    path: Path<String>,
    state: Data<AppContext>,
) -> HttpResponse {
    let code = RoomCode(path.into_inner());
    match timeout(state.conf.room_op_timeout, state.registry.get(&code)).await
    {
        Ok(Ok(room)) => HttpResponse::Ok().json(GetRoomResponse {
            url: room_url(&request, &room.code),
            code: room.code.0,
            created_at: room.created_at,
        }),
        Ok(Err(RegistryError::NotFound)) => {
            HttpResponse::NotFound().finish()
        }
        Ok(Err(e)) => {
            error!("Lookup of room {} failed: {}", code, e);
            HttpResponse::InternalServerError().finish()
        }
        Err(_) => {
            error!("Lookup of room {} timed out", code);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Response of `GET /api/settings`.
#[derive(Debug, Serialize)]
struct SettingsResponse {
    /// WebSocket endpoint clients should dial.
    #[serde(rename = "wsURL")]
    ws_url: String,

    /// ICE transport mode clients must honor.
    #[serde(rename = "iceMode")]
    ice_mode: IceMode,

    /// ICE servers clients should use.
    #[serde(rename = "iceServers")]
    ice_servers: Vec<IceServer>,
}

/// Returns the bootstrap settings of this deployment.
async fn get_settings(
    request: HttpRequest,
    state: Data<AppContext>,
) -> HttpResponse {
    HttpResponse::Ok().json(SettingsResponse {
        ws_url: ws_url(&request, &state.conf),
        ice_mode: state.conf.ice_mode,
        ice_servers: state.conf.ice_servers(),
    })
}

/// Query of `GET /ws`.
#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Code of the room to join.
    #[serde(default)]
    room: String,

    /// Peer id override supplied by a trusted upstream.
    id: Option<String>,
}

/// Handles an HTTP upgrade request: validates the room, resolves its
/// hub and performs the WebSocket handshake.
async fn create_ws(
    request: HttpRequest,
    query: Query<WsQuery>,
    state: Data<AppContext>,
    payload: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let code = query.room.trim();
    if code.is_empty() {
        return Ok(HttpResponse::BadRequest().body("missing room code"));
    }
    let code = RoomCode::from(code);

    match timeout(state.conf.room_op_timeout, state.registry.get(&code)).await
    {
        Ok(Ok(_)) => {}
        Ok(Err(RegistryError::NotFound)) => {
            return Ok(HttpResponse::NotFound().finish());
        }
        Ok(Err(e)) => {
            error!("Lookup of room {} failed: {}", code, e);
            return Ok(HttpResponse::InternalServerError().finish());
        }
        Err(_) => {
            error!("Lookup of room {} timed out", code);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    }

    let hub = match state.hub_manager.send(HubForRoom(code.clone())).await {
        Ok(hub) => hub,
        Err(e) => {
            error!("Hub manager is unreachable: {}", e);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    let id = query
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(PeerId::from)
        .unwrap_or_else(generate_peer_id);
    actix_web_actors::ws::start(
        WsSession::new(id, code, hub),
        &request,
        payload,
    )
}

/// Builds the shareable page URL of a room from the request origin,
/// honoring forwarded proto and host headers.
fn room_url(request: &HttpRequest, code: &RoomCode) -> String {
    let info = request.connection_info();
    origin_url(info.scheme(), info.host(), &format!("/rooms/{code}"))
}

/// Resolves the WebSocket endpoint clients should dial: the configured
/// override, or one derived from the request origin.
fn ws_url(request: &HttpRequest, conf: &Conf) -> String {
    if let Some(url) = conf.ws_public_url.as_deref() {
        if !url.is_empty() {
            return url.to_owned();
        }
    }
    let info = request.connection_info();
    let scheme = if info.scheme() == "https" { "wss" } else { "ws" };
    origin_url(scheme, info.host(), "/ws")
}

/// Assembles `scheme://host/path` as a [`Url`], so hosts and paths end
/// up properly encoded. Falls back to plain formatting for a host that
/// is no valid authority.
fn origin_url(scheme: &str, host: &str, path: &str) -> String {
    match Url::parse(&format!("{scheme}://{host}")) {
        Ok(mut url) => {
            url.set_path(path);
            url.to_string()
        }
        Err(e) => {
            warn!("Unparsable request host {}: {}", host, e);
            format!("{scheme}://{host}{path}")
        }
    }
}
