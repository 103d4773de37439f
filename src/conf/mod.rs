//! Settings and their parsing from the process environment.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use hermes_client_api_proto::{IceMode, IceServer};
use serde::Deserialize;
use smart_default::SmartDefault;

/// Server settings.
///
/// Every field is read from the environment variable with the same
/// (uppercased) name, `.env` files included. Missing variables fall back
/// to the defaults below.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// Address the HTTP server binds to.
    #[default("0.0.0.0:8080".to_string())]
    pub addr: String,

    /// Directory with the SPA shell and its static assets.
    #[default("static".to_string())]
    pub static_dir: String,

    /// Address of the Redis instance backing rooms and presence.
    ///
    /// When empty, both are kept in process memory instead.
    #[default(String::new())]
    pub redis_addr: String,

    /// Comma-separated STUN URLs handed to clients.
    #[default(String::new())]
    pub stun_urls: String,

    /// Comma-separated TURN URLs handed to clients.
    #[default(String::new())]
    pub turn_urls: String,

    /// Username for the TURN servers of [`Conf::turn_urls`].
    pub turn_username: Option<String>,

    /// Credential for the TURN servers of [`Conf::turn_urls`].
    pub turn_password: Option<String>,

    /// ICE transport mode announced to clients.
    #[default(IceMode::StunTurn)]
    pub ice_mode: IceMode,

    /// Externally visible WebSocket URL override.
    ///
    /// When unset, the URL is derived from the incoming request.
    pub ws_public_url: Option<String>,

    /// How long an empty hub lingers before its room is torn down.
    #[default(Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub hub_idle_timeout: Duration,

    /// Deadline on a single room registry call made from an HTTP
    /// handler.
    #[default(Duration::from_secs(3))]
    #[serde(with = "humantime_serde")]
    pub room_op_timeout: Duration,
}

impl Conf {
    /// Creates and validates a new [`Conf`] from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Errors if a variable holds a value its field cannot be parsed
    /// from.
    pub fn parse() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default())
            .build()?
            .try_deserialize()
    }

    /// Resolves the ICE server list clients receive in `welcome` and
    /// `/api/settings`, honoring [`Conf::ice_mode`].
    #[must_use]
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers = Vec::new();
        if self.ice_mode != IceMode::TurnOnly {
            let urls = split_urls(&self.stun_urls);
            if !urls.is_empty() {
                servers.push(IceServer {
                    urls,
                    username: None,
                    credential: None,
                });
            }
        }
        if self.ice_mode != IceMode::StunOnly {
            let urls = split_urls(&self.turn_urls);
            if !urls.is_empty() {
                servers.push(IceServer {
                    urls,
                    username: self.turn_username.clone(),
                    credential: self.turn_password.clone(),
                });
            }
        }
        servers
    }
}

/// Splits a comma-separated URL list, dropping empty chunks.
fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
