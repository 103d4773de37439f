//! Platform seam: the browser objects the engine drives.
//!
//! On the web these wrap `RTCPeerConnection` and the room's WebSocket;
//! native tests script them instead. The engine is single-threaded, so
//! none of the traits here are `Send`.

use std::rc::Rc;

use async_trait::async_trait;
use derive_more::Display;
use hermes_client_api_proto::{
    Envelope, IceCandidate, IceServer, SessionDescription,
};

/// Signaling state of a peer connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalingState {
    /// No offer/answer exchange is in progress.
    Stable,

    /// A local offer was applied and awaits the remote answer.
    HaveLocalOffer,

    /// A remote offer was applied and awaits the local answer.
    HaveRemoteOffer,

    /// The connection is closed.
    Closed,
}

/// Aggregate `connectionState` of a peer connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// Connection was just created.
    New,

    /// Transports are negotiating.
    Connecting,

    /// At least one transport is live.
    Connected,

    /// A transport lost connectivity; recoverable without renegotiation.
    Disconnected,

    /// A transport failed terminally.
    Failed,

    /// The connection is closed.
    Closed,
}

/// Error raised by the underlying platform objects.
#[derive(Clone, Debug, Display)]
#[display(fmt = "platform call failed: {}", _0)]
pub struct PlatformError(pub String);

impl std::error::Error for PlatformError {}

type Result<T> = std::result::Result<T, PlatformError>;

/// One peer connection towards a single remote peer.
///
/// Callback setters only store the callback; they never invoke it from
/// within the setter itself.
#[async_trait(?Send)]
pub trait PeerConnection {
    /// Creates an SDP offer reflecting the currently attached tracks.
    async fn create_offer(&self) -> Result<String>;

    /// Creates an SDP answer to the applied remote offer.
    async fn create_answer(&self) -> Result<String>;

    /// Applies `sdp` as the local offer.
    async fn set_local_offer(&self, sdp: &str) -> Result<()>;

    /// Applies `sdp` as the local answer.
    async fn set_local_answer(&self, sdp: &str) -> Result<()>;

    /// Rolls the local description back to the previous stable state.
    async fn rollback(&self) -> Result<()>;

    /// Applies the remote session description.
    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<()>;

    /// Adds a remote trickled ICE candidate.
    async fn add_ice_candidate(&self, candidate: &IceCandidate)
        -> Result<()>;

    /// Current signaling state.
    fn signaling_state(&self) -> SignalingState;

    /// Current aggregate connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Whether a remote description has been applied.
    fn has_remote_description(&self) -> bool;

    /// Attaches the local broadcast tracks to this connection.
    fn attach_local_tracks(&self);

    /// Detaches the local broadcast tracks from this connection.
    fn detach_local_tracks(&self);

    /// Marks the next created offer to request an ICE restart.
    fn restart_ice(&self);

    /// Closes the underlying connection.
    fn close(&self);

    /// Sets the handler of locally discovered ICE candidates.
    fn on_ice_candidate(&self, f: Box<dyn Fn(IceCandidate)>);

    /// Sets the handler of aggregate connection state changes.
    fn on_connection_state_change(&self, f: Box<dyn Fn(ConnectionState)>);

    /// Sets the handler invoked when a remote media stream arrives.
    fn on_track(&self, f: Box<dyn Fn()>);
}

/// Factory building [`PeerConnection`]s with the room's ICE
/// configuration.
pub trait PeerConnectionFactory {
    /// Creates a new connection using `ice_servers`, restricted to
    /// relayed candidates when `relay_only` is set.
    ///
    /// # Errors
    ///
    /// Errors if the platform refuses to construct the connection.
    fn create(
        &self,
        ice_servers: &[IceServer],
        relay_only: bool,
    ) -> Result<Rc<dyn PeerConnection>>;
}

/// Sink of outbound frames towards the signaling server.
pub trait SignalSink {
    /// Sends an [`Envelope`] to the server.
    fn send(&self, envelope: Envelope);
}
