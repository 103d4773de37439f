//! Client API wire protocol of the Hermes signaling server.
//!
//! All frames are JSON text. Clients send an [`Envelope`]; the server
//! answers with [`ServerMsg`]s. The `data` of a `signal` frame is opaque
//! to the server and is forwarded verbatim to the addressed peer; the
//! [`SignalData`] types describe the shape peers exchange through it.

use std::collections::HashMap;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ID of a peer within a single room hub.
///
/// Opaque to the protocol. Ids are scoped per hub: nothing guarantees
/// uniqueness across rooms.
#[derive(
    Clone,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[from(forward)]
pub struct PeerId(pub String);

impl PeerId {
    /// Indicates whether this [`PeerId`] is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Short URL-safe code identifying a room.
#[derive(
    Clone,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[from(forward)]
pub struct RoomCode(pub String);

/// ICE transport mode announced to clients in [`ServerMsg::Welcome`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceMode {
    /// Both STUN and TURN servers are offered; any candidate type may be
    /// used.
    StunTurn,

    /// Only STUN servers are offered.
    StunOnly,

    /// Only TURN servers are offered and the client must force a
    /// relay-only transport policy.
    TurnOnly,
}

impl IceMode {
    /// Indicates whether clients must restrict ICE gathering to relayed
    /// candidates.
    #[must_use]
    pub fn is_relay_only(self) -> bool {
        matches!(self, Self::TurnOnly)
    }
}

/// Single `RTCIceServer` dictionary entry of the ICE server list handed
/// to clients.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceServer {
    /// STUN/TURN URLs of this server.
    pub urls: Vec<String>,

    /// TURN username, if the server requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential, if the server requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Point-in-time view of a room's presence triple.
///
/// Snapshots are authoritative: a client must overwrite its local view
/// with every snapshot it receives rather than applying deltas.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct RoomSnapshot {
    /// Ids of all peers currently registered in the room.
    pub peers: Vec<PeerId>,

    /// Subset of [`RoomSnapshot::peers`] that are currently broadcasting.
    pub broadcasting: Vec<PeerId>,

    /// Display names keyed by peer id. Partial: peers without a name are
    /// absent.
    pub usernames: HashMap<PeerId, String>,
}

/// Message sent by a client to the server.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// Targeted signaling payload to forward to the `to` peer verbatim.
    Signal {
        /// Id of the addressed peer.
        #[serde(default)]
        to: PeerId,

        /// Opaque SDP or ICE payload. The server never inspects it.
        #[serde(default)]
        data: Value,
    },

    /// Toggle of the sender's broadcasting flag.
    Broadcast {
        /// Whether the sender is now broadcasting.
        enabled: bool,
    },

    /// Update of the sender's display name. An empty (or all-whitespace)
    /// name removes the entry.
    SetUsername {
        /// The new display name.
        #[serde(default)]
        username: String,
    },
}

/// Message sent by the server to a client.
///
/// `welcome` is unicast to the joining peer; `signal` is unicast to the
/// addressed peer; everything else is fan-out to the whole room.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMsg {
    /// First message a peer receives after registration.
    Welcome {
        /// Id assigned to the receiving peer.
        id: PeerId,

        /// Current room state.
        #[serde(flatten)]
        state: RoomSnapshot,

        /// ICE servers the peer should hand to its `RTCPeerConnection`s.
        #[serde(rename = "iceServers")]
        ice_servers: Vec<IceServer>,

        /// Transport mode the peer must honor.
        #[serde(rename = "iceMode")]
        ice_mode: IceMode,
    },

    /// A new peer registered with the room.
    PeerJoined {
        /// Id of the joined peer.
        id: PeerId,

        /// Room state after the join.
        #[serde(flatten)]
        state: RoomSnapshot,
    },

    /// A peer was evicted from the room.
    PeerLeft {
        /// Id of the evicted peer.
        id: PeerId,

        /// Room state after the eviction.
        #[serde(flatten)]
        state: RoomSnapshot,
    },

    /// A peer toggled its broadcasting flag.
    BroadcastState {
        /// Id of the toggling peer.
        id: PeerId,

        /// The new value of the flag.
        enabled: bool,

        /// Room state after the toggle.
        #[serde(flatten)]
        state: RoomSnapshot,
    },

    /// A peer changed its display name.
    Usernames {
        /// Id of the renaming peer.
        id: PeerId,

        /// Room state after the change.
        #[serde(flatten)]
        state: RoomSnapshot,
    },

    /// Targeted signaling payload forwarded from another peer.
    Signal {
        /// Id of the sending peer.
        from: PeerId,

        /// Id of the addressed peer.
        to: PeerId,

        /// The forwarded opaque payload.
        data: Value,
    },
}

/// SDP description type.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// SDP offer.
    Offer,

    /// SDP answer.
    Answer,
}

/// Session description exchanged through a `signal` payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionDescription {
    /// Whether this is an offer or an answer.
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// The SDP blob itself.
    pub sdp: String,
}

/// Trickled ICE candidate exchanged through a `signal` payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceCandidate {
    /// `candidate` attribute of the discovered candidate.
    pub candidate: String,

    /// Index of the media description this candidate belongs to.
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,

    /// Media stream identification tag.
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
}

/// Body of a `signal` payload as peers produce and consume it.
///
/// The server forwards it as an opaque [`Value`]; only the two endpoints
/// of a peer pair agree on this shape.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalData {
    /// Remote session description.
    Description(SessionDescription),

    /// Remote trickled ICE candidate.
    Candidate {
        /// The candidate itself.
        candidate: IceCandidate,
    },
}

impl SignalData {
    /// Serializes this [`SignalData`] into the opaque [`Value`] carried
    /// on the wire.
    ///
    /// # Errors
    ///
    /// Never errors in practice: the types here always serialize.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
