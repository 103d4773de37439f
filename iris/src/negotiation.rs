//! Perfect-negotiation state towards one remote peer.

use std::{collections::VecDeque, time::Duration};

use hermes_client_api_proto::{IceCandidate, PeerId, SdpKind};

use crate::platform::SignalingState;

/// Maximum deferred-offer attempts while signaling is not stable.
pub const MAX_OFFER_RETRIES: u8 = 8;

/// Pause before a deferred offer is retried.
pub const OFFER_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Derives the local negotiation role towards `remote_id`: the peer with
/// the lexicographically smaller id is the polite one.
#[must_use]
pub fn is_polite(self_id: &PeerId, remote_id: &PeerId) -> bool {
    self_id < remote_id
}

/// What to do with an incoming remote description.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SdpDisposition {
    /// Drop it: impolite glare.
    Ignore,

    /// Roll the local description back, then apply it: polite glare.
    RollbackAndApply,

    /// Apply it directly.
    Apply,
}

/// Negotiation state towards one remote peer.
#[derive(Debug)]
pub struct Negotiation {
    /// Whether the local side yields on glare.
    pub polite: bool,

    /// Set while a local offer is being created and applied.
    pub making_offer: bool,

    /// Latched when an incoming offer was rejected on impolite glare;
    /// cleared by the next successfully applied remote description.
    pub ignore_offer: bool,

    /// Set while a remote answer is being applied.
    pub is_setting_remote_answer_pending: bool,

    /// Remote candidates that arrived before the remote description,
    /// in arrival order.
    pub pending_candidates: VecDeque<IceCandidate>,

    /// Deferred-offer attempts made so far.
    pub offer_retry_count: u8,
}

impl Negotiation {
    /// Creates a fresh [`Negotiation`] with the given role.
    #[must_use]
    pub fn new(polite: bool) -> Self {
        Self {
            polite,
            making_offer: false,
            ignore_offer: false,
            is_setting_remote_answer_pending: false,
            pending_candidates: VecDeque::new(),
            offer_retry_count: 0,
        }
    }

    /// Re-derives the role after the local identity changed.
    pub fn set_polite(&mut self, polite: bool) {
        self.polite = polite;
    }

    /// Whether an incoming `kind` description collides with a local
    /// offer in flight.
    #[must_use]
    pub fn offer_collision(
        &self,
        kind: SdpKind,
        signaling: SignalingState,
    ) -> bool {
        kind == SdpKind::Offer
            && (self.making_offer
                || signaling != SignalingState::Stable
                || self.is_setting_remote_answer_pending)
    }

    /// Decides how to treat an incoming remote description and updates
    /// the glare latch accordingly.
    pub fn on_remote_description(
        &mut self,
        kind: SdpKind,
        signaling: SignalingState,
    ) -> SdpDisposition {
        let collision = self.offer_collision(kind, signaling);
        self.ignore_offer = !self.polite && collision;
        if self.ignore_offer {
            SdpDisposition::Ignore
        } else if collision {
            SdpDisposition::RollbackAndApply
        } else {
            SdpDisposition::Apply
        }
    }

    /// Records that a remote description was applied successfully,
    /// clearing the glare latch.
    pub fn remote_description_applied(&mut self) {
        self.ignore_offer = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> PeerId {
        PeerId(raw.to_owned())
    }

    #[test]
    fn politeness_is_antisymmetric() {
        let pairs = [("aaa", "bbb"), ("zz", "aa"), ("p1", "p10")];
        for (a, b) in pairs {
            assert_ne!(
                is_polite(&id(a), &id(b)),
                is_polite(&id(b), &id(a)),
                "exactly one of ({a}, {b}) must be polite",
            );
        }
    }

    #[test]
    fn answer_never_collides() {
        let negotiation = Negotiation::new(false);
        assert!(!negotiation
            .offer_collision(SdpKind::Answer, SignalingState::HaveLocalOffer));
    }

    #[test]
    fn offer_collides_when_not_stable_or_making_offer() {
        let mut negotiation = Negotiation::new(true);
        assert!(!negotiation
            .offer_collision(SdpKind::Offer, SignalingState::Stable));

        assert!(negotiation
            .offer_collision(SdpKind::Offer, SignalingState::HaveLocalOffer));

        negotiation.making_offer = true;
        assert!(negotiation
            .offer_collision(SdpKind::Offer, SignalingState::Stable));

        negotiation.making_offer = false;
        negotiation.is_setting_remote_answer_pending = true;
        assert!(negotiation
            .offer_collision(SdpKind::Offer, SignalingState::Stable));
    }

    #[test]
    fn impolite_glare_latches_ignore() {
        let mut negotiation = Negotiation::new(false);
        let disposition = negotiation.on_remote_description(
            SdpKind::Offer,
            SignalingState::HaveLocalOffer,
        );

        assert_eq!(disposition, SdpDisposition::Ignore);
        assert!(negotiation.ignore_offer);

        negotiation.remote_description_applied();
        assert!(!negotiation.ignore_offer);
    }

    #[test]
    fn polite_glare_rolls_back() {
        let mut negotiation = Negotiation::new(true);
        let disposition = negotiation.on_remote_description(
            SdpKind::Offer,
            SignalingState::HaveLocalOffer,
        );

        assert_eq!(disposition, SdpDisposition::RollbackAndApply);
        assert!(!negotiation.ignore_offer);
    }

    #[test]
    fn stable_offer_applies_directly() {
        let mut negotiation = Negotiation::new(false);
        assert_eq!(
            negotiation
                .on_remote_description(SdpKind::Offer, SignalingState::Stable),
            SdpDisposition::Apply,
        );
        assert!(!negotiation.ignore_offer);
    }
}
