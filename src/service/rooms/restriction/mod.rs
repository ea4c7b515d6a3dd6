// =============================================================================
// Palisade - Restriction Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Evaluates a restricted room's allow list against the membership index.
//   The verdict is deliberately three-valued: collapsing Unknown into
//   Satisfied would over-admit, collapsing it into Unsatisfied would turn
//   every knowledge gap into a denial. Every consumer handles all three.
//
// =============================================================================

use std::sync::Arc;

use ruma::{events::room::member::MembershipState, OwnedRoomId, RoomId, UserId};
use tracing::debug;

use crate::{service, Result};

/// The outcome of evaluating a join restriction for one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// At least one condition is satisfied; carries the referenced room
    /// that satisfied it.
    Satisfied(OwnedRoomId),
    /// Every live condition is authoritatively unsatisfied, or the allow
    /// list has no live conditions at all.
    Unsatisfied,
    /// No condition is satisfied locally, but at least one could not be
    /// evaluated authoritatively. Satisfaction cannot be ruled out.
    Unknown,
}

pub struct Service {
    pub state_accessor: Arc<service::rooms::state_accessor::Service>,
    pub state_cache: Arc<service::rooms::state_cache::Service>,
}

impl Service {
    /// Evaluates the allow list of a restricted room for `user_id`.
    #[tracing::instrument(skip(self))]
    pub fn evaluate(&self, room_id: &RoomId, user_id: &UserId) -> Result<Verdict> {
        let conditions = self.state_accessor.allowed_room_ids(room_id)?;
        self.evaluate_conditions(&conditions, user_id)
    }

    /// Evaluates an already extracted list of reference rooms. Also used by
    /// summary visibility, where the allow list may come from a remote
    /// server's response instead of local state.
    #[tracing::instrument(skip(self))]
    pub fn evaluate_conditions(
        &self,
        conditions: &[OwnedRoomId],
        user_id: &UserId,
    ) -> Result<Verdict> {
        // No live conditions is definitive, not a knowledge gap: the only
        // way into the room is an invite.
        if conditions.is_empty() {
            return Ok(Verdict::Unsatisfied);
        }

        let mut unknown = false;
        for reference in conditions {
            let lookup = self.state_cache.lookup(reference, user_id)?;

            if !lookup.authoritative {
                debug!(%reference, "Not participating in reference room, condition is undecidable");
                unknown = true;
                continue;
            }

            if lookup.state == Some(MembershipState::Join) {
                // Any one satisfied condition suffices.
                return Ok(Verdict::Satisfied(reference.clone()));
            }
        }

        Ok(if unknown {
            Verdict::Unknown
        } else {
            Verdict::Unsatisfied
        })
    }
}
