// =============================================================================
// Palisade - Timeline Data Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// =============================================================================

use ruma::{
    events::room::member::MembershipState, MilliSecondsSinceUnixEpoch, OwnedEventId, OwnedRoomId,
    OwnedServerName, OwnedUserId, RoomId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A membership record as it travels between servers and into history.
///
/// `authorized_via_server` is set only on joins that were certified under a
/// restricted join rule; it names the server whose local knowledge
/// satisfied the restriction and is verified by every server accepting the
/// event. Invite-based joins leave it absent.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MembershipEvent {
    pub event_id: OwnedEventId,
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
    pub state_key: OwnedUserId,
    pub membership: MembershipState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_via_server: Option<OwnedServerName>,
    pub origin_server_ts: MilliSecondsSinceUnixEpoch,
}

pub trait Data: Send + Sync {
    /// Commits a membership record and updates the membership index in one
    /// atomic step.
    ///
    /// `prev` is the membership state the caller based its decision on;
    /// the commit fails with [`crate::Error::Conflict`] when the current
    /// state no longer matches, so a concurrent write cannot be silently
    /// overwritten.
    fn append_membership(
        &self,
        event: &MembershipEvent,
        prev: Option<&MembershipState>,
    ) -> Result<()>;

    /// Returns the latest membership record for the pair, if any.
    fn membership_event(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<MembershipEvent>>;
}
