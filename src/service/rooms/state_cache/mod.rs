// =============================================================================
// Palisade - State Cache Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   The membership index: answers "is user U currently joined/invited to
//   room R" from locally available state, and says explicitly whether that
//   answer is authoritative. The index is maintained by the membership
//   commit path; this service only reads.
//
// =============================================================================

mod data;

pub use data::{Data, MembershipLookup};
use ruma::{events::room::member::MembershipState, OwnedUserId, RoomId, ServerName, UserId};

pub struct Service {
    pub db: &'static dyn Data,
}

impl Service {
    #[tracing::instrument(skip(self))]
    pub fn lookup(&self, room_id: &RoomId, user_id: &UserId) -> crate::Result<MembershipLookup> {
        self.db.lookup(room_id, user_id)
    }

    /// Returns true when the user is joined according to local state. Not
    /// authoritative knowledge reads as "not joined" here; callers that need
    /// to distinguish ignorance from absence use [`Self::lookup`].
    #[tracing::instrument(skip(self))]
    pub fn is_joined(&self, user_id: &UserId, room_id: &RoomId) -> crate::Result<bool> {
        Ok(self.db.lookup(room_id, user_id)?.state == Some(MembershipState::Join))
    }

    #[tracing::instrument(skip(self))]
    pub fn is_invited(&self, user_id: &UserId, room_id: &RoomId) -> crate::Result<bool> {
        Ok(self.db.lookup(room_id, user_id)?.state == Some(MembershipState::Invite))
    }

    #[tracing::instrument(skip(self))]
    pub fn server_in_room(&self, server: &ServerName, room_id: &RoomId) -> crate::Result<bool> {
        self.db.server_in_room(server, room_id)
    }

    /// Returns all joined members of a room.
    #[tracing::instrument(skip(self))]
    pub fn room_members(&self, room_id: &RoomId) -> crate::Result<Vec<OwnedUserId>> {
        self.db.room_members(room_id)
    }

    /// Returns the number of users which are currently in a room.
    #[tracing::instrument(skip(self))]
    pub fn room_joined_count(&self, room_id: &RoomId) -> crate::Result<Option<u64>> {
        self.db.room_joined_count(room_id)
    }
}
