// =============================================================================
// Palisade - State Cache Data Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// =============================================================================

use ruma::{events::room::member::MembershipState, OwnedUserId, RoomId, ServerName, UserId};

use crate::Result;

/// The result of a membership index lookup.
///
/// `authoritative` is the index's capability statement: whether this server
/// currently participates in the room and therefore tracks its membership
/// reliably. Callers must not interpret `state` as definitive when the index
/// is not authoritative — a stale record may survive after the last local
/// user left the room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipLookup {
    pub state: Option<MembershipState>,
    pub authoritative: bool,
}

pub trait Data: Send + Sync {
    /// Returns the latest known membership state of `user_id` in `room_id`,
    /// together with whether that knowledge is authoritative.
    fn lookup(&self, room_id: &RoomId, user_id: &UserId) -> Result<MembershipLookup>;

    /// Whether `server` has at least one joined user in `room_id`, as far as
    /// this index knows.
    fn server_in_room(&self, server: &ServerName, room_id: &RoomId) -> Result<bool>;

    /// All currently joined members of the room.
    fn room_members(&self, room_id: &RoomId) -> Result<Vec<OwnedUserId>>;

    /// The number of users currently joined to the room, if the room is
    /// known at all.
    fn room_joined_count(&self, room_id: &RoomId) -> Result<Option<u64>>;
}
