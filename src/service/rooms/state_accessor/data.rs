// =============================================================================
// Palisade - State Accessor Data Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// =============================================================================

use ruma::{
    events::StateEventType, MilliSecondsSinceUnixEpoch, OwnedRoomId, OwnedUserId, RoomAliasId,
    RoomId,
};

use crate::Result;

/// A stored state event, reduced to what summary generation and policy
/// evaluation need. Event ids, hashes and signatures stay behind the
/// storage boundary.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub sender: OwnedUserId,
    pub origin_server_ts: MilliSecondsSinceUnixEpoch,
    pub content: serde_json::Value,
}

pub trait Data: Send + Sync {
    fn room_exists(&self, room_id: &RoomId) -> Result<bool>;

    /// Returns the content of the current state event with the given type
    /// and state key, if any.
    fn state_content(
        &self,
        room_id: &RoomId,
        event_type: &StateEventType,
        state_key: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Returns all current state entries of the given type, keyed by state
    /// key.
    fn state_entries(
        &self,
        room_id: &RoomId,
        event_type: &StateEventType,
    ) -> Result<Vec<(String, StateEntry)>>;

    fn resolve_alias(&self, alias: &RoomAliasId) -> Result<Option<OwnedRoomId>>;
}
