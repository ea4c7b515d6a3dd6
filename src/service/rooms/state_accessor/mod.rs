// =============================================================================
// Palisade - State Accessor Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Read access to the room state that membership authorization depends on:
//   join rules and their allow lists, history visibility, power levels and
//   space child edges. Parsing is deliberately lenient — malformed state
//   must degrade to the most restrictive reading, never fail evaluation and
//   never grant access.
//
// =============================================================================

mod data;

pub use data::{Data, StateEntry};
use ruma::{
    events::{
        room::{
            guest_access::{GuestAccess, RoomGuestAccessEventContent},
            history_visibility::{HistoryVisibility, RoomHistoryVisibilityEventContent},
        },
        space::child::HierarchySpaceChildEvent,
        StateEventType,
    },
    serde::Raw,
    space::SpaceRoomJoinRule,
    OwnedRoomId, RoomAliasId, RoomId, UserId,
};
use serde_json::value::to_raw_value;
use tracing::debug;

use crate::Result;

/// Power levels fall back to these values when the event or a field is
/// absent, matching the defaults applied at room creation.
const DEFAULT_INVITE_LEVEL: i64 = 50;
const DEFAULT_USER_LEVEL: i64 = 0;

pub struct Service {
    pub db: &'static dyn Data,
}

impl Service {
    #[tracing::instrument(skip(self))]
    pub fn room_exists(&self, room_id: &RoomId) -> Result<bool> {
        self.db.room_exists(room_id)
    }

    #[tracing::instrument(skip(self))]
    pub fn resolve_alias(&self, alias: &RoomAliasId) -> Result<Option<OwnedRoomId>> {
        self.db.resolve_alias(alias)
    }

    /// Returns the room's join rule. A missing or unparsable join rules
    /// event reads as invite-only, the most restrictive interpretation.
    #[tracing::instrument(skip(self))]
    pub fn join_rule(&self, room_id: &RoomId) -> Result<SpaceRoomJoinRule> {
        let Some(content) =
            self.db
                .state_content(room_id, &StateEventType::RoomJoinRules, "")?
        else {
            return Ok(SpaceRoomJoinRule::Invite);
        };

        let rule = match content.get("join_rule").and_then(|v| v.as_str()) {
            Some("public") => SpaceRoomJoinRule::Public,
            Some("knock") => SpaceRoomJoinRule::Knock,
            Some("invite") => SpaceRoomJoinRule::Invite,
            Some("private") => SpaceRoomJoinRule::Private,
            Some("restricted") => SpaceRoomJoinRule::Restricted,
            Some("knock_restricted") => SpaceRoomJoinRule::KnockRestricted,
            other => {
                debug!(?other, "Unrecognized join rule, treating as invite-only");
                SpaceRoomJoinRule::Invite
            }
        };

        Ok(rule)
    }

    /// Returns the rooms referenced by the live `m.room_membership`
    /// conditions of a restricted room's allow list.
    ///
    /// Entries of any other type, malformed entries and a non-list `allow`
    /// value are all inert: they are discarded rather than rejected, and an
    /// allow list with no live conditions leaves invitation as the only
    /// admission path. Never returns an error for bad state.
    #[tracing::instrument(skip(self))]
    pub fn allowed_room_ids(&self, room_id: &RoomId) -> Result<Vec<OwnedRoomId>> {
        let Some(content) =
            self.db
                .state_content(room_id, &StateEventType::RoomJoinRules, "")?
        else {
            return Ok(Vec::new());
        };

        match content.get("join_rule").and_then(|v| v.as_str()) {
            Some("restricted") | Some("knock_restricted") => {}
            _ => return Ok(Vec::new()),
        }

        let Some(allow) = content.get("allow").and_then(|v| v.as_array()) else {
            debug!("Allow list is missing or not a list, treating as empty");
            return Ok(Vec::new());
        };

        Ok(allow
            .iter()
            .filter_map(|entry| {
                if entry.get("type").and_then(|v| v.as_str()) != Some("m.room_membership") {
                    return None;
                }
                entry
                    .get("room_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| RoomId::parse(s).ok())
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    pub fn world_readable(&self, room_id: &RoomId) -> Result<bool> {
        Ok(self
            .db
            .state_content(room_id, &StateEventType::RoomHistoryVisibility, "")?
            .and_then(|content| {
                serde_json::from_value::<RoomHistoryVisibilityEventContent>(content).ok()
            })
            .map_or(false, |content| {
                content.history_visibility == HistoryVisibility::WorldReadable
            }))
    }

    #[tracing::instrument(skip(self))]
    pub fn guest_can_join(&self, room_id: &RoomId) -> Result<bool> {
        Ok(self
            .db
            .state_content(room_id, &StateEventType::RoomGuestAccess, "")?
            .and_then(|content| serde_json::from_value::<RoomGuestAccessEventContent>(content).ok())
            .map_or(false, |content| content.guest_access == GuestAccess::CanJoin))
    }

    /// Whether the user's power level in the room meets the invite
    /// threshold. This is also the capacity check for certifying a
    /// restricted join: only a server with such a member may stamp one.
    #[tracing::instrument(skip(self))]
    pub fn user_can_invite(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        let Some(content) =
            self.db
                .state_content(room_id, &StateEventType::RoomPowerLevels, "")?
        else {
            // No power levels event: every member acts at the default level
            // and the invite threshold is the creation-time default.
            return Ok(DEFAULT_USER_LEVEL >= DEFAULT_INVITE_LEVEL);
        };

        let invite = content
            .get("invite")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_INVITE_LEVEL);
        let users_default = content
            .get("users_default")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_USER_LEVEL);
        let level = content
            .get("users")
            .and_then(|v| v.as_object())
            .and_then(|users| users.get(user_id.as_str()))
            .and_then(|v| v.as_i64())
            .unwrap_or(users_default);

        Ok(level >= invite)
    }

    /// Returns the stripped `m.space.child` events of a room, skipping
    /// edges whose state key is not a room id or whose `via` list is empty.
    #[tracing::instrument(skip(self))]
    pub fn space_child_events(
        &self,
        room_id: &RoomId,
    ) -> Result<Vec<Raw<HierarchySpaceChildEvent>>> {
        let mut children = Vec::new();

        for (state_key, entry) in self
            .db
            .state_entries(room_id, &StateEventType::SpaceChild)?
        {
            if RoomId::parse(&state_key).is_err() {
                continue;
            }

            let via_is_empty = entry
                .content
                .get("via")
                .and_then(|v| v.as_array())
                .map_or(true, |via| via.is_empty());
            if via_is_empty {
                continue;
            }

            let event = serde_json::json!({
                "content": entry.content,
                "origin_server_ts": entry.origin_server_ts,
                "sender": entry.sender,
                "state_key": state_key,
                "type": "m.space.child",
            });

            children.push(Raw::from_json(
                to_raw_value(&event).expect("JSON value serializes"),
            ));
        }

        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use ruma::{room_id, server_name, user_id, RoomId};
    use serde_json::json;

    use super::*;
    use crate::database::MemoryDatabase;

    fn room() -> &'static RoomId { room_id!("!room:hs1") }

    fn fixture() -> (&'static MemoryDatabase, Service) {
        let db: &'static MemoryDatabase =
            Box::leak(Box::new(MemoryDatabase::new(server_name!("hs1").to_owned())));
        (db, Service { db })
    }

    fn set_join_rules(db: &MemoryDatabase, content: serde_json::Value) {
        db.set_state(
            room(),
            StateEventType::RoomJoinRules,
            "",
            user_id!("@alice:hs1"),
            content,
        );
    }

    #[test]
    fn missing_join_rules_read_as_invite_only() {
        let (_db, service) = fixture();
        assert_eq!(
            service.join_rule(room_id!("!unknown:hs1")).unwrap(),
            SpaceRoomJoinRule::Invite
        );
    }

    #[test]
    fn unrecognized_join_rules_read_as_invite_only() {
        let (db, service) = fixture();
        set_join_rules(db, json!({ "join_rule": "secret-handshake" }));
        assert_eq!(service.join_rule(room()).unwrap(), SpaceRoomJoinRule::Invite);

        set_join_rules(db, json!({ "join_rule": 42 }));
        assert_eq!(service.join_rule(room()).unwrap(), SpaceRoomJoinRule::Invite);
    }

    #[test]
    fn allow_list_parsing_is_lenient() {
        let (db, service) = fixture();

        // A well-formed list with mixed entries keeps only the live ones.
        set_join_rules(
            db,
            json!({
                "join_rule": "restricted",
                "allow": [
                    { "type": "m.room_membership", "room_id": "!space:hs1" },
                    { "type": "m.other", "room_id": "!other:hs1" },
                    "garbage",
                ],
            }),
        );
        assert_eq!(
            service.allowed_room_ids(room()).unwrap(),
            vec![room_id!("!space:hs1").to_owned()]
        );

        // A non-list allow value degrades to no conditions at all.
        set_join_rules(db, json!({ "join_rule": "restricted", "allow": "invalid" }));
        assert!(service.allowed_room_ids(room()).unwrap().is_empty());

        // A non-restricted rule has no conditions either.
        set_join_rules(
            db,
            json!({
                "join_rule": "public",
                "allow": [{ "type": "m.room_membership", "room_id": "!space:hs1" }],
            }),
        );
        assert!(service.allowed_room_ids(room()).unwrap().is_empty());
    }

    #[test]
    fn invite_power_uses_room_thresholds() {
        let (db, service) = fixture();
        db.create_room(room(), user_id!("@alice:hs1"));

        // Creation defaults: creator at 100, threshold 50.
        assert!(service.user_can_invite(room(), user_id!("@alice:hs1")).unwrap());
        assert!(!service.user_can_invite(room(), user_id!("@bob:hs1")).unwrap());

        db.set_state(
            room(),
            StateEventType::RoomPowerLevels,
            "",
            user_id!("@alice:hs1"),
            json!({ "users": { "@alice:hs1": 100 }, "users_default": 0, "invite": 0 }),
        );
        assert!(service.user_can_invite(room(), user_id!("@bob:hs1")).unwrap());
    }

    #[test]
    fn world_readability_requires_the_exact_visibility() {
        let (db, service) = fixture();
        db.create_room(room(), user_id!("@alice:hs1"));
        assert!(!service.world_readable(room()).unwrap());

        db.set_state(
            room(),
            StateEventType::RoomHistoryVisibility,
            "",
            user_id!("@alice:hs1"),
            json!({ "history_visibility": "world_readable" }),
        );
        assert!(service.world_readable(room()).unwrap());
    }

    #[test]
    fn space_children_skip_unroutable_edges() {
        let (db, service) = fixture();
        db.create_room(room(), user_id!("@alice:hs1"));

        db.set_state(
            room(),
            StateEventType::SpaceChild,
            "!child:hs1",
            user_id!("@alice:hs1"),
            json!({ "via": ["hs1"] }),
        );
        // An edge with no routing hints is unusable and skipped.
        db.set_state(
            room(),
            StateEventType::SpaceChild,
            "!unroutable:hs1",
            user_id!("@alice:hs1"),
            json!({ "via": [] }),
        );
        // A state key that is not a room id is skipped.
        db.set_state(
            room(),
            StateEventType::SpaceChild,
            "not-a-room",
            user_id!("@alice:hs1"),
            json!({ "via": ["hs1"] }),
        );

        let children = service.space_child_events(room()).unwrap();
        assert_eq!(children.len(), 1);
        let event = children[0].deserialize().unwrap();
        assert_eq!(event.state_key, room_id!("!child:hs1"));
    }
}
