// =============================================================================
// Palisade - Memory Database Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   An in-memory implementation of every storage trait, for tests and
//   embedding. The real event-graph store lives outside this crate; this
//   backend keeps just enough — current state, the membership index and
//   membership history — to drive authorization and summaries. The fixture
//   methods mirror what room creation and federation state resolution
//   would otherwise populate.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::RwLock,
};

use ruma::{
    events::{room::member::MembershipState, StateEventType},
    MilliSecondsSinceUnixEpoch, OwnedRoomAliasId, OwnedRoomId, OwnedServerName, OwnedUserId,
    RoomAliasId, RoomId, ServerName, UserId,
};
use serde_json::json;

use crate::{
    service::rooms::{
        state_accessor::{self, StateEntry},
        state_cache::{self, MembershipLookup},
        timeline::{self, MembershipEvent},
    },
    utils, Error, Result,
};

#[derive(Clone, Default)]
struct Room {
    state: HashMap<(StateEventType, String), StateEntry>,
    memberships: HashMap<OwnedUserId, MembershipState>,
    membership_events: HashMap<OwnedUserId, MembershipEvent>,
}

impl Room {
    fn joined_users(&self) -> impl Iterator<Item = &OwnedUserId> {
        self.memberships
            .iter()
            .filter(|(_, state)| **state == MembershipState::Join)
            .map(|(user, _)| user)
    }

    fn has_joined_user_of(&self, server: &ServerName) -> bool {
        self.joined_users().any(|user| user.server_name() == server)
    }
}

pub struct MemoryDatabase {
    server_name: OwnedServerName,
    rooms: RwLock<HashMap<OwnedRoomId, Room>>,
    aliases: RwLock<HashMap<OwnedRoomAliasId, OwnedRoomId>>,
}

impl MemoryDatabase {
    pub fn new(server_name: OwnedServerName) -> Self {
        Self {
            server_name,
            rooms: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a room with the creation-time defaults: a public join rule,
    /// power levels granting the creator level 100 with an invite threshold
    /// of 50, and the creator joined.
    pub fn create_room(&self, room_id: &RoomId, creator: &UserId) {
        self.set_state(
            room_id,
            StateEventType::RoomJoinRules,
            "",
            creator,
            json!({ "join_rule": "public" }),
        );
        self.set_state(
            room_id,
            StateEventType::RoomPowerLevels,
            "",
            creator,
            json!({
                "users": { creator.as_str(): 100 },
                "users_default": 0,
                "invite": 50,
            }),
        );
        self.apply_membership(&MembershipEvent {
            event_id: utils::generate_event_id(creator.server_name()),
            room_id: room_id.to_owned(),
            sender: creator.to_owned(),
            state_key: creator.to_owned(),
            membership: MembershipState::Join,
            authorized_via_server: None,
            origin_server_ts: MilliSecondsSinceUnixEpoch::now(),
        });
    }

    /// Replaces a current state event. A new join rules event atomically
    /// replaces the allow list.
    pub fn set_state(
        &self,
        room_id: &RoomId,
        event_type: StateEventType,
        state_key: &str,
        sender: &UserId,
        content: serde_json::Value,
    ) {
        self.rooms
            .write()
            .expect("lock is not poisoned")
            .entry(room_id.to_owned())
            .or_default()
            .state
            .insert(
                (event_type, state_key.to_owned()),
                StateEntry {
                    sender: sender.to_owned(),
                    origin_server_ts: MilliSecondsSinceUnixEpoch::now(),
                    content,
                },
            );
    }

    pub fn set_alias(&self, alias: &RoomAliasId, room_id: &RoomId) {
        self.aliases
            .write()
            .expect("lock is not poisoned")
            .insert(alias.to_owned(), room_id.to_owned());
    }

    /// Applies a membership event to the index unconditionally, the way an
    /// event delivered over federation would be after state resolution.
    pub fn apply_membership(&self, event: &MembershipEvent) {
        let mut rooms = self.rooms.write().expect("lock is not poisoned");
        let room = rooms.entry(event.room_id.clone()).or_default();
        room.memberships
            .insert(event.state_key.clone(), event.membership.clone());
        room.membership_events
            .insert(event.state_key.clone(), event.clone());
    }

    /// Copies a room's state and membership index from another server's
    /// database, as receiving the room state during a join would.
    pub fn import_room(&self, room_id: &RoomId, other: &MemoryDatabase) {
        let imported = other
            .rooms
            .read()
            .expect("lock is not poisoned")
            .get(room_id)
            .cloned();

        if let Some(imported) = imported {
            self.rooms
                .write()
                .expect("lock is not poisoned")
                .insert(room_id.to_owned(), imported);
        }
    }
}

impl state_accessor::Data for MemoryDatabase {
    fn room_exists(&self, room_id: &RoomId) -> Result<bool> {
        Ok(self
            .rooms
            .read()
            .expect("lock is not poisoned")
            .contains_key(room_id))
    }

    fn state_content(
        &self,
        room_id: &RoomId,
        event_type: &StateEventType,
        state_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self
            .rooms
            .read()
            .expect("lock is not poisoned")
            .get(room_id)
            .and_then(|room| {
                room.state
                    .get(&(event_type.clone(), state_key.to_owned()))
                    .map(|entry| entry.content.clone())
            }))
    }

    fn state_entries(
        &self,
        room_id: &RoomId,
        event_type: &StateEventType,
    ) -> Result<Vec<(String, StateEntry)>> {
        Ok(self
            .rooms
            .read()
            .expect("lock is not poisoned")
            .get(room_id)
            .map(|room| {
                room.state
                    .iter()
                    .filter(|((ty, _), _)| ty == event_type)
                    .map(|((_, state_key), entry)| (state_key.clone(), entry.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn resolve_alias(&self, alias: &RoomAliasId) -> Result<Option<OwnedRoomId>> {
        Ok(self
            .aliases
            .read()
            .expect("lock is not poisoned")
            .get(alias)
            .cloned())
    }
}

impl state_cache::Data for MemoryDatabase {
    fn lookup(&self, room_id: &RoomId, user_id: &UserId) -> Result<MembershipLookup> {
        let rooms = self.rooms.read().expect("lock is not poisoned");

        let Some(room) = rooms.get(room_id) else {
            return Ok(MembershipLookup {
                state: None,
                authoritative: false,
            });
        };

        Ok(MembershipLookup {
            state: room.memberships.get(user_id).cloned(),
            // Membership knowledge is authoritative only while this server
            // participates in the room; records kept after the last local
            // user left may be arbitrarily stale.
            authoritative: room.has_joined_user_of(&self.server_name),
        })
    }

    fn server_in_room(&self, server: &ServerName, room_id: &RoomId) -> Result<bool> {
        Ok(self
            .rooms
            .read()
            .expect("lock is not poisoned")
            .get(room_id)
            .map_or(false, |room| room.has_joined_user_of(server)))
    }

    fn room_members(&self, room_id: &RoomId) -> Result<Vec<OwnedUserId>> {
        Ok(self
            .rooms
            .read()
            .expect("lock is not poisoned")
            .get(room_id)
            .map(|room| room.joined_users().cloned().collect())
            .unwrap_or_default())
    }

    fn room_joined_count(&self, room_id: &RoomId) -> Result<Option<u64>> {
        Ok(self
            .rooms
            .read()
            .expect("lock is not poisoned")
            .get(room_id)
            .map(|room| room.joined_users().count() as u64))
    }
}

impl timeline::Data for MemoryDatabase {
    fn append_membership(
        &self,
        event: &MembershipEvent,
        prev: Option<&MembershipState>,
    ) -> Result<()> {
        let mut rooms = self.rooms.write().expect("lock is not poisoned");
        let room = rooms.entry(event.room_id.clone()).or_default();

        if room.memberships.get(&event.state_key) != prev {
            return Err(Error::Conflict(
                "Membership state advanced since the decision was made.",
            ));
        }

        room.memberships
            .insert(event.state_key.clone(), event.membership.clone());
        room.membership_events
            .insert(event.state_key.clone(), event.clone());
        Ok(())
    }

    fn membership_event(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<MembershipEvent>> {
        Ok(self
            .rooms
            .read()
            .expect("lock is not poisoned")
            .get(room_id)
            .and_then(|room| room.membership_events.get(user_id).cloned()))
    }
}
