// =============================================================================
// Palisade - Test Federation Harness
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Wires several independent server instances into an in-process
//   federation: the outbound client of each instance routes requests to the
//   server-server handlers of its peers, and committed membership events
//   are delivered to every server participating in the room, the way the
//   event-graph layer would.
//
// =============================================================================

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Once, RwLock as StdRwLock},
};

use async_trait::async_trait;
use figment::{
    providers::{Format, Toml},
    Figment,
};
use palisade::{
    api,
    database::MemoryDatabase,
    service::{
        rooms::{state_cache::Data as _, timeline::Data as _, timeline::MembershipEvent},
        sending,
    },
    Config, Error, Result, Services,
};
use ruma::{
    api::{
        client::membership::{invite_user, join_room_by_id_or_alias, leave_room},
        client::space::get_hierarchy,
        federation,
    },
    events::StateEventType,
    OwnedRoomId, OwnedServerName, RoomId, ServerName, UserId,
};

static INIT: Once = Once::new();

/// Initialize test environment
pub fn init_test_env() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();
    });
}

pub struct TestServer {
    pub name: OwnedServerName,
    pub db: &'static MemoryDatabase,
    pub services: Arc<Services>,
}

#[derive(Default)]
pub struct Federation {
    servers: StdRwLock<HashMap<OwnedServerName, Arc<Services>>>,
    databases: StdRwLock<HashMap<OwnedServerName, &'static MemoryDatabase>>,
}

impl Federation {
    pub fn new() -> Arc<Self> {
        init_test_env();
        Arc::default()
    }

    pub fn add_server(self: &Arc<Self>, name: &str) -> TestServer {
        let server_name = ServerName::parse(name).expect("valid server name");

        let config: Config = Figment::new()
            .merge(Toml::string(&format!(
                r#"
                server_name = "{name}"
                federation_timeout_s = 5
                "#
            )))
            .extract()
            .expect("config parses");

        let db: &'static MemoryDatabase =
            Box::leak(Box::new(MemoryDatabase::new(server_name.clone())));
        let services = Arc::new(
            Services::build(db, Arc::clone(self) as Arc<dyn sending::Client>, config)
                .expect("services build"),
        );

        self.servers
            .write()
            .expect("lock is not poisoned")
            .insert(server_name.clone(), Arc::clone(&services));
        self.databases
            .write()
            .expect("lock is not poisoned")
            .insert(server_name.clone(), db);

        TestServer {
            name: server_name,
            db,
            services,
        }
    }

    fn instance(&self, server: &ServerName) -> Result<Arc<Services>> {
        self.servers
            .read()
            .expect("lock is not poisoned")
            .get(server)
            .cloned()
            .ok_or_else(|| Error::Unreachable(server.to_owned(), "no route to host".to_owned()))
    }

    /// Delivers the latest membership event for `(room_id, user_id)` found
    /// on `origin` to every other server currently participating in the
    /// room, as federation transaction sending would.
    pub fn deliver_membership(&self, origin: &TestServer, room_id: &RoomId, user_id: &UserId) {
        let Ok(Some(event)) = origin.db.membership_event(room_id, user_id) else {
            return;
        };

        for (name, db) in self.databases.read().expect("lock is not poisoned").iter() {
            if *name == origin.name {
                continue;
            }
            if db.server_in_room(name, room_id).unwrap_or(false) {
                db.apply_membership(&event);
            }
        }
    }

    /// Replaces a state event on every server participating in the room.
    pub fn set_state(
        &self,
        room_id: &RoomId,
        event_type: StateEventType,
        state_key: &str,
        sender: &UserId,
        content: serde_json::Value,
    ) {
        for (name, db) in self.databases.read().expect("lock is not poisoned").iter() {
            if db.server_in_room(name, room_id).unwrap_or(false) {
                db.set_state(room_id, event_type.clone(), state_key, sender, content.clone());
            }
        }
    }
}

#[async_trait]
impl sending::Client for Federation {
    async fn make_restricted_join(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<MembershipEvent> {
        let services = self.instance(server)?;
        let event = api::server_server::create_join_event_route(
            &services,
            user_id.server_name(),
            room_id,
            user_id,
        )
        .await?;

        // The resident server announces the new membership to the rest of
        // the room.
        let databases: Vec<_> = self
            .databases
            .read()
            .expect("lock is not poisoned")
            .iter()
            .map(|(name, db)| (name.clone(), *db))
            .collect();
        for (name, db) in databases {
            if name == server {
                continue;
            }
            if db.server_in_room(&name, room_id).unwrap_or(false) {
                db.apply_membership(&event);
            }
        }

        Ok(event)
    }

    async fn space_summary_fragment(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        requesting_user: &UserId,
        suggested_only: bool,
    ) -> Result<Option<federation::space::get_hierarchy::v1::Response>> {
        let services = self.instance(server)?;
        api::server_server::get_hierarchy_route(
            &services,
            requesting_user.server_name(),
            room_id,
            requesting_user,
            suggested_only,
        )
        .await
    }
}

impl TestServer {
    /// Joins a room through the client join endpoint, with `via` as the
    /// ordered server preference. On a federated join the room state is
    /// copied over from the resident server, as the join response would.
    pub async fn join(
        &self,
        fed: &Federation,
        user_id: &UserId,
        room_id: &RoomId,
        via: &[&TestServer],
    ) -> Result<()> {
        let was_participating = self
            .db
            .server_in_room(&self.name, room_id)
            .unwrap_or(false);

        let mut request =
            join_room_by_id_or_alias::v3::Request::new(room_id.to_owned().into());
        request.via = via.iter().map(|server| server.name.clone()).collect();

        api::client_server::join_room_by_id_or_alias_route(&self.services, user_id, request)
            .await?;

        if !was_participating {
            for server in via {
                if server.name == self.name {
                    continue;
                }
                if server
                    .db
                    .lookup(room_id, user_id)
                    .map_or(false, |lookup| lookup.state.is_some())
                {
                    self.db.import_room(room_id, server.db);
                    break;
                }
            }
        } else {
            fed.deliver_membership(self, room_id, user_id);
        }

        Ok(())
    }

    pub async fn leave(
        &self,
        fed: &Federation,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<()> {
        let request = leave_room::v3::Request::new(room_id.to_owned());
        api::client_server::leave_room_route(&self.services, user_id, request).await?;
        fed.deliver_membership(self, room_id, user_id);
        Ok(())
    }

    pub async fn invite(
        &self,
        fed: &Federation,
        sender: &UserId,
        invitee: &UserId,
        room_id: &RoomId,
    ) -> Result<()> {
        let request = invite_user::v3::Request::new(
            room_id.to_owned(),
            invite_user::v3::InvitationRecipient::UserId {
                user_id: invitee.to_owned(),
            },
        );
        api::client_server::invite_user_route(&self.services, sender, request).await?;
        fed.deliver_membership(self, room_id, invitee);
        Ok(())
    }

    /// Requests the space hierarchy and returns the visible room ids.
    pub async fn hierarchy(&self, user_id: &UserId, room_id: &RoomId) -> Result<Vec<OwnedRoomId>> {
        let request = get_hierarchy::v1::Request::new(room_id.to_owned());
        let response =
            api::client_server::get_hierarchy_route(&self.services, user_id, request).await?;
        Ok(response
            .rooms
            .iter()
            .map(|chunk| chunk.room_id.clone())
            .collect())
    }

    /// The user's current membership record in the room, if any.
    pub fn membership_record(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Option<MembershipEvent> {
        self.db.membership_event(room_id, user_id).ok().flatten()
    }

    /// The `authorized_via_server` stamp on the user's current membership
    /// record, if any.
    pub fn authorization_stamp(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Option<OwnedServerName> {
        self.db
            .membership_event(room_id, user_id)
            .ok()
            .flatten()
            .and_then(|event| event.authorized_via_server)
    }

    pub fn is_joined(&self, user_id: &UserId, room_id: &RoomId) -> bool {
        self.services
            .rooms
            .state_cache
            .is_joined(user_id, room_id)
            .unwrap_or(false)
    }
}

/// Creates a space room: public, world readable, typed as a space.
pub fn create_space(server: &TestServer, room_id: &RoomId, creator: &UserId) {
    server.db.create_room(room_id, creator);
    server.db.set_state(
        room_id,
        StateEventType::RoomHistoryVisibility,
        "",
        creator,
        serde_json::json!({ "history_visibility": "world_readable" }),
    );
}

/// Creates a room joinable only by members of `space`.
pub fn create_restricted_room(
    server: &TestServer,
    room_id: &RoomId,
    creator: &UserId,
    space: &RoomId,
    via: &str,
) {
    server.db.create_room(room_id, creator);
    server.db.set_state(
        room_id,
        StateEventType::RoomJoinRules,
        "",
        creator,
        serde_json::json!({
            "join_rule": "restricted",
            "allow": [
                { "type": "m.room_membership", "room_id": space, "via": [via] },
            ],
        }),
    );
}

/// Links `child` under `parent` in the space graph.
pub fn add_space_child(
    server: &TestServer,
    sender: &UserId,
    parent: &RoomId,
    child: &RoomId,
    via: &str,
) {
    server.db.set_state(
        parent,
        StateEventType::SpaceChild,
        child.as_str(),
        sender,
        serde_json::json!({ "via": [via] }),
    );
}
