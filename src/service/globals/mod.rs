// =============================================================================
// Palisade - Globals Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Server identity, configuration access and shared synchronization state.
//
// =============================================================================

use std::{collections::HashMap, sync::Arc, time::Duration};

use ruma::{OwnedRoomId, OwnedUserId, RoomId, ServerName, UserId};
use tokio::sync::{Mutex, RwLock};

use crate::Config;

pub struct Service {
    pub config: Config,

    /// Serializes membership operations per `(room, user)` pair, so that two
    /// racing join attempts cannot both append conflicting records. Later
    /// requests observe the resolved membership and short-circuit.
    membership_mutex: RwLock<HashMap<(OwnedRoomId, OwnedUserId), Arc<Mutex<()>>>>,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            membership_mutex: RwLock::new(HashMap::new()),
        }
    }

    pub fn server_name(&self) -> &ServerName {
        &self.config.server_name
    }

    pub fn federation_timeout(&self) -> Duration {
        self.config.federation_timeout()
    }

    pub async fn membership_lock(&self, room_id: &RoomId, user_id: &UserId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.membership_mutex
                .write()
                .await
                .entry((room_id.to_owned(), user_id.to_owned()))
                .or_default(),
        )
    }
}
