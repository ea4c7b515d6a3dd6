// =============================================================================
// Palisade - Service Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Central service container. Services are wired in dependency order, each
//   holding references to exactly the collaborators it needs, so several
//   independent instances can coexist in one process — the integration
//   tests run whole federations that way.
//
// =============================================================================

pub mod globals;
pub mod rooms;
pub mod sending;

use std::sync::Arc;

use lru_cache::LruCache;
use tokio::sync::Mutex;

use crate::{Config, Result};

pub struct Services {
    pub globals: Arc<globals::Service>,
    pub rooms: rooms::Service,
    pub sending: Arc<sending::Service>,
}

impl Services {
    /// Builds and wires all services on top of a database implementation
    /// and an outbound federation client.
    pub fn build<D: rooms::Data>(
        db: &'static D,
        federation: Arc<dyn sending::Client>,
        config: Config,
    ) -> Result<Self> {
        let globals = Arc::new(globals::Service::new(config));
        let sending = Arc::new(sending::Service::new(
            federation,
            globals.federation_timeout(),
        ));

        let state_accessor = Arc::new(rooms::state_accessor::Service { db });
        let state_cache = Arc::new(rooms::state_cache::Service { db });
        let timeline = Arc::new(rooms::timeline::Service {
            db,
            globals: Arc::clone(&globals),
            state_cache: Arc::clone(&state_cache),
        });
        let restriction = Arc::new(rooms::restriction::Service {
            state_accessor: Arc::clone(&state_accessor),
            state_cache: Arc::clone(&state_cache),
        });
        let remote_join = Arc::new(rooms::remote_join::Service {
            globals: Arc::clone(&globals),
            sending: Arc::clone(&sending),
            state_cache: Arc::clone(&state_cache),
            timeline: Arc::clone(&timeline),
        });
        let helpers = Arc::new(rooms::helpers::Service {
            globals: Arc::clone(&globals),
            state_accessor: Arc::clone(&state_accessor),
            state_cache: Arc::clone(&state_cache),
            restriction: Arc::clone(&restriction),
            remote_join: Arc::clone(&remote_join),
            timeline: Arc::clone(&timeline),
        });
        let spaces = Arc::new(rooms::spaces::Service {
            globals: Arc::clone(&globals),
            state_accessor: Arc::clone(&state_accessor),
            state_cache: Arc::clone(&state_cache),
            restriction: Arc::clone(&restriction),
            sending: Arc::clone(&sending),
            roomid_spacehierarchy_cache: Mutex::new(LruCache::new(
                globals.config.hierarchy_cache_capacity,
            )),
        });

        Ok(Self {
            globals,
            rooms: rooms::Service {
                state_accessor,
                state_cache,
                timeline,
                restriction,
                remote_join,
                helpers,
                spaces,
            },
            sending,
        })
    }
}
