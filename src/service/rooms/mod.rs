// =============================================================================
// Palisade - Rooms Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// =============================================================================

pub mod helpers;
pub mod remote_join;
pub mod restriction;
pub mod spaces;
pub mod state_accessor;
pub mod state_cache;
pub mod timeline;

use std::sync::Arc;

pub trait Data: state_accessor::Data + state_cache::Data + timeline::Data {}

impl<T: state_accessor::Data + state_cache::Data + timeline::Data> Data for T {}

pub struct Service {
    pub state_accessor: Arc<state_accessor::Service>,
    pub state_cache: Arc<state_cache::Service>,
    pub timeline: Arc<timeline::Service>,
    pub restriction: Arc<restriction::Service>,
    pub remote_join: Arc<remote_join::Service>,
    pub helpers: Arc<helpers::Service>,
    pub spaces: Arc<spaces::Service>,
}
