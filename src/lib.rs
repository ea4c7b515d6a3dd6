// =============================================================================
// Palisade - Library Root
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Membership authorization for a federated Matrix-style homeserver:
//   restricted join rules, cross-server join authorization failover, and
//   visibility filtering for space hierarchy summaries. Storage and
//   transport are collaborators behind traits; see `database::MemoryDatabase`
//   and `service::sending::Client`.
//
// =============================================================================

pub mod api;
pub mod config;
pub mod database;
pub mod service;
pub mod utils;

pub use config::Config;
pub use service::Services;
pub use utils::error::{Error, Result};
