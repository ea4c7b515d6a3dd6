// =============================================================================
// Palisade - Utils Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// =============================================================================

pub mod error;

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
};

use ruma::{EventId, OwnedEventId, ServerName};

static EVENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn millis_since_unix_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time is valid")
        .as_millis() as u64
}

/// Allocates an opaque event id. Real deployments derive event ids from the
/// event's reference hash; hashing and signing live behind the storage
/// boundary here, so an origin-salted counter is sufficient for uniqueness.
pub fn generate_event_id(origin: &ServerName) -> OwnedEventId {
    let mut hasher = DefaultHasher::new();
    origin.hash(&mut hasher);
    millis_since_unix_epoch().hash(&mut hasher);
    let counter = EVENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    EventId::parse(format!("${:016x}{:08x}", hasher.finish(), counter))
        .expect("generated event ids are valid")
}

#[cfg(test)]
mod tests {
    use ruma::server_name;

    use super::*;

    #[test]
    fn event_ids_are_unique_per_origin() {
        let a = generate_event_id(server_name!("hs1"));
        let b = generate_event_id(server_name!("hs1"));
        let c = generate_event_id(server_name!("hs2"));

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn event_ids_carry_the_sigil() {
        let event_id = generate_event_id(server_name!("example.org"));
        assert!(event_id.as_str().starts_with('$'));
    }
}
