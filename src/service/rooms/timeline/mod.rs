// =============================================================================
// Palisade - Timeline Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Membership event commit. Validates the membership state machine,
//   detects concurrent writes and retries once against the latest state.
//   A record only becomes durable here, after the full authorization
//   decision has concluded — cancelling a join mid-flight can never leave
//   a partial record.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::{Data, MembershipEvent};
use ruma::{
    api::client::error::ErrorKind, events::room::member::MembershipState,
    MilliSecondsSinceUnixEpoch, OwnedEventId, OwnedServerName, RoomId, UserId,
};
use tracing::warn;

use crate::{service, utils, Error, Result};

pub struct Service {
    pub db: &'static dyn Data,
    pub globals: Arc<service::globals::Service>,
    pub state_cache: Arc<service::rooms::state_cache::Service>,
}

impl Service {
    /// Builds a membership event originating on this server and commits it.
    /// Returns the event id, or the existing event id when the user already
    /// holds the target state (idempotent re-application).
    #[tracing::instrument(skip(self))]
    pub fn build_and_append_membership(
        &self,
        room_id: &RoomId,
        sender: &UserId,
        target: &UserId,
        membership: MembershipState,
        authorized_via_server: Option<OwnedServerName>,
    ) -> Result<OwnedEventId> {
        let mut prev = self.state_cache.lookup(room_id, target)?.state;

        for attempt in 0..2 {
            if prev.as_ref() == Some(&membership) {
                if let Some(existing) = self.db.membership_event(room_id, target)? {
                    return Ok(existing.event_id);
                }
            }

            if !is_valid_transition(prev.as_ref(), &membership) {
                return Err(Error::BadRequest(
                    ErrorKind::forbidden(),
                    "Membership change is not allowed from the current state.",
                ));
            }

            let event = MembershipEvent {
                event_id: utils::generate_event_id(self.globals.server_name()),
                room_id: room_id.to_owned(),
                sender: sender.to_owned(),
                state_key: target.to_owned(),
                membership: membership.clone(),
                authorized_via_server: authorized_via_server.clone(),
                origin_server_ts: MilliSecondsSinceUnixEpoch::now(),
            };

            match self.db.append_membership(&event, prev.as_ref()) {
                Ok(()) => return Ok(event.event_id),
                Err(Error::Conflict(_)) if attempt == 0 => {
                    warn!(%room_id, %target, "Concurrent membership write, retrying against latest state");
                    prev = self.state_cache.lookup(room_id, target)?.state;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict("Membership write conflicted twice."))
    }

    /// Commits a membership event authorized by a remote server, after the
    /// caller has verified the grant. Idempotent like
    /// [`Self::build_and_append_membership`].
    #[tracing::instrument(skip(self, event))]
    pub fn append_remote_membership(&self, event: &MembershipEvent) -> Result<OwnedEventId> {
        let mut prev = self
            .state_cache
            .lookup(&event.room_id, &event.state_key)?
            .state;

        for attempt in 0..2 {
            if prev.as_ref() == Some(&event.membership) {
                if let Some(existing) =
                    self.db.membership_event(&event.room_id, &event.state_key)?
                {
                    return Ok(existing.event_id);
                }
            }

            if !is_valid_transition(prev.as_ref(), &event.membership) {
                return Err(Error::BadRequest(
                    ErrorKind::forbidden(),
                    "Membership change is not allowed from the current state.",
                ));
            }

            match self.db.append_membership(event, prev.as_ref()) {
                Ok(()) => return Ok(event.event_id.clone()),
                Err(Error::Conflict(_)) if attempt == 0 => {
                    warn!(room_id = %event.room_id, user_id = %event.state_key,
                        "Concurrent membership write, retrying against latest state");
                    prev = self
                        .state_cache
                        .lookup(&event.room_id, &event.state_key)?
                        .state;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict("Membership write conflicted twice."))
    }

    #[tracing::instrument(skip(self))]
    pub fn membership_event(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<MembershipEvent>> {
        self.db.membership_event(room_id, user_id)
    }
}

/// The membership state machine. Absent (`None`) is the initial state;
/// records are never deleted, only superseded.
fn is_valid_transition(prev: Option<&MembershipState>, next: &MembershipState) -> bool {
    use MembershipState::{Ban, Invite, Join, Knock, Leave};

    match (prev, next) {
        // Bans may be placed from any state, but only lifted to leave.
        (Some(Ban), Leave) => true,
        (Some(Ban), _) => false,
        (_, Ban) => true,

        (None | Some(Leave), Invite) => true,
        (None | Some(Invite) | Some(Leave), Join) => true,
        (Some(Invite) | Some(Join) | Some(Knock), Leave) => true,

        (None | Some(Leave), Knock) => true,
        (Some(Knock), Invite | Join) => true,

        _ => false,
    }
}
