// =============================================================================
// Palisade - Remote Join Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   The failover coordinator for remote join authorization. Candidate
//   servers are the caller's declared preference: they are tried strictly
//   in order, never reordered, deduplicated or raced, so that a later, less
//   authoritative server can never answer before an earlier one.
//
// =============================================================================

use std::sync::Arc;

use ruma::{
    api::client::error::ErrorKind, events::room::member::MembershipState, OwnedRoomId,
    OwnedServerName, RoomId, ServerName, UserId,
};
use tracing::{debug, info, warn};

use crate::{
    service,
    service::{rooms::timeline::MembershipEvent, sending::RemoteJoinOutcome},
    Error, Result,
};

/// The best answer seen so far across the candidate list. An authorization
/// beats a denial, a denial beats exhaustion.
#[derive(Debug, PartialEq)]
enum BestOutcome {
    None,
    Denied(String),
}

pub struct Service {
    pub globals: Arc<service::globals::Service>,
    pub sending: Arc<service::sending::Service>,
    pub state_cache: Arc<service::rooms::state_cache::Service>,
    pub timeline: Arc<service::rooms::timeline::Service>,
}

impl Service {
    /// Walks `servers` in order until one produces an authorized join, then
    /// verifies and commits the grant.
    ///
    /// One server's ignorance is not another's denial: a definitive
    /// rejection is only surfaced after every candidate has spoken, and a
    /// list exhausted without any definitive answer yields the distinct
    /// gateway-class failure rather than a policy denial.
    #[tracing::instrument(skip(self))]
    pub async fn join_via_servers(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        servers: &[OwnedServerName],
    ) -> Result<OwnedRoomId> {
        // Re-running an already resolved join is a no-op success.
        if self.state_cache.is_joined(user_id, room_id)? {
            return Ok(room_id.to_owned());
        }

        let attempts = self.globals.config.failover.attempts.max(1);
        let mut best = BestOutcome::None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.globals.config.failover_backoff();
                if !backoff.is_zero() {
                    debug!(?backoff, "Backing off before the next failover pass");
                    tokio::time::sleep(backoff).await;
                }
            }

            for server in servers {
                if server == self.globals.server_name() {
                    continue;
                }

                match self
                    .sending
                    .make_restricted_join(server, room_id, user_id)
                    .await
                {
                    RemoteJoinOutcome::Authorized(event) => {
                        self.accept_grant(room_id, user_id, server, event)?;
                        info!("Join authorized via {server}");
                        return Ok(room_id.to_owned());
                    }
                    RemoteJoinOutcome::Denied(reason) => {
                        best = BestOutcome::Denied(reason);
                    }
                    RemoteJoinOutcome::Undecided => {}
                }
            }
        }

        match best {
            BestOutcome::Denied(reason) => {
                Err(Error::BadRequestString(ErrorKind::forbidden(), reason))
            }
            BestOutcome::None => Err(Error::BadServerResponse(
                "No server available to assist in joining.",
            )),
        }
    }

    /// Verifies a remote grant before committing it: the event must concern
    /// the join we asked about, and the authorizing server it names must be
    /// the server that produced it — nobody certifies on someone else's
    /// behalf.
    fn accept_grant(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        server: &ServerName,
        event: MembershipEvent,
    ) -> Result<()> {
        if event.room_id != room_id || event.state_key != user_id {
            warn!("{server} answered for the wrong room or user");
            return Err(Error::BadServerResponse(
                "Server sent a membership event for the wrong room or user.",
            ));
        }

        if event.membership != MembershipState::Join {
            return Err(Error::BadServerResponse(
                "Server sent a non-join membership event.",
            ));
        }

        if let Some(authorizing) = &event.authorized_via_server {
            if authorizing != server {
                warn!("{server} claimed an authorization stamped by {authorizing}");
                return Err(Error::BadServerResponse(
                    "Server sent an authorization it does not vouch for.",
                ));
            }
        }

        self.timeline.append_remote_membership(&event)?;
        Ok(())
    }
}
