// =============================================================================
// Palisade - Sending Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Outbound federation boundary. The transport itself (resolution, request
//   signing, HTTP) is an external collaborator behind the Client trait;
//   this service adds the mandatory per-call timeout and classifies peer
//   answers into the three outcomes the failover coordinator works with.
//
// =============================================================================

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ruma::{api::federation::space::get_hierarchy, RoomId, ServerName, UserId};
use tracing::{info, warn};

use crate::{service::rooms::timeline::MembershipEvent, Error, Result};

/// Outbound federation requests this subsystem makes.
#[async_trait]
pub trait Client: Send + Sync {
    /// Asks `server` to authorize and certify a restricted join of
    /// `user_id` into `room_id` from its own knowledge.
    async fn make_restricted_join(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<MembershipEvent>;

    /// Asks `server` for a per-requester summary fragment of a room this
    /// server does not participate in. `Ok(None)` means the remote could
    /// not confirm visibility and the room must be omitted.
    async fn space_summary_fragment(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        requesting_user: &UserId,
        suggested_only: bool,
    ) -> Result<Option<get_hierarchy::v1::Response>>;
}

/// One candidate server's answer to a join authorization request.
#[derive(Debug)]
pub enum RemoteJoinOutcome {
    /// The server certified the join and returned the membership event.
    Authorized(MembershipEvent),
    /// The server authoritatively denied the join. Only binding once every
    /// candidate has spoken.
    Denied(String),
    /// The server was unreachable, timed out, or could not decide either
    /// way. Never binding on its own.
    Undecided,
}

/// A client that reaches nothing. Useful for instances that should never
/// leave their own island, and as the default in tests.
pub struct OfflineClient;

#[async_trait]
impl Client for OfflineClient {
    async fn make_restricted_join(
        &self,
        server: &ServerName,
        _room_id: &RoomId,
        _user_id: &UserId,
    ) -> Result<MembershipEvent> {
        Err(Error::Unreachable(
            server.to_owned(),
            "federation is disabled".to_owned(),
        ))
    }

    async fn space_summary_fragment(
        &self,
        server: &ServerName,
        _room_id: &RoomId,
        _requesting_user: &UserId,
        _suggested_only: bool,
    ) -> Result<Option<get_hierarchy::v1::Response>> {
        Err(Error::Unreachable(
            server.to_owned(),
            "federation is disabled".to_owned(),
        ))
    }
}

pub struct Service {
    client: Arc<dyn Client>,
    timeout: Duration,
}

impl Service {
    pub fn new(client: Arc<dyn Client>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Performs one `make_restricted_join` round trip and folds transport
    /// failures into [`RemoteJoinOutcome::Undecided`]; one peer's silence
    /// must never read as an answer.
    #[tracing::instrument(skip(self))]
    pub async fn make_restricted_join(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> RemoteJoinOutcome {
        info!("Asking {server} to authorize the join");

        let request = self.client.make_restricted_join(server, room_id, user_id);
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(event)) => RemoteJoinOutcome::Authorized(event),
            Ok(Err(error)) if error.is_forbidden() => {
                info!("{server} authoritatively denied the join: {error}");
                RemoteJoinOutcome::Denied(error.to_string())
            }
            Ok(Err(Error::UnableToAuthorize(reason))) => {
                info!("{server} could not decide: {reason}");
                RemoteJoinOutcome::Undecided
            }
            Ok(Err(error)) => {
                warn!("Request to {server} failed: {error}");
                RemoteJoinOutcome::Undecided
            }
            Err(_) => {
                warn!("Request to {server} timed out");
                RemoteJoinOutcome::Undecided
            }
        }
    }

    /// Fetches a summary fragment from one server, with the same timeout
    /// handling. Errors are returned so the caller can try the next via
    /// server.
    #[tracing::instrument(skip(self))]
    pub async fn space_summary_fragment(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        requesting_user: &UserId,
        suggested_only: bool,
    ) -> Result<Option<get_hierarchy::v1::Response>> {
        info!("Asking {server} for a summary of {room_id}");

        let request =
            self.client
                .space_summary_fragment(server, room_id, requesting_user, suggested_only);
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Unreachable(
                server.to_owned(),
                "request timed out".to_owned(),
            )),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[allow(unused)]
fn _assert_object_safe(_: &dyn Client) {}
