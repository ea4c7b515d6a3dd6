// =============================================================================
// Palisade - Server-Server API Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Handlers for requests arriving from peer servers. Transport-level
//   request signing and verification happen before these are reached; the
//   origin server name is taken as authenticated.
//
// =============================================================================

use ruma::{
    api::{client::error::ErrorKind, federation},
    RoomId, ServerName, UserId,
};

use crate::{
    service::{rooms::timeline::MembershipEvent, Services},
    Error, Result,
};

/// # `PUT /_matrix/federation/v2/send_join/{roomId}/{userId}`
///
/// Runs the join authorization procedure for a user of the `origin` server
/// against this server's own knowledge, and returns the certified
/// membership event on success.
///
/// Fails with a policy denial when the restriction is authoritatively
/// unsatisfied, and with [`Error::UnableToAuthorize`] when this server
/// cannot decide — the caller is expected to fail over to its next
/// candidate in that case.
pub async fn create_join_event_route(
    services: &Services,
    origin: &ServerName,
    room_id: &RoomId,
    user_id: &UserId,
) -> Result<MembershipEvent> {
    services
        .rooms
        .helpers
        .authorize_remote_join(origin, room_id, user_id)
        .await
}

/// # `GET /_matrix/federation/v1/hierarchy/{roomId}`
///
/// Returns a per-requester summary fragment of a room this server is
/// resident in. `None` means the room must be omitted from the requesting
/// server's response: it is unknown here, or visibility for the requester
/// could not be confirmed.
pub async fn get_hierarchy_route(
    services: &Services,
    origin: &ServerName,
    room_id: &RoomId,
    requesting_user: &UserId,
    suggested_only: bool,
) -> Result<Option<federation::space::get_hierarchy::v1::Response>> {
    if requesting_user.server_name() != origin {
        return Err(Error::BadRequest(
            ErrorKind::forbidden(),
            "User does not belong to the requesting server.",
        ));
    }

    services
        .rooms
        .spaces
        .get_federation_hierarchy(room_id, requesting_user, suggested_only)
        .await
}
