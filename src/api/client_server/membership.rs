// =============================================================================
// Palisade - Membership Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Client-facing membership endpoints. Authentication and the HTTP layer
//   are external; handlers take the already authenticated user directly.
//
// =============================================================================

use ruma::{
    api::client::{
        error::ErrorKind,
        membership::{invite_user, join_room_by_id, join_room_by_id_or_alias, leave_room},
    },
    OwnedRoomId, UserId,
};

use crate::{service::Services, Error, Result};

/// # `POST /_matrix/client/r0/rooms/{roomId}/join`
///
/// Tries to join the sender user into a room.
///
/// - If the server knows about this room: creates the join event and does auth rules locally
/// - If the server does not know about the room: asks other servers over federation
pub async fn join_room_by_id_route(
    services: &Services,
    sender_user: &UserId,
    body: join_room_by_id::v3::Request,
) -> Result<join_room_by_id::v3::Response> {
    services
        .rooms
        .helpers
        .join_room_by_id(sender_user, &body.room_id, &[])
        .await
}

/// # `POST /_matrix/client/r0/join/{roomIdOrAlias}`
///
/// Tries to join the sender user into a room.
///
/// The `via` list is the caller's declared server preference for a
/// federated join; it is honored in the given order.
pub async fn join_room_by_id_or_alias_route(
    services: &Services,
    sender_user: &UserId,
    body: join_room_by_id_or_alias::v3::Request,
) -> Result<join_room_by_id_or_alias::v3::Response> {
    let room_id = match OwnedRoomId::try_from(body.room_id_or_alias) {
        Ok(room_id) => room_id,
        Err(room_alias) => services
            .rooms
            .state_accessor
            .resolve_alias(&room_alias)?
            .ok_or(Error::BadRequest(
                ErrorKind::NotFound,
                "Room alias not found.",
            ))?,
    };

    let join_room_response = services
        .rooms
        .helpers
        .join_room_by_id(sender_user, &room_id, &body.via)
        .await?;

    Ok(join_room_by_id_or_alias::v3::Response::new(
        join_room_response.room_id,
    ))
}

/// # `POST /_matrix/client/r0/rooms/{roomId}/invite`
///
/// Tries to send an invite event into the room.
pub async fn invite_user_route(
    services: &Services,
    sender_user: &UserId,
    body: invite_user::v3::Request,
) -> Result<invite_user::v3::Response> {
    if let invite_user::v3::InvitationRecipient::UserId { user_id } = &body.recipient {
        services
            .rooms
            .helpers
            .invite_helper(sender_user, user_id, &body.room_id)
            .await?;
        Ok(invite_user::v3::Response::new())
    } else {
        Err(Error::BadRequest(ErrorKind::NotFound, "User not found."))
    }
}

/// # `POST /_matrix/client/r0/rooms/{roomId}/leave`
///
/// Tries to leave the sender user from a room.
///
/// - This should always work if the user is currently joined.
pub async fn leave_room_route(
    services: &Services,
    sender_user: &UserId,
    body: leave_room::v3::Request,
) -> Result<leave_room::v3::Response> {
    services
        .rooms
        .helpers
        .leave_room(sender_user, &body.room_id)
        .await?;

    Ok(leave_room::v3::Response::new())
}
