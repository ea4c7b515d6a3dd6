// =============================================================================
// Palisade - Space Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::str::FromStr;

use ruma::{api::client::error::ErrorKind, api::client::space::get_hierarchy, UInt, UserId};

use crate::{
    service::{rooms::spaces::PagnationToken, Services},
    Error, Result,
};

/// # `GET /_matrix/client/v1/rooms/{room_id}/hierarchy`
///
/// Paginates over the space tree in a depth-first manner to locate child
/// rooms of a given space. Rooms the sender may not see are filtered out of
/// the response.
pub async fn get_hierarchy_route(
    services: &Services,
    sender_user: &UserId,
    body: get_hierarchy::v1::Request,
) -> Result<get_hierarchy::v1::Response> {
    let limit = body
        .limit
        .unwrap_or_else(|| UInt::from(10_u32))
        .min(UInt::try_from(services.globals.config.hierarchy_limit).unwrap_or(UInt::MAX));

    let max_depth = body
        .max_depth
        .unwrap_or_else(|| UInt::from(3_u32))
        .min(UInt::try_from(services.globals.config.hierarchy_max_depth).unwrap_or(UInt::MAX));

    let room_path = match &body.from {
        Some(from) => {
            let token = PagnationToken::from_str(from)?;
            if token.suggested_only != body.suggested_only || token.max_depth != max_depth {
                return Err(Error::BadRequest(
                    ErrorKind::InvalidParam,
                    "suggested_only and max_depth cannot change on paginated requests",
                ));
            }
            token.room_path
        }
        None => Vec::new(),
    };

    services
        .rooms
        .spaces
        .get_client_hierarchy(
            sender_user,
            &body.room_id,
            u64::from(limit) as usize,
            room_path,
            u64::from(max_depth) as usize,
            body.suggested_only,
        )
        .await
}
