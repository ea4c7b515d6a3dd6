// =============================================================================
// Palisade - Space Hierarchy Integration Tests
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Visibility filtering for hierarchical room summaries, locally and when
//   the disclosing server has to ask a resident server for a fragment.
//
// =============================================================================

mod common;

use common::{add_space_child, create_restricted_room, create_space, Federation, TestServer};
use palisade::api;
use ruma::{api::client::space::get_hierarchy, room_id, user_id, OwnedRoomId, RoomId, UserId, UInt};

fn space() -> &'static RoomId { room_id!("!space:hs1") }
fn room() -> &'static RoomId { room_id!("!room:hs1") }
fn alice() -> &'static UserId { user_id!("@alice:hs1") }
fn bob() -> &'static UserId { user_id!("@bob:hs1") }

async fn assert_summary(server: &TestServer, user: &UserId, space: &RoomId, expected: &[&RoomId]) {
    let mut rooms = server.hierarchy(user, space).await.expect("summary succeeds");
    let mut expected: Vec<OwnedRoomId> = expected.iter().map(|r| (*r).to_owned()).collect();
    rooms.sort();
    expected.sort();
    assert_eq!(rooms, expected);
}

// The user should be unable to see the restricted room in the space summary
// unless they are a member of the space.
#[tokio::test]
async fn restricted_child_is_hidden_from_non_members() {
    let fed = Federation::new();
    let hs1 = fed.add_server("hs1");

    create_space(&hs1, space(), alice());
    create_restricted_room(&hs1, room(), alice(), space(), "hs1");
    add_space_child(&hs1, alice(), space(), room(), "hs1");

    // Querying the space returns only the space, as the room is restricted.
    assert_summary(&hs1, bob(), space(), &[space()]).await;

    // The member who satisfies the restriction sees the room.
    assert_summary(&hs1, alice(), space(), &[space(), room()]).await;

    // Join the space, and now the restricted room appears.
    hs1.join(&fed, bob(), space(), &[&hs1]).await.unwrap();
    assert_summary(&hs1, bob(), space(), &[space(), room()]).await;
}

// The space and the restricted room live on different homeservers: while
// generating the summary, hs1 has to ask hs2 for the room fragment, and hs2
// may not know enough about the requester to disclose it.
#[tokio::test]
async fn federated_summary_omits_rooms_the_resident_cannot_vouch_for() {
    let fed = Federation::new();
    let hs1 = fed.add_server("hs1");
    let hs2 = fed.add_server("hs2");
    let charlie = user_id!("@charlie:hs2");
    let room = room_id!("!room:hs2");

    create_space(&hs1, space(), alice());
    create_restricted_room(&hs2, room, charlie, space(), "hs1");
    add_space_child(&hs1, alice(), space(), room, "hs2");

    // Although alice is in the space and could access the room, hs2 does
    // not know that yet — it must omit the room rather than guess.
    assert_summary(&hs1, alice(), space(), &[space()]).await;
    assert_summary(&hs1, bob(), space(), &[space()]).await;

    // Once charlie joins the space, hs2 tracks it and can vouch for alice.
    hs2.join(&fed, charlie, space(), &[&hs1]).await.unwrap();

    assert_summary(&hs1, alice(), space(), &[space(), room]).await;
    // Bob is still not in the space, so the room stays hidden for him.
    assert_summary(&hs1, bob(), space(), &[space()]).await;
}

#[tokio::test]
async fn hierarchy_walks_are_cycle_proof_and_depth_bounded() {
    let fed = Federation::new();
    let hs1 = fed.add_server("hs1");
    let nested = room_id!("!nested:hs1");

    create_space(&hs1, space(), alice());
    create_space(&hs1, nested, alice());
    add_space_child(&hs1, alice(), space(), nested, "hs1");
    // A cycle back to the parent space.
    add_space_child(&hs1, alice(), nested, space(), "hs1");
    assert_summary(&hs1, alice(), space(), &[space(), nested]).await;
}

#[tokio::test]
async fn pagination_covers_every_child_exactly_once() {
    let fed = Federation::new();
    let hs1 = fed.add_server("hs1");
    let children = [
        room_id!("!one:hs1"),
        room_id!("!two:hs1"),
        room_id!("!three:hs1"),
    ];

    create_space(&hs1, space(), alice());
    for child in children {
        hs1.db.create_room(child, alice());
        add_space_child(&hs1, alice(), space(), child, "hs1");
    }

    let mut seen: Vec<OwnedRoomId> = Vec::new();
    let mut from: Option<String> = None;

    for _ in 0..4 {
        let mut request = get_hierarchy::v1::Request::new(space().to_owned());
        request.limit = Some(UInt::from(2_u32));
        request.from = from.clone();

        let response = api::client_server::get_hierarchy_route(&hs1.services, alice(), request)
            .await
            .expect("summary page succeeds");

        for chunk in &response.rooms {
            assert!(
                !seen.contains(&chunk.room_id),
                "{} listed twice",
                chunk.room_id
            );
            seen.push(chunk.room_id.clone());
        }

        from = response.next_batch;
        if from.is_none() {
            break;
        }
    }

    assert!(from.is_none(), "pagination did not terminate");

    let mut expected: Vec<OwnedRoomId> = children.iter().map(|r| (*r).to_owned()).collect();
    expected.push(space().to_owned());
    expected.sort();
    seen.sort();
    assert_eq!(seen, expected);
}
