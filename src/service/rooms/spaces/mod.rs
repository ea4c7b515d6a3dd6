// =============================================================================
// Palisade - Spaces Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Space hierarchy summaries and the per-requester visibility filter.
//   Visibility is conservative: a room whose restriction cannot be
//   confirmed satisfied is omitted, and a summary request never triggers
//   join-style federation fan-out — at most one fragment request per
//   unknown child room.
//
// =============================================================================

use std::{
    collections::VecDeque,
    fmt::{Display, Formatter},
    str::FromStr,
    sync::Arc,
};

use futures_util::future::join_all;
use lru_cache::LruCache;
use ruma::{
    api::{
        client::{
            self,
            error::ErrorKind,
            space::{SpaceHierarchyRoomsChunk, SpaceHierarchyRoomsChunkInit},
        },
        federation,
        federation::space::{
            SpaceHierarchyChildSummary, SpaceHierarchyChildSummaryInit, SpaceHierarchyParentSummary,
            SpaceHierarchyParentSummaryInit,
        },
    },
    events::space::child::HierarchySpaceChildEvent,
    serde::Raw,
    space::SpaceRoomJoinRule,
    OwnedRoomId, OwnedServerName, RoomId, UInt, UserId,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{service, service::rooms::restriction::Verdict, Error, Result};

pub struct CachedSpaceHierarchySummary {
    summary: SpaceHierarchyParentSummary,
}

pub enum SummaryAccessibility {
    Accessible(Box<SpaceHierarchyParentSummary>),
    Inaccessible,
}

// Note: perhaps use some better form of token rather than just the room path
#[derive(Debug, PartialEq)]
pub struct PagnationToken {
    /// Path down the hierarchy of the room to start the response at,
    /// excluding the root space.
    pub room_path: Vec<OwnedRoomId>,
    pub limit: UInt,
    pub max_depth: UInt,
    pub suggested_only: bool,
}

impl FromStr for PagnationToken {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut values = value.split('_');

        let mut pag_tok = || {
            let mut rooms = vec![];

            for room in values.next()?.split(',') {
                rooms.push(RoomId::parse(room).ok()?);
            }

            Some(PagnationToken {
                room_path: rooms,
                limit: UInt::from_str(values.next()?).ok()?,
                max_depth: UInt::from_str(values.next()?).ok()?,
                suggested_only: {
                    let slice = values.next()?;

                    if values.next().is_none() {
                        if slice == "true" {
                            true
                        } else if slice == "false" {
                            false
                        } else {
                            None?
                        }
                    } else {
                        None?
                    }
                },
            })
        };

        if let Some(token) = pag_tok() {
            Ok(token)
        } else {
            Err(Error::BadRequest(ErrorKind::InvalidParam, "invalid token"))
        }
    }
}

impl Display for PagnationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.room_path
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(","),
            self.limit,
            self.max_depth,
            self.suggested_only
        )
    }
}

pub struct Service {
    pub globals: Arc<service::globals::Service>,
    pub state_accessor: Arc<service::rooms::state_accessor::Service>,
    pub state_cache: Arc<service::rooms::state_cache::Service>,
    pub restriction: Arc<service::rooms::restriction::Service>,
    pub sending: Arc<service::sending::Service>,

    pub roomid_spacehierarchy_cache: Mutex<LruCache<OwnedRoomId, CachedSpaceHierarchySummary>>,
}

impl Service {
    /// Answers a hierarchy request made by a remote server on behalf of one
    /// of its users.
    ///
    /// Returns `None` when the room is unknown here, or when visibility for
    /// the requester cannot be confirmed — the room is omitted rather than
    /// guessed about permissively.
    #[tracing::instrument(skip(self))]
    pub async fn get_federation_hierarchy(
        &self,
        room_id: &RoomId,
        requesting_user: &UserId,
        suggested_only: bool,
    ) -> Result<Option<federation::space::get_hierarchy::v1::Response>> {
        let room = match self
            .get_summary_and_children_local(&room_id.to_owned(), requesting_user)
            .await?
        {
            Some(SummaryAccessibility::Accessible(room)) => room,
            Some(SummaryAccessibility::Inaccessible) | None => return Ok(None),
        };

        // Each child's visibility decision is independent and read-only, so
        // they are evaluated concurrently.
        let children = get_parent_children_via(&room, suggested_only);
        let summaries = join_all(children.iter().map(|(child, _via)| async move {
            self.get_summary_and_children_local(child, requesting_user)
                .await
        }))
        .await;

        let mut accessible_children = Vec::new();
        let mut inaccessible_children = Vec::new();

        for ((child, _via), summary) in children.iter().zip(summaries) {
            match summary? {
                Some(SummaryAccessibility::Accessible(summary)) => {
                    accessible_children.push(summary_to_child(*summary));
                }
                Some(SummaryAccessibility::Inaccessible) => {
                    inaccessible_children.push(child.clone());
                }
                None => (),
            }
        }

        let mut response = federation::space::get_hierarchy::v1::Response::new(*room);
        response.children = accessible_children;
        response.inaccessible_children = inaccessible_children;
        Ok(Some(response))
    }

    /// Gets the summary of a room using solely local information.
    async fn get_summary_and_children_local(
        &self,
        current_room: &OwnedRoomId,
        user_id: &UserId,
    ) -> Result<Option<SummaryAccessibility>> {
        if let Some(cached) = self
            .roomid_spacehierarchy_cache
            .lock()
            .await
            .get_mut(current_room)
        {
            return Ok(Some(self.accessibility_of(&cached.summary, user_id)?));
        }

        // Without authoritative state for the room there is nothing to
        // summarize here; a resident server has to be asked instead.
        if !self
            .state_cache
            .server_in_room(self.globals.server_name(), current_room)?
        {
            return Ok(None);
        }

        let children_state = self.state_accessor.space_child_events(current_room)?;
        let summary = self.build_room_summary(current_room, children_state)?;

        self.roomid_spacehierarchy_cache.lock().await.insert(
            current_room.clone(),
            CachedSpaceHierarchySummary {
                summary: summary.clone(),
            },
        );

        Ok(Some(self.accessibility_of(&summary, user_id)?))
    }

    /// Gets the summary of a room by asking its via servers, in order.
    async fn get_summary_and_children_federation(
        &self,
        current_room: &OwnedRoomId,
        suggested_only: bool,
        user_id: &UserId,
        via: &[OwnedServerName],
    ) -> Result<Option<SummaryAccessibility>> {
        for server in via {
            if server == self.globals.server_name() {
                continue;
            }

            match self
                .sending
                .space_summary_fragment(server, current_room, user_id, suggested_only)
                .await
            {
                Ok(Some(response)) => {
                    // The resident server has already applied the
                    // visibility filter for this requester.
                    return Ok(Some(SummaryAccessibility::Accessible(Box::new(
                        response.room,
                    ))));
                }
                Ok(None) => {
                    debug!("{server} could not confirm visibility of {current_room}, omitting");
                    return Ok(Some(SummaryAccessibility::Inaccessible));
                }
                Err(e) => {
                    warn!("Could not get summary of {current_room} from {server}: {e}");
                }
            }
        }

        Ok(None)
    }

    /// Gets the summary of a room using either local or remote sources.
    async fn get_summary_and_children_client(
        &self,
        current_room: &OwnedRoomId,
        suggested_only: bool,
        user_id: &UserId,
        via: &[OwnedServerName],
    ) -> Result<Option<SummaryAccessibility>> {
        if self
            .state_cache
            .server_in_room(self.globals.server_name(), current_room)?
        {
            self.get_summary_and_children_local(current_room, user_id)
                .await
        } else {
            self.get_summary_and_children_federation(current_room, suggested_only, user_id, via)
                .await
        }
    }

    fn build_room_summary(
        &self,
        current_room: &RoomId,
        children_state: Vec<Raw<HierarchySpaceChildEvent>>,
    ) -> Result<SpaceHierarchyParentSummary> {
        let join_rule = self.state_accessor.join_rule(current_room)?;
        let allowed_room_ids = self.state_accessor.allowed_room_ids(current_room)?;

        let num_joined_members = self
            .state_cache
            .room_joined_count(current_room)?
            .unwrap_or_else(|| {
                warn!("Room {} has no member count", current_room);
                0
            });

        Ok(SpaceHierarchyParentSummaryInit {
            room_id: current_room.to_owned(),
            world_readable: self.state_accessor.world_readable(current_room)?,
            guest_can_join: self.state_accessor.guest_can_join(current_room)?,
            join_rule,
            children_state,
            allowed_room_ids,
            num_joined_members: num_joined_members
                .try_into()
                .expect("joined count should not be that big"),
        }
        .into())
    }

    fn accessibility_of(
        &self,
        summary: &SpaceHierarchyParentSummary,
        user_id: &UserId,
    ) -> Result<SummaryAccessibility> {
        Ok(
            if self.is_accessible_child(
                &summary.room_id,
                &summary.join_rule,
                user_id,
                &summary.allowed_room_ids,
                summary.world_readable,
            )? {
                SummaryAccessibility::Accessible(Box::new(summary.clone()))
            } else {
                SummaryAccessibility::Inaccessible
            },
        )
    }

    /// Decides whether one room may be disclosed to `user_id`.
    ///
    /// A restricted room is only visible once the restriction is confirmed
    /// satisfied from local knowledge; an undecidable restriction hides the
    /// room. Absence of proof of access is absence of disclosure.
    fn is_accessible_child(
        &self,
        current_room: &RoomId,
        join_rule: &SpaceRoomJoinRule,
        user_id: &UserId,
        allowed_room_ids: &[OwnedRoomId],
        world_readable: bool,
    ) -> Result<bool> {
        if self.state_cache.is_joined(user_id, current_room)?
            || self.state_cache.is_invited(user_id, current_room)?
        {
            return Ok(true);
        }

        if world_readable {
            return Ok(true);
        }

        Ok(match join_rule {
            SpaceRoomJoinRule::Restricted => matches!(
                self.restriction
                    .evaluate_conditions(allowed_room_ids, user_id)?,
                Verdict::Satisfied(_)
            ),
            SpaceRoomJoinRule::Public
            | SpaceRoomJoinRule::Knock
            | SpaceRoomJoinRule::KnockRestricted => true,
            SpaceRoomJoinRule::Invite | SpaceRoomJoinRule::Private => false,
            // Custom join rule
            _ => false,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_client_hierarchy(
        &self,
        sender_user: &UserId,
        room_id: &RoomId,
        limit: usize,
        room_path: Vec<OwnedRoomId>,
        max_depth: usize,
        suggested_only: bool,
    ) -> Result<client::space::get_hierarchy::v1::Response> {
        let mut parents = VecDeque::new();

        // Don't start populating the results if we have to start at a specific room.
        let mut populate_results = room_path.is_empty();

        let mut stack = vec![vec![(
            room_id.to_owned(),
            match room_id.server_name() {
                Some(server_name) => vec![server_name.into()],
                None => vec![],
            },
        )]];

        let mut results = Vec::new();

        while results.len() < limit {
            let Some((current_room, via)) = next_room_to_traverse(&mut stack, &mut parents)
            else {
                break;
            };

            match (
                self.get_summary_and_children_client(
                    &current_room,
                    suggested_only,
                    sender_user,
                    &via,
                )
                .await?,
                current_room == room_id,
            ) {
                (Some(SummaryAccessibility::Accessible(summary)), _) => {
                    let mut children: Vec<(OwnedRoomId, Vec<OwnedServerName>)> =
                        get_parent_children_via(&summary, suggested_only)
                            .into_iter()
                            .filter(|(room, _)| parents.iter().all(|parent| parent != room))
                            .rev()
                            .collect();

                    if populate_results {
                        results.push(summary_to_chunk(*summary.clone()));
                    } else {
                        children = children
                            .into_iter()
                            .rev()
                            .skip_while(|(room, _)| {
                                room_path.get(parents.len()).map_or(false, |path| path != room)
                            })
                            .collect::<Vec<_>>()
                            // skip_while doesn't implement DoubleEndedIterator, which is needed for rev
                            .into_iter()
                            .rev()
                            .collect();

                        if children.is_empty() {
                            return Err(Error::BadRequestString(
                                ErrorKind::InvalidParam,
                                "Room IDs in token were not found.".to_string(),
                            ));
                        }

                        // We have reached the room after where we last left off
                        if parents.len() + 1 == room_path.len() {
                            populate_results = true;
                        }
                    }

                    if !children.is_empty() && parents.len() < max_depth {
                        parents.push_back(current_room.clone());
                        stack.push(children);
                    }
                    // Root room in the space hierarchy, we return an error if this one fails.
                }
                (Some(SummaryAccessibility::Inaccessible), true) => {
                    return Err(Error::BadRequestString(
                        ErrorKind::forbidden(),
                        "The requested room is inaccessible".to_string(),
                    ));
                }
                (None, true) => {
                    return Err(Error::BadRequestString(
                        ErrorKind::forbidden(),
                        "The requested room was not found".to_string(),
                    ));
                }
                // Just ignore other unavailable rooms
                (None | Some(SummaryAccessibility::Inaccessible), false) => (),
            }
        }

        let mut response = client::space::get_hierarchy::v1::Response::new();
        response.rooms = results;
        response.next_batch = if let Some((room, _)) = next_room_to_traverse(&mut stack, &mut parents)
        {
            parents.pop_front();
            parents.push_back(room);

            Some(
                PagnationToken {
                    room_path: parents.into_iter().collect(),
                    limit: UInt::new(limit as u64)
                        .expect("When sent in request it must have been valid UInt"),
                    max_depth: UInt::new(max_depth as u64)
                        .expect("When sent in request it must have been valid UInt"),
                    suggested_only,
                }
                .to_string(),
            )
        } else {
            None
        };
        Ok(response)
    }
}

fn next_room_to_traverse(
    stack: &mut Vec<Vec<(OwnedRoomId, Vec<OwnedServerName>)>>,
    parents: &mut VecDeque<OwnedRoomId>,
) -> Option<(OwnedRoomId, Vec<OwnedServerName>)> {
    while stack.last().map_or(false, |s| s.is_empty()) {
        stack.pop();
        parents.pop_back();
    }

    stack.last_mut().and_then(|s| s.pop())
}

// Here because cannot implement `From` across ruma-federation-api and ruma-client-api types
fn summary_to_chunk(summary: SpaceHierarchyParentSummary) -> SpaceHierarchyRoomsChunk {
    let SpaceHierarchyParentSummary {
        canonical_alias: _,
        name: _,
        topic: _,
        avatar_url: _,
        room_type: _,
        num_joined_members,
        room_id,
        world_readable,
        guest_can_join,
        join_rule,
        children_state,
        ..
    } = summary;

    SpaceHierarchyRoomsChunkInit {
        room_id,
        world_readable,
        guest_can_join,
        join_rule,
        children_state,
        num_joined_members,
    }
    .into()
}

fn summary_to_child(summary: SpaceHierarchyParentSummary) -> SpaceHierarchyChildSummary {
    let SpaceHierarchyParentSummary {
        canonical_alias: _,
        name: _,
        topic: _,
        avatar_url: _,
        room_type: _,
        num_joined_members,
        room_id,
        world_readable,
        guest_can_join,
        join_rule,
        allowed_room_ids,
        ..
    } = summary;

    SpaceHierarchyChildSummaryInit {
        num_joined_members,
        room_id,
        world_readable,
        guest_can_join,
        join_rule,
        allowed_room_ids,
    }
    .into()
}

/// Returns the children of a summary, making use of the children_state field
fn get_parent_children_via(
    parent: &SpaceHierarchyParentSummary,
    suggested_only: bool,
) -> Vec<(OwnedRoomId, Vec<OwnedServerName>)> {
    parent
        .children_state
        .iter()
        .filter_map(|raw_ce| {
            raw_ce.deserialize().map_or(None, |ce| {
                if suggested_only && !ce.content.suggested {
                    None
                } else {
                    Some((ce.state_key, ce.content.via))
                }
            })
        })
        .collect()
}
