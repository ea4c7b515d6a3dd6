// =============================================================================
// Palisade - Helpers Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   The join authorization engine: decides whether a join request is
//   allowed under the room's join rule, certifies restricted joins from
//   local knowledge where possible, and escalates to the failover
//   coordinator when the restriction cannot be decided locally. Also hosts
//   the invite and leave flows and the authorization procedure run on
//   behalf of remote servers.
//
// =============================================================================

use std::sync::Arc;

use ruma::{
    api::client::{error::ErrorKind, membership::join_room_by_id},
    events::room::member::MembershipState,
    space::SpaceRoomJoinRule,
    OwnedServerName, OwnedUserId, RoomId, ServerName, UserId,
};
use tracing::{info, warn};

use crate::{
    service,
    service::rooms::{restriction::Verdict, timeline::MembershipEvent},
    Error, Result,
};

pub struct Service {
    pub globals: Arc<service::globals::Service>,
    pub state_accessor: Arc<service::rooms::state_accessor::Service>,
    pub state_cache: Arc<service::rooms::state_cache::Service>,
    pub restriction: Arc<service::rooms::restriction::Service>,
    pub remote_join: Arc<service::rooms::remote_join::Service>,
    pub timeline: Arc<service::rooms::timeline::Service>,
}

impl Service {
    /// Attempts to join a room.
    ///
    /// If the join cannot be authorized locally, the caller-supplied
    /// `servers` are attempted in order over federation. The membership
    /// record is only committed once the full decision has concluded, so
    /// cancelling the request mid-flight leaves no partial state.
    #[tracing::instrument(skip(self, servers))]
    pub async fn join_room_by_id(
        &self,
        sender_user: &UserId,
        room_id: &RoomId,
        servers: &[OwnedServerName],
    ) -> Result<join_room_by_id::v3::Response> {
        // Re-joining is idempotent and always allowed, regardless of the
        // restriction state at the time of the request.
        if self.state_cache.is_joined(sender_user, room_id)? {
            return Ok(join_room_by_id::v3::Response::new(room_id.to_owned()));
        }

        let mutex = self.globals.membership_lock(room_id, sender_user).await;
        let _lock = mutex.lock().await;

        // A racing request may have resolved the join while we waited.
        if self.state_cache.is_joined(sender_user, room_id)? {
            return Ok(join_room_by_id::v3::Response::new(room_id.to_owned()));
        }

        // Ask a remote server if we are not participating in this room.
        if !self
            .state_cache
            .server_in_room(self.globals.server_name(), room_id)?
        {
            if !self.state_accessor.room_exists(room_id)? && servers.is_empty() {
                return Err(Error::BadRequest(ErrorKind::NotFound, "Room not found."));
            }

            info!("Joining {room_id} over federation");
            let room_id = self
                .remote_join
                .join_via_servers(room_id, sender_user, servers)
                .await?;
            return Ok(join_room_by_id::v3::Response::new(room_id));
        }

        info!("We can attempt to join {room_id} locally");

        // An invite always admits, overriding whatever the join rule says.
        if self.state_cache.is_invited(sender_user, room_id)? {
            self.timeline.build_and_append_membership(
                room_id,
                sender_user,
                sender_user,
                MembershipState::Join,
                None,
            )?;
            return Ok(join_room_by_id::v3::Response::new(room_id.to_owned()));
        }

        match self.state_accessor.join_rule(room_id)? {
            SpaceRoomJoinRule::Public => {
                self.timeline.build_and_append_membership(
                    room_id,
                    sender_user,
                    sender_user,
                    MembershipState::Join,
                    None,
                )?;
                Ok(join_room_by_id::v3::Response::new(room_id.to_owned()))
            }
            SpaceRoomJoinRule::Restricted | SpaceRoomJoinRule::KnockRestricted => {
                self.restricted_join(sender_user, room_id, servers).await
            }
            _ => Err(Error::BadRequest(
                ErrorKind::forbidden(),
                "You are not invited to this room.",
            )),
        }
    }

    /// The restricted arm of a local join attempt. Runs with the
    /// membership lock held.
    async fn restricted_join(
        &self,
        sender_user: &UserId,
        room_id: &RoomId,
        servers: &[OwnedServerName],
    ) -> Result<join_room_by_id::v3::Response> {
        match self.restriction.evaluate(room_id, sender_user)? {
            Verdict::Satisfied(reference) => {
                info!("Join restriction satisfied via membership in {reference}");

                if self.local_join_certifier(room_id)?.is_some() {
                    self.timeline.build_and_append_membership(
                        room_id,
                        sender_user,
                        sender_user,
                        MembershipState::Join,
                        Some(self.globals.server_name().to_owned()),
                    )?;
                    return Ok(join_room_by_id::v3::Response::new(room_id.to_owned()));
                }

                // The restriction holds, but no local user may certify it.
                // Like an undecidable restriction, this is a missing-
                // information condition, not a denial.
                info!("No local user can certify the join, escalating to federation");
                self.escalate(sender_user, room_id, servers).await
            }
            Verdict::Unsatisfied => Err(Error::BadRequest(
                ErrorKind::forbidden(),
                "You are not allowed to join this room.",
            )),
            Verdict::Unknown => {
                info!("Join restriction is undecidable locally, escalating to federation");
                self.escalate(sender_user, room_id, servers).await
            }
        }
    }

    async fn escalate(
        &self,
        sender_user: &UserId,
        room_id: &RoomId,
        servers: &[OwnedServerName],
    ) -> Result<join_room_by_id::v3::Response> {
        if !servers
            .iter()
            .any(|server| server != self.globals.server_name())
        {
            return Err(Error::BadServerResponse(
                "No server available to assist in joining.",
            ));
        }

        let room_id = self
            .remote_join
            .join_via_servers(room_id, sender_user, servers)
            .await?;
        Ok(join_room_by_id::v3::Response::new(room_id))
    }

    /// Runs the join authorization procedure on behalf of a remote server,
    /// against this server's own knowledge. On success the certified event
    /// is committed locally and returned to the caller.
    #[tracing::instrument(skip(self))]
    pub async fn authorize_remote_join(
        &self,
        origin: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<MembershipEvent> {
        if user_id.server_name() != origin {
            return Err(Error::BadRequest(
                ErrorKind::forbidden(),
                "User does not belong to the requesting server.",
            ));
        }

        if !self
            .state_cache
            .server_in_room(self.globals.server_name(), room_id)?
        {
            return Err(Error::UnableToAuthorize(
                "We are not participating in this room.",
            ));
        }

        let mutex = self.globals.membership_lock(room_id, user_id).await;
        let _lock = mutex.lock().await;

        // A redundant request for an already joined user returns the
        // existing record instead of minting a new one.
        if let Some(existing) = self.timeline.membership_event(room_id, user_id)? {
            if existing.membership == MembershipState::Join {
                return Ok(existing);
            }
        }

        if self.state_cache.is_invited(user_id, room_id)? {
            let event_id = self.timeline.build_and_append_membership(
                room_id,
                user_id,
                user_id,
                MembershipState::Join,
                None,
            )?;
            return self.committed_event(room_id, user_id, &event_id);
        }

        match self.state_accessor.join_rule(room_id)? {
            SpaceRoomJoinRule::Public => {
                let event_id = self.timeline.build_and_append_membership(
                    room_id,
                    user_id,
                    user_id,
                    MembershipState::Join,
                    None,
                )?;
                self.committed_event(room_id, user_id, &event_id)
            }
            SpaceRoomJoinRule::Restricted | SpaceRoomJoinRule::KnockRestricted => {
                match self.restriction.evaluate(room_id, user_id)? {
                    Verdict::Satisfied(reference) => {
                        if self.local_join_certifier(room_id)?.is_none() {
                            return Err(Error::UnableToAuthorize(
                                "No local user may certify the join.",
                            ));
                        }

                        info!(
                            "Certifying join of {user_id} for {origin} via membership in {reference}"
                        );
                        let event_id = self.timeline.build_and_append_membership(
                            room_id,
                            user_id,
                            user_id,
                            MembershipState::Join,
                            Some(self.globals.server_name().to_owned()),
                        )?;
                        self.committed_event(room_id, user_id, &event_id)
                    }
                    Verdict::Unsatisfied => Err(Error::BadRequest(
                        ErrorKind::forbidden(),
                        "You are not allowed to join this room.",
                    )),
                    Verdict::Unknown => Err(Error::UnableToAuthorize(
                        "Unable to determine whether the join restriction is satisfied.",
                    )),
                }
            }
            _ => Err(Error::BadRequest(
                ErrorKind::forbidden(),
                "You are not invited to this room.",
            )),
        }
    }

    /// Tries to send an invite event into the room.
    #[tracing::instrument(skip(self))]
    pub async fn invite_helper(
        &self,
        sender_user: &UserId,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<()> {
        if !self.state_cache.is_joined(sender_user, room_id)? {
            return Err(Error::BadRequest(
                ErrorKind::forbidden(),
                "You are not in this room.",
            ));
        }

        if !self.state_accessor.user_can_invite(room_id, sender_user)? {
            return Err(Error::BadRequest(
                ErrorKind::forbidden(),
                "You don't have permission to invite users.",
            ));
        }

        let mutex = self.globals.membership_lock(room_id, user_id).await;
        let _lock = mutex.lock().await;

        self.timeline.build_and_append_membership(
            room_id,
            sender_user,
            user_id,
            MembershipState::Invite,
            None,
        )?;

        Ok(())
    }

    /// Tries to leave a room. This always works if the user is currently
    /// joined, invited or knocking; leaving a room one is not in is a
    /// no-op.
    #[tracing::instrument(skip(self))]
    pub async fn leave_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<()> {
        let mutex = self.globals.membership_lock(room_id, user_id).await;
        let _lock = mutex.lock().await;

        match self.state_cache.lookup(room_id, user_id)?.state {
            Some(MembershipState::Join)
            | Some(MembershipState::Invite)
            | Some(MembershipState::Knock) => {
                self.timeline.build_and_append_membership(
                    room_id,
                    user_id,
                    user_id,
                    MembershipState::Leave,
                    None,
                )?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Picks a local member of the room with the power to invite; the
    /// presence of such a member is what entitles this server to certify a
    /// restricted join.
    fn local_join_certifier(&self, room_id: &RoomId) -> Result<Option<OwnedUserId>> {
        for user in self.state_cache.room_members(room_id)? {
            if user.server_name() == self.globals.server_name()
                && self
                    .state_accessor
                    .user_can_invite(room_id, &user)
                    .unwrap_or(false)
            {
                return Ok(Some(user));
            }
        }

        Ok(None)
    }

    fn committed_event(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        event_id: &ruma::EventId,
    ) -> Result<MembershipEvent> {
        let event = self
            .timeline
            .membership_event(room_id, user_id)?
            .ok_or_else(|| Error::bad_database("Committed membership event not found."))?;

        if event.event_id != event_id {
            warn!("Membership record advanced while answering {room_id} for {user_id}");
        }

        Ok(event)
    }
}
