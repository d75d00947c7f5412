use crate::{
    app_state::AppState,
    error::ServiceError,
    matchmaking::{MatchedPair, QueueEntry},
    session_store::Session,
};
use duels_protocol::{
    events::{
        names, EnterQueueRequest, InvitationCanceledEvent, InvitationDeclinedEvent,
        InvitationRequestEvent, SendInvitationRequest,
    },
    model::UserId,
};
use std::time::Instant;
use tracing::{debug, info, warn};

impl AppState {
    pub async fn enter_queue(
        &self,
        user_id: UserId,
        request: EnterQueueRequest,
    ) -> Result<(), ServiceError> {
        self.ensure_not_in_game(user_id).await?;

        let entry = QueueEntry::new(
            user_id,
            request.difficulties,
            request.tags,
            request.force_match,
            Instant::now(),
        );
        let tags = entry.tags.len();
        self.services().queue.add_player(entry).await?;

        info!(user_id, tags, force_match = request.force_match, "queue.entered");
        Ok(())
    }

    pub async fn leave_queue(&self, user_id: UserId) -> Result<bool, ServiceError> {
        let removed = self.services().queue.leave_queue(user_id).await?;
        if removed {
            info!(user_id, "queue.left");
        }
        Ok(removed)
    }

    /// One matchmaking pass. Pairs whose duel cannot start go back in the queue.
    pub async fn run_match_sweep(&self, now: Instant) -> usize {
        let pairs = match self
            .services()
            .queue
            .take_matches(now, self.config().force_match_wait())
            .await
        {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(err = %err, "queue.sweep_failed");
                return 0;
            }
        };

        let mut started = 0;
        for pair in pairs {
            if self.start_matched_pair(pair).await {
                started += 1;
            }
        }
        started
    }

    async fn start_matched_pair(&self, pair: MatchedPair) -> bool {
        let players = [pair.first.user_id, pair.second.user_id];
        let (difficulties, tags) = pair.problem_filter();

        match self.start_duel(players, &difficulties, &tags, false).await {
            Ok(session) => {
                info!(
                    session_id = %session.id,
                    player_a = players[0],
                    player_b = players[1],
                    "queue.matched"
                );
                true
            }
            Err(err) => {
                warn!(
                    player_a = players[0],
                    player_b = players[1],
                    err = %err,
                    "queue.match_start_failed"
                );
                self.requeue_survivors(pair).await;
                false
            }
        }
    }

    async fn requeue_survivors(&self, pair: MatchedPair) {
        let mut keep = Vec::with_capacity(2);
        for entry in pair.into_entries() {
            let online = self
                .services()
                .presence
                .is_online(entry.user_id)
                .await
                .unwrap_or(false);
            if online && self.ensure_not_in_game(entry.user_id).await.is_ok() {
                keep.push(entry);
            }
        }

        if let Err(err) = self.services().queue.requeue(keep).await {
            warn!(err = %err, "queue.requeue_failed");
        }
    }

    pub async fn send_invitation(
        &self,
        inviter_id: UserId,
        request: SendInvitationRequest,
    ) -> Result<(), ServiceError> {
        let invitee_id = request.invitee_id;
        if invitee_id == inviter_id {
            return Err(ServiceError::InvalidRequest("cannot invite yourself"));
        }
        self.ensure_not_in_game(inviter_id).await?;

        if !self.services().presence.is_online(invitee_id).await? {
            return Err(ServiceError::UserOffline);
        }

        let created = self
            .services()
            .invites
            .create_invite(inviter_id, invitee_id, request.match_details)
            .await?;
        if !created {
            return Err(ServiceError::InviteExists);
        }

        let invite = self
            .services()
            .invites
            .invite_details(inviter_id)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;

        info!(inviter_id, invitee_id, "invite.created");
        self.notify(
            invitee_id,
            names::INVITATION_REQUEST,
            InvitationRequestEvent {
                inviter_id,
                match_details: invite.match_details,
                created_at: invite.created_at,
            },
        )
        .await;
        Ok(())
    }

    /// Consumes the invite, then starts the duel if the inviter is still around.
    pub async fn accept_invitation(
        &self,
        invitee_id: UserId,
        inviter_id: UserId,
    ) -> Result<Session, ServiceError> {
        self.ensure_not_in_game(invitee_id).await?;

        let invite = self
            .services()
            .invites
            .accept_invite(inviter_id, invitee_id)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;

        if !self.services().presence.is_online(inviter_id).await? {
            info!(inviter_id, invitee_id, "invite.inviter_gone");
            return Err(ServiceError::InviterUnavailable);
        }

        let details = invite.match_details;
        let session = self
            .start_duel(
                [inviter_id, invitee_id],
                &details.difficulties,
                &details.tags,
                details.is_rated,
            )
            .await
            .map_err(|err| match err {
                ServiceError::AlreadyInGame => ServiceError::InviterUnavailable,
                other => other,
            })?;

        info!(inviter_id, invitee_id, session_id = %session.id, "invite.accepted");
        Ok(session)
    }

    /// A decline or cancel racing expiry or another resolution is a no-op.
    pub async fn decline_invitation(
        &self,
        invitee_id: UserId,
        inviter_id: UserId,
    ) -> Result<(), ServiceError> {
        let declined = self
            .services()
            .invites
            .decline_invite(inviter_id, invitee_id)
            .await?;
        if declined.is_none() {
            debug!(inviter_id, invitee_id, "invite.already_resolved");
            return Ok(());
        }

        info!(inviter_id, invitee_id, "invite.declined");
        self.notify(
            inviter_id,
            names::INVITATION_DECLINED,
            InvitationDeclinedEvent { invitee_id },
        )
        .await;
        Ok(())
    }

    pub async fn cancel_invitation(&self, inviter_id: UserId) -> Result<(), ServiceError> {
        let Some(invite) = self.services().invites.cancel_invite(inviter_id).await? else {
            debug!(inviter_id, "invite.already_resolved");
            return Ok(());
        };

        info!(inviter_id, invitee_id = invite.invitee_id, "invite.canceled");
        self.notify(
            invite.invitee_id,
            names::INVITATION_CANCELED,
            InvitationCanceledEvent { inviter_id },
        )
        .await;
        Ok(())
    }

    pub(crate) async fn ensure_not_in_game(&self, user_id: UserId) -> Result<(), ServiceError> {
        let live = self
            .services()
            .sessions
            .session_for_player(user_id)
            .await?
            .is_some_and(|session| session.is_live());
        if live {
            debug!(user_id, "session.already_in_game");
            return Err(ServiceError::AlreadyInGame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        app_state::{
            tests::{frame_of_type, test_config, test_services},
            AppState,
        },
        error::ServiceError,
    };
    use duels_protocol::{
        events::{names, EnterQueueRequest, SendInvitationRequest},
        model::{Difficulty, MatchDetails},
    };
    use std::time::{Duration, Instant};

    fn invitation(invitee_id: i64) -> SendInvitationRequest {
        SendInvitationRequest {
            invitee_id,
            match_details: MatchDetails {
                is_rated: true,
                difficulties: vec![Difficulty::Medium],
                tags: vec![1],
            },
        }
    }

    fn queue_request(tags: Vec<i32>, force_match: bool) -> EnterQueueRequest {
        EnterQueueRequest {
            difficulties: vec![Difficulty::Easy],
            tags,
            force_match,
        }
    }

    #[tokio::test]
    async fn accepted_invite_starts_same_session_for_both() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::start(config, services).await;
        let (_a, mut a_rx) = state.connect(1).await.expect("connect a");
        let (_b, mut b_rx) = state.connect(2).await.expect("connect b");

        state.send_invitation(1, invitation(2)).await.expect("invite");
        let request = frame_of_type(&mut b_rx.outbound_rx, names::INVITATION_REQUEST).await;
        assert_eq!(request["payload"]["inviterID"], 1);
        assert_eq!(request["payload"]["matchDetails"]["isRated"], true);

        let session = state.accept_invitation(2, 1).await.expect("accept");
        assert!(session.rated);

        let a_start = frame_of_type(&mut a_rx.outbound_rx, names::START_GAME).await;
        let b_start = frame_of_type(&mut b_rx.outbound_rx, names::START_GAME).await;
        assert_eq!(a_start["payload"]["sessionID"], b_start["payload"]["sessionID"]);
        assert_eq!(a_start["payload"]["opponentID"], 2);
        assert_eq!(b_start["payload"]["opponentID"], 1);

        assert_eq!(
            state.accept_invitation(2, 1).await.err(),
            Some(ServiceError::AlreadyInGame)
        );
        state.shutdown().await;
    }

    #[tokio::test]
    async fn accept_after_inviter_left_is_aborted() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::start(config, services).await;
        let (a_conn, _a_rx) = state.connect(1).await.expect("connect a");
        let (_b, _b_rx) = state.connect(2).await.expect("connect b");

        state.send_invitation(1, invitation(2)).await.expect("invite");
        state.disconnect(a_conn, 1).await;

        assert_eq!(
            state.accept_invitation(2, 1).await.err(),
            Some(ServiceError::InviterUnavailable)
        );
        assert_eq!(state.services().sessions.session_for_player(2).await, Ok(None));
        assert_eq!(
            state.accept_invitation(2, 1).await.err(),
            Some(ServiceError::InviteNotFound)
        );
        state.shutdown().await;
    }

    #[tokio::test]
    async fn invite_rules() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::start(config, services).await;
        let (_a, _a_rx) = state.connect(1).await.expect("connect a");
        let (_b, mut b_rx) = state.connect(2).await.expect("connect b");
        let (_c, _c_rx) = state.connect(3).await.expect("connect c");

        assert!(matches!(
            state.send_invitation(1, invitation(1)).await,
            Err(ServiceError::InvalidRequest(_))
        ));
        assert_eq!(
            state.send_invitation(1, invitation(99)).await,
            Err(ServiceError::UserOffline)
        );

        state.send_invitation(1, invitation(2)).await.expect("first invite");
        assert_eq!(
            state.send_invitation(1, invitation(3)).await,
            Err(ServiceError::InviteExists)
        );

        state.cancel_invitation(1).await.expect("cancel");
        let canceled = frame_of_type(&mut b_rx.outbound_rx, names::INVITATION_CANCELED).await;
        assert_eq!(canceled["payload"]["inviterID"], 1);
        assert_eq!(state.cancel_invitation(1).await, Ok(()));
        state.send_invitation(1, invitation(3)).await.expect("invite after cancel");
        state.shutdown().await;
    }

    #[tokio::test]
    async fn decline_notifies_inviter() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::start(config, services).await;
        let (_a, mut a_rx) = state.connect(1).await.expect("connect a");
        let (_b, _b_rx) = state.connect(2).await.expect("connect b");

        state.send_invitation(1, invitation(2)).await.expect("invite");
        state.decline_invitation(2, 1).await.expect("decline");

        let declined = frame_of_type(&mut a_rx.outbound_rx, names::INVITATION_DECLINED).await;
        assert_eq!(declined["payload"]["inviteeID"], 2);
        assert_eq!(state.decline_invitation(2, 1).await, Ok(()));
        assert_eq!(
            state.accept_invitation(2, 1).await.err(),
            Some(ServiceError::InviteNotFound)
        );
        state.shutdown().await;
    }

    #[tokio::test]
    async fn sweep_matches_overlapping_tags() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::new(config, services);
        state.connect(1).await.expect("connect a");
        state.connect(2).await.expect("connect b");

        state
            .enter_queue(1, queue_request(vec![1, 2], false))
            .await
            .expect("a enters");
        state
            .enter_queue(2, queue_request(vec![2, 3], false))
            .await
            .expect("b enters");

        assert_eq!(state.run_match_sweep(Instant::now()).await, 1);
        let session = state
            .services()
            .sessions
            .session_for_player(1)
            .await
            .expect("lookup")
            .expect("session started");
        assert!(session.has_player(2));
        assert!(!session.rated);

        assert_eq!(
            state.enter_queue(1, queue_request(vec![1], false)).await,
            Err(ServiceError::AlreadyInGame)
        );
    }

    #[tokio::test]
    async fn sweep_forces_disjoint_pair_after_wait_bound() {
        let config = test_config();
        let wait = config.force_match_wait();
        let (services, _) = test_services(&config);
        let state = AppState::new(config, services);
        state.connect(1).await.expect("connect a");
        state.connect(2).await.expect("connect b");

        state
            .enter_queue(1, queue_request(vec![4], true))
            .await
            .expect("a enters");
        state
            .enter_queue(2, queue_request(vec![5], true))
            .await
            .expect("b enters");

        assert_eq!(state.run_match_sweep(Instant::now()).await, 0);
        assert_eq!(
            state
                .run_match_sweep(Instant::now() + wait + Duration::from_millis(1))
                .await,
            1
        );
        assert_eq!(state.services().queue.contains(1).await, Ok(false));
    }
}
