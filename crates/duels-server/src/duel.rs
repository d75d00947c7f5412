use crate::{
    app_state::AppState,
    archive::SessionRecord,
    error::ServiceError,
    session_store::{Session, SessionId, SubmissionOutcome},
};
use duels_protocol::{
    events::{
        names, GameOverEvent, InvitationRequestEvent, OpponentSubmissionEvent, StartGameEvent,
        SubmissionRequest,
    },
    model::{Difficulty, TagId, UserId},
};
use std::sync::Arc;
use tokio::time;
use tracing::{debug, info, warn};

impl AppState {
    /// Picks a problem, creates the session and tells both players it started.
    pub async fn start_duel(
        &self,
        players: [UserId; 2],
        difficulties: &[Difficulty],
        tags: &[TagId],
        rated: bool,
    ) -> Result<Session, ServiceError> {
        let problem = self
            .services()
            .catalog
            .pick_problem(difficulties, tags)
            .await?
            .ok_or(ServiceError::NoProblemAvailable)?;

        let session = self
            .services()
            .sessions
            .start_session(players, problem, rated)
            .await?;

        for player in players {
            if let Err(err) = self.services().queue.leave_queue(player).await {
                warn!(user_id = player, err = %err, "queue.leave_failed");
            }
        }

        info!(
            session_id = %session.id,
            player_a = players[0],
            player_b = players[1],
            problem = %session.problem.slug,
            rated,
            "session.started"
        );

        for player in players {
            self.send_start_game(&session, player).await;
        }
        Ok(session)
    }

    async fn send_start_game(&self, session: &Session, player: UserId) -> bool {
        let Some(opponent_id) = session.opponent_of(player) else {
            return false;
        };

        self.notify(
            player,
            names::START_GAME,
            StartGameEvent {
                session_id: session.id,
                problem_url: session.problem.url(),
                problem: session.problem.clone(),
                opponent_id,
                rated: session.rated,
                start_time: session.start_time,
            },
        )
        .await
    }

    pub async fn submit(
        &self,
        user_id: UserId,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, ServiceError> {
        let session = self
            .services()
            .sessions
            .session_for_player(user_id)
            .await?
            .ok_or(ServiceError::NotInGame)?;

        let outcome = self
            .services()
            .sessions
            .add_submission(session.id, user_id, request)
            .await?;

        debug!(
            session_id = %session.id,
            user_id,
            submission_id = outcome.submission.id,
            status = ?outcome.submission.status,
            "session.submission"
        );

        if let Some(opponent_id) = outcome.session.opponent_of(user_id) {
            let event: OpponentSubmissionEvent = outcome.submission.clone();
            self.notify(opponent_id, names::OPPONENT_SUBMISSION, event).await;
        }

        if outcome.completed() {
            self.finish_session(&outcome.session).await;
        }
        Ok(outcome)
    }

    /// Archives a terminal session and sends `game_over` to both players.
    pub async fn finish_session(&self, session: &Session) {
        info!(
            session_id = %session.id,
            status = ?session.status,
            winner = ?session.winner,
            duration_secs = session.duration_secs(),
            submissions_a = session.submissions_for(session.players[0]).count(),
            submissions_b = session.submissions_for(session.players[1]).count(),
            "session.finished"
        );

        if let Err(err) = self
            .services()
            .archive
            .archive(SessionRecord::from(session))
            .await
        {
            warn!(session_id = %session.id, err = %err, "session.archive_failed");
        }

        for player in session.players {
            self.notify(
                player,
                names::GAME_OVER,
                GameOverEvent {
                    session_id: session.id,
                    winner_id: session.winner,
                    status: session.status,
                    duration: session.duration_secs(),
                },
            )
            .await;
        }
    }

    /// Cancels the session unless the player reconnects within the grace period.
    pub fn schedule_abandon_check(self: &Arc<Self>, user_id: UserId, session_id: SessionId) {
        let state = Arc::clone(self);
        let mut shutdown = self.shutdown_signal();
        let grace = self.config().reconnect_grace();
        debug!(
            user_id,
            %session_id,
            grace_secs = grace.as_secs(),
            "session.abandon_check_scheduled"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = time::sleep(grace) => {}
            }
            state.cancel_if_abandoned(user_id, session_id).await;
        });
    }

    pub async fn cancel_if_abandoned(&self, user_id: UserId, session_id: SessionId) -> bool {
        match self.services().presence.is_online(user_id).await {
            Ok(true) => {
                debug!(user_id, %session_id, "session.player_returned");
                return false;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(user_id, %session_id, err = %err, "session.abandon_check_failed");
                return false;
            }
        }

        match self.services().sessions.cancel_session(session_id).await {
            Ok(session) => {
                info!(user_id, %session_id, "session.abandoned");
                self.finish_session(&session).await;
                true
            }
            Err(ServiceError::SessionCompleted | ServiceError::SessionNotFound) => false,
            Err(err) => {
                warn!(user_id, %session_id, err = %err, "session.cancel_failed");
                false
            }
        }
    }

    /// Replays pending invitations and the live duel to a freshly connected user.
    pub async fn resume_user(&self, user_id: UserId) {
        match self.services().invites.pending_invites(user_id).await {
            Ok(invites) => {
                for invite in invites {
                    self.notify(
                        user_id,
                        names::INVITATION_REQUEST,
                        InvitationRequestEvent {
                            inviter_id: invite.inviter_id,
                            match_details: invite.match_details,
                            created_at: invite.created_at,
                        },
                    )
                    .await;
                }
            }
            Err(err) => warn!(user_id, err = %err, "invite.replay_failed"),
        }

        match self.services().sessions.session_for_player(user_id).await {
            Ok(Some(session)) if session.is_live() => {
                info!(user_id, session_id = %session.id, "session.resumed");
                self.send_start_game(&session, user_id).await;
            }
            Ok(_) => {}
            Err(err) => warn!(user_id, err = %err, "session.lookup_failed"),
        }
    }
}
