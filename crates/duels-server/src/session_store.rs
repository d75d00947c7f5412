use crate::error::{ServiceError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duels_protocol::{
    events::SubmissionRequest,
    model::{Problem, SessionStatus, Submission, UserId},
};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub players: [UserId; 2],
    pub problem: Problem,
    pub rated: bool,
    pub submissions: Vec<Submission>,
    pub status: SessionStatus,
    pub winner: Option<UserId>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    ended_at: Option<Instant>,
}

impl Session {
    pub fn has_player(&self, user_id: UserId) -> bool {
        self.players.contains(&user_id)
    }

    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        match self.players {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn submissions_for(&self, player_id: UserId) -> impl Iterator<Item = &Submission> {
        self.submissions
            .iter()
            .filter(move |submission| submission.player_id == player_id)
    }

    /// Whole seconds from start to end, or to now while still running.
    pub fn duration_secs(&self) -> i64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_seconds().max(0)
    }

    fn finish(&mut self, status: SessionStatus, winner: Option<UserId>, now: Instant) {
        self.status = status;
        self.winner = winner;
        self.end_time = Some(Utc::now());
        self.ended_at = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub submission: Submission,
    pub session: Session,
}

impl SubmissionOutcome {
    pub fn completed(&self) -> bool {
        self.session.status == SessionStatus::Completed
    }
}

/// Authoritative duel state and submission ledgers.
#[async_trait]
pub trait Sessions: Send + Sync {
    /// Fails with `AlreadyInGame` if either player is bound to a live session.
    async fn start_session(
        &self,
        players: [UserId; 2],
        problem: Problem,
        rated: bool,
    ) -> Result<Session, ServiceError>;

    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError>;

    /// The session the player was last bound to, live or within its grace period.
    async fn session_for_player(&self, user_id: UserId) -> Result<Option<Session>, StoreError>;

    /// Appends to the ledger; the first `Accepted` submission completes the session.
    async fn add_submission(
        &self,
        session_id: SessionId,
        player_id: UserId,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, ServiceError>;

    async fn cancel_session(&self, session_id: SessionId) -> Result<Session, ServiceError>;

    async fn prune_expired(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct SessionTables {
    by_id: HashMap<SessionId, Session>,
    by_player: HashMap<UserId, SessionId>,
}

impl SessionTables {
    fn live_session_of(&self, user_id: UserId) -> Option<&Session> {
        self.by_player
            .get(&user_id)
            .and_then(|session_id| self.by_id.get(session_id))
            .filter(|session| session.is_live())
    }
}

#[derive(Debug)]
pub struct SessionStore {
    grace: Duration,
    tables: Mutex<SessionTables>,
}

impl SessionStore {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            tables: Mutex::new(SessionTables::default()),
        }
    }

    pub async fn add_submission_at(
        &self,
        session_id: SessionId,
        player_id: UserId,
        request: SubmissionRequest,
        now: Instant,
    ) -> Result<SubmissionOutcome, ServiceError> {
        let mut tables = self.tables.lock().await;
        let session = tables
            .by_id
            .get_mut(&session_id)
            .ok_or(ServiceError::SessionNotFound)?;

        if !session.has_player(player_id) {
            return Err(ServiceError::NotParticipant);
        }
        if !session.is_live() {
            return Err(ServiceError::SessionCompleted);
        }

        let submission = Submission {
            id: session.submissions.len() as u64 + 1,
            player_id,
            passed_test_cases: request.passed_test_cases,
            total_test_cases: request.total_test_cases,
            status: request.status,
            runtime: request.runtime,
            memory: request.memory,
            language: request.language,
            time: request.time.unwrap_or_else(Utc::now),
        };
        session.submissions.push(submission.clone());

        if submission.status.is_accepted() {
            session.finish(SessionStatus::Completed, Some(player_id), now);
        }

        Ok(SubmissionOutcome {
            submission,
            session: session.clone(),
        })
    }

    pub async fn cancel_session_at(
        &self,
        session_id: SessionId,
        now: Instant,
    ) -> Result<Session, ServiceError> {
        let mut tables = self.tables.lock().await;
        let session = tables
            .by_id
            .get_mut(&session_id)
            .ok_or(ServiceError::SessionNotFound)?;

        if !session.is_live() {
            return Err(ServiceError::SessionCompleted);
        }

        session.finish(SessionStatus::Canceled, None, now);
        Ok(session.clone())
    }

    pub async fn prune_expired_at(&self, now: Instant) -> usize {
        let mut tables = self.tables.lock().await;
        let grace = self.grace;
        let before = tables.by_id.len();
        tables.by_id.retain(|_, session| match session.ended_at {
            Some(ended_at) => now.saturating_duration_since(ended_at) < grace,
            None => true,
        });

        let SessionTables { by_id, by_player } = &mut *tables;
        by_player.retain(|_, session_id| by_id.contains_key(session_id));

        before - by_id.len()
    }
}

#[async_trait]
impl Sessions for SessionStore {
    async fn start_session(
        &self,
        players: [UserId; 2],
        problem: Problem,
        rated: bool,
    ) -> Result<Session, ServiceError> {
        if players[0] == players[1] {
            return Err(ServiceError::InvalidRequest("a duel needs two distinct players"));
        }

        let mut tables = self.tables.lock().await;
        if players
            .iter()
            .any(|player| tables.live_session_of(*player).is_some())
        {
            return Err(ServiceError::AlreadyInGame);
        }

        let session = Session {
            id: Uuid::new_v4(),
            players,
            problem,
            rated,
            submissions: Vec::new(),
            status: SessionStatus::InProgress,
            winner: None,
            start_time: Utc::now(),
            end_time: None,
            ended_at: None,
        };

        for player in players {
            tables.by_player.insert(player, session.id);
        }
        tables.by_id.insert(session.id, session.clone());

        Ok(session)
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.tables.lock().await.by_id.get(&session_id).cloned())
    }

    async fn session_for_player(&self, user_id: UserId) -> Result<Option<Session>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .by_player
            .get(&user_id)
            .and_then(|session_id| tables.by_id.get(session_id))
            .cloned())
    }

    async fn add_submission(
        &self,
        session_id: SessionId,
        player_id: UserId,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, ServiceError> {
        self.add_submission_at(session_id, player_id, request, Instant::now())
            .await
    }

    async fn cancel_session(&self, session_id: SessionId) -> Result<Session, ServiceError> {
        self.cancel_session_at(session_id, Instant::now()).await
    }

    async fn prune_expired(&self) -> Result<usize, StoreError> {
        Ok(self.prune_expired_at(Instant::now()).await)
    }
}
