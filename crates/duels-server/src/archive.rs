use crate::{error::StoreError, session_store::Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duels_protocol::model::{SessionStatus, Submission, UserId};
use tracing::info;
use uuid::Uuid;

/// Final state of a duel, handed to match history once it becomes terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub players: [UserId; 2],
    pub problem_id: i64,
    pub rated: bool,
    pub status: SessionStatus,
    pub winner: Option<UserId>,
    pub submissions: Vec<Submission>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionRecord {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            players: session.players,
            problem_id: session.problem.id,
            rated: session.rated,
            status: session.status,
            winner: session.winner,
            submissions: session.submissions.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
        }
    }
}

#[async_trait]
pub trait SessionArchive: Send + Sync {
    async fn archive(&self, record: SessionRecord) -> Result<(), StoreError>;
}

/// Emits each finished duel as a structured log event.
#[derive(Debug, Default)]
pub struct LogArchive;

#[async_trait]
impl SessionArchive for LogArchive {
    async fn archive(&self, record: SessionRecord) -> Result<(), StoreError> {
        info!(
            session_id = %record.session_id,
            player_a = record.players[0],
            player_b = record.players[1],
            problem_id = record.problem_id,
            rated = record.rated,
            status = ?record.status,
            winner = ?record.winner,
            submissions = record.submissions.len(),
            "session.archived"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Keeps archived records in memory so tests can inspect them.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryArchive {
        pub(crate) records: Mutex<Vec<SessionRecord>>,
    }

    #[async_trait]
    impl SessionArchive for MemoryArchive {
        async fn archive(&self, record: SessionRecord) -> Result<(), StoreError> {
            self.records.lock().await.push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn log_archive_accepts_records() {
        let record = SessionRecord {
            session_id: Uuid::new_v4(),
            players: [1, 2],
            problem_id: 1,
            rated: false,
            status: SessionStatus::Canceled,
            winner: None,
            submissions: Vec::new(),
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
        };
        LogArchive.archive(record.clone()).await.expect("log archive");

        let memory = MemoryArchive::default();
        memory.archive(record.clone()).await.expect("memory archive");
        assert_eq!(memory.records.lock().await.as_slice(), &[record]);
    }
}
