use crate::error::{StoreError, TicketError};
use async_trait::async_trait;
use duels_protocol::model::UserId;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Single-use upgrade tickets.
#[async_trait]
pub trait Tickets: Send + Sync {
    async fn issue(&self, user_id: UserId) -> Result<String, StoreError>;

    /// Removes the ticket in the same step that validates it.
    async fn consume(&self, ticket: &str) -> Result<UserId, TicketError>;

    async fn prune_expired(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
struct TicketRecord {
    user_id: UserId,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TicketStore {
    ttl: Duration,
    tickets: RwLock<HashMap<String, TicketRecord>>,
}

impl TicketStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tickets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn issue_at(&self, user_id: UserId, now: Instant) -> String {
        let ticket = Uuid::new_v4().to_string();
        let record = TicketRecord {
            user_id,
            expires_at: now + self.ttl,
        };
        self.tickets.write().await.insert(ticket.clone(), record);
        ticket
    }

    pub async fn consume_at(&self, ticket: &str, now: Instant) -> Result<UserId, TicketError> {
        let record = self
            .tickets
            .write()
            .await
            .remove(ticket)
            .ok_or(TicketError::Unknown)?;

        if record.expires_at <= now {
            return Err(TicketError::Expired);
        }

        Ok(record.user_id)
    }

    pub async fn prune_expired_at(&self, now: Instant) -> usize {
        let mut tickets = self.tickets.write().await;
        let before = tickets.len();
        tickets.retain(|_, record| record.expires_at > now);
        before - tickets.len()
    }
}

#[async_trait]
impl Tickets for TicketStore {
    async fn issue(&self, user_id: UserId) -> Result<String, StoreError> {
        Ok(self.issue_at(user_id, Instant::now()).await)
    }

    async fn consume(&self, ticket: &str) -> Result<UserId, TicketError> {
        self.consume_at(ticket, Instant::now()).await
    }

    async fn prune_expired(&self) -> Result<usize, StoreError> {
        Ok(self.prune_expired_at(Instant::now()).await)
    }
}
