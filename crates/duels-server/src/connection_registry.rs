use crate::error::StoreError;
use async_trait::async_trait;
use duels_protocol::model::UserId;
use std::{collections::HashMap, time::Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ConnId = Uuid;
pub type NodeId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceRecord {
    pub conn_id: ConnId,
    pub node_id: NodeId,
    pub connected_at: Instant,
}

/// Which connection currently speaks for each user, shared by every node.
#[async_trait]
pub trait Presence: Send + Sync {
    /// Swaps the user's active connection, returning the one it replaced.
    async fn add_connection(
        &self,
        user_id: UserId,
        conn_id: ConnId,
        node_id: NodeId,
    ) -> Result<Option<ConnId>, StoreError>;

    /// Removes the record only while it still names `conn_id`. Returns whether
    /// the user is online afterwards.
    async fn remove_connection(&self, user_id: UserId, conn_id: ConnId)
        -> Result<bool, StoreError>;

    async fn is_online(&self, user_id: UserId) -> Result<bool, StoreError>;

    async fn locate(&self, user_id: UserId) -> Result<Option<PresenceRecord>, StoreError>;
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<UserId, PresenceRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub async fn online_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl Presence for ConnectionRegistry {
    async fn add_connection(
        &self,
        user_id: UserId,
        conn_id: ConnId,
        node_id: NodeId,
    ) -> Result<Option<ConnId>, StoreError> {
        let record = PresenceRecord {
            conn_id,
            node_id,
            connected_at: Instant::now(),
        };

        let previous = self.users.write().await.insert(user_id, record);
        Ok(previous
            .map(|previous| previous.conn_id)
            .filter(|previous| *previous != conn_id))
    }

    async fn remove_connection(
        &self,
        user_id: UserId,
        conn_id: ConnId,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get(&user_id) {
            Some(record) if record.conn_id == conn_id => {
                users.remove(&user_id);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.users.read().await.contains_key(&user_id))
    }

    async fn locate(&self, user_id: UserId) -> Result<Option<PresenceRecord>, StoreError> {
        Ok(self.users.read().await.get(&user_id).copied())
    }
}
