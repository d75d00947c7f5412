use crate::{connection_registry::ConnId, error::StoreError};
use async_trait::async_trait;
use tokio::sync::broadcast;

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Commands fanned out to every node; only the node owning `conn_id` acts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCommand {
    Deliver { conn_id: ConnId, payload: String },
    Disconnect { conn_id: ConnId },
}

/// Cross-node publish/subscribe. Delivery is at-most-once.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    async fn publish(&self, command: BusCommand) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<BusCommand>;
}

#[derive(Debug)]
pub struct LocalBus {
    tx: broadcast::Sender<BusCommand>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FanoutBus for LocalBus {
    async fn publish(&self, command: BusCommand) -> Result<(), StoreError> {
        // No subscribers means no node owns the target; the command is dropped.
        let _ = self.tx.send(command);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusCommand> {
        self.tx.subscribe()
    }
}
