use crate::connection_registry::ConnId;
use duels_protocol::model::UserId;
use std::{collections::HashMap, time::Instant};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch, RwLock,
};

pub type OutboundSender = mpsc::Sender<String>;

/// Why a node asked one of its sockets to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    OtherLogon,
    Overflow,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OtherLogon => "other_logon",
            Self::Overflow => "outbound_overflow",
            Self::Shutdown => "server_shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Missing,
    Overflow,
}

/// The halves a socket task keeps after registering.
#[derive(Debug)]
pub struct LocalChannels {
    pub outbound_rx: mpsc::Receiver<String>,
    pub close_rx: watch::Receiver<Option<CloseReason>>,
}

#[derive(Debug, Clone)]
pub struct LocalConnection {
    pub conn_id: ConnId,
    pub user_id: UserId,
    pub connected_at: Instant,
}

#[derive(Debug)]
struct LocalEntry {
    connection: LocalConnection,
    outbound_tx: OutboundSender,
    close_tx: watch::Sender<Option<CloseReason>>,
}

impl LocalEntry {
    fn close(&self, reason: CloseReason) {
        // Keep the first reason; a later shutdown must not mask other_logon.
        self.close_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }
}

/// Sockets physically owned by this node, keyed by connection id.
#[derive(Debug)]
pub struct LocalConnections {
    capacity: usize,
    conns: RwLock<HashMap<ConnId, LocalEntry>>,
}

impl LocalConnections {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            conns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, conn_id: ConnId, user_id: UserId) -> LocalChannels {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.capacity);
        let (close_tx, close_rx) = watch::channel(None);
        let entry = LocalEntry {
            connection: LocalConnection {
                conn_id,
                user_id,
                connected_at: Instant::now(),
            },
            outbound_tx,
            close_tx,
        };

        self.conns.write().await.insert(conn_id, entry);
        LocalChannels {
            outbound_rx,
            close_rx,
        }
    }

    pub async fn unregister(&self, conn_id: ConnId) -> Option<LocalConnection> {
        self.conns
            .write()
            .await
            .remove(&conn_id)
            .map(|entry| entry.connection)
    }

    /// Queues a frame without waiting. A full queue closes the connection.
    pub async fn deliver(&self, conn_id: ConnId, payload: String) -> Delivery {
        let conns = self.conns.read().await;
        let Some(entry) = conns.get(&conn_id) else {
            return Delivery::Missing;
        };

        match entry.outbound_tx.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                entry.close(CloseReason::Overflow);
                Delivery::Overflow
            }
            Err(TrySendError::Closed(_)) => Delivery::Missing,
        }
    }

    pub async fn close(&self, conn_id: ConnId, reason: CloseReason) -> bool {
        match self.conns.read().await.get(&conn_id) {
            Some(entry) => {
                entry.close(reason);
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let conns = self.conns.read().await;
        for entry in conns.values() {
            entry.close(reason);
        }
        conns.len()
    }

    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }
}
