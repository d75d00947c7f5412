use crate::{
    archive::{LogArchive, SessionArchive},
    auth::AuthVerifier,
    background,
    bus::{BusCommand, FanoutBus, LocalBus},
    catalog::ProblemCatalog,
    connection_registry::{ConnId, ConnectionRegistry, NodeId, Presence},
    error::StoreError,
    invite_store::{InviteStore, Invitations},
    local_connections::{CloseReason, Delivery, LocalChannels, LocalConnections},
    matchmaking::{MatchQueue, Matchmaking},
    session_store::{SessionStore, Sessions},
    ticket_store::{TicketStore, Tickets},
    ws_handler::outgoing::encode_event,
};
use duels_protocol::{config::DuelConfig, model::UserId};
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SharedState = Arc<AppState>;

/// Shared backends and collaborators. Every node of a deployment holds clones
/// of the same handles.
#[derive(Clone)]
pub struct Services {
    pub presence: Arc<dyn Presence>,
    pub queue: Arc<dyn Matchmaking>,
    pub invites: Arc<dyn Invitations>,
    pub sessions: Arc<dyn Sessions>,
    pub tickets: Arc<dyn Tickets>,
    pub bus: Arc<dyn FanoutBus>,
    pub catalog: Arc<dyn ProblemCatalog>,
    pub archive: Arc<dyn SessionArchive>,
    pub auth: Arc<dyn AuthVerifier>,
}

impl Services {
    pub fn in_memory(
        config: &DuelConfig,
        auth: Arc<dyn AuthVerifier>,
        catalog: Arc<dyn ProblemCatalog>,
    ) -> Self {
        Self {
            presence: Arc::new(ConnectionRegistry::new()),
            queue: Arc::new(MatchQueue::new()),
            invites: Arc::new(InviteStore::new(config.invite_ttl())),
            sessions: Arc::new(SessionStore::new(config.session_grace())),
            tickets: Arc::new(TicketStore::new(config.ticket_ttl())),
            bus: Arc::new(LocalBus::new()),
            catalog,
            archive: Arc::new(LogArchive),
            auth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub online: bool,
    pub in_game: bool,
}

/// One server process: its own sockets, shared everything else.
pub struct AppState {
    node_id: NodeId,
    config: DuelConfig,
    services: Services,
    local: LocalConnections,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    pub fn new(config: DuelConfig, services: Services) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            node_id: Uuid::new_v4(),
            local: LocalConnections::new(config.outbound_buffer),
            config,
            services,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Builds the node and starts its bus listener, matchmaker and housekeeping.
    pub async fn start(config: DuelConfig, services: Services) -> SharedState {
        let state = Arc::new(Self::new(config, services));
        let bus_rx = state.services.bus.subscribe();

        let handles = vec![
            tokio::spawn(background::run_bus_listener(
                Arc::clone(&state),
                bus_rx,
                state.shutdown_signal(),
            )),
            tokio::spawn(background::run_matchmaker(
                Arc::clone(&state),
                state.shutdown_signal(),
            )),
            tokio::spawn(background::run_housekeeping(
                Arc::clone(&state),
                state.shutdown_signal(),
            )),
        ];
        state.tasks.lock().await.extend(handles);

        info!(node_id = %state.node_id, "node.started");
        state
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn local(&self) -> &LocalConnections {
        &self.local
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Registers a freshly upgraded socket and evicts the user's previous one.
    pub async fn connect(&self, user_id: UserId) -> Result<(ConnId, LocalChannels), StoreError> {
        let conn_id = Uuid::new_v4();
        let channels = self.local.register(conn_id, user_id).await;

        let previous = match self
            .services
            .presence
            .add_connection(user_id, conn_id, self.node_id)
            .await
        {
            Ok(previous) => previous,
            Err(err) => {
                self.local.unregister(conn_id).await;
                return Err(err);
            }
        };

        if let Some(previous) = previous {
            info!(user_id, %conn_id, previous_conn = %previous, "connection.replacing");
            if let Err(err) = self
                .services
                .bus
                .publish(BusCommand::Disconnect { conn_id: previous })
                .await
            {
                warn!(user_id, previous_conn = %previous, err = %err, "connection.evict_failed");
            }
        }

        Ok((conn_id, channels))
    }

    /// Tears down local state for a closed socket.
    pub async fn disconnect(self: &Arc<Self>, conn_id: ConnId, user_id: UserId) {
        if let Some(local) = self.local.unregister(conn_id).await {
            debug!(
                %conn_id,
                user_id = local.user_id,
                registered_secs = local.connected_at.elapsed().as_secs(),
                "connection.unregistered"
            );
        }

        let still_online = match self
            .services
            .presence
            .remove_connection(user_id, conn_id)
            .await
        {
            Ok(still_online) => still_online,
            Err(err) => {
                warn!(user_id, %conn_id, err = %err, "connection.presence_remove_failed");
                return;
            }
        };

        if still_online {
            debug!(user_id, %conn_id, "connection.superseded");
            return;
        }

        if let Err(err) = self.services.queue.leave_queue(user_id).await {
            warn!(user_id, err = %err, "queue.leave_failed");
        }

        match self.services.sessions.session_for_player(user_id).await {
            Ok(Some(session)) if session.is_live() => {
                self.schedule_abandon_check(user_id, session.id);
            }
            Ok(_) => {}
            Err(err) => warn!(user_id, err = %err, "session.lookup_failed"),
        }
    }

    /// Routes a frame to whichever node owns the user's connection.
    pub async fn send_to_user(&self, user_id: UserId, payload: String) -> Result<bool, StoreError> {
        let Some(record) = self.services.presence.locate(user_id).await? else {
            return Ok(false);
        };

        self.services
            .bus
            .publish(BusCommand::Deliver {
                conn_id: record.conn_id,
                payload,
            })
            .await?;
        Ok(true)
    }

    /// Best-effort event delivery; failures are logged, never surfaced.
    pub async fn notify<T: Serialize>(&self, user_id: UserId, event_type: &str, payload: T) -> bool {
        let frame = encode_event(event_type, payload);
        match self.send_to_user(user_id, frame).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!(user_id, event_type, err = %err, "delivery.publish_failed");
                false
            }
        }
    }

    /// Applies a bus command if the target connection lives on this node.
    pub async fn apply_bus_command(&self, command: BusCommand) {
        match command {
            BusCommand::Deliver { conn_id, payload } => {
                if self.local.deliver(conn_id, payload).await == Delivery::Overflow {
                    warn!(%conn_id, node_id = %self.node_id, "connection.outbound_overflow");
                }
            }
            BusCommand::Disconnect { conn_id } => {
                if self.local.close(conn_id, CloseReason::OtherLogon).await {
                    info!(%conn_id, "connection.other_logon");
                }
            }
        }
    }

    pub async fn user_status(&self, user_id: UserId) -> Result<UserStatus, StoreError> {
        let online = self.services.presence.is_online(user_id).await?;
        let in_game = self
            .services
            .sessions
            .session_for_player(user_id)
            .await?
            .is_some_and(|session| session.is_live());

        Ok(UserStatus { online, in_game })
    }

    /// Stops background work and asks every local socket to close.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let closed = self.local.close_all(CloseReason::Shutdown).await;

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        info!(node_id = %self.node_id, closed_connections = closed, "node.stopped");
    }
}
