use crate::{app_state::SharedState, bus::BusCommand};
use std::time::Instant;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

/// Forwards bus commands addressed to sockets owned by this node.
pub async fn run_bus_listener(
    state: SharedState,
    mut bus_rx: broadcast::Receiver<BusCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            command = bus_rx.recv() => match command {
                Ok(command) => state.apply_bus_command(command).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(node_id = %state.node_id(), skipped, "bus.lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!(node_id = %state.node_id(), "bus.listener_stopped");
}

pub async fn run_matchmaker(state: SharedState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = time::interval(state.config().sweep_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                state.run_match_sweep(Instant::now()).await;
            }
        }
    }

    debug!(node_id = %state.node_id(), "queue.matchmaker_stopped");
}

/// Drops expired tickets, invites and finished sessions.
pub async fn run_housekeeping(state: SharedState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = time::interval(state.config().housekeeping_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => prune_once(&state).await,
        }
    }
}

async fn prune_once(state: &SharedState) {
    let services = state.services();

    let tickets = services.tickets.prune_expired().await;
    let invites = services.invites.prune_expired().await;
    let sessions = services.sessions.prune_expired().await;

    match (tickets, invites, sessions) {
        (Ok(tickets), Ok(invites), Ok(sessions)) => {
            if tickets + invites + sessions > 0 {
                debug!(tickets, invites, sessions, "housekeeping.pruned");
            }
        }
        (tickets, invites, sessions) => {
            warn!(
                tickets_ok = tickets.is_ok(),
                invites_ok = invites.is_ok(),
                sessions_ok = sessions.is_ok(),
                "housekeeping.prune_failed"
            );
        }
    }
}
