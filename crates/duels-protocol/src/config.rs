use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuelConfig {
    pub sweep_interval_ms: u64,
    pub force_match_wait_ms: u64,
    pub invite_ttl_secs: u64,
    pub ticket_ttl_secs: u64,
    pub session_grace_secs: u64,
    pub reconnect_grace_secs: u64,
    pub ping_interval_secs: u64,
    pub read_deadline_secs: u64,
    pub outbound_buffer: usize,
    pub housekeeping_interval_secs: u64,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 1_000,
            force_match_wait_ms: 1_000,
            invite_ttl_secs: 3 * 60,
            ticket_ttl_secs: 15,
            session_grace_secs: 3 * 60,
            reconnect_grace_secs: 30,
            ping_interval_secs: 54,
            read_deadline_secs: 60,
            outbound_buffer: 64,
            housekeeping_interval_secs: 5,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("ping interval ({ping_secs}s) must be shorter than the read deadline ({deadline_secs}s)")]
    PingNotBelowDeadline { ping_secs: u64, deadline_secs: u64 },
}

impl DuelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("invite_ttl_secs", self.invite_ttl_secs),
            ("ticket_ttl_secs", self.ticket_ttl_secs),
            ("ping_interval_secs", self.ping_interval_secs),
            ("read_deadline_secs", self.read_deadline_secs),
            ("outbound_buffer", self.outbound_buffer as u64),
            ("housekeeping_interval_secs", self.housekeeping_interval_secs),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(name));
        }

        if self.ping_interval_secs >= self.read_deadline_secs {
            return Err(ConfigError::PingNotBelowDeadline {
                ping_secs: self.ping_interval_secs,
                deadline_secs: self.read_deadline_secs,
            });
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn force_match_wait(&self) -> Duration {
        Duration::from_millis(self.force_match_wait_ms)
    }

    pub fn invite_ttl(&self) -> Duration {
        Duration::from_secs(self.invite_ttl_secs)
    }

    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_secs)
    }

    pub fn session_grace(&self) -> Duration {
        Duration::from_secs(self.session_grace_secs)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}
