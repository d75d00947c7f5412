use crate::{
    app_state::SharedState, connection_registry::ConnId, error::ServiceError,
    local_connections::Delivery,
};
use duels_protocol::events::{self, Envelope, ErrorCode, ErrorEvent, OtherLogonEvent};
use serde::Serialize;
use tracing::warn;

pub(crate) fn encode_event<T: Serialize>(event_type: &str, payload: T) -> String {
    serde_json::to_string(&Envelope::new(event_type, payload))
        .expect("serializing event should not fail")
}

pub(super) fn error_frame(code: ErrorCode, message: impl Into<String>) -> String {
    encode_event(
        events::names::ERROR,
        ErrorEvent {
            code,
            message: message.into(),
        },
    )
}

pub(super) fn service_error_frame(err: &ServiceError) -> String {
    error_frame(err.code(), err.public_message())
}

pub(super) fn other_logon_frame() -> String {
    encode_event(events::names::OTHER_LOGON, OtherLogonEvent::default())
}

/// Direct replies share the outbound queue so they stay ordered with pushed events.
pub(super) async fn reply(state: &SharedState, conn_id: ConnId, frame: String) -> bool {
    match state.local().deliver(conn_id, frame).await {
        Delivery::Queued => true,
        Delivery::Overflow => {
            warn!(%conn_id, "connection.reply_overflow");
            false
        }
        Delivery::Missing => false,
    }
}

pub(super) async fn reply_error(
    state: &SharedState,
    conn_id: ConnId,
    code: ErrorCode,
    message: &str,
) -> bool {
    reply(state, conn_id, error_frame(code, message)).await
}
