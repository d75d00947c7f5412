use super::{
    outgoing::{reply, reply_error, service_error_frame},
    parse::{decode_payload, parse_incoming_envelope},
};
use crate::{
    app_state::SharedState, connection_registry::ConnId, error::ServiceError, logging,
};
use duels_protocol::{
    events::{
        names, AcceptInvitationRequest, DeclineInvitationRequest, EnterQueueRequest, ErrorCode,
        SendInvitationRequest, SubmissionRequest,
    },
    model::UserId,
};
use serde::de::DeserializeOwned;

enum DispatchError {
    UnknownType,
    InvalidPayload,
    Service(ServiceError),
}

impl From<ServiceError> for DispatchError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

fn decode<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, DispatchError> {
    decode_payload(payload).ok_or(DispatchError::InvalidPayload)
}

/// Handles one text frame. Returns false once the connection can no longer be written to.
pub(super) async fn dispatch_text(
    state: &SharedState,
    conn_id: ConnId,
    user_id: UserId,
    raw: &str,
) -> bool {
    let payload_bytes = raw.len();
    let Some(incoming) = parse_incoming_envelope(raw) else {
        logging::log_invalid_json(conn_id, user_id, payload_bytes);
        return reply_error(
            state,
            conn_id,
            ErrorCode::InvalidPayload,
            "invalid JSON envelope",
        )
        .await;
    };
    logging::log_inbound_event(conn_id, user_id, &incoming.event_type, payload_bytes);

    let event_type = incoming.event_type;
    match handle_event(state, user_id, &event_type, incoming.payload).await {
        Ok(()) => true,
        Err(DispatchError::UnknownType) => {
            reply_error(state, conn_id, ErrorCode::UnknownType, "unsupported event type").await
        }
        Err(DispatchError::InvalidPayload) => {
            let message = format!("invalid {event_type} payload");
            reply_error(state, conn_id, ErrorCode::InvalidPayload, &message).await
        }
        Err(DispatchError::Service(err)) => {
            logging::log_service_error(conn_id, user_id, &event_type, &err);
            reply(state, conn_id, service_error_frame(&err)).await
        }
    }
}

async fn handle_event(
    state: &SharedState,
    user_id: UserId,
    event_type: &str,
    payload: serde_json::Value,
) -> Result<(), DispatchError> {
    match event_type {
        names::ENTER_QUEUE => {
            let request: EnterQueueRequest = decode(payload)?;
            state.enter_queue(user_id, request).await?;
        }
        names::LEAVE_QUEUE => {
            state.leave_queue(user_id).await?;
        }
        names::SEND_INVITATION => {
            let request: SendInvitationRequest = decode(payload)?;
            state.send_invitation(user_id, request).await?;
        }
        names::ACCEPT_INVITATION => {
            let request: AcceptInvitationRequest = decode(payload)?;
            state.accept_invitation(user_id, request.inviter_id).await?;
        }
        names::DECLINE_INVITATION => {
            let request: DeclineInvitationRequest = decode(payload)?;
            state.decline_invitation(user_id, request.inviter_id).await?;
        }
        names::CANCEL_INVITATION => {
            state.cancel_invitation(user_id).await?;
        }
        names::SUBMISSION => {
            let request: SubmissionRequest = decode(payload)?;
            state.submit(user_id, request).await?;
        }
        _ => return Err(DispatchError::UnknownType),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::{
        tests::{next_frame, test_config, test_services},
        AppState,
    };

    #[tokio::test]
    async fn unknown_and_malformed_frames_get_error_replies() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::start(config, services).await;
        let (conn_id, mut channels) = state.connect(1).await.expect("connect");

        assert!(dispatch_text(&state, conn_id, 1, r#"{"type":"chat","payload":{}}"#).await);
        let frame = next_frame(&mut channels.outbound_rx).await;
        assert_eq!(frame["type"], names::ERROR);
        assert_eq!(frame["payload"]["code"], "unknown_type");

        assert!(dispatch_text(&state, conn_id, 1, "{not json").await);
        let frame = next_frame(&mut channels.outbound_rx).await;
        assert_eq!(frame["payload"]["code"], "invalid_payload");

        let raw = r#"{"type":"submission","payload":{"status":"Accepted"}}"#;
        assert!(dispatch_text(&state, conn_id, 1, raw).await);
        let frame = next_frame(&mut channels.outbound_rx).await;
        assert_eq!(frame["payload"]["code"], "invalid_payload");
        assert_eq!(frame["payload"]["message"], "invalid submission payload");

        state.shutdown().await;
    }

    #[tokio::test]
    async fn service_errors_map_to_codes() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::start(config, services).await;
        let (conn_id, mut channels) = state.connect(1).await.expect("connect");

        let raw = r#"{"type":"accept_invitation","payload":{"inviterID":2}}"#;
        assert!(dispatch_text(&state, conn_id, 1, raw).await);
        let frame = next_frame(&mut channels.outbound_rx).await;
        assert_eq!(frame["payload"]["code"], "invite_not_found");

        let raw = r#"{"type":"submission","payload":{"status":"Accepted","passedTestCases":1,"totalTestCases":1,"language":"go"}}"#;
        assert!(dispatch_text(&state, conn_id, 1, raw).await);
        let frame = next_frame(&mut channels.outbound_rx).await;
        assert_eq!(frame["payload"]["code"], "not_in_game");

        state.shutdown().await;
    }

    #[tokio::test]
    async fn queue_and_stale_invite_events_are_silent() {
        let config = test_config();
        let (services, _) = test_services(&config);
        let state = AppState::start(config, services).await;
        let (conn_id, mut channels) = state.connect(1).await.expect("connect");

        let raw = r#"{"type":"enter_queue","payload":{"difficulties":["Hard"],"tags":[8]}}"#;
        assert!(dispatch_text(&state, conn_id, 1, raw).await);
        assert_eq!(state.services().queue.contains(1).await, Ok(true));

        assert!(dispatch_text(&state, conn_id, 1, r#"{"type":"leave_queue"}"#).await);
        assert_eq!(state.services().queue.contains(1).await, Ok(false));

        let raw = r#"{"type":"cancel_invitation"}"#;
        assert!(dispatch_text(&state, conn_id, 1, raw).await);
        let raw = r#"{"type":"decline_invitation","payload":{"inviterID":3}}"#;
        assert!(dispatch_text(&state, conn_id, 1, raw).await);
        assert!(channels.outbound_rx.try_recv().is_err());

        state.shutdown().await;
    }
}
