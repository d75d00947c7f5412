use crate::{
    app_state::{SharedState, UserStatus},
    auth::bearer_token,
    error::ApiError,
};
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use duels_protocol::model::UserId;
use serde::Serialize;
use tracing::{debug, info};

/// Caller identity taken from the `Authorization: Bearer` header.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header).inspect_err(|err| {
            debug!(err = %err, "http.auth_rejected");
        })?;

        let user_id = state.services().auth.verify(token).inspect_err(|err| {
            debug!(err = %err, "http.auth_rejected");
        })?;
        Ok(Self(user_id))
    }
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub ticket: String,
}

pub async fn issue_ticket(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket = state.services().tickets.issue(user_id).await?;
    info!(user_id, "ticket.issued");
    Ok(Json(TicketResponse { ticket }))
}

pub async fn user_status(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserStatus>, ApiError> {
    Ok(Json(state.user_status(user_id).await?))
}
