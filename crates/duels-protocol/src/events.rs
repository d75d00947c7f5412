use crate::model::{
    Difficulty, Language, MatchDetails, Problem, SessionStatus, Submission, SubmissionStatus,
    TagId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod names {
    pub const ENTER_QUEUE: &str = "enter_queue";
    pub const LEAVE_QUEUE: &str = "leave_queue";
    pub const SEND_INVITATION: &str = "send_invitation";
    pub const ACCEPT_INVITATION: &str = "accept_invitation";
    pub const DECLINE_INVITATION: &str = "decline_invitation";
    pub const CANCEL_INVITATION: &str = "cancel_invitation";
    pub const SUBMISSION: &str = "submission";

    pub const INVITATION_REQUEST: &str = "invitation_request";
    pub const INVITATION_DECLINED: &str = "invitation_declined";
    pub const INVITATION_CANCELED: &str = "invitation_canceled";
    pub const START_GAME: &str = "start_game";
    pub const OPPONENT_SUBMISSION: &str = "opponent_submission";
    pub const GAME_OVER: &str = "game_over";
    pub const ERROR: &str = "error";
    pub const OTHER_LOGON: &str = "other_logon";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(event_type: impl Into<String>, payload: T) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnterQueueRequest {
    #[serde(default)]
    pub difficulties: Vec<Difficulty>,
    #[serde(default)]
    pub tags: Vec<TagId>,
    #[serde(default)]
    pub force_match: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendInvitationRequest {
    #[serde(rename = "inviteeID")]
    pub invitee_id: UserId,
    #[serde(default)]
    pub match_details: MatchDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationReplyRequest {
    #[serde(rename = "inviterID")]
    pub inviter_id: UserId,
}

pub type AcceptInvitationRequest = InvitationReplyRequest;
pub type DeclineInvitationRequest = InvitationReplyRequest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub status: SubmissionStatus,
    pub passed_test_cases: u32,
    pub total_test_cases: u32,
    #[serde(default)]
    pub runtime: u32,
    #[serde(default)]
    pub memory: u32,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvitationRequestEvent {
    #[serde(rename = "inviterID")]
    pub inviter_id: UserId,
    pub match_details: MatchDetails,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationDeclinedEvent {
    #[serde(rename = "inviteeID")]
    pub invitee_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationCanceledEvent {
    #[serde(rename = "inviterID")]
    pub inviter_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartGameEvent {
    #[serde(rename = "sessionID")]
    pub session_id: Uuid,
    pub problem: Problem,
    #[serde(rename = "problemURL")]
    pub problem_url: String,
    #[serde(rename = "opponentID")]
    pub opponent_id: UserId,
    pub rated: bool,
    pub start_time: DateTime<Utc>,
}

pub type OpponentSubmissionEvent = Submission;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameOverEvent {
    #[serde(rename = "sessionID")]
    pub session_id: Uuid,
    #[serde(rename = "winnerID")]
    pub winner_id: Option<UserId>,
    pub status: SessionStatus,
    /// Seconds between session start and end.
    pub duration: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownType,
    InvalidPayload,
    InvalidRequest,
    UserOffline,
    InviteExists,
    InviteNotFound,
    InviterUnavailable,
    AlreadyInGame,
    NotInGame,
    NotParticipant,
    SessionCompleted,
    NoProblemAvailable,
    ServerError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEvent {
    pub code: ErrorCode,
    pub message: String,
}

pub type OtherLogonEvent = EmptyPayload;
