use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::ids::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Expert,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Expert => "expert",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "expert" => Ok(Role::Expert),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// One connected peer inside one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Client -> server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionPayload {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveSessionPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub session_id: String,
    pub message: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionPayload {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinSession(JoinSessionPayload),
    LeaveSession(LeaveSessionPayload),
    ChatMessage(ChatMessagePayload),
    Typing(TypingPayload),
    EndSession(EndSessionPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    JoinSession,
    LeaveSession,
    ChatMessage,
    Typing,
    EndSession,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "join-session" => Some(EventKind::JoinSession),
            "leave-session" => Some(EventKind::LeaveSession),
            "chat-message" => Some(EventKind::ChatMessage),
            "typing" => Some(EventKind::Typing),
            "end-session" => Some(EventKind::EndSession),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JoinSession => "join-session",
            EventKind::LeaveSession => "leave-session",
            EventKind::ChatMessage => "chat-message",
            EventKind::Typing => "typing",
            EventKind::EndSession => "end-session",
        }
    }

    /// Whether a malformed payload is reported back to the sender.
    /// The remaining events are dropped silently.
    pub fn reports_invalid_payload(&self) -> bool {
        matches!(self, EventKind::JoinSession | EventKind::ChatMessage)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("invalid {} payload: {reason}", .kind.as_str())]
    InvalidPayload { kind: EventKind, reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Required string fields must be non-empty, not just present.
trait RequiredFields {
    fn first_empty(&self) -> Option<&'static str>;
}

impl RequiredFields for JoinSessionPayload {
    fn first_empty(&self) -> Option<&'static str> {
        if self.session_id.is_empty() {
            Some("sessionId")
        } else if self.user_id.is_empty() {
            Some("userId")
        } else {
            None
        }
    }
}

impl RequiredFields for LeaveSessionPayload {
    fn first_empty(&self) -> Option<&'static str> {
        self.session_id.is_empty().then_some("sessionId")
    }
}

impl RequiredFields for ChatMessagePayload {
    fn first_empty(&self) -> Option<&'static str> {
        if self.session_id.is_empty() {
            Some("sessionId")
        } else if self.message.is_empty() {
            Some("message")
        } else if self.sender_id.is_empty() {
            Some("senderId")
        } else {
            None
        }
    }
}

impl RequiredFields for TypingPayload {
    fn first_empty(&self) -> Option<&'static str> {
        if self.session_id.is_empty() {
            Some("sessionId")
        } else if self.user_id.is_empty() {
            Some("userId")
        } else {
            None
        }
    }
}

impl RequiredFields for EndSessionPayload {
    fn first_empty(&self) -> Option<&'static str> {
        self.session_id.is_empty().then_some("sessionId")
    }
}

fn decode_payload<T>(kind: EventKind, data: Value) -> Result<T, DecodeError>
where
    T: serde::de::DeserializeOwned + RequiredFields,
{
    let payload: T = serde_json::from_value(data).map_err(|e| DecodeError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })?;

    if let Some(field) = payload.first_empty() {
        return Err(DecodeError::InvalidPayload {
            kind,
            reason: format!("{} is required", field),
        });
    }

    Ok(payload)
}

impl ClientEvent {
    /// Decodes one inbound text frame, validating required fields
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::MalformedFrame)?;
        let kind = EventKind::from_name(&envelope.event)
            .ok_or_else(|| DecodeError::UnknownEvent(envelope.event.clone()))?;

        let event = match kind {
            EventKind::JoinSession => ClientEvent::JoinSession(decode_payload(kind, envelope.data)?),
            EventKind::LeaveSession => ClientEvent::LeaveSession(decode_payload(kind, envelope.data)?),
            EventKind::ChatMessage => ClientEvent::ChatMessage(decode_payload(kind, envelope.data)?),
            EventKind::Typing => ClientEvent::Typing(decode_payload(kind, envelope.data)?),
            EventKind::EndSession => ClientEvent::EndSession(decode_payload(kind, envelope.data)?),
        };

        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::JoinSession(_) => EventKind::JoinSession,
            ClientEvent::LeaveSession(_) => EventKind::LeaveSession,
            ClientEvent::ChatMessage(_) => EventKind::ChatMessage,
            ClientEvent::Typing(_) => EventKind::Typing,
            ClientEvent::EndSession(_) => EventKind::EndSession,
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Server -> client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub user_id: String,
    pub role: Role,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: String,
    pub session_id: String,
    pub message: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded {
    pub session_id: String,
    pub ended_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}

impl From<&crate::error::RelayError> for ErrorEvent {
    fn from(err: &crate::error::RelayError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantList {
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserJoined(UserJoined),
    UserLeft(UserLeft),
    NewMessage(NewMessage),
    Typing(TypingUpdate),
    SessionEnded(SessionEnded),
    Error(ErrorEvent),
    Participants(ParticipantList),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::SessionEnded(_) => "session-ended",
            ServerEvent::Error(_) => "error",
            ServerEvent::Participants(_) => "participants",
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
