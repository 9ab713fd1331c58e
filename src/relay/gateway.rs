use std::collections::{HashMap, HashSet};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use super::ids::{self, ConnectionId};
use super::protocol::{
    ChatMessagePayload, ClientEvent, DecodeError, EndSessionPayload, ErrorEvent, JoinSessionPayload,
    LeaveSessionPayload, NewMessage, Participant, ParticipantList, Role, ServerEvent, SessionEnded,
    TypingPayload, TypingUpdate, UserJoined, UserLeft,
};
use super::registry::Registry;
use crate::error::RelayError;

/// Outbound queue of one transport connection
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Unjoined,
    Joined,
    Left,
    Disconnected,
}

/// Which session and user a connection currently speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
}

struct ConnectionEntry {
    sender: EventSender,
    attribution: Option<Attribution>,
    state: ConnectionState,
}

struct GatewayState {
    registry: Registry,
    /// channel name -> member connections
    channels: HashMap<String, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl GatewayState {
    fn emit_to(&self, connection_id: &str, event: ServerEvent) {
        let Some(entry) = self.connections.get(connection_id) else {
            return;
        };
        if entry.sender.send(event).is_err() {
            tracing::debug!(connection_id = %connection_id, "Outbound queue closed, event dropped");
        }
    }

    fn broadcast(&self, session_id: &str, event: &ServerEvent, except: Option<&str>) {
        let Some(members) = self.channels.get(&ids::channel_name(session_id)) else {
            return;
        };

        for member in members {
            if Some(member.as_str()) == except {
                continue;
            }
            self.emit_to(member, event.clone());
        }
    }

    fn emit_error(&self, connection_id: &str, err: &RelayError) {
        tracing::warn!(connection_id = %connection_id, error = %err, "Rejecting event");
        self.emit_to(connection_id, ServerEvent::Error(ErrorEvent::from(err)));
    }

    /// Drops the connection's attribution and channel membership. The registry
    /// record is removed only if this connection still owns it.
    fn release(&mut self, connection_id: &str, final_state: ConnectionState) -> Option<Attribution> {
        let entry = self.connections.get_mut(connection_id)?;
        let attribution = entry.attribution.take()?;
        entry.state = final_state;

        let channel = ids::channel_name(&attribution.session_id);
        if let Some(members) = self.channels.get_mut(&channel) {
            members.remove(connection_id);
            if members.is_empty() {
                self.channels.remove(&channel);
            }
        }

        let owns_record = self
            .registry
            .participant(&attribution.session_id, &attribution.user_id)
            .is_some_and(|p| p.connection_id == connection_id);

        if !owns_record {
            tracing::debug!(
                connection_id = %connection_id,
                session_id = %attribution.session_id,
                user_id = %attribution.user_id,
                "Connection no longer owns participant record, skipping unregister"
            );
            return Some(attribution);
        }

        if let Some(removed) = self
            .registry
            .unregister(&attribution.session_id, &attribution.user_id)
        {
            tracing::info!(
                session_id = %attribution.session_id,
                user_id = %removed.user_id,
                role = %removed.role,
                "Participant left session"
            );
            let event = ServerEvent::UserLeft(UserLeft {
                user_id: removed.user_id,
                role: removed.role,
            });
            self.broadcast(&attribution.session_id, &event, Some(connection_id));
        }

        Some(attribution)
    }

    fn join(&mut self, connection_id: &str, payload: JoinSessionPayload) {
        let JoinSessionPayload { session_id, user_id, role } = payload;

        let participant = Participant {
            connection_id: connection_id.to_string(),
            user_id: user_id.clone(),
            role,
            joined_at: Utc::now(),
        };

        if let Err(err) = self.registry.register(&session_id, participant) {
            self.emit_error(connection_id, &err);
            return;
        }

        let attribution = Attribution {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            role,
        };

        let previous = self
            .connections
            .get(connection_id)
            .and_then(|entry| entry.attribution.clone());
        if let Some(previous) = previous {
            if previous.session_id != session_id || previous.user_id != user_id {
                self.release(connection_id, ConnectionState::Left);
            }
        }

        if let Some(entry) = self.connections.get_mut(connection_id) {
            entry.attribution = Some(attribution);
            entry.state = ConnectionState::Joined;
        }
        self.channels
            .entry(ids::channel_name(&session_id))
            .or_default()
            .insert(connection_id.to_string());

        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            role = %role,
            connection_id = %connection_id,
            "Participant joined session"
        );

        let joined = ServerEvent::UserJoined(UserJoined {
            user_id,
            role,
            connection_id: connection_id.to_string(),
        });
        self.broadcast(&session_id, &joined, Some(connection_id));

        let participants = self.registry.list_participants(&session_id);
        self.emit_to(connection_id, ServerEvent::Participants(ParticipantList { participants }));
    }

    fn leave(&mut self, connection_id: &str, payload: LeaveSessionPayload) {
        let attributed_session = self
            .connections
            .get(connection_id)
            .and_then(|entry| entry.attribution.as_ref())
            .map(|a| a.session_id.clone());

        match attributed_session {
            Some(session_id) if session_id == payload.session_id => {
                self.release(connection_id, ConnectionState::Left);
            }
            Some(session_id) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    attributed = %session_id,
                    requested = %payload.session_id,
                    "Leave for a session this connection is not in, ignoring"
                );
            }
            None => {
                tracing::debug!(connection_id = %connection_id, "Leave from unattributed connection, ignoring");
            }
        }
    }

    fn chat(&self, payload: ChatMessagePayload) {
        let message = NewMessage {
            id: ids::generate_message_id(),
            session_id: payload.session_id,
            message: payload.message,
            sender_id: payload.sender_id,
            sender_name: payload.sender_name,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        tracing::debug!(
            session_id = %message.session_id,
            message_id = %message.id,
            sender_id = %message.sender_id,
            "Relaying chat message"
        );

        let session_id = message.session_id.clone();
        self.broadcast(&session_id, &ServerEvent::NewMessage(message), None);
    }

    fn typing(&self, connection_id: &str, payload: TypingPayload) {
        let event = ServerEvent::Typing(TypingUpdate {
            user_id: payload.user_id,
            is_typing: payload.is_typing,
        });
        self.broadcast(&payload.session_id, &event, Some(connection_id));
    }

    /// Broadcasts `session-ended`, then drops the room and dissolves its channel
    fn end(&mut self, session_id: &str, ended_by: String, reason: Option<String>) -> bool {
        let event = ServerEvent::SessionEnded(SessionEnded {
            session_id: session_id.to_string(),
            ended_by: ended_by.clone(),
            reason,
        });
        self.broadcast(session_id, &event, None);

        let room = self.registry.remove_room(session_id);

        if let Some(members) = self.channels.remove(&ids::channel_name(session_id)) {
            for member in members {
                let Some(entry) = self.connections.get_mut(&member) else {
                    continue;
                };
                if entry
                    .attribution
                    .as_ref()
                    .is_some_and(|a| a.session_id == session_id)
                {
                    entry.attribution = None;
                    entry.state = ConnectionState::Left;
                }
            }
        }

        tracing::info!(
            session_id = %session_id,
            ended_by = %ended_by,
            remaining = room.as_ref().map(|r| r.len()).unwrap_or(0),
            "Session ended"
        );

        room.is_some()
    }
}

/// Connection-event dispatcher between transport connections and the registry.
///
/// Every handler runs to completion under one write lock, so events touching
/// a room are applied and fanned out in a single total order. Handlers never
/// return errors; faults become an `error` event or are dropped.
pub struct SessionGateway {
    state: RwLock<GatewayState>,
}

impl SessionGateway {
    pub fn new(registry: Registry) -> Self {
        Self {
            state: RwLock::new(GatewayState {
                registry,
                channels: HashMap::new(),
                connections: HashMap::new(),
            }),
        }
    }

    /// Registers a new transport connection and returns its id
    pub async fn connect(&self, sender: EventSender) -> ConnectionId {
        let connection_id = ids::generate_connection_id();
        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                sender,
                attribution: None,
                state: ConnectionState::Unjoined,
            },
        );
        tracing::debug!(connection_id = %connection_id, "Connection registered");
        connection_id
    }

    /// Decodes and applies one inbound text frame
    pub async fn handle_text(&self, connection_id: &str, text: &str) {
        match ClientEvent::decode(text) {
            Ok(event) => self.handle_event(connection_id, event).await,
            Err(DecodeError::InvalidPayload { kind, reason }) if kind.reports_invalid_payload() => {
                let state = self.state.read().await;
                state.emit_error(connection_id, &RelayError::invalid_payload(kind.as_str(), reason));
            }
            Err(DecodeError::MalformedFrame(e)) => {
                tracing::warn!(connection_id = %connection_id, error = %e, raw_message = %text, "Failed to parse frame");
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Dropping event");
            }
        }
    }

    pub async fn handle_event(&self, connection_id: &str, event: ClientEvent) {
        let mut state = self.state.write().await;

        if !state.connections.contains_key(connection_id) {
            tracing::warn!(connection_id = %connection_id, event = event.kind().as_str(), "Event from unknown connection");
            return;
        }

        match event {
            ClientEvent::JoinSession(payload) => state.join(connection_id, payload),
            ClientEvent::LeaveSession(payload) => state.leave(connection_id, payload),
            ClientEvent::ChatMessage(payload) => state.chat(payload),
            ClientEvent::Typing(payload) => state.typing(connection_id, payload),
            ClientEvent::EndSession(EndSessionPayload { session_id, reason }) => {
                let ended_by = state
                    .connections
                    .get(connection_id)
                    .and_then(|entry| entry.attribution.as_ref())
                    .map(|a| a.user_id.clone())
                    .unwrap_or_else(|| connection_id.to_string());
                state.end(&session_id, ended_by, reason);
            }
        }
    }

    /// Transport-level disconnect. Releases the connection's attribution and
    /// forgets the connection.
    pub async fn disconnect(&self, connection_id: &str) -> Option<Attribution> {
        let mut state = self.state.write().await;
        let released = state.release(connection_id, ConnectionState::Disconnected);
        state.connections.remove(connection_id);

        tracing::debug!(
            connection_id = %connection_id,
            session_id = ?released.as_ref().map(|a| a.session_id.as_str()),
            "Connection disconnected"
        );
        released
    }

    /// Ends a session from application code (e.g. a billing hook).
    /// Returns whether a room existed.
    pub async fn end_session(&self, session_id: &str, ended_by: &str, reason: Option<String>) -> bool {
        let mut state = self.state.write().await;
        state.end(session_id, ended_by.to_string(), reason)
    }

    pub async fn list_participants(&self, session_id: &str) -> Vec<Participant> {
        self.state.read().await.registry.list_participants(session_id)
    }

    pub async fn contains(&self, session_id: &str, user_id: &str) -> bool {
        self.state.read().await.registry.contains(session_id, user_id)
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.registry.room_count()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Unknown connection ids report `Disconnected`
    pub async fn connection_state(&self, connection_id: &str) -> ConnectionState {
        self.state
            .read()
            .await
            .connections
            .get(connection_id)
            .map(|entry| entry.state)
            .unwrap_or(ConnectionState::Disconnected)
    }
}
