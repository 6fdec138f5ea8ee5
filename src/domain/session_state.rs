use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::models::StationIdentity;
use crate::domain::registry::RejectionReason;
use crate::domain::telemetry::handshake_identity;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unidentified,
    Identifying,
    Registered { uuid: String, session_id: Uuid },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OutboundMessage {
    Identify,
    Registered { uuid: String },
    Rejected { reason: RejectionReason },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStep {
    Register(StationIdentity),
    Record {
        uuid: String,
        session_id: Uuid,
        payload: Value,
    },
    Ignore,
}

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unidentified,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn open(&mut self) -> OutboundMessage {
        self.state = SessionState::Identifying;
        OutboundMessage::Identify
    }

    /// Before registration only a handshake moves the session forward; telemetry
    /// is dropped without buffering. After registration every message,
    /// including one that looks like a handshake, is telemetry.
    pub fn on_message(&mut self, payload: Value) -> SessionStep {
        match &self.state {
            SessionState::Unidentified | SessionState::Identifying => {
                match handshake_identity(&payload) {
                    Some(identity) => SessionStep::Register(identity),
                    None => SessionStep::Ignore,
                }
            }
            SessionState::Registered { uuid, session_id } => SessionStep::Record {
                uuid: uuid.clone(),
                session_id: *session_id,
                payload,
            },
            SessionState::Closed => SessionStep::Ignore,
        }
    }

    pub fn accept(&mut self, uuid: &str, session_id: Uuid) -> OutboundMessage {
        self.state = SessionState::Registered {
            uuid: uuid.to_string(),
            session_id,
        };
        OutboundMessage::Registered {
            uuid: uuid.to_string(),
        }
    }

    pub fn reject(&mut self, reason: RejectionReason) -> OutboundMessage {
        self.state = SessionState::Closed;
        OutboundMessage::Rejected { reason }
    }

    pub fn close(&mut self) -> Option<(String, Uuid)> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Registered { uuid, session_id } => Some((uuid, session_id)),
            _ => None,
        }
    }
}
