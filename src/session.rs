use crate::models::Role;
use crate::settings::SessionSettings;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl TranscriptRole {
    /// Role the entry takes when replayed into model-side history.
    pub fn model_role(self) -> Role {
        match self {
            TranscriptRole::User => Role::User,
            TranscriptRole::Assistant => Role::Model,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub role: TranscriptRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub id: Uuid,
    pub tool: String,
    pub summary: String,
    pub status: ToolStatus,
    pub created_at: DateTime<Utc>,
}

/// Everything the UI shell keeps for one browser or terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every access from the UI shell; idle sessions are swept.
    #[serde(default = "Utc::now")]
    pub last_active: DateTime<Utc>,
    pub transcript: Vec<TranscriptEntry>,
    pub tool_history: Vec<ToolEvent>,
    pub settings: SessionSettings,
}

impl Session {
    pub fn new(client_id: Option<String>, settings: SessionSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id,
            created_at: now,
            last_active: now,
            transcript: Vec::new(),
            tool_history: Vec::new(),
            settings,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_idle(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.last_active >= ttl
    }

    pub fn push_turn(&mut self, role: TranscriptRole, content: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        });
    }
}
