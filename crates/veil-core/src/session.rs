use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::message::{Message, Role};

/// Title a session carries until the first prompt names it.
pub const DEFAULT_TITLE: &str = "New chat";

/// A chat session: ordered message history plus a rolling summary that
/// compaction maintains. The id is immutable; everything else mutates only
/// through `SessionStore::update`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub summary: String,
    pub messages: Vec<Message>,
    #[serde(default = "now_rfc3339")]
    pub created_at: String,
    #[serde(default = "now_rfc3339")]
    pub updated_at: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

impl ChatSession {
    pub fn new() -> Self {
        let now = now_rfc3339();
        Self {
            id: SessionId::new(),
            title: DEFAULT_TITLE.to_string(),
            summary: String::new(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Grow the most recent assistant message in place. No-op if the history
    /// is empty or the last message is not an assistant one — only the
    /// streaming slot is mutable.
    pub fn append_to_last_assistant(&mut self, fragment: &str) {
        if let Some(last) = self.messages.last_mut() {
            if last.role == Role::Assistant {
                last.content.push_str(fragment);
            }
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
