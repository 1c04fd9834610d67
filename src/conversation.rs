//! Ordered, in-memory message history for one session.

use crate::constants::GREETING;
use crate::message::{Message, MessageId, MessagePatch};

/// Append-only message log. Only the message matching a given identity may be
/// changed after insertion, and nothing is ever removed.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    seeded: bool,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation opened by the model's greeting.
    pub fn with_greeting() -> Self {
        Self {
            messages: vec![Message::model(GREETING)],
            seeded: true,
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Patch the message carrying `id`. Returns false if no message matches.
    pub fn update_by_id(&mut self, id: MessageId, patch: MessagePatch) -> bool {
        match self.messages.iter_mut().find(|m| m.id == Some(id)) {
            Some(message) => {
                patch.apply(message);
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == Some(id))
    }

    /// Prior turns to send as model context, without the seed greeting.
    pub fn history(&self) -> Vec<Message> {
        let skip = usize::from(self.seeded);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
