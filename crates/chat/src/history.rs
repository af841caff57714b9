use crate::message::ChatMessage;

/// Ordered list of finalized chat exchanges.
///
/// Entries are never edited in place; a newer server copy of the same
/// exchange replaces the old record as a whole.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn latest(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Most recent exchange whose user text matches `message`.
    pub fn latest_with_message(&self, message: &str) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|candidate| candidate.message == message)
    }

    /// Swaps the record stored under `id` for `record`.
    ///
    /// Returns `false` when no entry has that id.
    pub fn supersede(&mut self, id: &str, record: ChatMessage) -> bool {
        let Some(slot) = self.messages.iter_mut().find(|message| message.id == id) else {
            return false;
        };
        *slot = record;
        true
    }
}
