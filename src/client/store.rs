//! Ordered, bounded list of displayed messages.
//!
//! At most one message is streaming at a time and it is always the last one.

use crate::conversation::{ChatTurn, Role};

/// Messages kept before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    messages: Vec<Message>,
    capacity: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ConversationStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add content to the conversation.
    ///
    /// Content for the same role as a streaming tail is concatenated into it.
    /// Anything else settles the tail and starts a new message.
    pub fn append(&mut self, role: Role, content: &str, is_streaming: bool) {
        if let Some(last) = self.messages.last_mut() {
            if last.is_streaming && last.role == role {
                last.content.push_str(content);
                last.is_streaming = is_streaming;
                return;
            }
            last.is_streaming = false;
        }

        self.messages.push(Message {
            role,
            content: content.to_string(),
            is_streaming,
        });

        if self.messages.len() > self.capacity {
            let excess = self.messages.len() - self.capacity;
            self.messages.drain(..excess);
        }
    }

    /// Empty assistant placeholder that stream content is appended to.
    pub fn begin_reply(&mut self) {
        self.append(Role::Assistant, "", true);
    }

    /// Mark the streaming tail, if any, as finished.
    pub fn settle_reply(&mut self) {
        if let Some(last) = self.messages.last_mut() {
            last.is_streaming = false;
        }
    }

    /// Replace a streaming assistant reply with `text`, or add `text` as a
    /// new assistant message when the tail is anything else.
    pub fn fail_reply(&mut self, text: &str) {
        match self.messages.last_mut() {
            Some(last) if last.is_streaming && last.role == Role::Assistant => {
                last.content = text.to_string();
                last.is_streaming = false;
            }
            _ => self.append(Role::Assistant, text, false),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.last().filter(|message| message.is_streaming)
    }

    /// Wire history for the next completion request.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .map(|message| ChatTurn::new(message.role, message.content.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_count(store: &ConversationStore) -> usize {
        store.messages().iter().filter(|m| m.is_streaming).count()
    }

    #[test]
    fn test_streaming_tail_coalesces() {
        let mut store = ConversationStore::default();
        store.append(Role::User, "hello", false);
        store.begin_reply();
        store.append(Role::Assistant, "Hi", true);
        store.append(Role::Assistant, " there", true);

        assert_eq!(store.len(), 2);
        assert_eq!(store.streaming_message().unwrap().content, "Hi there");

        store.settle_reply();
        assert!(store.streaming_message().is_none());
    }

    #[test]
    fn test_settled_messages_do_not_coalesce() {
        let mut store = ConversationStore::default();
        store.append(Role::Assistant, "one", false);
        store.append(Role::Assistant, "two", false);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_new_message_settles_streaming_tail() {
        let mut store = ConversationStore::default();
        store.begin_reply();
        store.append(Role::Assistant, "partial", true);
        store.append(Role::User, "interrupt", false);

        assert_eq!(streaming_count(&store), 0);
        assert_eq!(store.messages()[0].content, "partial");

        store.begin_reply();
        store.append(Role::User, "again", true);
        assert_eq!(streaming_count(&store), 1);
        assert_eq!(store.streaming_message().unwrap().role, Role::User);
    }

    #[test]
    fn test_fail_reply_overwrites_placeholder() {
        let mut store = ConversationStore::default();
        store.begin_reply();
        store.append(Role::Assistant, "half an ans", true);
        store.fail_reply("sorry");

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].content, "sorry");
        assert!(!store.messages()[0].is_streaming);

        store.fail_reply("sorry again");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_fail_reply_keeps_streaming_user_message() {
        let mut store = ConversationStore::default();
        store.append(Role::User, "still talk", true);
        store.fail_reply("sorry");

        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[0].role, Role::User);
        assert_eq!(store.messages()[0].content, "still talk");
        assert!(!store.messages()[0].is_streaming);
        assert_eq!(store.messages()[1].role, Role::Assistant);
        assert_eq!(store.messages()[1].content, "sorry");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = ConversationStore::with_capacity(3);
        for i in 0..5 {
            store.append(Role::User, &format!("m{}", i), false);
        }
        let contents: Vec<_> = store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_history_mirrors_messages() {
        let mut store = ConversationStore::default();
        store.append(Role::User, "q", false);
        store.begin_reply();
        assert_eq!(store.history(), vec![ChatTurn::user("q"), ChatTurn::assistant("")]);
    }
}
