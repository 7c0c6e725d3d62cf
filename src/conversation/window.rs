//! Bounded context window submitted to the completion provider.

use super::{ChatMessage, ChatTurn, CompletionRequest, OutputStyle, ProviderRole};

/// Most prior entries carried into one provider call.
pub const MAX_PRIOR_MESSAGES: usize = 6;

/// Entries at the tail of the client history that belong to the turn being
/// asked: the just-appended user prompt and the empty reply placeholder.
const PENDING_TURN_ENTRIES: usize = 2;

const CONCISE_PREAMBLE: &str = "You are a 'TL;DR' bot specializing in interview responses. \
Your single most important goal is extreme brevity. Get directly to the point. \
Omit all conversational fluff, introductions, and summaries or examples. \
Use a maximum of 3 bullet points with a description of no more than one line each, or a short paragraph.";

const THOROUGH_PREAMBLE: &str = "You are an AI Assistant. Your goal is to provide comprehensive, educational answers. \
Explain concepts thoroughly. When applicable, structure your response by providing a clear definition, \
followed by practical examples, and concluding with strategic advice for the interview. \
Use formatting like **bolding** for key terms to enhance clarity.";

/// System preamble for a style.
pub fn preamble(style: OutputStyle) -> &'static str {
    match style {
        OutputStyle::Short => CONCISE_PREAMBLE,
        OutputStyle::Long => THOROUGH_PREAMBLE,
    }
}

/// The messages for one completion turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    pub system_preamble: &'static str,
    pub prior_messages: Vec<ChatTurn>,
    pub new_prompt: String,
}

impl ContextWindow {
    /// Build the window from a full client-side history.
    ///
    /// The two most recent entries are the pending prompt and its reply
    /// placeholder; they are dropped, then at most [`MAX_PRIOR_MESSAGES`] of
    /// the remaining entries are kept, newest last.
    pub fn build(history: &[ChatTurn], new_prompt: impl Into<String>, style: OutputStyle) -> Self {
        let settled = &history[..history.len().saturating_sub(PENDING_TURN_ENTRIES)];
        Self {
            system_preamble: preamble(style),
            prior_messages: most_recent(settled),
            new_prompt: new_prompt.into(),
        }
    }

    /// Rebuild the window on the relay side from a request whose history was
    /// already windowed by the client.
    ///
    /// Nothing is dropped, but the history is still capped so the provider
    /// context stays bounded whatever the caller sends.
    pub fn from_request(request: CompletionRequest) -> Self {
        let style = request.style();
        Self {
            system_preamble: preamble(style),
            prior_messages: most_recent(&request.history),
            new_prompt: request.prompt,
        }
    }

    /// Wire request a client sends for this window.
    pub fn to_request(&self, style: OutputStyle) -> CompletionRequest {
        CompletionRequest {
            history: self.prior_messages.clone(),
            prompt: self.new_prompt.clone(),
            output_style: Some(style),
        }
    }

    /// Provider message list: preamble, prior entries, then the prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.prior_messages.len() + 2);
        messages.push(ChatMessage {
            role: ProviderRole::System,
            content: self.system_preamble.to_string(),
        });
        messages.extend(self.prior_messages.iter().map(|turn| ChatMessage {
            role: turn.role.into(),
            content: turn.content.clone(),
        }));
        messages.push(ChatMessage {
            role: ProviderRole::User,
            content: self.new_prompt.clone(),
        });
        messages
    }
}

fn most_recent(history: &[ChatTurn]) -> Vec<ChatTurn> {
    let start = history.len().saturating_sub(MAX_PRIOR_MESSAGES);
    history[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    fn history(n: usize) -> Vec<ChatTurn> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                ChatTurn::new(role, format!("m{}", i))
            })
            .collect()
    }

    #[test]
    fn test_prior_message_count() {
        for n in 0..12 {
            let window = ContextWindow::build(&history(n), "next", OutputStyle::Short);
            let expected = MAX_PRIOR_MESSAGES.min(n.saturating_sub(2));
            assert_eq!(window.prior_messages.len(), expected, "history of {}", n);
        }
    }

    #[test]
    fn test_keeps_most_recent_in_order() {
        let window = ContextWindow::build(&history(10), "next", OutputStyle::Short);
        let contents: Vec<&str> = window.prior_messages.iter().map(|t| t.content.as_str()).collect();
        // m8 and m9 are the pending prompt and placeholder
        assert_eq!(contents, vec!["m2", "m3", "m4", "m5", "m6", "m7"]);
    }

    #[test]
    fn test_prompt_is_last_message() {
        let window = ContextWindow::build(&history(5), "the prompt", OutputStyle::Long);
        let messages = window.messages();

        assert_eq!(messages.len(), 1 + 3 + 1);
        assert_eq!(messages[0].role, ProviderRole::System);
        assert_eq!(messages[0].content, THOROUGH_PREAMBLE);
        let last = messages.last().unwrap();
        assert_eq!(last.role, ProviderRole::User);
        assert_eq!(last.content, "the prompt");
    }

    #[test]
    fn test_style_selects_preamble() {
        assert_eq!(preamble(OutputStyle::default()), CONCISE_PREAMBLE);
        assert_eq!(preamble(OutputStyle::Short), CONCISE_PREAMBLE);
        assert_eq!(preamble(OutputStyle::Long), THOROUGH_PREAMBLE);
    }

    #[test]
    fn test_from_request_caps_without_dropping() {
        let request = CompletionRequest {
            history: history(3),
            prompt: "p".to_string(),
            output_style: None,
        };
        let window = ContextWindow::from_request(request);
        assert_eq!(window.prior_messages, history(3));
        assert_eq!(window.system_preamble, CONCISE_PREAMBLE);

        let request = CompletionRequest {
            history: history(9),
            prompt: "p".to_string(),
            output_style: Some(OutputStyle::Long),
        };
        let window = ContextWindow::from_request(request);
        assert_eq!(window.prior_messages, history(9)[3..].to_vec());
    }

    #[test]
    fn test_client_request_round_trips_through_relay() {
        let client_side = ContextWindow::build(&history(4), "p", OutputStyle::Long);
        let relay_side = ContextWindow::from_request(client_side.to_request(OutputStyle::Long));
        assert_eq!(client_side, relay_side);
    }
}
