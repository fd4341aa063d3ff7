//! Chat prompt assembly.
//!
//! The chat request carries, in order: an optional persona system message
//! with the current local time, then one user message holding the tail of
//! long-term memory, the tail of today's conversation and the new user text.

use chrono::{Local, NaiveDateTime};
use companion_router::{ChatMessage, ChatPayload};

use crate::buffer::ConversationBuffer;
use crate::error::Result;
use crate::store::MemoryStore;

/// Budgets for each context block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub long_memory_chars: usize,
    pub recent_turns: usize,
    pub recent_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            long_memory_chars: 1500,
            recent_turns: 50,
            recent_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    persona: Option<String>,
    limits: ContextLimits,
}

impl ContextBuilder {
    pub fn new(limits: ContextLimits) -> Self {
        Self {
            persona: None,
            limits,
        }
    }

    /// Persona and style text, sent as the system message.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        let persona = persona.into();
        self.persona = (!persona.trim().is_empty()).then_some(persona);
        self
    }

    /// Build the payload for `user_text`.  Call this before recording the
    /// user turn, otherwise it appears twice.
    pub async fn build(
        &self,
        store: &MemoryStore,
        buffer: &ConversationBuffer,
        user_text: &str,
    ) -> Result<ChatPayload> {
        let memory = store.render_tail(self.limits.long_memory_chars)?;
        let recent = buffer
            .render_recent(self.limits.recent_turns, self.limits.recent_chars)
            .await;
        Ok(self.assemble(Local::now().naive_local(), &memory, &recent, user_text))
    }

    fn assemble(
        &self,
        now: NaiveDateTime,
        memory: &str,
        recent: &str,
        user_text: &str,
    ) -> ChatPayload {
        let mut blocks = Vec::with_capacity(3);
        if !memory.trim().is_empty() {
            blocks.push(format!("[Long-term memory]\n{}", memory.trim()));
        }
        if !recent.trim().is_empty() {
            blocks.push(format!("[Recent conversation]\n{}", recent.trim()));
        }
        blocks.push(format!("[User]\n{user_text}"));

        let mut messages = Vec::with_capacity(2);
        if let Some(persona) = &self.persona {
            messages.push(ChatMessage::system(format!(
                "{persona}\n\nCurrent local time is {}. Do not mention the exact timestamp.",
                now.format("%Y-%m-%d %H:%M")
            )));
        }
        messages.push(ChatMessage::user(blocks.join("\n\n")));
        ChatPayload::new(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SizeUnit;
    use crate::store::MemoryEntry;
    use crate::turn::ConversationTurn;
    use companion_router::MessageRole;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-10-18 20:30", "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn blocks_appear_in_order() {
        let builder = ContextBuilder::default().with_persona("You are kind.");
        let payload = builder.assemble(now(), "memory text", "User: hi", "how are you?");

        assert_eq!(payload.messages.len(), 2);
        assert_eq!(payload.messages[0].role, MessageRole::System);
        assert!(payload.messages[0].content.contains("2026-10-18 20:30"));

        let user = &payload.messages[1].content;
        let memory_at = user.find("[Long-term memory]").unwrap();
        let recent_at = user.find("[Recent conversation]").unwrap();
        let user_at = user.find("[User]\nhow are you?").unwrap();
        assert!(memory_at < recent_at && recent_at < user_at);
    }

    #[test]
    fn empty_blocks_are_omitted() {
        let payload = ContextBuilder::default().assemble(now(), "", "  ", "hello");
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(payload.messages[0].content, "[User]\nhello");
    }

    #[tokio::test]
    async fn build_clips_memory_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("memory.md"), 3).unwrap();
        store.append(&MemoryEntry::now(&"x".repeat(500), 3)).await.unwrap();
        let buffer = ConversationBuffer::in_memory(SizeUnit::Turns);
        for i in 0..20 {
            buffer
                .append(ConversationTurn::user(format!("line {i}")))
                .await
                .unwrap();
        }

        let builder = ContextBuilder::new(ContextLimits {
            long_memory_chars: 100,
            recent_turns: 5,
            recent_chars: 2000,
        });
        let payload = builder.build(&store, &buffer, "latest").await.unwrap();
        let content = &payload.messages[0].content;

        let memory_block = content
            .split("\n\n")
            .next()
            .unwrap()
            .trim_start_matches("[Long-term memory]\n");
        assert_eq!(memory_block.chars().count(), 100);
        assert!(content.contains("line 19"));
        assert!(!content.contains("line 14"));
    }
}
