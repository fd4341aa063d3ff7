//! Conversation summarization.
//!
//! Compresses a window of conversation turns into one [`MemoryEntry`] by
//! routing a memory-role request.  The instruction text is supplied by the
//! caller as a [`SummaryPrompt`] template; a neutral default is provided.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use companion_router::{ChatPayload, ProviderRole, RequestRouter};
use tracing::{debug, info, warn};

use crate::error::SummarizeFailure;
use crate::store::{self, MemoryEntry};
use crate::turn::ConversationTurn;

/// Instruction template for memory summarization.
///
/// Placeholders: `{timestamp}`, `{summary_chars}` and `{conversation}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryPrompt {
    template: String,
}

impl Default for SummaryPrompt {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TEMPLATE)
    }
}

impl SummaryPrompt {
    pub const DEFAULT_TEMPLATE: &'static str = "\
Write ONE memory entry that captures what happened in the conversation segment below.
Focus on concrete events and topics. Do not invent anything that is not in the conversation.

Use exactly this format and nothing else:

## Memory Entry [{timestamp}]
**Importance**: X
**Summary**: (one paragraph)

X is one of 1, 2, 3, 4, 5:
5 = strong emotions or a key turning point
4 = clearly important or meaningful
3 = an ordinary moment worth remembering
2 = light small talk
1 = almost trivial

Keep the summary to roughly {summary_chars} characters of plain prose, no lists.

Conversation:

{conversation}
";

    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, timestamp: NaiveDateTime, summary_chars: usize, conversation: &str) -> String {
        self.template
            .replace("{timestamp}", &timestamp.format("%Y-%m-%d %A %H:%M").to_string())
            .replace("{summary_chars}", &summary_chars.to_string())
            .replace("{conversation}", conversation)
    }
}

/// Parse raw model output into `(summary, importance)`.
///
/// Importance comes from an explicit marker, clamped into `1..=5`, or falls
/// back to `default_importance`.  Returns `None` when there is no summary
/// text at all.
pub fn parse_summary_output(raw: &str, default_importance: u8) -> Option<(String, u8)> {
    let summary = store::parse_summary(raw);
    if summary.is_empty() {
        return None;
    }
    let importance = store::parse_importance(raw).unwrap_or(default_importance);
    Some((summary, importance))
}

/// Turns a window of conversation into a [`MemoryEntry`] via the router.
#[derive(Debug)]
pub struct Summarizer {
    router: Arc<RequestRouter>,
    prompt: SummaryPrompt,
    summary_chars: usize,
    default_importance: u8,
}

impl Summarizer {
    pub fn new(router: Arc<RequestRouter>, prompt: SummaryPrompt) -> Self {
        Self {
            router,
            prompt,
            summary_chars: 400,
            default_importance: store::DEFAULT_IMPORTANCE,
        }
    }

    /// Target summary length hinted to the model.
    pub fn with_summary_chars(mut self, chars: usize) -> Self {
        self.summary_chars = chars;
        self
    }

    pub fn with_default_importance(mut self, importance: u8) -> Self {
        self.default_importance = importance;
        self
    }

    pub fn router(&self) -> &Arc<RequestRouter> {
        &self.router
    }

    /// Summarize `turns` into one entry.  Nothing is persisted here.
    pub async fn summarize(
        &self,
        turns: &[ConversationTurn],
    ) -> std::result::Result<MemoryEntry, SummarizeFailure> {
        let now = Local::now().naive_local();
        let conversation = turns
            .iter()
            .map(ConversationTurn::render)
            .collect::<Vec<_>>()
            .join("\n");

        let payload = ChatPayload::prompt(self.prompt.render(now, self.summary_chars, &conversation));
        debug!(turns = turns.len(), chars = conversation.len(), "summarizing conversation");

        let reply = self.router.route(ProviderRole::Memory, &payload).await?;

        let Some((summary, importance)) = parse_summary_output(&reply.text, self.default_importance)
        else {
            warn!(provider = %reply.provider_id, "memory provider returned no summary text");
            return Err(SummarizeFailure::EmptySummary);
        };

        info!(
            provider = %reply.provider_id,
            turns = turns.len(),
            importance,
            summary_chars = summary.chars().count(),
            "conversation summarized"
        );
        Ok(MemoryEntry::new(now, &summary, importance))
    }
}
