use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::model::MessageRecord;

const SYSTEM_PROMPT: &str = "You are a concise summarizer for Discord conversations. \
Given recent snippets across channels, produce a clear digest with:\n\
- 3-6 bullets of key topics and decisions\n\
- Keep it neutral and helpful\n\
- Include notable links inline\n\
- Max 1200 characters total\n";

const CORPUS_MAX_CHARS: usize = 8000;
const SUMMARY_MAX_CHARS: usize = 1800;
const SNIPPET_CHARS: usize = 140;
const NAIVE_ITEMS: usize = 5;

pub struct Summarizer {
    llm: Option<LlmClient>,
}

impl Summarizer {
    pub fn new(llm: Option<LlmClient>) -> Self {
        Self { llm }
    }

    /// LLM summary of `messages`, or the extractive fallback when no endpoint
    /// is configured or the call fails or returns nothing.
    pub async fn summarize(&self, messages: &[MessageRecord]) -> String {
        let Some(llm) = &self.llm else {
            return naive_extract(messages);
        };

        let prompt = format!("Recent snippets:\n{}", prepare_corpus(messages, CORPUS_MAX_CHARS));
        info!("Summarizing {} messages with {}", messages.len(), llm.model());

        match llm.completion(SYSTEM_PROMPT, &prompt).await {
            Ok(text) if !text.trim().is_empty() => shorten(text.trim(), SUMMARY_MAX_CHARS, "…"),
            Ok(_) => {
                warn!("Summarizer: empty response, using extractive fallback");
                naive_extract(messages)
            }
            Err(e) => {
                warn!("Summarizer: LLM call failed ({}), using extractive fallback", e);
                naive_extract(messages)
            }
        }
    }
}

/// One bullet per message with its link, stopping once past `max_chars`.
pub fn prepare_corpus(messages: &[MessageRecord], max_chars: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut total = 0usize;

    for msg in messages {
        let content = collapse_whitespace(&msg.content);
        if content.is_empty() {
            continue;
        }
        let line = format!("- {} \n{}", content, msg.link);
        total += line.chars().count();
        lines.push(line);
        if total > max_chars {
            break;
        }
    }

    if lines.is_empty() {
        "(No substantive messages found in the window.)".to_string()
    } else {
        lines.join("\n")
    }
}

/// First few non-empty messages as short bulleted snippets with links.
pub fn naive_extract(messages: &[MessageRecord]) -> String {
    let lines: Vec<String> = messages
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .take(NAIVE_ITEMS)
        .map(|m| format!("- {} ({})", shorten(&m.content, SNIPPET_CHARS, " [...]"), m.link))
        .collect();

    if lines.is_empty() {
        "No notable messages detected in the window.".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapses whitespace and, when the result is wider than `width`
/// characters, drops trailing words until it fits with `placeholder` appended.
pub fn shorten(text: &str, width: usize, placeholder: &str) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(placeholder.chars().count());
    let mut out = String::new();
    let mut used = 0usize;
    for word in collapsed.split(' ') {
        let cost = word.chars().count() + usize::from(!out.is_empty());
        if used + cost > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        used += cost;
    }

    if out.is_empty() {
        // A single word wider than the budget is cut mid-word.
        out = collapsed.chars().take(budget).collect();
    }
    out.push_str(placeholder);
    out
}
