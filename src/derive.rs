//! Fields computed once per message at fetch time.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use regex::Regex;
use std::sync::LazyLock;
use url::{Host, Url};

use crate::model::{FetchedMessage, Mention, MentionKind, StoredMessage};

const INTERROGATIVES: &[&str] = &[
    "who", "what", "when", "where", "why", "how", "which", "can", "could", "should", "would",
    "does", "do", "is", "are", "will", "anyone",
];

/// An http(s) URL up to whitespace, quotes, pipes or a closing bracket.
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s<>"'`|()\[\]{}]+"#).expect("link pattern compiles")
});

const TRAILING_PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?'];

pub fn message_link(guild_id: Option<u64>, channel_id: u64, message_id: u64) -> String {
    match guild_id {
        Some(guild) => format!("https://discord.com/channels/{guild}/{channel_id}/{message_id}"),
        None => format!("https://discord.com/channels/@me/{channel_id}/{message_id}"),
    }
}

/// Builds the stored form of a fetched message.
pub fn derive_message(fetched: &FetchedMessage) -> StoredMessage {
    let content = fetched.content.as_str();
    let link_domains = link_domains(content);
    let prose = Prose::parse(content);

    StoredMessage {
        id: fetched.id,
        channel_id: fetched.channel_id,
        guild_id: fetched.guild_id,
        author_id: fetched.author.id,
        created_at: fetched.created_at,
        content: fetched.content.clone(),
        link: message_link(fetched.guild_id, fetched.channel_id, fetched.id),
        reactions_total: fetched.reactions.iter().map(|r| r.count).sum(),
        attachments_count: fetched.attachments.len() as u64,
        reply_to_id: fetched.reply_to_id,
        has_link: !link_domains.is_empty(),
        link_domains,
        word_count: word_count(content),
        has_code_block: prose.has_code_block,
        is_question: prose.is_question(),
        attachments: fetched.attachments.clone(),
        reactions: fetched.reactions.clone(),
        mentions: extract_mentions(content),
    }
}

pub fn word_count(content: &str) -> u64 {
    content.split_whitespace().count() as u64
}

/// Hosts of every http(s) URL in `content`, in first-seen order.
pub fn link_domains(content: &str) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();

    for span in LINK.find_iter(content) {
        let Some(host) = url_host(span.as_str()) else {
            continue;
        };
        if !domains.contains(&host) {
            domains.push(host);
        }
    }

    domains
}

fn url_host(span: &str) -> Option<String> {
    // Sentence punctuation right after a link is not part of it
    let span = span.trim_end_matches(TRAILING_PUNCTUATION);
    let url = Url::parse(span).ok()?;

    let host = match url.host()? {
        Host::Domain(domain) => domain.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some(host)
}

/// `<@id>`, `<@!id>`, `<@&id>`, `<#id>`, `@everyone` and `@here`, de-duplicated.
pub fn extract_mentions(content: &str) -> Vec<Mention> {
    let mut mentions: Vec<Mention> = Vec::new();
    let mut push = |mention: Mention| {
        if !mentions.contains(&mention) {
            mentions.push(mention);
        }
    };

    let mut rest = content;
    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        let (kind, body) = if let Some(b) = rest.strip_prefix("@&") {
            (MentionKind::Role, b)
        } else if let Some(b) = rest.strip_prefix("@!") {
            (MentionKind::User, b)
        } else if let Some(b) = rest.strip_prefix('@') {
            (MentionKind::User, b)
        } else if let Some(b) = rest.strip_prefix('#') {
            (MentionKind::Channel, b)
        } else {
            continue;
        };

        let Some(close) = body.find('>') else {
            continue;
        };
        if let Ok(id) = body[..close].parse::<u64>() {
            push(Mention {
                kind,
                target_id: Some(id),
            });
        }
    }

    if content.contains("@everyone") || content.contains("@here") {
        push(Mention {
            kind: MentionKind::Everyone,
            target_id: None,
        });
    }

    mentions
}

/// Text outside of code, as seen by the Markdown parser.
struct Prose {
    text: String,
    has_code_block: bool,
}

impl Prose {
    fn parse(content: &str) -> Self {
        let mut text = String::new();
        let mut has_code_block = false;
        let mut in_code_block = false;

        for event in Parser::new(content) {
            match event {
                Event::Start(Tag::CodeBlock(_)) => {
                    has_code_block = true;
                    in_code_block = true;
                }
                Event::End(TagEnd::CodeBlock) => {
                    in_code_block = false;
                    text.push('\n');
                }
                Event::Text(t) if !in_code_block => text.push_str(&t),
                Event::SoftBreak | Event::HardBreak => text.push('\n'),
                Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) => text.push('\n'),
                _ => {}
            }
        }

        Self {
            text,
            has_code_block,
        }
    }

    fn is_question(&self) -> bool {
        let mut chars = self.text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '?' {
                match chars.peek() {
                    None => return true,
                    Some(next) if next.is_whitespace() || matches!(next, ')' | '"' | '!' | '?') => {
                        return true
                    }
                    _ => {}
                }
            }
        }

        let first_word = self
            .text
            .split_whitespace()
            .find(|w| !w.starts_with("<@") && !w.starts_with('@'))
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            });
        matches!(first_word, Some(w) if INTERROGATIVES.contains(&w.as_str()))
    }
}
