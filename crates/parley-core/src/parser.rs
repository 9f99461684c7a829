//! Splits a raw user message into agent, command, variable and text parts.
//!
//! Rules:
//! - `@agent` is recognised only before any other content and only for a
//!   registered agent.
//! - `/command` is recognised only before any text (an agent mention may
//!   precede it) and only when the selected agent declares it.
//! - `#name` / `#name:arg` is recognised anywhere for registered variables.
//!
//! A mention must start the message or follow whitespace. Anything not
//! recognised stays text. Offsets are byte offsets into the original message.

use crate::agent::AgentMetadata;
use crate::session::{ParsedRequest, RequestPart};
use regex::Regex;
use std::sync::LazyLock;

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(?P<agent>[\w.\-]+)|/(?P<command>[\w\-]+)|#(?P<var>[\w\-]+)(?::(?P<arg>\S+))?")
        .expect("mention pattern is valid")
});

/// What the parser needs to know about registered agents and variables.
pub trait ParserContext {
    fn agent(&self, id: &str) -> Option<&AgentMetadata>;
    fn default_agent(&self) -> Option<&AgentMetadata>;
    fn has_variable(&self, name: &str) -> bool;
}

pub fn parse_request(text: &str, context: &dyn ParserContext) -> ParsedRequest {
    let mut parts = Vec::new();
    let mut text_start = 0;
    let mut agent: Option<&AgentMetadata> = None;
    let mut command_seen = false;
    // Becomes true once free text or a variable has been emitted.
    let mut content_seen = false;

    for captures in MENTION.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let start = whole.start();
        let at_boundary = text[..start]
            .chars()
            .next_back()
            .is_none_or(char::is_whitespace);
        if !at_boundary {
            continue;
        }

        let leading = &text[text_start..start];
        let only_whitespace_before = !content_seen && leading.trim().is_empty();

        let part = if let Some(name) = captures.name("agent") {
            match context.agent(name.as_str()) {
                Some(found) if agent.is_none() && !command_seen && only_whitespace_before => {
                    agent = Some(found);
                    Some(RequestPart::Agent {
                        offset: start,
                        name: found.id.clone(),
                    })
                }
                _ => None,
            }
        } else if let Some(name) = captures.name("command") {
            let target = agent.or_else(|| context.default_agent());
            match target {
                Some(target)
                    if !command_seen
                        && only_whitespace_before
                        && target.has_command(name.as_str()) =>
                {
                    command_seen = true;
                    Some(RequestPart::SlashCommand {
                        offset: start,
                        name: name.as_str().to_string(),
                    })
                }
                _ => None,
            }
        } else if let Some(name) = captures.name("var") {
            if context.has_variable(name.as_str()) {
                Some(RequestPart::Variable {
                    offset: start,
                    name: name.as_str().to_string(),
                    arg: captures.name("arg").map(|a| a.as_str().to_string()),
                })
            } else {
                None
            }
        } else {
            None
        };

        let Some(part) = part else {
            continue;
        };

        if !leading.is_empty() {
            if !leading.trim().is_empty() {
                content_seen = true;
            }
            parts.push(RequestPart::Text {
                offset: text_start,
                text: leading.to_string(),
            });
        }
        if matches!(part, RequestPart::Variable { .. }) {
            content_seen = true;
        }
        parts.push(part);
        text_start = whole.end();
    }

    if text_start < text.len() {
        parts.push(RequestPart::Text {
            offset: text_start,
            text: text[text_start..].to_string(),
        });
    }

    ParsedRequest {
        text: text.to_string(),
        parts,
    }
}
