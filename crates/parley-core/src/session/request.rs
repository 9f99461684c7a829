//! Request types: parsed user input, resolved variables and the request record.

use super::response::ChatResponse;
use serde::{Deserialize, Serialize};

/// One structural piece of a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestPart {
    Text {
        offset: usize,
        text: String,
    },
    /// `@agent` mention.
    Agent { offset: usize, name: String },
    /// `/command` directed at the selected agent.
    SlashCommand { offset: usize, name: String },
    /// `#variable` or `#variable:arg` mention.
    Variable {
        offset: usize,
        name: String,
        #[serde(default)]
        arg: Option<String>,
    },
}

impl RequestPart {
    pub fn offset(&self) -> usize {
        match self {
            RequestPart::Text { offset, .. }
            | RequestPart::Agent { offset, .. }
            | RequestPart::SlashCommand { offset, .. }
            | RequestPart::Variable { offset, .. } => *offset,
        }
    }
}

/// A user message split into structured parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRequest {
    pub text: String,
    pub parts: Vec<RequestPart>,
}

impl ParsedRequest {
    /// A message with no mentions at all.
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        let parts = if text.is_empty() {
            Vec::new()
        } else {
            vec![RequestPart::Text {
                offset: 0,
                text: text.clone(),
            }]
        };
        Self { text, parts }
    }

    pub fn agent(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            RequestPart::Agent { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn command(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            RequestPart::SlashCommand { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.parts.iter().filter_map(|part| match part {
            RequestPart::Variable { name, arg, .. } => Some((name.as_str(), arg.as_deref())),
            _ => None,
        })
    }

    /// The text forwarded to the agent: agent and command mentions removed,
    /// variable mentions kept verbatim.
    pub fn prompt_text(&self) -> String {
        let mut prompt = String::new();
        for part in &self.parts {
            match part {
                RequestPart::Text { text, .. } => prompt.push_str(text),
                RequestPart::Variable { name, arg, .. } => {
                    prompt.push('#');
                    prompt.push_str(name);
                    if let Some(arg) = arg {
                        prompt.push(':');
                        prompt.push_str(arg);
                    }
                }
                RequestPart::Agent { .. } | RequestPart::SlashCommand { .. } => {}
            }
        }
        prompt.trim().to_string()
    }
}

/// One value produced by a variable resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub value: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl VariableValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: serde_json::Value::String(value.into()),
            description: None,
        }
    }
}

/// A variable mention together with whatever its resolver produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub name: String,
    #[serde(default)]
    pub arg: Option<String>,
    pub values: Vec<VariableValue>,
}

/// One user turn and its accumulated response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub request_id: String,
    pub session_id: String,
    pub message: ParsedRequest,
    pub variables: Vec<ResolvedVariable>,
    pub attempt: u32,
    pub agent_id: Option<String>,
    pub command: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub response: ChatResponse,
}
