//! Topic template parsing and rendering

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use super::{sanitize, TopicBuffer, TopicError};
use crate::event::{Event, Value};

/// Names a token can resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKey {
    /// Local short hostname
    Hostname,
    Type,
    Model,
    Subtype,
    Channel,
    Id,
    Protocol,
}

impl TokenKey {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hostname" => Some(Self::Hostname),
            "type" => Some(Self::Type),
            "model" => Some(Self::Model),
            "subtype" => Some(Self::Subtype),
            "channel" => Some(Self::Channel),
            "id" => Some(Self::Id),
            "protocol" => Some(Self::Protocol),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hostname => "hostname",
            Self::Type => "type",
            Self::Model => "model",
            Self::Subtype => "subtype",
            Self::Channel => "channel",
            Self::Id => "id",
            Self::Protocol => "protocol",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    separator: Option<char>,
    key: TokenKey,
    default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A parsed topic template
///
/// Syntax: literal text with tokens `[<sep><key>[:default]]`. The optional
/// separator is a single non-alphanumeric character emitted only when the
/// token renders to something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TopicTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '[' {
                literal.push(c);
                continue;
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let separator = match chars.peek() {
                Some(&s) if !s.is_ascii_alphanumeric() && !matches!(s, ']' | '[') => {
                    chars.next();
                    Some(s)
                }
                _ => None,
            };

            let mut name = String::new();
            while let Some(&k) = chars.peek() {
                if matches!(k, ':' | ']' | '[') {
                    break;
                }
                name.push(k);
                chars.next();
            }

            let default = if chars.peek() == Some(&':') {
                chars.next();
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if matches!(d, ']' | '[') {
                        break;
                    }
                    text.push(d);
                    chars.next();
                }
                Some(text)
            } else {
                None
            };

            if chars.next() != Some(']') {
                return Err(TemplateError::Unterminated {
                    template: template.to_string(),
                });
            }

            let key = TokenKey::from_name(&name).ok_or(TemplateError::UnknownKey { key: name })?;
            segments.push(Segment::Token(Token {
                separator,
                key,
                default,
            }));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Keys referenced by the template's tokens, in order
    pub fn keys(&self) -> impl Iterator<Item = TokenKey> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Token(t) => Some(t.key),
            Segment::Literal(_) => None,
        })
    }

    /// Append the rendered template to `topic`, returning the new length
    ///
    /// On overflow the topic is restored to its length before the call.
    pub fn render(
        &self,
        topic: &mut TopicBuffer,
        event: &Event,
        hostname: &str,
    ) -> Result<usize, TopicError> {
        let start = topic.mark();
        match self.render_segments(topic, event, hostname) {
            Ok(()) => Ok(topic.len()),
            Err(e) => {
                topic.truncate(start);
                Err(e)
            }
        }
    }

    fn render_segments(
        &self,
        topic: &mut TopicBuffer,
        event: &Event,
        hostname: &str,
    ) -> Result<(), TopicError> {
        for segment in &self.segments {
            let token = match segment {
                Segment::Literal(text) => {
                    topic.push_str(text)?;
                    continue;
                }
                Segment::Token(token) => token,
            };

            let resolved = match token.key {
                TokenKey::Hostname => Some(Cow::Borrowed(hostname)),
                key => event.get(key.as_str()).and_then(token_text),
            };
            let text = resolved
                .filter(|s| !s.is_empty())
                .or_else(|| token.default.as_deref().map(Cow::Borrowed));

            if let Some(text) = text {
                if let Some(separator) = token.separator {
                    topic.push_char(separator)?;
                }
                topic.push_str(&text)?;
            }
        }
        Ok(())
    }
}

/// Strings are sanitized, integers rendered in decimal, anything else is unresolved
fn token_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Owned(sanitize(s))),
        Value::Int(i) => Some(Cow::Owned(i.to_string())),
        _ => None,
    }
}

impl FromStr for TopicTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Template parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A `[` without a matching `]`
    Unterminated { template: String },
    /// A token naming a key that cannot be resolved
    UnknownKey { key: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unterminated { template } => {
                write!(f, "unterminated token in topic template \"{}\"", template)
            }
            Self::UnknownKey { key } => write!(f, "unknown token \"{}\"", key),
        }
    }
}

impl std::error::Error for TemplateError {}
