//! Directive tokens: device actions embedded in model output.
//!
//! # Grammar
//!
//! ```text
//! directive := "[ACTION:" name "." name ":" object "]"
//! name      := [A-Za-z_]+
//! object    := "{" <any chars except newline, up to the first "}]"> "}"
//! ```
//!
//! The object ends at the first `}]` on the same line. Model output that
//! puts `}]` inside the object is cut short there; [`ParsedCommand::to_token`]
//! never produces such a pair.
//!
//! One left-to-right scanner serves both [`extract`] and [`sanitize`]. A span
//! that matches the grammar but whose object is not valid JSON is
//! *malformed*: extraction skips it and sanitizing leaves it verbatim.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, warn};

const OPEN: &str = "[ACTION:";

/// A device action requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ParsedCommand {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            data,
        }
    }

    /// `domain.service`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Targets named by `entity_id`, which may be a string or a list.
    pub fn entity_ids(&self) -> Vec<String> {
        match self.data.get("entity_id") {
            Some(serde_json::Value::String(id)) => vec![id.clone()],
            Some(serde_json::Value::Array(ids)) => ids
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Encode as a directive token that [`extract`] reads back unchanged.
    ///
    /// A `]` inside a string is written as `\u005d` and a `]` closing an
    /// array right after an object gets a leading space, so the encoded
    /// object never contains the `}]` terminator.
    pub fn to_token(&self) -> String {
        let object = serde_json::Value::Object(self.data.clone()).to_string();
        format!(
            "{OPEN}{}.{}:{}]",
            self.domain,
            self.service,
            escape_terminators(&object)
        )
    }

    /// The user-facing sentence that replaces this command's token.
    pub fn confirmation(&self) -> String {
        let entities = self.entity_ids();
        let target = (!entities.is_empty()).then(|| entities.join(", "));

        match (self.service.as_str(), target) {
            ("turn_on", Some(t)) => format!("I've turned on {t}."),
            ("turn_on", None) => "I've turned it on.".to_string(),
            ("turn_off", Some(t)) => format!("I've turned off {t}."),
            ("turn_off", None) => "I've turned it off.".to_string(),
            ("set_temperature", target) => {
                let target = target.unwrap_or_else(|| "the thermostat".to_string());
                match self.data.get("temperature") {
                    Some(serde_json::Value::String(t)) => {
                        format!("I've set {target} to {t} degrees.")
                    }
                    Some(t @ serde_json::Value::Number(_)) => {
                        format!("I've set {target} to {t} degrees.")
                    }
                    _ => format!("I've set {target} to a new temperature."),
                }
            }
            (_, Some(t)) => format!("I've executed {} on {t}.", self.qualified_name()),
            (_, None) => format!("I've executed {}.", self.qualified_name()),
        }
    }
}

/// Rewrite compact JSON so no `}]` pair survives, in or out of strings.
fn escape_terminators(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut prev = '\0';

    for c in json.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                ']' => {
                    out.push_str("\\u005d");
                    prev = c;
                    continue;
                }
                _ => {}
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ']' && prev == '}' {
            out.push(' ');
        }
        out.push(c);
        prev = c;
    }
    out
}

/// Why a grammatically matched directive was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("invalid JSON in {domain}.{service} directive: {message}")]
    InvalidJson {
        domain: String,
        service: String,
        message: String,
    },
}

/// One grammar match found by [`scan`].
#[derive(Debug, Clone, PartialEq)]
pub struct Directive<'a> {
    /// Byte range of the whole token in the scanned text
    pub span: Range<usize>,
    /// The token text, brackets included
    pub raw: &'a str,
    pub parsed: Result<ParsedCommand, DirectiveError>,
}

/// Find every directive token in `text`, left to right, non-overlapping.
pub fn scan(text: &str) -> Vec<Directive<'_>> {
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(OPEN) {
        let start = pos + offset;
        match match_at(text, start) {
            Some((end, domain, service, object)) => {
                let parsed = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(object)
                    .map(|data| ParsedCommand::new(domain, service, data))
                    .map_err(|e| DirectiveError::InvalidJson {
                        domain: domain.to_string(),
                        service: service.to_string(),
                        message: e.to_string(),
                    });
                found.push(Directive {
                    span: start..end,
                    raw: &text[start..end],
                    parsed,
                });
                pos = end;
            }
            // "[ACTION:" is ASCII, so start + 1 is a char boundary
            None => pos = start + 1,
        }
    }

    found
}

/// Match the grammar at `start`, which must point at `[ACTION:`.
///
/// Returns the end offset (exclusive) and the domain, service and object
/// slices.
fn match_at(text: &str, start: usize) -> Option<(usize, &str, &str, &str)> {
    let rest = &text[start + OPEN.len()..];

    let (domain, rest) = take_name(rest)?;
    let rest = rest.strip_prefix('.')?;
    let (service, rest) = take_name(rest)?;
    let rest = rest.strip_prefix(':')?;
    if !rest.starts_with('{') {
        return None;
    }

    // Shortest object: the first "}]" after the opening brace, same line
    let close = rest[1..].find("}]")? + 1;
    let object = &rest[..=close];
    if object.contains('\n') {
        return None;
    }

    let end = text.len() - rest.len() + close + 2;
    Some((end, domain, service, object))
}

fn take_name(s: &str) -> Option<(&str, &str)> {
    let len = s
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic() || *b == b'_')
        .count();
    (len > 0).then(|| s.split_at(len))
}

/// Every well-formed command in `text`, in order of appearance.
///
/// Malformed tokens are logged and skipped.
pub fn extract(text: &str) -> Vec<ParsedCommand> {
    scan(text)
        .into_iter()
        .filter_map(|d| match d.parsed {
            Ok(command) => Some(command),
            Err(e) => {
                warn!(token = d.raw, error = %e, "Skipping malformed directive");
                None
            }
        })
        .collect()
}

/// Replace each well-formed token with its confirmation sentence.
///
/// Malformed tokens stay in the text as written.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for directive in scan(text) {
        match &directive.parsed {
            Ok(command) => {
                out.push_str(&text[last..directive.span.start]);
                out.push_str(&command.confirmation());
                last = directive.span.end;
            }
            Err(e) => debug!(token = directive.raw, error = %e, "Leaving malformed directive in reply"),
        }
    }

    out.push_str(&text[last..]);
    out
}
