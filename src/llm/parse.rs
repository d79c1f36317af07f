//! Tolerant parsing of model output
//!
//! Model replies are loosely typed text. They may be wrapped in code fences,
//! contain `\'` escapes that JSON does not allow, or use Python literals
//! (`True`, `False`, `None`). Parsing runs a strict pass first and a repaired
//! pass second; anything still unusable becomes [`Parsed::Malformed`] and never
//! masquerades as a candidate.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::models::{
    coerce_f64, HandleStatus, PerAuthorStatus, PollCandidate, SamplePost, SourceGroup,
    StatsSnapshot,
};
use crate::utils::error::ParseError;
use crate::utils::{normalize_handle, truncate_text};

/// Result of parsing a loosely typed response
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    /// Structured data recovered
    Ok(T),
    /// Raw text that could not be understood
    Malformed(String),
}

impl<T> Parsed<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            Self::Malformed(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Statuses and the optional candidate recovered from one fetch reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReply {
    pub per_handle: Vec<PerAuthorStatus>,
    pub candidate: Option<PollCandidate>,
    pub explain: Option<String>,
}

/// Extract the JSON payload from markdown code blocks or surrounding prose
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after_start = &trimmed[start + 3..];
        // Skip a language identifier such as `json`
        let content_start = match after_start.find('\n') {
            Some(nl) if after_start[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                nl + 1
            }
            _ => 0,
        };
        let body = &after_start[content_start..];
        let end = body.find("```").unwrap_or(body.len());
        // A one-line fence keeps its language tag in the body
        return outermost_braces(body[..end].trim());
    }

    outermost_braces(trimmed)
}

fn outermost_braces(text: &str) -> &str {
    match (text.find(['{', '[']), text.rfind(['}', ']'])) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

/// Rewrite `\'` escapes inside strings and Python literals outside them
pub fn repair_json(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                },
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                _ => out.push(c),
            }
        } else if c == '"' {
            in_string = true;
            out.push(c);
        } else if c.is_ascii_alphabetic() {
            let mut word = String::from(c);
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    word.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push_str(match word.as_str() {
                "True" => "true",
                "False" => "false",
                "None" => "null",
                other => other,
            });
        } else {
            out.push(c);
        }
    }

    out
}

/// Parse model text into JSON, trying a strict pass before a repaired one
pub fn parse_lenient(text: &str) -> Result<Value, ParseError> {
    let block = extract_json_block(text);
    if block.is_empty() {
        return Err(ParseError::Empty);
    }

    match serde_json::from_str::<Value>(block) {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!(error = %first, "Strict JSON parse failed, trying repaired text");
            serde_json::from_str::<Value>(&repair_json(block))
                .map_err(|e| ParseError::InvalidJson(e.to_string()))
        }
    }
}

/// Parse the reply of one candidate-fetch call
pub fn parse_fetch_reply(raw: &str, group: SourceGroup, batch_index: usize) -> Parsed<FetchReply> {
    let value = match parse_lenient(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                source_group = %group,
                batch_index,
                error = %e,
                raw = %truncate_text(raw, 200),
                "Failed to parse fetch reply"
            );
            return Parsed::Malformed(raw.to_string());
        }
    };

    let Some(root) = value.as_object() else {
        tracing::warn!(source_group = %group, batch_index, "Fetch reply is not a JSON object");
        return Parsed::Malformed(raw.to_string());
    };

    let entries: Vec<&Map<String, Value>> = root
        .get("per_handle")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default();

    let per_handle = entries
        .iter()
        .filter_map(|entry| parse_handle_entry(entry, group, batch_index))
        .collect();

    // Top-level poll first; older replies nest it in a per-handle entry
    let poll = root
        .get("poll")
        .and_then(Value::as_object)
        .or_else(|| {
            entries
                .iter()
                .find_map(|entry| entry.get("poll").and_then(Value::as_object))
        });

    let candidate = poll.and_then(|poll| {
        let candidate = candidate_from_poll(poll, group, batch_index);
        match candidate.validate() {
            Ok(()) => Some(candidate),
            Err(e) => {
                tracing::warn!(source_group = %group, batch_index, error = %e, "Dropping invalid candidate");
                None
            }
        }
    });

    Parsed::Ok(FetchReply {
        per_handle,
        candidate,
        explain: str_field(root, &["explain"]),
    })
}

/// Parse `{"winner_index": n}` from an arbitration reply
pub fn parse_winner_index(raw: &str) -> Option<usize> {
    if let Ok(value) = parse_lenient(raw) {
        if let Some(index) = value.get("winner_index").and_then(index_from_value) {
            return Some(index);
        }
    }

    // Structured fallback for replies that are not valid JSON at all
    static WINNER_RE: OnceLock<Regex> = OnceLock::new();
    let re = WINNER_RE.get_or_init(|| {
        Regex::new(r#"["']?winner_index["']?\s*:\s*"?(\d+)"#).expect("Invalid regex pattern")
    });
    re.captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
}

fn index_from_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}

fn parse_handle_entry(
    entry: &Map<String, Value>,
    group: SourceGroup,
    batch_index: usize,
) -> Option<PerAuthorStatus> {
    let handle = normalize_handle(&str_field(entry, &["handle"])?);
    if handle.is_empty() {
        return None;
    }
    let status = HandleStatus::from_wire(&str_field(entry, &["status"]).unwrap_or_default());
    let post_count = entry
        .get("post_count")
        .map(|v| coerce_f64(v).max(0.0) as usize)
        .or_else(|| {
            entry
                .get("poll_interval_posts_list")
                .and_then(Value::as_array)
                .map(Vec::len)
        })
        .unwrap_or(0);

    Some(PerAuthorStatus {
        handle,
        status,
        post_count,
        source_group: Some(group),
        batch_index,
    })
}

fn candidate_from_poll(
    poll: &Map<String, Value>,
    group: SourceGroup,
    batch_index: usize,
) -> PollCandidate {
    let options = poll
        .get("options")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let sample_posts = poll
        .get("sample_posts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value::<SamplePost>(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    let stats_snapshot = poll
        .get("stats_snapshot")
        .and_then(|v| serde_json::from_value::<StatsSnapshot>(v.clone()).ok())
        .unwrap_or_default();

    PollCandidate {
        title: str_field(poll, &["title", "topic_title"]).unwrap_or_default(),
        description: str_field(poll, &["description", "poll_question"]).unwrap_or_default(),
        options,
        sample_posts,
        rationale: str_field(poll, &["why_choose_this_poll", "rationale", "why_safe"])
            .unwrap_or_default(),
        stats_snapshot,
        source_group: group,
        batch_index,
        tag: group.forced_tag().map(str::to_string),
    }
}

/// First non-empty string among `keys`
fn str_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
