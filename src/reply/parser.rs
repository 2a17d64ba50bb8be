//! Layered extraction of a [`FortuneResponse`] from a chat-completion payload.
//!
//! Each layer runs only when the previous one produced nothing usable:
//!
//! 1. strict envelope decode (`choices[0].message.content`)
//! 2. permissive envelope navigation over a [`serde_json::Value`]
//! 3. isolate balanced top-level `{...}` blocks in the content
//! 4. strict `{spoken, choices}` decode of a block
//! 5. permissive decode of the block, moving on to the next block when
//!    neither decode yields a reply
//! 6. numbered/bulleted list fallback when the content has no block at all

use serde::Deserialize;
use serde_json::Value;

use super::{FortuneResponse, ParseOutcome};
use crate::sanitize::sanitize;

#[derive(Deserialize)]
struct CompletionEnvelope {
    choices: Vec<EnvelopeChoice>,
}

#[derive(Deserialize)]
struct EnvelopeChoice {
    message: EnvelopeMessage,
}

#[derive(Deserialize)]
struct EnvelopeMessage {
    content: String,
}

#[derive(Deserialize)]
struct ReplyPayload {
    spoken: String,
    choices: Vec<String>,
}

/// Parse a raw chat-completion payload into a structured reply.
///
/// On success the outcome carries the JSON text to store as the assistant
/// turn: the exact embedded object when the model produced one that decodes
/// strictly, otherwise a re-serialized [`FortuneResponse`].
pub fn parse_reply(payload: &str) -> ParseOutcome {
    let Some(content) = strict_envelope_content(payload).or_else(|| permissive_envelope_content(payload))
    else {
        return ParseOutcome::failure("payload carries no message content");
    };

    let content = strip_think_blocks(&content);
    let mut first_failure = None;
    for block in json_objects(&content) {
        match parse_block(block) {
            success @ ParseOutcome::Success { .. } => return success,
            failure => {
                first_failure.get_or_insert(failure);
            }
        }
    }
    first_failure.unwrap_or_else(|| parse_enumerated(&content))
}

fn strict_envelope_content(payload: &str) -> Option<String> {
    let envelope: CompletionEnvelope = serde_json::from_str(payload).ok()?;
    let content = envelope.choices.into_iter().next()?.message.content;
    (!content.trim().is_empty()).then_some(content)
}

fn permissive_envelope_content(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let content = value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?;

    let text = match content {
        Value::String(text) => text.clone(),
        // Content-part arrays: [{"type": "text", "text": "..."}, ...]
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str).or_else(|| part.as_str()))
            .collect::<String>(),
        _ => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

fn parse_block(block: &str) -> ParseOutcome {
    if let Ok(reply) = serde_json::from_str::<ReplyPayload>(block) {
        let spoken = sanitize(&reply.spoken);
        if !spoken.is_empty() {
            return ParseOutcome::Success {
                response: FortuneResponse::new(spoken, &reply.choices),
                canonical_json: block.to_owned(),
            };
        }
    }

    let Ok(value) = serde_json::from_str::<Value>(block) else {
        return ParseOutcome::failure("embedded object is not valid JSON");
    };

    let spoken = value
        .get("spoken")
        .and_then(Value::as_str)
        .map(sanitize)
        .unwrap_or_default();
    if spoken.is_empty() {
        return ParseOutcome::failure("reply object has no usable spoken text");
    }

    let choices: Vec<&str> = value
        .get("choices")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|choice| !choice.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();

    synthesized(FortuneResponse::new(spoken, &choices))
}

fn parse_enumerated(content: &str) -> ParseOutcome {
    let mut preamble: Vec<&str> = Vec::new();
    let mut choices: Vec<String> = Vec::new();
    let mut in_list = false;

    for line in content.lines() {
        match strip_list_marker(line) {
            Some(item) => {
                in_list = true;
                let clean = sanitize(item);
                if !clean.is_empty() {
                    choices.push(clean);
                }
            }
            None if !in_list => preamble.push(line),
            None => {}
        }
    }

    if choices.is_empty() {
        return ParseOutcome::failure("content has neither a JSON object nor list items");
    }

    let spoken = sanitize(&preamble.join(" "));
    if spoken.is_empty() {
        return ParseOutcome::failure("list reply has no spoken text before the items");
    }

    synthesized(FortuneResponse::new(spoken, &choices))
}

fn synthesized(response: FortuneResponse) -> ParseOutcome {
    let canonical_json = response.to_canonical_json();
    ParseOutcome::Success {
        response,
        canonical_json,
    }
}

/// Return the item text of a `1.`, `1)`, `- ` or `* ` list line.
fn strip_list_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
    {
        return Some(rest);
    }

    let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let rest = trimmed[digits..]
        .strip_prefix('.')
        .or_else(|| trimmed[digits..].strip_prefix(')'))?;
    // "1.5 stars" is prose, not a list item.
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

/// Strip `<think>...</think>` blocks from generated text.
fn strip_think_blocks(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut remaining = text;
    while let Some(start) = remaining.find("<think>") {
        result.push_str(&remaining[..start]);
        if let Some(end) = remaining[start..].find("</think>") {
            remaining = &remaining[start + end + "</think>".len()..];
        } else {
            // Unclosed <think> — discard the rest
            return result;
        }
    }
    result.push_str(remaining);
    result
}

/// Find the first balanced `{...}` object in `text`.
///
/// Braces inside double-quoted strings (with backslash escapes) do not count.
/// Starts are tried left to right, so a stray unbalanced `{` in prose does
/// not hide a later complete object.
pub fn extract_json_object(text: &str) -> Option<&str> {
    json_objects(text).next()
}

/// Balanced top-level objects in `text`, left to right.
///
/// Objects nested inside an earlier yielded block are not yielded again.
fn json_objects(text: &str) -> impl Iterator<Item = &str> {
    let mut resume = 0;
    text.match_indices('{').filter_map(move |(start, _)| {
        if start < resume {
            return None;
        }
        let block = balanced_object_at(text, start)?;
        resume = start + block.len();
        Some(block)
    })
}

fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
