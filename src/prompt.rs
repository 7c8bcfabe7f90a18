//! Prompt construction from OpenAI chat messages.
//!
//! The agent CLI takes a single prompt string. System and developer messages
//! are wrapped in `<system>` tags, earlier assistant turns in
//! `<previous_response>` tags, and user (or tool) text is passed through.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::chat::ChatMessage;
use crate::{AppError, Result};

/// Three or more consecutive line breaks, allowing blank lines with spaces.
static BLANK_RUNS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").ok());

/// Convert a conversation into one prompt string.
///
/// `strip` lists header lines whose sections are removed from system and
/// developer messages (see [`strip_sections`]).
///
/// # Errors
///
/// Returns `AppError::BadRequest` when no message carries any text.
pub fn messages_to_prompt(messages: &[ChatMessage], strip: &[String]) -> Result<String> {
    let mut parts = Vec::with_capacity(messages.len());

    for message in messages {
        let Some(content) = &message.content else {
            continue;
        };
        let text = content.to_text();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        match message.role.as_str() {
            "system" | "developer" => {
                let stripped = strip_sections(text, strip);
                let stripped = stripped.trim();
                if !stripped.is_empty() {
                    parts.push(format!("<system>\n{stripped}\n</system>"));
                }
            }
            "assistant" => parts.push(format!("<previous_response>\n{text}\n</previous_response>")),
            _ => parts.push(text.to_owned()),
        }
    }

    if parts.is_empty() {
        return Err(AppError::BadRequest(
            "messages did not include any textual content".into(),
        ));
    }
    Ok(parts.join("\n\n"))
}

/// Remove the sections introduced by any of `headers` from `text`.
///
/// A header matches a line whose right-trimmed text equals it exactly. Its
/// level is its count of leading `#`; the section runs up to (not including)
/// the next header line of the same level, or to the end of the text. A
/// header without `#` ends at the next markdown header of any level.
/// Afterwards runs of blank lines collapse to a single blank line. With no
/// headers the text is returned unchanged.
#[must_use]
pub fn strip_sections<S: AsRef<str>>(text: &str, headers: &[S]) -> String {
    if headers.is_empty() {
        return text.to_owned();
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut skipping: Option<usize> = None;

    for line in text.split('\n') {
        if let Some(level) = skipping {
            let ends_section = match header_level(line) {
                Some(found) => level == 0 || found == level,
                None => false,
            };
            if !ends_section {
                continue;
            }
            skipping = None;
        }

        let trimmed = line.trim_end();
        if headers.iter().any(|header| header.as_ref() == trimmed) {
            skipping = Some(header_level(trimmed).unwrap_or(0));
            continue;
        }
        kept.push(line);
    }

    let joined = kept.join("\n");
    match BLANK_RUNS.as_ref() {
        Some(re) => re.replace_all(&joined, "\n\n").into_owned(),
        None => joined,
    }
}

/// Markdown ATX header level (`## Title` → 2), if `line` is a header.
fn header_level(line: &str) -> Option<usize> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    match line.as_bytes().get(hashes) {
        None | Some(b' ' | b'\t') => Some(hashes),
        Some(_) => None,
    }
}
