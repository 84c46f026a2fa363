//! Parser for inline options embedded in an input reference.
//!
//! Inputs may carry an option block: `report.pdf[pages: 1-4, images: true]`.
//! The block is parsed into an [`Options`] map handed to source handlers and
//! processors. Recognized value syntaxes: integers, floats, booleans, dash
//! ranges (`1-4`), and bare or quoted strings. A malformed block is a
//! configuration error, not a processing failure.

use std::collections::BTreeMap;
use thiserror::Error;

/// Option mapping passed into source handlers and processors.
pub type Options = BTreeMap<String, OptionValue>;

/// Errors raised while parsing an inline option block.
#[derive(Debug, Error)]
pub enum DslError {
    /// The input ends with `]` but no matching `[` opens the block.
    #[error("unbalanced option block in '{0}'")]
    UnbalancedBrackets(String),
    /// An option entry is missing the `:` separating key from value.
    #[error("option entry '{0}' is missing a ':' separator")]
    MissingSeparator(String),
    /// An option entry has an empty key.
    #[error("option entry '{0}' has an empty key")]
    EmptyKey(String),
}

/// A parsed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Boolean (`true`/`false`/`yes`/`no`/`on`/`off`).
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Inclusive dash range such as `1-4`.
    Range(i64, i64),
    /// Anything else, with surrounding quotes removed.
    Str(String),
}

impl OptionValue {
    /// Interpret the value as an integer where that makes sense.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Str(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// Interpret the value as a boolean where that makes sense.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Str(text) => parse_bool(text),
            Self::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    /// Borrow the value as a string when it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Parse a raw token the way the option block does.
    pub fn parse(raw: &str) -> Self {
        let token = raw.trim();

        if token.len() >= 2 {
            let quoted = (token.starts_with('"') && token.ends_with('"'))
                || (token.starts_with('\'') && token.ends_with('\''));
            if quoted {
                return Self::Str(token[1..token.len() - 1].to_string());
            }
        }

        if let Some(flag) = parse_bool(token) {
            return Self::Bool(flag);
        }

        if let Ok(value) = token.parse::<i64>() {
            return Self::Int(value);
        }

        if token.contains('.')
            && let Ok(value) = token.parse::<f64>()
        {
            return Self::Float(value);
        }

        if let Some((start, end)) = parse_range(token) {
            return Self::Range(start, end);
        }

        Self::Str(token.to_string())
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Range(start, end) => write!(f, "{start}-{end}"),
            Self::Str(text) => f.write_str(text),
        }
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token.to_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_range(token: &str) -> Option<(i64, i64)> {
    let (left, right) = token.split_once('-')?;
    let start = left.trim().parse().ok()?;
    let end = right.trim().parse().ok()?;
    Some((start, end))
}

/// Split an input reference into a clean path and its parsed options.
///
/// Inputs without a trailing `]` never carry options; a path containing
/// literal brackets mid-string is left untouched.
pub fn parse_dsl(input: &str) -> Result<(String, Options), DslError> {
    let input = input.trim();

    if !input.ends_with(']') {
        return Ok((input.to_string(), Options::new()));
    }

    // Scan backwards for the matching '[' so bracketed URLs inside the block
    // do not confuse the split.
    let mut depth = 0usize;
    let mut open = None;
    for (index, ch) in input.char_indices().rev() {
        match ch {
            ']' => depth += 1,
            '[' => {
                depth -= 1;
                if depth == 0 {
                    open = Some(index);
                    break;
                }
            }
            _ => {}
        }
    }

    let Some(open) = open else {
        return Err(DslError::UnbalancedBrackets(input.to_string()));
    };

    let path = input[..open].trim().to_string();
    let block = input[open + 1..input.len() - 1].trim();

    let mut options = Options::new();
    for entry in split_entries(block) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, value)) = entry.split_once(':') else {
            return Err(DslError::MissingSeparator(entry.to_string()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(DslError::EmptyKey(entry.to_string()));
        }
        expand_option(key, OptionValue::parse(value), &mut options);
    }

    Ok((path, options))
}

/// Split the option block on commas, respecting quoted values.
fn split_entries(block: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in block.chars() {
        match ch {
            '"' | '\'' => {
                match quote {
                    None => quote = Some(ch),
                    Some(open) if open == ch => quote = None,
                    Some(_) => {}
                }
                current.push(ch);
            }
            ',' if quote.is_none() => {
                entries.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        entries.push(current);
    }
    entries
}

/// Expand a raw DSL key into processor option keys.
///
/// Page aliases convert the 1-based DSL notation into the zero-based
/// `page_start`/`page_end` pair processors consume: `pages: 1-4` selects
/// pages 1 through 4 inclusive.
fn expand_option(key: &str, value: OptionValue, options: &mut Options) {
    let normalized = key.to_lowercase().replace(['-', ' '], "_");

    match normalized.as_str() {
        "pages" | "page" => match value {
            OptionValue::Range(start, end) => {
                options.insert("page_start".into(), OptionValue::Int(start.saturating_sub(1)));
                options.insert("page_end".into(), OptionValue::Int(end));
            }
            OptionValue::Int(page) => {
                options.insert("page_start".into(), OptionValue::Int(page.saturating_sub(1)));
                options.insert("page_end".into(), OptionValue::Int(page));
            }
            // Non-numeric page selections are unusable; drop them.
            _ => {}
        },
        "password" | "pw" => {
            options.insert("password".into(), value);
        }
        "dpi" => {
            options.insert("images_dpi".into(), value);
        }
        "images" | "render" => {
            options.insert("render_images".into(), value);
        }
        "rows" | "max_rows" => {
            options.insert("max_rows".into(), value);
        }
        "branch" | "ref" | "tag" => {
            options.insert("ref".into(), value);
        }
        "start" => {
            options.insert("page_start".into(), value);
        }
        "end" => {
            options.insert("page_end".into(), value);
        }
        other => {
            options.insert(other.to_string(), value);
        }
    }
}
