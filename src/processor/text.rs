//! Plain-text processor and the heuristics backing the `__text__` fallback.

use crate::artifact::Artifact;
use crate::dsl::Options;
use serde_json::{Map, json};

use super::Processor;

/// Decodes bytes as text, tolerating unknown encodings.
pub struct TextProcessor;

impl Processor for TextProcessor {
    fn process(&self, data: &[u8], _options: &Options) -> Artifact {
        let (text, encoding) = guess_decode(data);
        let mut flags = Map::new();
        flags.insert("kind".into(), json!("text"));
        flags.insert("encoding".into(), json!(encoding));
        flags.insert("chars".into(), json!(text.chars().count()));
        Artifact::text(text, flags)
    }
}

/// Decode bytes as UTF-8 where possible, falling back to Latin-1, which is
/// total over bytes. Returns the text and the encoding label used.
pub(crate) fn guess_decode(data: &[u8]) -> (String, &'static str) {
    let data = data.strip_prefix(b"\xef\xbb\xbf").unwrap_or(data);
    match std::str::from_utf8(data) {
        Ok(text) => (text.to_string(), "utf-8"),
        Err(_) => (data.iter().map(|&b| b as char).collect(), "latin-1"),
    }
}

/// Cheap check that content is plausibly text: no NUL bytes and under 5%
/// control bytes outside the usual whitespace set.
pub(crate) fn is_text_bytes(data: &[u8]) -> bool {
    if data.is_empty() {
        return true;
    }
    let sample = &data[..data.len().min(8192)];
    let mut suspicious = 0usize;
    for &byte in sample {
        if byte == 0 {
            return false;
        }
        if byte < 0x20 && !matches!(byte, b'\n' | b'\r' | b'\t' | 0x0c) {
            suspicious += 1;
        }
    }
    suspicious * 20 < sample.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_round_trips_and_is_labelled() {
        let (text, encoding) = guess_decode("héllo".as_bytes());
        assert_eq!(text, "héllo");
        assert_eq!(encoding, "utf-8");
    }

    #[test]
    fn bom_is_stripped() {
        let (text, _) = guess_decode(b"\xef\xbb\xbfhi");
        assert_eq!(text, "hi");
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        let (text, encoding) = guess_decode(b"caf\xe9");
        assert_eq!(text, "café");
        assert_eq!(encoding, "latin-1");
    }

    #[test]
    fn nul_byte_marks_content_binary() {
        assert!(!is_text_bytes(b"ab\0cd"));
        assert!(is_text_bytes(b"line one\nline two\n"));
    }

    #[test]
    fn processor_sets_kind_and_encoding_flags() {
        let artifact = TextProcessor.process(b"hello", &Options::new());
        assert_eq!(artifact.text, "hello");
        assert_eq!(artifact.flags["kind"], "text");
        assert_eq!(artifact.flags["encoding"], "utf-8");
        assert!(artifact.error_flag().is_none());
    }
}
