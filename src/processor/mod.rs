//! Format processors and the extension-keyed registry dispatching to them.
//!
//! A processor is a pure function from raw bytes and options to an
//! [`Artifact`]. Expected failures (missing optional dependency, corrupt
//! content) are reported through `flags.error`, never by returning an error
//! or panicking; the router's fallback logic depends on that convention.
//! Panics are reserved for contract violations in extension code and
//! propagate uncaught.

mod pdf;
mod text;
mod xlsx;

pub use pdf::PdfProcessor;
pub use text::TextProcessor;
pub use xlsx::XlsxProcessor;

pub(crate) use text::is_text_bytes;

use crate::artifact::Artifact;
use crate::dsl::Options;
use std::collections::HashMap;
use std::sync::Arc;

/// Sentinel registry key for the plausibly-text fallback processor.
pub const TEXT_FALLBACK_KEY: &str = "__text__";

/// Extensions routed to the text processor out of the box.
const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".markdown", ".rst", ".csv", ".tsv", ".json", ".yaml", ".yml", ".toml",
    ".ini", ".cfg", ".log", ".rs", ".py", ".java", ".js", ".ts", ".css", ".html", ".xml", ".tex",
];

/// A pluggable converter for one file format.
pub trait Processor: Send + Sync {
    /// Convert raw bytes into an artifact. Must not panic for malformed
    /// content; report it via `flags.error` instead.
    fn process(&self, data: &[u8], options: &Options) -> Artifact;

    /// Dependency group consulted before a local attempt, if any.
    fn capability(&self) -> Option<&'static str> {
        None
    }
}

/// Extension-keyed registry of processors.
pub struct ProcessorRegistry {
    entries: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry with the built-in processors registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let text = Arc::new(TextProcessor);
        registry.register(TEXT_FALLBACK_KEY, text.clone());
        for extension in TEXT_EXTENSIONS {
            registry.register(extension, text.clone());
        }
        registry.register(".pdf", Arc::new(PdfProcessor));
        registry.register(".xlsx", Arc::new(XlsxProcessor));
        registry
    }

    /// Register a processor for an extension.
    ///
    /// Keys are normalized to lower-case with a leading dot; sentinel keys
    /// (`__text__`) pass through untouched. Re-registration shadows.
    pub fn register(&mut self, key: &str, processor: Arc<dyn Processor>) {
        self.entries.insert(normalize_key(key), processor);
    }

    /// Look up the processor for an extension, case-insensitively.
    pub fn lookup(&self, key: &str) -> Option<Arc<dyn Processor>> {
        self.entries.get(&normalize_key(key)).cloned()
    }

    /// Route a resolved file to a processor.
    ///
    /// Falls back to the `__text__` entry when no extension matches and the
    /// content is plausibly text; returns `None` otherwise.
    pub fn route(&self, filename: &str, data: &[u8]) -> Option<Arc<dyn Processor>> {
        let by_extension = extension_of(filename).and_then(|ext| self.lookup(&ext));
        match by_extension {
            Some(processor) => Some(processor),
            None if is_text_bytes(data) => self.lookup(TEXT_FALLBACK_KEY),
            None => None,
        }
    }

    /// Registered extensions (sentinels included), sorted for display.
    pub fn extensions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_key(key: &str) -> String {
    let key = key.trim();
    if key.starts_with("__") {
        return key.to_string();
    }
    if key.starts_with('.') {
        key.to_lowercase()
    } else {
        format!(".{}", key.to_lowercase())
    }
}

fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_dot_normalized() {
        let registry = ProcessorRegistry::with_defaults();
        assert!(registry.lookup(".PDF").is_some());
        assert!(registry.lookup("pdf").is_some());
        assert!(registry.lookup("Pdf").is_some());
        assert!(registry.lookup(".docx").is_none());
    }

    #[test]
    fn unknown_extension_with_text_content_routes_to_fallback() {
        let registry = ProcessorRegistry::with_defaults();
        let processor = registry.route("notes.unknownext", b"plain text body");
        assert!(processor.is_some());
    }

    #[test]
    fn unknown_extension_with_binary_content_routes_nowhere() {
        let registry = ProcessorRegistry::with_defaults();
        let data = [0u8, 159, 146, 150, 0, 1, 2];
        assert!(registry.route("blob.bin", &data).is_none());
    }

    #[test]
    fn extension_routing_matches_uppercase_filenames() {
        let registry = ProcessorRegistry::with_defaults();
        assert!(registry.route("REPORT.PDF", &[0u8; 4]).is_some());
    }
}
