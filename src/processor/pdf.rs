//! PDF processor: per-page text via lopdf with a pdf-extract fallback, and
//! optional embedded-image extraction.
//!
//! Compiled out without the `pdf` cargo feature; the stub reports a missing
//! dependency through `flags.error` so service fallback can take over.

use crate::artifact::Artifact;
use crate::dsl::Options;

use super::Processor;

/// Converts PDF bytes into page text and embedded images.
pub struct PdfProcessor;

impl Processor for PdfProcessor {
    #[cfg(feature = "pdf")]
    fn process(&self, data: &[u8], options: &Options) -> Artifact {
        enabled::process(data, options)
    }

    #[cfg(not(feature = "pdf"))]
    fn process(&self, _data: &[u8], _options: &Options) -> Artifact {
        Artifact::processor_error(
            "pdf support requires lopdf and pdf-extract; rebuild with the \
             'pdf' feature enabled",
        )
    }

    fn capability(&self) -> Option<&'static str> {
        Some("pdf")
    }
}

#[cfg(feature = "pdf")]
mod enabled {
    use crate::artifact::{Artifact, ImageRef};
    use crate::dsl::{OptionValue, Options};
    use lopdf::Document;
    use serde_json::{Map, json};
    use tracing::{debug, warn};

    const MAX_IMAGES: usize = 64;

    pub(super) fn process(data: &[u8], options: &Options) -> Artifact {
        let doc = match Document::load_mem(data) {
            Ok(doc) => doc,
            Err(err) => return Artifact::processor_error(format!("failed to parse pdf: {err}")),
        };
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Artifact::processor_error("pdf is encrypted and cannot be read");
        }

        let pages = doc.get_pages();
        let total = pages.len();
        let (start, stop) = page_window(options, total);

        let mut backend = "lopdf";
        let mut parsed = 0usize;
        let mut chunks: Vec<String> = Vec::new();
        for page_number in pages.keys().copied() {
            let index = (page_number as usize).saturating_sub(1);
            if index < start || index >= stop {
                continue;
            }
            parsed += 1;
            match doc.extract_text(&[page_number]) {
                Ok(text) => chunks.push(text),
                Err(err) => {
                    debug!(page = page_number, error = %err, "page text extraction failed");
                    chunks.push(String::new());
                }
            }
        }

        let mut text = chunks.join("\n\n");
        if text.trim().is_empty() {
            // Some generators defeat lopdf's content-stream walk; a whole
            // document pass is the best remaining option.
            match pdf_extract::extract_text_from_mem(data) {
                Ok(whole) => {
                    text = whole;
                    backend = "pdf-extract";
                }
                Err(err) => warn!(error = %err, "whole-document text fallback failed"),
            }
        }

        let images = if wants_images(options) {
            extract_images(&doc, start, stop)
        } else {
            Vec::new()
        };

        let mut flags = Map::new();
        flags.insert("kind".into(), json!("pdf"));
        flags.insert("pages".into(), json!(total));
        flags.insert("parsed_pages".into(), json!(parsed));
        flags.insert("text_backend".into(), json!(backend));
        let mut artifact = Artifact::text(text, flags);
        artifact.images = images;
        artifact
    }

    /// Half-open zero-based page window from `page_start`/`page_end`/
    /// `max_pages`, clamped to the document.
    fn page_window(options: &Options, total: usize) -> (usize, usize) {
        let start = options
            .get("page_start")
            .and_then(OptionValue::as_i64)
            .map(|v| v.max(0) as usize)
            .unwrap_or(0)
            .min(total);
        let mut stop = options
            .get("page_end")
            .and_then(OptionValue::as_i64)
            .map(|v| v.max(0) as usize)
            .unwrap_or(total)
            .min(total);
        if let Some(max_pages) = options.get("max_pages").and_then(OptionValue::as_i64) {
            stop = stop.min(start.saturating_add(max_pages.max(0) as usize));
        }
        (start, stop.max(start))
    }

    fn wants_images(options: &Options) -> bool {
        match options.get("render_images") {
            Some(OptionValue::Bool(flag)) => *flag,
            Some(value) => {
                let label = value.as_str().unwrap_or_default().to_lowercase();
                matches!(label.as_str(), "always" | "auto" | "true" | "yes")
            }
            None => false,
        }
    }

    /// Pull embedded JPEGs out of the page window. DCTDecode streams are
    /// already complete JPEG files; other filters are skipped.
    fn extract_images(doc: &Document, start: usize, stop: usize) -> Vec<ImageRef> {
        let mut images = Vec::new();
        for (page_number, page_id) in doc.get_pages() {
            let index = (page_number as usize).saturating_sub(1);
            if index < start || index >= stop || images.len() >= MAX_IMAGES {
                continue;
            }
            let page_images = match doc.get_page_images(page_id) {
                Ok(found) => found,
                Err(err) => {
                    debug!(page = page_number, error = %err, "image enumeration failed");
                    continue;
                }
            };
            for pdf_image in page_images {
                if images.len() >= MAX_IMAGES {
                    break;
                }
                let is_jpeg = pdf_image
                    .filters
                    .as_ref()
                    .is_some_and(|filters| filters.iter().any(|f| f == "DCTDecode"));
                if !is_jpeg {
                    continue;
                }
                images.push(ImageRef {
                    name: format!("page-{page_number}-image-{}.jpg", images.len() + 1),
                    mimetype: "image/jpeg".to_string(),
                    bytes: pdf_image.content.to_vec(),
                    page: Some(page_number),
                });
            }
        }
        images
    }

}
