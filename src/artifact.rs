//! Normalized artifact shape shared by processors, the router, and the wire.
//!
//! Every processor and every service response produces this shape. The wire
//! form is identical to the in-process form except that image payloads travel
//! base64-encoded under `bytes_b64`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved flag key stamped by the router with the resolved filename/URL.
pub const FLAG_SOURCE: &str = "source";
/// Reserved flag key carrying a human-readable error description.
pub const FLAG_ERROR: &str = "error";
/// Flag set on artifacts produced by the remote service.
pub const FLAG_VIA: &str = "via";
/// Flag carrying an informational note on otherwise empty artifacts.
pub const FLAG_NOTE: &str = "note";

/// One normalized output record produced for a single resolved input.
///
/// Artifacts are immutable once returned to the caller; the router finishes
/// normalization (provenance stamping, defaulting absent fields) before
/// handing them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Extracted text content, possibly empty.
    #[serde(default)]
    pub text: String,
    /// Ordered images extracted from the input.
    #[serde(default)]
    pub images: Vec<ImageRef>,
    /// Reserved for future audio support; always empty.
    #[serde(default)]
    pub audio: Vec<Value>,
    /// Reserved for future video support; always empty.
    #[serde(default)]
    pub video: Vec<Value>,
    /// Free-form metadata. `source` and `error` are the reserved keys.
    #[serde(default)]
    pub flags: Map<String, Value>,
}

/// A decoded image extracted from a processed input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Display name, typically derived from the source filename and page.
    pub name: String,
    /// MIME type of the payload (`image/png`, `image/jpeg`, ...).
    pub mimetype: String,
    /// Fully-decoded raw payload. Base64 under `bytes_b64` on the wire; the
    /// router never re-encodes it.
    #[serde(rename = "bytes_b64", with = "b64_bytes")]
    pub bytes: Vec<u8>,
    /// Optional 1-based page number the image was taken from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Artifact {
    /// Build an artifact carrying only text and flags.
    pub fn text(text: impl Into<String>, flags: Map<String, Value>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            audio: Vec::new(),
            video: Vec::new(),
            flags,
        }
    }

    /// Build a standardized error artifact for the given source.
    pub fn error(source: &str, error: impl Into<String>) -> Self {
        let mut flags = Map::new();
        flags.insert(FLAG_SOURCE.into(), Value::String(source.to_string()));
        flags.insert(FLAG_ERROR.into(), Value::String(error.into()));
        Self::text("", flags)
    }

    /// Build an error artifact with no provenance.
    ///
    /// Processors see bytes, not filenames, so they must leave `flags.source`
    /// unset for [`Artifact::stamped`] to fill in with the resolved input.
    pub fn processor_error(error: impl Into<String>) -> Self {
        let mut flags = Map::new();
        flags.insert(FLAG_ERROR.into(), Value::String(error.into()));
        Self::text("", flags)
    }

    /// Build an empty artifact carrying an informational note.
    pub fn note(source: &str, note: impl Into<String>) -> Self {
        let mut flags = Map::new();
        flags.insert(FLAG_SOURCE.into(), Value::String(source.to_string()));
        flags.insert(FLAG_NOTE.into(), Value::String(note.into()));
        Self::text("", flags)
    }

    /// The `flags.error` string, if present and non-empty.
    pub fn error_flag(&self) -> Option<&str> {
        self.flags
            .get(FLAG_ERROR)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }

    /// Stamp provenance, keeping any source a processor already set.
    ///
    /// The router calls this on every artifact before returning it, so
    /// provenance survives even when a processor forgets the flag.
    pub fn stamped(mut self, source: &str) -> Self {
        self.flags
            .entry(FLAG_SOURCE.to_string())
            .or_insert_with(|| Value::String(source.to_string()));
        self
    }

    /// Mark the artifact as produced by the remote service.
    pub fn via_service(mut self) -> Self {
        self.flags
            .insert(FLAG_VIA.into(), Value::String("service".into()));
        self
    }
}

mod b64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_defaults_absent_fields() {
        let artifact: Artifact = serde_json::from_value(json!({
            "text": "hello",
            "flags": {"source": "a.txt"}
        }))
        .expect("partial wire payload");

        assert_eq!(artifact.text, "hello");
        assert!(artifact.images.is_empty());
        assert!(artifact.audio.is_empty());
        assert!(artifact.video.is_empty());
    }

    #[test]
    fn image_bytes_travel_base64() {
        let image = ImageRef {
            name: "doc-page-1.png".into(),
            mimetype: "image/png".into(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
            page: Some(1),
        };

        let wire = serde_json::to_value(&image).expect("serialize");
        assert_eq!(wire["bytes_b64"], json!("iVBORw=="));

        let decoded: ImageRef = serde_json::from_value(wire).expect("deserialize");
        assert_eq!(decoded, image);
    }

    #[test]
    fn stamping_never_overwrites_processor_source() {
        let mut flags = Map::new();
        flags.insert(FLAG_SOURCE.into(), json!("inner/member.txt"));
        let artifact = Artifact::text("", flags).stamped("outer.zip");
        assert_eq!(artifact.flags[FLAG_SOURCE], json!("inner/member.txt"));
    }

    #[test]
    fn processor_errors_take_the_router_stamp() {
        let artifact = Artifact::processor_error("no decoder").stamped("report.pdf");
        assert_eq!(artifact.flags[FLAG_SOURCE], json!("report.pdf"));
        assert_eq!(artifact.error_flag(), Some("no decoder"));
    }

    #[test]
    fn empty_error_flag_is_not_an_error() {
        let mut flags = Map::new();
        flags.insert(FLAG_ERROR.into(), json!(""));
        let artifact = Artifact::text("ok", flags);
        assert!(artifact.error_flag().is_none());
    }
}
