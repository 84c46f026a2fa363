//! HTTP(S) single-file source handler.

use super::{SourceError, SourceHandler, SourceRecord, sanitize_member_name};
use crate::config::Config;
use async_trait::async_trait;

/// Downloads one remote file, recovering a filename from headers or the URL.
pub struct HttpHandler {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpHandler {
    /// Build a handler honoring the configured user agent and size cap.
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_bytes: config.max_download_bytes,
        }
    }
}

#[async_trait]
impl SourceHandler for HttpHandler {
    async fn fetch(&self, input: &str) -> Result<Vec<SourceRecord>, SourceError> {
        tracing::debug!(url = input, "Downloading remote file");
        let response = self.client.get(input).send().await?;

        if !response.status().is_success() {
            return Err(SourceError::Status {
                url: input.to_string(),
                status: response.status(),
            });
        }

        // Prefer the Content-Disposition filename; fall back to the final
        // URL path after redirects.
        let header_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_content_disposition);
        let url_name = filename_from_url(response.url().path());

        let filename = header_name
            .or(url_name)
            .map(|name| sanitize_member_name(&name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "download".to_string());

        let mut bytes: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(SourceError::TooLarge {
                    limit: self.max_bytes,
                    url: input.to_string(),
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(url = input, filename = %filename, size = bytes.len(), "Download complete");
        Ok(vec![SourceRecord::new(filename, bytes)])
    }
}

/// Best-effort filename extraction from a Content-Disposition header.
fn filename_from_content_disposition(header: &str) -> Option<String> {
    for part in header.split(';') {
        let part = part.trim();
        let lower = part.to_lowercase();

        // RFC 5987: filename*=UTF-8''encoded%20name.ext
        if lower.starts_with("filename*=") {
            let rest = &part["filename*=".len()..];
            let value = rest.trim().trim_matches(|c| c == '"' || c == '\'');
            let value = value.split_once("''").map_or(value, |(_, name)| name);
            return Some(percent_decode(value));
        }

        if lower.starts_with("filename=") {
            let rest = &part["filename=".len()..];
            return Some(rest.trim().trim_matches('"').to_string());
        }
    }
    None
}

fn filename_from_url(path: &str) -> Option<String> {
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(percent_decode)
}

/// Minimal percent-decoding sufficient for filename recovery.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%'
            && let Some(decoded) = bytes
                .get(index + 1..index + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        {
            out.push(decoded);
            index += 3;
            continue;
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
