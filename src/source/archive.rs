//! In-place expansion of raw archive containers.
//!
//! Only genuine archive formats are exploded. Zip-based document formats
//! (`.xlsx`, `.docx`, ...) keep their container extension and are handed to
//! processors intact.

use super::{SourceError, SourceRecord};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};

/// Default cap on nested-archive recursion.
///
/// A maliciously self-nested archive stops expanding at this depth and the
/// remaining container is emitted as a plain record.
pub const MAX_ARCHIVE_DEPTH: usize = 8;

const RAW_ARCHIVE_SUFFIXES: &[&str] = &[".zip", ".tar", ".tar.gz", ".tgz"];

/// True when the name carries a raw archive suffix worth expanding.
pub fn is_raw_archive_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    RAW_ARCHIVE_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Strip path-traversal components from an archive member or remote name.
pub fn sanitize_member_name(name: &str) -> String {
    name.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Expand every archive-shaped record in place, preserving order.
pub(crate) fn expand_records(
    records: Vec<SourceRecord>,
    max_depth: usize,
) -> Result<Vec<SourceRecord>, SourceError> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        if is_raw_archive_name(&record.filename) {
            explode(&record.filename, record.bytes, 0, max_depth, &mut out)?;
        } else {
            out.push(record);
        }
    }
    Ok(out)
}

/// Recursively explode one container, depth-first.
///
/// Members keep their container-relative virtual path (`outer.zip/inner.txt`).
/// Nested members only recurse when their own name carries a raw archive
/// suffix, and never past `max_depth`.
fn explode(
    container: &str,
    data: Vec<u8>,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<SourceRecord>,
) -> Result<(), SourceError> {
    if depth >= max_depth {
        tracing::warn!(container, depth, "Archive nesting limit reached; not expanding further");
        out.push(SourceRecord::new(container, data));
        return Ok(());
    }

    if is_zip_bytes(&data) {
        let members = read_zip(container, &data)?;
        for (member, bytes) in members {
            descend(container, &member, bytes, depth, max_depth, out)?;
        }
        return Ok(());
    }

    if let Some(members) = read_tar(&data, container) {
        for (member, bytes) in members {
            descend(container, &member, bytes, depth, max_depth, out)?;
        }
        return Ok(());
    }

    // Suffix said archive but the payload is something else; pass it through.
    out.push(SourceRecord::new(container, data));
    Ok(())
}

fn descend(
    container: &str,
    member: &str,
    bytes: Vec<u8>,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<SourceRecord>,
) -> Result<(), SourceError> {
    let member = sanitize_member_name(member);
    if member.is_empty() {
        return Ok(());
    }
    let virtual_name = format!("{container}/{member}");
    if is_raw_archive_name(&member) {
        explode(&virtual_name, bytes, depth + 1, max_depth, out)
    } else {
        out.push(SourceRecord::new(virtual_name, bytes));
        Ok(())
    }
}

fn is_zip_bytes(data: &[u8]) -> bool {
    data.starts_with(b"PK")
}

fn read_zip(container: &str, data: &[u8]) -> Result<Vec<(String, Vec<u8>)>, SourceError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|err| SourceError::Archive {
            name: container.to_string(),
            reason: err.to_string(),
        })?;

    let mut members = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|err| SourceError::Archive {
            name: container.to_string(),
            reason: err.to_string(),
        })?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        // The header's declared size is attacker-controlled; cap the upfront
        // allocation at the container size and let the buffer grow as real
        // bytes arrive.
        let capacity = file.size().min(data.len() as u64) as usize;
        let mut bytes = Vec::with_capacity(capacity);
        file.read_to_end(&mut bytes)
            .map_err(|err| SourceError::Archive {
                name: container.to_string(),
                reason: err.to_string(),
            })?;
        members.push((name, bytes));
    }
    Ok(members)
}

/// Try to read the payload as a (possibly gzipped) tarball.
///
/// Returns `None` when the payload does not parse as tar, so a mislabeled
/// file degrades to a plain record instead of an error.
fn read_tar(data: &[u8], container: &str) -> Option<Vec<(String, Vec<u8>)>> {
    let lower = container.to_lowercase();
    let decompressed: Vec<u8> = if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).ok()?;
        decompressed
    } else {
        data.to_vec()
    };

    let mut archive = tar::Archive::new(Cursor::new(decompressed));
    let mut members = Vec::new();
    for entry in archive.entries().ok()? {
        let mut entry = entry.ok()?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().ok()?.to_string_lossy().into_owned();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).ok()?;
        members.push((name, bytes));
    }
    Some(members)
}
