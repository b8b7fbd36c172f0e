//! # Clipboard Item Model
//!
//! `ClipboardItem` is the tagged union propagated between peers: text,
//! a PNG-encoded image, or a bundle of files. Every item carries a
//! content hash (MD5 over its canonicalized bytes) used for echo
//! suppression and history dedup.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-file cap enforced at content-read time (50 MiB default).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Total-batch cap enforced at content-read time (100 MiB default).
pub const DEFAULT_MAX_TOTAL_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Where an item came from, for echo-suppression and UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Local,
    Remote,
}

/// A single file carried inside a `Files` item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBlob {
    /// Bare file name — never a path. Sanitized at the receive boundary.
    pub name: String,
    pub bytes: Vec<u8>,
    /// Original on-disk path, if this blob was read from the local
    /// filesystem. Not transmitted on the wire.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub origin_path: Option<PathBuf>,
}

/// A reason a candidate file was skipped during content-read construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipReason {
    pub name: String,
    pub reason: String,
}

/// The clipboard payload, tagged by content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    /// PNG-encoded raster bytes.
    Image(Vec<u8>),
    Files(Vec<FileBlob>),
}

/// A clipboard item: payload plus provenance and integrity metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub payload: Payload,
    /// Lowercase hex MD5 over the canonicalized payload bytes.
    pub content_hash: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub source: Source,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Canonical byte representation used for hashing: UTF-8 bytes for text,
/// raw bytes for images, and file bytes concatenated in list order for
/// file bundles.
pub fn canonical_bytes(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::Text(s) => s.as_bytes().to_vec(),
        Payload::Image(bytes) => bytes.clone(),
        Payload::Files(blobs) => {
            let mut buf = Vec::new();
            for blob in blobs {
                buf.extend_from_slice(&blob.bytes);
            }
            buf
        }
    }
}

/// MD5 over `canonical_bytes(payload)`, as lowercase hex.
pub fn content_hash(payload: &Payload) -> String {
    let mut hasher = Md5::new();
    hasher.update(canonical_bytes(payload));
    hex::encode(hasher.finalize())
}

impl ClipboardItem {
    fn from_payload(payload: Payload, source: Source) -> Self {
        let content_hash = content_hash(&payload);
        Self {
            payload,
            content_hash,
            timestamp: now_ms(),
            source,
        }
    }

    pub fn from_text(text: impl Into<String>, source: Source) -> Self {
        Self::from_payload(Payload::Text(text.into()), source)
    }

    /// `png_bytes` must already be PNG-encoded; the item model does not
    /// perform image encoding itself (that belongs to the OS clipboard
    /// shim, out of scope here).
    pub fn from_image(png_bytes: Vec<u8>, source: Source) -> Self {
        Self::from_payload(Payload::Image(png_bytes), source)
    }

    /// Construct a `Files` item without reading file content — the hash
    /// is taken over the sorted path list instead of file bytes. Useful
    /// when only path metadata (e.g. an OS file-drop list) is available.
    pub fn from_file_paths(mut paths: Vec<PathBuf>, source: Source) -> Self {
        paths.sort();
        let mut hasher = Md5::new();
        for p in &paths {
            hasher.update(p.to_string_lossy().as_bytes());
        }
        let content_hash = hex::encode(hasher.finalize());
        let blobs = paths
            .into_iter()
            .map(|p| FileBlob {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                bytes: Vec::new(),
                origin_path: Some(p),
            })
            .collect();
        Self {
            payload: Payload::Files(blobs),
            content_hash,
            timestamp: now_ms(),
            source,
        }
    }

    /// Construct a `Files` item by reading each candidate's content,
    /// enforcing per-file and total-size caps. Files that violate a cap
    /// are skipped with a structured reason rather than aborting the
    /// whole bundle.
    pub fn from_file_contents(
        candidates: Vec<(String, Vec<u8>, Option<PathBuf>)>,
        max_file_size: u64,
        max_total_file_size: u64,
        source: Source,
    ) -> (Self, Vec<SkipReason>) {
        let mut blobs = Vec::new();
        let mut skipped = Vec::new();
        let mut total: u64 = 0;

        for (name, bytes, origin_path) in candidates {
            let size = bytes.len() as u64;
            if size > max_file_size {
                skipped.push(SkipReason {
                    name,
                    reason: format!("exceeds per-file cap of {max_file_size} bytes"),
                });
                continue;
            }
            if total + size > max_total_file_size {
                skipped.push(SkipReason {
                    name,
                    reason: format!("would exceed total cap of {max_total_file_size} bytes"),
                });
                continue;
            }
            total += size;
            blobs.push(FileBlob {
                name,
                bytes,
                origin_path,
            });
        }

        (Self::from_payload(Payload::Files(blobs), source), skipped)
    }
}

/// Strip directory separators and control characters from a received
/// file name, enforcing non-emptiness. Applied at the receive boundary
/// before any filesystem materialization.
pub fn sanitize_file_name(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(Error::InvalidFileName(raw.to_string()));
    }
    Ok(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_hash_matches_utf8_bytes_md5() {
        let item = ClipboardItem::from_text("hello", Source::Local);
        let mut hasher = Md5::new();
        hasher.update(b"hello");
        assert_eq!(item.content_hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn equal_content_hash_means_equivalent_for_echo() {
        let a = ClipboardItem::from_text("same", Source::Local);
        let b = ClipboardItem::from_text("same", Source::Remote);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn files_hash_concatenates_bytes_in_order() {
        let (item, skipped) = ClipboardItem::from_file_contents(
            vec![
                ("a.txt".into(), b"AAA".to_vec(), None),
                ("b.txt".into(), b"BBB".to_vec(), None),
            ],
            DEFAULT_MAX_FILE_SIZE,
            DEFAULT_MAX_TOTAL_FILE_SIZE,
            Source::Local,
        );
        assert!(skipped.is_empty());
        let mut hasher = Md5::new();
        hasher.update(b"AAABBB");
        assert_eq!(item.content_hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn oversized_file_is_skipped_with_reason() {
        let (item, skipped) = ClipboardItem::from_file_contents(
            vec![("huge.bin".into(), vec![0u8; 100], None)],
            50,
            1000,
            Source::Local,
        );
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "huge.bin");
        match item.payload {
            Payload::Files(blobs) => assert!(blobs.is_empty()),
            _ => panic!("expected Files payload"),
        }
    }

    #[test]
    fn total_cap_skips_later_files_not_earlier_ones() {
        let (item, skipped) = ClipboardItem::from_file_contents(
            vec![
                ("a.bin".into(), vec![0u8; 60], None),
                ("b.bin".into(), vec![0u8; 60], None),
            ],
            100,
            100,
            Source::Local,
        );
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "b.bin");
        match item.payload {
            Payload::Files(blobs) => {
                assert_eq!(blobs.len(), 1);
                assert_eq!(blobs[0].name, "a.bin");
            }
            _ => panic!("expected Files payload"),
        }
    }

    #[test]
    fn sanitize_strips_separators_and_control_chars() {
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "......etcpasswd");
        assert_eq!(sanitize_file_name("report\u{0007}.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn sanitize_rejects_empty_and_dot_names() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("   ").is_err());
        assert!(sanitize_file_name("/").is_err());
        assert!(sanitize_file_name(".").is_err());
    }

    #[test]
    fn path_only_mode_hashes_sorted_paths_without_reading_bytes() {
        let item = ClipboardItem::from_file_paths(
            vec![PathBuf::from("/tmp/b.txt"), PathBuf::from("/tmp/a.txt")],
            Source::Local,
        );
        match &item.payload {
            Payload::Files(blobs) => {
                assert_eq!(blobs.len(), 2);
                assert!(blobs.iter().all(|b| b.bytes.is_empty()));
            }
            _ => panic!("expected Files payload"),
        }
    }
}
