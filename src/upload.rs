//! Upload entities: ids, the upload aggregate, and the id factory

use crate::error::TusError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Opaque upload identifier in its canonical URL-safe form.
///
/// Ids built from different source values (a time-based integer, a UUID, a
/// raw string) compare equal whenever their canonical encodings match.
/// Canonicalization is idempotent: wrapping an already-encoded value keeps
/// it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId {
    value: String,
}

impl UploadId {
    pub fn new(original: impl fmt::Display) -> Self {
        let raw = original.to_string();
        let value = if is_url_safe(&raw) {
            raw
        } else {
            urlencoding::encode(&raw).into_owned()
        };
        UploadId { value }
    }

    /// The canonical URL-safe form, as it appears in upload URLs and on disk.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// A value is already canonical when every byte is either an unreserved URL
/// character or part of a well-formed percent escape.
fn is_url_safe(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'+' => i += 1,
            b'%' => {
                if i + 2 >= bytes.len()
                    || !bytes[i + 1].is_ascii_hexdigit()
                    || !bytes[i + 2].is_ascii_hexdigit()
                {
                    return false;
                }
                i += 3;
            }
            _ => return false,
        }
    }
    true
}

/// How an upload participates in concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    /// A plain upload, not involved in concatenation
    Regular,
    /// A fragment that will later become part of a final upload
    Partial,
    /// A virtual upload whose bytes are the ordered merge of partial uploads
    Concatenated,
}

/// The aggregate root of one upload: identity, progress and bookkeeping.
///
/// Storage, not any in-process cache, is the source of truth between
/// requests; two reads of the same id at different times may legitimately
/// disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInfo {
    /// Absent until creation completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UploadId>,

    /// External partition key; opaque to this engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<String>,

    /// Bytes durably stored so far; monotonically non-decreasing
    pub offset: u64,

    /// Declared total size. `None` while the length is deferred, or while a
    /// concatenated upload still has children with unknown lengths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Raw Upload-Metadata header value as supplied at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_metadata: Option<String>,

    pub upload_type: UploadType,

    /// Raw Upload-Concat value, echoed on HEAD for partial and final uploads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat_header_value: Option<String>,

    /// Ordered children of a concatenated upload; empty otherwise
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concatenation_part_ids: Vec<UploadId>,

    pub creation_timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<DateTime<Utc>>,
}

impl UploadInfo {
    pub fn new() -> Self {
        UploadInfo {
            id: None,
            owner_key: None,
            offset: 0,
            length: None,
            encoded_metadata: None,
            upload_type: UploadType::Regular,
            concat_header_value: None,
            concatenation_part_ids: Vec::new(),
            creation_timestamp: Utc::now(),
            expiration_timestamp: None,
        }
    }

    pub fn has_length(&self) -> bool {
        self.length.is_some()
    }

    /// An upload is in progress until its offset reaches its known length.
    pub fn is_in_progress(&self) -> bool {
        match self.length {
            Some(length) => self.offset < length,
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiration_timestamp
            .map(|t| t < Utc::now())
            .unwrap_or(false)
    }

    /// Push the expiration timestamp out to now + period.
    pub fn update_expiration(&mut self, period: Duration) {
        let period = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::zero());
        self.expiration_timestamp = Some(Utc::now() + period);
    }

    /// RFC 7231 formatting for the Upload-Expires response header.
    pub fn expiration_header_value(&self) -> Option<String> {
        self.expiration_timestamp
            .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
    }

    pub fn has_metadata(&self) -> bool {
        self.encoded_metadata
            .as_deref()
            .map(|m| !m.trim().is_empty())
            .unwrap_or(false)
    }

    /// Decoded view of the Upload-Metadata header: comma-separated
    /// `key base64value` pairs, values optional.
    pub fn metadata(&self) -> Vec<(String, Option<String>)> {
        let Some(encoded) = self.encoded_metadata.as_deref() else {
            return Vec::new();
        };
        encoded
            .split(',')
            .filter_map(|pair| {
                let mut parts = pair.trim().splitn(2, ' ');
                let key = parts.next()?.trim();
                if key.is_empty() {
                    return None;
                }
                let value = parts
                    .next()
                    .and_then(|v| STANDARD.decode(v.trim()).ok())
                    .and_then(|bytes| String::from_utf8(bytes).ok());
                Some((key.to_string(), value))
            })
            .collect()
    }
}

impl Default for UploadInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Strategy used to generate new upload ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    /// Random UUID v4 ids
    #[default]
    Uuid,
    /// Monotonically increasing millisecond timestamps
    TimeBased,
}

/// Converts between stored upload ids and their position in request paths.
///
/// The upload-collection template may be a literal path ("/uploads") or a
/// regular expression ("/users/[0-9]+/files") for deployments that embed
/// other segments in the collection path. The same template validates POST
/// targets and extracts the trailing id from item URIs.
pub struct UploadIdFactory {
    upload_uri: String,
    collection_pattern: Regex,
    strip_pattern: Regex,
    strategy: IdStrategy,
    last_time_id: AtomicU64,
}

impl UploadIdFactory {
    pub fn new(upload_uri: &str, strategy: IdStrategy) -> Result<Self, TusError> {
        let upload_uri = upload_uri.trim_end_matches('/');
        if upload_uri.is_empty() {
            return Err(TusError::Storage(
                "The upload collection URI cannot be blank".into(),
            ));
        }
        let collection_pattern = Regex::new(&format!("^{}/?$", upload_uri))
            .map_err(|e| TusError::Storage(format!("Invalid upload URI pattern: {}", e)))?;
        let strip_pattern = Regex::new(&format!("^{}/", upload_uri))
            .map_err(|e| TusError::Storage(format!("Invalid upload URI pattern: {}", e)))?;
        Ok(UploadIdFactory {
            upload_uri: upload_uri.to_string(),
            collection_pattern,
            strip_pattern,
            strategy,
            last_time_id: AtomicU64::new(0),
        })
    }

    pub fn upload_uri(&self) -> &str {
        &self.upload_uri
    }

    /// Does this URI address the upload collection itself (a POST target)?
    pub fn matches_collection(&self, uri: &str) -> bool {
        self.collection_pattern.is_match(uri)
    }

    /// Extract the upload id from an item URI, if the URI addresses one.
    pub fn read_upload_id(&self, uri: &str) -> Option<UploadId> {
        let matched = self.strip_pattern.find(uri)?;
        if matched.start() != 0 {
            return None;
        }
        let rest = uri[matched.end()..].trim_end_matches('/');
        if rest.is_empty() || rest.contains('/') {
            return None;
        }
        Some(UploadId::new(rest))
    }

    /// Generate a fresh id according to the configured strategy.
    pub fn create_id(&self) -> UploadId {
        match self.strategy {
            IdStrategy::Uuid => UploadId::new(Uuid::new_v4()),
            IdStrategy::TimeBased => {
                let now = Utc::now().timestamp_millis().max(0) as u64;
                let mut prev = self.last_time_id.load(Ordering::Relaxed);
                loop {
                    // strictly increasing even when called twice in one tick
                    let next = now.max(prev + 1);
                    match self.last_time_id.compare_exchange(
                        prev,
                        next,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => return UploadId::new(next),
                        Err(actual) => prev = actual,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_id_encoding_is_idempotent() {
        let once = UploadId::new("some id/with strange:chars");
        let twice = UploadId::new(once.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_ids_from_different_sources_compare_equal() {
        let from_int = UploadId::new(1685043526_u64);
        let from_str = UploadId::new("1685043526");
        assert_eq!(from_int, from_str);
    }

    #[test]
    fn test_url_unsafe_values_are_encoded() {
        let id = UploadId::new("a b");
        assert_eq!(id.as_str(), "a%20b");
    }

    #[test]
    fn test_in_progress_semantics() {
        let mut info = UploadInfo::new();
        assert!(info.is_in_progress(), "deferred length counts as in progress");
        info.length = Some(10);
        info.offset = 9;
        assert!(info.is_in_progress());
        info.offset = 10;
        assert!(!info.is_in_progress());
    }

    #[test]
    fn test_metadata_decoding() {
        let mut info = UploadInfo::new();
        info.encoded_metadata = Some("filename ZmlsZS5iaW4=,is_confidential".to_string());
        let metadata = info.metadata();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[0], ("filename".to_string(), Some("file.bin".to_string())));
        assert_eq!(metadata[1], ("is_confidential".to_string(), None));
    }

    #[test]
    fn test_factory_reads_trailing_id() {
        let factory = UploadIdFactory::new("/uploads", IdStrategy::Uuid).unwrap();
        let id = factory.read_upload_id("/uploads/abc123").unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(factory.read_upload_id("/uploads/abc123/"), Some(id));
        assert_eq!(factory.read_upload_id("/uploads"), None);
        assert_eq!(factory.read_upload_id("/uploadsabc123"), None);
        assert_eq!(factory.read_upload_id("/other/abc123"), None);
    }

    #[test]
    fn test_factory_regex_template() {
        let factory = UploadIdFactory::new("/users/[0-9]+/files", IdStrategy::Uuid).unwrap();
        assert!(factory.matches_collection("/users/42/files"));
        assert!(!factory.matches_collection("/users/bob/files"));
        let id = factory.read_upload_id("/users/42/files/xyz").unwrap();
        assert_eq!(id.as_str(), "xyz");
    }

    #[test]
    fn test_collection_match() {
        let factory = UploadIdFactory::new("/uploads", IdStrategy::Uuid).unwrap();
        assert!(factory.matches_collection("/uploads"));
        assert!(factory.matches_collection("/uploads/"));
        assert!(!factory.matches_collection("/uploads/abc"));
    }

    #[test]
    fn test_time_based_ids_are_strictly_increasing() {
        let factory = UploadIdFactory::new("/uploads", IdStrategy::TimeBased).unwrap();
        let mut previous = 0u64;
        for _ in 0..100 {
            let id: u64 = factory.create_id().as_str().parse().unwrap();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_uuid_ids_roundtrip_through_uri() {
        let factory = UploadIdFactory::new("/uploads", IdStrategy::Uuid).unwrap();
        let id = factory.create_id();
        let uri = format!("/uploads/{}", id);
        assert_eq!(factory.read_upload_id(&uri), Some(id));
    }

    proptest! {
        #[test]
        fn prop_canonicalization_is_idempotent(raw in ".{1,64}") {
            let once = UploadId::new(raw.as_str());
            let twice = UploadId::new(once.as_str());
            prop_assert_eq!(once, twice);
        }
    }
}
