//! Checksum algorithms supported for Upload-Checksum verification

use digest::DynDigest;
use std::fmt;

/// Separator between the algorithm name and the base64 digest in the
/// `Upload-Checksum` header ("sha1 Kq5sNclPz7QV2+lfQIuc6R7oRu0=").
pub const CHECKSUM_VALUE_SEPARATOR: char = ' ';

/// The fixed set of digest algorithms the server can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// All supported algorithms, in the order they are advertised.
    pub const ALL: [ChecksumAlgorithm; 5] = [
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha384,
        ChecksumAlgorithm::Sha512,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "md5" => Some(ChecksumAlgorithm::Md5),
            "sha1" => Some(ChecksumAlgorithm::Sha1),
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            "sha384" => Some(ChecksumAlgorithm::Sha384),
            "sha512" => Some(ChecksumAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Parse the algorithm part of an `Upload-Checksum` header value.
    /// Returns `None` when the header names an unsupported algorithm.
    pub fn from_checksum_header(value: &str) -> Option<Self> {
        let scheme = value.trim().split(CHECKSUM_VALUE_SEPARATOR).next()?;
        Self::from_name(scheme)
    }

    /// Extract the expected base64 digest from an `Upload-Checksum` value.
    pub fn expected_value(header: &str) -> Option<&str> {
        header
            .trim()
            .split_once(CHECKSUM_VALUE_SEPARATOR)
            .map(|(_, digest)| digest.trim())
    }

    /// Construct a fresh streaming digester for this algorithm.
    pub fn digester(&self) -> Box<dyn DynDigest + Send> {
        match self {
            ChecksumAlgorithm::Md5 => Box::new(md5::Md5::default()),
            ChecksumAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            ChecksumAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            ChecksumAlgorithm::Sha384 => Box::new(sha2::Sha384::default()),
            ChecksumAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }

    /// Comma-separated list for the `Tus-Checksum-Algorithm` OPTIONS header.
    pub fn list_header_value() -> String {
        Self::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
