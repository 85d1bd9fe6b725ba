//! Protocol error taxonomy with one status code per error

use crate::checksum::ChecksumAlgorithm;
use thiserror::Error;

/// Errors raised by validators, handlers and the storage layer.
///
/// Every variant maps to exactly one HTTP status code via
/// [`TusError::status_code`]; the display message names the violated
/// invariant so the transport can surface it to the client.
#[derive(Debug, Error)]
pub enum TusError {
    #[error("The HTTP method {0} is not supported")]
    UnsupportedMethod(String),

    #[error("This server does not support tus protocol version {0}")]
    InvalidTusVersion(String),

    #[error("Upload {0} was not found")]
    UploadNotFound(String),

    #[error("The Content-Type header must contain value {0}")]
    InvalidContentType(String),

    #[error("The Upload-Offset was {got} but expected {expected}")]
    UploadOffsetMismatch { got: String, expected: u64 },

    #[error("{0}")]
    InvalidContentLength(String),

    #[error("{0}")]
    InvalidUploadLength(String),

    #[error("Upload requests can have a maximum size of {0}")]
    MaxUploadLengthExceeded(u64),

    #[error("POST requests have to be sent to {0}")]
    PostOnInvalidRequestUri(String),

    #[error("You cannot send a PATCH request against a concatenated upload URI")]
    PatchOnFinalUpload,

    #[error("The URI {0} in the Upload-Concat header does not match an existing upload")]
    InvalidPartialUploadId(String),

    #[error("The Upload-Checksum header value {0} is not supported")]
    ChecksumAlgorithmNotSupported(String),

    #[error("Expected checksum {expected} but was {calculated} with algorithm {algorithm}")]
    ChecksumMismatch {
        expected: String,
        calculated: String,
        algorithm: ChecksumAlgorithm,
    },

    /// The upload is being modified by another request or sweep. Transient;
    /// callers should retry, never treat as terminal.
    #[error("Upload {0} is currently locked by another request")]
    UploadAlreadyLocked(String),

    #[error("The content of upload {0} is not yet available")]
    UploadInProgress(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TusError {
    /// The HTTP status code this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            TusError::UnsupportedMethod(_) => 405,
            TusError::InvalidTusVersion(_) => 412,
            TusError::UploadNotFound(_) => 404,
            TusError::InvalidContentType(_) => 400,
            TusError::UploadOffsetMismatch { .. } => 409,
            TusError::InvalidContentLength(_) => 400,
            TusError::InvalidUploadLength(_) => 400,
            TusError::MaxUploadLengthExceeded(_) => 413,
            TusError::PostOnInvalidRequestUri(_) => 400,
            TusError::PatchOnFinalUpload => 403,
            TusError::InvalidPartialUploadId(_) => 404,
            TusError::ChecksumAlgorithmNotSupported(_) => 400,
            // 460 is the non-standard code the tus protocol uses for a
            // failed integrity check
            TusError::ChecksumMismatch { .. } => 460,
            TusError::UploadAlreadyLocked(_) => 423,
            TusError::UploadInProgress(_) => 422,
            TusError::Storage(_) => 500,
            TusError::Io(_) => 500,
        }
    }

    /// True for server-side faults that should be logged as errors rather
    /// than reported as client mistakes.
    pub fn is_server_fault(&self) -> bool {
        self.status_code() >= 500
    }
}
