//! Checksum extension: verify PATCH content against Upload-Checksum

use crate::checksum::ChecksumAlgorithm;
use crate::error::TusError;
use crate::extension::{
    add_extension_header, options_only, patch_only, Extension, Handler, Validator,
};
use crate::http::{header, HttpMethod};
use crate::request::TusRequest;
use crate::response::HttpResponse;
use crate::storage::UploadStorageService;
use tracing::debug;

pub fn extension() -> Extension {
    Extension {
        name: "checksum",
        validators: vec![Validator {
            supports: patch_only,
            validate: validate_algorithm,
        }],
        handlers: vec![
            Handler {
                supports: patch_only,
                error_safe: false,
                handle: handle_patch,
            },
            Handler {
                supports: options_only,
                error_safe: false,
                handle: handle_options,
            },
        ],
    }
}

/// Reject an unsupported algorithm before any body bytes are consumed.
/// Only sees the header when it arrives as a real header; a trailer is
/// re-checked by the handler once the body has been drained.
fn validate_algorithm(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    let Some(value) = request.header(header::UPLOAD_CHECKSUM) else {
        return Ok(());
    };
    if ChecksumAlgorithm::from_checksum_header(&value).is_none() {
        return Err(TusError::ChecksumAlgorithmNotSupported(value));
    }
    Ok(())
}

/// Runs after the append handler has drained the body, so the streamed
/// digests are complete and any trailer is visible.
fn handle_patch(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    _response: &mut dyn HttpResponse,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    if !request.has_calculated_checksum() {
        return Ok(());
    }
    let Some(value) = request.header(header::UPLOAD_CHECKSUM) else {
        return Ok(());
    };
    if value.trim().is_empty() {
        return Ok(());
    }
    // the algorithm may have arrived as a trailer the validator never saw
    let Some(algorithm) = ChecksumAlgorithm::from_checksum_header(&value) else {
        return Err(TusError::ChecksumAlgorithmNotSupported(value));
    };
    let Some(expected) = ChecksumAlgorithm::expected_value(&value).map(str::to_string) else {
        return Err(TusError::ChecksumAlgorithmNotSupported(value));
    };
    let Some(calculated) = request.calculated_checksum(algorithm) else {
        return Ok(());
    };
    if expected != calculated {
        return Err(TusError::ChecksumMismatch {
            expected,
            calculated,
            algorithm,
        });
    }
    debug!(%algorithm, "checksum verified");
    Ok(())
}

fn handle_options(
    _method: HttpMethod,
    _request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    add_extension_header(response, "checksum");
    add_extension_header(response, "checksum-trailer");
    response.set_header(
        header::TUS_CHECKSUM_ALGORITHM,
        &ChecksumAlgorithm::list_header_value(),
    );
    Ok(())
}
