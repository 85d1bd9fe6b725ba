//! Mandatory core protocol: version check, offset bookkeeping, HEAD/PATCH/OPTIONS

use crate::error::TusError;
use crate::extension::{
    any_method, head_only, options_only, patch_only, Extension, Handler, Validator,
};
use crate::http::{header, HttpMethod, APPLICATION_OFFSET_OCTET_STREAM, TUS_API_VERSION};
use crate::request::TusRequest;
use crate::response::HttpResponse;
use crate::storage::UploadStorageService;
use crate::upload::{UploadInfo, UploadType};
use tracing::{error, info};

pub fn extension() -> Extension {
    Extension {
        name: "core",
        validators: vec![
            Validator {
                supports: versioned_method,
                validate: validate_tus_version,
            },
            Validator {
                supports: addresses_upload,
                validate: validate_upload_exists,
            },
            Validator {
                supports: patch_only,
                validate: validate_content_type,
            },
            Validator {
                supports: patch_only,
                validate: validate_upload_offset,
            },
            Validator {
                supports: patch_only,
                validate: validate_content_length,
            },
        ],
        handlers: vec![
            Handler {
                supports: any_method,
                error_safe: true,
                handle: handle_default,
            },
            Handler {
                supports: head_only,
                error_safe: false,
                handle: handle_head,
            },
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

/// OPTIONS is version discovery and GET is outside the protocol proper,
/// so neither carries Tus-Resumable.
fn versioned_method(m: HttpMethod) -> bool {
    !matches!(m, HttpMethod::Options | HttpMethod::Get)
}

fn addresses_upload(m: HttpMethod) -> bool {
    matches!(
        m,
        HttpMethod::Head | HttpMethod::Patch | HttpMethod::Delete | HttpMethod::Get
    )
}

fn validate_tus_version(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    let version = request.header(header::TUS_RESUMABLE).unwrap_or_default();
    if version != TUS_API_VERSION {
        return Err(TusError::InvalidTusVersion(version));
    }
    Ok(())
}

fn validate_upload_exists(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let uri = request.request_uri();
    if store.get_upload_info_by_uri(uri, owner_key)?.is_none() {
        return Err(TusError::UploadNotFound(uri.to_string()));
    }
    Ok(())
}

fn validate_content_type(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    let content_type = request.header(header::CONTENT_TYPE).unwrap_or_default();
    if content_type != APPLICATION_OFFSET_OCTET_STREAM {
        return Err(TusError::InvalidContentType(
            APPLICATION_OFFSET_OCTET_STREAM.to_string(),
        ));
    }
    Ok(())
}

fn validate_upload_offset(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let Some(info) = store.get_upload_info_by_uri(request.request_uri(), owner_key)? else {
        return Ok(()); // existence already checked
    };
    // a final upload takes no writes at all; the concatenation extension
    // rejects the PATCH wholesale, so offset bookkeeping does not apply
    if info.upload_type == UploadType::Concatenated {
        return Ok(());
    }
    let raw = request.header(header::UPLOAD_OFFSET).unwrap_or_default();
    match raw.parse::<u64>() {
        Ok(offset) if offset == info.offset => Ok(()),
        _ => Err(TusError::UploadOffsetMismatch {
            got: raw,
            expected: info.offset,
        }),
    }
}

fn validate_content_length(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let Some(info) = store.get_upload_info_by_uri(request.request_uri(), owner_key)? else {
        return Ok(());
    };
    if info.upload_type == UploadType::Concatenated {
        return Ok(());
    }
    let (Some(length), Some(raw)) = (info.length, request.header(header::CONTENT_LENGTH)) else {
        return Ok(());
    };
    let content_length: u64 = raw
        .parse()
        .map_err(|_| TusError::InvalidContentLength(format!("Invalid Content-Length {}", raw)))?;
    // compared against the remaining capacity, so an absurdly large
    // Content-Length cannot overflow the sum
    let remaining = length.saturating_sub(info.offset);
    if content_length > remaining {
        return Err(TusError::InvalidContentLength(format!(
            "The Content-Length {} exceeds the remaining {} bytes of the upload",
            content_length, remaining
        )));
    }
    Ok(())
}

/// Runs on every request, success or error: the protocol version echo and
/// an empty body are unconditional.
fn handle_default(
    _method: HttpMethod,
    _request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    response.set_header(header::TUS_RESUMABLE, TUS_API_VERSION);
    response.set_header(header::CONTENT_LENGTH, "0");
    Ok(())
}

fn handle_head(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let info = required_info(request, store, owner_key)?;
    // concatenated uploads get their derived headers from the
    // concatenation extension
    if info.upload_type != UploadType::Concatenated {
        if let Some(length) = info.length {
            response.set_header(header::UPLOAD_LENGTH, &length.to_string());
        }
        response.set_header(header::UPLOAD_OFFSET, &info.offset.to_string());
    }
    response.set_header(header::CACHE_CONTROL, "no-store");
    response.set_status(204);
    Ok(())
}

fn handle_patch(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let info = required_info(request, store, owner_key)?;
    let updated = store.append(&info, request.body_mut())?;
    if !updated.is_in_progress() {
        info!(upload = ?updated.id, length = ?updated.length, "upload finished");
    }
    response.set_header(header::UPLOAD_OFFSET, &updated.offset.to_string());
    response.set_status(204);
    Ok(())
}

fn handle_options(
    _method: HttpMethod,
    _request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    response.set_header(header::TUS_VERSION, TUS_API_VERSION);
    if store.max_upload_size() > 0 {
        response.set_header(header::TUS_MAX_SIZE, &store.max_upload_size().to_string());
    }
    response.set_status(204);
    Ok(())
}

/// Fetch the upload a handler was validated against. The validators have
/// already established existence, so absence here means it vanished
/// between validation and processing.
pub(crate) fn required_info(
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<UploadInfo, TusError> {
    let uri = request.request_uri();
    match store.get_upload_info_by_uri(uri, owner_key)? {
        Some(info) => Ok(info),
        None => {
            error!(uri, "upload disappeared between validation and processing");
            Err(TusError::Storage(format!(
                "upload at {} no longer exists",
                uri
            )))
        }
    }
}
