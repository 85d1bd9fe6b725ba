//! Creation extension: POST creates an upload, first bytes arrive via PATCH

use crate::error::TusError;
use crate::extension::core::required_info;
use crate::extension::{
    add_extension_header, head_only, options_only, patch_only, post_only, Extension, Handler,
    Validator,
};
use crate::http::{header, HttpMethod};
use crate::request::TusRequest;
use crate::response::HttpResponse;
use crate::storage::UploadStorageService;
use crate::upload::{UploadInfo, UploadType};
use tracing::debug;

pub fn extension() -> Extension {
    Extension {
        name: "creation",
        validators: vec![
            Validator {
                supports: post_only,
                validate: validate_request_uri,
            },
            Validator {
                supports: post_only,
                validate: validate_empty_post,
            },
            Validator {
                supports: post_only,
                validate: validate_length_or_defer,
            },
            Validator {
                supports: post_only,
                validate: validate_max_length,
            },
        ],
        handlers: vec![
            Handler {
                supports: post_only,
                error_safe: false,
                handle: handle_post,
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

fn is_final_concat(request: &TusRequest<'_>) -> bool {
    request
        .header(header::UPLOAD_CONCAT)
        .map(|v| v.trim().starts_with("final"))
        .unwrap_or(false)
}

fn validate_request_uri(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    if !store.id_factory().matches_collection(request.request_uri()) {
        return Err(TusError::PostOnInvalidRequestUri(
            store.upload_uri().to_string(),
        ));
    }
    Ok(())
}

/// Creation is an empty POST; the first content bytes arrive via PATCH.
fn validate_empty_post(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    if let Some(raw) = request.header(header::CONTENT_LENGTH) {
        if raw.parse::<u64>().map(|n| n > 0).unwrap_or(true) {
            return Err(TusError::InvalidContentLength(
                "A POST request cannot carry content; send bytes with PATCH".to_string(),
            ));
        }
    }
    Ok(())
}

/// A new upload declares its length up front or defers it, never both and
/// never neither. A final concatenation POST derives its length from its
/// parts and is exempt.
fn validate_length_or_defer(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    if is_final_concat(request) {
        return Ok(());
    }
    let length = request.header(header::UPLOAD_LENGTH);
    let defer = request.header(header::UPLOAD_DEFER_LENGTH);

    match (length, defer) {
        (Some(_), Some(_)) => Err(TusError::InvalidUploadLength(
            "The Upload-Length and Upload-Defer-Length headers cannot be combined".to_string(),
        )),
        (Some(raw), None) => match raw.parse::<u64>() {
            Ok(_) => Ok(()),
            Err(_) => Err(TusError::InvalidUploadLength(format!(
                "The Upload-Length header {} is not a valid number",
                raw
            ))),
        },
        (None, Some(defer)) if defer.trim() == "1" => Ok(()),
        (None, Some(defer)) => Err(TusError::InvalidUploadLength(format!(
            "The Upload-Defer-Length header must be 1, got {}",
            defer
        ))),
        (None, None) => Err(TusError::InvalidUploadLength(
            "No valid Upload-Length or Upload-Defer-Length header was provided".to_string(),
        )),
    }
}

fn validate_max_length(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    let max = store.max_upload_size();
    if max == 0 {
        return Ok(());
    }
    if let Some(length) = request
        .header(header::UPLOAD_LENGTH)
        .and_then(|raw| raw.parse::<u64>().ok())
    {
        if length > max {
            return Err(TusError::MaxUploadLengthExceeded(max));
        }
    }
    Ok(())
}

fn handle_post(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let mut info = UploadInfo::new();
    info.length = request
        .header(header::UPLOAD_LENGTH)
        .and_then(|raw| raw.parse().ok());
    info.encoded_metadata = request.header(header::UPLOAD_METADATA);

    let created = store.create(info, owner_key)?;
    let id = created
        .id
        .as_ref()
        .ok_or_else(|| TusError::Storage("created upload has no id".into()))?;

    let location = format!("{}/{}", request.request_uri().trim_end_matches('/'), id);
    debug!(upload = %id, %location, "assigned upload location");
    response.set_header(header::LOCATION, &location);
    response.set_status(201);
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
    if info.has_metadata() {
        if let Some(encoded) = &info.encoded_metadata {
            response.set_header(header::UPLOAD_METADATA, encoded);
        }
    }
    // a concatenated upload's length stays unknown until merge determines
    // it; advertising deferral there would invite a PATCH
    if !info.has_length() && info.upload_type != UploadType::Concatenated {
        response.set_header(header::UPLOAD_DEFER_LENGTH, "1");
    }
    Ok(())
}

/// A deferred-length upload fixes its length on a later PATCH.
fn handle_patch(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    _response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let mut info = required_info(request, store, owner_key)?;
    if info.has_length() {
        return Ok(());
    }
    if let Some(length) = request
        .header(header::UPLOAD_LENGTH)
        .and_then(|raw| raw.parse::<u64>().ok())
    {
        info.length = Some(length);
        store.update(&info)?;
        debug!(upload = ?info.id, length, "resolved deferred upload length");
    }
    Ok(())
}

fn handle_options(
    _method: HttpMethod,
    _request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    add_extension_header(response, "creation");
    add_extension_header(response, "creation-defer-length");
    Ok(())
}
