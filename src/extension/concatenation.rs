//! Concatenation extension: partial uploads merged into a final upload

use crate::concatenation::merge;
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
use crate::upload::{UploadId, UploadType};
use tracing::info;

pub fn extension() -> Extension {
    Extension {
        name: "concatenation",
        validators: vec![
            Validator {
                supports: patch_only,
                validate: validate_patch_target,
            },
            Validator {
                supports: post_only,
                validate: validate_no_length_on_final,
            },
            Validator {
                supports: post_only,
                validate: validate_partial_uploads_exist,
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
                supports: options_only,
                error_safe: false,
                handle: handle_options,
            },
        ],
    }
}

/// The part URIs of a `final;uri uri ...` header value, in order.
fn final_part_uris(value: &str) -> Vec<String> {
    match value.trim().split_once(';') {
        Some((_, uris)) => uris.split_whitespace().map(str::to_string).collect(),
        None => Vec::new(),
    }
}

fn is_final(value: &str) -> bool {
    value.trim() == "final" || value.trim_start().starts_with("final;")
}

fn is_partial(value: &str) -> bool {
    value.trim() == "partial"
}

/// A final upload owns no bytes of its own, so a PATCH against it can
/// never mean anything.
fn validate_patch_target(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    if let Some(info) = store.get_upload_info_by_uri(request.request_uri(), owner_key)? {
        if info.upload_type == UploadType::Concatenated {
            return Err(TusError::PatchOnFinalUpload);
        }
    }
    Ok(())
}

/// A final upload's length is derived from its parts, never declared.
fn validate_no_length_on_final(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    let Some(concat) = request.header(header::UPLOAD_CONCAT) else {
        return Ok(());
    };
    if is_final(&concat) && request.header(header::UPLOAD_LENGTH).is_some() {
        return Err(TusError::InvalidUploadLength(
            "A final concatenation upload cannot declare an Upload-Length".to_string(),
        ));
    }
    Ok(())
}

fn validate_partial_uploads_exist(
    _method: HttpMethod,
    request: &TusRequest<'_>,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let Some(concat) = request.header(header::UPLOAD_CONCAT) else {
        return Ok(());
    };
    if !is_final(&concat) {
        return Ok(());
    }
    for uri in final_part_uris(&concat) {
        if store.get_upload_info_by_uri(&uri, owner_key)?.is_none() {
            return Err(TusError::InvalidPartialUploadId(uri));
        }
    }
    Ok(())
}

/// Stamp the freshly created upload with its concatenation role. Runs
/// after the creation handler, reading back the Location it wrote.
fn handle_post(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let Some(concat) = request.header(header::UPLOAD_CONCAT) else {
        return Ok(());
    };
    let Some(location) = response.header(header::LOCATION) else {
        return Ok(());
    };
    let Some(mut created) = store.get_upload_info_by_uri(&location, owner_key)? else {
        return Ok(());
    };

    if is_partial(&concat) {
        created.upload_type = UploadType::Partial;
        created.concat_header_value = Some(concat);
        store.update(&created)?;
    } else if is_final(&concat) {
        created.upload_type = UploadType::Concatenated;
        created.length = None;
        created.concat_header_value = Some(concat.clone());
        created.concatenation_part_ids = final_part_uris(&concat)
            .iter()
            .filter_map(|uri| store.id_factory().read_upload_id(uri))
            .collect::<Vec<UploadId>>();
        store.update(&created)?;
        merge(store, &mut created)?;
        info!(
            upload = ?created.id,
            parts = created.concatenation_part_ids.len(),
            "created final upload"
        );
    }
    Ok(())
}

/// HEAD on a concatenated upload re-runs the merge so clients can poll
/// for completion. The offset header stays absent until every part is
/// complete: a final upload is all-or-nothing.
fn handle_head(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let mut info = required_info(request, store, owner_key)?;
    if info.upload_type == UploadType::Regular {
        return Ok(());
    }
    if let Some(concat) = &info.concat_header_value {
        response.set_header(header::UPLOAD_CONCAT, concat);
    }
    if info.upload_type == UploadType::Concatenated {
        if info.is_in_progress() {
            merge(store, &mut info)?;
        }
        if let Some(length) = info.length {
            response.set_header(header::UPLOAD_LENGTH, &length.to_string());
        }
        if !info.is_in_progress() {
            response.set_header(header::UPLOAD_OFFSET, &info.offset.to_string());
        }
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
    add_extension_header(response, "concatenation");
    Ok(())
}
