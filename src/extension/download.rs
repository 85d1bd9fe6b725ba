//! Download extension: GET serves the content of a completed upload
//!
//! Not part of the official protocol, but widely useful: the party that
//! uploaded the bytes can fetch them back through the same URI.

use crate::error::TusError;
use crate::extension::{add_extension_header, get_only, options_only, Extension, Handler};
use crate::http::{header, HttpMethod};
use crate::request::TusRequest;
use crate::response::HttpResponse;
use crate::storage::UploadStorageService;

pub fn extension() -> Extension {
    Extension {
        name: "download",
        validators: vec![],
        handlers: vec![
            Handler {
                supports: get_only,
                error_safe: false,
                handle: handle_get,
            },
            Handler {
                supports: options_only,
                error_safe: false,
                handle: handle_options,
            },
        ],
    }
}

fn handle_get(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let uri = request.request_uri().to_string();
    let Some(id) = store.id_factory().read_upload_id(&uri) else {
        return Err(TusError::UploadNotFound(uri));
    };

    let Some(mut content) = store.uploaded_bytes(&id, owner_key)? else {
        return Err(TusError::UploadInProgress(id.to_string()));
    };

    // re-read after uploaded_bytes: for a concatenated upload the merge it
    // runs may just have fixed the derived offset
    let info = store
        .get_upload_info(&id, owner_key)?
        .ok_or_else(|| TusError::UploadNotFound(id.to_string()))?;

    response.set_header(header::CONTENT_LENGTH, &info.offset.to_string());
    let filename = info
        .metadata()
        .into_iter()
        .find(|(key, _)| key == "filename" || key == "name")
        .and_then(|(_, value)| value)
        .unwrap_or_else(|| id.to_string());
    response.set_header(
        header::CONTENT_DISPOSITION,
        &format!("attachment; filename=\"{}\"", filename),
    );
    if let Some(encoded) = &info.encoded_metadata {
        response.set_header(header::UPLOAD_METADATA, encoded);
    }
    response.set_status(200);
    response.copy_body(&mut content)?;
    Ok(())
}

fn handle_options(
    _method: HttpMethod,
    _request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    add_extension_header(response, "download");
    Ok(())
}
