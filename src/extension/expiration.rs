//! Expiration extension: keep active uploads alive, advertise their deadline

use crate::error::TusError;
use crate::extension::{add_extension_header, options_only, Extension, Handler};
use crate::http::{header, HttpMethod};
use crate::request::TusRequest;
use crate::response::HttpResponse;
use crate::storage::UploadStorageService;

pub fn extension() -> Extension {
    Extension {
        name: "expiration",
        validators: vec![],
        handlers: vec![
            // deliberately not error-safe: a failed request must not keep
            // an upload alive, and the error pass writes no storage
            Handler {
                supports: creates_or_appends,
                error_safe: false,
                handle: handle_refresh,
            },
            Handler {
                supports: options_only,
                error_safe: false,
                handle: handle_options,
            },
        ],
    }
}

fn creates_or_appends(m: HttpMethod) -> bool {
    matches!(m, HttpMethod::Post | HttpMethod::Patch)
}

/// Push the expiration deadline out after successful activity and tell
/// the client when the upload will disappear. On POST the upload lives at
/// the Location the creation handler just wrote.
fn handle_refresh(
    method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let Some(period) = store.expiration_period() else {
        return Ok(());
    };
    let uri = match method {
        HttpMethod::Post => match response.header(header::LOCATION) {
            Some(location) => location,
            None => return Ok(()),
        },
        _ => request.request_uri().to_string(),
    };
    let Some(mut info) = store.get_upload_info_by_uri(&uri, owner_key)? else {
        return Ok(());
    };
    info.update_expiration(period);
    store.update(&info)?;
    if let Some(expires) = info.expiration_header_value() {
        response.set_header(header::UPLOAD_EXPIRES, &expires);
    }
    Ok(())
}

fn handle_options(
    _method: HttpMethod,
    _request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    if store.expiration_period().is_some() {
        add_extension_header(response, "expiration");
    }
    Ok(())
}
