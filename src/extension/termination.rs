//! Termination extension: DELETE removes an upload and its bytes

use crate::error::TusError;
use crate::extension::core::required_info;
use crate::extension::{
    add_extension_header, delete_only, options_only, Extension, Handler,
};
use crate::http::HttpMethod;
use crate::request::TusRequest;
use crate::response::HttpResponse;
use crate::storage::UploadStorageService;

pub fn extension() -> Extension {
    Extension {
        name: "termination",
        validators: vec![],
        handlers: vec![
            Handler {
                supports: delete_only,
                error_safe: false,
                handle: handle_delete,
            },
            Handler {
                supports: options_only,
                error_safe: false,
                handle: handle_options,
            },
        ],
    }
}

fn handle_delete(
    _method: HttpMethod,
    request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    store: &dyn UploadStorageService,
    owner_key: Option<&str>,
) -> Result<(), TusError> {
    let info = required_info(request, store, owner_key)?;
    store.terminate(&info)?;
    response.set_status(204);
    Ok(())
}

fn handle_options(
    _method: HttpMethod,
    _request: &mut TusRequest<'_>,
    response: &mut dyn HttpResponse,
    _store: &dyn UploadStorageService,
    _owner_key: Option<&str>,
) -> Result<(), TusError> {
    add_extension_header(response, "termination");
    Ok(())
}
