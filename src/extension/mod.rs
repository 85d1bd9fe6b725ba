//! Protocol extensions as data
//!
//! Every protocol feature, the mandatory core included, is described by
//! the same three-part shape: validators that run before any handler,
//! handlers that run on the success path, and the subset of handlers
//! marked error-safe that also run when a request fails. The dispatcher
//! walks these descriptors in registration order; adding a feature means
//! appending an [`Extension`] value, never touching the dispatch loop.

pub mod checksum;
pub mod concatenation;
pub mod core;
pub mod creation;
pub mod download;
pub mod expiration;
pub mod termination;

use crate::error::TusError;
use crate::http::{header, HttpMethod};
use crate::request::TusRequest;
use crate::response::HttpResponse;
use crate::storage::UploadStorageService;

/// Checks one precondition. Must not consume the body or mutate anything.
pub type ValidatorFn = fn(
    HttpMethod,
    &TusRequest<'_>,
    &dyn UploadStorageService,
    Option<&str>,
) -> Result<(), TusError>;

/// Performs one piece of request processing.
pub type HandlerFn = fn(
    HttpMethod,
    &mut TusRequest<'_>,
    &mut dyn HttpResponse,
    &dyn UploadStorageService,
    Option<&str>,
) -> Result<(), TusError>;

pub struct Validator {
    pub supports: fn(HttpMethod) -> bool,
    pub validate: ValidatorFn,
}

pub struct Handler {
    pub supports: fn(HttpMethod) -> bool,
    /// Error-safe handlers run on the error pass too. They must be
    /// side-effect-free on storage: the error pass only shapes the
    /// response.
    pub error_safe: bool,
    pub handle: HandlerFn,
}

/// A named group of validators and handlers.
pub struct Extension {
    pub name: &'static str,
    pub validators: Vec<Validator>,
    pub handlers: Vec<Handler>,
}

impl Extension {
    /// Run every validator that supports the method, stopping at the
    /// first failure.
    pub fn validate(
        &self,
        method: HttpMethod,
        request: &TusRequest<'_>,
        store: &dyn UploadStorageService,
        owner_key: Option<&str>,
    ) -> Result<(), TusError> {
        for validator in &self.validators {
            if (validator.supports)(method) {
                (validator.validate)(method, request, store, owner_key)?;
            }
        }
        Ok(())
    }

    /// Run every handler that supports the method, stopping at the first
    /// failure.
    pub fn process(
        &self,
        method: HttpMethod,
        request: &mut TusRequest<'_>,
        response: &mut dyn HttpResponse,
        store: &dyn UploadStorageService,
        owner_key: Option<&str>,
    ) -> Result<(), TusError> {
        for handler in &self.handlers {
            if (handler.supports)(method) {
                (handler.handle)(method, request, response, store, owner_key)?;
            }
        }
        Ok(())
    }

    /// Run only the error-safe handlers that support the method.
    pub fn handle_error(
        &self,
        method: HttpMethod,
        request: &mut TusRequest<'_>,
        response: &mut dyn HttpResponse,
        store: &dyn UploadStorageService,
        owner_key: Option<&str>,
    ) -> Result<(), TusError> {
        for handler in &self.handlers {
            if handler.error_safe && (handler.supports)(method) {
                (handler.handle)(method, request, response, store, owner_key)?;
            }
        }
        Ok(())
    }
}

/// Append a name to the comma-separated `Tus-Extension` response header.
/// OPTIONS handlers use this so the advertisement grows with whatever set
/// of extensions is registered.
pub fn add_extension_header(response: &mut dyn HttpResponse, name: &str) {
    let value = match response.header(header::TUS_EXTENSION) {
        Some(existing) if !existing.is_empty() => format!("{},{}", existing, name),
        _ => name.to_string(),
    };
    response.set_header(header::TUS_EXTENSION, &value);
}

pub(crate) fn any_method(_m: HttpMethod) -> bool {
    true
}

pub(crate) fn options_only(m: HttpMethod) -> bool {
    m == HttpMethod::Options
}

pub(crate) fn patch_only(m: HttpMethod) -> bool {
    m == HttpMethod::Patch
}

pub(crate) fn post_only(m: HttpMethod) -> bool {
    m == HttpMethod::Post
}

pub(crate) fn head_only(m: HttpMethod) -> bool {
    m == HttpMethod::Head
}

pub(crate) fn get_only(m: HttpMethod) -> bool {
    m == HttpMethod::Get
}

pub(crate) fn delete_only(m: HttpMethod) -> bool {
    m == HttpMethod::Delete
}
