//! The dispatcher: one entry point driving validate, process and error passes

use crate::config::Config;
use crate::error::TusError;
use crate::extension::{self, Extension};
use crate::http::{header, HttpMethod, TUS_API_VERSION};
use crate::request::{HttpRequest, TusRequest};
use crate::response::HttpResponse;
use crate::storage::{
    DiskLockingService, DiskStorageService, UploadLockingService, UploadStorageService,
};
use crate::upload::UploadIdFactory;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Transport-agnostic upload service.
///
/// A transport adapter hands every request under the upload collection
/// URI to [`TusUploadService::process`]; the service acquires the
/// per-upload lock, runs the registered extensions' validators and
/// handlers in order, and shapes the response, including on failure.
pub struct TusUploadService {
    storage: Arc<dyn UploadStorageService>,
    locking: Arc<dyn UploadLockingService>,
    extensions: Vec<Extension>,
    chunked_decoding: bool,
}

impl TusUploadService {
    /// Service with the full default extension set. Registration order is
    /// load-bearing: the creation POST handler writes the Location that
    /// the expiration and concatenation POST handlers read, and the core
    /// append handler drains the body before the checksum handler
    /// verifies it.
    pub fn new(
        storage: Arc<dyn UploadStorageService>,
        locking: Arc<dyn UploadLockingService>,
        chunked_decoding: bool,
    ) -> Self {
        TusUploadService {
            storage,
            locking,
            extensions: vec![
                extension::core::extension(),
                extension::creation::extension(),
                extension::checksum::extension(),
                extension::termination::extension(),
                extension::expiration::extension(),
                extension::concatenation::extension(),
                extension::download::extension(),
            ],
            chunked_decoding,
        }
    }

    /// Build the disk-backed service described by a [`Config`].
    pub fn from_config(config: &Config) -> Result<Self, TusError> {
        let factory = UploadIdFactory::new(&config.upload_uri, config.id_strategy)?;
        let storage = DiskStorageService::new(
            &config.storage_root,
            factory,
            config.max_upload_size,
            config
                .expiration_period()
                .map_err(|e| TusError::Storage(e.to_string()))?,
        )?;
        let locking = DiskLockingService::new(&config.storage_root)?;
        Ok(TusUploadService::new(
            Arc::new(storage),
            Arc::new(locking),
            config.chunked_decoding,
        ))
    }

    /// Replace the extension set. Intended for deployments that disable a
    /// feature or append a custom one.
    pub fn with_extensions(mut self, extensions: Vec<Extension>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn storage(&self) -> &Arc<dyn UploadStorageService> {
        &self.storage
    }

    pub fn locking(&self) -> &Arc<dyn UploadLockingService> {
        &self.locking
    }

    /// Handle one request. The returned error mirrors what was already
    /// written to the response; callers use it for logging or metrics,
    /// not for response shaping.
    pub fn process(
        &self,
        raw: &mut dyn HttpRequest,
        response: &mut dyn HttpResponse,
        owner_key: Option<&str>,
    ) -> Result<(), TusError> {
        let Some(method) = HttpMethod::parse(raw.method_name()) else {
            // no method to dispatch on, so the error pass cannot run;
            // shape the minimal protocol response by hand
            let err = TusError::UnsupportedMethod(raw.method_name().to_string());
            response.set_header(header::TUS_RESUMABLE, TUS_API_VERSION);
            response.set_header(header::CONTENT_LENGTH, "0");
            response.set_status(err.status_code());
            return Err(err);
        };
        let mut request = TusRequest::new(raw, self.chunked_decoding);
        debug!(%method, uri = request.request_uri(), "processing upload request");

        // hold the per-upload lock for the whole request
        let _lock = match self
            .storage
            .id_factory()
            .read_upload_id(request.request_uri())
        {
            Some(id) => match self.locking.lock_upload(&id) {
                Ok(lock) => Some(lock),
                Err(err) => {
                    return self.fail(method, &mut request, response, owner_key, err);
                }
            },
            None => None,
        };

        for ext in &self.extensions {
            if let Err(err) = ext.validate(method, &request, self.storage.as_ref(), owner_key)
            {
                return self.fail(method, &mut request, response, owner_key, err);
            }
        }

        for ext in &self.extensions {
            if let Err(err) = ext.process(
                method,
                &mut request,
                response,
                self.storage.as_ref(),
                owner_key,
            ) {
                self.rollback_rejected_bytes(method, &request, owner_key, &err);
                return self.fail(method, &mut request, response, owner_key, err);
            }
        }
        Ok(())
    }

    /// Error pass: log, run the error-safe handlers so the response still
    /// carries the protocol headers, and map the error to its status.
    fn fail(
        &self,
        method: HttpMethod,
        request: &mut TusRequest<'_>,
        response: &mut dyn HttpResponse,
        owner_key: Option<&str>,
        err: TusError,
    ) -> Result<(), TusError> {
        if err.is_server_fault() {
            error!(%method, uri = request.request_uri(), error = %err, "request failed");
        } else {
            debug!(%method, uri = request.request_uri(), error = %err, "request rejected");
        }
        for ext in &self.extensions {
            if let Err(e) =
                ext.handle_error(method, request, response, self.storage.as_ref(), owner_key)
            {
                warn!(extension = ext.name, error = %e, "error-pass handler failed");
            }
        }
        response.set_status(err.status_code());
        Err(err)
    }

    /// A checksum mismatch means exactly this request's bytes are suspect:
    /// truncate them so the client can resend from the verified offset.
    fn rollback_rejected_bytes(
        &self,
        method: HttpMethod,
        request: &TusRequest<'_>,
        owner_key: Option<&str>,
        err: &TusError,
    ) {
        if method != HttpMethod::Patch
            || !matches!(err, TusError::ChecksumMismatch { .. })
        {
            return;
        }
        // the validated Upload-Offset header is the durable offset before
        // this append; the stream counter can exceed what was actually
        // written once the capacity cap kicks in, so it must not be the
        // rollback amount
        let Some(before) = request
            .header(header::UPLOAD_OFFSET)
            .and_then(|raw| raw.parse::<u64>().ok())
        else {
            return;
        };
        let uri = request.request_uri();
        let rollback = self
            .storage
            .get_upload_info_by_uri(uri, owner_key)
            .and_then(|info| match info {
                Some(info) => {
                    let appended = info.offset.saturating_sub(before);
                    self.storage
                        .remove_last_bytes(info, appended)
                        .map(|_| appended)
                }
                None => Ok(0),
            });
        match rollback {
            Ok(bytes) => warn!(uri, bytes, "rolled back bytes after checksum mismatch"),
            Err(e) => error!(uri, error = %e, "failed to roll back mismatched bytes"),
        }
    }
}
