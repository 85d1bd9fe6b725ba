//! Server-side engine for the tus resumable upload protocol (v1.0.0).
//!
//! The crate is transport-agnostic: an HTTP server implements the small
//! [`HttpRequest`] / [`HttpResponse`] traits and forwards every request
//! under the upload collection URI to [`TusUploadService::process`]. The
//! engine handles protocol validation, storage, per-upload locking,
//! checksum verification, concatenation, expiration and termination.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tuserve::{Config, TusUploadService, UploadReaper};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let service = TusUploadService::from_config(&config)?;
//! let _reaper = UploadReaper::start(
//!     Arc::clone(service.storage()),
//!     Arc::clone(service.locking()),
//!     config.reaper_interval()?,
//!     config.stale_lock_grace()?,
//! );
//! // hand requests to service.process(&mut request, &mut response, owner_key)
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod chunked;
pub mod concatenation;
pub mod config;
pub mod error;
pub mod extension;
pub mod http;
pub mod reaper;
pub mod request;
pub mod response;
pub mod service;
pub mod storage;
pub mod upload;

pub use checksum::ChecksumAlgorithm;
pub use config::{Config, ConfigError};
pub use error::TusError;
pub use http::HttpMethod;
pub use reaper::UploadReaper;
pub use request::{HttpRequest, TusRequest};
pub use response::HttpResponse;
pub use service::TusUploadService;
pub use storage::{
    DiskLockingService, DiskStorageService, UploadLock, UploadLockingService,
    UploadStorageService,
};
pub use upload::{IdStrategy, UploadId, UploadIdFactory, UploadInfo, UploadType};
