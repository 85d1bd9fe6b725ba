//! Storage abstractions: upload persistence and per-upload locking

pub mod disk;
pub mod lock;

pub use disk::DiskStorageService;
pub use lock::{DiskLockingService, FileBasedLock};

use crate::error::TusError;
use crate::upload::{UploadId, UploadIdFactory, UploadInfo};
use std::io::Read;
use std::time::Duration;

/// Durable storage for uploads.
///
/// The metadata record and the byte record are independent: bytes can be
/// appended without rewriting metadata, and metadata (offset, length,
/// expiration) advances separately. Storage is the single source of truth
/// between requests; implementations never cache across calls.
pub trait UploadStorageService: Send + Sync {
    /// The upload collection URI template served by this storage.
    fn upload_uri(&self) -> &str;

    fn id_factory(&self) -> &UploadIdFactory;

    /// Upper bound on declared upload lengths. Zero means unlimited.
    fn max_upload_size(&self) -> u64;

    /// How long an upload stays alive after its last activity, when
    /// expiration is enabled.
    fn expiration_period(&self) -> Option<Duration>;

    /// Persist a new upload, assigning it a fresh id and the initial
    /// expiration timestamp.
    fn create(&self, info: UploadInfo, owner_key: Option<&str>)
        -> Result<UploadInfo, TusError>;

    /// Read the metadata record. An id that exists but belongs to a
    /// different owner key reads as absent, never as a permission error.
    fn get_upload_info(
        &self,
        id: &UploadId,
        owner_key: Option<&str>,
    ) -> Result<Option<UploadInfo>, TusError>;

    /// Resolve an item URI to its metadata record.
    fn get_upload_info_by_uri(
        &self,
        uri: &str,
        owner_key: Option<&str>,
    ) -> Result<Option<UploadInfo>, TusError> {
        match self.id_factory().read_upload_id(uri) {
            Some(id) => self.get_upload_info(&id, owner_key),
            None => Ok(None),
        }
    }

    /// Rewrite the metadata record.
    fn update(&self, info: &UploadInfo) -> Result<(), TusError>;

    /// Append the stream to the byte record at the stored offset and
    /// return the metadata with the advanced offset. The advanced offset
    /// is persisted even when the stream dies mid-copy, so the client can
    /// resume from what was durably written.
    fn append(&self, info: &UploadInfo, content: &mut dyn Read)
        -> Result<UploadInfo, TusError>;

    /// Truncate the last `byte_count` bytes, rolling the offset back.
    /// Used to discard a PATCH whose checksum did not verify.
    fn remove_last_bytes(
        &self,
        info: UploadInfo,
        byte_count: u64,
    ) -> Result<UploadInfo, TusError>;

    /// Reader over the content of a completed upload. `None` while the
    /// upload (or any concatenation child) is still in progress.
    fn uploaded_bytes(
        &self,
        id: &UploadId,
        owner_key: Option<&str>,
    ) -> Result<Option<Box<dyn Read + Send + '_>>, TusError>;

    /// Reader over the raw byte record of a single upload, regardless of
    /// upload type. Concatenation uses this to walk child records.
    fn part_bytes(&self, id: &UploadId) -> Result<Box<dyn Read + Send>, TusError>;

    /// Remove the upload and its bytes. Succeeds when the upload is
    /// already gone.
    fn terminate(&self, info: &UploadInfo) -> Result<(), TusError>;

    /// Delete uploads whose expiration timestamp has passed, skipping any
    /// that are currently locked. Returns the number removed.
    fn cleanup_expired_uploads(
        &self,
        locks: &dyn UploadLockingService,
    ) -> Result<usize, TusError>;
}

/// An exclusive claim on one upload, released on drop.
pub trait UploadLock: Send {
    fn id(&self) -> &UploadId;
}

/// Per-upload mutual exclusion across requests and background sweeps.
pub trait UploadLockingService: Send + Sync {
    /// Acquire the lock without blocking. A held lock surfaces as
    /// [`TusError::UploadAlreadyLocked`].
    fn lock_upload(&self, id: &UploadId) -> Result<Box<dyn UploadLock>, TusError>;

    /// Approximate probe: may race with concurrent acquisition, so the
    /// answer is advisory. Sweeps use it to skip busy uploads; it must
    /// never gate correctness.
    fn is_locked(&self, id: &UploadId) -> bool;

    /// Remove lock artifacts untouched for longer than `grace`. Returns
    /// the number removed.
    fn cleanup_stale_locks(&self, grace: Duration) -> Result<usize, TusError>;
}
