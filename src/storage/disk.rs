//! Filesystem storage backend
//!
//! Each upload lives in its own directory under `{root}/uploads/`:
//! `info.json` holds the metadata record, `data` the byte record. The two
//! evolve independently; `info.json` is always rewritten atomically via a
//! temp file rename so a crashed write can never leave a half-written
//! record behind.

use crate::concatenation;
use crate::error::TusError;
use crate::storage::{UploadLockingService, UploadStorageService};
use crate::upload::{UploadId, UploadIdFactory, UploadInfo, UploadType};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const COPY_BUF_SIZE: usize = 64 * 1024;

pub struct DiskStorageService {
    uploads_dir: PathBuf,
    id_factory: UploadIdFactory,
    max_upload_size: u64,
    expiration_period: Option<Duration>,
}

impl DiskStorageService {
    pub fn new(
        storage_root: impl AsRef<Path>,
        id_factory: UploadIdFactory,
        max_upload_size: u64,
        expiration_period: Option<Duration>,
    ) -> Result<Self, TusError> {
        let uploads_dir = storage_root.as_ref().join("uploads");
        fs::create_dir_all(&uploads_dir).map_err(TusError::Io)?;
        Ok(DiskStorageService {
            uploads_dir,
            id_factory,
            max_upload_size,
            expiration_period,
        })
    }

    fn upload_dir(&self, id: &UploadId) -> PathBuf {
        self.uploads_dir.join(id.as_str())
    }

    fn info_path(&self, id: &UploadId) -> PathBuf {
        self.upload_dir(id).join("info.json")
    }

    fn data_path(&self, id: &UploadId) -> PathBuf {
        self.upload_dir(id).join("data")
    }

    fn read_info(&self, id: &UploadId) -> Result<Option<UploadInfo>, TusError> {
        let bytes = match fs::read(self.info_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TusError::Io(e)),
        };
        let info = serde_json::from_slice(&bytes).map_err(|e| {
            TusError::Storage(format!("corrupt metadata record for upload {}: {}", id, e))
        })?;
        Ok(Some(info))
    }

    /// Atomic rewrite of the metadata record: write to a temp file in the
    /// same directory, fsync, rename over the old record.
    fn write_info(&self, info: &UploadInfo) -> Result<(), TusError> {
        let id = required_id(info)?;
        let dir = self.upload_dir(id);
        let tmp = NamedTempFile::new_in(&dir).map_err(TusError::Io)?;
        serde_json::to_writer(tmp.as_file(), info)
            .map_err(|e| TusError::Storage(format!("cannot serialize upload {}: {}", id, e)))?;
        tmp.as_file().sync_all().map_err(TusError::Io)?;
        tmp.persist(self.info_path(id))
            .map_err(|e| TusError::Io(e.error))?;
        Ok(())
    }

    /// How many more bytes this upload may accept.
    fn remaining_capacity(&self, info: &UploadInfo) -> u64 {
        match info.length {
            Some(length) => length.saturating_sub(info.offset),
            // deferred length: capped by the configured maximum only
            None if self.max_upload_size > 0 => {
                self.max_upload_size.saturating_sub(info.offset)
            }
            None => u64::MAX,
        }
    }
}

fn required_id(info: &UploadInfo) -> Result<&UploadId, TusError> {
    info.id
        .as_ref()
        .ok_or_else(|| TusError::Storage("upload record has no id".into()))
}

impl UploadStorageService for DiskStorageService {
    fn upload_uri(&self) -> &str {
        self.id_factory.upload_uri()
    }

    fn id_factory(&self) -> &UploadIdFactory {
        &self.id_factory
    }

    fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    fn expiration_period(&self) -> Option<Duration> {
        self.expiration_period
    }

    fn create(
        &self,
        info: UploadInfo,
        owner_key: Option<&str>,
    ) -> Result<UploadInfo, TusError> {
        let mut info = info;
        // regenerate on the (unlikely) collision with an existing directory
        let id = loop {
            let candidate = self.id_factory.create_id();
            if !self.upload_dir(&candidate).exists() {
                break candidate;
            }
        };
        fs::create_dir_all(self.upload_dir(&id)).map_err(TusError::Io)?;
        info.id = Some(id.clone());
        info.owner_key = owner_key.map(str::to_string);
        info.offset = 0;
        if let Some(period) = self.expiration_period {
            info.update_expiration(period);
        }
        File::create(self.data_path(&id)).map_err(TusError::Io)?;
        self.write_info(&info)?;
        info!(upload = %id, length = ?info.length, "created upload");
        Ok(info)
    }

    fn get_upload_info(
        &self,
        id: &UploadId,
        owner_key: Option<&str>,
    ) -> Result<Option<UploadInfo>, TusError> {
        let Some(info) = self.read_info(id)? else {
            return Ok(None);
        };
        // a foreign owner key reads as absent
        if info.owner_key.as_deref() != owner_key {
            return Ok(None);
        }
        Ok(Some(info))
    }

    fn update(&self, info: &UploadInfo) -> Result<(), TusError> {
        self.write_info(info)
    }

    fn append(
        &self,
        info: &UploadInfo,
        content: &mut dyn Read,
    ) -> Result<UploadInfo, TusError> {
        let mut info = info.clone();
        let id = required_id(&info)?.clone();
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.data_path(&id))
            .map_err(TusError::Io)?;
        file.seek(SeekFrom::Start(info.offset)).map_err(TusError::Io)?;

        let mut remaining = self.remaining_capacity(&info);
        let mut written: u64 = 0;
        let mut buf = [0u8; COPY_BUF_SIZE];
        let copy_result = loop {
            if remaining == 0 {
                break Ok(());
            }
            let want = (buf.len() as u64).min(remaining) as usize;
            match content.read(&mut buf[..want]) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = file.write_all(&buf[..n]) {
                        break Err(e);
                    }
                    written += n as u64;
                    remaining -= n as u64;
                }
                Err(e) => break Err(e),
            }
        };
        // probe past the cap so a framed stream reaches its terminator (a
        // chunked body surfaces its trailers only at end of stream). A body
        // that still has content here exceeds the upload's capacity.
        let mut excess = false;
        if copy_result.is_ok() && remaining == 0 {
            if let Ok(n) = content.read(&mut buf[..1]) {
                excess = n > 0;
            }
        }
        file.sync_all().map_err(TusError::Io)?;

        // persist whatever made it to disk, even when the stream died: the
        // client resumes from the advanced offset
        info.offset += written;
        self.write_info(&info)?;
        debug!(upload = %id, written, offset = info.offset, "appended bytes");

        copy_result.map_err(TusError::Io)?;
        if excess {
            return Err(TusError::InvalidContentLength(format!(
                "The request body exceeds the remaining {} bytes of upload {}",
                written, id
            )));
        }
        Ok(info)
    }

    fn remove_last_bytes(
        &self,
        info: UploadInfo,
        byte_count: u64,
    ) -> Result<UploadInfo, TusError> {
        let mut info = info;
        let id = required_id(&info)?.clone();
        let new_offset = info.offset.saturating_sub(byte_count);
        let file = OpenOptions::new()
            .write(true)
            .open(self.data_path(&id))
            .map_err(TusError::Io)?;
        file.set_len(new_offset).map_err(TusError::Io)?;
        file.sync_all().map_err(TusError::Io)?;
        info.offset = new_offset;
        self.write_info(&info)?;
        debug!(upload = %id, removed = byte_count, offset = new_offset, "rolled back bytes");
        Ok(info)
    }

    fn uploaded_bytes(
        &self,
        id: &UploadId,
        owner_key: Option<&str>,
    ) -> Result<Option<Box<dyn Read + Send + '_>>, TusError> {
        let Some(info) = self.get_upload_info(id, owner_key)? else {
            return Err(TusError::UploadNotFound(id.to_string()));
        };
        match info.upload_type {
            UploadType::Concatenated => concatenation::concatenated_reader(self, &info),
            _ if info.is_in_progress() => Ok(None),
            _ => Ok(Some(self.part_bytes(id)?)),
        }
    }

    fn part_bytes(&self, id: &UploadId) -> Result<Box<dyn Read + Send>, TusError> {
        match File::open(self.data_path(id)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TusError::UploadNotFound(id.to_string()))
            }
            Err(e) => Err(TusError::Io(e)),
        }
    }

    fn terminate(&self, info: &UploadInfo) -> Result<(), TusError> {
        let id = required_id(info)?;
        match fs::remove_dir_all(self.upload_dir(id)) {
            Ok(()) => {
                info!(upload = %id, "terminated upload");
                Ok(())
            }
            // termination of an already-absent upload succeeds
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TusError::Io(e)),
        }
    }

    fn cleanup_expired_uploads(
        &self,
        locks: &dyn UploadLockingService,
    ) -> Result<usize, TusError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.uploads_dir).map_err(TusError::Io)? {
            let entry = entry.map_err(TusError::Io)?;
            let id = UploadId::new(entry.file_name().to_string_lossy());
            let info = match self.read_info(&id) {
                Ok(Some(info)) => info,
                Ok(None) => continue,
                Err(e) => {
                    warn!(upload = %id, error = %e, "skipping unreadable upload during sweep");
                    continue;
                }
            };
            if !info.is_expired() || locks.is_locked(&id) {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    info!(upload = %id, "removed expired upload");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(upload = %id, error = %e, "failed to remove expired upload");
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskLockingService;
    use crate::upload::IdStrategy;
    use chrono::Utc;
    use std::io::Cursor;
    use tempfile::{tempdir, TempDir};

    fn service(dir: &TempDir) -> DiskStorageService {
        let factory = UploadIdFactory::new("/uploads", IdStrategy::Uuid).unwrap();
        DiskStorageService::new(dir.path(), factory, 0, None).unwrap()
    }

    fn read_all(store: &DiskStorageService, id: &UploadId) -> Vec<u8> {
        let mut out = Vec::new();
        store.part_bytes(id).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_create_then_read_back() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let mut info = UploadInfo::new();
        info.length = Some(5);
        let created = store.create(info, Some("owner-1")).unwrap();
        let id = created.id.clone().unwrap();

        let loaded = store.get_upload_info(&id, Some("owner-1")).unwrap().unwrap();
        assert_eq!(loaded.length, Some(5));
        assert_eq!(loaded.offset, 0);
    }

    #[test]
    fn test_owner_mismatch_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let created = store.create(UploadInfo::new(), Some("owner-1")).unwrap();
        let id = created.id.unwrap();

        assert!(store.get_upload_info(&id, Some("owner-2")).unwrap().is_none());
        assert!(store.get_upload_info(&id, None).unwrap().is_none());
        assert!(store.get_upload_info(&id, Some("owner-1")).unwrap().is_some());
    }

    #[test]
    fn test_append_advances_offset_and_caps_at_length() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let mut info = UploadInfo::new();
        info.length = Some(5);
        let created = store.create(info, None).unwrap();

        let mut body = Cursor::new(b"hello and then some extra".to_vec());
        let err = store.append(&created, &mut body).unwrap_err();
        assert!(matches!(err, TusError::InvalidContentLength(_)));
        // the capped write is still persisted so the client can resume
        let id = created.id.as_ref().unwrap();
        let reloaded = store.get_upload_info(id, None).unwrap().unwrap();
        assert_eq!(reloaded.offset, 5);
        assert_eq!(read_all(&store, id), b"hello");
    }

    #[test]
    fn test_append_in_two_patches() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let mut info = UploadInfo::new();
        info.length = Some(11);
        let created = store.create(info, None).unwrap();

        let first = store.append(&created, &mut Cursor::new(b"hello ".to_vec())).unwrap();
        assert_eq!(first.offset, 6);
        let second = store.append(&first, &mut Cursor::new(b"world".to_vec())).unwrap();
        assert_eq!(second.offset, 11);
        assert!(!second.is_in_progress());
        assert_eq!(read_all(&store, second.id.as_ref().unwrap()), b"hello world");
    }

    #[test]
    fn test_append_persists_offset_when_stream_dies() {
        struct FailingReader {
            sent: bool,
        }
        impl Read for FailingReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.sent {
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
                } else {
                    self.sent = true;
                    buf[..3].copy_from_slice(b"abc");
                    Ok(3)
                }
            }
        }

        let dir = tempdir().unwrap();
        let store = service(&dir);
        let mut info = UploadInfo::new();
        info.length = Some(10);
        let created = store.create(info, None).unwrap();
        let id = created.id.clone().unwrap();

        let err = store.append(&created, &mut FailingReader { sent: false });
        assert!(err.is_err());

        // the three bytes that arrived are durable and resumable
        let reloaded = store.get_upload_info(&id, None).unwrap().unwrap();
        assert_eq!(reloaded.offset, 3);
        assert_eq!(read_all(&store, &id), b"abc");
    }

    #[test]
    fn test_remove_last_bytes_rolls_back() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let mut info = UploadInfo::new();
        info.length = Some(11);
        let created = store.create(info, None).unwrap();
        let appended = store
            .append(&created, &mut Cursor::new(b"hello world".to_vec()))
            .unwrap();

        let rolled = store.remove_last_bytes(appended, 5).unwrap();
        assert_eq!(rolled.offset, 6);
        assert_eq!(read_all(&store, rolled.id.as_ref().unwrap()), b"hello ");
    }

    #[test]
    fn test_uploaded_bytes_requires_completion() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let mut info = UploadInfo::new();
        info.length = Some(5);
        let created = store.create(info, None).unwrap();
        let id = created.id.clone().unwrap();

        assert!(store.uploaded_bytes(&id, None).unwrap().is_none());

        store.append(&created, &mut Cursor::new(b"hello".to_vec())).unwrap();
        let mut out = Vec::new();
        store
            .uploaded_bytes(&id, None)
            .unwrap()
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let created = store.create(UploadInfo::new(), None).unwrap();
        let id = created.id.clone().unwrap();

        store.terminate(&created).unwrap();
        assert!(store.get_upload_info(&id, None).unwrap().is_none());
        store.terminate(&created).unwrap();
    }

    #[test]
    fn test_expired_sweep_skips_locked_uploads() {
        let dir = tempdir().unwrap();
        let store = service(&dir);
        let locks = DiskLockingService::new(dir.path()).unwrap();

        let mut expired = store.create(UploadInfo::new(), None).unwrap();
        expired.expiration_timestamp = Some(Utc::now() - chrono::Duration::seconds(60));
        store.update(&expired).unwrap();

        let mut locked = store.create(UploadInfo::new(), None).unwrap();
        locked.expiration_timestamp = Some(Utc::now() - chrono::Duration::seconds(60));
        store.update(&locked).unwrap();

        let fresh = store.create(UploadInfo::new(), None).unwrap();

        let _guard = locks.lock_upload(locked.id.as_ref().unwrap()).unwrap();
        let removed = store.cleanup_expired_uploads(&locks).unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .get_upload_info(expired.id.as_ref().unwrap(), None)
            .unwrap()
            .is_none());
        assert!(store
            .get_upload_info(locked.id.as_ref().unwrap(), None)
            .unwrap()
            .is_some());
        assert!(store
            .get_upload_info(fresh.id.as_ref().unwrap(), None)
            .unwrap()
            .is_some());
    }
}
