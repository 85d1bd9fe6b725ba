//! Concatenation: deriving a final upload from its partial children
//!
//! A final upload never stores bytes of its own. Its length and offset are
//! derived from its children on every merge, and its content is a lazy
//! walk over the children's byte records in declared order.

use crate::error::TusError;
use crate::storage::UploadStorageService;
use crate::upload::{UploadId, UploadInfo};
use std::collections::VecDeque;
use std::io::{self, Read};
use tracing::debug;

/// Recompute the derived state of a concatenated upload from its children.
///
/// Length becomes the sum of child lengths once every child has declared
/// one. Offset becomes that same sum once every child is complete, and
/// stays 0 until then: a final upload is all-or-nothing. The derived state
/// is persisted only when the length is determinable, so a metadata-less
/// merge leaves no trace. Completed children get their expiration pushed
/// out so they cannot be reaped from under a still-pending merge.
pub fn merge(
    store: &dyn UploadStorageService,
    info: &mut UploadInfo,
) -> Result<(), TusError> {
    let owner_key = info.owner_key.clone();
    let mut children = Vec::with_capacity(info.concatenation_part_ids.len());
    for child_id in &info.concatenation_part_ids {
        let child = store
            .get_upload_info(child_id, owner_key.as_deref())?
            .ok_or_else(|| TusError::InvalidPartialUploadId(child_id.to_string()))?;
        children.push(child);
    }

    let all_have_length = children.iter().all(UploadInfo::has_length);
    let all_complete = children.iter().all(|c| !c.is_in_progress());
    let total: u64 = children.iter().filter_map(|c| c.length).sum();

    info.length = all_have_length.then_some(total);
    info.offset = if all_have_length && all_complete { total } else { 0 };

    if info.has_length() {
        store.update(info)?;
    }
    debug!(
        upload = ?info.id,
        length = ?info.length,
        complete = all_complete,
        "merged concatenated upload"
    );

    if let Some(period) = store.expiration_period() {
        for mut child in children {
            if !child.is_in_progress() {
                child.update_expiration(period);
                store.update(&child)?;
            }
        }
    }
    Ok(())
}

/// Reader over the merged content of a completed concatenated upload, or
/// `None` while any child is still in progress.
pub fn concatenated_reader<'a>(
    store: &'a dyn UploadStorageService,
    info: &UploadInfo,
) -> Result<Option<Box<dyn Read + Send + 'a>>, TusError> {
    let mut merged = info.clone();
    merge(store, &mut merged)?;
    if merged.is_in_progress() {
        return Ok(None);
    }
    Ok(Some(Box::new(PartChain {
        store,
        pending: merged.concatenation_part_ids.into_iter().collect(),
        current: None,
    })))
}

/// Walks child byte records one at a time, opening each lazily so that a
/// final upload with many parts never holds more than one file open.
struct PartChain<'a> {
    store: &'a dyn UploadStorageService,
    pending: VecDeque<UploadId>,
    current: Option<Box<dyn Read + Send>>,
}

impl Read for PartChain<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.current.is_none() {
                let Some(id) = self.pending.pop_front() else {
                    return Ok(0);
                };
                let part = self.store.part_bytes(&id).map_err(|e| {
                    io::Error::new(io::ErrorKind::Other, format!("part {}: {}", id, e))
                })?;
                self.current = Some(part);
            }
            let reader = match self.current.as_mut() {
                Some(reader) => reader,
                None => return Ok(0),
            };
            let n = reader.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskStorageService;
    use crate::upload::{IdStrategy, UploadIdFactory, UploadType};
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn service(dir: &TempDir, expiration: Option<Duration>) -> DiskStorageService {
        let factory = UploadIdFactory::new("/uploads", IdStrategy::Uuid).unwrap();
        DiskStorageService::new(dir.path(), factory, 0, expiration).unwrap()
    }

    fn partial(store: &DiskStorageService, content: &[u8], length: Option<u64>) -> UploadInfo {
        let mut info = UploadInfo::new();
        info.upload_type = UploadType::Partial;
        info.length = length;
        let created = store.create(info, None).unwrap();
        if content.is_empty() {
            created
        } else {
            store
                .append(&created, &mut Cursor::new(content.to_vec()))
                .unwrap()
        }
    }

    fn final_upload(store: &DiskStorageService, parts: &[&UploadInfo]) -> UploadInfo {
        let mut info = UploadInfo::new();
        info.upload_type = UploadType::Concatenated;
        let mut created = store.create(info, None).unwrap();
        created.concatenation_part_ids =
            parts.iter().map(|p| p.id.clone().unwrap()).collect();
        created
    }

    #[test]
    fn test_merge_of_complete_children() {
        let dir = tempdir().unwrap();
        let store = service(&dir, None);
        let a = partial(&store, b"hello ", Some(6));
        let b = partial(&store, b"world", Some(5));
        let mut fin = final_upload(&store, &[&a, &b]);

        merge(&store, &mut fin).unwrap();
        assert_eq!(fin.length, Some(11));
        assert_eq!(fin.offset, 11);
        assert!(!fin.is_in_progress());

        // derived state was persisted
        let reloaded = store
            .get_upload_info(fin.id.as_ref().unwrap(), None)
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.offset, 11);
    }

    #[test]
    fn test_merge_with_incomplete_child_keeps_offset_zero() {
        let dir = tempdir().unwrap();
        let store = service(&dir, None);
        let a = partial(&store, b"hello ", Some(6));
        let b = partial(&store, b"wor", Some(5));
        let mut fin = final_upload(&store, &[&a, &b]);

        merge(&store, &mut fin).unwrap();
        assert_eq!(fin.length, Some(11));
        assert_eq!(fin.offset, 0);
        assert!(fin.is_in_progress());
    }

    #[test]
    fn test_merge_with_deferred_child_length_stays_unknown() {
        let dir = tempdir().unwrap();
        let store = service(&dir, None);
        let a = partial(&store, b"hello ", Some(6));
        let b = partial(&store, b"", None);
        let mut fin = final_upload(&store, &[&a, &b]);

        merge(&store, &mut fin).unwrap();
        assert_eq!(fin.length, None);
        assert_eq!(fin.offset, 0);
    }

    #[test]
    fn test_merge_rejects_missing_child() {
        let dir = tempdir().unwrap();
        let store = service(&dir, None);
        let a = partial(&store, b"hello", Some(5));
        let mut fin = final_upload(&store, &[&a]);
        fin.concatenation_part_ids.push(UploadId::new("missing"));

        let err = merge(&store, &mut fin).unwrap_err();
        assert!(matches!(err, TusError::InvalidPartialUploadId(_)));
    }

    #[test]
    fn test_merge_refreshes_expiration_of_complete_children_only() {
        let dir = tempdir().unwrap();
        let store = service(&dir, Some(Duration::from_secs(3600)));
        let mut done = partial(&store, b"hello", Some(5));
        done.expiration_timestamp = Some(chrono::Utc::now());
        store.update(&done).unwrap();
        let mut pending = partial(&store, b"wo", Some(5));
        pending.expiration_timestamp = Some(chrono::Utc::now());
        store.update(&pending).unwrap();
        let mut fin = final_upload(&store, &[&done, &pending]);

        merge(&store, &mut fin).unwrap();

        let done_after = store
            .get_upload_info(done.id.as_ref().unwrap(), None)
            .unwrap()
            .unwrap();
        let pending_after = store
            .get_upload_info(pending.id.as_ref().unwrap(), None)
            .unwrap()
            .unwrap();
        assert!(done_after.expiration_timestamp > done.expiration_timestamp);
        assert_eq!(pending_after.expiration_timestamp, pending.expiration_timestamp);
    }

    #[test]
    fn test_reader_chains_parts_in_order() {
        let dir = tempdir().unwrap();
        let store = service(&dir, None);
        let a = partial(&store, b"hello ", Some(6));
        let b = partial(&store, b"world", Some(5));
        let fin = final_upload(&store, &[&a, &b]);

        let mut out = Vec::new();
        concatenated_reader(&store, &fin)
            .unwrap()
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_reader_unavailable_while_in_progress() {
        let dir = tempdir().unwrap();
        let store = service(&dir, None);
        let a = partial(&store, b"hel", Some(6));
        let fin = final_upload(&store, &[&a]);

        assert!(concatenated_reader(&store, &fin).unwrap().is_none());
    }
}
