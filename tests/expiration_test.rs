//! Expiration and lock hygiene: Upload-Expires, sweeps, lock conflicts

mod common;

use common::{create_upload, head, patch, server_with, MockRequest};
use std::time::Duration;

#[test]
fn test_upload_expires_header_on_post_and_patch() {
    let server = server_with(0, Some(Duration::from_secs(3600)));
    let response = server.run(
        MockRequest::tus("POST", "/uploads").header("Upload-Length", "11"),
    );
    assert_eq!(response.status, 201);
    let expires = response.get("Upload-Expires").unwrap();
    assert!(expires.ends_with("GMT"), "not RFC 7231 formatted: {}", expires);

    let location = response.get("Location").unwrap().to_string();
    let patched = patch(&server, &location, 0, b"hello ");
    assert_eq!(patched.status, 204);
    assert!(patched.get("Upload-Expires").is_some());
}

#[test]
fn test_no_expires_header_without_a_period() {
    let server = server_with(0, None);
    let response = server.run(
        MockRequest::tus("POST", "/uploads").header("Upload-Length", "5"),
    );
    assert_eq!(response.status, 201);
    assert_eq!(response.get("Upload-Expires"), None);
}

#[test]
fn test_failed_patch_does_not_refresh_expiration() {
    let server = server_with(0, Some(Duration::from_secs(3600)));
    let location = create_upload(&server, Some(11));
    let before = server
        .service
        .storage()
        .get_upload_info_by_uri(&location, None)
        .unwrap()
        .unwrap()
        .expiration_timestamp;

    // offset mismatch fails before any handler runs
    let response = patch(&server, &location, 5, b"hello");
    assert_eq!(response.status, 409);
    assert_eq!(response.get("Upload-Expires"), None);

    let after = server
        .service
        .storage()
        .get_upload_info_by_uri(&location, None)
        .unwrap()
        .unwrap()
        .expiration_timestamp;
    assert_eq!(before, after);
}

#[test]
fn test_expired_upload_is_swept() {
    let server = server_with(0, Some(Duration::from_secs(3600)));
    let location = create_upload(&server, Some(5));

    let storage = server.service.storage();
    let mut info = storage
        .get_upload_info_by_uri(&location, None)
        .unwrap()
        .unwrap();
    info.expiration_timestamp = Some(chrono::Utc::now() - chrono::Duration::seconds(60));
    storage.update(&info).unwrap();

    let removed = storage
        .cleanup_expired_uploads(server.service.locking().as_ref())
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(head(&server, &location).status, 404);
}

#[test]
fn test_sweep_spares_locked_uploads() {
    let server = server_with(0, Some(Duration::from_secs(3600)));
    let location = create_upload(&server, Some(5));

    let storage = server.service.storage();
    let mut info = storage
        .get_upload_info_by_uri(&location, None)
        .unwrap()
        .unwrap();
    info.expiration_timestamp = Some(chrono::Utc::now() - chrono::Duration::seconds(60));
    let id = info.id.clone().unwrap();
    storage.update(&info).unwrap();

    let guard = server.service.locking().lock_upload(&id).unwrap();
    let removed = storage
        .cleanup_expired_uploads(server.service.locking().as_ref())
        .unwrap();
    assert_eq!(removed, 0);
    drop(guard);

    let removed = storage
        .cleanup_expired_uploads(server.service.locking().as_ref())
        .unwrap();
    assert_eq!(removed, 1);
}

#[test]
fn test_locked_upload_returns_423() {
    let server = server_with(0, None);
    let location = create_upload(&server, Some(5));
    let id = server
        .service
        .storage()
        .id_factory()
        .read_upload_id(&location)
        .unwrap();

    let guard = server.service.locking().lock_upload(&id).unwrap();
    let response = patch(&server, &location, 0, b"hello");
    assert_eq!(response.status, 423);
    // the error response still carries the protocol headers
    assert_eq!(response.get("Tus-Resumable"), Some("1.0.0"));
    drop(guard);

    let retry = patch(&server, &location, 0, b"hello");
    assert_eq!(retry.status, 204);
}

#[test]
fn test_released_lock_files_are_collected() {
    let server = server_with(0, None);
    let location = create_upload(&server, Some(5));
    patch(&server, &location, 0, b"hello");

    // every request leaves its lock file behind once released
    let removed = server
        .service
        .locking()
        .cleanup_stale_locks(Duration::ZERO)
        .unwrap();
    assert!(removed >= 1);
}
