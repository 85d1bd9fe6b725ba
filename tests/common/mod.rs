#![allow(dead_code)]

//! Shared mock transport and service builder for the integration tests

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::time::Duration;
use tempfile::TempDir;
use tuserve::{HttpRequest, HttpResponse, TusError, TusUploadService};

pub struct MockRequest {
    method: String,
    uri: String,
    headers: HashMap<String, String>,
    body: Option<Box<dyn Read + Send>>,
}

impl MockRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        MockRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Request carrying the protocol version header, like any conforming
    /// client would send.
    pub fn tus(method: &str, uri: &str) -> Self {
        Self::new(method, uri).header("Tus-Resumable", "1.0.0")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn body(mut self, content: &[u8]) -> Self {
        self.body = Some(Box::new(Cursor::new(content.to_vec())));
        self.header("Content-Length", &content.len().to_string())
    }

    /// Body with chunked framing and an optional trailer line, the way a
    /// streaming client sends a checksum it computes on the fly.
    pub fn chunked_body(mut self, content: &[u8], trailer: Option<(&str, &str)>) -> Self {
        let mut framed = Vec::new();
        framed.extend_from_slice(format!("{:x}\r\n", content.len()).as_bytes());
        framed.extend_from_slice(content);
        framed.extend_from_slice(b"\r\n0\r\n");
        if let Some((name, value)) = trailer {
            framed.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        framed.extend_from_slice(b"\r\n");
        self.body = Some(Box::new(Cursor::new(framed)));
        self.header("Transfer-Encoding", "chunked")
    }
}

impl HttpRequest for MockRequest {
    fn method_name(&self) -> &str {
        &self.method
    }

    fn request_uri(&self) -> &str {
        &self.uri
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn take_body(&mut self) -> Box<dyn Read + Send> {
        self.body
            .take()
            .unwrap_or_else(|| Box::new(Cursor::new(Vec::new())))
    }
}

#[derive(Default)]
pub struct MockResponse {
    pub status: u16,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn new() -> Self {
        MockResponse {
            status: 200,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl HttpResponse for MockResponse {
    fn set_status(&mut self, code: u16) {
        self.status = code;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn copy_body(&mut self, content: &mut dyn Read) -> io::Result<u64> {
        io::copy(content, &mut self.body)
    }
}

pub struct TestServer {
    pub service: TusUploadService,
    // keeps the storage directory alive for the test's duration
    pub dir: TempDir,
}

impl TestServer {
    pub fn run(&self, mut request: MockRequest) -> MockResponse {
        self.run_as(&mut request, None).0
    }

    pub fn run_as(
        &self,
        request: &mut MockRequest,
        owner_key: Option<&str>,
    ) -> (MockResponse, Result<(), TusError>) {
        let mut response = MockResponse::new();
        let result = self.service.process(request, &mut response, owner_key);
        (response, result)
    }
}

pub fn server() -> TestServer {
    server_with(0, None)
}

pub fn server_with(max_upload_size: u64, expiration: Option<Duration>) -> TestServer {
    let dir = TempDir::new().unwrap();
    let config = tuserve::Config {
        storage_root: dir.path().to_path_buf(),
        max_upload_size,
        expiration_period: expiration.map(|d| format!("{}s", d.as_secs())),
        ..tuserve::Config::default()
    };
    let service = TusUploadService::from_config(&config).unwrap();
    TestServer { service, dir }
}

/// POST a new upload and return its Location.
pub fn create_upload(server: &TestServer, length: Option<u64>) -> String {
    let mut request = MockRequest::tus("POST", "/uploads");
    request = match length {
        Some(length) => request.header("Upload-Length", &length.to_string()),
        None => request.header("Upload-Defer-Length", "1"),
    };
    let response = server.run(request);
    assert_eq!(response.status, 201, "upload creation failed");
    response.get("Location").unwrap().to_string()
}

/// PATCH `content` at `offset` and return the response.
pub fn patch(server: &TestServer, location: &str, offset: u64, content: &[u8]) -> MockResponse {
    server.run(
        MockRequest::tus("PATCH", location)
            .header("Content-Type", "application/offset+octet-stream")
            .header("Upload-Offset", &offset.to_string())
            .body(content),
    )
}

pub fn head(server: &TestServer, location: &str) -> MockResponse {
    server.run(MockRequest::tus("HEAD", location))
}
