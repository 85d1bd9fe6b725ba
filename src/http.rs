//! HTTP vocabulary of the tus protocol: methods, header names, constants

use std::fmt;

/// Version of the tus protocol implemented by this engine
pub const TUS_API_VERSION: &str = "1.0.0";

/// The only Content-Type accepted on PATCH requests
pub const APPLICATION_OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// HTTP methods recognized by the upload engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    /// Parse a request method name. Returns `None` for anything the engine
    /// does not handle (PUT, TRACE, ...), which callers must reject.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "HEAD" => Some(HttpMethod::Head),
            "POST" => Some(HttpMethod::Post),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header names used by the protocol. Handlers and validators refer to
/// these constants, never to literal strings.
pub mod header {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const LOCATION: &str = "Location";

    pub const TUS_RESUMABLE: &str = "Tus-Resumable";
    pub const TUS_VERSION: &str = "Tus-Version";
    pub const TUS_EXTENSION: &str = "Tus-Extension";
    pub const TUS_MAX_SIZE: &str = "Tus-Max-Size";
    pub const TUS_CHECKSUM_ALGORITHM: &str = "Tus-Checksum-Algorithm";

    pub const UPLOAD_OFFSET: &str = "Upload-Offset";
    pub const UPLOAD_LENGTH: &str = "Upload-Length";
    pub const UPLOAD_DEFER_LENGTH: &str = "Upload-Defer-Length";
    pub const UPLOAD_METADATA: &str = "Upload-Metadata";
    pub const UPLOAD_CONCAT: &str = "Upload-Concat";
    pub const UPLOAD_CHECKSUM: &str = "Upload-Checksum";
    pub const UPLOAD_EXPIRES: &str = "Upload-Expires";
}
