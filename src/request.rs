//! Transport-facing request trait and the engine-side request wrapper

use crate::checksum::ChecksumAlgorithm;
use crate::chunked::{ChunkedReader, TrailerMap};
use crate::http::header;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use digest::DynDigest;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Minimal request surface a transport adapter must provide.
///
/// `take_body` hands ownership of the raw byte stream to the engine;
/// it is called at most once per request.
pub trait HttpRequest: Send {
    fn method_name(&self) -> &str;
    fn request_uri(&self) -> &str;
    fn header(&self, name: &str) -> Option<String>;
    fn take_body(&mut self) -> Box<dyn Read + Send>;
}

type SharedDigester = Arc<Mutex<Box<dyn DynDigest + Send>>>;

/// Counts the bytes that flow through it. The counter is shared so the
/// service can read it after the storage layer has consumed the stream.
struct CountingReader<R> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Feeds every byte it passes on into a streaming digester.
struct DigestReader<R> {
    inner: R,
    digester: SharedDigester,
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.digester.lock().update(&buf[..n]);
        }
        Ok(n)
    }
}

/// Engine-side view of one request.
///
/// Construction assembles the body pipeline once: chunked decoding with
/// trailer capture when the transfer encoding asks for it, a byte counter,
/// and incremental digest layers. When the checksum algorithm is named up
/// front only that digest is computed; a chunked body may carry the
/// `Upload-Checksum` header as a trailer that is only known after the last
/// byte, so in that case all supported digests are computed speculatively.
pub struct TusRequest<'a> {
    raw: &'a mut dyn HttpRequest,
    content: Box<dyn Read + Send>,
    bytes_read: Arc<AtomicU64>,
    trailers: TrailerMap,
    digesters: Vec<(ChecksumAlgorithm, SharedDigester)>,
    chunked: bool,
}

impl<'a> TusRequest<'a> {
    pub fn new(raw: &'a mut dyn HttpRequest, chunked_decoding: bool) -> Self {
        let chunked = raw
            .header(header::TRANSFER_ENCODING)
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        let trailers: TrailerMap = Arc::new(Mutex::new(HashMap::new()));
        let bytes_read = Arc::new(AtomicU64::new(0));

        let mut reader: Box<dyn Read + Send> = raw.take_body();
        if chunked && chunked_decoding {
            reader = Box::new(ChunkedReader::new(reader, Arc::clone(&trailers)));
        }
        reader = Box::new(CountingReader {
            inner: reader,
            counter: Arc::clone(&bytes_read),
        });

        let algorithms: Vec<ChecksumAlgorithm> = if chunked {
            ChecksumAlgorithm::ALL.to_vec()
        } else {
            raw.header(header::UPLOAD_CHECKSUM)
                .as_deref()
                .and_then(ChecksumAlgorithm::from_checksum_header)
                .into_iter()
                .collect()
        };

        let mut digesters = Vec::with_capacity(algorithms.len());
        for algorithm in algorithms {
            let digester: SharedDigester = Arc::new(Mutex::new(algorithm.digester()));
            reader = Box::new(DigestReader {
                inner: reader,
                digester: Arc::clone(&digester),
            });
            digesters.push((algorithm, digester));
        }

        TusRequest {
            raw,
            content: reader,
            bytes_read,
            trailers,
            digesters,
            chunked,
        }
    }

    pub fn request_uri(&self) -> &str {
        self.raw.request_uri()
    }

    /// Header lookup that sees trailers once the body has been drained.
    pub fn header(&self, name: &str) -> Option<String> {
        match self.raw.header(name) {
            Some(value) if !value.trim().is_empty() => Some(value),
            _ => self.trailers.lock().get(&name.to_ascii_lowercase()).cloned(),
        }
    }

    /// The decoded body stream. Reading it advances the byte counter and
    /// the digest layers.
    pub fn body_mut(&mut self) -> &mut (dyn Read + Send) {
        &mut *self.content
    }

    /// Bytes of decoded content consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Whether any digest was computed over the body.
    pub fn has_calculated_checksum(&self) -> bool {
        !self.digesters.is_empty()
    }

    /// Base64 digest of the consumed body for one algorithm, if that
    /// algorithm was part of the pipeline.
    pub fn calculated_checksum(&self, algorithm: ChecksumAlgorithm) -> Option<String> {
        self.digesters
            .iter()
            .find(|(a, _)| *a == algorithm)
            .map(|(_, digester)| STANDARD.encode(digester.lock().finalize_reset()))
    }
}
