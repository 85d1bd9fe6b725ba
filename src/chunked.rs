//! Blocking decoder for chunked transfer encoding with trailer capture
//!
//! PATCH bodies may arrive chunked so that the client can append an
//! `Upload-Checksum` trailer once it has finished hashing the bytes it
//! sent. The decoder strips the chunk framing and records any trailer
//! headers into a shared map that the request wrapper consults after the
//! body has been drained.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;

/// Shared trailer storage. Keys are lowercased header names.
pub type TrailerMap = Arc<Mutex<HashMap<String, String>>>;

#[derive(Clone, Copy)]
enum ChunkState {
    /// Expecting a chunk-size line next
    SizeLine,
    /// Inside a chunk body with this many bytes left
    Body(u64),
    /// All chunks consumed, trailers recorded
    Done,
}

/// Streaming decoder over a raw chunked body.
///
/// Reads never cross a chunk boundary; callers see a plain byte stream
/// that ends when the terminating zero-size chunk has been consumed.
pub struct ChunkedReader<R: Read> {
    inner: BufReader<R>,
    state: ChunkState,
    trailers: TrailerMap,
}

impl<R: Read> ChunkedReader<R> {
    pub fn new(inner: R, trailers: TrailerMap) -> Self {
        ChunkedReader {
            inner: BufReader::new(inner),
            state: ChunkState::SizeLine,
            trailers,
        }
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        self.inner.read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn read_chunk_size(&mut self) -> io::Result<u64> {
        let line = self.read_line()?;
        // chunk extensions after ';' are ignored
        let size_part = line.split(';').next().unwrap_or("").trim();
        u64::from_str_radix(size_part, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size line: {:?}", line),
            )
        })
    }

    /// Consume trailer lines up to the blank line that ends the body.
    fn read_trailers(&mut self) -> io::Result<()> {
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(());
            }
            if let Some((name, value)) = line.split_once(':') {
                self.trailers
                    .lock()
                    .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
    }
}

impl<R: Read> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.state {
                ChunkState::Done => return Ok(0),
                ChunkState::SizeLine => {
                    let size = self.read_chunk_size()?;
                    if size == 0 {
                        self.read_trailers()?;
                        self.state = ChunkState::Done;
                        return Ok(0);
                    }
                    self.state = ChunkState::Body(size);
                }
                ChunkState::Body(remaining) => {
                    if buf.is_empty() {
                        return Ok(0);
                    }
                    let want = remaining.min(buf.len() as u64) as usize;
                    let n = self.inner.read(&mut buf[..want])?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "chunked body ended inside a chunk",
                        ));
                    }
                    let left = remaining - n as u64;
                    if left == 0 {
                        // swallow the CRLF that terminates the chunk data
                        let mut crlf = [0u8; 2];
                        self.inner.read_exact(&mut crlf)?;
                        self.state = ChunkState::SizeLine;
                    } else {
                        self.state = ChunkState::Body(left);
                    }
                    return Ok(n);
                }
            }
        }
    }
}
