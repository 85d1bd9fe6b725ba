//! Transport-facing response trait

use std::io::{self, Read};

/// Minimal response surface a transport adapter must provide.
///
/// Headers must be readable after being set: later handlers depend on
/// values earlier handlers wrote (the creation handler's `Location` is
/// read by the expiration and concatenation handlers on POST).
pub trait HttpResponse {
    fn set_status(&mut self, code: u16);
    fn set_header(&mut self, name: &str, value: &str);
    fn header(&self, name: &str) -> Option<String>;

    /// Stream a body into the response, returning the bytes copied.
    fn copy_body(&mut self, content: &mut dyn Read) -> io::Result<u64>;
}
