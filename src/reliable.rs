//! Exact-length transfers over a byte stream.
//!
//! Every frame decoder sits on top of these. Callers either get exactly the
//! number of bytes they asked for or a [`Error::ConnectionClosed`], never a
//! partial result.

use std::io::{ErrorKind, Read, Write};

use crate::error::{Error, Result};

fn closed(context: &'static str, source: Option<std::io::Error>) -> Error {
    Error::ConnectionClosed { context, source }
}

/// Fill `buf` completely from `reader`
pub fn read_into<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], context: &'static str) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(closed(context, None)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(closed(context, Some(e))),
        }
    }
    Ok(())
}

/// Read exactly `n` bytes from `reader`
pub fn read_exact<R: Read + ?Sized>(reader: &mut R, n: usize, context: &'static str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    read_into(reader, &mut buf, context)?;
    Ok(buf)
}

/// Write every byte of `bytes` to `writer`, then flush
pub fn write_all<W: Write + ?Sized>(writer: &mut W, bytes: &[u8], context: &'static str) -> Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]) {
            Ok(0) => return Err(closed(context, None)),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(closed(context, Some(e))),
        }
    }
    writer.flush().map_err(|e| closed(context, Some(e)))
}
