//! Command text serialization and payload chunking.

use std::num::NonZeroUsize;
use std::slice::Chunks;

use crate::protocol::{Error, MAX_PAYLOAD_SIZE, Result};

/// Chunk size used when the caller does not pick one.
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = match NonZeroUsize::new(MAX_PAYLOAD_SIZE) {
    Some(size) => size,
    None => unreachable!(),
};

/// Join command lines into the single-byte stream sent to the worker.
///
/// Trailing `\r`/`\n` characters are stripped from every line and exactly one
/// `\n` is appended, so mixed line endings from files or editors collapse to
/// one terminator per line.
///
/// # Errors
///
/// Returns [`Error::NonAscii`] for the first character outside ASCII.
pub fn serialize_lines<I, S>(lines: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for (line_index, line) in lines.into_iter().enumerate() {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);
        if let Some((column, ch)) = line.chars().enumerate().find(|(_, ch)| !ch.is_ascii()) {
            return Err(Error::NonAscii {
                ch,
                line: line_index,
                column,
            });
        }
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

/// Split `data` into ordered slices of at most `size` bytes.
///
/// Only the last slice may be shorter; empty input yields no slices.
#[must_use]
pub fn chunk(data: &[u8], size: NonZeroUsize) -> Chunks<'_, u8> {
    data.chunks(size.get())
}

/// Number of chunks [`chunk`] produces for `len` bytes.
#[must_use]
pub const fn chunk_count(len: usize, size: NonZeroUsize) -> usize {
    len.div_ceil(size.get())
}

/// Validate a caller-supplied chunk size against the frame capacity.
///
/// # Errors
///
/// Returns [`Error::ChunkSizeOutOfRange`] for zero or anything above 250.
pub fn checked_chunk_size(size: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(size)
        .filter(|size| size.get() <= MAX_PAYLOAD_SIZE)
        .ok_or(Error::ChunkSizeOutOfRange {
            size,
            max: MAX_PAYLOAD_SIZE,
        })
}
