//! Opening CTF buffers of unknown shape.

use crate::archive::{Archive, ARCHIVE_MAGIC, CTF_MAIN};
use crate::container::Container;
use crate::debug::init_debug;
use crate::dprint;
use crate::error::FormatError;
use crate::header::CONTAINER_MAGIC;

/// Open a byte buffer holding either an archive or a single raw container.
///
/// A raw container is presented as an archive with one [`CTF_MAIN`] member,
/// so callers can treat both shapes uniformly. The first open also latches
/// the process-wide debug toggle.
pub fn open_bytes(bytes: &[u8]) -> Result<Archive, FormatError> {
    init_debug();

    if bytes.len() >= 4 && bytes[0..4] == ARCHIVE_MAGIC {
        return Archive::parse(bytes);
    }
    if bytes.len() >= 4 && bytes[0..4] == CONTAINER_MAGIC {
        Container::parse(bytes)?;
        let mut arc = Archive::new();
        arc.insert_raw(CTF_MAIN, bytes.to_vec())?;
        return Ok(arc);
    }
    dprint!("cannot open CTF buffer: unrecognized magic");
    Err(FormatError::InvalidMagic)
}
