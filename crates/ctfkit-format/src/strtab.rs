//! String table building and lookup.
//!
//! Containers store strings in a blob of NUL-terminated atoms; a string
//! reference is the byte offset of the atom, with the top bit selecting the
//! external table instead. External strings live in the host object's string
//! section and are referenced by the offset the host supplied; their content
//! is never copied into the blob.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::FormatError;

/// String reference bit selecting the external table.
pub const STR_EXTERNAL: u32 = 1 << 31;

/// Builds the string blob for one container emission.
///
/// Offset 0 always holds the empty atom, so reference 0 doubles as "no name".
/// Strings present in the external table encode as external references and
/// are not interned.
#[derive(Debug)]
pub struct StrtabBuilder<'a> {
    blob: Vec<u8>,
    offsets: HashMap<String, u32>,
    external: Option<&'a IndexMap<String, u32>>,
}

impl<'a> StrtabBuilder<'a> {
    pub fn new() -> Self {
        Self {
            blob: vec![0],
            offsets: HashMap::new(),
            external: None,
        }
    }

    /// A builder that prefers external references for known strings.
    pub fn with_external(external: &'a IndexMap<String, u32>) -> Self {
        let mut b = Self::new();
        b.external = Some(external);
        b
    }

    /// Encode a string: external reference if the external table knows it,
    /// otherwise an interned atom offset.
    pub fn encode(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.external.and_then(|ext| ext.get(s)) {
            return STR_EXTERNAL | offset;
        }
        self.intern(s)
    }

    /// Intern an atom unconditionally, bypassing the external table.
    pub fn intern(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.blob.len() as u32;
        self.blob.extend_from_slice(s.as_bytes());
        self.blob.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }

    /// Size of the blob built so far.
    pub fn len(&self) -> usize {
        self.blob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blob.len() <= 1
    }

    /// Finish and return the blob bytes.
    pub fn into_blob(self) -> Vec<u8> {
        self.blob
    }
}

impl Default for StrtabBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a string reference against a decoded blob.
///
/// Returns `None` for external references: their content lives in the host
/// string section and cannot be recovered from container bytes alone.
pub fn lookup_str(blob: &[u8], r: u32) -> Result<Option<&str>, FormatError> {
    if r & STR_EXTERNAL != 0 {
        return Ok(None);
    }
    let start = r as usize;
    if start >= blob.len() {
        return Err(FormatError::BadStringRef(r));
    }
    let end = blob[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::BadStringRef(r))?;
    let s = std::str::from_utf8(&blob[start..start + end])
        .map_err(|_| FormatError::BadStringRef(r))?;
    Ok(Some(s))
}
