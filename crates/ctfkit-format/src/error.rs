//! Error type for container and archive decoding, building, and emission.

use crate::header::VERSION;

/// Error raised by the container model or the byte codecs.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("invalid magic: expected CTFC or CTFA")]
    InvalidMagic,
    #[error("unsupported version: {0} (expected {VERSION})")]
    UnsupportedVersion(u32),
    #[error("buffer too small: {0} bytes")]
    TooSmall(usize),
    #[error("size mismatch: header says {header} bytes, got {actual}")]
    SizeMismatch { header: u32, actual: usize },
    #[error("truncated {0} section")]
    Truncated(&'static str),
    #[error("unknown type kind {0}")]
    BadKind(u8),
    #[error("too many members: {0} (max 65535)")]
    TooManyMembers(usize),
    #[error("string table offset {0:#x} out of range")]
    BadStringRef(u32),
    #[error("no type with reference {0:#x}")]
    BadTypeRef(u32),
    #[error("conflicting definition for type `{0}`")]
    Conflict(String),
    #[error("variable `{0}` already defined with a different type")]
    DuplicateVariable(String),
    #[error("archive has no member named `{0}`")]
    MemberNotFound(String),
    #[error("duplicate archive member name `{0}`")]
    DuplicateMember(String),
    #[error("a container cannot import itself as its parent")]
    SelfImport,
}
