//! CTF container and archive model.
//!
//! This crate contains:
//! - The in-memory container: type table, variables, string atoms, parent link
//! - Type references (locality bit + 1-based index) and type definitions
//! - Container finalization and the sectioned byte codec
//! - The archive codec (named members, reserved `".ctf"` default)
//! - The magic-sniffing opener and the process-wide debug toggle

pub mod archive;
pub mod container;
pub mod debug;
pub mod header;
pub mod open;
pub mod strtab;
pub mod typeref;
pub mod types;

mod error;

#[cfg(test)]
mod strtab_tests;

pub use archive::{
    write_archive, Archive, ARCHIVE_MAGIC, ARCHIVE_VERSION, CTF_MAIN, MEMBER_OVER_THRESHOLD,
};
pub use container::{Container, ContainerHandle, ContainerId};
pub use debug::{debug_enabled, init_debug};
pub use error::FormatError;
pub use header::{Header, SectionOffsets, CONTAINER_MAGIC, HEADER_SIZE, VERSION};
pub use open::open_bytes;
pub use strtab::{StrtabBuilder, STR_EXTERNAL};
pub use typeref::TypeRef;
pub use types::{Member, Namespace, TypeDef, TypeKind};
