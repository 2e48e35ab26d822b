//! CTF archives: named collections of serialized containers.
//!
//! Archive layout: 16-byte header (magic, version, member count, name blob
//! size), a member entry table, the name blob, then member payloads. Members
//! keep their caller-supplied order; the default member conventionally comes
//! first under the reserved name [`CTF_MAIN`].

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::container::{Container, ContainerHandle};
use crate::error::FormatError;
use crate::strtab::lookup_str;

/// Reserved name of an archive's default member.
pub const CTF_MAIN: &str = ".ctf";

/// Magic bytes for a serialized archive.
pub const ARCHIVE_MAGIC: [u8; 4] = *b"CTFA";

/// Archive format version.
pub const ARCHIVE_VERSION: u32 = 1;

/// Member flag: the payload exceeded the compression threshold when written.
pub const MEMBER_OVER_THRESHOLD: u32 = 1;

const ARCHIVE_HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 16;

#[derive(Clone, Debug)]
struct ArchiveMember {
    data: Vec<u8>,
    flags: u32,
}

/// An ordered, named collection of serialized containers.
#[derive(Clone, Debug, Default)]
pub struct Archive {
    members: IndexMap<String, ArchiveMember>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalize `container` and add its bytes under `name`.
    pub fn insert(&mut self, name: &str, container: &mut Container) -> Result<(), FormatError> {
        let data = container.write_mem()?;
        self.insert_raw(name, data)
    }

    /// Add already-serialized container bytes under `name`.
    pub fn insert_raw(&mut self, name: &str, data: Vec<u8>) -> Result<(), FormatError> {
        if self.members.contains_key(name) {
            return Err(FormatError::DuplicateMember(name.to_string()));
        }
        self.members
            .insert(name.to_string(), ArchiveMember { data, flags: 0 });
        Ok(())
    }

    /// Decode the named member into a fresh container.
    pub fn open_member(&self, name: &str) -> Result<ContainerHandle, FormatError> {
        let member = self
            .members
            .get(name)
            .ok_or_else(|| FormatError::MemberNotFound(name.to_string()))?;
        Ok(Container::parse(&member.data)?.into_handle())
    }

    /// Member names in archive order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn member_data(&self, name: &str) -> Option<&[u8]> {
        self.members.get(name).map(|m| m.data.as_slice())
    }

    pub fn member_flags(&self, name: &str) -> Option<u32> {
        self.members.get(name).map(|m| m.flags)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Serialize the archive, flagging members larger than `threshold`.
    pub fn to_bytes(&self, threshold: usize) -> Result<Vec<u8>, FormatError> {
        let members: Vec<(&str, &[u8])> = self
            .members
            .iter()
            .map(|(n, m)| (n.as_str(), m.data.as_slice()))
            .collect();
        write_archive(&members, threshold)
    }

    /// Decode a serialized archive.
    pub fn parse(bytes: &[u8]) -> Result<Archive, FormatError> {
        if bytes.len() < ARCHIVE_HEADER_SIZE {
            return Err(FormatError::TooSmall(bytes.len()));
        }
        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        if bytes[0..4] != ARCHIVE_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        let version = u32_at(4);
        if version != ARCHIVE_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let count = u32_at(8) as usize;
        let names_size = u32_at(12) as usize;

        let entries_end = ARCHIVE_HEADER_SIZE + count * ENTRY_SIZE;
        let names_end = entries_end + names_size;
        if names_end > bytes.len() {
            return Err(FormatError::Truncated("archive entries"));
        }
        let names_blob = &bytes[entries_end..names_end];

        let mut members = IndexMap::with_capacity(count);
        for i in 0..count {
            let off = ARCHIVE_HEADER_SIZE + i * ENTRY_SIZE;
            let name_ref = u32_at(off);
            let data_off = u32_at(off + 4) as usize;
            let data_len = u32_at(off + 8) as usize;
            let flags = u32_at(off + 12);

            let name = lookup_str(names_blob, name_ref)?
                .ok_or(FormatError::BadStringRef(name_ref))?
                .to_string();
            if data_off + data_len > bytes.len() {
                return Err(FormatError::Truncated("archive payload"));
            }
            if members.contains_key(&name) {
                return Err(FormatError::DuplicateMember(name));
            }
            members.insert(
                name,
                ArchiveMember {
                    data: bytes[data_off..data_off + data_len].to_vec(),
                    flags,
                },
            );
        }
        Ok(Archive { members })
    }
}

/// Serialize an ordered member list into a single archive buffer.
///
/// Members larger than `threshold` get [`MEMBER_OVER_THRESHOLD`] in their
/// flags; payloads are stored as provided.
pub fn write_archive(members: &[(&str, &[u8])], threshold: usize) -> Result<Vec<u8>, FormatError> {
    let mut seen = HashSet::new();
    for (name, _) in members {
        if !seen.insert(*name) {
            return Err(FormatError::DuplicateMember(name.to_string()));
        }
    }

    // Name blob keeps the reserved empty atom at offset 0.
    let mut names_blob: Vec<u8> = vec![0];
    let mut name_refs = Vec::with_capacity(members.len());
    for (name, _) in members {
        name_refs.push(names_blob.len() as u32);
        names_blob.extend_from_slice(name.as_bytes());
        names_blob.push(0);
    }

    let entries_end = ARCHIVE_HEADER_SIZE + members.len() * ENTRY_SIZE;
    let payload_base = entries_end + names_blob.len();

    let mut buf = Vec::with_capacity(
        payload_base + members.iter().map(|(_, d)| d.len()).sum::<usize>(),
    );
    buf.extend_from_slice(&ARCHIVE_MAGIC);
    buf.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
    buf.extend_from_slice(&(members.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(names_blob.len() as u32).to_le_bytes());

    let mut data_off = payload_base;
    for (i, (_, data)) in members.iter().enumerate() {
        let flags = if data.len() > threshold {
            MEMBER_OVER_THRESHOLD
        } else {
            0
        };
        buf.extend_from_slice(&name_refs[i].to_le_bytes());
        buf.extend_from_slice(&(data_off as u32).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        data_off += data.len();
    }
    buf.extend_from_slice(&names_blob);
    for (_, data) in members {
        buf.extend_from_slice(data);
    }
    Ok(buf)
}
