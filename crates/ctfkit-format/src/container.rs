//! The in-memory CTF container.
//!
//! A container is one type universe: a 1-based type table, a variables table,
//! string atoms, an optional external string table for deduplication against
//! the host object's string section, and an optional parent link. Parent
//! links are weak; ownership always points downward (an archive or a link
//! output set owns its containers).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::FormatError;
use crate::header::{
    Header, FLAG_CHILD, HEADER_SIZE, MEMBER_SIZE, TYPEDEF_SIZE, VARIABLE_SIZE,
};
use crate::strtab::{lookup_str, StrtabBuilder};
use crate::typeref::TypeRef;
use crate::types::{Member, Namespace, TypeDef, TypeKind};

/// Shared ownership handle to a container.
pub type ContainerHandle = Rc<RefCell<Container>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a container, usable as a hash key across containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContainerId(u64);

fn fresh_id() -> ContainerId {
    ContainerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// One CTF type universe.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    /// Type table; index `i` holds the type with 1-based index `i + 1`.
    types: Vec<TypeDef>,
    /// Named lookup, per namespace, to bare 1-based indices.
    names: HashMap<(Namespace, String), u32>,
    /// Variables in insertion order; sorted by name at finalization.
    variables: IndexMap<String, TypeRef>,
    /// External string table: content to host-strtab offset.
    external: IndexMap<String, u32>,
    parent: Option<Weak<RefCell<Container>>>,
    /// Set once the container has been imported under a parent; persisted so
    /// decoded children keep their reference convention before re-import.
    child: bool,
    cu_name: Option<String>,
    dirty: bool,
    frozen: Option<Vec<u8>>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Create an empty writable container.
    pub fn new() -> Self {
        Self {
            id: fresh_id(),
            types: Vec::new(),
            names: HashMap::new(),
            variables: IndexMap::new(),
            external: IndexMap::new(),
            parent: None,
            child: false,
            cu_name: None,
            dirty: true,
            frozen: None,
        }
    }

    /// Wrap in a shared handle.
    pub fn into_handle(self) -> ContainerHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn cu_name(&self) -> Option<&str> {
        self.cu_name.as_deref()
    }

    pub fn set_cu_name(&mut self, name: &str) {
        self.cu_name = Some(name.to_string());
        self.dirty = true;
    }

    /// Install `parent` as the parent of `this`, so parent-scoped references
    /// in `this` resolve there.
    pub fn import(this: &ContainerHandle, parent: &ContainerHandle) -> Result<(), FormatError> {
        if Rc::ptr_eq(this, parent) {
            return Err(FormatError::SelfImport);
        }
        let mut b = this.borrow_mut();
        b.parent = Some(Rc::downgrade(parent));
        b.child = true;
        b.dirty = true;
        Ok(())
    }

    pub fn has_parent(&self) -> bool {
        self.parent.as_ref().is_some_and(|w| w.strong_count() > 0)
    }

    pub fn parent_handle(&self) -> Option<ContainerHandle> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_child(&self) -> bool {
        self.child
    }

    /// Whether a reference held by this container addresses the parent.
    pub fn is_parent_scoped(&self, r: TypeRef) -> bool {
        self.child && !r.is_child_scoped()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// References to every type in this container's own table, in index
    /// order, scoped for this container.
    pub fn type_ids(&self) -> impl Iterator<Item = TypeRef> + '_ {
        let child = self.child;
        (1..=self.types.len() as u32).map(move |i| TypeRef::from_index(i, child))
    }

    /// The definition behind a bare 1-based index in this container's table.
    pub fn type_def(&self, index: u32) -> Option<&TypeDef> {
        if index == 0 {
            return None;
        }
        self.types.get(index as usize - 1)
    }

    /// Look up a named type in this container's own table.
    pub fn lookup_type(&self, kind: TypeKind, name: &str) -> Option<TypeRef> {
        self.names
            .get(&(Namespace::of(kind), name.to_string()))
            .map(|&idx| TypeRef::from_index(idx, self.child))
    }

    fn push_type(&mut self, def: TypeDef) -> TypeRef {
        let idx = self.types.len() as u32 + 1;
        if let Some(name) = &def.name {
            self.names.insert((def.namespace(), name.clone()), idx);
        }
        self.types.push(def);
        self.dirty = true;
        TypeRef::from_index(idx, self.child)
    }

    pub fn add_integer(&mut self, name: &str, size: u32, encoding: u32) -> TypeRef {
        self.push_type(TypeDef {
            name: Some(name.to_string()),
            kind: TypeKind::Integer,
            size,
            encoding,
            reference: None,
            members: Vec::new(),
        })
    }

    pub fn add_float(&mut self, name: &str, size: u32, encoding: u32) -> TypeRef {
        self.push_type(TypeDef {
            name: Some(name.to_string()),
            kind: TypeKind::Float,
            size,
            encoding,
            reference: None,
            members: Vec::new(),
        })
    }

    pub fn add_pointer(&mut self, to: TypeRef) -> TypeRef {
        self.push_type(TypeDef {
            name: None,
            kind: TypeKind::Pointer,
            size: 0,
            encoding: 0,
            reference: Some(to),
            members: Vec::new(),
        })
    }

    /// Add an array of `nelems` elements (count carried in `size`).
    pub fn add_array(&mut self, elem: TypeRef, nelems: u32) -> TypeRef {
        self.push_type(TypeDef {
            name: None,
            kind: TypeKind::Array,
            size: nelems,
            encoding: 0,
            reference: Some(elem),
            members: Vec::new(),
        })
    }

    pub fn add_typedef(&mut self, name: &str, to: TypeRef) -> TypeRef {
        self.push_type(TypeDef {
            name: Some(name.to_string()),
            kind: TypeKind::Typedef,
            size: 0,
            encoding: 0,
            reference: Some(to),
            members: Vec::new(),
        })
    }

    pub fn add_struct(&mut self, name: Option<&str>, size: u32, members: Vec<Member>) -> TypeRef {
        self.push_type(TypeDef {
            name: name.map(str::to_string),
            kind: TypeKind::Struct,
            size,
            encoding: 0,
            reference: None,
            members,
        })
    }

    pub fn add_union(&mut self, name: Option<&str>, size: u32, members: Vec<Member>) -> TypeRef {
        self.push_type(TypeDef {
            name: name.map(str::to_string),
            kind: TypeKind::Union,
            size,
            encoding: 0,
            reference: None,
            members,
        })
    }

    pub fn add_enum(&mut self, name: Option<&str>, consts: &[(&str, i64)]) -> TypeRef {
        let members = consts
            .iter()
            .map(|&(n, v)| Member {
                name: n.to_string(),
                ty: None,
                value: v as u64,
            })
            .collect();
        self.push_type(TypeDef {
            name: name.map(str::to_string),
            kind: TypeKind::Enum,
            size: 4,
            encoding: 0,
            reference: None,
            members,
        })
    }

    pub fn add_forward(&mut self, name: &str) -> TypeRef {
        self.push_type(TypeDef {
            name: Some(name.to_string()),
            kind: TypeKind::Forward,
            size: 0,
            encoding: 0,
            reference: None,
            members: Vec::new(),
        })
    }

    /// Copy a type (and everything it references) from `src` into this
    /// container, deduplicating structurally identical named types.
    ///
    /// A structurally identical type already present here (or in the parent)
    /// yields the existing reference. A same-named type with a different
    /// shape yields [`FormatError::Conflict`] and leaves this container
    /// untouched. Unnamed duplicate detection is best-effort: shapes the
    /// comparison cannot prove equal are appended again.
    pub fn add_type(&mut self, src: &Container, src_ref: TypeRef) -> Result<TypeRef, FormatError> {
        let mut visiting = HashSet::new();
        scan_conflicts(self, src, src_ref, &mut visiting)?;
        let mut memo = HashMap::new();
        copy_type(self, src, src_ref, &mut memo)
    }

    /// Variables in insertion order.
    pub fn variables(&self) -> impl Iterator<Item = (&str, TypeRef)> + '_ {
        self.variables.iter().map(|(n, &t)| (n.as_str(), t))
    }

    pub fn variable(&self, name: &str) -> Option<TypeRef> {
        self.variables.get(name).copied()
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Bind a variable name to a type reference. Re-binding to the same
    /// reference is a no-op; re-binding to a different one is an error.
    pub fn add_variable(&mut self, name: &str, ty: TypeRef) -> Result<(), FormatError> {
        match self.variables.get(name) {
            Some(&existing) if existing == ty => Ok(()),
            Some(_) => Err(FormatError::DuplicateVariable(name.to_string())),
            None => {
                self.variables.insert(name.to_string(), ty);
                self.dirty = true;
                Ok(())
            }
        }
    }

    /// Record an external string. Re-adding a string overwrites its offset.
    pub fn add_external_str(&mut self, s: &str, offset: u32) {
        self.external.insert(s.to_string(), offset);
        self.dirty = true;
    }

    pub fn external_str(&self, s: &str) -> Option<u32> {
        self.external.get(s).copied()
    }

    pub fn external_count(&self) -> usize {
        self.external.len()
    }

    /// Materialize dirty type and variable buffers into final serialized
    /// form. A clean container keeps its existing buffer.
    pub fn update(&mut self) -> Result<(), FormatError> {
        if !self.dirty && self.frozen.is_some() {
            return Ok(());
        }
        let bytes = self.serialize()?;
        self.frozen = Some(bytes);
        self.dirty = false;
        Ok(())
    }

    /// Finalize if needed and return the serialized container bytes.
    pub fn write_mem(&mut self) -> Result<Vec<u8>, FormatError> {
        self.update()?;
        Ok(self.frozen.clone().unwrap_or_default())
    }

    fn serialize(&self) -> Result<Vec<u8>, FormatError> {
        let mut strtab = StrtabBuilder::with_external(&self.external);

        let mut type_bytes = Vec::with_capacity(self.types.len() * TYPEDEF_SIZE);
        let mut member_bytes = Vec::new();
        let mut member_total: u32 = 0;

        for def in &self.types {
            if def.members.len() > u16::MAX as usize {
                return Err(FormatError::TooManyMembers(def.members.len()));
            }
            let name_ref = match &def.name {
                Some(n) => strtab.encode(n),
                None => 0,
            };
            let member_start = member_total;
            for m in &def.members {
                let mname = strtab.encode(&m.name);
                member_bytes.extend_from_slice(&mname.to_le_bytes());
                member_bytes.extend_from_slice(&m.ty.map_or(0, TypeRef::raw).to_le_bytes());
                member_bytes.extend_from_slice(&m.value.to_le_bytes());
                member_total += 1;
            }
            type_bytes.extend_from_slice(&name_ref.to_le_bytes());
            type_bytes.push(def.kind as u8);
            type_bytes.push(0);
            type_bytes.extend_from_slice(&(def.members.len() as u16).to_le_bytes());
            type_bytes.extend_from_slice(&def.size.to_le_bytes());
            type_bytes.extend_from_slice(&def.encoding.to_le_bytes());
            type_bytes.extend_from_slice(&def.reference.map_or(0, TypeRef::raw).to_le_bytes());
            type_bytes.extend_from_slice(&member_start.to_le_bytes());
        }

        // The variable section is name-sorted on disk; the in-memory table
        // stays in insertion order.
        let mut vars: Vec<(&String, &TypeRef)> = self.variables.iter().collect();
        vars.sort_by(|a, b| a.0.cmp(b.0));
        let var_count = vars.len() as u32;
        let mut var_bytes = Vec::with_capacity(vars.len() * VARIABLE_SIZE);
        for (name, ty) in vars {
            let nref = strtab.encode(name);
            var_bytes.extend_from_slice(&nref.to_le_bytes());
            var_bytes.extend_from_slice(&ty.raw().to_le_bytes());
        }

        let cu_ref = match &self.cu_name {
            Some(n) => strtab.intern(n),
            None => 0,
        };
        let blob = strtab.into_blob();

        let header = Header {
            flags: if self.child { FLAG_CHILD } else { 0 },
            cu_name: cu_ref,
            type_count: self.types.len() as u32,
            member_count: member_total,
            var_count,
            str_size: blob.len() as u32,
            ..Header::default()
        };

        let offsets = header.compute_offsets();
        let mut buf = Vec::with_capacity(offsets.total);
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&type_bytes);
        buf.extend_from_slice(&member_bytes);
        buf.extend_from_slice(&var_bytes);
        buf.extend_from_slice(&blob);
        Ok(buf)
    }

    /// Decode a serialized container.
    ///
    /// External string references decode as unnamed (their content lives in
    /// the host string section); variables with external names are dropped.
    /// The parent link is not persisted and must be re-established with
    /// [`Container::import`].
    pub fn parse(bytes: &[u8]) -> Result<Container, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::TooSmall(bytes.len()));
        }
        let header = Header::from_bytes(bytes);
        if !header.validate_magic() {
            return Err(FormatError::InvalidMagic);
        }
        if !header.validate_version() {
            return Err(FormatError::UnsupportedVersion(header.version));
        }
        let offsets = header.compute_offsets();
        if offsets.total != bytes.len() {
            return Err(FormatError::SizeMismatch {
                header: offsets.total as u32,
                actual: bytes.len(),
            });
        }
        let blob = &bytes[offsets.strtab..];

        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        let u64_at = |off: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[off..off + 8]);
            u64::from_le_bytes(b)
        };

        let mut all_members = Vec::with_capacity(header.member_count as usize);
        for i in 0..header.member_count as usize {
            let off = offsets.members + i * MEMBER_SIZE;
            let name = lookup_str(blob, u32_at(off))?.unwrap_or_default().to_string();
            all_members.push(Member {
                name,
                ty: TypeRef::from_raw(u32_at(off + 4)),
                value: u64_at(off + 8),
            });
        }

        let mut types = Vec::with_capacity(header.type_count as usize);
        let mut names = HashMap::new();
        for i in 0..header.type_count as usize {
            let off = offsets.types + i * TYPEDEF_SIZE;
            let name = match lookup_str(blob, u32_at(off))? {
                Some("") | None => None,
                Some(s) => Some(s.to_string()),
            };
            let kind = TypeKind::from_u8(bytes[off + 4]).ok_or(FormatError::BadKind(bytes[off + 4]))?;
            let member_count =
                u16::from_le_bytes([bytes[off + 6], bytes[off + 7]]) as usize;
            let member_start = u32_at(off + 20) as usize;
            if member_start + member_count > all_members.len() {
                return Err(FormatError::Truncated("members"));
            }
            let def = TypeDef {
                name,
                kind,
                size: u32_at(off + 8),
                encoding: u32_at(off + 12),
                reference: TypeRef::from_raw(u32_at(off + 16)),
                members: all_members[member_start..member_start + member_count].to_vec(),
            };
            if let Some(n) = &def.name {
                names.insert((def.namespace(), n.clone()), i as u32 + 1);
            }
            types.push(def);
        }

        let mut variables = IndexMap::new();
        for i in 0..header.var_count as usize {
            let off = offsets.vars + i * VARIABLE_SIZE;
            let Some(name) = lookup_str(blob, u32_at(off))? else {
                continue;
            };
            if let Some(ty) = TypeRef::from_raw(u32_at(off + 4)) {
                variables.insert(name.to_string(), ty);
            }
        }

        let cu_name = match lookup_str(blob, header.cu_name)? {
            Some("") | None => None,
            Some(s) => Some(s.to_string()),
        };

        Ok(Container {
            id: fresh_id(),
            types,
            names,
            variables,
            external: IndexMap::new(),
            parent: None,
            child: header.flags & FLAG_CHILD != 0,
            cu_name,
            dirty: false,
            frozen: Some(bytes.to_vec()),
        })
    }
}

/// Pairs of type identities currently assumed equal, so cyclic structures
/// terminate.
type EqualitySeen = HashSet<((ContainerId, u32), (ContainerId, u32))>;

/// Structural equivalence of two types, resolving parent-scoped references
/// on both sides. A pair already under comparison is assumed equal; the
/// assumption is retracted if the comparison fails.
fn equal_types(
    a: &Container,
    ar: TypeRef,
    b: &Container,
    br: TypeRef,
    seen: &mut EqualitySeen,
) -> bool {
    if a.is_parent_scoped(ar) {
        let Some(parent) = a.parent_handle() else {
            return false;
        };
        let pb = parent.borrow();
        let pr = TypeRef::from_index(ar.index(), pb.child);
        return equal_types(&pb, pr, b, br, seen);
    }
    if b.is_parent_scoped(br) {
        let Some(parent) = b.parent_handle() else {
            return false;
        };
        let pb = parent.borrow();
        let pr = TypeRef::from_index(br.index(), pb.child);
        return equal_types(a, ar, &pb, pr, seen);
    }

    let key = ((a.id, ar.index()), (b.id, br.index()));
    if key.0 == key.1 {
        return true;
    }
    if !seen.insert(key) {
        return true;
    }

    let equal = (|| {
        let (Some(da), Some(db)) = (a.type_def(ar.index()), b.type_def(br.index())) else {
            return false;
        };
        if da.name != db.name
            || da.kind != db.kind
            || da.size != db.size
            || da.encoding != db.encoding
            || da.members.len() != db.members.len()
        {
            return false;
        }
        let refs_equal = match (da.reference, db.reference) {
            (None, None) => true,
            (Some(x), Some(y)) => equal_types(a, x, b, y, seen),
            _ => false,
        };
        refs_equal
            && da.members.iter().zip(&db.members).all(|(ma, mb)| {
                ma.name == mb.name
                    && ma.value == mb.value
                    && match (ma.ty, mb.ty) {
                        (None, None) => true,
                        (Some(x), Some(y)) => equal_types(a, x, b, y, seen),
                        _ => false,
                    }
            })
    })();

    if !equal {
        seen.remove(&key);
    }
    equal
}

/// Compare the type at `dst_idx` in `dst` against a type local to `src`.
fn same_shape(dst: &Container, dst_idx: u32, src: &Container, src_ref: TypeRef) -> bool {
    let dr = TypeRef::from_index(dst_idx, dst.child);
    equal_types(dst, dr, src, src_ref, &mut EqualitySeen::new())
}

/// Find an existing unnamed destination type structurally equal to a type
/// local to `src`. Returns a destination-scoped reference on a hit in the
/// destination itself or a parent-scoped one on a hit in its parent.
fn find_equal_unnamed(dst: &Container, src: &Container, src_ref: TypeRef) -> Option<TypeRef> {
    let src_def = src.type_def(src_ref.index())?;
    for (i, d) in dst.types.iter().enumerate() {
        if d.name.is_none() && d.kind == src_def.kind && same_shape(dst, i as u32 + 1, src, src_ref)
        {
            return Some(TypeRef::from_index(i as u32 + 1, dst.child));
        }
    }
    if let Some(parent) = dst.parent_handle() {
        let pb = parent.borrow();
        for (i, d) in pb.types.iter().enumerate() {
            if d.name.is_none()
                && d.kind == src_def.kind
                && same_shape(&pb, i as u32 + 1, src, src_ref)
            {
                return Some(TypeRef::from_index(i as u32 + 1, false));
            }
        }
    }
    None
}

/// Dry-run pass over the closure of `r`: fail on any named type whose shape
/// disagrees with an existing destination type, before anything is copied.
fn scan_conflicts(
    dst: &Container,
    src: &Container,
    r: TypeRef,
    visiting: &mut HashSet<(ContainerId, u32)>,
) -> Result<(), FormatError> {
    if src.is_parent_scoped(r) {
        let parent = src
            .parent_handle()
            .ok_or(FormatError::BadTypeRef(r.raw()))?;
        let pb = parent.borrow();
        let pr = TypeRef::from_index(r.index(), pb.child);
        return scan_conflicts(dst, &pb, pr, visiting);
    }
    if !visiting.insert((src.id, r.index())) {
        return Ok(());
    }
    let def = src
        .type_def(r.index())
        .ok_or(FormatError::BadTypeRef(r.raw()))?;

    if let Some(name) = &def.name {
        let ns = def.namespace();
        if let Some(&idx) = dst.names.get(&(ns, name.clone())) {
            return if same_shape(dst, idx, src, r) {
                Ok(())
            } else {
                Err(FormatError::Conflict(name.clone()))
            };
        }
        if let Some(parent) = dst.parent_handle() {
            let pb = parent.borrow();
            if let Some(&pidx) = pb.names.get(&(ns, name.clone())) {
                if same_shape(&pb, pidx, src, r) {
                    return Ok(());
                }
                // shape differs in the parent: the copy shadows it here
            }
        }
    }

    if let Some(rr) = def.reference {
        scan_conflicts(dst, src, rr, visiting)?;
    }
    for m in &def.members {
        if let Some(t) = m.ty {
            scan_conflicts(dst, src, t, visiting)?;
        }
    }
    Ok(())
}

/// Copy the type closure rooted at `r` into `dst`, translating references.
/// The conflict scan has already vetted every named type on this path.
fn copy_type(
    dst: &mut Container,
    src: &Container,
    r: TypeRef,
    memo: &mut HashMap<(ContainerId, u32), TypeRef>,
) -> Result<TypeRef, FormatError> {
    if src.is_parent_scoped(r) {
        let parent = src
            .parent_handle()
            .ok_or(FormatError::BadTypeRef(r.raw()))?;
        let pb = parent.borrow();
        let pr = TypeRef::from_index(r.index(), pb.child);
        return copy_type(dst, &pb, pr, memo);
    }
    let key = (src.id, r.index());
    if let Some(&done) = memo.get(&key) {
        return Ok(done);
    }
    let def = src
        .type_def(r.index())
        .ok_or(FormatError::BadTypeRef(r.raw()))?
        .clone();

    if let Some(name) = &def.name {
        let ns = def.namespace();
        if let Some(&idx) = dst.names.get(&(ns, name.clone())) {
            let existing = TypeRef::from_index(idx, dst.child);
            memo.insert(key, existing);
            return Ok(existing);
        }
        if let Some(parent) = dst.parent_handle() {
            let pb = parent.borrow();
            if let Some(&pidx) = pb.names.get(&(ns, name.clone())) {
                if same_shape(&pb, pidx, src, r) {
                    let inherited = TypeRef::from_index(pidx, false);
                    memo.insert(key, inherited);
                    return Ok(inherited);
                }
            }
        }
    } else if let Some(existing) = find_equal_unnamed(dst, src, r) {
        memo.insert(key, existing);
        return Ok(existing);
    }

    // Reserve the slot and register the name before walking references so
    // cycles through this type land on the memo entry.
    let idx = dst.types.len() as u32 + 1;
    let new_ref = TypeRef::from_index(idx, dst.child);
    dst.types.push(TypeDef {
        name: def.name.clone(),
        kind: def.kind,
        size: def.size,
        encoding: def.encoding,
        reference: None,
        members: Vec::new(),
    });
    if let Some(name) = &def.name {
        dst.names.insert((def.namespace(), name.clone()), idx);
    }
    memo.insert(key, new_ref);

    let reference = match def.reference {
        Some(rr) => Some(copy_type(dst, src, rr, memo)?),
        None => None,
    };
    let mut members = Vec::with_capacity(def.members.len());
    for m in def.members {
        let ty = match m.ty {
            Some(t) => Some(copy_type(dst, src, t, memo)?),
            None => None,
        };
        members.push(Member {
            name: m.name,
            ty,
            value: m.value,
        });
    }

    let slot = &mut dst.types[idx as usize - 1];
    slot.reference = reference;
    slot.members = members;
    dst.dirty = true;
    Ok(new_ref)
}
