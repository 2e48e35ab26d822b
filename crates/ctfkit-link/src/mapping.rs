//! Type-mapping index.
//!
//! Records, for each destination container, which (source container, type
//! index) pairs are already represented there, so variable references can be
//! retargeted after their types have moved. Both sides of an entry are
//! normalized: a parent-scoped reference is attributed to the parent
//! container and reduced to its bare index, because the same type can appear
//! with different reference encodings in child and parent.

use std::collections::HashMap;

use ctfkit_format::{ContainerHandle, ContainerId, TypeRef};

/// Destination-side record from source type identity to local type index.
#[derive(Debug, Default)]
pub struct TypeMapping {
    per_dest: HashMap<ContainerId, HashMap<(ContainerId, u32), u32>>,
}

/// Attribute a reference to the container actually holding the type and
/// reduce it to a bare index.
fn normalize(c: &ContainerHandle, r: TypeRef) -> (ContainerId, u32) {
    let b = c.borrow();
    if b.is_parent_scoped(r) {
        if let Some(parent) = b.parent_handle() {
            return (parent.borrow().id(), r.index());
        }
    }
    (b.id(), r.index())
}

impl TypeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `src_ref` in `src` is now represented by `dst_ref` in
    /// `dst`.
    pub fn record(
        &mut self,
        src: &ContainerHandle,
        src_ref: TypeRef,
        dst: &ContainerHandle,
        dst_ref: TypeRef,
    ) {
        let key = normalize(src, src_ref);
        let (dst_id, dst_idx) = normalize(dst, dst_ref);
        self.per_dest.entry(dst_id).or_default().insert(key, dst_idx);
    }

    /// Look up the destination of `src_ref`, trying `dst_hint` first and then
    /// the hint's parent. The returned reference is scoped to the resolved
    /// destination.
    pub fn lookup(
        &self,
        src: &ContainerHandle,
        src_ref: TypeRef,
        dst_hint: &ContainerHandle,
    ) -> Option<(ContainerHandle, TypeRef)> {
        let key = normalize(src, src_ref);

        let mut target = dst_hint.clone();
        for _ in 0..2 {
            let found = self
                .per_dest
                .get(&target.borrow().id())
                .and_then(|m| m.get(&key))
                .copied();
            if let Some(idx) = found {
                let r = TypeRef::from_index(idx, target.borrow().has_parent());
                return Some((target, r));
            }
            let parent = target.borrow().parent_handle();
            match parent {
                Some(p) => target = p,
                None => return None,
            }
        }
        None
    }
}
