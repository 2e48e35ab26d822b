//! The type/variable merger and archive assembler.
//!
//! Inputs are whole archives registered by name. The link walks each input's
//! members (default member first), pushes every type into the shared output
//! or a per-CU child container according to conflict outcome, retargets
//! variables through the type-mapping index, and finally emits all outputs
//! as one archive buffer with the shared container first.

use indexmap::IndexMap;

use ctfkit_format::{
    dprint, write_archive, Archive, Container, ContainerHandle, FormatError, TypeRef, CTF_MAIN,
};

use crate::error::LinkError;
use crate::mapping::TypeMapping;

/// How the merger places types that several inputs define.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareMode {
    /// Deduplicate structurally identical types into the shared output and
    /// segregate conflicting ones into per-CU child containers.
    Unconflicted,
    /// Reserved: share only types every input duplicates.
    Duplicated,
}

/// The link engine, wrapped around the caller's writable shared output.
pub struct Linker {
    shared: ContainerHandle,
    inputs: IndexMap<String, Archive>,
    /// Per-CU output containers, keyed by output member name. Non-empty once
    /// the first conflict created one, which is what makes later input
    /// registration a late add.
    outputs: IndexMap<String, ContainerHandle>,
    mapping: TypeMapping,
}

/// How far a merge failure reaches.
enum Abort {
    /// Abort the whole link.
    Link(LinkError),
    /// Abort the current input archive; later inputs still run.
    Input(LinkError),
}

/// Per-member merge state, threaded through the type and variable walks.
struct MemberCtx<'a> {
    shared: &'a ContainerHandle,
    outputs: &'a mut IndexMap<String, ContainerHandle>,
    mapping: &'a mut TypeMapping,
    file_name: &'a str,
    /// Output member name types from this input member land under when they
    /// conflict.
    arcname: String,
    /// CU name for a freshly created per-CU container.
    cu_name: String,
    in_input_cu_file: bool,
}

impl Linker {
    /// Wrap the caller's writable container as the shared link output.
    pub fn new(shared: Container) -> Self {
        Self {
            shared: shared.into_handle(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            mapping: TypeMapping::new(),
        }
    }

    /// The shared output container.
    pub fn shared(&self) -> &ContainerHandle {
        &self.shared
    }

    /// Per-CU outputs created so far, in creation order.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &ContainerHandle)> {
        self.outputs.iter().map(|(n, fp)| (n.as_str(), fp))
    }

    /// Names of the registered inputs, in registration order.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    /// Register an input archive under a unique name. Fails with
    /// [`LinkError::LateAdd`] once any per-CU output container exists.
    pub fn add_input(&mut self, name: &str, archive: Archive) -> Result<(), LinkError> {
        if !self.outputs.is_empty() {
            return Err(LinkError::LateAdd);
        }
        self.inputs.insert(name.to_string(), archive);
        Ok(())
    }

    /// Merge the types and variables of every registered input.
    ///
    /// Inputs whose archive lacks a [`CTF_MAIN`] member are skipped with a
    /// diagnostic. A type-merge failure past conflict fallback aborts the
    /// link; a variable failure aborts only its input and is reported after
    /// the remaining inputs have run.
    pub fn link(&mut self, mode: ShareMode) -> Result<(), LinkError> {
        if mode != ShareMode::Unconflicted {
            dprint!("share-duplicated mode not yet implemented");
            return Err(LinkError::NotYetImplemented);
        }
        if self.inputs.is_empty() {
            return Ok(());
        }

        let Self {
            shared,
            inputs,
            outputs,
            mapping,
        } = self;

        let mut deferred: Option<LinkError> = None;
        for (file_name, archive) in inputs.iter() {
            match link_one_input_archive(shared, outputs, mapping, file_name, archive) {
                Ok(()) => {}
                Err(Abort::Link(e)) => return Err(e),
                Err(Abort::Input(e)) => {
                    dprint!("some types from input {file_name} were skipped: {e}");
                    if deferred.is_none() {
                        deferred = Some(e);
                    }
                }
            }
        }
        inputs.clear();

        match deferred {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Intern external strings into the shared output and every per-CU
    /// output, so CTF string references deduplicate against the host
    /// object's string section.
    ///
    /// When used together with [`Linker::link`], call this before
    /// [`Linker::write`] so per-CU containers created during the link also
    /// learn the external strings.
    pub fn add_strtab<I>(&mut self, strings: I) -> Result<(), LinkError>
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        for (s, offset) in strings {
            self.shared.borrow_mut().add_external_str(&s, offset);
            for fp in self.outputs.values() {
                fp.borrow_mut().add_external_str(&s, offset);
            }
        }
        Ok(())
    }

    /// Reserved: accepts symbol entries in ascending order but performs no
    /// function/data section reordering yet.
    pub fn shuffle_syms<I>(&mut self, _symbols: I) -> Result<(), LinkError>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        Ok(())
    }

    /// Finalize every output container and emit the link result: the shared
    /// container alone when no per-CU outputs exist, otherwise an archive
    /// with the shared container first under [`CTF_MAIN`]. Members larger
    /// than `threshold` are flagged for compression.
    pub fn write(&mut self, threshold: usize) -> Result<Vec<u8>, LinkError> {
        fn stage_err(stage: &'static str, source: FormatError) -> LinkError {
            LinkError::Write { stage, source }
        }

        self.shared
            .borrow_mut()
            .update()
            .map_err(|e| stage_err("CTF file construction", e))?;

        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        for (name, fp) in &self.outputs {
            let mut b = fp.borrow_mut();
            b.update().map_err(|e| stage_err("hash creation", e))?;
            let bytes = b.write_mem().map_err(|e| stage_err("hash creation", e))?;
            files.push((name.clone(), bytes));
        }

        // No per-CU outputs? Just write the shared container.
        if files.is_empty() {
            return self
                .shared
                .borrow_mut()
                .write_mem()
                .map_err(|e| stage_err("CTF file construction", e));
        }

        let shared_bytes = self
            .shared
            .borrow_mut()
            .write_mem()
            .map_err(|e| stage_err("CTF archive buffer allocation", e))?;

        let mut members: Vec<(&str, &[u8])> = Vec::with_capacity(files.len() + 1);
        members.push((CTF_MAIN, shared_bytes.as_slice()));
        for (name, bytes) in &files {
            members.push((name.as_str(), bytes.as_slice()));
        }
        write_archive(&members, threshold).map_err(|e| {
            dprint!("cannot write archive in link: archive writing failure: {e}");
            stage_err("archive writing", e)
        })
    }
}

/// Merge one input archive: the default member first, then every other
/// member with the default member imported as its parent.
fn link_one_input_archive(
    shared: &ContainerHandle,
    outputs: &mut IndexMap<String, ContainerHandle>,
    mapping: &mut TypeMapping,
    file_name: &str,
    archive: &Archive,
) -> Result<(), Abort> {
    let main_fp = match archive.open_member(CTF_MAIN) {
        Ok(fp) => fp,
        Err(FormatError::MemberNotFound(_)) => {
            dprint!("no {CTF_MAIN} member in input {file_name}: skipping");
            return Ok(());
        }
        Err(e) => return Err(Abort::Link(e.into())),
    };

    let mut ctx = MemberCtx {
        shared,
        outputs,
        mapping,
        file_name,
        arcname: String::new(),
        cu_name: String::new(),
        in_input_cu_file: false,
    };
    link_one_member(&mut ctx, &main_fp, CTF_MAIN)?;

    for name in archive.member_names() {
        // The default member is already done. Rescanning it would be
        // harmless here, but under the reserved share-duplicated mode it
        // would make every type look universally duplicated.
        if name == CTF_MAIN {
            continue;
        }
        let member_fp = match archive.open_member(name) {
            Ok(fp) => fp,
            Err(e) => {
                dprint!("cannot traverse member {name} of input {file_name}: {e}");
                return Err(Abort::Input(e.into()));
            }
        };
        // Ambiguous references in a per-CU member resolve in its default
        // member.
        Container::import(&member_fp, &main_fp).map_err(|e| Abort::Input(e.into()))?;
        ctx.in_input_cu_file = true;
        link_one_member(&mut ctx, &member_fp, name)?;
    }
    Ok(())
}

/// Merge every type, then every variable, of one archive member.
fn link_one_member(
    ctx: &mut MemberCtx<'_>,
    in_fp: &ContainerHandle,
    member_name: &str,
) -> Result<(), Abort> {
    ctx.arcname = if member_name == CTF_MAIN {
        format!("{CTF_MAIN}.{}", ctx.file_name)
    } else {
        member_name.to_string()
    };
    ctx.cu_name = ctx
        .arcname
        .strip_prefix(".ctf.")
        .unwrap_or(&ctx.arcname)
        .to_string();

    let type_refs: Vec<TypeRef> = in_fp.borrow().type_ids().collect();
    for t in type_refs {
        link_one_type(ctx, in_fp, t).map_err(Abort::Link)?;
    }

    let vars: Vec<(String, TypeRef)> = in_fp
        .borrow()
        .variables()
        .map(|(n, t)| (n.to_string(), t))
        .collect();
    for (name, t) in vars {
        link_one_variable(ctx, in_fp, &name, t).map_err(Abort::Input)?;
    }
    Ok(())
}

/// Place one type: into the shared output when possible, else into the
/// per-CU output for this member, creating it on first conflict.
fn link_one_type(
    ctx: &mut MemberCtx<'_>,
    in_fp: &ContainerHandle,
    t: TypeRef,
) -> Result<(), LinkError> {
    if !ctx.in_input_cu_file {
        let added = ctx.shared.borrow_mut().add_type(&in_fp.borrow(), t);
        match added {
            Ok(dst) => {
                ctx.mapping.record(in_fp, t, ctx.shared, dst);
                return Ok(());
            }
            Err(FormatError::Conflict(_)) => {}
            Err(e) => {
                dprint!(
                    "cannot link type {:#x} from archive member {} of input {}: {e}",
                    t.raw(),
                    ctx.arcname,
                    ctx.file_name
                );
                return Err(e.into());
            }
        }
    }

    let per_cu = match ctx.outputs.get(&ctx.arcname) {
        Some(fp) => fp.clone(),
        None => {
            let fresh = Container::new().into_handle();
            Container::import(&fresh, ctx.shared)?;
            fresh.borrow_mut().set_cu_name(&ctx.cu_name);
            ctx.outputs.insert(ctx.arcname.clone(), fresh.clone());
            fresh
        }
    };

    let added = per_cu.borrow_mut().add_type(&in_fp.borrow(), t);
    match added {
        Ok(dst) => {
            ctx.mapping.record(in_fp, t, &per_cu, dst);
            Ok(())
        }
        Err(e) => {
            // A conflict against a container holding only this CU's types
            // should be impossible; abort the link.
            dprint!(
                "cannot link type {:#x} from archive member {} of input {} into per-CU output: {e}",
                t.raw(),
                ctx.arcname,
                ctx.file_name
            );
            Err(e.into())
        }
    }
}

/// Retarget one variable through the type-mapping index and bind it in the
/// parent when possible, else in the shared output.
fn link_one_variable(
    ctx: &mut MemberCtx<'_>,
    in_fp: &ContainerHandle,
    name: &str,
    ty: TypeRef,
) -> Result<(), LinkError> {
    // In a nested link the shared output itself has a parent: merge there
    // first when the type already lives there.
    let mut from_parent: Option<TypeRef> = None;
    let shared_parent = ctx.shared.borrow().parent_handle();
    if let Some(parent) = shared_parent {
        if let Some((pfp, pty)) = ctx.mapping.lookup(in_fp, ty, &parent) {
            let existing = pfp.borrow().variable(name);
            match existing {
                Some(v) if v == pty => return Ok(()),
                None => {
                    pfp.borrow_mut().add_variable(name, pty)?;
                    return Ok(());
                }
                // A same-named variable of another type: bind locally.
                Some(_) => from_parent = Some(pty),
            }
        }
    }

    let (target, dst) = match from_parent {
        // Found in the parent but binding here: re-scope the reference so
        // the shared output resolves it in its parent.
        Some(pty) => (ctx.shared.clone(), TypeRef::from_index(pty.index(), false)),
        None => match ctx.mapping.lookup(in_fp, ty, ctx.shared) {
            Some(found) => found,
            None => {
                dprint!(
                    "type {:#x} from archive member {} of input {} unknown while adding \
                     variable {name}",
                    ty.raw(),
                    ctx.arcname,
                    ctx.file_name
                );
                return Err(LinkError::InvalidMapping {
                    variable: name.to_string(),
                });
            }
        },
    };
    target.borrow_mut().add_variable(name, dst)?;
    Ok(())
}
