use ctfkit_format::{open_bytes, Archive, Container, Member, TypeKind, CTF_MAIN, STR_EXTERNAL};

use super::error::LinkError;
use super::linker::{Linker, ShareMode};

fn member(name: &str, ty: ctfkit_format::TypeRef, value: u64) -> Member {
    Member {
        name: name.to_string(),
        ty: Some(ty),
        value,
    }
}

fn archive_with_main(build: impl FnOnce(&mut Container)) -> Archive {
    let mut c = Container::new();
    build(&mut c);
    let mut arc = Archive::new();
    arc.insert(CTF_MAIN, &mut c).unwrap();
    arc
}

/// int, *int, struct S { int a; }
fn basic_types(c: &mut Container) {
    let int = c.add_integer("int", 4, 0);
    c.add_pointer(int);
    c.add_struct(Some("S"), 4, vec![member("a", int, 0)]);
}

#[test]
fn identical_mains_collapse_into_the_shared_output() {
    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", archive_with_main(basic_types)).unwrap();
    linker.add_input("b.o", archive_with_main(basic_types)).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    assert_eq!(linker.shared().borrow().type_count(), 3);
    assert_eq!(linker.outputs().count(), 0);

    // Emission is a single-container buffer.
    let buf = linker.write(4096).unwrap();
    let arc = open_bytes(&buf).unwrap();
    let names: Vec<&str> = arc.member_names().collect();
    assert_eq!(names, vec![CTF_MAIN]);
    let main = arc.open_member(CTF_MAIN).unwrap();
    assert_eq!(main.borrow().type_count(), 3);
    assert!(main.borrow().lookup_type(TypeKind::Struct, "S").is_some());
}

#[test]
fn conflicting_structs_are_segregated_per_cu() {
    let a = archive_with_main(|c| {
        let int = c.add_integer("int", 4, 0);
        c.add_struct(Some("S"), 4, vec![member("a", int, 0)]);
    });
    let b = archive_with_main(|c| {
        let long = c.add_integer("long", 8, 0);
        c.add_struct(Some("S"), 8, vec![member("a", long, 0)]);
    });

    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", a).unwrap();
    linker.add_input("b.o", b).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    // Shared output holds int, long, and the first S shape.
    let shared = linker.shared().borrow();
    assert!(shared.lookup_type(TypeKind::Integer, "int").is_some());
    assert!(shared.lookup_type(TypeKind::Integer, "long").is_some());
    let s = shared.lookup_type(TypeKind::Struct, "S").unwrap();
    assert_eq!(shared.type_def(s.index()).unwrap().size, 4);
    drop(shared);

    // The other shape lives in a per-CU child named after the input.
    let outputs: Vec<(&str, _)> = linker.outputs().map(|(n, fp)| (n, fp.clone())).collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, ".ctf.b.o");
    let per_cu = outputs[0].1.borrow();
    assert_eq!(per_cu.cu_name(), Some("b.o"));
    assert_eq!(per_cu.type_count(), 1);
    let s = per_cu.lookup_type(TypeKind::Struct, "S").unwrap();
    let def = per_cu.type_def(s.index()).unwrap();
    assert_eq!(def.size, 8);
    // Its member type resolves in the shared parent.
    assert!(per_cu.is_parent_scoped(def.members[0].ty.unwrap()));
    drop(per_cu);

    // Emission is a multi-member archive with the default member first.
    let buf = linker.write(4096).unwrap();
    let arc = open_bytes(&buf).unwrap();
    let names: Vec<&str> = arc.member_names().collect();
    assert_eq!(names, vec![CTF_MAIN, ".ctf.b.o"]);
}

#[test]
fn variables_prefer_the_shared_output() {
    let a = archive_with_main(|c| {
        let int = c.add_integer("int", 4, 0);
        let s = c.add_struct(Some("S"), 4, vec![member("a", int, 0)]);
        c.add_variable("g", s).unwrap();
    });
    let b = archive_with_main(|c| {
        let long = c.add_integer("long", 8, 0);
        c.add_struct(Some("S"), 8, vec![member("a", long, 0)]);
    });

    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", a).unwrap();
    linker.add_input("b.o", b).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    let shared = linker.shared().borrow();
    let g = shared.variable("g").unwrap();
    let s = shared.lookup_type(TypeKind::Struct, "S").unwrap();
    assert_eq!(g, s);
    drop(shared);

    // Not duplicated into the per-CU container.
    for (_, fp) in linker.outputs() {
        assert_eq!(fp.borrow().variable_count(), 0);
    }
}

#[test]
fn inputs_cannot_be_added_once_a_per_cu_output_exists() {
    let a = archive_with_main(|c| {
        let int = c.add_integer("int", 4, 0);
        c.add_struct(Some("S"), 4, vec![member("a", int, 0)]);
    });
    let b = archive_with_main(|c| {
        let long = c.add_integer("long", 8, 0);
        c.add_struct(Some("S"), 8, vec![member("a", long, 0)]);
    });

    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", a).unwrap();
    linker.add_input("b.o", b).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();
    assert_eq!(linker.outputs().count(), 1);

    let shared_types = linker.shared().borrow().type_count();
    let result = linker.add_input("late.o", archive_with_main(basic_types));
    assert!(matches!(result, Err(LinkError::LateAdd)));

    // Output state is unchanged.
    assert_eq!(linker.outputs().count(), 1);
    assert_eq!(linker.shared().borrow().type_count(), shared_types);
}

#[test]
fn inputs_may_be_added_while_no_per_cu_output_exists() {
    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", archive_with_main(basic_types)).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    // A conflict-free link created no per-CU output, so registration stays
    // open.
    assert_eq!(linker.outputs().count(), 0);
    linker.add_input("late.o", archive_with_main(basic_types)).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();
    assert_eq!(linker.shared().borrow().type_count(), 3);
}

#[test]
fn external_strings_fan_out_to_every_output() {
    let a = archive_with_main(|c| {
        let int = c.add_integer("counter", 4, 0);
        c.add_variable("counter_var", int).unwrap();
    });
    let b = archive_with_main(|c| {
        c.add_integer("counter", 8, 0);
    });

    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", a).unwrap();
    linker.add_input("b.o", b).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();
    assert_eq!(linker.outputs().count(), 1);

    linker
        .add_strtab(vec![
            ("counter".to_string(), 17),
            ("counter_var".to_string(), 34),
        ])
        .unwrap();

    assert_eq!(linker.shared().borrow().external_str("counter"), Some(17));
    assert_eq!(
        linker.shared().borrow().external_str("counter_var"),
        Some(34)
    );
    for (_, fp) in linker.outputs() {
        assert_eq!(fp.borrow().external_str("counter"), Some(17));
        assert_eq!(fp.borrow().external_str("counter_var"), Some(34));
    }

    // Emission references the external offsets instead of inlining.
    let buf = linker.write(1 << 20).unwrap();
    assert!(!buf.windows(b"counter".len()).any(|w| w == b"counter"));
    let ext: u32 = STR_EXTERNAL | 17;
    assert!(buf.windows(4).any(|w| w == ext.to_le_bytes().as_slice()));
}

#[test]
fn share_duplicated_is_rejected_before_any_work() {
    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", archive_with_main(basic_types)).unwrap();

    let result = linker.link(ShareMode::Duplicated);
    assert!(matches!(result, Err(LinkError::NotYetImplemented)));

    // No partial outputs were created and the input set is untouched.
    assert_eq!(linker.outputs().count(), 0);
    assert_eq!(linker.shared().borrow().type_count(), 0);
    assert_eq!(linker.input_names().count(), 1);

    // The engine is still usable in the implemented mode.
    linker.link(ShareMode::Unconflicted).unwrap();
    assert_eq!(linker.shared().borrow().type_count(), 3);
}

#[test]
fn archives_without_a_default_member_are_skipped() {
    let mut odd = Archive::new();
    let mut stray = Container::new();
    stray.add_integer("stray", 4, 0);
    odd.insert(".ctf.orphan.o", &mut stray).unwrap();

    let mut linker = Linker::new(Container::new());
    linker.add_input("odd.o", odd).unwrap();
    linker.add_input("good.o", archive_with_main(basic_types)).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    let shared = linker.shared().borrow();
    assert_eq!(shared.type_count(), 3);
    assert!(shared.lookup_type(TypeKind::Integer, "stray").is_none());
}

#[test]
fn write_without_inputs_emits_the_shared_container() {
    let mut shared = Container::new();
    shared.add_integer("int", 4, 0);

    let mut linker = Linker::new(shared);
    let buf = linker.write(4096).unwrap();

    let arc = open_bytes(&buf).unwrap();
    let names: Vec<&str> = arc.member_names().collect();
    assert_eq!(names, vec![CTF_MAIN]);
    assert_eq!(arc.open_member(CTF_MAIN).unwrap().borrow().type_count(), 1);
}

#[test]
fn linked_output_round_trips_through_the_codec() {
    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", archive_with_main(basic_types)).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    let buf = linker.write(4096).unwrap();
    let arc = open_bytes(&buf).unwrap();
    let main = arc.open_member(CTF_MAIN).unwrap();
    let main = main.borrow();

    assert_eq!(main.type_count(), 3);
    let int = main.lookup_type(TypeKind::Integer, "int").unwrap();
    assert_eq!(main.type_def(int.index()).unwrap().size, 4);
    let s = main.lookup_type(TypeKind::Struct, "S").unwrap();
    let s_def = main.type_def(s.index()).unwrap();
    assert_eq!(s_def.members.len(), 1);
    assert_eq!(s_def.members[0].name, "a");
}

#[test]
fn per_cu_members_resolve_against_the_reemitted_parent() {
    let a = archive_with_main(|c| {
        let int = c.add_integer("int", 4, 0);
        c.add_struct(Some("S"), 4, vec![member("a", int, 0)]);
    });
    let b = archive_with_main(|c| {
        let long = c.add_integer("long", 8, 0);
        c.add_struct(Some("S"), 8, vec![member("a", long, 0)]);
    });

    let mut linker = Linker::new(Container::new());
    linker.add_input("a.o", a).unwrap();
    linker.add_input("b.o", b).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();
    let buf = linker.write(4096).unwrap();

    let arc = open_bytes(&buf).unwrap();
    let main = arc.open_member(CTF_MAIN).unwrap();
    let child = arc.open_member(".ctf.b.o").unwrap();
    Container::import(&child, &main).unwrap();

    let cb = child.borrow();
    assert_eq!(cb.cu_name(), Some("b.o"));
    let s = cb.lookup_type(TypeKind::Struct, "S").unwrap();
    let member_ref = cb.type_def(s.index()).unwrap().members[0].ty.unwrap();
    assert!(cb.is_parent_scoped(member_ref));
    let mb = main.borrow();
    let long_def = mb.type_def(member_ref.index()).unwrap();
    assert_eq!(long_def.name.as_deref(), Some("long"));
}

#[test]
fn linking_with_no_registered_inputs_is_a_no_op() {
    let mut linker = Linker::new(Container::new());
    linker.link(ShareMode::Unconflicted).unwrap();
    assert_eq!(linker.outputs().count(), 0);
    // No output set was populated, so inputs may still be added.
    linker.add_input("a.o", archive_with_main(basic_types)).unwrap();
}

#[test]
fn nested_links_merge_variables_into_the_parent() {
    // The shared output is itself a child: types deduplicate against its
    // parent and variables land there when the type does.
    let parent = {
        let mut c = Container::new();
        c.add_integer("int", 4, 0);
        c.into_handle()
    };

    let mut linker = Linker::new(Container::new());
    Container::import(linker.shared(), &parent).unwrap();

    let a = archive_with_main(|c| {
        let int = c.add_integer("int", 4, 0);
        c.add_variable("g", int).unwrap();
    });
    linker.add_input("a.o", a).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    assert_eq!(parent.borrow().variable("g").map(|r| r.index()), Some(1));
    assert_eq!(linker.shared().borrow().variable_count(), 0);
    // The int collapsed into the parent rather than the shared child.
    assert_eq!(linker.shared().borrow().type_count(), 0);
}

#[test]
fn conflicted_parent_variables_rebind_in_the_shared_child() {
    let parent = {
        let mut c = Container::new();
        c.add_integer("int", 4, 0);
        let long = c.add_integer("long", 8, 0);
        c.add_variable("g", long).unwrap();
        c.into_handle()
    };

    let mut linker = Linker::new(Container::new());
    Container::import(linker.shared(), &parent).unwrap();

    let a = archive_with_main(|c| {
        let int = c.add_integer("int", 4, 0);
        c.add_variable("g", int).unwrap();
    });
    linker.add_input("a.o", a).unwrap();
    linker.link(ShareMode::Unconflicted).unwrap();

    // The parent binding wins in place; the incoming binding lands in the
    // shared child, scoped to resolve in the parent.
    let pb = parent.borrow();
    let parent_g = pb.variable("g").unwrap();
    assert_eq!(pb.type_def(parent_g.index()).unwrap().name.as_deref(), Some("long"));
    drop(pb);

    let sb = linker.shared().borrow();
    let child_g = sb.variable("g").unwrap();
    assert!(sb.is_parent_scoped(child_g));
    let pb = parent.borrow();
    assert_eq!(
        pb.type_def(child_g.index()).unwrap().name.as_deref(),
        Some("int")
    );
}
