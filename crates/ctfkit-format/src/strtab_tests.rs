use indexmap::IndexMap;

use super::strtab::{lookup_str, StrtabBuilder, STR_EXTERNAL};

#[test]
fn interns_and_deduplicates() {
    let mut b = StrtabBuilder::new();
    let a = b.intern("alpha");
    let c = b.intern("beta");
    assert_ne!(a, c);
    assert_eq!(b.intern("alpha"), a);

    let blob = b.into_blob();
    assert_eq!(lookup_str(&blob, a).unwrap(), Some("alpha"));
    assert_eq!(lookup_str(&blob, c).unwrap(), Some("beta"));
}

#[test]
fn empty_string_is_reference_zero() {
    let mut b = StrtabBuilder::new();
    assert_eq!(b.encode(""), 0);
    let blob = b.into_blob();
    assert_eq!(lookup_str(&blob, 0).unwrap(), Some(""));
}

#[test]
fn external_strings_are_not_inlined() {
    let mut ext = IndexMap::new();
    ext.insert("foo".to_string(), 17u32);
    ext.insert("bar".to_string(), 34u32);

    let mut b = StrtabBuilder::with_external(&ext);
    assert_eq!(b.encode("foo"), STR_EXTERNAL | 17);
    assert_eq!(b.encode("bar"), STR_EXTERNAL | 34);
    let local = b.encode("baz");
    assert_eq!(local & STR_EXTERNAL, 0);

    let blob = b.into_blob();
    assert!(!blob.windows(3).any(|w| w == b"foo"));
    assert!(!blob.windows(3).any(|w| w == b"bar"));
    assert!(blob.windows(3).any(|w| w == b"baz"));
}

#[test]
fn external_references_resolve_to_none() {
    let blob = vec![0u8];
    assert_eq!(lookup_str(&blob, STR_EXTERNAL | 17).unwrap(), None);
}

#[test]
fn out_of_range_reference_is_rejected() {
    let blob = vec![0u8];
    assert!(lookup_str(&blob, 40).is_err());
}

#[test]
fn intern_bypasses_external_table() {
    let mut ext = IndexMap::new();
    ext.insert("main.c".to_string(), 9u32);

    let mut b = StrtabBuilder::with_external(&ext);
    let r = b.intern("main.c");
    assert_eq!(r & STR_EXTERNAL, 0);
    let blob = b.into_blob();
    assert_eq!(lookup_str(&blob, r).unwrap(), Some("main.c"));
}
