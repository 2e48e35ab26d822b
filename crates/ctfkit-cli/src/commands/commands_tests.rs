use super::name_column_width;

#[test]
fn column_width_fits_the_longest_name() {
    let names = [".ctf", ".ctf.some-long-unit.o", ".ctf.a.o"];
    assert_eq!(
        name_column_width(names.iter().copied()),
        ".ctf.some-long-unit.o".len()
    );
}

#[test]
fn column_width_has_a_floor() {
    assert_eq!(name_column_width(std::iter::empty()), 4);
    assert_eq!(name_column_width([".c"].iter().copied()), 4);
}
