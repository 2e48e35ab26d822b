use std::path::Path;

use super::{load_archive, name_column_width};

pub fn run(path: &Path) {
    let arc = load_archive(path);
    let width = name_column_width(arc.member_names());

    for name in arc.member_names() {
        let size = arc.member_data(name).map_or(0, <[u8]>::len);
        println!("{name:<width$}  {size:>10}");
    }
}
