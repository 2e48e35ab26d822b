use std::path::Path;

use super::{load_archive, name_column_width};

pub fn run(path: &Path, output: Option<&Path>, verbose: bool) {
    let arc = load_archive(path);
    let dir = output.unwrap_or(Path::new("."));

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("error: cannot create {}: {e}", dir.display());
        std::process::exit(1);
    }

    let width = name_column_width(arc.member_names());
    for name in arc.member_names() {
        let data = arc.member_data(name).unwrap_or(&[]);
        let dest = dir.join(name);
        if let Err(e) = std::fs::write(&dest, data) {
            eprintln!("error: cannot write {}: {e}", dest.display());
            std::process::exit(1);
        }
        if verbose {
            println!("{name:<width$}  {:>10}", data.len());
        }
    }
}
