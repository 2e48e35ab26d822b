//! `ctfar` subcommands.

pub mod extract;
pub mod list;

#[cfg(test)]
mod commands_tests;

use std::path::Path;

use ctfkit_format::{open_bytes, Archive};

/// Read and open an archive file, exiting with a diagnostic on failure.
pub(crate) fn load_archive(path: &Path) -> Archive {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    match open_bytes(&bytes) {
        Ok(arc) => arc,
        Err(e) => {
            eprintln!("error: {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

/// Column width fitting every member name.
pub(crate) fn name_column_width<'a>(names: impl Iterator<Item = &'a str>) -> usize {
    names.map(str::len).max().unwrap_or(0).max(4)
}
