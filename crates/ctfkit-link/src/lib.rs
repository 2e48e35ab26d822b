//! CTF link engine.
//!
//! Linking merges the containers of several input archives into one output:
//! structurally identical types collapse into the shared output container,
//! conflicting types are segregated into per-CU child containers, external
//! symbol strings are interned into every output, and the result is emitted
//! as a single archive buffer with the shared container first.

pub mod linker;
pub mod mapping;

mod error;

#[cfg(test)]
mod link_tests;

pub use error::LinkError;
pub use linker::{Linker, ShareMode};
pub use mapping::TypeMapping;
