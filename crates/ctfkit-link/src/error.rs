//! Errors surfaced by the link engine.

use ctfkit_format::FormatError;

/// Error raised while registering inputs, linking, or emitting.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// An input was registered after the output set was already populated.
    #[error("input added after the link output set was populated")]
    LateAdd,

    /// The requested share mode is reserved but not implemented.
    #[error("share mode not yet implemented")]
    NotYetImplemented,

    /// A variable's source type has no destination mapping anywhere.
    #[error("type for variable `{variable}` has no destination mapping")]
    InvalidMapping { variable: String },

    /// Container finalization or archive writing failed at a named stage.
    #[error("{stage}: {source}")]
    Write {
        stage: &'static str,
        source: FormatError,
    },

    /// An underlying container or codec failure.
    #[error(transparent)]
    Format(#[from] FormatError),
}
