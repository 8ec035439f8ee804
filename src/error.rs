//! Error type shared by every fallible operation in this crate.

use thiserror::Error;

/// Everything that can go wrong while compressing, decompressing, or
/// (de)serializing a [`crate::image::PepImage`].
#[derive(Debug, Error)]
pub enum PepError {
    /// The caller handed us a buffer or geometry that cannot be encoded:
    /// a null/empty pixel slice, a zero width or height, or a raw buffer
    /// whose length doesn't match `width * height`.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// The byte stream handed to [`crate::image::deserialize`] is structurally
    /// impossible: a truncated header, a zero payload length, a geometry of
    /// zero, or a LEB128 length that never terminates within its bound.
    #[error("malformed container: {0}")]
    MalformedContainer(&'static str),

    /// A `save`/`load` operation failed at the filesystem boundary.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PepError>;
