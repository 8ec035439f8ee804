//! PEP — Prediction-Encoded Pixels.
//!
//! A lossless pixel-art codec: palette construction over an adaptive order-2
//! PPM model, fed through a finite-precision binary arithmetic coder, wrapped
//! in a small container format. See [`image`] for the public operations and
//! [`PepImage`] for the data model.

pub mod coder;
pub mod error;
pub mod format;
pub mod image;
pub mod model;
pub mod pack;
pub mod palette;

pub use error::{PepError, Result};
pub use format::PepFormat;
pub use image::{compress, decompress, deserialize, load, save, serialize, PepImage};
pub use palette::ColorBits;
