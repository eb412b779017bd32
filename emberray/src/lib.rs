//! emberray — texture image management for a GPU path tracer.
//!
//! Two subsystems live here:
//!
//! - the [`texture`] image manager: deduplicates a scene's image
//!   references into reference-counted, typed texture slots, decodes and
//!   normalizes pixel data through a generic pipeline (with sparse
//!   encoding for volumes), and uploads the results to the device;
//! - the [`merge`] compositor: folds several partial renders of the same
//!   scene into one sample-weighted output.
//!
//! File decoding, colorspace math, volume containers, and the device
//! back-end are collaborators behind traits ([`io::ImageIo`],
//! [`colorspace::ColorSpaceConverter`], [`volume::VolumeReader`],
//! [`device::Device`]); defaults are provided where a pure-Rust
//! implementation is practical.

pub mod builtin;
pub mod colorspace;
pub mod device;
pub mod io;
pub mod merge;
pub mod pixel;
pub mod pool;
pub mod progress;
pub mod sparse;
pub mod stats;
pub mod texture;
pub mod volume;

/// Library version, shared with the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
