//! Colorspace tokens and the scene-linear conversion seam.
//!
//! The manager only distinguishes three cases: raw data that must never be
//! touched, sRGB that is stored encoded and decoded by the kernels at sample
//! time, and everything else, which a [`ColorSpaceConverter`] collaborator
//! turns into scene-linear during load.

use std::sync::Arc;

use tracing::warn;

use crate::pixel::TexelSliceMut;

/// Interned colorspace token attached to image identities and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Colorspace {
    /// Not yet resolved; the probe picks raw or sRGB from the file contents.
    #[default]
    Auto,
    /// Non-color data, stored untouched.
    Raw,
    /// sRGB-encoded color.
    Srgb,
    /// Any other space, resolved by the converter.
    Named(Arc<str>),
}

impl Colorspace {
    pub fn named(name: impl AsRef<str>) -> Colorspace {
        Colorspace::Named(Arc::from(name.as_ref()))
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Colorspace::Raw)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(self, Colorspace::Srgb)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Colorspace::Auto => "",
            Colorspace::Raw => "raw",
            Colorspace::Srgb => "sRGB",
            Colorspace::Named(name) => name,
        }
    }
}

/// Conversion math collaborator.
///
/// `to_scene_linear` is only invoked for four-channel buffers whose resolved
/// colorspace is neither raw nor sRGB; with `compress_as_srgb` the result is
/// re-encoded as sRGB so 8-bit storage keeps its precision.
pub trait ColorSpaceConverter: Send + Sync {
    /// Normalize a user-specified colorspace to one the loader can handle.
    fn detect_known(&self, colorspace: &Colorspace, file_format: &str, is_hdr: bool) -> Colorspace;

    /// Whether the space carries non-color data (normals, masks, heights).
    fn is_data(&self, colorspace: &Colorspace) -> bool;

    fn to_scene_linear(
        &self,
        colorspace: &Colorspace,
        pixels: TexelSliceMut<'_>,
        width: usize,
        height: usize,
        depth: usize,
        compress_as_srgb: bool,
    );
}

/// Default converter without an external color management library.
///
/// Resolves common aliases, falls back to raw for spaces it does not know
/// (an unknown colorspace is never an error), and defaults unspecified HDR
/// inputs to raw and LDR inputs to sRGB.
#[derive(Debug, Default)]
pub struct SrgbColorSpace;

impl ColorSpaceConverter for SrgbColorSpace {
    fn detect_known(&self, colorspace: &Colorspace, _file_format: &str, is_hdr: bool) -> Colorspace {
        match colorspace {
            Colorspace::Raw => Colorspace::Raw,
            Colorspace::Srgb => Colorspace::Srgb,
            Colorspace::Auto => {
                if is_hdr {
                    Colorspace::Raw
                } else {
                    Colorspace::Srgb
                }
            }
            Colorspace::Named(name) => match name.to_ascii_lowercase().as_str() {
                "raw" | "linear" | "scene_linear" | "non-color" | "data" => Colorspace::Raw,
                "srgb" | "default" => Colorspace::Srgb,
                _ => {
                    warn!(colorspace = %name, "unknown colorspace, treating as raw");
                    Colorspace::Raw
                }
            },
        }
    }

    fn is_data(&self, colorspace: &Colorspace) -> bool {
        colorspace.is_raw()
    }

    fn to_scene_linear(
        &self,
        _colorspace: &Colorspace,
        _pixels: TexelSliceMut<'_>,
        _width: usize,
        _height: usize,
        _depth: usize,
        _compress_as_srgb: bool,
    ) {
        // detect_known never hands this converter a space it can't resolve
        // to raw or sRGB, so there is nothing left to convert here.
    }
}
