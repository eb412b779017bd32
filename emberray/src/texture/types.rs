//! Identity and request types for the image cache.

use std::path::PathBuf;

use crate::builtin::BuiltinKey;
use crate::colorspace::Colorspace;
use crate::device::{Extension, Interpolation};

/// How the alpha channel is interpreted on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    /// Associated alpha, except for data colorspaces.
    #[default]
    Auto,
    /// Alpha is forced to 1 after decode.
    Ignore,
    /// Channels are independent packed data; no association.
    ChannelPacked,
    Associated,
    Unassociated,
}

/// The deduplication key. Every field participates in equality; two
/// requests with equal identities share one slot and one device texture.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageIdentity {
    pub filename: PathBuf,
    /// Grid to load from multi-grid volume files; empty for 2D images.
    pub grid_name: String,
    /// Host-resident pixels, compared by token value.
    pub builtin: Option<BuiltinKey>,
    pub interpolation: Interpolation,
    pub extension: Extension,
    pub alpha: AlphaMode,
    pub colorspace: Colorspace,
}

impl ImageIdentity {
    /// Identity for a plain file with default sampling options.
    pub fn file(path: impl Into<PathBuf>) -> ImageIdentity {
        ImageIdentity {
            filename: path.into(),
            grid_name: String::new(),
            builtin: None,
            interpolation: Interpolation::default(),
            extension: Extension::default(),
            alpha: AlphaMode::default(),
            colorspace: Colorspace::default(),
        }
    }

    /// Identity for host-resident pixels; `name` is only used in logs and
    /// debug names.
    pub fn builtin(name: impl Into<PathBuf>, key: BuiltinKey) -> ImageIdentity {
        ImageIdentity {
            builtin: Some(key),
            ..ImageIdentity::file(name)
        }
    }

    pub fn with_grid(mut self, grid_name: impl Into<String>) -> Self {
        self.grid_name = grid_name.into();
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension = extension;
        self
    }

    pub fn with_alpha(mut self, alpha: AlphaMode) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_colorspace(mut self, colorspace: Colorspace) -> Self {
        self.colorspace = colorspace;
        self
    }
}

/// Per-request flags for [`crate::texture::ImageManager::add_image`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddImageParams {
    pub animated: bool,
    pub frame: f32,
    pub is_volume: bool,
    pub isovalue: f32,
}

impl Default for AddImageParams {
    fn default() -> Self {
        AddImageParams {
            animated: false,
            frame: 0.0,
            is_volume: false,
            isovalue: 0.0,
        }
    }
}

impl AddImageParams {
    pub fn volume(isovalue: f32) -> AddImageParams {
        AddImageParams {
            is_volume: true,
            isovalue,
            ..AddImageParams::default()
        }
    }

    pub fn animated(frame: f32) -> AddImageParams {
        AddImageParams {
            animated: true,
            frame,
            ..AddImageParams::default()
        }
    }
}

/// Scene-level texture options applied during device updates.
#[derive(Debug, Clone, Default)]
pub struct TextureParams {
    /// Largest allowed image dimension; images beyond it are downscaled by
    /// powers of two. 0 disables the limit.
    pub texture_limit: usize,
    /// Generate missing tiled mip-map files (texture-cache path only).
    pub auto_convert_mip_maps: bool,
    /// Directory for generated mip-map files; `None` places them next to
    /// their sources.
    pub mip_map_cache_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality_covers_every_field() {
        let base = ImageIdentity::file("/tex/a.png");
        assert_eq!(base, base.clone());

        assert_ne!(base, base.clone().with_grid("density"));
        assert_ne!(base, base.clone().with_interpolation(Interpolation::Closest));
        assert_ne!(base, base.clone().with_extension(Extension::Clip));
        assert_ne!(base, base.clone().with_alpha(AlphaMode::Ignore));
        assert_ne!(base, base.clone().with_colorspace(Colorspace::Raw));
        assert_ne!(base, ImageIdentity::builtin("/tex/a.png", BuiltinKey(7)));
    }

    #[test]
    fn test_builtin_identity_compares_by_token() {
        let a = ImageIdentity::builtin("gen", BuiltinKey(1));
        let b = ImageIdentity::builtin("gen", BuiltinKey(1));
        let c = ImageIdentity::builtin("gen", BuiltinKey(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
