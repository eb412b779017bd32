//! Image I/O collaborator interfaces.
//!
//! The core never decodes file formats itself. It talks to an [`ImageIo`]
//! factory that opens readers, creates writers, and optionally converts
//! sources into tiled mip-mapped textures. [`CodecImageIo`] is the default
//! implementation for common 2D formats; renderers with their own I/O stack
//! plug in here.

mod codec;

pub use codec::CodecImageIo;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pixel::TexelSliceMut;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("no decoder available for '{0}'")]
    DecoderUnavailable(PathBuf),

    #[error("failed to open '{path}': {message}")]
    Open { path: PathBuf, message: String },

    #[error("failed to read '{path}': {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to write '{path}': {message}")]
    Write { path: PathBuf, message: String },

    #[error("unsupported image operation: {0}")]
    Unsupported(String),
}

/// Storage format of a channel as stored in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelFormat {
    #[default]
    U8,
    U16,
    F16,
    F32,
}

impl ChannelFormat {
    /// Half counts as floating point, matching how HDR-ness is judged.
    pub fn is_floating_point(self) -> bool {
        matches!(self, ChannelFormat::F16 | ChannelFormat::F32)
    }

    pub fn base_size(self) -> usize {
        match self {
            ChannelFormat::U8 => 1,
            ChannelFormat::U16 | ChannelFormat::F16 => 2,
            ChannelFormat::F32 => 4,
        }
    }
}

/// Layout and metadata of an image file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageSpec {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub channels: usize,
    /// Main storage format of the file.
    pub format: ChannelFormat,
    /// Per-channel overrides; empty when all channels use `format`.
    pub channel_formats: Vec<ChannelFormat>,
    pub channel_names: Vec<String>,
    /// Multi-view part names; two or more mean multi-view channel naming.
    pub views: Vec<String>,
    /// Deep images carry per-pixel sample lists and are not mergeable.
    pub deep: bool,
    /// String metadata (render times, per-layer sample counts, ...).
    pub attributes: BTreeMap<String, String>,
}

impl ImageSpec {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height * self.depth.max(1)
    }

    pub fn is_multiview(&self) -> bool {
        self.views.len() >= 2
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Format of channel `index`, falling back to the main format.
    pub fn channel_format(&self, index: usize) -> ChannelFormat {
        self.channel_formats.get(index).copied().unwrap_or(self.format)
    }
}

/// Options applied when opening a reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenConfig {
    /// Ask the decoder not to premultiply RGB by alpha.
    pub unassociated_alpha: bool,
}

/// An opened image file.
pub trait ImageReader: Send {
    fn spec(&self) -> &ImageSpec;

    /// Decoder name, lowercase ("png", "jpeg", "exr", ...).
    fn format_name(&self) -> &str;

    /// Read the whole image interleaved at the file's native channel count,
    /// converted into the storage type of `out`, scanlines top-down. `out`
    /// must hold at least `pixel_count * channels` elements.
    fn read_pixels(&mut self, out: TexelSliceMut<'_>) -> Result<(), IoError>;
}

/// An output file in the making. Dropping the writer closes the file.
pub trait ImageWriter: Send {
    /// Write a full float image matching `spec`; the implementation converts
    /// to the spec's storage format.
    fn write_image(&mut self, spec: &ImageSpec, pixels: &[f32]) -> Result<(), IoError>;
}

/// Edge wrap written into generated mip-mapped textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Black,
    Periodic,
    Clamp,
}

impl WrapMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WrapMode::Black => "black",
            WrapMode::Periodic => "periodic",
            WrapMode::Clamp => "clamp",
        }
    }
}

/// Attributes for tiled mip-map generation.
#[derive(Debug, Clone, PartialEq)]
pub struct MakeTexOptions {
    pub filter_name: String,
    pub opaque_detect: bool,
    pub highlight_compensation: bool,
    pub oiio_options: bool,
    pub update_mode: bool,
    pub wrap: WrapMode,
    /// Source colorspace for the conversion to linear; `None` skips the
    /// conversion entirely (raw data).
    pub in_colorspace: Option<String>,
    pub out_colorspace: Option<String>,
}

impl Default for MakeTexOptions {
    fn default() -> Self {
        MakeTexOptions {
            filter_name: "lanczos3".to_string(),
            opaque_detect: true,
            highlight_compensation: true,
            oiio_options: true,
            update_mode: true,
            wrap: WrapMode::Periodic,
            in_colorspace: None,
            out_colorspace: None,
        }
    }
}

/// Factory for readers and writers.
pub trait ImageIo: Send + Sync {
    fn open(&self, path: &Path, config: OpenConfig) -> Result<Box<dyn ImageReader>, IoError>;

    fn create_writer(&self, path: &Path) -> Result<Box<dyn ImageWriter>, IoError>;

    /// Convert `src` into a tiled mip-mapped texture at `dst`.
    fn make_texture(
        &self,
        src: &Path,
        dst: &Path,
        options: &MakeTexOptions,
    ) -> Result<(), IoError> {
        let _ = (src, dst, options);
        Err(IoError::Unsupported(
            "tiled mip-map generation".to_string(),
        ))
    }
}
