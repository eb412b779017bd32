//! Image metadata and the probe that fills it.
//!
//! The probe opens a source just far enough to learn its dimensions,
//! channel count and storage, and to resolve the colorspace. It never reads
//! pixels.

use std::path::Path;

use thiserror::Error;

use crate::builtin::BuiltinCallbacks;
use crate::colorspace::{ColorSpaceConverter, Colorspace};
use crate::io::{ChannelFormat, ImageIo, IoError, OpenConfig};
use crate::pixel::PixelKind;
use crate::texture::ImageIdentity;
use crate::volume::{grid_is_vector, is_volume_file, VolumeReader};

/// Everything `add_image` needs to pick a slot and the loader needs to
/// size its buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetaData {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    /// Channel count in `1..=4`; wider inputs are dropped to four.
    pub channels: usize,
    pub kind: PixelKind,
    pub is_float: bool,
    pub is_half: bool,
    /// Store sRGB-encoded and let the kernels decode on sample.
    pub compress_as_srgb: bool,
    pub colorspace: Colorspace,
    /// Host wants its builtin pixel cache released after the load.
    pub builtin_free_cache: bool,
}

impl Default for ImageMetaData {
    fn default() -> Self {
        ImageMetaData {
            width: 0,
            height: 0,
            depth: 0,
            channels: 0,
            kind: PixelKind::U8,
            is_float: false,
            is_half: false,
            compress_as_srgb: false,
            colorspace: Colorspace::Auto,
            builtin_free_cache: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("file '{0}' does not exist")]
    FileMissing(String),

    #[error("file '{0}' is a directory, can't use as image")]
    FileIsDirectory(String),

    #[error("no builtin image callbacks registered")]
    BuiltinCallbacksMissing,

    #[error("builtin image '{0}' has no info")]
    BuiltinInfoMissing(String),

    #[error("no volume reader registered for '{0}'")]
    VolumeReaderMissing(String),

    #[error("file '{path}' does not have grid '{grid}'")]
    GridMissing { path: String, grid: String },

    #[error(transparent)]
    Decoder(#[from] IoError),
}

/// Resolve the colorspace and adjust storage for it.
///
/// sRGB inputs stay in their storage type and are flagged for on-sample
/// decode. Other conversions compress 8-bit inputs the same way, and
/// promote 16-bit integer inputs to half so HDR values produced by
/// linearization survive.
pub(crate) fn detect_colorspace(
    metadata: &mut ImageMetaData,
    converter: &dyn ColorSpaceConverter,
    file_format: &str,
) {
    metadata.colorspace = converter.detect_known(
        &metadata.colorspace,
        file_format,
        metadata.is_float || metadata.is_half,
    );

    match &metadata.colorspace {
        Colorspace::Raw | Colorspace::Auto => {}
        Colorspace::Srgb => {
            metadata.compress_as_srgb = true;
        }
        _ => {
            metadata.compress_as_srgb =
                matches!(metadata.kind, PixelKind::U8 | PixelKind::U8x4);
            metadata.kind = match metadata.kind {
                PixelKind::U16 => PixelKind::F16,
                PixelKind::U16x4 => PixelKind::F16x4,
                kind => kind,
            };
        }
    }
}

/// Fill an [`ImageMetaData`] for an identity without reading pixels.
pub(crate) fn probe_metadata(
    io: &dyn ImageIo,
    volume: Option<&dyn VolumeReader>,
    builtin: Option<&dyn BuiltinCallbacks>,
    converter: &dyn ColorSpaceConverter,
    identity: &ImageIdentity,
) -> Result<ImageMetaData, ProbeError> {
    let mut metadata = ImageMetaData {
        colorspace: identity.colorspace.clone(),
        ..ImageMetaData::default()
    };

    let name = identity.filename.to_string_lossy();

    if let Some(key) = identity.builtin {
        let callbacks = builtin.ok_or(ProbeError::BuiltinCallbacksMissing)?;
        let info = callbacks
            .info(&name, key)
            .ok_or_else(|| ProbeError::BuiltinInfoMissing(name.to_string()))?;

        metadata.width = info.width;
        metadata.height = info.height;
        metadata.depth = info.depth;
        metadata.channels = info.channels.min(4);
        metadata.is_float = info.is_float;
        metadata.builtin_free_cache = info.free_cache;
        metadata.kind = if info.is_float {
            rgba_or_scalar(metadata.channels, PixelKind::F32x4, PixelKind::F32)
        } else {
            rgba_or_scalar(metadata.channels, PixelKind::U8x4, PixelKind::U8)
        };

        detect_colorspace(&mut metadata, converter, "");
        return Ok(metadata);
    }

    check_path(&identity.filename)?;

    if is_volume_file(&identity.filename) {
        let reader =
            volume.ok_or_else(|| ProbeError::VolumeReaderMissing(name.to_string()))?;
        if !reader.has_grid(&identity.filename, &identity.grid_name) {
            return Err(ProbeError::GridMissing {
                path: name.to_string(),
                grid: identity.grid_name.clone(),
            });
        }
        let [x, y, z] = reader
            .resolution(&identity.filename)
            .unwrap_or([0, 0, 0]);
        metadata.width = x;
        metadata.height = y;
        metadata.depth = z;
        metadata.is_float = true;
        metadata.is_half = false;
        if grid_is_vector(&identity.grid_name) {
            metadata.channels = 4;
            metadata.kind = PixelKind::F32x4;
        } else {
            metadata.channels = 1;
            metadata.kind = PixelKind::F32;
        }
        return Ok(metadata);
    }

    let reader = io.open(&identity.filename, OpenConfig::default())?;
    let spec = reader.spec();

    metadata.width = spec.width;
    metadata.height = spec.height;
    metadata.depth = spec.depth;
    metadata.compress_as_srgb = false;

    metadata.is_float = spec.format.is_floating_point()
        || spec
            .channel_formats
            .iter()
            .any(|format| format.is_floating_point());
    metadata.is_half = spec.format == ChannelFormat::F16;

    if spec.channels == 0 {
        return Err(ProbeError::Decoder(IoError::Unsupported(
            "image with no channels".to_string(),
        )));
    }
    metadata.channels = spec.channels.min(4);

    metadata.kind = if metadata.is_half {
        rgba_or_scalar(metadata.channels, PixelKind::F16x4, PixelKind::F16)
    } else if metadata.is_float {
        rgba_or_scalar(metadata.channels, PixelKind::F32x4, PixelKind::F32)
    } else if spec.format == ChannelFormat::U16 {
        rgba_or_scalar(metadata.channels, PixelKind::U16x4, PixelKind::U16)
    } else {
        rgba_or_scalar(metadata.channels, PixelKind::U8x4, PixelKind::U8)
    };

    let format_name = reader.format_name().to_string();
    detect_colorspace(&mut metadata, converter, &format_name);

    Ok(metadata)
}

fn rgba_or_scalar(channels: usize, rgba: PixelKind, scalar: PixelKind) -> PixelKind {
    if channels > 1 {
        rgba
    } else {
        scalar
    }
}

pub(crate) fn check_path(path: &Path) -> Result<(), ProbeError> {
    let display = path.to_string_lossy();
    match std::fs::metadata(path) {
        Err(_) => Err(ProbeError::FileMissing(display.to_string())),
        Ok(meta) if meta.is_dir() => Err(ProbeError::FileIsDirectory(display.to_string())),
        Ok(_) => Ok(()),
    }
}
