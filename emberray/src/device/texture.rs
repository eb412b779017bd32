//! Typed texture buffers staged for device upload.

use crate::pixel::{PixelData, PixelKind};
use crate::texture::TextureHandle;

/// Filtering mode baked into the device sampler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Closest,
    #[default]
    Linear,
    Cubic,
    SmartCubic,
}

/// Behavior outside the unit image square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extension {
    /// Wrap around.
    #[default]
    Repeat,
    /// Clamp to the edge texel.
    Extend,
    /// Black outside the image.
    Clip,
}

/// Storage layout of a volume texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridKind {
    /// Contiguous `width * height * depth` voxels; also all 2D images.
    #[default]
    Dense,
    /// Active tiles concatenated, plus an offset table.
    Sparse,
    /// Active tiles stored as padded blocks for per-tile sampling.
    SparsePadded,
    /// Grid stays in the external container, sampled through its own API.
    External,
}

/// Sparse companion buffer mapping tile coordinates to active ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridInfoBuffer {
    pub name: String,
    pub offsets: Vec<i32>,
}

impl GridInfoBuffer {
    pub fn size_bytes(&self) -> usize {
        self.offsets.len() * std::mem::size_of::<i32>()
    }
}

/// A texture staged for (or resident on) the device.
///
/// `width/height/depth` describe the storage actually allocated, which for
/// sparse grids and downscaled images differs from the logical image; the
/// `dense_*` fields keep the logical dimensions the kernels address by.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTexture {
    pub name: String,
    pub kind: PixelKind,
    pub data: PixelData,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub dense_width: usize,
    pub dense_height: usize,
    pub dense_depth: usize,
    pub interpolation: Interpolation,
    pub extension: Extension,
    pub grid_kind: GridKind,
    pub grid_info: Option<GridInfoBuffer>,
}

impl DeviceTexture {
    /// Stage an already-filled pixel buffer.
    pub fn from_pixels(
        name: String,
        kind: PixelKind,
        data: PixelData,
        width: usize,
        height: usize,
        depth: usize,
    ) -> DeviceTexture {
        debug_assert_eq!(data.len(), width * height * depth.max(1) * kind.channels());
        DeviceTexture {
            name,
            kind,
            data,
            width,
            height,
            depth,
            dense_width: width,
            dense_height: height,
            dense_depth: depth,
            interpolation: Interpolation::default(),
            extension: Extension::default(),
            grid_kind: GridKind::default(),
            grid_info: None,
        }
    }

    /// Stage a zero-filled buffer of the given dimensions.
    pub fn alloc(
        name: String,
        kind: PixelKind,
        width: usize,
        height: usize,
        depth: usize,
    ) -> DeviceTexture {
        let len = width * height * depth.max(1) * kind.channels();
        DeviceTexture::from_pixels(
            name,
            kind,
            PixelData::zeroed(kind.storage(), len),
            width,
            height,
            depth,
        )
    }

    /// Debug name shaders and memory reports refer to:
    /// `__tex_image_<type_name>_<flat_slot:03>`.
    pub fn debug_name(kind: PixelKind, handle: TextureHandle) -> String {
        format!("__tex_image_{}_{:03}", kind.type_name(), handle.raw())
    }

    /// Name of the sparse companion buffer.
    pub fn grid_info_name(&self) -> String {
        format!("{}_info", self.name)
    }

    /// Total staged bytes, companion table included.
    pub fn memory_size(&self) -> usize {
        self.data.size_bytes() + self.grid_info.as_ref().map_or(0, GridInfoBuffer::size_bytes)
    }
}
