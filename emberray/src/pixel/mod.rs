//! Device pixel layouts and storage-type conversions.
//!
//! The rendering kernels sample from a closed set of eight texture layouts:
//! one- and four-channel variants of `f32`, `u8`, `f16` and `u16`. Everything
//! the loader produces is normalized into one of these kinds before upload.

mod resize;

pub use resize::resize_pixels;

use half::f16;

/// The eight device-friendly pixel layouts.
///
/// The discriminants are the tag bits stored in the low bits of a flat
/// texture handle, so shaders can route a handle to the matching texture
/// array without a lookup. The order is part of the device ABI and must not
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PixelKind {
    F32x4 = 0,
    U8x4 = 1,
    F16x4 = 2,
    F32 = 3,
    U8 = 4,
    F16 = 5,
    U16x4 = 6,
    U16 = 7,
}

/// Storage type backing a [`PixelKind`], without the channel multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    F32,
    U8,
    F16,
    U16,
}

impl PixelKind {
    /// Number of pixel kinds; slot tables are indexed `0..COUNT`.
    pub const COUNT: usize = 8;

    /// All kinds in tag order.
    pub const ALL: [PixelKind; PixelKind::COUNT] = [
        PixelKind::F32x4,
        PixelKind::U8x4,
        PixelKind::F16x4,
        PixelKind::F32,
        PixelKind::U8,
        PixelKind::F16,
        PixelKind::U16x4,
        PixelKind::U16,
    ];

    /// Tag stored in the low bits of a flat handle.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Inverse of [`PixelKind::tag`].
    pub fn from_tag(tag: u32) -> Option<PixelKind> {
        PixelKind::ALL.get(tag as usize).copied()
    }

    /// Channel count of the device layout, 1 or 4.
    pub fn channels(self) -> usize {
        match self {
            PixelKind::F32x4 | PixelKind::U8x4 | PixelKind::F16x4 | PixelKind::U16x4 => 4,
            PixelKind::F32 | PixelKind::U8 | PixelKind::F16 | PixelKind::U16 => 1,
        }
    }

    /// Width in bytes of a single storage element.
    pub fn element_bytes(self) -> usize {
        match self.storage() {
            StorageKind::F32 => 4,
            StorageKind::U8 => 1,
            StorageKind::F16 | StorageKind::U16 => 2,
        }
    }

    /// Bytes per whole pixel.
    pub fn pixel_bytes(self) -> usize {
        self.channels() * self.element_bytes()
    }

    pub fn storage(self) -> StorageKind {
        match self {
            PixelKind::F32x4 | PixelKind::F32 => StorageKind::F32,
            PixelKind::U8x4 | PixelKind::U8 => StorageKind::U8,
            PixelKind::F16x4 | PixelKind::F16 => StorageKind::F16,
            PixelKind::U16x4 | PixelKind::U16 => StorageKind::U16,
        }
    }

    /// Kind with the same storage but the given channel count.
    pub fn from_storage(storage: StorageKind, rgba: bool) -> PixelKind {
        match (storage, rgba) {
            (StorageKind::F32, true) => PixelKind::F32x4,
            (StorageKind::F32, false) => PixelKind::F32,
            (StorageKind::U8, true) => PixelKind::U8x4,
            (StorageKind::U8, false) => PixelKind::U8,
            (StorageKind::F16, true) => PixelKind::F16x4,
            (StorageKind::F16, false) => PixelKind::F16,
            (StorageKind::U16, true) => PixelKind::U16x4,
            (StorageKind::U16, false) => PixelKind::U16,
        }
    }

    /// Name used in device buffer debug names.
    pub fn type_name(self) -> &'static str {
        match self {
            PixelKind::F32x4 => "float4",
            PixelKind::U8x4 => "byte4",
            PixelKind::F16x4 => "half4",
            PixelKind::F32 => "float",
            PixelKind::U8 => "byte",
            PixelKind::F16 => "half",
            PixelKind::U16x4 => "ushort4",
            PixelKind::U16 => "ushort",
        }
    }
}

/// A storage element the pixel pipeline can work on.
///
/// Conversions clamp to `[0, 1]` before integer quantization and round to
/// nearest; half goes through IEEE 754 half conversion; floats pass through
/// untouched.
pub trait Texel: Copy + Send + Sync + 'static {
    /// Single-channel kind backed by this storage type.
    const KIND_SCALAR: PixelKind;
    /// Four-channel kind backed by this storage type.
    const KIND_RGBA: PixelKind;
    /// Whether the finite guard applies to buffers of this type. Integer and
    /// half storage can't hold the NaN/Inf values the guard protects against
    /// (half reads come pre-sanitized by the decoder).
    const CHECK_FINITE: bool;

    fn from_f32(v: f32) -> Self;
    fn to_f32(self) -> f32;

    /// 1.0 mapped into this storage.
    fn unit() -> Self {
        Self::from_f32(1.0)
    }

    fn zero() -> Self {
        Self::from_f32(0.0)
    }

    fn is_finite_value(self) -> bool;

    /// View a buffer of this type through the runtime-tagged slice enum,
    /// for collaborators that are not generic.
    fn wrap_slice_mut(buf: &mut [Self]) -> TexelSliceMut<'_>;

    /// Move a buffer of this type into the owned sum type.
    fn into_pixel_data(buf: Vec<Self>) -> PixelData;
}

impl Texel for f32 {
    const KIND_SCALAR: PixelKind = PixelKind::F32;
    const KIND_RGBA: PixelKind = PixelKind::F32x4;
    const CHECK_FINITE: bool = true;

    fn from_f32(v: f32) -> Self {
        v
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn is_finite_value(self) -> bool {
        self.is_finite()
    }

    fn wrap_slice_mut(buf: &mut [Self]) -> TexelSliceMut<'_> {
        TexelSliceMut::F32(buf)
    }

    fn into_pixel_data(buf: Vec<Self>) -> PixelData {
        PixelData::F32(buf)
    }
}

impl Texel for u8 {
    const KIND_SCALAR: PixelKind = PixelKind::U8;
    const KIND_RGBA: PixelKind = PixelKind::U8x4;
    const CHECK_FINITE: bool = false;

    fn from_f32(v: f32) -> Self {
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    }

    fn to_f32(self) -> f32 {
        f32::from(self) / 255.0
    }

    fn is_finite_value(self) -> bool {
        true
    }

    fn wrap_slice_mut(buf: &mut [Self]) -> TexelSliceMut<'_> {
        TexelSliceMut::U8(buf)
    }

    fn into_pixel_data(buf: Vec<Self>) -> PixelData {
        PixelData::U8(buf)
    }
}

impl Texel for u16 {
    const KIND_SCALAR: PixelKind = PixelKind::U16;
    const KIND_RGBA: PixelKind = PixelKind::U16x4;
    const CHECK_FINITE: bool = false;

    fn from_f32(v: f32) -> Self {
        (v.clamp(0.0, 1.0) * 65535.0).round() as u16
    }

    fn to_f32(self) -> f32 {
        f32::from(self) / 65535.0
    }

    fn is_finite_value(self) -> bool {
        true
    }

    fn wrap_slice_mut(buf: &mut [Self]) -> TexelSliceMut<'_> {
        TexelSliceMut::U16(buf)
    }

    fn into_pixel_data(buf: Vec<Self>) -> PixelData {
        PixelData::U16(buf)
    }
}

impl Texel for f16 {
    const KIND_SCALAR: PixelKind = PixelKind::F16;
    const KIND_RGBA: PixelKind = PixelKind::F16x4;
    const CHECK_FINITE: bool = false;

    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    fn is_finite_value(self) -> bool {
        self.is_finite()
    }

    fn wrap_slice_mut(buf: &mut [Self]) -> TexelSliceMut<'_> {
        TexelSliceMut::F16(buf)
    }

    fn into_pixel_data(buf: Vec<Self>) -> PixelData {
        PixelData::F16(buf)
    }
}

/// Owned pixel buffer, tagged by storage type.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl PixelData {
    /// Zero-filled buffer of `len` storage elements.
    pub fn zeroed(storage: StorageKind, len: usize) -> PixelData {
        match storage {
            StorageKind::F32 => PixelData::F32(vec![0.0; len]),
            StorageKind::F16 => PixelData::F16(vec![f16::ZERO; len]),
            StorageKind::U8 => PixelData::U8(vec![0; len]),
            StorageKind::U16 => PixelData::U16(vec![0; len]),
        }
    }

    /// Number of storage elements.
    pub fn len(&self) -> usize {
        match self {
            PixelData::F32(v) => v.len(),
            PixelData::F16(v) => v.len(),
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            PixelData::F32(v) => v.len() * 4,
            PixelData::F16(v) => v.len() * 2,
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len() * 2,
        }
    }

    pub fn storage(&self) -> StorageKind {
        match self {
            PixelData::F32(_) => StorageKind::F32,
            PixelData::F16(_) => StorageKind::F16,
            PixelData::U8(_) => StorageKind::U8,
            PixelData::U16(_) => StorageKind::U16,
        }
    }

    /// Element at `index` widened to float, mainly for tests and debugging.
    pub fn get_f32(&self, index: usize) -> Option<f32> {
        match self {
            PixelData::F32(v) => v.get(index).copied(),
            PixelData::F16(v) => v.get(index).map(|x| x.to_f32()),
            PixelData::U8(v) => v.get(index).map(|x| x.to_f32()),
            PixelData::U16(v) => v.get(index).map(|x| x.to_f32()),
        }
    }
}

/// Mutable view over a pixel buffer for non-generic collaborators.
pub enum TexelSliceMut<'a> {
    F32(&'a mut [f32]),
    F16(&'a mut [f16]),
    U8(&'a mut [u8]),
    U16(&'a mut [u16]),
}

impl TexelSliceMut<'_> {
    pub fn len(&self) -> usize {
        match self {
            TexelSliceMut::F32(s) => s.len(),
            TexelSliceMut::F16(s) => s.len(),
            TexelSliceMut::U8(s) => s.len(),
            TexelSliceMut::U16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn storage(&self) -> StorageKind {
        match self {
            TexelSliceMut::F32(_) => StorageKind::F32,
            TexelSliceMut::F16(_) => StorageKind::F16,
            TexelSliceMut::U8(_) => StorageKind::U8,
            TexelSliceMut::U16(_) => StorageKind::U16,
        }
    }
}
