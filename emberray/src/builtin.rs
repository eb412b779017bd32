//! Host-resident pixel sources.
//!
//! Some images never touch the filesystem: the host application hands the
//! manager generated or packed pixel data through these callbacks, keyed by
//! an opaque token. The token participates in image identity by value, the
//! way a raw pointer would by address.

/// Opaque token naming one host-resident image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinKey(pub u64);

/// Dimensions and storage of a host-resident image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinInfo {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub channels: usize,
    /// Float pixels if set, 8-bit otherwise.
    pub is_float: bool,
    /// Whether the host wants its cached copy released after the read.
    pub free_cache: bool,
}

/// Callbacks provided by the host application.
///
/// Reads fill the whole image; the buffer length is
/// `width * height * depth * channels`. A `false` return means the host
/// could no longer produce the pixels.
pub trait BuiltinCallbacks: Send + Sync {
    fn info(&self, name: &str, key: BuiltinKey) -> Option<BuiltinInfo>;

    fn pixels_u8(
        &self,
        name: &str,
        key: BuiltinKey,
        out: &mut [u8],
        associate_alpha: bool,
        free_cache: bool,
    ) -> bool;

    fn pixels_f32(
        &self,
        name: &str,
        key: BuiltinKey,
        out: &mut [f32],
        associate_alpha: bool,
        free_cache: bool,
    ) -> bool;
}
