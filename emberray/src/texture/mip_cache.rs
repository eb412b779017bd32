//! The mip-mapped texture cache path.
//!
//! With an external texture system configured, 2D file records bypass the
//! pixel pipeline entirely: the loader resolves (or generates) a tiled
//! `.tx` mip-map for the source, asks the texture system for a handle, and
//! stores the handle with its sampler state in a table parallel to the slot
//! tables. These records never own device buffers.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::{ImageRecord, TextureHandle, TextureParams};
use crate::colorspace::Colorspace;
use crate::device::{Extension, Interpolation};
use crate::io::{ImageIo, MakeTexOptions, WrapMode};
use crate::progress::Progress;

/// External mip-mapped texture system: an on-disk texture cache with its
/// own handle table and locking.
pub trait TextureSystem: Send + Sync {
    /// Handle for a texture file, or `None` when the system cannot serve
    /// it.
    fn texture_handle(&self, path: &Path) -> Option<u64>;
}

/// Sampler state kept per flat slot for texture-system records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureSystemSlot {
    pub handle: Option<u64>,
    pub interpolation: Interpolation,
    pub extension: Extension,
    /// Set when a generated mip-map is in use; those are linearized during
    /// generation.
    pub is_linear: bool,
}

/// Table parallel to the slot tables, indexed by raw flat handle. Loader
/// tasks fill it in parallel, hence the interior mutex.
#[derive(Default)]
pub(crate) struct TextureSystemTable {
    slots: Mutex<Vec<Option<TextureSystemSlot>>>,
}

impl TextureSystemTable {
    pub fn set(&self, handle: TextureHandle, slot: TextureSystemSlot) {
        let index = handle.raw() as usize;
        let mut slots = self.slots.lock().unwrap();
        if slots.len() <= index {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(slot);
    }

    pub fn get(&self, handle: TextureHandle) -> Option<TextureSystemSlot> {
        if !handle.is_valid() {
            return None;
        }
        let slots = self.slots.lock().unwrap();
        slots.get(handle.raw() as usize).copied().flatten()
    }

    pub fn clear(&self, handle: TextureHandle) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(handle.raw() as usize) {
            *slot = None;
        }
    }
}

/// Serve a record through the texture system and record its sampler state.
pub(crate) fn device_load_texture_system(
    system: &dyn TextureSystem,
    io: &dyn ImageIo,
    table: &TextureSystemTable,
    record: &mut ImageRecord,
    flat: TextureHandle,
    params: &TextureParams,
    progress: &dyn Progress,
) {
    let mip_map = resolve_mip_map(
        io,
        &record.identity.filename,
        &record.metadata.colorspace,
        record.identity.extension,
        params.auto_convert_mip_maps,
        params.mip_map_cache_dir.as_deref(),
        progress,
    );

    let lookup = mip_map
        .as_deref()
        .unwrap_or(record.identity.filename.as_path());
    let handle = system.texture_handle(lookup);
    if handle.is_none() {
        warn!(path = %lookup.display(), "texture system rejected file");
    }

    table.set(
        flat,
        TextureSystemSlot {
            handle,
            interpolation: record.identity.interpolation,
            extension: record.identity.extension,
            is_linear: mip_map.is_some(),
        },
    );
    record.need_load = false;
}

/// Find or generate the mip-mapped companion of `filename`.
///
/// A file that already is a `.tx` is used as-is. Otherwise the companion is
/// `<stem>.tx` beside the source, or under `cache_dir` when one is
/// configured; a missing companion is generated when auto-convert is on.
pub(crate) fn resolve_mip_map(
    io: &dyn ImageIo,
    filename: &Path,
    colorspace: &Colorspace,
    extension: Extension,
    auto_convert: bool,
    cache_dir: Option<&Path>,
    progress: &dyn Progress,
) -> Option<PathBuf> {
    if !filename.exists() {
        return None;
    }
    if filename
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tx"))
    {
        return Some(filename.to_path_buf());
    }

    let mut tx_name = filename.with_extension("tx");
    if let Some(dir) = cache_dir {
        if let Some(base) = tx_name.file_name() {
            tx_name = dir.join(base);
        }
    }
    if tx_name.exists() {
        return Some(tx_name);
    }

    if auto_convert {
        progress.set_status(
            "Updating Images",
            &format!("Converting {}", filename.display()),
        );
        let options = make_tex_options(extension, colorspace);
        match io.make_texture(filename, &tx_name, &options) {
            Ok(()) => return Some(tx_name),
            Err(error) => {
                debug!(
                    filename = %filename.display(),
                    %error,
                    "mip-map generation failed, sampling the source directly"
                );
            }
        }
    }

    None
}

/// Conversion attributes for one source: wrap follows the extension mode,
/// and non-raw sources are linearized before mip-mapping.
pub(crate) fn make_tex_options(extension: Extension, colorspace: &Colorspace) -> MakeTexOptions {
    let wrap = match extension {
        Extension::Clip => WrapMode::Black,
        Extension::Repeat => WrapMode::Periodic,
        Extension::Extend => WrapMode::Clamp,
    };

    let mut options = MakeTexOptions {
        wrap,
        ..MakeTexOptions::default()
    };

    if !colorspace.is_raw() {
        let source = match colorspace {
            Colorspace::Srgb | Colorspace::Auto => "sRGB".to_string(),
            other => other.as_str().to_string(),
        };
        options.in_colorspace = Some(source);
        options.out_colorspace = Some("linear".to_string());
    }

    options
}
