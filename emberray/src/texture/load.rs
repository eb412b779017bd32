//! The generic load-decode-normalize pipeline.
//!
//! One instantiation per storage type turns a decoded file into a device
//! texture: read at the native channel count, expand into RGBA, resolve
//! alpha and colorspace, sanitize non-finite floats, downscale past the
//! texture limit, sparse-encode volumes, and upload. A failed load installs
//! a 1x1 magenta placeholder so the handle stays valid and the render keeps
//! producing frames.

use half::f16;
use thiserror::Error;
use tracing::{debug, warn};

use super::meta::check_path;
use super::mip_cache::{self, TextureSystemTable};
use super::{AlphaMode, ImageRecord, LoaderContext, TextureHandle, TextureParams};
use crate::device::{Device, DeviceError, DeviceTexture, GridInfoBuffer, GridKind};
use crate::io::{IoError, OpenConfig};
use crate::pixel::{resize_pixels, PixelData, PixelKind, StorageKind, Texel, TexelSliceMut};
use crate::progress::Progress;
use crate::sparse::{create_sparse_grid, create_sparse_grid_padded, PADDED_TILE};
use crate::volume::{is_volume_file, VolumeError};

/// Color of the placeholder installed on load failure: magenta, so a bad
/// texture is unmistakable in renders.
const MISSING_R: f32 = 1.0;
const MISSING_G: f32 = 0.0;
const MISSING_B: f32 = 1.0;
const MISSING_A: f32 = 1.0;

#[derive(Debug, Error)]
pub(crate) enum LoadError {
    #[error("image has a zero-sized dimension")]
    ZeroSize,

    #[error("unsupported channel count {0}")]
    BadChannels(usize),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("builtin image callbacks missing or failed")]
    Builtin,

    #[error("upload failed: {0}")]
    Upload(String),
}

impl From<IoError> for LoadError {
    fn from(err: IoError) -> Self {
        LoadError::Decode(err.to_string())
    }
}

impl From<VolumeError> for LoadError {
    fn from(err: VolumeError) -> Self {
        LoadError::Decode(err.to_string())
    }
}

impl From<DeviceError> for LoadError {
    fn from(err: DeviceError) -> Self {
        LoadError::Upload(err.to_string())
    }
}

impl LoaderContext {
    /// Load one dirty record. Cancellation leaves `need_load` set so the
    /// record is retried on the next update; any other outcome clears it.
    pub(crate) fn device_load_image(
        &self,
        device: &dyn Device,
        record: &mut ImageRecord,
        kind: PixelKind,
        slot: usize,
        params: &TextureParams,
        tx_table: &TextureSystemTable,
        progress: &dyn Progress,
    ) {
        if progress.cancelled() {
            return;
        }

        let flat = TextureHandle::encode(kind, slot);

        if let Some(system) = &self.texture_system {
            if record.identity.builtin.is_none() {
                mip_cache::device_load_texture_system(
                    system.as_ref(),
                    self.io.as_ref(),
                    tx_table,
                    record,
                    flat,
                    params,
                    progress,
                );
                return;
            }
        }

        progress.set_status(
            "Updating Images",
            &format!("Loading {}", record.identity.filename.display()),
        );

        record.mem_name = DeviceTexture::debug_name(kind, flat);

        // Free the previous texture in the slot; a fresh buffer is staged
        // for every attempt so no partial write is ever visible.
        if let Some(old) = record.mem.take() {
            let _guard = self.device_mutex.lock().unwrap();
            device.free_texture(&old);
        }

        let external_volume =
            record.identity.builtin.is_none() && is_volume_file(&record.identity.filename);

        let result = if external_volume {
            self.load_external_volume(device, record, kind)
        } else {
            match kind.storage() {
                StorageKind::F32 => self.load_image::<f32>(device, record, kind, params),
                StorageKind::U8 => self.load_image::<u8>(device, record, kind, params),
                StorageKind::F16 => self.load_image::<f16>(device, record, kind, params),
                StorageKind::U16 => self.load_image::<u16>(device, record, kind, params),
            }
        };

        match result {
            Ok(grid_kind) => {
                record.last_error = None;
                debug!(name = %record.mem_name, grid = ?grid_kind, "loaded image");
            }
            Err(error) => self.load_failed(device, record, kind, &error),
        }
        record.need_load = false;
    }

    fn load_image<S: Texel>(
        &self,
        device: &dyn Device,
        record: &mut ImageRecord,
        kind: PixelKind,
        params: &TextureParams,
    ) -> Result<GridKind, LoadError> {
        let metadata = record.metadata.clone();
        let width = metadata.width;
        let height = metadata.height;
        let depth = metadata.depth.max(1);

        if width == 0 || height == 0 {
            // Don't bother with empty images; no buffer is allocated.
            return Err(LoadError::ZeroSize);
        }
        if !(1..=4).contains(&metadata.channels) {
            return Err(LoadError::BadChannels(metadata.channels));
        }

        let is_rgba = kind.channels() == 4;
        let out_channels = kind.channels();
        let num_pixels = width * height * depth;
        let max_size = width.max(height).max(depth);
        let downscale = params.texture_limit > 0 && max_size > params.texture_limit;

        let associate = associate_alpha(record, self);

        let mut reader = None;
        let (components, cmyk) = if record.identity.builtin.is_some() {
            (metadata.channels, false)
        } else {
            check_path(&record.identity.filename)
                .map_err(|err| LoadError::Decode(err.to_string()))?;
            let opened = self.io.open(
                &record.identity.filename,
                OpenConfig {
                    unassociated_alpha: !associate,
                },
            )?;
            let components = opened.spec().channels;
            let cmyk = opened.format_name() == "jpeg" && components == 4;
            reader = Some(opened);
            (components, cmyk)
        };

        if components == 0 || (!is_rgba && components != 1) {
            return Err(LoadError::BadChannels(components));
        }

        let mut pixels: Vec<S> = vec![S::zero(); num_pixels * out_channels];

        if let Some(reader) = reader.as_mut() {
            if components > 4 {
                // Read wide-channel files into a strided temporary and
                // scatter the first four channels.
                let mut tmp = vec![S::zero(); num_pixels * components];
                reader.read_pixels(S::wrap_slice_mut(&mut tmp))?;
                if depth <= 1 {
                    flip_scanlines(&mut tmp, width, height, components);
                }
                for i in 0..num_pixels {
                    pixels[i * 4..i * 4 + 4].copy_from_slice(&tmp[i * components..i * components + 4]);
                }
            } else {
                let count = num_pixels * components;
                reader.read_pixels(S::wrap_slice_mut(&mut pixels[..count]))?;
                if depth <= 1 {
                    flip_scanlines(&mut pixels[..count], width, height, components);
                }
            }
        } else if let Some(key) = record.identity.builtin {
            let callbacks = self.builtin.as_ref().ok_or(LoadError::Builtin)?;
            let name = record.identity.filename.to_string_lossy();
            let count = num_pixels * components;
            let ok = match S::wrap_slice_mut(&mut pixels[..count]) {
                TexelSliceMut::F32(buf) => {
                    callbacks.pixels_f32(&name, key, buf, associate, metadata.builtin_free_cache)
                }
                TexelSliceMut::U8(buf) => {
                    callbacks.pixels_u8(&name, key, buf, associate, metadata.builtin_free_cache)
                }
                // Half and ushort builtin reads are not provided by hosts.
                _ => return Err(LoadError::Builtin),
            };
            if !ok {
                return Err(LoadError::Builtin);
            }
        }

        if is_rgba {
            let one = S::unit();

            // Expand to RGBA in place, back to front so sources are read
            // before their slots are overwritten.
            if cmyk {
                for i in (0..num_pixels).rev() {
                    let c = pixels[i * 4].to_f32();
                    let m = pixels[i * 4 + 1].to_f32();
                    let y = pixels[i * 4 + 2].to_f32();
                    let k = pixels[i * 4 + 3].to_f32();
                    pixels[i * 4] = S::from_f32((1.0 - c) * (1.0 - k));
                    pixels[i * 4 + 1] = S::from_f32((1.0 - m) * (1.0 - k));
                    pixels[i * 4 + 2] = S::from_f32((1.0 - y) * (1.0 - k));
                    pixels[i * 4 + 3] = one;
                }
            } else if components == 2 {
                for i in (0..num_pixels).rev() {
                    let luma = pixels[i * 2];
                    let alpha = pixels[i * 2 + 1];
                    pixels[i * 4 + 3] = alpha;
                    pixels[i * 4 + 2] = luma;
                    pixels[i * 4 + 1] = luma;
                    pixels[i * 4] = luma;
                }
            } else if components == 3 {
                for i in (0..num_pixels).rev() {
                    let b = pixels[i * 3 + 2];
                    let g = pixels[i * 3 + 1];
                    let r = pixels[i * 3];
                    pixels[i * 4 + 3] = one;
                    pixels[i * 4 + 2] = b;
                    pixels[i * 4 + 1] = g;
                    pixels[i * 4] = r;
                }
            } else if components == 1 {
                for i in (0..num_pixels).rev() {
                    let luma = pixels[i];
                    pixels[i * 4 + 3] = one;
                    pixels[i * 4 + 2] = luma;
                    pixels[i * 4 + 1] = luma;
                    pixels[i * 4] = luma;
                }
            }

            if record.identity.alpha == AlphaMode::Ignore {
                for i in 0..num_pixels {
                    pixels[i * 4 + 3] = one;
                }
            }

            if !metadata.colorspace.is_raw() && !metadata.colorspace.is_srgb() {
                self.colorspace.to_scene_linear(
                    &metadata.colorspace,
                    S::wrap_slice_mut(&mut pixels),
                    width,
                    height,
                    depth,
                    metadata.compress_as_srgb,
                );
            }
        }

        if S::CHECK_FINITE {
            if is_rgba {
                // Zero all four channels together; a single surviving
                // channel would shift the hue.
                for pixel in pixels.chunks_exact_mut(4) {
                    if pixel.iter().any(|v| !v.is_finite_value()) {
                        pixel.fill(S::zero());
                    }
                }
            } else {
                for value in pixels.iter_mut() {
                    if !value.is_finite_value() {
                        *value = S::zero();
                    }
                }
            }
        }

        let (mut pixels, width, height, depth) = if downscale {
            let mut scale = 1.0f32;
            while (max_size as f32) * scale > params.texture_limit as f32 {
                scale *= 0.5;
            }
            debug!(
                filename = %record.identity.filename.display(),
                scale,
                "scaling oversized image"
            );
            resize_pixels(&pixels, width, height, depth, out_channels, scale)
        } else {
            (pixels, width, height, depth)
        };

        let mut grid_kind = GridKind::Dense;
        let mut offsets = None;
        let (mut store_w, mut store_h, mut store_d) = (width, height, depth);
        if record.is_volume {
            if device.info().supports_padded_tiles {
                if let Some(sparse) = create_sparse_grid_padded(
                    &pixels,
                    width,
                    height,
                    depth,
                    out_channels,
                    record.isovalue,
                ) {
                    store_w = sparse.active_tiles * PADDED_TILE;
                    store_h = PADDED_TILE;
                    store_d = PADDED_TILE;
                    offsets = Some(sparse.offsets);
                    pixels = sparse.pixels;
                    grid_kind = GridKind::SparsePadded;
                }
            } else if let Some(sparse) =
                create_sparse_grid(&pixels, width, height, depth, out_channels, record.isovalue)
            {
                store_w = sparse.pixels.len() / out_channels;
                store_h = 1;
                store_d = 1;
                offsets = Some(sparse.offsets);
                pixels = sparse.pixels;
                grid_kind = GridKind::Sparse;
            }
        }

        let mut texture = DeviceTexture::from_pixels(
            record.mem_name.clone(),
            kind,
            S::into_pixel_data(pixels),
            store_w,
            store_h,
            store_d,
        );
        texture.dense_width = width;
        texture.dense_height = height;
        texture.dense_depth = depth;
        texture.interpolation = record.identity.interpolation;
        texture.extension = record.identity.extension;
        texture.grid_kind = grid_kind;
        if let Some(offsets) = offsets {
            texture.grid_info = Some(GridInfoBuffer {
                name: texture.grid_info_name(),
                offsets,
            });
        }

        {
            let _guard = self.device_mutex.lock().unwrap();
            device.copy_to_device(&texture)?;
        }
        record.mem = Some(texture);

        Ok(grid_kind)
    }

    /// Load a grid straight from the external volume container; the reader
    /// performs the sparse preprocessing itself.
    fn load_external_volume(
        &self,
        device: &dyn Device,
        record: &mut ImageRecord,
        kind: PixelKind,
    ) -> Result<GridKind, LoadError> {
        let reader = self
            .volume
            .as_ref()
            .ok_or_else(|| LoadError::Decode("no volume reader registered".to_string()))?;
        let path = record.identity.filename.clone();
        let grid = record.identity.grid_name.clone();

        debug!(path = %path.display(), grid = %grid, "loading external volume grid");

        check_path(&path).map_err(|err| LoadError::Decode(err.to_string()))?;
        if !reader.has_grid(&path, &grid) {
            return Err(LoadError::Decode(format!("missing grid '{grid}'")));
        }

        let padded = device.info().supports_padded_tiles;
        let plan = reader.load_preprocess(&path, &grid, record.isovalue, padded)?;

        let channels = kind.channels();
        let metadata = &record.metadata;
        let (grid_kind, width, height, depth) = match plan.compact_len {
            Some(len) if padded => (
                GridKind::SparsePadded,
                len / (PADDED_TILE * PADDED_TILE * channels),
                PADDED_TILE,
                PADDED_TILE,
            ),
            Some(len) => (GridKind::Sparse, len / channels, 1, 1),
            None => (
                GridKind::Dense,
                metadata.width,
                metadata.height,
                metadata.depth,
            ),
        };
        if width == 0 || height == 0 || depth == 0 {
            return Err(LoadError::ZeroSize);
        }

        let mut out = vec![0.0f32; width * height * depth * channels];
        reader.load_pixels(&path, &grid, &plan, padded, &mut out)?;

        let mut texture = DeviceTexture::from_pixels(
            record.mem_name.clone(),
            kind,
            PixelData::F32(out),
            width,
            height,
            depth,
        );
        texture.dense_width = metadata.width;
        texture.dense_height = metadata.height;
        texture.dense_depth = metadata.depth;
        texture.interpolation = record.identity.interpolation;
        texture.extension = record.identity.extension;
        texture.grid_kind = grid_kind;
        if grid_kind != GridKind::Dense {
            texture.grid_info = Some(GridInfoBuffer {
                name: texture.grid_info_name(),
                offsets: plan.offsets,
            });
        }

        {
            let _guard = self.device_mutex.lock().unwrap();
            device.copy_to_device(&texture)?;
        }
        record.mem = Some(texture);

        Ok(grid_kind)
    }

    /// Install the 1x1 magenta placeholder and keep the handle valid.
    fn load_failed(
        &self,
        device: &dyn Device,
        record: &mut ImageRecord,
        kind: PixelKind,
        error: &LoadError,
    ) {
        warn!(
            filename = %record.identity.filename.display(),
            name = %record.mem_name,
            %error,
            "failed to load image, installing placeholder"
        );
        record.last_error = Some(error.to_string());

        let data = match kind.storage() {
            StorageKind::F32 => placeholder_pixels::<f32>(kind),
            StorageKind::U8 => placeholder_pixels::<u8>(kind),
            StorageKind::F16 => placeholder_pixels::<f16>(kind),
            StorageKind::U16 => placeholder_pixels::<u16>(kind),
        };
        let mut texture =
            DeviceTexture::from_pixels(record.mem_name.clone(), kind, data, 1, 1, 1);
        texture.interpolation = record.identity.interpolation;
        texture.extension = record.identity.extension;

        {
            let _guard = self.device_mutex.lock().unwrap();
            if let Err(upload) = device.copy_to_device(&texture) {
                warn!(name = %record.mem_name, error = %upload, "placeholder upload failed");
            }
        }
        record.mem = Some(texture);
    }
}

fn placeholder_pixels<S: Texel>(kind: PixelKind) -> PixelData {
    if kind.channels() == 4 {
        S::into_pixel_data(vec![
            S::from_f32(MISSING_R),
            S::from_f32(MISSING_G),
            S::from_f32(MISSING_B),
            S::from_f32(MISSING_A),
        ])
    } else {
        S::into_pixel_data(vec![S::from_f32(MISSING_R)])
    }
}

/// Whether the decoder should associate alpha for this record. Data
/// colorspaces and packed or ignored alpha stay untouched.
fn associate_alpha(record: &ImageRecord, context: &LoaderContext) -> bool {
    !(context.colorspace.is_data(&record.identity.colorspace)
        || record.identity.alpha == AlphaMode::Ignore
        || record.identity.alpha == AlphaMode::ChannelPacked)
}

/// Reverse scanline order so row 0 ends up at the bottom, the origin the
/// kernels expect for 2D images.
fn flip_scanlines<S: Copy>(pixels: &mut [S], width: usize, height: usize, channels: usize) {
    let row = width * channels;
    for y in 0..height / 2 {
        let top = y * row;
        let bottom = (height - 1 - y) * row;
        for x in 0..row {
            pixels.swap(top + x, bottom + x);
        }
    }
}
