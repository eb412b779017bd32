//! The texture image manager.
//!
//! Scenes declare image references; this module deduplicates them into
//! reference-counted slots, probes their metadata, and lazily loads pixel
//! data into numbered device texture slots during `device_update`. Slots are
//! grouped by pixel kind so the rendering kernels can index one texture
//! array per kind through a flat integer handle.
//!
//! Metadata-mutating calls (`add_image`, `remove_image`, `tag_reload`,
//! setters) must be serialized by the caller; `device_update` fans loader
//! tasks out over a worker pool and serializes all device access under one
//! mutex.

mod load;
mod meta;
mod mip_cache;
mod slots;
mod types;

pub use meta::{ImageMetaData, ProbeError};
pub use mip_cache::{TextureSystem, TextureSystemSlot};
pub use slots::{
    TextureHandle, IMAGE_DATA_TYPE_MASK, IMAGE_DATA_TYPE_SHIFT, TEX_NUM_MAX,
};
pub use types::{AddImageParams, AlphaMode, ImageIdentity, TextureParams};

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::builtin::BuiltinCallbacks;
use crate::colorspace::{ColorSpaceConverter, SrgbColorSpace};
use crate::device::{Device, DeviceInfo, DeviceTexture};
use crate::io::{CodecImageIo, ImageIo};
use crate::pixel::PixelKind;
use crate::pool::TaskPool;
use crate::progress::Progress;
use crate::stats::TextureStats;
use crate::volume::VolumeReader;

use mip_cache::TextureSystemTable;
use slots::SlotTable;

#[derive(Debug, Error)]
pub enum AddImageError {
    #[error("image limit ({0}) reached")]
    CapExceeded(usize),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// One cached image: identity, probed metadata, reference count, and the
/// device texture once loaded.
pub struct ImageRecord {
    pub(crate) identity: ImageIdentity,
    pub(crate) metadata: ImageMetaData,
    pub(crate) users: u32,
    pub(crate) need_load: bool,
    pub(crate) animated: bool,
    pub(crate) frame: f32,
    pub(crate) is_volume: bool,
    pub(crate) isovalue: f32,
    pub(crate) mem: Option<DeviceTexture>,
    pub(crate) mem_name: String,
    /// Reason the last load installed a placeholder, for diagnostics.
    pub(crate) last_error: Option<String>,
}

impl ImageRecord {
    pub fn identity(&self) -> &ImageIdentity {
        &self.identity
    }

    pub fn metadata(&self) -> &ImageMetaData {
        &self.metadata
    }

    pub fn users(&self) -> u32 {
        self.users
    }

    pub fn need_load(&self) -> bool {
        self.need_load
    }

    pub fn animated(&self) -> bool {
        self.animated
    }

    pub fn frame(&self) -> f32 {
        self.frame
    }

    pub fn memory(&self) -> Option<&DeviceTexture> {
        self.mem.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn file_name(&self) -> String {
        self.identity
            .filename
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.identity.filename.to_string_lossy().into_owned())
    }

    #[cfg(test)]
    pub(crate) fn for_tests(identity: ImageIdentity) -> ImageRecord {
        ImageRecord {
            identity,
            metadata: ImageMetaData::default(),
            users: 1,
            need_load: true,
            animated: false,
            frame: 0.0,
            is_volume: false,
            isovalue: 0.0,
            mem: None,
            mem_name: String::new(),
            last_error: None,
        }
    }
}

/// Collaborators shared by loader tasks.
pub(crate) struct LoaderContext {
    pub(crate) io: Arc<dyn ImageIo>,
    pub(crate) volume: Option<Arc<dyn VolumeReader>>,
    pub(crate) builtin: Option<Arc<dyn BuiltinCallbacks>>,
    pub(crate) colorspace: Arc<dyn ColorSpaceConverter>,
    pub(crate) texture_system: Option<Arc<dyn TextureSystem>>,
    /// Serializes device allocation, upload and free; device back-ends are
    /// not reentrant.
    pub(crate) device_mutex: Mutex<()>,
}

pub struct ImageManager {
    slots: SlotTable,
    loader: LoaderContext,
    tx_table: TextureSystemTable,
    need_update: bool,
    animation_frame: f32,
    max_images: usize,
    has_half_images: bool,
}

impl ImageManager {
    pub fn new(info: &DeviceInfo) -> ImageManager {
        ImageManager {
            slots: SlotTable::new(),
            loader: LoaderContext {
                io: Arc::new(CodecImageIo),
                volume: None,
                builtin: None,
                colorspace: Arc::new(SrgbColorSpace),
                texture_system: None,
                device_mutex: Mutex::new(()),
            },
            tx_table: TextureSystemTable::default(),
            need_update: true,
            animation_frame: 0.0,
            max_images: TEX_NUM_MAX,
            has_half_images: info.has_half_images,
        }
    }

    pub fn with_image_io(mut self, io: Arc<dyn ImageIo>) -> Self {
        self.loader.io = io;
        self
    }

    pub fn with_volume_reader(mut self, volume: Arc<dyn VolumeReader>) -> Self {
        self.loader.volume = Some(volume);
        self
    }

    pub fn with_builtin_callbacks(mut self, builtin: Arc<dyn BuiltinCallbacks>) -> Self {
        self.loader.builtin = Some(builtin);
        self
    }

    pub fn with_colorspace_converter(mut self, converter: Arc<dyn ColorSpaceConverter>) -> Self {
        self.loader.colorspace = converter;
        self
    }

    /// Route non-builtin records through an external mip-mapped texture
    /// cache instead of the pixel pipeline.
    pub fn with_texture_system(mut self, system: Arc<dyn TextureSystem>) -> Self {
        self.loader.texture_system = Some(system);
        self
    }

    /// Lower the record cap below [`TEX_NUM_MAX`].
    pub fn with_max_images(mut self, max: usize) -> Self {
        self.max_images = max.min(TEX_NUM_MAX);
        self
    }

    pub fn need_update(&self) -> bool {
        self.need_update
    }

    /// Register an image reference.
    ///
    /// A request matching an existing identity bumps that record's user
    /// count and returns the existing handle; frame or metadata changes on
    /// the way mark it for reload. A new identity takes a free slot in its
    /// pixel kind's table.
    pub fn add_image(
        &mut self,
        identity: ImageIdentity,
        params: AddImageParams,
    ) -> Result<(TextureHandle, ImageMetaData), AddImageError> {
        let mut metadata = meta::probe_metadata(
            self.loader.io.as_ref(),
            self.loader.volume.as_deref(),
            self.loader.builtin.as_deref(),
            self.loader.colorspace.as_ref(),
            &identity,
        )?;

        // No half textures on this device, use full float instead.
        if !self.has_half_images {
            metadata.kind = match metadata.kind {
                PixelKind::F16x4 => PixelKind::F32x4,
                PixelKind::F16 => PixelKind::F32,
                kind => kind,
            };
        }
        let kind = metadata.kind;

        if let Some(slot) = self.slots.find_identity_in(kind, &identity) {
            let record = self.slots.get_mut(kind, slot).expect("slot just found");
            if record.frame != params.frame {
                record.frame = params.frame;
                record.need_load = true;
            }
            if record.metadata != metadata {
                record.metadata = metadata;
                record.need_load = true;
            }
            record.users += 1;
            let metadata = record.metadata.clone();
            if record.need_load {
                self.need_update = true;
            }
            return Ok((TextureHandle::encode(kind, slot), metadata));
        }

        if self.slots.total_records() >= self.max_images {
            warn!(
                limit = self.max_images,
                filename = %identity.filename.display(),
                "image limit reached, skipping"
            );
            return Err(AddImageError::CapExceeded(self.max_images));
        }

        let slot = self.slots.free_slot(kind);
        self.slots.insert(
            kind,
            slot,
            Box::new(ImageRecord {
                identity,
                metadata: metadata.clone(),
                users: 1,
                need_load: true,
                animated: params.animated,
                frame: params.frame,
                is_volume: params.is_volume,
                isovalue: params.isovalue,
                mem: None,
                mem_name: String::new(),
                last_error: None,
            }),
        );
        self.need_update = true;

        Ok((TextureHandle::encode(kind, slot), metadata))
    }

    /// Add another user to a live record.
    pub fn add_image_user(&mut self, handle: TextureHandle) {
        let record = self.record_mut(handle).expect("stale texture handle");
        debug_assert!(record.users >= 1);
        record.users += 1;
    }

    /// Drop one user. The slot is only freed on the next `device_update`,
    /// so shader edits that remove and re-add the same image do not thrash
    /// reloads.
    pub fn remove_image(&mut self, handle: TextureHandle) {
        let record = self.record_mut(handle).expect("stale texture handle");
        debug_assert!(record.users >= 1);
        record.users -= 1;
        if record.users == 0 {
            self.need_update = true;
        }
    }

    /// Drop one user, located by identity.
    pub fn remove_image_by_identity(&mut self, identity: &ImageIdentity) {
        if let Some(handle) = self.slots.find_identity(identity) {
            self.remove_image(handle);
        }
    }

    /// Mark the record matching `identity` for reload on the next update.
    pub fn tag_reload(&mut self, identity: &ImageIdentity) {
        if let Some(handle) = self.slots.find_identity(identity) {
            let record = self.record_mut(handle).expect("handle just found");
            record.need_load = true;
            self.need_update = true;
        }
    }

    /// Store the new animation frame. Returns true when at least one live
    /// record is animated, telling the renderer a reload pass is warranted.
    pub fn set_animation_frame_update(&mut self, frame: f32) -> bool {
        if frame != self.animation_frame {
            self.animation_frame = frame;
            return self.slots.records().any(|(_, _, record)| record.animated);
        }
        false
    }

    pub fn get_image_metadata(&self, handle: TextureHandle) -> Option<ImageMetaData> {
        self.record(handle).map(|record| record.metadata.clone())
    }

    pub fn image_memory(&self, handle: TextureHandle) -> Option<&DeviceTexture> {
        self.record(handle).and_then(ImageRecord::memory)
    }

    pub fn record(&self, handle: TextureHandle) -> Option<&ImageRecord> {
        let (kind, slot) = handle.decode()?;
        self.slots.get(kind, slot)
    }

    fn record_mut(&mut self, handle: TextureHandle) -> Option<&mut ImageRecord> {
        let (kind, slot) = handle.decode()?;
        self.slots.get_mut(kind, slot)
    }

    /// Sampler state for a record served by the external texture system.
    pub fn texture_system_slot(&self, handle: TextureHandle) -> Option<TextureSystemSlot> {
        self.tx_table.get(handle)
    }

    /// Free unused records and (re)load dirty ones.
    ///
    /// Frees run first and serially; loads run on the worker pool, each
    /// task touching only its own record plus the device mutex.
    pub fn device_update(
        &mut self,
        device: &dyn Device,
        params: &TextureParams,
        progress: &dyn Progress,
    ) {
        if !self.need_update {
            return;
        }

        let to_free: Vec<(PixelKind, usize)> = self
            .slots
            .records()
            .filter(|(_, _, record)| record.users == 0)
            .map(|(kind, slot, _)| (kind, slot))
            .collect();
        for (kind, slot) in to_free {
            self.device_free_image(device, kind, slot);
        }

        let loader = &self.loader;
        let tx_table = &self.tx_table;
        let mut pool = TaskPool::new();
        for (kind, slot, record) in self.slots.records_mut() {
            if record.need_load {
                pool.push(move || {
                    loader.device_load_image(device, record, kind, slot, params, tx_table, progress)
                });
            }
        }
        pool.wait_work();

        self.need_update = false;
    }

    /// `device_update` scoped to a single record, run synchronously.
    pub fn device_update_slot(
        &mut self,
        device: &dyn Device,
        params: &TextureParams,
        handle: TextureHandle,
        progress: &dyn Progress,
    ) {
        let (kind, slot) = handle.decode().expect("stale texture handle");
        let users = match self.slots.get(kind, slot) {
            Some(record) => record.users,
            None => return,
        };

        if users == 0 {
            self.device_free_image(device, kind, slot);
        } else {
            let loader = &self.loader;
            let tx_table = &self.tx_table;
            let record = self.slots.get_mut(kind, slot).expect("record just seen");
            if record.need_load {
                loader.device_load_image(device, record, kind, slot, params, tx_table, progress);
            }
        }
    }

    /// Load only records with builtin pixel data; the host calls this
    /// before freeing its side of those buffers.
    pub fn device_load_builtin(
        &mut self,
        device: &dyn Device,
        params: &TextureParams,
        progress: &dyn Progress,
    ) {
        if !self.need_update {
            return;
        }

        let loader = &self.loader;
        let tx_table = &self.tx_table;
        let mut pool = TaskPool::new();
        for (kind, slot, record) in self.slots.records_mut() {
            if record.need_load && record.identity.builtin.is_some() {
                pool.push(move || {
                    loader.device_load_image(device, record, kind, slot, params, tx_table, progress)
                });
            }
        }
        pool.wait_work();
    }

    /// Free every record with builtin pixel data.
    pub fn device_free_builtin(&mut self, device: &dyn Device) {
        let to_free: Vec<(PixelKind, usize)> = self
            .slots
            .records()
            .filter(|(_, _, record)| record.identity.builtin.is_some())
            .map(|(kind, slot, _)| (kind, slot))
            .collect();
        for (kind, slot) in to_free {
            self.device_free_image(device, kind, slot);
        }
    }

    /// Free everything.
    pub fn device_free(&mut self, device: &dyn Device) {
        let to_free: Vec<(PixelKind, usize)> = self
            .slots
            .records()
            .map(|(kind, slot, _)| (kind, slot))
            .collect();
        for (kind, slot) in to_free {
            self.device_free_image(device, kind, slot);
        }
    }

    fn device_free_image(&mut self, device: &dyn Device, kind: PixelKind, slot: usize) {
        if let Some(record) = self.slots.remove(kind, slot) {
            debug!(name = %record.mem_name, "freeing image");
            if let Some(mem) = &record.mem {
                let _guard = self.loader.device_mutex.lock().unwrap();
                device.free_texture(mem);
            }
            self.tx_table.clear(TextureHandle::encode(kind, slot));
        }
    }

    /// Emit `(filename, memory_size)` for every live record.
    pub fn collect_statistics(&self, stats: &mut TextureStats) {
        for (_, _, record) in self.slots.records() {
            let size = record.mem.as_ref().map_or(0, DeviceTexture::memory_size);
            stats.add_entry(record.file_name(), size);
        }
    }

    /// Number of live records, for the `TEX_NUM_MAX` cap and tests.
    pub fn total_records(&self) -> usize {
        self.slots.total_records()
    }
}
