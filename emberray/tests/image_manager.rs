//! End-to-end image manager scenarios against mock collaborators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use half::f16;
use tempfile::TempDir;

use emberray::builtin::{BuiltinCallbacks, BuiltinInfo, BuiltinKey};
use emberray::colorspace::Colorspace;
use emberray::device::{Device, DeviceError, DeviceInfo, DeviceTexture, GridKind};
use emberray::io::{
    ChannelFormat, ImageIo, ImageReader, ImageSpec, ImageWriter, IoError, OpenConfig,
};
use emberray::pixel::{PixelKind, Texel, TexelSliceMut};
use emberray::progress::{NoProgress, Progress};
use emberray::stats::TextureStats;
use emberray::texture::{
    AddImageParams, AlphaMode, ImageIdentity, ImageManager, TextureParams, TextureSystem,
};
use emberray::volume::{SparsePlan, VolumeError, VolumeReader};

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// ImageIo serving one canned image, counting decoder opens.
struct MockIo {
    spec: ImageSpec,
    format_name: &'static str,
    pixels: Vec<f32>,
    opens: AtomicUsize,
}

impl MockIo {
    fn new(spec: ImageSpec, format_name: &'static str, pixels: Vec<f32>) -> MockIo {
        MockIo {
            spec,
            format_name,
            pixels,
            opens: AtomicUsize::new(0),
        }
    }

    fn rgba_u8(width: usize, height: usize, pixels: Vec<f32>) -> MockIo {
        MockIo::new(
            ImageSpec {
                width,
                height,
                depth: 1,
                channels: 4,
                format: ChannelFormat::U8,
                ..ImageSpec::default()
            },
            "png",
            pixels,
        )
    }

    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ImageIo for MockIo {
    fn open(&self, _path: &Path, _config: OpenConfig) -> Result<Box<dyn ImageReader>, IoError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockReader {
            spec: self.spec.clone(),
            format_name: self.format_name,
            pixels: self.pixels.clone(),
        }))
    }

    fn create_writer(&self, path: &Path) -> Result<Box<dyn ImageWriter>, IoError> {
        Err(IoError::Write {
            path: path.to_path_buf(),
            message: "not supported".to_string(),
        })
    }
}

struct MockReader {
    spec: ImageSpec,
    format_name: &'static str,
    pixels: Vec<f32>,
}

impl ImageReader for MockReader {
    fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    fn format_name(&self) -> &str {
        self.format_name
    }

    fn read_pixels(&mut self, out: TexelSliceMut<'_>) -> Result<(), IoError> {
        fill_from_f32(out, &self.pixels);
        Ok(())
    }
}

fn fill_from_f32(out: TexelSliceMut<'_>, src: &[f32]) {
    match out {
        TexelSliceMut::F32(buf) => {
            for (dst, value) in buf.iter_mut().zip(src) {
                *dst = *value;
            }
        }
        TexelSliceMut::F16(buf) => {
            for (dst, value) in buf.iter_mut().zip(src) {
                *dst = f16::from_f32(*value);
            }
        }
        TexelSliceMut::U8(buf) => {
            for (dst, value) in buf.iter_mut().zip(src) {
                *dst = <u8 as Texel>::from_f32(*value);
            }
        }
        TexelSliceMut::U16(buf) => {
            for (dst, value) in buf.iter_mut().zip(src) {
                *dst = <u16 as Texel>::from_f32(*value);
            }
        }
    }
}

/// Device recording uploads and frees by buffer name.
struct MockDevice {
    info: DeviceInfo,
    uploads: Mutex<Vec<String>>,
    frees: Mutex<Vec<String>>,
}

impl MockDevice {
    fn cpu() -> MockDevice {
        MockDevice::with_info(DeviceInfo::cpu())
    }

    fn with_info(info: DeviceInfo) -> MockDevice {
        MockDevice {
            info,
            uploads: Mutex::new(Vec::new()),
            frees: Mutex::new(Vec::new()),
        }
    }

    fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

impl Device for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn copy_to_device(&self, texture: &DeviceTexture) -> Result<(), DeviceError> {
        self.uploads.lock().unwrap().push(texture.name.clone());
        Ok(())
    }

    fn free_texture(&self, texture: &DeviceTexture) {
        self.frees.lock().unwrap().push(texture.name.clone());
    }
}

fn touch(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"stub").unwrap();
    path
}

fn manager_with_io(io: Arc<MockIo>) -> ImageManager {
    ImageManager::new(&DeviceInfo::cpu()).with_image_io(io)
}

fn raw_identity(path: &Path) -> ImageIdentity {
    // Raw keeps the probe from touching storage kinds.
    ImageIdentity::file(path).with_colorspace(Colorspace::Raw)
}

// ---------------------------------------------------------------------------
// Deduplication and lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_dedup_same_identity_shares_slot() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io.clone());
    let device = MockDevice::cpu();

    let (h1, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    let (h2, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();

    assert_eq!(h1, h2);
    assert_eq!(manager.record(h1).unwrap().users(), 2);
    assert_eq!(manager.total_records(), 1);

    let probe_opens = io.open_count();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    // One decoder open for the single shared load.
    assert_eq!(io.open_count() - probe_opens, 1);
    assert_eq!(device.upload_count(), 1);
}

#[test]
fn test_different_options_get_different_slots() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);

    let (h1, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    let (h2, _) = manager
        .add_image(
            raw_identity(&path).with_alpha(AlphaMode::Ignore),
            AddImageParams::default(),
        )
        .unwrap();

    assert_ne!(h1, h2);
    assert_eq!(manager.total_records(), 2);
}

#[test]
fn test_remove_defers_free_to_device_update() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    assert!(manager.image_memory(handle).is_some());

    manager.remove_image(handle);
    // Still resident until the next update.
    assert!(manager.image_memory(handle).is_some());

    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    assert!(manager.record(handle).is_none());
    assert_eq!(manager.total_records(), 0);
    assert_eq!(device.frees.lock().unwrap().len(), 1);
}

#[test]
fn test_add_remove_add_keeps_record() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.remove_image(handle);
    let (again, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();

    assert_eq!(handle, again);
    assert_eq!(manager.record(handle).unwrap().users(), 1);
}

#[test]
fn test_remove_by_identity_and_user_counting() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.add_image_user(handle);
    assert_eq!(manager.record(handle).unwrap().users(), 2);

    manager.remove_image_by_identity(&raw_identity(&path));
    assert_eq!(manager.record(handle).unwrap().users(), 1);
}

#[test]
fn test_cap_boundary() {
    let dir = TempDir::new().unwrap();
    let io = Arc::new(MockIo::rgba_u8(1, 1, vec![0.5; 4]));
    let mut manager = manager_with_io(io).with_max_images(2);

    for i in 0..2 {
        let path = touch(&dir, &format!("img{i}.png"));
        manager
            .add_image(raw_identity(&path), AddImageParams::default())
            .unwrap();
    }
    assert_eq!(manager.total_records(), 2);

    let path = touch(&dir, "one_too_many.png");
    assert!(manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .is_err());
}

#[test]
fn test_device_update_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io.clone());
    let device = MockDevice::cpu();

    manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    let opens = io.open_count();
    let uploads = device.upload_count();

    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    assert_eq!(io.open_count(), opens);
    assert_eq!(device.upload_count(), uploads);
}

#[test]
fn test_animation_frame_change_triggers_reload() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "seq.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io.clone());
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::animated(1.0))
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    assert!(manager.set_animation_frame_update(2.0));
    // Same frame again: no work signalled.
    assert!(!manager.set_animation_frame_update(2.0));

    // The renderer re-adds the reference with the new frame.
    let (again, _) = manager
        .add_image(raw_identity(&path), AddImageParams::animated(2.0))
        .unwrap();
    assert_eq!(handle, again);
    assert!(manager.record(handle).unwrap().need_load());

    let opens = io.open_count();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    assert_eq!(io.open_count() - opens, 1);
    assert!(!manager.record(handle).unwrap().need_load());
}

#[test]
fn test_tag_reload_marks_record() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    assert!(!manager.record(handle).unwrap().need_load());

    manager.tag_reload(&raw_identity(&path));
    assert!(manager.record(handle).unwrap().need_load());
    assert!(manager.need_update());
}

// ---------------------------------------------------------------------------
// Pixel pipeline behavior
// ---------------------------------------------------------------------------

#[test]
fn test_scanlines_are_flipped_bottom_up() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "rows.png");
    // 1x2: file row 0 has R=0, row 1 has R=1.
    let pixels = vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
    let io = Arc::new(MockIo::rgba_u8(1, 2, pixels));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    let memory = manager.image_memory(handle).unwrap();
    // Buffer row 0 now holds the file's bottom row.
    assert_eq!(memory.data.get_f32(0), Some(1.0));
    assert_eq!(memory.data.get_f32(4), Some(0.0));
}

#[test]
fn test_alpha_ignore_forces_opaque() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "translucent.png");
    let io = Arc::new(MockIo::rgba_u8(1, 1, vec![0.2, 0.4, 0.6, 0.5]));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let identity = raw_identity(&path).with_alpha(AlphaMode::Ignore);
    let (handle, metadata) = manager
        .add_image(identity, AddImageParams::default())
        .unwrap();
    assert_eq!(metadata.kind, PixelKind::U8x4);

    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    let memory = manager.image_memory(handle).unwrap();
    assert_eq!(memory.data.get_f32(3), Some(1.0));
}

#[test]
fn test_gray_alpha_expands_to_rgba() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "la.png");
    let io = Arc::new(MockIo::new(
        ImageSpec {
            width: 1,
            height: 1,
            depth: 1,
            channels: 2,
            format: ChannelFormat::U8,
            ..ImageSpec::default()
        },
        "png",
        vec![0.4, 0.8],
    ));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    let memory = manager.image_memory(handle).unwrap();
    let px: Vec<f32> = (0..4).map(|i| memory.data.get_f32(i).unwrap()).collect();
    assert!((px[0] - 0.4).abs() < 0.01);
    assert!((px[1] - 0.4).abs() < 0.01);
    assert!((px[2] - 0.4).abs() < 0.01);
    assert!((px[3] - 0.8).abs() < 0.01);
}

#[test]
fn test_cmyk_jpeg_decodes_to_rgba() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "print.jpg");
    // C=M=Y=0, K=0.5 -> RGB 0.5, opaque.
    let io = Arc::new(MockIo::new(
        ImageSpec {
            width: 1,
            height: 1,
            depth: 1,
            channels: 4,
            format: ChannelFormat::U8,
            ..ImageSpec::default()
        },
        "jpeg",
        vec![0.0, 0.0, 0.0, 0.5],
    ));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    let memory = manager.image_memory(handle).unwrap();
    for channel in 0..3 {
        let value = memory.data.get_f32(channel).unwrap();
        assert!((value - 0.5).abs() < 0.01, "channel {channel} = {value}");
    }
    assert_eq!(memory.data.get_f32(3), Some(1.0));
}

#[test]
fn test_nonfinite_float_pixels_zeroed() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "hdr.exr");
    let io = Arc::new(MockIo::new(
        ImageSpec {
            width: 2,
            height: 1,
            depth: 1,
            channels: 4,
            format: ChannelFormat::F32,
            ..ImageSpec::default()
        },
        "exr",
        vec![f32::NAN, 0.5, 0.5, 1.0, 0.25, 0.25, 0.25, 1.0],
    ));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, metadata) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    assert_eq!(metadata.kind, PixelKind::F32x4);

    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    let memory = manager.image_memory(handle).unwrap();
    for channel in 0..4 {
        assert_eq!(memory.data.get_f32(channel), Some(0.0));
    }
    assert_eq!(memory.data.get_f32(4), Some(0.25));
}

#[test]
fn test_texture_limit_downscales() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "big.png");
    let io = Arc::new(MockIo::rgba_u8(16, 16, vec![0.5; 16 * 16 * 4]));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    let params = TextureParams {
        texture_limit: 4,
        ..TextureParams::default()
    };
    manager.device_update(&device, &params, &NoProgress);

    let memory = manager.image_memory(handle).unwrap();
    assert_eq!((memory.width, memory.height), (4, 4));
    assert_eq!(memory.dense_width, 4);
    // Largest dimension within (limit/2, limit].
    assert!(memory.width > 2 && memory.width <= 4);
}

#[test]
fn test_missing_file_gets_magenta_placeholder() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "fleeting.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    // The file vanishes between add and update.
    std::fs::remove_file(&path).unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    let record = manager.record(handle).unwrap();
    assert!(!record.need_load());
    assert!(record.last_error().is_some());

    let memory = record.memory().unwrap();
    assert_eq!((memory.width, memory.height, memory.depth), (1, 1, 1));
    assert_eq!(memory.data.get_f32(0), Some(1.0));
    assert_eq!(memory.data.get_f32(1), Some(0.0));
    assert_eq!(memory.data.get_f32(2), Some(1.0));
    assert_eq!(memory.data.get_f32(3), Some(1.0));
}

#[test]
fn test_probe_failure_reports_error() {
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);
    let result = manager.add_image(
        raw_identity(Path::new("/no/such/file.png")),
        AddImageParams::default(),
    );
    assert!(result.is_err());
    assert_eq!(manager.total_records(), 0);
}

// ---------------------------------------------------------------------------
// Half support and cancellation
// ---------------------------------------------------------------------------

#[test]
fn test_half_downgraded_without_device_support() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.exr");
    let io = Arc::new(MockIo::new(
        ImageSpec {
            width: 1,
            height: 1,
            depth: 1,
            channels: 4,
            format: ChannelFormat::F16,
            ..ImageSpec::default()
        },
        "exr",
        vec![0.5; 4],
    ));

    let info = DeviceInfo {
        has_half_images: false,
        ..DeviceInfo::cpu()
    };
    let mut manager = ImageManager::new(&info).with_image_io(io);
    let (handle, metadata) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    assert_eq!(metadata.kind, PixelKind::F32x4);
    assert_eq!(handle.decode().unwrap().0, PixelKind::F32x4);
}

#[test]
fn test_cancellation_leaves_record_dirty() {
    struct Cancelled;
    impl Progress for Cancelled {
        fn cancelled(&self) -> bool {
            true
        }
    }

    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io.clone());
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    let probe_opens = io.open_count();
    manager.device_update(&device, &TextureParams::default(), &Cancelled);

    let record = manager.record(handle).unwrap();
    assert!(record.need_load());
    assert!(record.memory().is_none());
    assert_eq!(io.open_count(), probe_opens);
    assert_eq!(device.upload_count(), 0);
}

// ---------------------------------------------------------------------------
// Volumes
// ---------------------------------------------------------------------------

#[test]
fn test_volume_grid_sparse_encoded() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "smoke.raw");
    let dim = 16;
    let mut voxels = vec![0.0f32; dim * dim * dim];
    voxels[0] = 1.0;
    let io = Arc::new(MockIo::new(
        ImageSpec {
            width: dim,
            height: dim,
            depth: dim,
            channels: 1,
            format: ChannelFormat::F32,
            ..ImageSpec::default()
        },
        "raw",
        voxels,
    ));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, metadata) = manager
        .add_image(raw_identity(&path), AddImageParams::volume(0.5))
        .unwrap();
    assert_eq!(metadata.kind, PixelKind::F32);

    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    let memory = manager.image_memory(handle).unwrap();
    assert_eq!(memory.grid_kind, GridKind::Sparse);
    assert_eq!((memory.dense_width, memory.dense_height, memory.dense_depth), (16, 16, 16));
    // One active 8^3 tile laid out flat.
    assert_eq!((memory.width, memory.height, memory.depth), (512, 1, 1));
    let info = memory.grid_info.as_ref().unwrap();
    assert_eq!(info.offsets.len(), 8);
    assert_eq!(info.offsets[0], 0);
    assert!(info.name.ends_with("_info"));
}

#[test]
fn test_volume_below_isovalue_stays_dense() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "thin.raw");
    let dim = 16;
    let io = Arc::new(MockIo::new(
        ImageSpec {
            width: dim,
            height: dim,
            depth: dim,
            channels: 1,
            format: ChannelFormat::F32,
            ..ImageSpec::default()
        },
        "raw",
        vec![0.01f32; dim * dim * dim],
    ));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::volume(0.5))
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    let memory = manager.image_memory(handle).unwrap();
    assert_eq!(memory.grid_kind, GridKind::Dense);
    assert!(memory.grid_info.is_none());
    assert_eq!((memory.width, memory.height, memory.depth), (16, 16, 16));
}

struct MockVolume {
    voxels: Vec<f32>,
    dim: usize,
}

impl VolumeReader for MockVolume {
    fn has_grid(&self, _path: &Path, grid: &str) -> bool {
        grid == "density"
    }

    fn resolution(&self, _path: &Path) -> Option<[usize; 3]> {
        Some([self.dim, self.dim, self.dim])
    }

    fn load_preprocess(
        &self,
        _path: &Path,
        _grid: &str,
        _isovalue: f32,
        _padded: bool,
    ) -> Result<SparsePlan, VolumeError> {
        Ok(SparsePlan::dense())
    }

    fn load_pixels(
        &self,
        _path: &Path,
        _grid: &str,
        _plan: &SparsePlan,
        _padded: bool,
        out: &mut [f32],
    ) -> Result<(), VolumeError> {
        out.copy_from_slice(&self.voxels);
        Ok(())
    }
}

#[test]
fn test_external_volume_file_uses_volume_reader() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "cloud.vdb");
    let dim = 4;
    let io = Arc::new(MockIo::rgba_u8(1, 1, vec![0.0; 4]));
    let volume = Arc::new(MockVolume {
        voxels: vec![0.75; dim * dim * dim],
        dim,
    });
    let mut manager = manager_with_io(io.clone()).with_volume_reader(volume);
    let device = MockDevice::cpu();

    let identity = raw_identity(&path).with_grid("density");
    let (handle, metadata) = manager
        .add_image(identity, AddImageParams::volume(0.1))
        .unwrap();
    assert_eq!(metadata.kind, PixelKind::F32);
    assert_eq!((metadata.width, metadata.height, metadata.depth), (4, 4, 4));

    let probe_opens = io.open_count();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    // The image decoder is never consulted for volume files.
    assert_eq!(io.open_count(), probe_opens);

    let memory = manager.image_memory(handle).unwrap();
    assert_eq!(memory.grid_kind, GridKind::Dense);
    assert_eq!(memory.data.get_f32(0), Some(0.75));
}

#[test]
fn test_missing_grid_rejected_at_add() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "cloud.vdb");
    let io = Arc::new(MockIo::rgba_u8(1, 1, vec![0.0; 4]));
    let volume = Arc::new(MockVolume {
        voxels: Vec::new(),
        dim: 0,
    });
    let mut manager = manager_with_io(io).with_volume_reader(volume);

    let identity = raw_identity(&path).with_grid("temperature");
    assert!(manager
        .add_image(identity, AddImageParams::volume(0.1))
        .is_err());
}

// ---------------------------------------------------------------------------
// Builtin images
// ---------------------------------------------------------------------------

struct MockBuiltin {
    freed: AtomicBool,
}

impl BuiltinCallbacks for MockBuiltin {
    fn info(&self, _name: &str, _key: BuiltinKey) -> Option<BuiltinInfo> {
        Some(BuiltinInfo {
            width: 2,
            height: 1,
            depth: 1,
            channels: 1,
            is_float: true,
            free_cache: true,
        })
    }

    fn pixels_u8(
        &self,
        _name: &str,
        _key: BuiltinKey,
        _out: &mut [u8],
        _associate_alpha: bool,
        _free_cache: bool,
    ) -> bool {
        false
    }

    fn pixels_f32(
        &self,
        _name: &str,
        _key: BuiltinKey,
        out: &mut [f32],
        _associate_alpha: bool,
        free_cache: bool,
    ) -> bool {
        out.fill(0.625);
        if free_cache {
            self.freed.store(true, Ordering::SeqCst);
        }
        true
    }
}

#[test]
fn test_builtin_image_loads_through_callbacks() {
    let io = Arc::new(MockIo::rgba_u8(1, 1, vec![0.0; 4]));
    let callbacks = Arc::new(MockBuiltin {
        freed: AtomicBool::new(false),
    });
    let mut manager = manager_with_io(io).with_builtin_callbacks(callbacks.clone());
    let device = MockDevice::cpu();

    let identity = ImageIdentity::builtin("generated", BuiltinKey(11))
        .with_colorspace(Colorspace::Raw);
    let (handle, metadata) = manager
        .add_image(identity, AddImageParams::default())
        .unwrap();
    assert_eq!(metadata.kind, PixelKind::F32);

    manager.device_load_builtin(&device, &TextureParams::default(), &NoProgress);
    let memory = manager.image_memory(handle).unwrap();
    assert_eq!(memory.data.get_f32(0), Some(0.625));
    assert!(callbacks.freed.load(Ordering::SeqCst));

    manager.device_free_builtin(&device);
    assert!(manager.record(handle).is_none());
}

// ---------------------------------------------------------------------------
// External texture system path
// ---------------------------------------------------------------------------

struct MockTextureSystem;

impl TextureSystem for MockTextureSystem {
    fn texture_handle(&self, _path: &Path) -> Option<u64> {
        Some(7)
    }
}

#[test]
fn test_texture_system_bypasses_pipeline() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io.clone()).with_texture_system(Arc::new(MockTextureSystem));
    let device = MockDevice::cpu();

    let (handle, _) = manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    let probe_opens = io.open_count();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    // No decode, no device buffer; the slot lives in the parallel table.
    assert_eq!(io.open_count(), probe_opens);
    assert_eq!(device.upload_count(), 0);
    assert!(manager.image_memory(handle).is_none());
    assert!(!manager.record(handle).unwrap().need_load());

    let slot = manager.texture_system_slot(handle).unwrap();
    assert_eq!(slot.handle, Some(7));
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[test]
fn test_collect_statistics_reports_sizes() {
    let dir = TempDir::new().unwrap();
    let path = touch(&dir, "a.png");
    let io = Arc::new(MockIo::rgba_u8(2, 2, vec![0.5; 16]));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    manager
        .add_image(raw_identity(&path), AddImageParams::default())
        .unwrap();
    manager.device_update(&device, &TextureParams::default(), &NoProgress);

    let mut stats = TextureStats::new();
    manager.collect_statistics(&mut stats);
    assert_eq!(stats.entries().len(), 1);
    assert_eq!(stats.entries()[0].name, "a.png");
    assert_eq!(stats.entries()[0].size, 2 * 2 * 4);
}

#[test]
fn test_device_free_clears_everything() {
    let dir = TempDir::new().unwrap();
    let io = Arc::new(MockIo::rgba_u8(1, 1, vec![0.5; 4]));
    let mut manager = manager_with_io(io);
    let device = MockDevice::cpu();

    for i in 0..3 {
        let path = touch(&dir, &format!("t{i}.png"));
        manager
            .add_image(raw_identity(&path), AddImageParams::default())
            .unwrap();
    }
    manager.device_update(&device, &TextureParams::default(), &NoProgress);
    assert_eq!(manager.total_records(), 3);

    manager.device_free(&device);
    assert_eq!(manager.total_records(), 0);
    assert_eq!(device.frees.lock().unwrap().len(), 3);
}
