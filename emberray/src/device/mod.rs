//! Device back-end abstraction.
//!
//! The manager sees the device as an allocator and upload target for typed
//! texture buffers. Buffers are staged host-side in a [`DeviceTexture`];
//! `copy_to_device` pushes the staging contents across. All calls into a
//! [`Device`] are serialized by the manager's device mutex, so back-ends do
//! not need to be reentrant.

mod texture;

pub use texture::{DeviceTexture, Extension, GridInfoBuffer, GridKind, Interpolation};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Cpu,
    Cuda,
    OpenCl,
}

/// Capabilities the manager adapts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    /// Half-float texture sampling; without it `F16*` kinds are promoted to
    /// `F32*` at add time.
    pub has_half_images: bool,
    /// Per-tile trilinear sampling; required for the padded sparse layout.
    pub supports_padded_tiles: bool,
}

impl DeviceInfo {
    pub fn cpu() -> DeviceInfo {
        DeviceInfo {
            device_type: DeviceType::Cpu,
            has_half_images: true,
            supports_padded_tiles: false,
        }
    }

    pub fn cuda() -> DeviceInfo {
        DeviceInfo {
            device_type: DeviceType::Cuda,
            has_half_images: true,
            supports_padded_tiles: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfMemory,

    #[error("upload failed: {0}")]
    Upload(String),
}

pub trait Device: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Transfer the staged pixels (and the sparse companion table, when
    /// present) to the device.
    fn copy_to_device(&self, texture: &DeviceTexture) -> Result<(), DeviceError>;

    /// Release device-side storage for a texture that is going away.
    fn free_texture(&self, texture: &DeviceTexture) {
        let _ = texture;
    }
}
