//! External dense-grid volume reader interface.
//!
//! Volume files keep their grids in an external container format; the
//! manager only needs presence checks, the resolution, and a two-phase
//! sparse load (preprocess decides the layout, then pixels are produced in
//! that layout).

use std::path::Path;

use thiserror::Error;

/// File extension handled by the [`VolumeReader`] instead of the image
/// decoder.
pub const VOLUME_FILE_EXTENSION: &str = "vdb";

/// Standard grid names that carry vector-valued data and therefore load as
/// four channels.
pub fn grid_is_vector(grid_name: &str) -> bool {
    matches!(grid_name, "color" | "velocity")
}

/// True when a path should be routed to the volume reader.
pub fn is_volume_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(VOLUME_FILE_EXTENSION))
        .unwrap_or(false)
}

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("file '{path}' does not have grid '{grid}'")]
    GridMissing { path: String, grid: String },

    #[error("failed to read grid '{grid}' from '{path}': {message}")]
    Read {
        path: String,
        grid: String,
        message: String,
    },
}

/// Result of the sparse preprocess pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsePlan {
    /// Per-tile table: active-tile ordinal, or `-1` for inactive tiles.
    pub offsets: Vec<i32>,
    /// Total float count of the compact pixel stream, or `None` when sparse
    /// storage would not pay off and the grid loads dense.
    pub compact_len: Option<usize>,
}

impl SparsePlan {
    /// Plan describing a dense load.
    pub fn dense() -> SparsePlan {
        SparsePlan {
            offsets: Vec::new(),
            compact_len: None,
        }
    }
}

pub trait VolumeReader: Send + Sync {
    fn has_grid(&self, path: &Path, grid: &str) -> bool;

    /// Voxel resolution of the file's grids.
    fn resolution(&self, path: &Path) -> Option<[usize; 3]>;

    /// Scan the grid for tiles above `isovalue` and decide the layout.
    fn load_preprocess(
        &self,
        path: &Path,
        grid: &str,
        isovalue: f32,
        padded: bool,
    ) -> Result<SparsePlan, VolumeError>;

    /// Produce pixels in the layout the plan decided. `out` is sized to the
    /// compact length, or to the dense grid when the plan is dense.
    fn load_pixels(
        &self,
        path: &Path,
        grid: &str,
        plan: &SparsePlan,
        padded: bool,
        out: &mut [f32],
    ) -> Result<(), VolumeError>;
}
