//! Sparse tiled encoding of dense volume grids.
//!
//! A volume is partitioned into fixed-size tiles; tiles with no voxel above
//! the isovalue carry nothing worth sampling and are dropped. The encoder
//! emits the active tiles concatenated plus a per-tile table mapping tile
//! coordinates to the active ordinal (`-1` for dropped tiles), so a sampler
//! finds tile `t`'s voxels at `offsets[t] * tile_volume`.
//!
//! The padded variant stores each active tile as a `PADDED_TILE`-cubed block
//! with a one-voxel border replicated from neighboring voxels, for devices
//! whose samplers fetch trilinear taps within a single tile.

use crate::pixel::Texel;

/// Edge length of a sparse tile, in voxels.
pub const TILE_SIZE: usize = 8;

/// Edge length of a padded tile block: the tile plus a one-voxel border on
/// each side.
pub const PADDED_TILE: usize = TILE_SIZE + 2;

/// Result of a sparse encode: compacted voxels plus the tile table.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseGrid<S> {
    pub pixels: Vec<S>,
    /// Indexed by row-major tile coordinate; active ordinal or `-1`.
    pub offsets: Vec<i32>,
    pub active_tiles: usize,
}

fn tile_counts(width: usize, height: usize, depth: usize) -> (usize, usize, usize) {
    (
        width.div_ceil(TILE_SIZE),
        height.div_ceil(TILE_SIZE),
        depth.div_ceil(TILE_SIZE),
    )
}

/// First pass: mark tiles containing any voxel whose channel maximum
/// exceeds `isovalue`, assigning active ordinals in row-major tile order.
fn scan_active_tiles<S: Texel>(
    pixels: &[S],
    width: usize,
    height: usize,
    depth: usize,
    channels: usize,
    isovalue: f32,
) -> (Vec<i32>, usize) {
    let (tiles_x, tiles_y, tiles_z) = tile_counts(width, height, depth);
    let mut offsets = vec![-1i32; tiles_x * tiles_y * tiles_z];
    let mut active = 0usize;

    for tz in 0..tiles_z {
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let mut is_active = false;
                'tile: for z in tz * TILE_SIZE..((tz + 1) * TILE_SIZE).min(depth) {
                    for y in ty * TILE_SIZE..((ty + 1) * TILE_SIZE).min(height) {
                        for x in tx * TILE_SIZE..((tx + 1) * TILE_SIZE).min(width) {
                            let voxel = ((z * height + y) * width + x) * channels;
                            for c in 0..channels {
                                if pixels[voxel + c].to_f32() > isovalue {
                                    is_active = true;
                                    break 'tile;
                                }
                            }
                        }
                    }
                }
                if is_active {
                    offsets[(tz * tiles_y + ty) * tiles_x + tx] = active as i32;
                    active += 1;
                }
            }
        }
    }

    (offsets, active)
}

fn saves_memory<S>(
    active: usize,
    block_voxels: usize,
    num_tiles: usize,
    width: usize,
    height: usize,
    depth: usize,
    channels: usize,
) -> bool {
    let elem = std::mem::size_of::<S>();
    let compact = active * block_voxels * channels * elem;
    let info = num_tiles * std::mem::size_of::<i32>();
    let dense = width * height * depth * channels * elem;
    compact + info < dense
}

/// Encode the flat sparse layout: active tiles as full `TILE_SIZE`-cubed
/// blocks, boundary voxels clamp-replicated.
///
/// Returns `None` when no tile is active or the encoding would not shrink
/// the grid; the caller then stores the grid dense.
pub fn create_sparse_grid<S: Texel>(
    pixels: &[S],
    width: usize,
    height: usize,
    depth: usize,
    channels: usize,
    isovalue: f32,
) -> Option<SparseGrid<S>> {
    if width == 0 || height == 0 || depth == 0 {
        return None;
    }
    let (offsets, active) = scan_active_tiles(pixels, width, height, depth, channels, isovalue);
    if active == 0 {
        return None;
    }
    let tile_voxels = TILE_SIZE * TILE_SIZE * TILE_SIZE;
    if !saves_memory::<S>(active, tile_voxels, offsets.len(), width, height, depth, channels) {
        return None;
    }

    let (tiles_x, tiles_y, tiles_z) = tile_counts(width, height, depth);
    let mut out = Vec::with_capacity(active * tile_voxels * channels);

    for tz in 0..tiles_z {
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                if offsets[(tz * tiles_y + ty) * tiles_x + tx] < 0 {
                    continue;
                }
                for z in 0..TILE_SIZE {
                    let sz = (tz * TILE_SIZE + z).min(depth - 1);
                    for y in 0..TILE_SIZE {
                        let sy = (ty * TILE_SIZE + y).min(height - 1);
                        for x in 0..TILE_SIZE {
                            let sx = (tx * TILE_SIZE + x).min(width - 1);
                            let src = ((sz * height + sy) * width + sx) * channels;
                            out.extend_from_slice(&pixels[src..src + channels]);
                        }
                    }
                }
            }
        }
    }

    Some(SparseGrid {
        pixels: out,
        offsets,
        active_tiles: active,
    })
}

/// Encode the padded sparse layout for per-tile samplers.
///
/// The output is laid out as a 3D buffer of `active_tiles * PADDED_TILE` by
/// `PADDED_TILE` by `PADDED_TILE`, each block holding its source tile
/// centered with borders taken from neighboring voxels (clamped at the grid
/// edge).
pub fn create_sparse_grid_padded<S: Texel>(
    pixels: &[S],
    width: usize,
    height: usize,
    depth: usize,
    channels: usize,
    isovalue: f32,
) -> Option<SparseGrid<S>> {
    if width == 0 || height == 0 || depth == 0 {
        return None;
    }
    let (offsets, active) = scan_active_tiles(pixels, width, height, depth, channels, isovalue);
    if active == 0 {
        return None;
    }
    let block_voxels = PADDED_TILE * PADDED_TILE * PADDED_TILE;
    if !saves_memory::<S>(active, block_voxels, offsets.len(), width, height, depth, channels) {
        return None;
    }

    let (tiles_x, tiles_y, tiles_z) = tile_counts(width, height, depth);
    let row_width = active * PADDED_TILE;
    let mut out = vec![S::zero(); active * block_voxels * channels];

    for tz in 0..tiles_z {
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let ordinal = offsets[(tz * tiles_y + ty) * tiles_x + tx];
                if ordinal < 0 {
                    continue;
                }
                let block_x = ordinal as usize * PADDED_TILE;
                for z in 0..PADDED_TILE {
                    let sz = clamp_coord(tz * TILE_SIZE, z, depth);
                    for y in 0..PADDED_TILE {
                        let sy = clamp_coord(ty * TILE_SIZE, y, height);
                        for x in 0..PADDED_TILE {
                            let sx = clamp_coord(tx * TILE_SIZE, x, width);
                            let src = ((sz * height + sy) * width + sx) * channels;
                            let dst =
                                ((z * PADDED_TILE + y) * row_width + block_x + x) * channels;
                            out[dst..dst + channels]
                                .copy_from_slice(&pixels[src..src + channels]);
                        }
                    }
                }
            }
        }
    }

    Some(SparseGrid {
        pixels: out,
        offsets,
        active_tiles: active,
    })
}

/// Source coordinate for padded-block local coordinate `local`, with the
/// one-voxel border shift and edge clamping.
fn clamp_coord(tile_origin: usize, local: usize, dim: usize) -> usize {
    (tile_origin as isize + local as isize - 1).clamp(0, dim as isize - 1) as usize
}
