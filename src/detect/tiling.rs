//! Tile grid computation for the detection stage.

use image::GrayImage;

/// A fixed-size sub-window of a region, in region-local pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Index within the grid, row-major.
    pub index: u32,
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Partition a region into a grid of overlapping tiles.
///
/// Tiles step by `tile_size * (1 - overlap)` on each axis; the last tile
/// per axis is clamped flush with the edge so the full region is covered.
/// A region no larger than one tile yields a single tile covering it
/// whole (full-resolution pass, no tiling).
pub fn tile_grid(width: u32, height: u32, tile_size: u32, overlap: f32) -> Vec<Tile> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let xs = axis_offsets(width, tile_size, overlap);
    let ys = axis_offsets(height, tile_size, overlap);

    let mut tiles = Vec::with_capacity(xs.len() * ys.len());
    let mut index = 0;
    for &y in &ys {
        for &x in &xs {
            tiles.push(Tile {
                index,
                x,
                y,
                width: tile_size.min(width - x),
                height: tile_size.min(height - y),
            });
            index += 1;
        }
    }
    tiles
}

/// Tile offsets along one axis.
fn axis_offsets(extent: u32, tile_size: u32, overlap: f32) -> Vec<u32> {
    if extent <= tile_size {
        return vec![0];
    }

    let stride = ((tile_size as f32) * (1.0 - overlap)).round().max(1.0) as u32;
    let last = extent - tile_size;

    let mut offsets = Vec::new();
    let mut x = 0;
    while x < last {
        offsets.push(x);
        x += stride;
    }
    offsets.push(last);
    offsets
}

/// Whether a tile's pixel content is informative enough to run inference.
///
/// Low-variance tiles (uniform soil, tarp, sky) are skipped outright; this
/// is an optimization and never affects correctness of the merge.
pub fn is_informative(luma: &GrayImage, variance_floor: f64) -> bool {
    crate::imaging::luma_variance(luma) >= variance_floor
}
