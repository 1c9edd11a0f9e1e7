use std::collections::TryReserveError;
use std::ops::Range;

use glam::DVec3;
use rayon::prelude::*;

/// Maximum subdivision level of the octree.
///
/// Each axis is quantized on 21 bits so a full resolution cell code fits in 63 bits.
pub const MAX_OCTREE_LEVEL: u8 = 21;

/// Morton code identifying an octree cell at a given level.
pub type CellCode = u64;

/// Error types for the octree module.
#[derive(Debug, thiserror::Error)]
pub enum OctreeError {
    /// The octree cannot be computed on an empty point cloud.
    #[error("Cannot compute an octree on an empty point cloud")]
    EmptyCloud,

    /// A point has non finite coordinates so no bounding box can enclose it.
    #[error("Point {0} has non finite coordinates")]
    NonFiniteCoordinates(usize),

    /// The requested subdivision level is out of range.
    #[error("Octree level must be between 0 and {max}, got {level}")]
    InvalidLevel {
        /// Requested level.
        level: u8,
        /// Maximum supported level.
        max: u8,
    },

    /// Allocation failure while building or querying the octree.
    #[error("Not enough memory")]
    OutOfMemory(#[from] TryReserveError),
}

/// A point index together with its full resolution cell code.
///
/// Ordering is by code first, then by index, so sorting is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexAndCode {
    /// Full resolution cell code.
    pub code: CellCode,
    /// Global index of the point in the source cloud.
    pub index: usize,
}

/// A non-empty cell of the octree at some level.
#[derive(Debug, Clone, Copy)]
pub struct OctreeCell<'a> {
    /// Cell code at the level the cell was queried at.
    pub code: CellCode,
    entries: &'a [IndexAndCode],
}

impl<'a> OctreeCell<'a> {
    /// Number of points lying in the cell.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cell is empty (never the case for cells yielded by the octree).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Global indices of the points lying in the cell, in octree order.
    pub fn point_indices(&self) -> impl Iterator<Item = usize> + 'a {
        self.entries.iter().map(|e| e.index)
    }
}

/// Morton code octree over a point cloud.
///
/// Every point gets a code at [`MAX_OCTREE_LEVEL`] and the codes are sorted once.
/// A cell at level `L` is the full code shifted right by `3 * (MAX_OCTREE_LEVEL - L)`,
/// so the points of a cell are a contiguous run of the sorted codes at any level.
#[derive(Debug, Clone)]
pub struct Octree {
    mins: DVec3,
    side: f64,
    codes: Vec<IndexAndCode>,
}

impl Octree {
    /// Build the octree of a set of points.
    ///
    /// The bounding box is the smallest cube enclosing all the points. When all the
    /// points coincide, a unit cube centered on them is used instead.
    ///
    /// # Arguments
    ///
    /// * `points` - The points to index.
    ///
    /// # Errors
    ///
    /// Fails on an empty input, on non finite coordinates or if the code buffer
    /// cannot be allocated.
    pub fn build(points: &[[f64; 3]]) -> Result<Self, OctreeError> {
        if points.is_empty() {
            return Err(OctreeError::EmptyCloud);
        }

        if let Some(i) = points
            .iter()
            .position(|p| !(p[0].is_finite() && p[1].is_finite() && p[2].is_finite()))
        {
            return Err(OctreeError::NonFiniteCoordinates(i));
        }

        let first = DVec3::from_array(points[0]);
        let (bb_min, bb_max) = points.iter().fold((first, first), |(lo, hi), p| {
            let p = DVec3::from_array(*p);
            (lo.min(p), hi.max(p))
        });

        let extent = (bb_max - bb_min).max_element();
        let side = if extent > 0.0 { extent } else { 1.0 };
        let center = (bb_min + bb_max) * 0.5;
        let mins = center - DVec3::splat(side * 0.5);

        let mut octree = Self {
            mins,
            side,
            codes: Vec::new(),
        };

        let mut codes = Vec::new();
        codes.try_reserve_exact(points.len())?;
        points
            .par_iter()
            .enumerate()
            .map(|(index, p)| IndexAndCode {
                code: morton_encode(octree.full_resolution_position(p)),
                index,
            })
            .collect_into_vec(&mut codes);
        codes.par_sort_unstable();

        log::debug!(
            "Octree built on {} points, cube side {} at {:?}",
            codes.len(),
            side,
            mins
        );

        octree.codes = codes;
        Ok(octree)
    }

    /// Number of points indexed by the octree.
    #[inline]
    pub fn num_points(&self) -> usize {
        self.codes.len()
    }

    /// Minimum corner of the octree cube.
    pub fn octree_mins(&self) -> [f64; 3] {
        self.mins.to_array()
    }

    /// Maximum corner of the octree cube.
    pub fn octree_maxs(&self) -> [f64; 3] {
        (self.mins + DVec3::splat(self.side)).to_array()
    }

    /// Size of a cell edge at the given level.
    pub fn cell_size(&self, level: u8) -> f64 {
        self.side / (1u64 << level.min(MAX_OCTREE_LEVEL)) as f64
    }

    /// Sorted codes and indices of all the points.
    pub fn indexes_and_codes(&self) -> &[IndexAndCode] {
        &self.codes
    }

    /// Geometric center of a cell.
    pub fn cell_center(&self, code: CellCode, level: u8) -> [f64; 3] {
        let pos = morton_decode(code);
        let pos = DVec3::new(pos[0] as f64, pos[1] as f64, pos[2] as f64);
        (self.mins + (pos + DVec3::splat(0.5)) * self.cell_size(level)).to_array()
    }

    /// Code of the cell including a point, or `None` if the point is outside the octree cube.
    pub fn point_cell_code(&self, point: &[f64; 3], level: u8) -> Result<Option<CellCode>, OctreeError> {
        check_level(level)?;
        let p = DVec3::from_array(*point);
        let maxs = self.mins + DVec3::splat(self.side);
        if p.cmplt(self.mins).any() || p.cmpgt(maxs).any() {
            return Ok(None);
        }
        let code = morton_encode(self.full_resolution_position(point));
        Ok(Some(code >> level_shift(level)))
    }

    /// Iterate over the non-empty cells at a level, in ascending code order.
    pub fn cells(&self, level: u8) -> Result<impl Iterator<Item = OctreeCell<'_>>, OctreeError> {
        check_level(level)?;
        let shift = level_shift(level);
        Ok(self
            .codes
            .chunk_by(move |a, b| a.code >> shift == b.code >> shift)
            .map(move |entries| OctreeCell {
                code: entries[0].code >> shift,
                entries,
            }))
    }

    /// Codes of the non-empty cells at a level, in ascending order.
    ///
    /// The ordering is stable across calls for the same octree and level.
    pub fn cell_codes(&self, level: u8) -> Result<Vec<CellCode>, OctreeError> {
        let mut cell_codes = Vec::new();
        cell_codes.try_reserve(self.cell_count(level)?)?;
        cell_codes.extend(self.cells(level)?.map(|cell| cell.code));
        Ok(cell_codes)
    }

    /// Number of non-empty cells at a level.
    pub fn cell_count(&self, level: u8) -> Result<usize, OctreeError> {
        Ok(self.cells(level)?.count())
    }

    /// Global indices of the points lying in a cell.
    ///
    /// An unknown code yields an empty iterator.
    pub fn points_in_cell(
        &self,
        code: CellCode,
        level: u8,
    ) -> Result<impl ExactSizeIterator<Item = usize> + '_, OctreeError> {
        check_level(level)?;
        let range = self.cell_range(code, level);
        Ok(self.codes[range].iter().map(|e| e.index))
    }

    /// Level whose number of non-empty cells is the closest to `cell_count`.
    pub fn find_best_level_for_cell_count(&self, cell_count: usize) -> u8 {
        let mut best_level = 1;
        let mut best_delta = usize::MAX;
        for level in 1..=MAX_OCTREE_LEVEL {
            let count = self.count_cells_unchecked(level);
            let delta = count.abs_diff(cell_count);
            if delta < best_delta {
                best_delta = delta;
                best_level = level;
            }
            // counts only grow with the level
            if count >= cell_count {
                break;
            }
        }
        best_level
    }

    /// Level whose average cell population is the closest to `population`.
    pub fn find_best_level_for_population_per_cell(&self, population: usize) -> u8 {
        let target = population.max(1) as f64;
        let mut best_level = 1;
        let mut best_delta = f64::INFINITY;
        for level in 1..=MAX_OCTREE_LEVEL {
            let count = self.count_cells_unchecked(level);
            let average = self.codes.len() as f64 / count.max(1) as f64;
            let delta = (average - target).abs();
            if delta < best_delta {
                best_delta = delta;
                best_level = level;
            }
            if average <= target {
                break;
            }
        }
        best_level
    }

    fn count_cells_unchecked(&self, level: u8) -> usize {
        let shift = level_shift(level);
        self.codes
            .chunk_by(|a, b| a.code >> shift == b.code >> shift)
            .count()
    }

    fn cell_range(&self, code: CellCode, level: u8) -> Range<usize> {
        let shift = level_shift(level);
        let start = self.codes.partition_point(|e| e.code >> shift < code);
        let end = self.codes.partition_point(|e| e.code >> shift <= code);
        start..end
    }

    fn full_resolution_position(&self, point: &[f64; 3]) -> [u64; 3] {
        let cells_per_axis = 1u64 << MAX_OCTREE_LEVEL;
        let scale = cells_per_axis as f64 / self.side;
        let p = (DVec3::from_array(*point) - self.mins) * scale;
        let quantize = |v: f64| (v.max(0.0) as u64).min(cells_per_axis - 1);
        [quantize(p.x), quantize(p.y), quantize(p.z)]
    }
}

fn check_level(level: u8) -> Result<(), OctreeError> {
    if level > MAX_OCTREE_LEVEL {
        return Err(OctreeError::InvalidLevel {
            level,
            max: MAX_OCTREE_LEVEL,
        });
    }
    Ok(())
}

#[inline]
fn level_shift(level: u8) -> u32 {
    3 * (MAX_OCTREE_LEVEL - level.min(MAX_OCTREE_LEVEL)) as u32
}

fn spread_bits(v: u64) -> u64 {
    let mut x = v & 0x1f_ffff;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

fn compact_bits(v: u64) -> u64 {
    let mut x = v & 0x1249_2492_4924_9249;
    x = (x ^ (x >> 2)) & 0x10c3_0c30_c30c_30c3;
    x = (x ^ (x >> 4)) & 0x100f_00f0_0f00_f00f;
    x = (x ^ (x >> 8)) & 0x001f_0000_ff00_00ff;
    x = (x ^ (x >> 16)) & 0x001f_0000_0000_ffff;
    x = (x ^ (x >> 32)) & 0x1f_ffff;
    x
}

fn morton_encode(pos: [u64; 3]) -> CellCode {
    spread_bits(pos[0]) | (spread_bits(pos[1]) << 1) | (spread_bits(pos[2]) << 2)
}

fn morton_decode(code: CellCode) -> [u64; 3] {
    [
        compact_bits(code),
        compact_bits(code >> 1),
        compact_bits(code >> 2),
    ]
}
