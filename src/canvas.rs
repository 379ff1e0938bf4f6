use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::error::{EngineError, Result};

// ============================================================================
// CELL: one grid position: color + region id
// ============================================================================

/// Fully transparent color, the only color an empty cell may carry.
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// A single grid position.
///
/// Cells are always stored normalised: a color with `alpha == 0` is an empty
/// cell and carries region id 0 and zeroed RGB.  Fields are private so that no
/// write path can pair a color with a stale region id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    color: Rgba<u8>,
    region_id: i32,
}

impl Default for Cell {
    fn default() -> Self {
        Cell::EMPTY
    }
}

impl Cell {
    pub const EMPTY: Cell = Cell { color: TRANSPARENT, region_id: 0 };

    pub fn new(color: Rgba<u8>, region_id: i32) -> Self {
        if color[3] == 0 {
            return Cell::EMPTY;
        }
        Self { color, region_id }
    }

    /// Convenience for an opaque cell.
    pub fn rgb(r: u8, g: u8, b: u8, region_id: i32) -> Self {
        Self::new(Rgba([r, g, b, 255]), region_id)
    }

    #[inline]
    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    #[inline]
    pub fn region_id(&self) -> i32 {
        self.region_id
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.color[3] == 0
    }

    /// Pack the color as `0xAARRGGBB` reinterpreted as `i32`.  Empty is 0.
    pub fn to_packed(&self) -> i32 {
        pack_color(self.color)
    }

    /// Inverse of [`Cell::to_packed`]; the region id must come from elsewhere.
    pub fn from_packed(packed: i32, region_id: i32) -> Self {
        Self::new(unpack_color(packed), region_id)
    }
}

pub fn pack_color(color: Rgba<u8>) -> i32 {
    if color[3] == 0 {
        return 0;
    }
    let [r, g, b, a] = color.0;
    (((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32) as i32
}

pub fn unpack_color(packed: i32) -> Rgba<u8> {
    let v = packed as u32;
    Rgba([(v >> 16) as u8, (v >> 8) as u8, v as u8, (v >> 24) as u8])
}

/// A requested write: put `cell` at `(x, y)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellWrite {
    pub x: i32,
    pub y: i32,
    pub cell: Cell,
}

impl CellWrite {
    pub fn new(x: i32, y: i32, cell: Cell) -> Self {
        Self { x, y, cell }
    }
}

/// A write that actually happened, with the value it replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellChange {
    pub x: i32,
    pub y: i32,
    pub previous: Cell,
    pub new: Cell,
}

// ============================================================================
// PIXEL GRID: dense row-major cell storage
// ============================================================================

/// Dense `width × height` array of cells, the authoritative document state
/// for one layer.
///
/// Coordinates are signed so tool code can probe past the edges: reads
/// outside the grid return [`Cell::EMPTY`] and writes are ignored.
#[derive(Clone, Debug)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
    /// Bumped once per effective mutation call (not per cell).
    generation: u64,
    /// Flat RGBA view for rendering/export. Rebuilt on demand.
    render_cache: Option<Arc<RgbaImage>>,
}

impl PartialEq for PixelGrid {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.cells == other.cells
    }
}

impl PixelGrid {
    // ---- construction -------------------------------------------------------

    /// Create an all-empty grid.
    pub fn new(width: u32, height: u32) -> Self {
        Self::new_filled(width, height, Cell::EMPTY)
    }

    pub fn new_filled(width: u32, height: u32, cell: Cell) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            cells: vec![cell; len],
            generation: 0,
            render_cache: None,
        }
    }

    /// Build a grid from a full row-major cell array.
    pub fn from_cells(width: u32, height: u32, cells: Vec<Cell>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(EngineError::SizeMismatch {
                expected: (width, height),
                found: (cells.len() as u32, 1),
            });
        }
        let cells = cells.into_iter().map(|c| Cell::new(c.color, c.region_id)).collect();
        Ok(Self { width, height, cells, generation: 0, render_cache: None })
    }

    // ---- geometry -----------------------------------------------------------

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.index(x, y).is_some()
    }

    /// The single coordinate → storage mapping.  Never exposed.
    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    pub(crate) fn same_size(&self, other: &PixelGrid) -> bool {
        self.dimensions() == other.dimensions()
    }

    // ---- cell access --------------------------------------------------------

    #[inline]
    pub fn get(&self, x: i32, y: i32) -> Cell {
        self.index(x, y).map(|i| self.cells[i]).unwrap_or(Cell::EMPTY)
    }

    /// Write a single cell.  Returns `true` only when the stored value changed.
    pub fn set(&mut self, x: i32, y: i32, cell: Cell) -> bool {
        let changed = self.write(x, y, cell).is_some();
        if changed {
            self.invalidate();
        }
        changed
    }

    /// Apply many writes with `set` semantics, invalidating the render cache
    /// at most once.  Returns the changes that actually took effect.
    pub fn apply_batch(&mut self, writes: &[CellWrite]) -> Vec<CellChange> {
        let mut applied = Vec::with_capacity(writes.len());
        for w in writes {
            if let Some(previous) = self.write(w.x, w.y, w.cell) {
                applied.push(CellChange { x: w.x, y: w.y, previous, new: self.get(w.x, w.y) });
            }
        }
        if !applied.is_empty() {
            self.invalidate();
        }
        applied
    }

    /// Write each change's `new` value (`forward`) or `previous` value.
    pub(crate) fn apply_changes(&mut self, changes: &[CellChange], forward: bool) -> usize {
        let mut count = 0;
        for c in changes {
            let target = if forward { c.new } else { c.previous };
            if self.write(c.x, c.y, target).is_some() {
                count += 1;
            }
        }
        if count > 0 {
            self.invalidate();
        }
        count
    }

    /// Raw write without invalidation.  Returns the previous cell when the
    /// stored value changed; bit-exact comparison only.
    #[inline]
    fn write(&mut self, x: i32, y: i32, cell: Cell) -> Option<Cell> {
        let idx = self.index(x, y)?;
        let cell = Cell::new(cell.color, cell.region_id);
        let slot = &mut self.cells[idx];
        if *slot == cell {
            return None;
        }
        let previous = *slot;
        *slot = cell;
        Some(previous)
    }

    // ---- bulk operations ----------------------------------------------------

    pub fn fill_all(&mut self, cell: Cell) {
        let cell = Cell::new(cell.color, cell.region_id);
        if self.cells.iter().all(|c| *c == cell) {
            return;
        }
        self.cells.fill(cell);
        self.invalidate();
    }

    pub fn clear(&mut self) {
        self.fill_all(Cell::EMPTY);
    }

    /// Replace the whole cell array (import path).  Size must match.
    pub fn replace_cells(&mut self, cells: Vec<Cell>) -> Result<()> {
        let replacement = PixelGrid::from_cells(self.width, self.height, cells)?;
        self.cells = replacement.cells;
        self.invalidate();
        Ok(())
    }

    /// Copy another grid's cells wholesale.  Nothing is written on mismatch.
    pub fn restore_from(&mut self, other: &PixelGrid) -> Result<()> {
        if !self.same_size(other) {
            return Err(EngineError::SizeMismatch {
                expected: self.dimensions(),
                found: other.dimensions(),
            });
        }
        if self.cells != other.cells {
            self.cells.copy_from_slice(&other.cells);
            self.invalidate();
        }
        Ok(())
    }

    /// Row-major read-only view of every cell.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub(crate) fn cells_mut_unchecked(&mut self) -> &mut [Cell] {
        self.invalidate();
        &mut self.cells
    }

    /// Iterate `(x, y, cell)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32, Cell)> + '_ {
        let w = self.width.max(1) as usize;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, c)| ((i % w) as i32, (i / w) as i32, *c))
    }

    /// Coordinates of every cell assigned to `region_id`.
    pub fn region_pixels(&self, region_id: i32) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.iter()
            .filter(move |(_, _, c)| !c.is_empty() && c.region_id == region_id)
            .map(|(x, y, _)| (x, y))
    }

    pub fn count_region(&self, region_id: i32) -> usize {
        self.region_pixels(region_id).count()
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_empty())
    }

    // ---- render cache -------------------------------------------------------

    /// Generation counter, bumped once for each call that changed cells.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_render_cache_valid(&self) -> bool {
        self.render_cache.is_some()
    }

    fn invalidate(&mut self) {
        self.render_cache = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Flat RGBA rendering of the grid, generated lazily and shared until the
    /// next mutation.
    pub fn render_image(&mut self) -> Arc<RgbaImage> {
        if let Some(ref cached) = self.render_cache {
            return Arc::clone(cached);
        }
        let arc = Arc::new(self.to_rgba_image());
        self.render_cache = Some(Arc::clone(&arc));
        arc
    }

    /// Uncached flat RGBA copy.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut raw = Vec::with_capacity(self.cells.len() * 4);
        for c in &self.cells {
            raw.extend_from_slice(&c.color.0);
        }
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    pub fn memory_bytes(&self) -> usize {
        self.cells.len() * std::mem::size_of::<Cell>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_colors_normalise_to_empty() {
        let c = Cell::new(Rgba([10, 20, 30, 0]), 7);
        assert_eq!(c, Cell::EMPTY);
        assert_eq!(c.region_id(), 0);
    }

    #[test]
    fn packing_uses_argb_and_zero_for_empty() {
        let c = Cell::new(Rgba([0x11, 0x22, 0x33, 0x44]), 1);
        assert_eq!(c.to_packed() as u32, 0x4411_2233);
        assert_eq!(Cell::EMPTY.to_packed(), 0);
        assert_eq!(Cell::from_packed(c.to_packed(), 1), c);
        assert_eq!(Cell::from_packed(0, 5), Cell::EMPTY);
    }

    #[test]
    fn index_rejects_negative_and_overflowing_coordinates() {
        let g = PixelGrid::new(3, 2);
        assert_eq!(g.index(-1, 0), None);
        assert_eq!(g.index(3, 0), None);
        assert_eq!(g.index(0, 2), None);
        assert_eq!(g.index(2, 1), Some(5));
    }
}
