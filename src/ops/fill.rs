// ============================================================================
// FLOOD FILL: tolerance-based 4-connected fill and erase
// ============================================================================

use std::collections::VecDeque;

use image::Rgba;

use crate::canvas::{Cell, CellChange, CellWrite, PixelGrid};
use crate::error::EngineWarning;

/// Default hard cap on cells changed by one fill.
pub const DEFAULT_FILL_CELL_CAP: usize = 1_000_000;

/// Result of a fill computation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FillResult {
    /// Every cell the fill changed, coordinate-unique.
    pub changes: Vec<CellChange>,
    /// Set when the cap stopped the fill early.
    pub warning: Option<EngineWarning>,
}

impl FillResult {
    pub fn is_truncated(&self) -> bool {
        matches!(self.warning, Some(EngineWarning::FillTruncated { .. }))
    }

    /// The changes as plain writes, ready for `PixelGrid::apply_batch`.
    pub fn writes(&self) -> Vec<CellWrite> {
        self.changes.iter().map(|c| CellWrite::new(c.x, c.y, c.new)).collect()
    }
}

/// Inclusive per-channel match window around the target color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MatchRange {
    lo: [u8; 4],
    hi: [u8; 4],
}

impl MatchRange {
    fn new(target: Rgba<u8>, tolerance: f32) -> Self {
        let tol = if tolerance.is_nan() { 0.0 } else { tolerance.clamp(0.0, 1.0) };
        let delta = (tol * 255.0).round() as i32;
        let mut lo = [0u8; 4];
        let mut hi = [0u8; 4];
        for i in 0..4 {
            let t = target[i] as i32;
            lo[i] = (t - delta).clamp(0, 255) as u8;
            hi[i] = (t + delta).clamp(0, 255) as u8;
        }
        Self { lo, hi }
    }

    #[inline(always)]
    fn contains(&self, c: Rgba<u8>) -> bool {
        c[0] >= self.lo[0] && c[0] <= self.hi[0]
            && c[1] >= self.lo[1] && c[1] <= self.hi[1]
            && c[2] >= self.lo[2] && c[2] <= self.hi[2]
            && c[3] >= self.lo[3] && c[3] <= self.hi[3]
    }
}

/// Flood fill engine.  Stateless apart from its cell cap.
#[derive(Clone, Copy, Debug)]
pub struct FloodFill {
    cell_cap: usize,
}

impl Default for FloodFill {
    fn default() -> Self {
        Self::new(DEFAULT_FILL_CELL_CAP)
    }
}

impl FloodFill {
    pub fn new(cell_cap: usize) -> Self {
        Self { cell_cap: cell_cap.max(1) }
    }

    pub fn cell_cap(&self) -> usize {
        self.cell_cap
    }

    /// Compute the fill from `(start_x, start_y)` without touching the grid.
    ///
    /// The target is the start cell's color; neighbours match when every
    /// channel lies within `tolerance × 255` of it.  Cells that already equal
    /// `fill_cell` are traversed but not reported.
    pub fn compute(&self, grid: &PixelGrid, start_x: i32, start_y: i32, fill_cell: Cell, tolerance: f32) -> FillResult {
        if !grid.contains(start_x, start_y) {
            return FillResult::default();
        }
        let target = grid.get(start_x, start_y);
        let fill_cell = Cell::new(fill_cell.color(), fill_cell.region_id());
        if target == fill_cell {
            return FillResult::default();
        }

        let range = MatchRange::new(target.color(), tolerance);
        let w = grid.width() as usize;
        let h = grid.height() as usize;
        let cells = grid.cells();

        // visited doubles as the "queued" marker so each cell enters once
        let mut visited = vec![false; w * h];
        let mut queue: VecDeque<u32> = VecDeque::with_capacity(4096);
        let mut changes = Vec::new();
        let mut truncated = false;

        let seed = start_y as usize * w + start_x as usize;
        visited[seed] = true;
        queue.push_back(seed as u32);

        while let Some(idx) = queue.pop_front() {
            let idx = idx as usize;
            let current = cells[idx];
            if current != fill_cell {
                if changes.len() >= self.cell_cap {
                    truncated = true;
                    break;
                }
                changes.push(CellChange {
                    x: (idx % w) as i32,
                    y: (idx / w) as i32,
                    previous: current,
                    new: fill_cell,
                });
            }

            let x = idx % w;
            let y = idx / w;
            let mut visit = |ni: usize| {
                if !visited[ni] && range.contains(cells[ni].color()) {
                    visited[ni] = true;
                    queue.push_back(ni as u32);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        let warning = if truncated {
            log::warn!(
                "flood fill from ({}, {}) hit the {} cell cap; fill is partial",
                start_x, start_y, self.cell_cap
            );
            Some(EngineWarning::FillTruncated { cap: self.cell_cap, filled: changes.len() })
        } else {
            None
        };
        FillResult { changes, warning }
    }

    /// Compute and apply a fill in one batch.
    pub fn fill(&self, grid: &mut PixelGrid, start_x: i32, start_y: i32, fill_cell: Cell, tolerance: f32) -> FillResult {
        let result = self.compute(grid, start_x, start_y, fill_cell, tolerance);
        if !result.changes.is_empty() {
            grid.apply_batch(&result.writes());
        }
        result
    }

    /// Flood-erase: fill the connected area with empty cells.
    pub fn erase(&self, grid: &mut PixelGrid, start_x: i32, start_y: i32, tolerance: f32) -> FillResult {
        self.fill(grid, start_x, start_y, Cell::EMPTY, tolerance)
    }
}
