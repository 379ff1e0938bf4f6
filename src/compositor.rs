// ============================================================================
// COMPOSITOR: per-cell blend math and the backend strategy seam
// ============================================================================
//
// The composite is computed bottom → top into an accumulator grid.  Each
// output cell depends only on the same cell of the inputs, so the CPU
// backend blends rows in parallel with rayon.  An accelerated backend can be
// installed by the host; it must produce bit-identical cells.

use image::Rgba;
use rayon::prelude::*;

use crate::canvas::{Cell, PixelGrid};
use crate::layers::BlendMode;

/// Strategy for blending one layer grid onto an accumulator.
pub trait CompositeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Blend `src` onto `dst` in place.  Callers guarantee equal sizes.
    fn blend_onto(&self, dst: &mut PixelGrid, src: &PixelGrid, mode: BlendMode, opacity: f32);
}

/// Reference implementation; always available.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuCompositor;

impl CompositeBackend for CpuCompositor {
    fn name(&self) -> &str {
        "cpu"
    }

    fn blend_onto(&self, dst: &mut PixelGrid, src: &PixelGrid, mode: BlendMode, opacity: f32) {
        if !dst.same_size(src) {
            log::error!(
                "blend_onto: size mismatch {:?} vs {:?}, layer skipped",
                dst.dimensions(),
                src.dimensions()
            );
            return;
        }
        if src.is_blank() {
            return;
        }
        let width = dst.width().max(1) as usize;
        let src_cells = src.cells();
        dst.cells_mut_unchecked()
            .par_chunks_mut(width)
            .zip(src_cells.par_chunks(width))
            .for_each(|(dst_row, src_row)| {
                for (d, s) in dst_row.iter_mut().zip(src_row) {
                    *d = blend_cell(*d, *s, mode, opacity);
                }
            });
    }
}

/// Pick the compositing backend.  No accelerator ships with the engine, so
/// this falls back to the CPU path; hosts with an accelerator install it via
/// `Document::set_backend`.
pub fn detect_backend(prefer_accelerated: bool) -> Box<dyn CompositeBackend> {
    if prefer_accelerated {
        log::info!("No accelerated compositor registered; using CPU backend");
    }
    Box::new(CpuCompositor)
}

// ============================================================================
// BLEND MATH
// ============================================================================

/// Blend a single source cell over a destination cell.
///
/// Transparent sources never contribute.  The result takes the source's
/// region id whenever the source contributes.
pub fn blend_cell(dst: Cell, src: Cell, mode: BlendMode, opacity: f32) -> Cell {
    if src.is_empty() {
        return dst;
    }
    let opacity = opacity.clamp(0.0, 1.0);
    let top = src.color();

    // Nothing underneath: write the source with opacity applied, any mode.
    if dst.is_empty() {
        return Cell::new(with_alpha(top, scale_alpha(top[3], opacity)), src.region_id());
    }

    match mode {
        BlendMode::Normal => normal_over(dst, src, opacity),
        _ => {
            let base = dst.color();
            let mut out = [0u8; 4];
            for i in 0..3 {
                let b = base[i] as f32 / 255.0;
                let t = top[i] as f32 / 255.0;
                let blended = blend_channel(mode, b, t);
                out[i] = to_u8(b + (blended - b) * opacity);
            }
            out[3] = top[3].max(base[3]);
            Cell::new(Rgba(out), src.region_id())
        }
    }
}

fn normal_over(dst: Cell, src: Cell, opacity: f32) -> Cell {
    let top = src.color();
    // Fast path: opaque source at full opacity replaces the cell
    if opacity >= 1.0 && top[3] == 255 {
        return src;
    }
    let base = dst.color();
    let top_a = (top[3] as f32 / 255.0) * opacity;
    let base_a = base[3] as f32 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Cell::EMPTY;
    }
    let mut out = [0u8; 4];
    for i in 0..3 {
        let t = top[i] as f32 / 255.0;
        let b = base[i] as f32 / 255.0;
        out[i] = to_u8((t * top_a + b * base_a * (1.0 - top_a)) / out_a);
    }
    out[3] = to_u8(out_a);
    let region = if top_a > 0.0 { src.region_id() } else { dst.region_id() };
    Cell::new(Rgba(out), region)
}

fn blend_channel(mode: BlendMode, base: f32, top: f32) -> f32 {
    match mode {
        BlendMode::Normal => top,
        BlendMode::Multiply => base * top,
        BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
        BlendMode::Overlay => {
            if base < 0.5 {
                2.0 * base * top
            } else {
                1.0 - 2.0 * (1.0 - base) * (1.0 - top)
            }
        }
        BlendMode::Add => (base + top).min(1.0),
        BlendMode::Subtract => (base - top).max(0.0),
    }
}

#[inline]
fn scale_alpha(alpha: u8, opacity: f32) -> u8 {
    if opacity >= 1.0 {
        return alpha;
    }
    to_u8(alpha as f32 / 255.0 * opacity)
}

#[inline]
fn with_alpha(color: Rgba<u8>, alpha: u8) -> Rgba<u8> {
    Rgba([color[0], color[1], color[2], alpha])
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(r: u8, g: u8, b: u8, a: u8, id: i32) -> Cell {
        Cell::new(Rgba([r, g, b, a]), id)
    }

    #[test]
    fn transparent_source_is_skipped_for_every_mode() {
        let dst = cell(10, 20, 30, 255, 1);
        for mode in BlendMode::all() {
            assert_eq!(blend_cell(dst, Cell::EMPTY, *mode, 1.0), dst);
        }
    }

    #[test]
    fn normal_onto_empty_applies_opacity_to_alpha() {
        let out = blend_cell(Cell::EMPTY, cell(200, 0, 0, 255, 3), BlendMode::Normal, 0.5);
        assert_eq!(out.color(), Rgba([200, 0, 0, 128]));
        assert_eq!(out.region_id(), 3);
    }

    #[test]
    fn normal_half_opacity_mixes_colors() {
        let out = blend_cell(cell(0, 0, 0, 255, 1), cell(255, 255, 255, 255, 2), BlendMode::Normal, 0.5);
        assert_eq!(out.color(), Rgba([128, 128, 128, 255]));
        assert_eq!(out.region_id(), 2);
    }

    #[test]
    fn multiply_uses_max_alpha_and_opacity_lerp() {
        let dst = cell(200, 100, 50, 100, 1);
        let src = cell(128, 255, 0, 200, 2);
        let out = blend_cell(dst, src, BlendMode::Multiply, 1.0);
        assert_eq!(out.color()[3], 200);
        assert_eq!(out.color()[1], 100);
        assert_eq!(out.color()[2], 0);

        let none = blend_cell(dst, src, BlendMode::Multiply, 0.0);
        assert_eq!(&none.color().0[..3], &[200, 100, 50]);
    }

    #[test]
    fn add_and_subtract_saturate() {
        let dst = cell(200, 10, 0, 255, 1);
        let src = cell(100, 20, 0, 255, 2);
        assert_eq!(&blend_cell(dst, src, BlendMode::Add, 1.0).color().0[..3], &[255, 30, 0]);
        assert_eq!(&blend_cell(dst, src, BlendMode::Subtract, 1.0).color().0[..3], &[100, 0, 0]);
    }
}
