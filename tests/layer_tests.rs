//! Tests for layer stack structure operations and compositing.

use image::Rgba;
use regionpaint::compositor::{blend_cell, CpuCompositor};
use regionpaint::{BlendMode, Cell, CellWrite, EngineError, LayerStack, PixelGrid};

fn red(region: i32) -> Cell {
    Cell::rgb(255, 0, 0, region)
}

fn blue(region: i32) -> Cell {
    Cell::rgb(0, 0, 255, region)
}

/// Two-layer 3×3 stack: bottom filled red (region 1), top filled blue (region 2).
fn create_two_layer_stack() -> LayerStack {
    let mut stack = LayerStack::new(3, 3);
    stack.grid_mut(0).unwrap().fill_all(red(1));
    stack.create(Some("Top".to_string()));
    stack.grid_mut(1).unwrap().fill_all(blue(2));
    stack
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn test_create_inserts_above_active_and_activates() {
    let mut stack = LayerStack::new(2, 2);
    stack.create(None);
    stack.set_active(0).unwrap();

    let idx = stack.create(Some("Middle".to_string()));

    assert_eq!(idx, 1);
    assert_eq!(stack.len(), 3);
    assert_eq!(stack.active_index(), 1);
    assert_eq!(stack.active().name, "Middle");
}

#[test]
fn test_delete_last_layer_is_refused() {
    let mut stack = LayerStack::new(2, 2);

    assert_eq!(stack.delete(0).err(), Some(EngineError::LastLayer));
    assert_eq!(stack.len(), 1);
}

#[test]
fn test_delete_out_of_range() {
    let mut stack = create_two_layer_stack();
    assert_eq!(stack.delete(7).err(), Some(EngineError::LayerOutOfRange { index: 7, len: 2 }));
}

#[test]
fn test_duplicate_copies_pixels_and_properties() {
    let mut stack = create_two_layer_stack();
    stack.set_opacity(1, 0.4).unwrap();
    stack.set_blend_mode(1, BlendMode::Screen).unwrap();

    let idx = stack.duplicate(1).unwrap();

    let copy = stack.get(idx).unwrap();
    let original = stack.get(1).unwrap();
    assert_ne!(copy.id, original.id);
    assert_eq!(copy.name, "Top Copy");
    assert_eq!(copy.opacity, 0.4);
    assert_eq!(copy.blend_mode, BlendMode::Screen);
    assert_eq!(copy.grid(), original.grid());
}

#[test]
fn test_locked_layer_rejects_grid_access() {
    let mut stack = create_two_layer_stack();
    stack.set_locked(1, true).unwrap();

    assert_eq!(stack.grid_mut(1).err(), Some(EngineError::LayerLocked { index: 1 }));
    assert!(stack.get(1).unwrap().locked);
}

#[test]
fn test_opacity_is_clamped() {
    let mut stack = LayerStack::new(1, 1);
    stack.set_opacity(0, 3.0).unwrap();
    assert_eq!(stack.active().opacity, 1.0);
    stack.set_opacity(0, -1.0).unwrap();
    assert_eq!(stack.active().opacity, 0.0);
}

// ============================================================================
// Merge down
// ============================================================================

#[test]
fn test_merge_down_blends_only_the_source() {
    let mut stack = LayerStack::new(2, 1);
    stack.grid_mut(0).unwrap().set(0, 0, red(1));
    stack.create(None);
    stack.grid_mut(1).unwrap().set(1, 0, blue(2));
    stack.create(None);
    stack.grid_mut(2).unwrap().set(0, 0, blue(3));

    let target = stack.merge_down(1, 0, &CpuCompositor).unwrap();

    assert_eq!(target, 0);
    assert_eq!(stack.len(), 2);
    let merged = stack.get(0).unwrap().grid();
    assert_eq!(merged.get(0, 0), red(1));
    assert_eq!(merged.get(1, 0), blue(2));
}

#[test]
fn test_merge_down_onto_locked_target() {
    let mut stack = create_two_layer_stack();
    stack.set_locked(0, true).unwrap();

    stack.merge_down(1, 0, &CpuCompositor).unwrap();

    assert_eq!(stack.len(), 1);
    assert_eq!(stack.active().grid().get(2, 2), blue(2));
}

#[test]
fn test_merge_down_same_layer_and_last_layer() {
    let mut stack = create_two_layer_stack();
    assert_eq!(stack.merge_down(1, 1, &CpuCompositor).err(), Some(EngineError::SameLayer));

    let mut single = LayerStack::new(1, 1);
    assert!(single.merge_down(0, 0, &CpuCompositor).is_err());
    assert_eq!(single.len(), 1);
}

#[test]
fn test_merge_down_respects_source_opacity() {
    let mut stack = create_two_layer_stack();
    stack.set_opacity(1, 0.5).unwrap();

    stack.merge_down(1, 0, &CpuCompositor).unwrap();

    assert_eq!(stack.active().grid().get(0, 0).color(), Rgba([128, 0, 128, 255]));
}

// ============================================================================
// Compositing
// ============================================================================

#[test]
fn test_composite_is_order_sensitive_for_opaque_layers() {
    let mut stack = create_two_layer_stack();
    let before = stack.composite_with(&CpuCompositor);
    assert_eq!(before.get(1, 1), blue(2));

    stack.move_layer(1, 0).unwrap();
    let after = stack.composite_with(&CpuCompositor);

    assert_eq!(after.get(1, 1), red(1));
    assert_ne!(before, after);
}

#[test]
fn test_transparent_layer_position_does_not_matter() {
    let mut stack = LayerStack::new(3, 3);
    stack.grid_mut(0).unwrap().fill_all(red(1));
    stack.create(Some("Empty".to_string()));
    let above = stack.composite_with(&CpuCompositor);

    stack.move_layer(1, 0).unwrap();
    let below = stack.composite_with(&CpuCompositor);

    assert_eq!(above, below);
    assert_eq!(below, PixelGrid::new_filled(3, 3, red(1)));
}

#[test]
fn test_composite_is_deterministic() {
    let mut stack = create_two_layer_stack();
    stack.set_opacity(1, 0.37).unwrap();
    stack.set_blend_mode(1, BlendMode::Overlay).unwrap();

    assert_eq!(stack.composite_with(&CpuCompositor), stack.composite_with(&CpuCompositor));
}

#[test]
fn test_hidden_and_near_zero_opacity_layers_are_skipped() {
    let mut stack = create_two_layer_stack();
    stack.set_visibility(1, false).unwrap();
    assert_eq!(stack.composite_with(&CpuCompositor).get(0, 0), red(1));

    stack.set_visibility(1, true).unwrap();
    stack.set_opacity(1, 0.0005).unwrap();
    assert_eq!(stack.composite_with(&CpuCompositor).get(0, 0), red(1));
}

#[test]
fn test_composite_cache_tracks_edits_and_properties() {
    let mut stack = create_two_layer_stack();
    assert_eq!(stack.composite_cached(&CpuCompositor).get(0, 0), blue(2));

    stack.grid_mut(1).unwrap().set(0, 0, Cell::EMPTY);
    assert_eq!(stack.composite_cached(&CpuCompositor).get(0, 0), red(1));

    stack.set_visibility(0, false).unwrap();
    assert_eq!(stack.composite_cached(&CpuCompositor).get(0, 0), Cell::EMPTY);
}

#[test]
fn test_flatten_collapses_to_composite() {
    let mut stack = create_two_layer_stack();
    stack.grid_mut(1).unwrap().set(0, 0, Cell::EMPTY);
    let expected = stack.composite_with(&CpuCompositor);

    stack.flatten(&CpuCompositor);

    assert_eq!(stack.len(), 1);
    assert_eq!(stack.active().grid(), &expected);
}

// ============================================================================
// Blend math
// ============================================================================

#[test]
fn test_transparent_source_never_contributes() {
    for &mode in BlendMode::all() {
        assert_eq!(blend_cell(red(1), Cell::EMPTY, mode, 1.0), red(1));
    }
}

#[test]
fn test_empty_destination_takes_source_with_opacity() {
    let out = blend_cell(Cell::EMPTY, blue(4), BlendMode::Multiply, 0.5);
    assert_eq!(out.color(), Rgba([0, 0, 255, 128]));
    assert_eq!(out.region_id(), 4);
}

#[test]
fn test_normal_half_opacity() {
    let out = blend_cell(red(1), blue(2), BlendMode::Normal, 0.5);
    assert_eq!(out.color(), Rgba([128, 0, 128, 255]));
    assert_eq!(out.region_id(), 2);
}

#[test]
fn test_multiply_and_screen() {
    let base = Cell::rgb(200, 100, 50, 1);
    let top = Cell::rgb(128, 128, 128, 2);

    assert_eq!(blend_cell(base, top, BlendMode::Multiply, 1.0).color(), Rgba([100, 50, 25, 255]));
    assert_eq!(blend_cell(base, top, BlendMode::Screen, 1.0).color(), Rgba([228, 178, 153, 255]));
}

#[test]
fn test_add_and_subtract_saturate() {
    let base = Cell::rgb(200, 10, 0, 1);
    let top = Cell::rgb(100, 20, 0, 2);

    assert_eq!(blend_cell(base, top, BlendMode::Add, 1.0).color(), Rgba([255, 30, 0, 255]));
    assert_eq!(blend_cell(base, top, BlendMode::Subtract, 1.0).color(), Rgba([100, 0, 0, 255]));
}

#[test]
fn test_non_normal_alpha_is_max_of_inputs() {
    let base = Cell::new(Rgba([10, 10, 10, 90]), 1);
    let top = Cell::new(Rgba([10, 10, 10, 200]), 2);
    assert_eq!(blend_cell(base, top, BlendMode::Screen, 0.3).color()[3], 200);
}

#[test]
fn test_cpu_compositor_matches_per_cell_blend() {
    use regionpaint::compositor::CompositeBackend;

    let mut dst = PixelGrid::new(4, 3);
    let mut src = PixelGrid::new(4, 3);
    let mut dst_writes = Vec::new();
    let mut src_writes = Vec::new();
    for y in 0..3 {
        for x in 0..4 {
            dst_writes.push(CellWrite::new(x, y, Cell::rgb((x * 60) as u8, (y * 80) as u8, 30, 1)));
            if (x + y) % 2 == 0 {
                src_writes.push(CellWrite::new(x, y, Cell::new(Rgba([90, 200, (x * 50) as u8, 180]), 2)));
            }
        }
    }
    dst.apply_batch(&dst_writes);
    src.apply_batch(&src_writes);
    let expected: Vec<Cell> = dst
        .cells()
        .iter()
        .zip(src.cells())
        .map(|(d, s)| blend_cell(*d, *s, BlendMode::Overlay, 0.8))
        .collect();

    CpuCompositor.blend_onto(&mut dst, &src, BlendMode::Overlay, 0.8);

    assert_eq!(dst.cells(), expected.as_slice());
}
