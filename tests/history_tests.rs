//! Tests for the transaction log: recording strategies, coalescing,
//! redo invalidation, eviction and consistency failures.

use pretty_assertions::assert_eq;
use regionpaint::components::history::{RecordKind, RecordStrategy, TransactionLog, UndoRecord};
use regionpaint::ops::fill::FloodFill;
use regionpaint::{Cell, CellWrite, EngineError, EngineWarning, LayerStack, PixelGrid};

fn red() -> Cell {
    Cell::rgb(255, 0, 0, 1)
}

fn green() -> Cell {
    Cell::rgb(0, 255, 0, 2)
}

fn blue() -> Cell {
    Cell::rgb(0, 0, 255, 3)
}

fn create_test_stack() -> LayerStack {
    LayerStack::new(4, 4)
}

/// Record one diff operation made of `batches`, each applied separately.
fn stroke(log: &mut TransactionLog, stack: &mut LayerStack, batches: &[&[CellWrite]]) -> Option<EngineWarning> {
    let id = stack.active().id;
    let index = stack.active_index();
    let grid = stack.grid_mut(index).unwrap();
    log.begin(RecordStrategy::Diff, id, grid, "Stroke").unwrap();
    for batch in batches {
        let applied = grid.apply_batch(batch);
        log.record(&applied).unwrap();
    }
    log.seal(stack).unwrap().warning
}

/// Record one snapshot operation: a flood fill from `(x, y)`.
fn fill(log: &mut TransactionLog, stack: &mut LayerStack, x: i32, y: i32, cell: Cell) -> Option<EngineWarning> {
    let id = stack.active().id;
    let index = stack.active_index();
    let grid = stack.grid_mut(index).unwrap();
    log.begin(RecordStrategy::Snapshot, id, grid, "Fill").unwrap();
    FloodFill::default().fill(grid, x, y, cell, 0.0);
    log.seal(stack).unwrap().warning
}

fn active_grid(stack: &LayerStack) -> PixelGrid {
    stack.active().grid().clone()
}

// ============================================================================
// Coalescing
// ============================================================================

#[test]
fn test_repeated_writes_coalesce_to_one_change() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();

    stroke(
        &mut log,
        &mut stack,
        &[
            &[CellWrite::new(0, 0, red())],
            &[CellWrite::new(0, 0, green())],
            &[CellWrite::new(0, 0, blue()), CellWrite::new(1, 0, red())],
        ],
    );

    let record = log.peek_undo().unwrap();
    let RecordKind::Diff(changes) = &record.kind else {
        panic!("expected a diff record");
    };
    assert_eq!(changes.len(), 2);
    let first = changes.iter().find(|c| (c.x, c.y) == (0, 0)).unwrap();
    assert_eq!(first.previous, Cell::EMPTY);
    assert_eq!(first.new, blue());
}

#[test]
fn test_stroke_that_returns_to_original_is_not_recorded() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();

    stroke(&mut log, &mut stack, &[&[CellWrite::new(2, 2, red())], &[CellWrite::new(2, 2, Cell::EMPTY)]]);

    assert!(!log.can_undo());
}

#[test]
fn test_noop_writes_create_no_record() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();

    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, Cell::EMPTY), CellWrite::new(9, 9, red())]]);
    fill(&mut log, &mut stack, 0, 0, Cell::EMPTY);

    assert_eq!(log.undo_count(), 0);
}

// ============================================================================
// Undo / redo
// ============================================================================

#[test]
fn test_undo_redo_round_trip_mixed_records() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();

    let mut states = vec![active_grid(&stack)];
    stroke(&mut log, &mut stack, &[&[CellWrite::new(1, 1, red()), CellWrite::new(2, 1, red())]]);
    states.push(active_grid(&stack));
    fill(&mut log, &mut stack, 0, 0, green());
    states.push(active_grid(&stack));
    stroke(&mut log, &mut stack, &[&[CellWrite::new(3, 3, blue())], &[CellWrite::new(1, 1, blue())]]);
    states.push(active_grid(&stack));
    fill(&mut log, &mut stack, 1, 1, red());
    states.push(active_grid(&stack));

    let n = states.len() - 1;
    for i in (0..n).rev() {
        assert!(log.undo(&mut stack).unwrap().is_some());
        assert_eq!(active_grid(&stack), states[i]);
    }
    assert_eq!(log.undo(&mut stack).unwrap(), None);

    for state in states.iter().skip(1) {
        assert!(log.redo(&mut stack).unwrap().is_some());
        assert_eq!(&active_grid(&stack), state);
    }
    assert_eq!(log.redo(&mut stack).unwrap(), None);
}

#[test]
fn test_new_operation_clears_redo() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();

    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, red())]]);
    stroke(&mut log, &mut stack, &[&[CellWrite::new(1, 0, red())]]);
    log.undo(&mut stack).unwrap();
    assert!(log.can_redo());

    stroke(&mut log, &mut stack, &[&[CellWrite::new(2, 0, red())]]);

    assert!(!log.can_redo());
    assert_eq!(log.redo(&mut stack).unwrap(), None);
}

#[test]
fn test_undo_returns_description() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    fill(&mut log, &mut stack, 0, 0, red());

    assert_eq!(log.undo_description(), Some("Fill"));
    let step = log.undo(&mut stack).unwrap().unwrap();
    assert_eq!(step.description, "Fill");
    assert_eq!(step.warning, None);
    assert_eq!(log.redo_description(), Some("Fill"));
}

// ============================================================================
// Bounds and eviction
// ============================================================================

#[test]
fn test_depth_bound_evicts_oldest_with_warning() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::new(2);

    assert_eq!(stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, red())]]), None);
    assert_eq!(stroke(&mut log, &mut stack, &[&[CellWrite::new(1, 0, red())]]), None);
    let warning = stroke(&mut log, &mut stack, &[&[CellWrite::new(2, 0, red())]]);

    assert_eq!(warning, Some(EngineWarning::HistoryEvicted { dropped: 1 }));
    assert_eq!(log.undo_count(), 2);
    log.undo(&mut stack).unwrap();
    log.undo(&mut stack).unwrap();
    // the first stroke can no longer be undone
    assert_eq!(stack.active().grid().get(0, 0), red());
    assert!(!log.can_undo());
}

#[test]
fn test_shrinking_depth_prunes() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    for x in 0..4 {
        stroke(&mut log, &mut stack, &[&[CellWrite::new(x, 0, red())]]);
    }

    assert_eq!(log.set_max_depth(1), Some(EngineWarning::HistoryEvicted { dropped: 3 }));
    assert_eq!(log.undo_count(), 1);
}

#[test]
fn test_shrinking_depth_prunes_redo_stack() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    for i in 0..6 {
        stroke(&mut log, &mut stack, &[&[CellWrite::new(i % 4, i / 4, red())]]);
    }
    for _ in 0..6 {
        log.undo(&mut stack).unwrap();
    }

    assert_eq!(log.set_max_depth(2), Some(EngineWarning::HistoryEvicted { dropped: 4 }));
    assert_eq!(log.redo_count(), 2);

    // the two steps nearest the present survive
    log.redo(&mut stack).unwrap();
    log.redo(&mut stack).unwrap();
    assert_eq!(log.redo(&mut stack).unwrap(), None);
    assert_eq!(stack.active().grid().get(0, 0), red());
    assert_eq!(stack.active().grid().get(1, 0), red());
    assert_eq!(stack.active().grid().get(2, 0), Cell::EMPTY);
}

#[test]
fn test_redo_past_depth_reports_eviction() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::new(4);
    for x in 0..4 {
        stroke(&mut log, &mut stack, &[&[CellWrite::new(x, 0, red())]]);
    }
    log.undo(&mut stack).unwrap();
    log.undo(&mut stack).unwrap();
    assert_eq!(log.set_max_depth(2), None);

    let step = log.redo(&mut stack).unwrap().unwrap();

    assert_eq!(step.warning, Some(EngineWarning::HistoryEvicted { dropped: 1 }));
    assert_eq!(log.undo_count(), 2);
    assert_eq!(log.redo_count(), 1);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_undo_history_lists_most_recent_first() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, red())]]);
    fill(&mut log, &mut stack, 3, 3, green());

    assert_eq!(log.undo_history(), vec!["Fill", "Stroke"]);
    log.undo(&mut stack).unwrap();
    assert_eq!(log.undo_history(), vec!["Stroke"]);
}

#[test]
fn test_memory_usage_tracks_both_stacks() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    assert_eq!(log.memory_usage(), 0);

    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, red())]]);
    let after_stroke = log.memory_usage();
    assert!(after_stroke > 0);

    fill(&mut log, &mut stack, 3, 3, green());
    let after_fill = log.memory_usage();
    assert!(after_fill > after_stroke);

    // undone records still count until redo is cleared
    log.undo(&mut stack).unwrap();
    assert!(log.memory_usage() >= after_stroke);

    log.clear();
    assert_eq!(log.memory_usage(), 0);
}

// ============================================================================
// Recording state machine
// ============================================================================

#[test]
fn test_begin_twice_is_rejected() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    let id = stack.active().id;
    let grid = stack.grid_mut(0).unwrap();

    log.begin(RecordStrategy::Diff, id, grid, "a").unwrap();
    assert_eq!(log.begin(RecordStrategy::Snapshot, id, grid, "b"), Err(EngineError::OperationInProgress));
    assert_eq!(log.undo(&mut stack), Err(EngineError::OperationInProgress));
}

#[test]
fn test_seal_without_begin_is_rejected() {
    let stack = create_test_stack();
    let mut log = TransactionLog::default();
    assert_eq!(log.seal(&stack), Err(EngineError::NoOperationInProgress));
    assert_eq!(log.record(&[]), Err(EngineError::NoOperationInProgress));
}

#[test]
fn test_rollback_reverts_open_diff() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    let id = stack.active().id;
    let grid = stack.grid_mut(0).unwrap();

    log.begin(RecordStrategy::Diff, id, grid, "Stroke").unwrap();
    let applied = grid.apply_batch(&[CellWrite::new(0, 0, red()), CellWrite::new(1, 1, red())]);
    log.record(&applied).unwrap();
    log.rollback(&mut stack).unwrap();

    assert!(stack.active().grid().is_blank());
    assert!(!log.is_recording());
    assert!(!log.can_undo());
}

// ============================================================================
// Locked layers and consistency errors
// ============================================================================

#[test]
fn test_undo_onto_locked_layer_is_declined_and_kept() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, red())]]);
    stack.set_locked(0, true).unwrap();

    assert_eq!(log.undo(&mut stack), Err(EngineError::LayerLocked { index: 0 }));
    assert_eq!(stack.active().grid().get(0, 0), red());
    assert!(log.can_undo());

    stack.set_locked(0, false).unwrap();
    log.undo(&mut stack).unwrap();
    assert!(stack.active().grid().is_blank());
}

#[test]
fn test_snapshot_size_mismatch_aborts_without_partial_apply() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, red())]]);
    let before = active_grid(&stack);

    log.push(UndoRecord {
        layer: stack.active().id,
        description: "Corrupt".to_string(),
        kind: RecordKind::Snapshot(PixelGrid::new(2, 2)),
    });

    assert_eq!(log.undo(&mut stack), Err(EngineError::SizeMismatch { expected: (4, 4), found: (2, 2) }));
    assert_eq!(active_grid(&stack), before);
    // the corrupt record is gone; the earlier stroke is next
    assert_eq!(log.undo(&mut stack).unwrap().map(|s| s.description), Some("Stroke".to_string()));
}

#[test]
fn test_diff_outside_grid_aborts_without_partial_apply() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    let before = active_grid(&stack);

    log.push(UndoRecord {
        layer: stack.active().id,
        description: "Corrupt".to_string(),
        kind: RecordKind::Diff(vec![
            regionpaint::CellChange { x: 0, y: 0, previous: red(), new: Cell::EMPTY },
            regionpaint::CellChange { x: 10, y: 0, previous: red(), new: Cell::EMPTY },
        ]),
    });

    assert_eq!(log.undo(&mut stack), Err(EngineError::CoordinateOutOfRange { x: 10, y: 0 }));
    assert_eq!(active_grid(&stack), before);
}

#[test]
fn test_forget_layer_drops_its_records() {
    let mut stack = create_test_stack();
    let mut log = TransactionLog::default();
    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, red())]]);
    stack.create(None);
    stroke(&mut log, &mut stack, &[&[CellWrite::new(0, 0, blue())]]);

    let removed = stack.delete(1).unwrap();
    log.forget_layer(removed.id);

    assert_eq!(log.undo_count(), 1);
    log.undo(&mut stack).unwrap();
    assert!(stack.get(0).unwrap().grid().is_blank());
}
