use std::collections::{HashMap, VecDeque};

use crate::canvas::{CellChange, PixelGrid};
use crate::error::{EngineError, EngineWarning, Result};
use crate::layers::{Layer, LayerId, LayerStack};

/// Default number of undo steps kept.
pub const DEFAULT_MAX_UNDO_STEPS: usize = 50;

// ============================================================================
// UNDO RECORDS
// ============================================================================

/// How an operation is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStrategy {
    /// Copy the whole grid before the operation (fills, deletes, imports).
    Snapshot,
    /// Accumulate per-cell changes as they are applied (freehand strokes).
    Diff,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordKind {
    /// Full copy of the grid to restore.
    Snapshot(PixelGrid),
    /// Coordinate-unique cell changes.
    Diff(Vec<CellChange>),
    /// A merged-away layer.  Undo restores the target's pixels to `before`
    /// and puts `source` back at `source_index`.
    LayerMerged { before: PixelGrid, source: Box<Layer>, source_index: usize },
    /// An undone merge.  Redo restores the target's pixels to `after` and
    /// removes the `source` layer again.
    LayerUnmerged { after: PixelGrid, source: LayerId },
}

/// One sealed logical operation.  Never mutated after sealing.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoRecord {
    pub layer: LayerId,
    pub description: String,
    pub kind: RecordKind,
}

impl UndoRecord {
    pub fn strategy(&self) -> RecordStrategy {
        match self.kind {
            RecordKind::Diff(_) => RecordStrategy::Diff,
            _ => RecordStrategy::Snapshot,
        }
    }

    pub fn memory_size(&self) -> usize {
        let payload = match &self.kind {
            RecordKind::Snapshot(grid) => grid.memory_bytes(),
            RecordKind::Diff(changes) => changes.len() * std::mem::size_of::<CellChange>(),
            RecordKind::LayerMerged { before, source, .. } => before.memory_bytes() + source.grid().memory_bytes(),
            RecordKind::LayerUnmerged { after, .. } => after.memory_bytes(),
        };
        payload + self.description.len()
    }

    /// Whether this record refers to `layer`, as its target or as a merge source.
    fn touches(&self, layer: LayerId) -> bool {
        self.layer == layer || matches!(self.kind, RecordKind::LayerUnmerged { source, .. } if source == layer)
    }

    /// Make sure replaying this record cannot partially apply.
    fn validate(&self, layers: &LayerStack, grid: &PixelGrid) -> Result<()> {
        let check_size = |stored: &PixelGrid| {
            if stored.dimensions() != grid.dimensions() {
                return Err(EngineError::SizeMismatch {
                    expected: grid.dimensions(),
                    found: stored.dimensions(),
                });
            }
            Ok(())
        };
        match &self.kind {
            RecordKind::Snapshot(snapshot) => check_size(snapshot)?,
            RecordKind::Diff(changes) => {
                if let Some(c) = changes.iter().find(|c| !grid.contains(c.x, c.y)) {
                    return Err(EngineError::CoordinateOutOfRange { x: c.x, y: c.y });
                }
            }
            RecordKind::LayerMerged { before, source, source_index } => {
                check_size(before)?;
                check_size(source.grid())?;
                if *source_index > layers.len() {
                    return Err(EngineError::LayerOutOfRange { index: *source_index, len: layers.len() });
                }
            }
            RecordKind::LayerUnmerged { after, source } => {
                check_size(after)?;
                if layers.index_of(*source).is_none() {
                    return Err(EngineError::LayerMissing(*source));
                }
            }
        }
        Ok(())
    }
}

/// An operation between `begin` and `seal`.
enum OpenRecord {
    Snapshot { layer: LayerId, description: String, before: PixelGrid },
    Diff {
        layer: LayerId,
        description: String,
        changes: Vec<CellChange>,
        /// (x, y) → position in `changes`, for coalescing.
        index: HashMap<(i32, i32), usize>,
    },
}

impl OpenRecord {
    fn layer(&self) -> LayerId {
        match self {
            OpenRecord::Snapshot { layer, .. } | OpenRecord::Diff { layer, .. } => *layer,
        }
    }
}

/// What `seal` did with the open operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SealOutcome {
    /// False when the operation turned out to change nothing.
    pub recorded: bool,
    pub warning: Option<EngineWarning>,
}

/// What an applied undo or redo step did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutcome {
    pub description: String,
    /// Set when a redo pushed the undo stack past its depth bound.
    pub warning: Option<EngineWarning>,
}

#[derive(Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

// ============================================================================
// TRANSACTION LOG - bounded linear undo/redo history
// ============================================================================

pub struct TransactionLog {
    undo_stack: VecDeque<UndoRecord>,
    redo_stack: VecDeque<UndoRecord>,
    max_history_size: usize,
    open: Option<OpenRecord>,
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNDO_STEPS)
    }
}

impl TransactionLog {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            open: None,
        }
    }

    // ---- recording ----------------------------------------------------------

    /// Start recording an operation against `layer`.  For the snapshot
    /// strategy `grid` is copied now, before any change is applied.
    pub fn begin(
        &mut self,
        strategy: RecordStrategy,
        layer: LayerId,
        grid: &PixelGrid,
        description: impl Into<String>,
    ) -> Result<()> {
        if self.open.is_some() {
            return Err(EngineError::OperationInProgress);
        }
        let description = description.into();
        self.open = Some(match strategy {
            RecordStrategy::Snapshot => OpenRecord::Snapshot { layer, description, before: grid.clone() },
            RecordStrategy::Diff => OpenRecord::Diff {
                layer,
                description,
                changes: Vec::new(),
                index: HashMap::new(),
            },
        });
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.open.is_some()
    }

    pub fn recording_layer(&self) -> Option<LayerId> {
        self.open.as_ref().map(|o| o.layer())
    }

    /// Feed applied changes into the open operation.  Repeated writes to a
    /// coordinate keep the first `previous` and the latest `new`.  Snapshot
    /// operations already hold their baseline and ignore the changes.
    pub fn record(&mut self, applied: &[CellChange]) -> Result<()> {
        match self.open.as_mut() {
            None => Err(EngineError::NoOperationInProgress),
            Some(OpenRecord::Snapshot { .. }) => Ok(()),
            Some(OpenRecord::Diff { changes, index, .. }) => {
                for c in applied {
                    match index.get(&(c.x, c.y)) {
                        Some(&pos) => changes[pos].new = c.new,
                        None => {
                            index.insert((c.x, c.y), changes.len());
                            changes.push(*c);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Close the open operation and push it onto the undo stack.  An
    /// operation that changed nothing is discarded and leaves redo intact.
    pub fn seal(&mut self, layers: &LayerStack) -> Result<SealOutcome> {
        let open = self.open.take().ok_or(EngineError::NoOperationInProgress)?;
        let record = match open {
            OpenRecord::Snapshot { layer, description, before } => {
                let Some(current) = layers.by_id(layer) else {
                    log::error!("seal: layer {} vanished while recording '{}'", layer, description);
                    return Err(EngineError::LayerMissing(layer));
                };
                if *current.grid() == before {
                    return Ok(SealOutcome::default());
                }
                UndoRecord { layer, description, kind: RecordKind::Snapshot(before) }
            }
            OpenRecord::Diff { layer, description, changes, .. } => {
                let changes: Vec<CellChange> = changes.into_iter().filter(|c| c.previous != c.new).collect();
                if changes.is_empty() {
                    return Ok(SealOutcome::default());
                }
                UndoRecord { layer, description, kind: RecordKind::Diff(changes) }
            }
        };
        Ok(SealOutcome { recorded: true, warning: self.push(record) })
    }

    /// Discard the open operation without touching the grid.
    pub fn cancel(&mut self) -> bool {
        self.open.take().is_some()
    }

    /// Revert whatever the open operation applied, then discard it.
    pub fn rollback(&mut self, layers: &mut LayerStack) -> Result<()> {
        let open = self.open.take().ok_or(EngineError::NoOperationInProgress)?;
        let layer_id = open.layer();
        let layer = layers.by_id_mut(layer_id).ok_or(EngineError::LayerMissing(layer_id))?;
        let grid = layer.grid_mut_unlocked();
        match open {
            OpenRecord::Snapshot { before, .. } => grid.restore_from(&before)?,
            OpenRecord::Diff { changes, .. } => {
                grid.apply_changes(&changes, false);
            }
        }
        Ok(())
    }

    /// Push an already-sealed record.  New history invalidates redo.
    pub fn push(&mut self, record: UndoRecord) -> Option<EngineWarning> {
        self.redo_stack.clear();
        self.undo_stack.push_back(record);
        self.prune()
    }

    fn prune(&mut self) -> Option<EngineWarning> {
        let mut dropped = 0;
        while self.undo_stack.len() > self.max_history_size {
            self.undo_stack.pop_front();
            dropped += 1;
        }
        // the front of the redo stack is the step furthest from the present
        while self.redo_stack.len() > self.max_history_size {
            self.redo_stack.pop_front();
            dropped += 1;
        }
        if dropped == 0 {
            return None;
        }
        log::warn!("history depth {} exceeded; dropped {} oldest step(s)", self.max_history_size, dropped);
        Some(EngineWarning::HistoryEvicted { dropped })
    }

    // ---- replay -------------------------------------------------------------

    /// Undo the most recent operation.  `Ok(None)` when there is nothing to undo.
    pub fn undo(&mut self, layers: &mut LayerStack) -> Result<Option<StepOutcome>> {
        self.step(layers, Direction::Undo)
    }

    /// Re-apply the most recently undone operation.
    pub fn redo(&mut self, layers: &mut LayerStack) -> Result<Option<StepOutcome>> {
        self.step(layers, Direction::Redo)
    }

    fn step(&mut self, layers: &mut LayerStack, dir: Direction) -> Result<Option<StepOutcome>> {
        if self.open.is_some() {
            return Err(EngineError::OperationInProgress);
        }
        let source = match dir {
            Direction::Undo => &mut self.undo_stack,
            Direction::Redo => &mut self.redo_stack,
        };
        let Some(record) = source.pop_back() else {
            return Ok(None);
        };

        let Some(index) = layers.index_of(record.layer) else {
            log::error!("history: layer {} for '{}' no longer exists; record dropped", record.layer, record.description);
            return Err(EngineError::LayerMissing(record.layer));
        };
        if layers.get(index).is_some_and(|l| l.locked) {
            log::debug!("history: layer {} is locked, '{}' declined", index, record.description);
            source.push_back(record);
            return Err(EngineError::LayerLocked { index });
        }
        let validated = match layers.get(index) {
            Some(target) => record.validate(layers, target.grid()),
            None => Err(EngineError::LayerMissing(record.layer)),
        };
        if let Err(e) = validated {
            log::error!("history: cannot apply '{}': {}; record dropped", record.description, e);
            return Err(e);
        }

        // Capture the current state as the opposite stack's restore point,
        // then restore.
        let UndoRecord { layer, description, kind } = record;
        let inverse = match kind {
            RecordKind::Snapshot(snapshot) => {
                let grid = layers.grid_mut(index)?;
                let current = grid.clone();
                grid.restore_from(&snapshot)?;
                RecordKind::Snapshot(current)
            }
            RecordKind::Diff(changes) => {
                layers.grid_mut(index)?.apply_changes(&changes, matches!(dir, Direction::Redo));
                RecordKind::Diff(changes)
            }
            RecordKind::LayerMerged { before, source, source_index } => {
                let grid = layers.grid_mut(index)?;
                let after = grid.clone();
                grid.restore_from(&before)?;
                let source_id = source.id;
                layers.insert_layer(source_index, *source);
                RecordKind::LayerUnmerged { after, source: source_id }
            }
            RecordKind::LayerUnmerged { after, source } => {
                let grid = layers.grid_mut(index)?;
                let before = grid.clone();
                grid.restore_from(&after)?;
                let source_index = layers.index_of(source).ok_or(EngineError::LayerMissing(source))?;
                let removed = layers.delete(source_index)?;
                if let Some(target) = layers.index_of(layer) {
                    layers.set_active(target)?;
                }
                RecordKind::LayerMerged { before, source: Box::new(removed), source_index }
            }
        };
        let inverse = UndoRecord { layer, description: description.clone(), kind: inverse };
        match dir {
            Direction::Undo => self.redo_stack.push_back(inverse),
            Direction::Redo => self.undo_stack.push_back(inverse),
        }
        Ok(Some(StepOutcome { description, warning: self.prune() }))
    }

    // ---- maintenance --------------------------------------------------------

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.open = None;
    }

    /// Drop every record targeting a deleted layer.
    pub fn forget_layer(&mut self, layer: LayerId) {
        self.undo_stack.retain(|r| !r.touches(layer));
        self.redo_stack.retain(|r| !r.touches(layer));
        if self.open.as_ref().is_some_and(|o| o.layer() == layer) {
            self.open = None;
        }
    }

    /// Change the depth bound, trimming the oldest entries of both stacks.
    pub fn set_max_depth(&mut self, depth: usize) -> Option<EngineWarning> {
        self.max_history_size = depth.max(1);
        self.prune()
    }

    pub fn max_depth(&self) -> usize {
        self.max_history_size
    }

    // ---- queries ------------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|r| r.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(|r| r.description.as_str())
    }

    /// Most recent first.
    pub fn undo_history(&self) -> Vec<&str> {
        self.undo_stack.iter().rev().map(|r| r.description.as_str()).collect()
    }

    /// The record `undo` would apply next.
    pub fn peek_undo(&self) -> Option<&UndoRecord> {
        self.undo_stack.back()
    }

    pub fn memory_usage(&self) -> usize {
        self.undo_stack.iter().chain(self.redo_stack.iter()).map(|r| r.memory_size()).sum()
    }
}
