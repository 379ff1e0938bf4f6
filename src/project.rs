use std::path::PathBuf;

use uuid::Uuid;

use crate::canvas::{Cell, CellWrite, PixelGrid};
use crate::components::history::{RecordStrategy, StepOutcome, TransactionLog};
use crate::compositor::{detect_backend, CompositeBackend};
use crate::error::{EngineError, EngineWarning, Result};
use crate::layers::LayerStack;
use crate::ops::fill::FloodFill;
use crate::regions::RegionTable;
use crate::settings::EngineSettings;

/// What an edit did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditOutcome {
    /// Number of cells whose value changed.
    pub changed: usize,
    /// Non-fatal conditions the operator should see.
    pub warnings: Vec<EngineWarning>,
}

impl EditOutcome {
    fn push_warning(&mut self, warning: Option<EngineWarning>) {
        if let Some(w) = warning {
            self.warnings.push(w);
        }
    }
}

/// Single open document: layers, history and region table.
///
/// Created on new/open, disposed by [`Document::close`].  Every mutation of
/// layer pixels goes through this type so that history stays consistent.
pub struct Document {
    pub id: Uuid,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,
    /// `None` for unsaved/untitled maps.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    pub(crate) layers: LayerStack,
    pub(crate) history: TransactionLog,
    pub(crate) regions: RegionTable,
    pub(crate) settings: EngineSettings,
    fill: FloodFill,
    pub(crate) backend: Box<dyn CompositeBackend>,
}

impl Document {
    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32, settings: EngineSettings) -> Result<Self> {
        check_dimensions(width, height, &settings)?;
        let name = format!("Untitled-{}", untitled_counter);
        Ok(Self::from_parts(name, LayerStack::new(width, height), RegionTable::new(), settings))
    }

    /// Assemble a document from fully-parsed parts (import path).
    pub fn from_parts(name: String, mut layers: LayerStack, regions: RegionTable, settings: EngineSettings) -> Self {
        layers.set_opacity_epsilon(settings.opacity_epsilon);
        log::info!("document '{}' opened ({}x{}, {} layer(s))", name, layers.width(), layers.height(), layers.len());
        Self {
            id: Uuid::new_v4(),
            name,
            path: None,
            is_dirty: false,
            history: TransactionLog::new(settings.max_undo_steps),
            fill: FloodFill::new(settings.fill_cell_cap),
            layers,
            regions,
            settings,
            backend: detect_backend(false),
        }
    }

    /// Dispose the document, releasing layers and history.
    pub fn close(self) {
        log::info!(
            "document '{}' closed ({} undo / {} redo step(s) released)",
            self.name,
            self.history.undo_count(),
            self.history.redo_count()
        );
    }

    // ---- accessors ----------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.layers.width()
    }

    pub fn height(&self) -> u32 {
        self.layers.height()
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    pub fn history(&self) -> &TransactionLog {
        &self.history
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Region table edits are explicit operator actions and are not recorded.
    pub fn regions_mut(&mut self) -> &mut RegionTable {
        self.is_dirty = true;
        &mut self.regions
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn apply_settings(&mut self, settings: EngineSettings) -> Option<EngineWarning> {
        self.fill = FloodFill::new(settings.fill_cell_cap);
        self.layers.set_opacity_epsilon(settings.opacity_epsilon);
        let warning = self.history.set_max_depth(settings.max_undo_steps);
        self.settings = settings;
        warning
    }

    pub fn set_backend(&mut self, backend: Box<dyn CompositeBackend>) {
        log::info!("compositor backend: {}", backend.name());
        self.backend = backend;
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Read a cell of the active layer.
    pub fn get(&self, x: i32, y: i32) -> Cell {
        self.layers.active().grid().get(x, y)
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
        }
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    // ---- strokes (diff-recorded) -------------------------------------------

    /// Start a freehand stroke on the active layer.
    pub fn begin_stroke(&mut self, description: &str) -> Result<()> {
        let index = self.layers.active_index();
        let layer_id = self.layers.active().id;
        let grid = self.layers.grid_mut(index)?;
        self.history.begin(RecordStrategy::Diff, layer_id, grid, description)
    }

    /// Apply writes to the layer being recorded.  Outside a stroke the writes
    /// go to the active layer as a one-shot operation.
    pub fn paint(&mut self, writes: &[CellWrite]) -> Result<EditOutcome> {
        if !self.history.is_recording() {
            self.begin_stroke("Paint")?;
            let applied = match self.paint(writes) {
                Ok(o) => o,
                Err(e) => {
                    self.history.cancel();
                    return Err(e);
                }
            };
            let mut outcome = self.end_stroke()?;
            outcome.changed = applied.changed;
            return Ok(outcome);
        }

        let layer_id = self.history.recording_layer().ok_or(EngineError::NoOperationInProgress)?;
        let index = self.layers.index_of(layer_id).ok_or(EngineError::LayerMissing(layer_id))?;
        let grid = self.layers.grid_mut(index)?;
        let applied = grid.apply_batch(writes);
        self.history.record(&applied)?;
        if !applied.is_empty() {
            self.is_dirty = true;
        }
        Ok(EditOutcome { changed: applied.len(), warnings: Vec::new() })
    }

    pub fn set_cell(&mut self, x: i32, y: i32, cell: Cell) -> Result<EditOutcome> {
        self.paint(&[CellWrite::new(x, y, cell)])
    }

    /// Seal the open stroke into one history entry.
    pub fn end_stroke(&mut self) -> Result<EditOutcome> {
        let seal = self.history.seal(&self.layers)?;
        let mut outcome = EditOutcome::default();
        outcome.push_warning(seal.warning);
        Ok(outcome)
    }

    /// Abandon the open stroke, reverting what it painted.
    pub fn cancel_stroke(&mut self) -> Result<()> {
        self.history.rollback(&mut self.layers)
    }

    // ---- bulk edits (snapshot-recorded) ------------------------------------

    /// Flood-fill the active layer from `(x, y)`.
    pub fn fill(&mut self, x: i32, y: i32, fill_cell: Cell, tolerance: Option<f32>) -> Result<EditOutcome> {
        let tolerance = tolerance.unwrap_or(self.settings.default_tolerance);
        let fill = self.fill;
        self.snapshot_op("Fill", |grid| {
            let result = fill.fill(grid, x, y, fill_cell, tolerance);
            (result.changes.len(), result.warning)
        })
    }

    /// Flood-erase the active layer from `(x, y)`.
    pub fn erase_fill(&mut self, x: i32, y: i32, tolerance: Option<f32>) -> Result<EditOutcome> {
        let tolerance = tolerance.unwrap_or(self.settings.default_tolerance);
        let fill = self.fill;
        self.snapshot_op("Erase Fill", |grid| {
            let result = fill.erase(grid, x, y, tolerance);
            (result.changes.len(), result.warning)
        })
    }

    /// Clear a set of cells (selection delete).
    pub fn delete_cells(&mut self, coords: &[(i32, i32)]) -> Result<EditOutcome> {
        let writes: Vec<CellWrite> = coords.iter().map(|&(x, y)| CellWrite::new(x, y, Cell::EMPTY)).collect();
        self.snapshot_op("Delete Selection", |grid| (grid.apply_batch(&writes).len(), None))
    }

    /// Replace the active layer's cells wholesale (import).
    pub fn replace_active_grid(&mut self, grid: PixelGrid) -> Result<EditOutcome> {
        if grid.dimensions() != (self.width(), self.height()) {
            return Err(EngineError::SizeMismatch {
                expected: (self.width(), self.height()),
                found: grid.dimensions(),
            });
        }
        self.snapshot_op("Import", |target| {
            let changed = target.cells().iter().zip(grid.cells()).filter(|(a, b)| a != b).count();
            match target.restore_from(&grid) {
                Ok(()) => (changed, None),
                Err(e) => {
                    log::error!("import: {}", e);
                    (0, None)
                }
            }
        })
    }

    fn snapshot_op<F>(&mut self, description: &str, op: F) -> Result<EditOutcome>
    where
        F: FnOnce(&mut PixelGrid) -> (usize, Option<EngineWarning>),
    {
        if self.history.is_recording() {
            return Err(EngineError::OperationInProgress);
        }
        let index = self.layers.active_index();
        let layer_id = self.layers.active().id;
        let grid = self.layers.grid_mut(index)?;
        self.history.begin(RecordStrategy::Snapshot, layer_id, grid, description)?;
        let (changed, warning) = op(grid);

        let mut outcome = EditOutcome { changed, warnings: Vec::new() };
        outcome.push_warning(warning);
        let seal = self.history.seal(&self.layers)?;
        outcome.push_warning(seal.warning);
        if outcome.changed > 0 {
            self.is_dirty = true;
        }
        Ok(outcome)
    }

    // ---- history ------------------------------------------------------------

    /// Undo the last operation.  A history eviction caused by the step is
    /// reported in the returned [`StepOutcome`].
    pub fn undo(&mut self) -> Result<Option<StepOutcome>> {
        let done = self.history.undo(&mut self.layers)?;
        if done.is_some() {
            self.is_dirty = true;
        }
        Ok(done)
    }

    pub fn redo(&mut self) -> Result<Option<StepOutcome>> {
        let done = self.history.redo(&mut self.layers)?;
        if done.is_some() {
            self.is_dirty = true;
        }
        Ok(done)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ---- compositing --------------------------------------------------------

    /// The flattened view, recomputed only when a layer changed.
    pub fn composite(&mut self) -> &PixelGrid {
        self.layers.composite_cached(self.backend.as_ref())
    }
}

pub(crate) fn check_dimensions(width: u32, height: u32, settings: &EngineSettings) -> Result<()> {
    if width == 0 || height == 0 || width > settings.max_canvas_dim || height > settings.max_canvas_dim {
        return Err(EngineError::InvalidDimensions { width, height });
    }
    Ok(())
}
