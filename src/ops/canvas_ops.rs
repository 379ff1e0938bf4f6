// ============================================================================
// CANVAS-LEVEL OPERATIONS: add / delete / duplicate / merge layers
// ============================================================================
//
// Merge-down is recorded in the undo history; undoing it restores the
// target's pixels and the merged layer.  Delete and flatten are not undoable
// and drop the history records of the layers they destroy.

use crate::components::history::{RecordKind, UndoRecord};
use crate::error::{EngineError, EngineWarning, Result};
use crate::layers::BlendMode;
use crate::project::Document;

/// Add a new empty layer above the active layer.
pub fn add_layer(doc: &mut Document, name: Option<String>) -> usize {
    let idx = doc.layers.create(name);
    log::debug!("added layer {} at index {}", doc.layers.active().name, idx);
    doc.mark_dirty();
    idx
}

/// Delete a layer (must keep at least one layer).
pub fn delete_layer(doc: &mut Document, index: usize) -> Result<()> {
    let removed = doc.layers.delete(index)?;
    doc.history.forget_layer(removed.id);
    log::debug!("deleted layer '{}'", removed.name);
    doc.mark_dirty();
    Ok(())
}

/// Duplicate a layer directly above itself.
pub fn duplicate_layer(doc: &mut Document, index: usize) -> Result<usize> {
    let new_idx = doc.layers.duplicate(index)?;
    doc.mark_dirty();
    Ok(new_idx)
}

/// Composite `source` onto `target` with the source's own opacity and blend
/// mode, then remove `source`.  Returns the target's new index and any history
/// eviction caused by recording the merge.
pub fn merge_down(doc: &mut Document, source: usize, target: usize) -> Result<(usize, Option<EngineWarning>)> {
    if doc.history.is_recording() {
        return Err(EngineError::OperationInProgress);
    }
    let before = doc.layers.get(target).map(|l| (l.id, l.grid().clone()));
    let source_layer = doc.layers.get(source).cloned();
    let new_target = doc.layers.merge_down(source, target, doc.backend.as_ref())?;
    doc.mark_dirty();

    let (Some((target_id, before)), Some(source_layer)) = (before, source_layer) else {
        return Ok((new_target, None));
    };
    // an undone merge brings the layer back without its earlier strokes
    doc.history.forget_layer(source_layer.id);
    let record = UndoRecord {
        layer: target_id,
        description: "Merge Down".to_string(),
        kind: RecordKind::LayerMerged { before, source: Box::new(source_layer), source_index: source },
    };
    Ok((new_target, doc.history.push(record)))
}

/// Collapse every layer into a single composited layer.
pub fn flatten(doc: &mut Document) {
    let ids: Vec<_> = doc.layers.iter().map(|l| l.id).collect();
    doc.layers.flatten(doc.backend.as_ref());
    for id in ids {
        doc.history.forget_layer(id);
    }
    doc.mark_dirty();
}

pub fn move_layer(doc: &mut Document, from: usize, to: usize) -> Result<()> {
    doc.layers.move_layer(from, to)?;
    doc.mark_dirty();
    Ok(())
}

pub fn set_active(doc: &mut Document, index: usize) -> Result<()> {
    doc.layers.set_active(index)
}

pub fn set_visibility(doc: &mut Document, index: usize, visible: bool) -> Result<()> {
    doc.layers.set_visibility(index, visible)?;
    doc.mark_dirty();
    Ok(())
}

pub fn set_opacity(doc: &mut Document, index: usize, opacity: f32) -> Result<()> {
    doc.layers.set_opacity(index, opacity)?;
    doc.mark_dirty();
    Ok(())
}

pub fn set_blend_mode(doc: &mut Document, index: usize, mode: BlendMode) -> Result<()> {
    doc.layers.set_blend_mode(index, mode)?;
    doc.mark_dirty();
    Ok(())
}

pub fn set_locked(doc: &mut Document, index: usize, locked: bool) -> Result<()> {
    doc.layers.set_locked(index, locked)?;
    doc.mark_dirty();
    Ok(())
}

pub fn rename_layer(doc: &mut Document, index: usize, name: String) -> Result<()> {
    doc.layers.rename(index, name)?;
    doc.mark_dirty();
    Ok(())
}
