use std::fmt;

use uuid::Uuid;

use crate::canvas::PixelGrid;
use crate::compositor::CompositeBackend;
use crate::error::{EngineError, Result};

/// Layers with opacity at or below this are treated as invisible.
pub const DEFAULT_OPACITY_EPSILON: f32 = 0.001;

// ============================================================================
// BLEND MODE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Add,
    Subtract,
}

impl BlendMode {
    /// Returns all blend modes for UI display
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Add,
            BlendMode::Subtract,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Add => "Add",
            BlendMode::Subtract => "Subtract",
        }
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
            BlendMode::Add => 4,
            BlendMode::Subtract => 5,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            4 => BlendMode::Add,
            5 => BlendMode::Subtract,
            _ => BlendMode::Normal,
        }
    }
}

// ============================================================================
// LAYER
// ============================================================================

/// Stable identity of a layer, independent of its position in the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    grid: PixelGrid,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32) -> Self {
        Self::with_grid(name, PixelGrid::new(width, height))
    }

    pub fn with_grid(name: String, grid: PixelGrid) -> Self {
        Self {
            id: LayerId::new(),
            name,
            visible: true,
            locked: false,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            grid,
        }
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    /// Grid access that bypasses the lock (merge-down target, history replay).
    pub(crate) fn grid_mut_unlocked(&mut self) -> &mut PixelGrid {
        &mut self.grid
    }

    fn contributes(&self, epsilon: f32) -> bool {
        self.visible && self.opacity > epsilon
    }
}

// ============================================================================
// LAYER STACK
// ============================================================================

/// Ordered layers, index 0 at the bottom.  Always holds at least one layer.
pub struct LayerStack {
    layers: Vec<Layer>,
    active_layer_index: usize,
    width: u32,
    height: u32,
    opacity_epsilon: f32,
    composite_cache: Option<PixelGrid>,
    /// Inputs the cached composite was built from.
    composite_key: Vec<CompositeKey>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompositeKey {
    id: LayerId,
    generation: u64,
    visible: bool,
    opacity: f32,
    blend_mode: BlendMode,
}

impl LayerStack {
    pub fn new(width: u32, height: u32) -> Self {
        let background = Layer::new("Background".to_string(), width, height);
        Self {
            layers: vec![background],
            active_layer_index: 0,
            width,
            height,
            opacity_epsilon: DEFAULT_OPACITY_EPSILON,
            composite_cache: None,
            composite_key: Vec::new(),
        }
    }

    /// Build a stack from existing layers.  Every grid must be `width × height`.
    pub fn from_layers(width: u32, height: u32, layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(EngineError::LastLayer);
        }
        if let Some(bad) = layers.iter().find(|l| l.grid.dimensions() != (width, height)) {
            return Err(EngineError::SizeMismatch {
                expected: (width, height),
                found: bad.grid.dimensions(),
            });
        }
        Ok(Self {
            layers,
            active_layer_index: 0,
            width,
            height,
            opacity_epsilon: DEFAULT_OPACITY_EPSILON,
            composite_cache: None,
            composite_key: Vec::new(),
        })
    }

    pub fn set_opacity_epsilon(&mut self, epsilon: f32) {
        self.opacity_epsilon = epsilon.max(0.0);
    }

    // ---- queries ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn active_index(&self) -> usize {
        self.active_layer_index
    }

    pub fn active(&self) -> &Layer {
        &self.layers[self.active_layer_index]
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub(crate) fn by_id_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn by_id(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.layers.len() {
            return Err(EngineError::LayerOutOfRange { index, len: self.layers.len() });
        }
        Ok(())
    }

    /// Mutable grid for painting; declined for locked layers.
    pub fn grid_mut(&mut self, index: usize) -> Result<&mut PixelGrid> {
        self.check(index)?;
        let layer = &mut self.layers[index];
        if layer.locked {
            log::debug!("grid_mut: layer {} ({}) is locked", index, layer.name);
            return Err(EngineError::LayerLocked { index });
        }
        Ok(&mut layer.grid)
    }

    // ---- structure ----------------------------------------------------------

    /// Insert a new empty layer above the active one and make it active.
    pub fn create(&mut self, name: Option<String>) -> usize {
        let idx = (self.active_layer_index + 1).min(self.layers.len());
        let name = name.unwrap_or_else(|| format!("Layer {}", self.layers.len() + 1));
        self.layers.insert(idx, Layer::new(name, self.width, self.height));
        self.active_layer_index = idx;
        idx
    }

    /// Remove a layer, refusing to remove the last one.
    pub fn delete(&mut self, index: usize) -> Result<Layer> {
        self.check(index)?;
        if self.layers.len() <= 1 {
            return Err(EngineError::LastLayer);
        }
        let removed = self.layers.remove(index);
        if self.active_layer_index > index || self.active_layer_index >= self.layers.len() {
            self.active_layer_index = self.active_layer_index.saturating_sub(1);
        }
        Ok(removed)
    }

    /// Copy a layer (pixels and properties) directly above it.
    pub fn duplicate(&mut self, index: usize) -> Result<usize> {
        self.check(index)?;
        let src = &self.layers[index];
        let mut dup = Layer::with_grid(format!("{} Copy", src.name), src.grid.clone());
        dup.visible = src.visible;
        dup.locked = src.locked;
        dup.opacity = src.opacity;
        dup.blend_mode = src.blend_mode;
        let new_idx = index + 1;
        self.layers.insert(new_idx, dup);
        self.active_layer_index = new_idx;
        Ok(new_idx)
    }

    /// Blend the source layer alone onto the target layer's grid using the
    /// source's opacity and blend mode, then delete the source.  The target
    /// may be locked.  Returns the target's index after removal.
    pub fn merge_down(&mut self, source: usize, target: usize, backend: &dyn CompositeBackend) -> Result<usize> {
        self.check(source)?;
        self.check(target)?;
        if source == target {
            return Err(EngineError::SameLayer);
        }
        if self.layers.len() <= 1 {
            return Err(EngineError::LastLayer);
        }
        let (src_grid, mode, opacity, contributes) = {
            let src = &self.layers[source];
            (src.grid.clone(), src.blend_mode, src.opacity, src.contributes(self.opacity_epsilon))
        };
        if contributes {
            backend.blend_onto(self.layers[target].grid_mut_unlocked(), &src_grid, mode, opacity);
        }
        self.delete(source)?;
        let new_target = if target > source { target - 1 } else { target };
        self.active_layer_index = new_target;
        Ok(new_target)
    }

    /// Put a previously removed layer back at `index` and make it active.
    pub(crate) fn insert_layer(&mut self, index: usize, layer: Layer) -> usize {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.active_layer_index = index;
        index
    }

    /// Reorder: remove at `from`, insert at `to`.  The moved layer becomes active.
    pub fn move_layer(&mut self, from: usize, to: usize) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.active_layer_index = to;
        Ok(())
    }

    /// Replace every layer with a single one holding the composite.
    pub fn flatten(&mut self, backend: &dyn CompositeBackend) -> LayerId {
        let grid = self.composite_with(backend);
        let layer = Layer::with_grid("Background".to_string(), grid);
        let id = layer.id;
        self.layers = vec![layer];
        self.active_layer_index = 0;
        id
    }

    // ---- properties ---------------------------------------------------------

    pub fn set_active(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        self.active_layer_index = index;
        Ok(())
    }

    pub fn set_visibility(&mut self, index: usize, visible: bool) -> Result<()> {
        self.check(index)?;
        self.layers[index].visible = visible;
        Ok(())
    }

    pub fn set_opacity(&mut self, index: usize, opacity: f32) -> Result<()> {
        self.check(index)?;
        self.layers[index].opacity = if opacity.is_nan() { 1.0 } else { opacity.clamp(0.0, 1.0) };
        Ok(())
    }

    pub fn set_blend_mode(&mut self, index: usize, mode: BlendMode) -> Result<()> {
        self.check(index)?;
        self.layers[index].blend_mode = mode;
        Ok(())
    }

    pub fn set_locked(&mut self, index: usize, locked: bool) -> Result<()> {
        self.check(index)?;
        self.layers[index].locked = locked;
        Ok(())
    }

    pub fn rename(&mut self, index: usize, name: String) -> Result<()> {
        self.check(index)?;
        self.layers[index].name = name;
        Ok(())
    }

    // ---- compositing --------------------------------------------------------

    /// Flatten all visible layers bottom → top into a fresh grid.
    pub fn composite_with(&self, backend: &dyn CompositeBackend) -> PixelGrid {
        let mut result = PixelGrid::new(self.width, self.height);
        for layer in &self.layers {
            if !layer.contributes(self.opacity_epsilon) {
                continue;
            }
            backend.blend_onto(&mut result, &layer.grid, layer.blend_mode, layer.opacity);
        }
        result
    }

    /// Cached composite; recomputed only when a layer's grid or compositing
    /// property changed since the last call.
    pub fn composite_cached(&mut self, backend: &dyn CompositeBackend) -> &PixelGrid {
        let key = self.current_key();
        if self.composite_cache.is_none() || self.composite_key != key {
            self.composite_cache = Some(self.composite_with(backend));
            self.composite_key = key;
        }
        self.composite_cache.get_or_insert_with(|| PixelGrid::new(0, 0))
    }

    fn current_key(&self) -> Vec<CompositeKey> {
        self.layers
            .iter()
            .map(|l| CompositeKey {
                id: l.id,
                generation: l.grid.generation(),
                visible: l.visible,
                opacity: l.opacity,
                blend_mode: l.blend_mode,
            })
            .collect()
    }
}
