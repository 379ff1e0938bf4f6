//! Layered raster editing engine for region maps.
//!
//! Every cell of a map carries a color and the id of the region it belongs
//! to.  A [`project::Document`] owns a [`layers::LayerStack`], a bounded
//! undo/redo [`components::history::TransactionLog`] and a
//! [`regions::RegionTable`]; all pixel edits go through the document so that
//! history and the composite cache stay consistent.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod error;
pub mod io;
pub mod layers;
pub mod logger;
pub mod ops;
pub mod project;
pub mod regions;
pub mod settings;

pub use canvas::{Cell, CellChange, CellWrite, PixelGrid};
pub use error::{EngineError, EngineWarning, FormatError};
pub use layers::{BlendMode, Layer, LayerId, LayerStack};
pub use project::{Document, EditOutcome};
pub use regions::{Region, RegionTable};
pub use settings::EngineSettings;
