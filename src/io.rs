use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use image::{ImageFormat, Rgba};
use serde::{Deserialize, Serialize};

use crate::canvas::{pack_color, unpack_color, Cell, PixelGrid};
use crate::error::FormatError;
use crate::layers::{BlendMode, Layer, LayerStack};
use crate::project::{check_dimensions, Document};
use crate::regions::{Region, RegionTable};
use crate::settings::EngineSettings;

/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;

// ============================================================================
// FORMATS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapFormat {
    /// Composite + region table as JSON.
    Json,
    /// Layered binary project (bincode).
    Project,
    /// Line-oriented `color,name,id,x1,y1,...` text.
    Legacy,
    /// Composite colors only.
    Png,
}

impl MapFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MapFormat::Json => "json",
            MapFormat::Project => "rmp",
            MapFormat::Legacy => "txt",
            MapFormat::Png => "png",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(MapFormat::Json),
            "rmp" | "bin" => Some(MapFormat::Project),
            "txt" | "legacy" => Some(MapFormat::Legacy),
            "png" => Some(MapFormat::Png),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }
}

/// How cells are laid out in a [`MapExport`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CellEncoding {
    /// One `(color, region)` entry per cell.
    #[default]
    Dense,
    /// One `0xAARRGGBB` int per cell, 0 = empty; regions resolved by color.
    Packed,
}

// ============================================================================
// INTERCHANGE STRUCTURE
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub id: i32,
    pub color: [u8; 4],
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEntry {
    pub color: [u8; 4],
    pub region: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellData {
    Dense(Vec<CellEntry>),
    Packed(Vec<i32>),
}

/// Flattened map as consumed by the game runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapExport {
    pub width: u32,
    pub height: u32,
    pub regions: Vec<RegionEntry>,
    pub cells: CellData,
}

impl MapExport {
    /// Build from a (composite) grid and the region table.
    pub fn build(grid: &PixelGrid, regions: &RegionTable, encoding: CellEncoding) -> Self {
        let cells = match encoding {
            CellEncoding::Dense => CellData::Dense(
                grid.cells()
                    .iter()
                    .map(|c| CellEntry { color: c.color().0, region: c.region_id() })
                    .collect(),
            ),
            CellEncoding::Packed => CellData::Packed(grid.cells().iter().map(|c| c.to_packed()).collect()),
        };
        Self {
            width: grid.width(),
            height: grid.height(),
            regions: region_entries(regions),
            cells,
        }
    }

    /// Parse into a grid and region table.  Nothing is returned unless the
    /// whole structure is valid.
    pub fn to_grid(&self, settings: &EngineSettings) -> Result<(PixelGrid, RegionTable), FormatError> {
        check_map_dimensions(self.width, self.height, settings)?;
        let regions = regions_from_entries(&self.regions)?;
        let expected = self.width as usize * self.height as usize;
        let cells: Vec<Cell> = match &self.cells {
            CellData::Dense(entries) => {
                if entries.len() != expected {
                    return Err(FormatError::CellCountMismatch { expected, found: entries.len() });
                }
                entries.iter().map(|e| Cell::new(Rgba(e.color), e.region)).collect()
            }
            CellData::Packed(values) => {
                if values.len() != expected {
                    return Err(FormatError::CellCountMismatch { expected, found: values.len() });
                }
                values
                    .iter()
                    .map(|&v| {
                        let color = unpack_color(v);
                        let region = regions.find_by_color(color).map_or(0, |r| r.id);
                        Cell::from_packed(v, region)
                    })
                    .collect()
            }
        };
        let grid = PixelGrid::from_cells(self.width, self.height, cells)
            .map_err(|_| FormatError::CellCountMismatch { expected, found: 0 })?;
        Ok((grid, regions))
    }

    /// A single-layer document holding this map.
    pub fn into_document(&self, name: String, settings: EngineSettings) -> Result<Document, FormatError> {
        let (grid, regions) = self.to_grid(&settings)?;
        let layer = Layer::with_grid("Background".to_string(), grid);
        let layers = LayerStack::from_layers(self.width, self.height, vec![layer])
            .map_err(|e| FormatError::Parse { line: 0, message: e.to_string() })?;
        Ok(Document::from_parts(name, layers, regions, settings))
    }
}

fn region_entries(regions: &RegionTable) -> Vec<RegionEntry> {
    regions
        .iter()
        .map(|r| RegionEntry { id: r.id, color: r.color.0, name: r.name.clone() })
        .collect()
}

fn regions_from_entries(entries: &[RegionEntry]) -> Result<RegionTable, FormatError> {
    let mut table = RegionTable::new();
    for (i, e) in entries.iter().enumerate() {
        table
            .insert(Region::new(e.id, Rgba(e.color), e.name.clone()))
            .map_err(|err| FormatError::Parse { line: i + 1, message: err.to_string() })?;
    }
    Ok(table)
}

fn check_map_dimensions(width: u32, height: u32, settings: &EngineSettings) -> Result<(), FormatError> {
    check_dimensions(width, height, settings).map_err(|_| FormatError::InvalidDimensions { width, height })
}

/// Export the document's composite.
pub fn export_map(doc: &mut Document, encoding: CellEncoding) -> MapExport {
    let composite = doc.composite().clone();
    MapExport::build(&composite, doc.regions(), encoding)
}

// ============================================================================
// JSON
// ============================================================================

pub fn save_json(doc: &mut Document, path: &Path, encoding: CellEncoding) -> Result<(), FormatError> {
    let export = export_map(doc, encoding);
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &export)?;
    writer.flush()?;
    Ok(())
}

pub fn load_json(path: &Path, settings: EngineSettings) -> Result<Document, FormatError> {
    let reader = BufReader::new(File::open(path)?);
    let export: MapExport = serde_json::from_reader(reader)?;
    let mut doc = export.into_document(file_name(path), settings)?;
    doc.path = Some(path.to_path_buf());
    Ok(doc)
}

// ============================================================================
// LAYERED PROJECT FILE (bincode)
// ============================================================================

/// Magic header for the layered project format
const PROJECT_MAGIC_V1: &str = "RMP1";

#[derive(Serialize, Deserialize)]
struct ProjectFileV1 {
    magic: String,
    width: u32,
    height: u32,
    active_layer_index: usize,
    regions: Vec<RegionEntry>,
    layers: Vec<LayerDataV1>,
}

#[derive(Serialize, Deserialize)]
struct LayerDataV1 {
    name: String,
    visible: bool,
    locked: bool,
    opacity: f32,
    blend_mode: u8,
    cells: Vec<CellEntry>,
}

/// Save every layer, its properties and the region table.
pub fn save_project(doc: &Document, path: &Path) -> Result<(), FormatError> {
    let layers = doc
        .layers()
        .iter()
        .map(|l| LayerDataV1 {
            name: l.name.clone(),
            visible: l.visible,
            locked: l.locked,
            opacity: l.opacity,
            blend_mode: l.blend_mode.to_u8(),
            cells: l.grid().cells().iter().map(|c| CellEntry { color: c.color().0, region: c.region_id() }).collect(),
        })
        .collect();
    let project = ProjectFileV1 {
        magic: PROJECT_MAGIC_V1.to_string(),
        width: doc.width(),
        height: doc.height(),
        active_layer_index: doc.layers().active_index(),
        regions: region_entries(doc.regions()),
        layers,
    };
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, &project)?;
    writer.flush()?;
    Ok(())
}

pub fn load_project(path: &Path, settings: EngineSettings) -> Result<Document, FormatError> {
    let raw = std::fs::read(path)?;
    let mut doc = project_from_bytes(&raw, file_name(path), settings)?;
    doc.path = Some(path.to_path_buf());
    Ok(doc)
}

pub fn project_from_bytes(raw: &[u8], name: String, settings: EngineSettings) -> Result<Document, FormatError> {
    // bincode encodes a String as: 8-byte length prefix + UTF-8 data.
    // The magic is 4 chars, so bytes 8..12 hold it.
    if raw.len() < 12 {
        return Err(FormatError::BadMagic(String::new()));
    }
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PROJECT_MAGIC_V1 {
        return Err(FormatError::BadMagic(magic.to_string()));
    }

    let project: ProjectFileV1 = bincode::deserialize(raw)?;
    check_map_dimensions(project.width, project.height, &settings)?;
    if project.layers.is_empty() || project.layers.len() > MAX_LAYERS {
        return Err(FormatError::Parse {
            line: 0,
            message: format!("project has {} layers (1..={} allowed)", project.layers.len(), MAX_LAYERS),
        });
    }
    let regions = regions_from_entries(&project.regions)?;
    let expected = project.width as usize * project.height as usize;

    let mut layers = Vec::with_capacity(project.layers.len());
    for ld in project.layers {
        if ld.cells.len() != expected {
            return Err(FormatError::CellCountMismatch { expected, found: ld.cells.len() });
        }
        let cells = ld.cells.iter().map(|e| Cell::new(Rgba(e.color), e.region)).collect();
        let grid = PixelGrid::from_cells(project.width, project.height, cells)
            .map_err(|e| FormatError::Parse { line: 0, message: e.to_string() })?;
        let mut layer = Layer::with_grid(ld.name, grid);
        layer.visible = ld.visible;
        layer.locked = ld.locked;
        layer.opacity = ld.opacity.clamp(0.0, 1.0);
        layer.blend_mode = BlendMode::from_u8(ld.blend_mode);
        layers.push(layer);
    }

    let active = project.active_layer_index.min(layers.len() - 1);
    let mut stack = LayerStack::from_layers(project.width, project.height, layers)
        .map_err(|e| FormatError::Parse { line: 0, message: e.to_string() })?;
    stack
        .set_active(active)
        .map_err(|e| FormatError::Parse { line: 0, message: e.to_string() })?;
    Ok(Document::from_parts(name, stack, regions, settings))
}

// ============================================================================
// LEGACY LINE FORMAT
// ============================================================================
//
// One region per line:  color,name,id,x1,y1,x2,y2,...
// `color` is the signed 0xAARRGGBB int.  Names cannot contain commas.

/// Serialize the grid's pixels grouped by region.
pub fn to_legacy_string(grid: &PixelGrid, regions: &RegionTable) -> String {
    let mut out = String::new();
    for region in regions.iter() {
        out.push_str(&format!("{},{},{}", pack_color(region.color), region.name.replace(',', " "), region.id));
        for (x, y) in grid.region_pixels(region.id) {
            out.push_str(&format!(",{},{}", x, y));
        }
        out.push('\n');
    }
    let unassigned = grid.cells().iter().filter(|c| !c.is_empty() && regions.get(c.region_id()).is_none()).count();
    if unassigned > 0 {
        log::warn!("legacy export: {} painted cell(s) have no region entry and were skipped", unassigned);
    }
    out
}

#[derive(Debug)]
struct LegacyLine {
    region: Region,
    pixels: Vec<(i64, i64)>,
}

fn parse_legacy_line(line_no: usize, line: &str) -> Result<LegacyLine, FormatError> {
    let err = |message: String| FormatError::Parse { line: line_no, message };
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return Err(err(format!("expected at least 3 fields, found {}", fields.len())));
    }
    let color: i32 = fields[0].parse().map_err(|_| err(format!("invalid color '{}'", fields[0])))?;
    let id: i32 = fields[2].parse().map_err(|_| err(format!("invalid region id '{}'", fields[2])))?;
    let coords = &fields[3..];
    if coords.len() % 2 != 0 {
        return Err(err("odd number of coordinate values".to_string()));
    }
    let mut pixels = Vec::with_capacity(coords.len() / 2);
    for pair in coords.chunks(2) {
        let x: i64 = pair[0].parse().map_err(|_| err(format!("invalid x '{}'", pair[0])))?;
        let y: i64 = pair[1].parse().map_err(|_| err(format!("invalid y '{}'", pair[1])))?;
        pixels.push((x, y));
    }
    let color = unpack_color(color);
    if color[3] == 0 && !pixels.is_empty() {
        return Err(err("region color is fully transparent".to_string()));
    }
    Ok(LegacyLine { region: Region::new(id, color, fields[1]), pixels })
}

/// Parse legacy text.  With `dimensions == None` the map is sized to the
/// largest coordinate present.
pub fn parse_legacy(
    text: &str,
    dimensions: Option<(u32, u32)>,
    settings: &EngineSettings,
) -> Result<(PixelGrid, RegionTable), FormatError> {
    let mut lines = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        lines.push((i + 1, parse_legacy_line(i + 1, line)?));
    }

    let (width, height) = match dimensions {
        Some(d) => d,
        None => {
            let mut w = 0i64;
            let mut h = 0i64;
            for (_, l) in &lines {
                for &(x, y) in &l.pixels {
                    w = w.max(x + 1);
                    h = h.max(y + 1);
                }
            }
            (w.clamp(0, u32::MAX as i64) as u32, h.clamp(0, u32::MAX as i64) as u32)
        }
    };
    check_map_dimensions(width, height, settings)?;

    let mut grid = PixelGrid::new(width, height);
    let mut regions = RegionTable::new();
    for (line_no, l) in lines {
        let cell = Cell::new(l.region.color, l.region.id);
        regions
            .insert(l.region)
            .map_err(|e| FormatError::Parse { line: line_no, message: e.to_string() })?;
        for (x, y) in l.pixels {
            if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                return Err(FormatError::CoordinateOutOfRange { line: line_no, x, y });
            }
            grid.set(x as i32, y as i32, cell);
        }
    }
    Ok((grid, regions))
}

pub fn save_legacy(doc: &mut Document, path: &Path) -> Result<(), FormatError> {
    let composite = doc.composite().clone();
    std::fs::write(path, to_legacy_string(&composite, doc.regions()))?;
    Ok(())
}

pub fn load_legacy(path: &Path, dimensions: Option<(u32, u32)>, settings: EngineSettings) -> Result<Document, FormatError> {
    let text = std::fs::read_to_string(path)?;
    let (grid, regions) = parse_legacy(&text, dimensions, &settings)?;
    let (w, h) = grid.dimensions();
    let layers = LayerStack::from_layers(w, h, vec![Layer::with_grid("Background".to_string(), grid)])
        .map_err(|e| FormatError::Parse { line: 0, message: e.to_string() })?;
    let mut doc = Document::from_parts(file_name(path), layers, regions, settings);
    doc.path = Some(path.to_path_buf());
    Ok(doc)
}

// ============================================================================
// PNG
// ============================================================================

/// Write the composite's colors.  Region ids are not representable.
pub fn export_png(doc: &mut Document, path: &Path) -> Result<(), FormatError> {
    let image = doc.composite().to_rgba_image();
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Read a PNG into a grid, resolving each color to a region via `regions`.
pub fn import_png(path: &Path, regions: &RegionTable, settings: &EngineSettings) -> Result<PixelGrid, FormatError> {
    let image = image::open(path)?.to_rgba8();
    let (width, height) = image.dimensions();
    check_map_dimensions(width, height, settings)?;
    let cells = image
        .pixels()
        .map(|p| Cell::new(*p, regions.find_by_color(*p).map_or(0, |r| r.id)))
        .collect();
    PixelGrid::from_cells(width, height, cells).map_err(|_| FormatError::InvalidDimensions { width, height })
}

pub fn load_png(path: &Path, settings: EngineSettings) -> Result<Document, FormatError> {
    let grid = import_png(path, &RegionTable::new(), &settings)?;
    let (w, h) = grid.dimensions();
    let layers = LayerStack::from_layers(w, h, vec![Layer::with_grid("Background".to_string(), grid)])
        .map_err(|e| FormatError::Parse { line: 0, message: e.to_string() })?;
    let mut doc = Document::from_parts(file_name(path), layers, RegionTable::new(), settings);
    doc.path = Some(path.to_path_buf());
    Ok(doc)
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Load any supported map file, choosing the codec from the extension.
pub fn load_map(path: &Path, settings: EngineSettings) -> Result<Document, FormatError> {
    match MapFormat::from_path(path) {
        Some(MapFormat::Json) => load_json(path, settings),
        Some(MapFormat::Project) => load_project(path, settings),
        Some(MapFormat::Legacy) => load_legacy(path, None, settings),
        Some(MapFormat::Png) => load_png(path, settings),
        None => Err(FormatError::Parse {
            line: 0,
            message: format!("unrecognised map extension for '{}'", path.display()),
        }),
    }
}

pub fn save_map(doc: &mut Document, path: &Path, format: MapFormat, encoding: CellEncoding) -> Result<(), FormatError> {
    match format {
        MapFormat::Json => save_json(doc, path, encoding),
        MapFormat::Project => save_project(doc, path),
        MapFormat::Legacy => save_legacy(doc, path),
        MapFormat::Png => export_png(doc, path),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_line_parses_fields_and_pairs() {
        let l = parse_legacy_line(1, "-65536,Red Land,3,0,0,1,0").unwrap();
        assert_eq!(l.region.id, 3);
        assert_eq!(l.region.name, "Red Land");
        assert_eq!(l.region.color, Rgba([255, 0, 0, 255]));
        assert_eq!(l.pixels, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn legacy_line_rejects_odd_coordinates() {
        let e = parse_legacy_line(4, "-65536,Red,3,0,0,1").unwrap_err();
        assert!(matches!(e, FormatError::Parse { line: 4, .. }));
    }

    #[test]
    fn legacy_line_requires_three_fields() {
        assert!(matches!(parse_legacy_line(2, "-65536,Red"), Err(FormatError::Parse { line: 2, .. })));
    }
}
