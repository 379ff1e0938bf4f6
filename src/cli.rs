// ============================================================================
// RegionPaint CLI: headless conversion and batch editing of region maps
// ============================================================================
//
// Usage examples:
//   regionpaint --input world.rmp --output world.json
//   regionpaint -i world.txt -o world.png                  (format inferred from output ext)
//   regionpaint -i maps/*.rmp --output-dir export/ --format json --packed
//   regionpaint -i world.json --fill 10,12,ff0000ff,3 --output world.rmp
//   regionpaint -i a.json b.json --report
//
// All processing runs synchronously; compositing still uses the CPU backend.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::Rgba;

use crate::canvas::Cell;
use crate::io::{load_legacy, load_map, save_map, CellEncoding, MapFormat};
use crate::ops::canvas_ops;
use crate::project::Document;
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// RegionPaint headless region-map processor.
#[derive(Parser, Debug)]
#[command(
    name = "regionpaint",
    about = "RegionPaint headless region-map converter",
    long_about = "Load region maps (layered .rmp projects, JSON exports, legacy text\n\
                  files or PNG images), optionally flood-fill them, and write them\n\
                  back out in any supported format.\n\n\
                  Example:\n  \
                  regionpaint --input world.rmp --output world.json\n  \
                  regionpaint -i maps/*.rmp --output-dir out/ --format legacy"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "maps/*.rmp").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: json, rmp, legacy, png.
    /// When omitted, the format is inferred from --output's extension, defaulting to json.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Write JSON cells as packed 0xAARRGGBB ints instead of (color, region) pairs.
    #[arg(long)]
    pub packed: bool,

    /// Map size for legacy text input, as WIDTHxHEIGHT.
    /// Without it the size is taken from the largest coordinate in the file.
    #[arg(long, value_name = "WxH")]
    pub legacy_size: Option<String>,

    /// Flood fill applied to the active layer before saving: X,Y,RRGGBBAA,REGION[,TOLERANCE].
    /// May be repeated.
    #[arg(long, value_name = "SPEC")]
    pub fill: Vec<String>,

    /// Collapse all layers into one before saving.
    #[arg(long)]
    pub flatten: bool,

    /// Print region statistics and color conflicts instead of writing output.
    #[arg(long)]
    pub report: bool,

    /// Engine settings file (key = value).  Defaults to the per-user settings.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Override the undo depth from the settings file.
    #[arg(long, value_name = "N")]
    pub history_depth: Option<usize>,

    /// Override the flood fill cell cap from the settings file.
    #[arg(long, value_name = "CELLS")]
    pub fill_cap: Option<usize>,

    /// Print per-file timing and debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// One parsed `--fill` request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FillSpec {
    pub x: i32,
    pub y: i32,
    pub cell: Cell,
    pub tolerance: Option<f32>,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let mut settings = match &args.settings {
        Some(path) => EngineSettings::load_from(path),
        None => EngineSettings::load(),
    };
    if let Some(depth) = args.history_depth {
        settings.max_undo_steps = depth.max(1);
    }
    if let Some(cap) = args.fill_cap {
        settings.fill_cell_cap = cap.max(1);
    }
    log::debug!("engine settings: {:?}", settings);

    let legacy_size = match args.legacy_size.as_deref().map(parse_size) {
        Some(Ok(size)) => Some(size),
        Some(Err(e)) => {
            eprintln!("error: --legacy-size: {}", e);
            return ExitCode::FAILURE;
        }
        None => None,
    };

    let mut fills = Vec::with_capacity(args.fill.len());
    for spec in &args.fill {
        match parse_fill_spec(spec) {
            Ok(f) => fills.push(f),
            Err(e) => {
                eprintln!("error: --fill '{}': {}", spec, e);
                return ExitCode::FAILURE;
            }
        }
    }

    let format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(format) => format,
        Err(e) => {
            eprintln!("error: --format: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let encoding = if args.packed { CellEncoding::Packed } else { CellEncoding::Dense };

    if !args.report
        && let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let mut doc = match open(input_path, legacy_size, settings.clone()) {
            Ok(doc) => doc,
            Err(e) => {
                eprintln!("  error: load failed: {}", e);
                any_failure = true;
                continue;
            }
        };

        if let Err(e) = apply_edits(&mut doc, &fills, args.flatten) {
            eprintln!("  error: {}", e);
            any_failure = true;
            doc.close();
            continue;
        }

        if args.report {
            print!("{}", region_report(&mut doc));
            doc.close();
            continue;
        }

        let Some(output_path) = build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), format)
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            doc.close();
            continue;
        };

        match save_map(&mut doc, &output_path, format, encoding) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  -> {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: save failed: {}", e);
                any_failure = true;
            }
        }
        doc.close();
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file pipeline
// ============================================================================

fn open(path: &Path, legacy_size: Option<(u32, u32)>, settings: EngineSettings) -> Result<Document, String> {
    let result = match MapFormat::from_path(path) {
        Some(MapFormat::Legacy) => load_legacy(path, legacy_size, settings),
        _ => load_map(path, settings),
    };
    result.map_err(|e| e.to_string())
}

fn apply_edits(doc: &mut Document, fills: &[FillSpec], flatten: bool) -> Result<(), String> {
    for f in fills {
        let outcome = doc
            .fill(f.x, f.y, f.cell, f.tolerance)
            .map_err(|e| format!("fill at ({}, {}) failed: {}", f.x, f.y, e))?;
        log::info!("fill at ({}, {}) changed {} cell(s)", f.x, f.y, outcome.changed);
        for w in &outcome.warnings {
            eprintln!("  warning: {}", w);
        }
    }
    if flatten && doc.layers().len() > 1 {
        canvas_ops::flatten(doc);
    }
    Ok(())
}

/// Per-region cell counts plus any colors shared by several regions.
pub fn region_report(doc: &mut Document) -> String {
    let mut out = format!("{} ({}x{}, {} layer(s))\n", doc.name, doc.width(), doc.height(), doc.layers().len());
    let composite = doc.composite().clone();
    for region in doc.regions().iter() {
        let [r, g, b, a] = region.color.0;
        out.push_str(&format!(
            "  region {:>5}  #{:02x}{:02x}{:02x}{:02x}  {:>8} cell(s)  {}\n",
            region.id,
            r,
            g,
            b,
            a,
            composite.count_region(region.id),
            region.name
        ));
    }
    let unassigned = composite.count_region(0);
    if unassigned > 0 {
        out.push_str(&format!("  {} painted cell(s) without a region\n", unassigned));
    }
    for (color, ids) in doc.regions().conflicts() {
        let [r, g, b, a] = color.0;
        out.push_str(&format!("  conflict: #{:02x}{:02x}{:02x}{:02x} used by regions {:?}\n", r, g, b, a, ids));
    }
    out
}

// ============================================================================
// Helpers
// ============================================================================

/// Literal paths and glob matches, first occurrence wins.  Matches of one
/// pattern are sorted so batch order is stable across platforms.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();
    fn push_unique(path: PathBuf, out: &mut Vec<PathBuf>) {
        if !out.contains(&path) {
            out.push(path);
        }
    }

    for pattern in patterns {
        if Path::new(pattern).exists() {
            push_unique(PathBuf::from(pattern), &mut result);
            continue;
        }
        let mut matches: Vec<PathBuf> = match glob::glob(pattern) {
            Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
                continue;
            }
        };
        if matches.is_empty() {
            eprintln!("warning: '{}' matched no files.", pattern);
        }
        matches.sort();
        for m in matches {
            push_unique(m, &mut result);
        }
    }
    result
}

/// Choose the [`MapFormat`] from `--format` or the output extension.
/// Defaults to JSON when neither is known.
pub fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<MapFormat, String> {
    if let Some(f) = format_arg {
        return match f.to_lowercase().as_str() {
            "json" => Ok(MapFormat::Json),
            "legacy" | "txt" => Ok(MapFormat::Legacy),
            "rmp" | "bin" | "project" => Ok(MapFormat::Project),
            "png" => Ok(MapFormat::Png),
            other => Err(format!("unknown format '{}' (expected json, rmp, legacy or png)", other)),
        };
    }
    Ok(output.and_then(MapFormat::from_path).unwrap_or(MapFormat::Json))
}

/// `WIDTHxHEIGHT`
pub fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.trim().parse().map_err(|_| format!("invalid width '{}'", w))?;
    let h = h.trim().parse().map_err(|_| format!("invalid height '{}'", h))?;
    Ok((w, h))
}

/// `X,Y,RRGGBBAA,REGION[,TOLERANCE]`; a leading `#` on the color is allowed
/// and six hex digits mean opaque.
pub fn parse_fill_spec(s: &str) -> Result<FillSpec, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 && parts.len() != 5 {
        return Err("expected X,Y,RRGGBBAA,REGION[,TOLERANCE]".to_string());
    }
    let x = parts[0].parse().map_err(|_| format!("invalid x '{}'", parts[0]))?;
    let y = parts[1].parse().map_err(|_| format!("invalid y '{}'", parts[1]))?;
    let color = parse_hex_color(parts[2])?;
    let region = parts[3].parse().map_err(|_| format!("invalid region '{}'", parts[3]))?;
    let tolerance = match parts.get(4) {
        Some(t) => Some(t.parse::<f32>().map_err(|_| format!("invalid tolerance '{}'", t))?),
        None => None,
    };
    Ok(FillSpec { x, y, cell: Cell::new(color, region), tolerance })
}

fn parse_hex_color(s: &str) -> Result<Rgba<u8>, String> {
    let hex = s.trim_start_matches('#');
    let value = u32::from_str_radix(hex, 16).map_err(|_| format!("invalid color '{}'", s))?;
    match hex.len() {
        6 => Ok(Rgba([(value >> 16) as u8, (value >> 8) as u8, value as u8, 255])),
        8 => Ok(Rgba(value.to_be_bytes())),
        _ => Err(format!("color '{}' must have 6 or 8 hex digits", s)),
    }
}

/// Where one input's result goes: `--output` verbatim, else
/// `<output-dir>/<stem>.<ext>`, else next to the input.  Writing next to the
/// input never overwrites it; `_out` is appended to the stem instead.
pub fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>, format: MapFormat) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let file_name = format!("{}.{}", stem, format.extension());
    if let Some(dir) = output_dir {
        return Some(dir.join(file_name));
    }
    let dir = input.parent().unwrap_or(Path::new("."));
    let beside = dir.join(&file_name);
    if beside == input {
        return Some(dir.join(format!("{}_out.{}", stem, format.extension())));
    }
    Some(beside)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CellWrite;

    #[test]
    fn report_lists_regions_and_conflicts() {
        let mut doc = Document::new_untitled(1, 3, 1, EngineSettings::default()).unwrap();
        let a = doc.regions_mut().add(Rgba([255, 0, 0, 255]), "Shore").unwrap();
        doc.regions_mut().add(Rgba([255, 0, 0, 255]), "Reef").unwrap();
        doc.paint(&[
            CellWrite::new(0, 0, Cell::new(Rgba([255, 0, 0, 255]), a)),
            CellWrite::new(1, 0, Cell::rgb(9, 9, 9, 0)),
        ])
        .unwrap();

        let report = region_report(&mut doc);

        assert!(report.contains("Untitled-1 (3x1, 1 layer(s))"));
        assert!(report.contains("#ff0000ff"));
        assert!(report.contains("1 painted cell(s) without a region"));
        assert!(report.contains("conflict: #ff0000ff used by regions [1, 2]"));
    }

    #[test]
    fn fill_spec_accepts_short_and_long_colors() {
        let f = parse_fill_spec("3,4,#00ff00,7").unwrap();
        assert_eq!((f.x, f.y), (3, 4));
        assert_eq!(f.cell, Cell::new(Rgba([0, 255, 0, 255]), 7));
        assert_eq!(f.tolerance, None);

        let f = parse_fill_spec("0,0,11223380,2,0.25").unwrap();
        assert_eq!(f.cell.color(), Rgba([0x11, 0x22, 0x33, 0x80]));
        assert_eq!(f.tolerance, Some(0.25));
    }

    #[test]
    fn fill_spec_rejects_garbage() {
        assert!(parse_fill_spec("1,2,red,3").is_err());
        assert!(parse_fill_spec("1,2").is_err());
        assert!(parse_fill_spec("1,2,fff,3").is_err());
    }

    #[test]
    fn size_parses_both_separators() {
        assert_eq!(parse_size("64x32"), Ok((64, 32)));
        assert_eq!(parse_size("8X8"), Ok((8, 8)));
        assert!(parse_size("64").is_err());
    }

    #[test]
    fn format_falls_back_to_extension_then_json() {
        assert_eq!(parse_format(Some("PNG"), None), Ok(MapFormat::Png));
        assert_eq!(parse_format(Some("json"), Some(Path::new("a/b.png"))), Ok(MapFormat::Json));
        assert_eq!(parse_format(None, Some(Path::new("a/b.txt"))), Ok(MapFormat::Legacy));
        assert_eq!(parse_format(None, Some(Path::new("a/b.xyz"))), Ok(MapFormat::Json));
        assert_eq!(parse_format(None, None), Ok(MapFormat::Json));
    }

    #[test]
    fn misspelled_format_is_rejected() {
        assert!(parse_format(Some("pgn"), None).is_err());
        assert!(parse_format(Some(""), Some(Path::new("a/b.png"))).is_err());
    }

    #[test]
    fn output_path_avoids_overwriting_input() {
        let p = build_output_path(Path::new("maps/world.json"), None, None, MapFormat::Json).unwrap();
        assert_eq!(p, PathBuf::from("maps/world_out.json"));
        let p = build_output_path(Path::new("maps/world.json"), None, Some(Path::new("out")), MapFormat::Png).unwrap();
        assert_eq!(p, PathBuf::from("out/world.png"));
    }
}
