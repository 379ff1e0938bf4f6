use std::path::{Path, PathBuf};

use crate::components::history::DEFAULT_MAX_UNDO_STEPS;
use crate::layers::DEFAULT_OPACITY_EPSILON;
use crate::ops::fill::DEFAULT_FILL_CELL_CAP;

/// Maximum supported canvas dimension in pixels (per axis).
pub const MAX_CANVAS_DIM: u32 = 32_768;

/// Engine limits, persisted as a plain `key = value` file.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Maximum number of undo steps
    pub max_undo_steps: usize,
    /// Hard cap on cells changed by one flood fill
    pub fill_cell_cap: usize,
    /// Layers with opacity at or below this are skipped when compositing
    pub opacity_epsilon: f32,
    pub max_canvas_dim: u32,
    /// Tolerance used when a caller does not pass one (0.0 – 1.0)
    pub default_tolerance: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: DEFAULT_MAX_UNDO_STEPS,
            fill_cell_cap: DEFAULT_FILL_CELL_CAP,
            opacity_epsilon: DEFAULT_OPACITY_EPSILON,
            max_canvas_dim: MAX_CANVAS_DIM,
            default_tolerance: 0.0,
        }
    }
}

impl EngineSettings {
    pub(crate) fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("RegionPaint").join("regionpaint_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("RegionPaint")
                    .join("regionpaint_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME").map(PathBuf::from).or_else(|_| {
                std::env::var("HOME").map(|home| PathBuf::from(home).join(".config"))
            });
            config_dir.ok().map(|d| d.join("regionpaint").join("regionpaint_settings.cfg"))
        }
    }

    /// Load from the platform settings file; defaults when absent.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse `key = value` lines.  Unknown keys are ignored, malformed values
    /// keep their default.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            let ok = match key {
                "max_undo_steps" => set_parsed(&mut s.max_undo_steps, val),
                "fill_cell_cap" => set_parsed(&mut s.fill_cell_cap, val),
                "opacity_epsilon" => set_parsed(&mut s.opacity_epsilon, val),
                "max_canvas_dim" => set_parsed(&mut s.max_canvas_dim, val),
                "default_tolerance" => set_parsed(&mut s.default_tolerance, val),
                _ => true,
            };
            if !ok {
                log::warn!("settings: ignoring malformed value '{}' for '{}'", val, key);
            }
        }
        s.max_undo_steps = s.max_undo_steps.max(1);
        s.fill_cell_cap = s.fill_cell_cap.max(1);
        s.default_tolerance = s.default_tolerance.clamp(0.0, 1.0);
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_undo_steps = {}\nfill_cell_cap = {}\nopacity_epsilon = {}\nmax_canvas_dim = {}\ndefault_tolerance = {}\n",
            self.max_undo_steps, self.fill_cell_cap, self.opacity_epsilon, self.max_canvas_dim, self.default_tolerance,
        )
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, val: &str) -> bool {
    match val.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_overrides_known_keys_and_ignores_the_rest() {
        let s = EngineSettings::parse("# limits\nmax_undo_steps = 10\nfill_cell_cap=500\nunknown = 3\n");
        assert_eq!(s.max_undo_steps, 10);
        assert_eq!(s.fill_cell_cap, 500);
        assert_eq!(s.max_canvas_dim, MAX_CANVAS_DIM);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let s = EngineSettings::parse("max_undo_steps = lots\ndefault_tolerance = 4.5");
        assert_eq!(s.max_undo_steps, DEFAULT_MAX_UNDO_STEPS);
        assert_eq!(s.default_tolerance, 1.0);
    }

    #[test]
    fn config_string_round_trips() {
        let s = EngineSettings { max_undo_steps: 7, fill_cell_cap: 99, ..Default::default() };
        assert_eq!(EngineSettings::parse(&s.to_config_string()), s);
    }
}
