use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Reader view preferences, stored as TOML. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    /// Height of fixed chrome covering the top of the content.
    pub toolbar_offset: f32,
    /// Distance below the toolbar at which `scroll_to_verse` places a verse.
    pub target_line: f32,
    /// Minimum press duration for a long-press selection.
    pub long_press_ms: u64,
    /// Distance from either content edge at which more content is requested.
    pub edge_threshold: f32,
    pub line_height: f32,
    pub locale: String,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            toolbar_offset: 0.0,
            target_line: 0.0,
            long_press_ms: 500,
            edge_threshold: 4.0,
            line_height: 1.0,
            locale: "en".to_owned(),
        }
    }
}

impl ViewSettings {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse view settings")
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid settings file {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_settings_keep_defaults() {
        let settings = ViewSettings::from_toml_str("toolbar_offset = 3.0\nlocale = \"de\"\n").unwrap();
        assert_eq!(settings.toolbar_offset, 3.0);
        assert_eq!(settings.locale, "de");
        assert_eq!(settings.long_press_ms, 500);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = ViewSettings::load(&dir.path().join("bibleview.toml")).unwrap();
        assert_eq!(settings, ViewSettings::default());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bibleview.toml");
        std::fs::write(&path, "long_press_ms = \"soon\"").unwrap();
        assert!(ViewSettings::load(&path).is_err());
    }
}
