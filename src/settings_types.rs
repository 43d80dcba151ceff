use std::path::PathBuf;

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Catalog opened when no `--catalog` is given.
    pub catalog_path: Option<PathBuf>,
    /// Atlas opened when no `--atlas` is given.
    pub atlas_path: Option<PathBuf>,
    /// Drop remapped sprite payloads after an optimize.
    pub clean_empty: bool,
    pub log_level: String,
    pub progress_bars: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_path: None,
            atlas_path: None,
            clean_empty: true,
            log_level: "info".to_string(),
            progress_bars: true,
        }
    }
}
