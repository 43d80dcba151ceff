pub mod color;
pub mod export;
pub mod ids;
pub mod logging;
pub mod session;
pub mod settings;
pub mod settings_types;
pub mod worker;

pub use ids::{IdRangeError, parse_ids};
pub use session::{Editor, FlagState, NumericField, NumericState, ReindexConfirmation, Selection};
pub use settings_types::Settings;

pub fn storage_dir() -> std::path::PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    path.push("ItemManager");
    let _ = std::fs::create_dir_all(&path);
    path
}
