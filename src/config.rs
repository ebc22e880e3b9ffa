use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

pub const LINE_SEPARATOR: &str =
    "<br><hr style='border: 0px; border-bottom: 1px solid rgb(238, 221, 204);'>";
pub const PADDING_SEPARATOR: &str =
    "<br><hr style='visibility: hidden; border: 0px; border-bottom: 1px solid rgb(238, 221, 204);'>";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogSettings,
    pub formatter: FormatterSettings,
    pub store: StoreSettings,
    pub history: HistorySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Used when `RUST_LOG` is not set.
    pub filter: String,
    /// When set, logs also go to a daily rolling file in this directory.
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            directory: None,
            file_prefix: "result_flattener.log".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormatterSettings {
    /// Joins values a leaf collects from repeated child rows.
    pub line_separator: String,
    /// Blank line used to pad short columns up to their tallest sibling.
    pub padding_separator: String,
}

impl Default for FormatterSettings {
    fn default() -> Self {
        Self {
            line_separator: LINE_SEPARATOR.into(),
            padding_separator: PADDING_SEPARATOR.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub page_size: u64,
    /// Rayon threads used to format a page; `None` uses the global pool.
    pub threads: Option<usize>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub recent_limit: usize,
    /// JSON file backing the user key/value store; in-memory when unset.
    pub storage_path: Option<String>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            recent_limit: 10,
            storage_path: None,
        }
    }
}

/// Loads settings from an optional TOML file (without extension) and
/// `RESULT_FLATTENER__SECTION__KEY` environment variables. A `.env` file is
/// read into the environment first.
pub fn load_settings(path: &str) -> Result<Settings> {
    dotenvy::dotenv().ok();

    let cfg = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("RESULT_FLATTENER")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    Ok(cfg.try_deserialize()?)
}
