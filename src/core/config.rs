//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.
//! Values that fail to parse fall back to their defaults with a warning.

use crate::core::auto_layout::LayoutConfig;
use crate::core::clipboard::{Clipboard, PASTE_OFFSET};
use crate::core::mutations::SchemaService;
use crate::core::validation::ValidationLevel;
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_VALIDATION_LEVEL: &str = "SCHEMABOARD_VALIDATION_LEVEL";
pub const ENV_RANK_SEPARATION: &str = "SCHEMABOARD_RANK_SEPARATION";
pub const ENV_NODE_SEPARATION: &str = "SCHEMABOARD_NODE_SEPARATION";
pub const ENV_TABLE_WIDTH: &str = "SCHEMABOARD_TABLE_WIDTH";
pub const ENV_TABLE_HEIGHT: &str = "SCHEMABOARD_TABLE_HEIGHT";
pub const ENV_PASTE_OFFSET: &str = "SCHEMABOARD_PASTE_OFFSET";
pub const ENV_DATA_DIR: &str = "SCHEMABOARD_DATA_DIR";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Strictness applied to table and field names
    pub validation_level: ValidationLevel,

    /// Auto-layout spacing and default table size
    pub layout: LayoutConfig,

    /// Offset of a pasted table from its anchor, on both axes
    pub paste_offset: f64,

    /// Directory for saved projects
    /// Example: ./data/projects
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let layout_defaults = LayoutConfig::default();
        let parse = |key: &str, default: f64| parse_or(&lookup, key, default, |v: &f64| *v > 0.0);

        Self {
            validation_level: parse_or(&lookup, ENV_VALIDATION_LEVEL, ValidationLevel::default(), |_| true),
            layout: LayoutConfig {
                rank_separation: parse(ENV_RANK_SEPARATION, layout_defaults.rank_separation),
                node_separation: parse(ENV_NODE_SEPARATION, layout_defaults.node_separation),
                table_width: parse(ENV_TABLE_WIDTH, layout_defaults.table_width),
                table_height: parse(ENV_TABLE_HEIGHT, layout_defaults.table_height),
                ..layout_defaults
            },
            paste_offset: parse_or(&lookup, ENV_PASTE_OFFSET, PASTE_OFFSET.0, |v: &f64| v.is_finite()),
            data_dir: lookup(ENV_DATA_DIR)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Check if a data directory is configured
    pub fn has_data_dir(&self) -> bool {
        self.data_dir.is_some()
    }

    pub fn schema_service(&self) -> SchemaService {
        SchemaService::new(self.validation_level)
    }

    pub fn clipboard(&self) -> Clipboard {
        Clipboard::new((self.paste_offset, self.paste_offset))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Parse `key`, keeping `default` when the value is missing, unparsable or rejected
fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    accept: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if accept(&value) => value,
        _ => {
            tracing::warn!("Ignoring invalid value '{}' for {}, using default", raw, key);
            default
        }
    }
}
