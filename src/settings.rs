//! Program settings, read from `settings.toml` in the user's config folder.
//!
//! Each setting has a command-line counterpart on `generate` which takes precedence over the file.
use crate::get_pdngen_config_dir;
use crate::input::read_toml;
use crate::log::{DEFAULT_LOG_LEVEL, level_from_name};
use anyhow::{Context, Result, anyhow};
use documented::DocumentedFields;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use toml::Table;

const SETTINGS_FILE_NAME: &str = "settings.toml";

const DEFAULT_SETTINGS_FILE_HEADER: &str = "# Program settings for pdngen.
# Every setting is shown with its default value. Uncomment a line to change it.
";

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Get the path to where the settings file will be read from
pub fn get_settings_file_path() -> PathBuf {
    get_pdngen_config_dir().join(SETTINGS_FILE_NAME)
}

/// Program settings
#[derive(Debug, DocumentedFields, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Log level: off, error, warn, info, debug or trace (PDNGEN_LOG_LEVEL takes precedence)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether to replace an existing, non-empty output folder (as with --overwrite)
    #[serde(default)]
    pub overwrite: bool,
    /// Whether to also write the estimated area-market flux parameters (as with --debug-model)
    #[serde(default)]
    pub debug_model: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            overwrite: false,
            debug_model: false,
        }
    }
}

impl Settings {
    /// Read the settings file, using defaults if there isn't one
    pub fn load() -> Result<Settings> {
        Self::from_path(&get_settings_file_path())
    }

    /// Read and check the settings file at `file_path`, using defaults if it doesn't exist
    pub fn from_path(file_path: &Path) -> Result<Settings> {
        if !file_path.is_file() {
            return Ok(Settings::default());
        }

        let settings: Settings = read_toml(file_path)?;
        level_from_name(&settings.log_level)
            .with_context(|| format!("Invalid log_level in {}", file_path.display()))?;

        Ok(settings)
    }

    /// The settings as they would appear in `settings.toml`
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// The contents of a documented settings file with every setting commented out
    pub fn default_file_contents() -> Result<String> {
        let defaults: Table = toml::from_str(&Settings::default().to_toml()?)?;

        let mut out = DEFAULT_SETTINGS_FILE_HEADER.to_string();
        for (field, value) in &defaults {
            let docs = Settings::get_field_docs(field.as_str())
                .map_err(|_| anyhow!("Missing doc comment for setting {field}"))?;
            writeln!(&mut out, "\n# {docs}")?;
            writeln!(&mut out, "# {field} = {value}")?;
        }

        Ok(out)
    }
}
