//! The `settings` command: inspecting and editing `settings.toml`.
use crate::settings::{Settings, get_settings_file_path};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::fs;
use std::path::Path;

/// Subcommands for settings
#[derive(Subcommand)]
pub enum SettingsSubcommands {
    /// Open the settings file in a text editor, creating it first if needed
    Edit,
    /// Print the path the settings file is read from
    Path,
    /// Print the settings currently in effect
    Show {
        /// Print a documented settings file with the default values instead
        #[arg(long)]
        defaults: bool,
    },
}

impl SettingsSubcommands {
    /// Execute the supplied settings subcommand
    pub fn execute(self) -> Result<()> {
        let file_path = get_settings_file_path();
        match self {
            Self::Edit => edit_settings_file(&file_path),
            Self::Path => {
                println!("{}", file_path.display());
                Ok(())
            }
            Self::Show { defaults } => {
                print!("{}", settings_summary(&file_path, defaults)?);
                Ok(())
            }
        }
    }
}

/// Write a documented settings file to `file_path` unless one exists
fn ensure_settings_file_exists(file_path: &Path) -> Result<()> {
    if file_path.is_file() {
        return Ok(());
    }

    if let Some(dir_path) = file_path.parent() {
        fs::create_dir_all(dir_path)
            .with_context(|| format!("Failed to create directory: {}", dir_path.display()))?;
    }
    fs::write(file_path, Settings::default_file_contents()?)
        .with_context(|| format!("Could not write {}", file_path.display()))
}

/// Let the user edit the settings file, then check that it can still be read
fn edit_settings_file(file_path: &Path) -> Result<()> {
    ensure_settings_file_exists(file_path)?;

    println!("Opening settings file for editing: {}", file_path.display());
    edit::edit_file(file_path)?;

    Settings::from_path(file_path).context("The edited settings file is invalid")?;

    Ok(())
}

/// The settings read from `file_path` as TOML, or the documented defaults
fn settings_summary(file_path: &Path, defaults: bool) -> Result<String> {
    if defaults {
        Settings::default_file_contents()
    } else {
        Settings::from_path(file_path)?.to_toml()
    }
}
