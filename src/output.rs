//! The module responsible for laying out output folders on disk.
use anyhow::{Context, Result, ensure};
use std::fs;
use std::path::{Path, PathBuf};

/// The root folder in which specification-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "pdngen_results";

/// Subfolder holding the generated network files
const CONFIG_DIRECTORY_NAME: &str = "config";

/// Subfolder in which the simulator writes its results
const RESULTS_DIRECTORY_NAME: &str = "results";

/// Get the default output folder for the specification at `spec_path`
pub fn get_output_dir(spec_path: &Path) -> Result<PathBuf> {
    let spec_path = spec_path
        .canonicalize()
        .context("Could not resolve path to scenario specification")?;

    let spec_name = spec_path
        .file_stem()
        .context("Scenario specification has no file name")?
        .to_str()
        .context("Invalid chars in scenario specification file name")?;

    Ok(get_named_output_dir(spec_name))
}

/// Get the default output folder for a run called `name`
pub fn get_named_output_dir(name: &str) -> PathBuf {
    [OUTPUT_DIRECTORY_ROOT, name].iter().collect()
}

/// Create a new output directory.
///
/// If the directory already exists and is not empty, it is only reused if `allow_overwrite` is
/// true, in which case its contents are deleted first.
///
/// # Returns
///
/// Whether an existing folder was overwritten
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    let overwrite = if output_dir.is_dir() {
        if fs::read_dir(output_dir)?.next().is_none() {
            // Empty folders can be used as is
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. Use --overwrite to replace it."
        );
        fs::remove_dir_all(output_dir)?;
        true
    } else {
        false
    };

    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// The folders that generated files and simulator results are written to
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDirs {
    /// Folder for generated network and settings files
    pub config: PathBuf,
    /// Folder under which each scenario gets its own results folder
    pub results: PathBuf,
}

impl OutputDirs {
    /// Create the `config` and `results` subfolders of `output_dir`
    pub fn create(output_dir: &Path) -> Result<Self> {
        let dirs = Self {
            config: output_dir.join(CONFIG_DIRECTORY_NAME),
            results: output_dir.join(RESULTS_DIRECTORY_NAME),
        };
        for dir in [&dirs.config, &dirs.results] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }

        Ok(dirs)
    }

    /// Path to a file in the config folder
    pub fn config_file(&self, file_name: &str) -> PathBuf {
        self.config.join(file_name)
    }

    /// Create the results folder for a scenario
    pub fn create_scenario_results(&self, scenario: usize) -> Result<PathBuf> {
        let dir = self.results.join(format!("scenario_{scenario}"));
        fs::create_dir_all(&dir).with_context(|| format!("Could not create {}", dir.display()))?;

        Ok(dir)
    }
}
