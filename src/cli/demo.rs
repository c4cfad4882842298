//! Demo specifications bundled with the program, and the `demo` command.
//!
//! Each demo is a folder under `demos/` holding a `scenarios.toml` specification, the input data it
//! refers to and a `README.txt` whose first line summarises it.
use super::{GenerateOpts, handle_generate_command};
use crate::output::get_named_output_dir;
use crate::settings::Settings;
use anyhow::{Context, Result, ensure};
use clap::Subcommand;
use include_dir::{Dir, include_dir};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The bundled demos
static DEMOS_DIR: Dir<'_> = include_dir!("demos");

/// The name of the specification file in each demo
const SPEC_FILE_NAME: &str = "scenarios.toml";

/// The name of the description file in each demo
const README_FILE_NAME: &str = "README.txt";

/// The available subcommands for managing demos.
#[derive(Subcommand)]
pub enum DemoSubcommands {
    /// List the bundled demos.
    List,
    /// Describe a demo.
    Info {
        /// The name of the demo.
        name: String,
    },
    /// Copy a demo specification and its input data to a new folder.
    Extract {
        /// The name of the demo to extract.
        name: String,
        /// The destination folder (defaults to the demo's name).
        new_path: Option<PathBuf>,
    },
    /// Generate the networks for a demo.
    Run {
        /// The name of the demo to run.
        name: String,
        /// Other generation options
        #[command(flatten)]
        opts: GenerateOpts,
    },
}

impl DemoSubcommands {
    /// Execute the supplied demo subcommand
    pub fn execute(self) -> Result<()> {
        match self {
            Self::List => {
                for demo in Demo::all() {
                    println!("{:<12} {}", demo.name(), demo.summary()?);
                }
            }
            Self::Info { name } => println!("{}", Demo::get(&name)?.readme()?),
            Self::Extract { name, new_path } => {
                let dest = new_path.unwrap_or_else(|| PathBuf::from(&name));
                Demo::get(&name)?.extract(&dest)?;
            }
            Self::Run { name, opts } => handle_demo_run_command(&name, &opts, None)?,
        }

        Ok(())
    }
}

/// A bundled demo
struct Demo {
    dir: &'static Dir<'static>,
}

impl Demo {
    /// Every bundled demo
    fn all() -> impl Iterator<Item = Demo> {
        DEMOS_DIR.dirs().map(|dir| Demo { dir })
    }

    /// Look up a demo by name
    fn get(name: &str) -> Result<Demo> {
        let dir = DEMOS_DIR.get_dir(name).with_context(|| {
            format!("No demo called {name}. Use `pdngen demo list` to see the available demos.")
        })?;
        Ok(Demo { dir })
    }

    fn name(&self) -> String {
        self.dir.path().display().to_string()
    }

    /// The demo's description
    fn readme(&self) -> Result<&'static str> {
        self.dir
            .get_file(self.dir.path().join(README_FILE_NAME))
            .with_context(|| format!("Demo {} has no {README_FILE_NAME}", self.name()))?
            .contents_utf8()
            .with_context(|| format!("{README_FILE_NAME} of demo {} is not UTF-8", self.name()))
    }

    /// The first line of the description
    fn summary(&self) -> Result<&'static str> {
        Ok(self.readme()?.lines().next().unwrap_or_default())
    }

    /// Write the demo's files to `dest`, which must not exist yet
    fn extract(&self, dest: &Path) -> Result<()> {
        ensure!(
            !dest.exists(),
            "Destination folder {} already exists",
            dest.display()
        );

        fs::create_dir_all(dest)
            .with_context(|| format!("Could not create {}", dest.display()))?;
        for file in self.dir.files() {
            let file_name = file
                .path()
                .file_name()
                .context("Demo file has no file name")?;
            let file_path = dest.join(file_name);
            fs::write(&file_path, file.contents())
                .with_context(|| format!("Could not write {}", file_path.display()))?;
        }

        Ok(())
    }
}

/// Handle the `demo run` command.
///
/// The demo is extracted to a temporary folder and generated from there. Unless another output
/// folder is given, results go to `pdngen_results/<name>`.
pub fn handle_demo_run_command(
    name: &str,
    opts: &GenerateOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let demo = Demo::get(name)?;
    let temp_dir = TempDir::new().context("Failed to create temporary directory.")?;
    let demo_path = temp_dir.path().join(name);
    demo.extract(&demo_path)?;

    let opts = GenerateOpts {
        output_dir: Some(
            opts.output_dir
                .clone()
                .unwrap_or_else(|| get_named_output_dir(name)),
        ),
        ..opts.clone()
    };
    handle_generate_command(&demo_path.join(SPEC_FILE_NAME), &opts, settings)
}
