//! The command line interface for the generator.
use crate::expand::generate_configurations;
use crate::input::{input_err_msg, read_toml};
use crate::log;
use crate::output::{OutputDirs, create_output_directory, get_output_dir};
use crate::scenario::{generate_scenario, load_scenarios};
use crate::settings::Settings;
use ::log::{info, warn};
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

pub mod demo;
use demo::DemoSubcommands;
pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the generator.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the generate command
#[derive(Args, Clone, Default)]
pub struct GenerateOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Whether to also write the estimated flux parameters for each scenario
    #[arg(long)]
    pub debug_model: bool,
    /// Base seed for the random number generator (drawn at random if omitted)
    #[arg(long)]
    pub seed: Option<u64>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Generate the networks for every scenario in a specification.
    Generate {
        /// Path to the scenario specification.
        spec_path: PathBuf,
        /// Other generation options
        #[command(flatten)]
        opts: GenerateOpts,
    },
    /// Expand a specification into one configuration file per scenario.
    Expand {
        /// Path to the scenario specification.
        spec_path: PathBuf,
        /// Directory for the expanded configurations
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Whether to overwrite the output directory if it already exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Validate a scenario specification.
    Validate {
        /// Path to the scenario specification.
        spec_path: PathBuf,
    },
    /// Manage bundled demo specifications.
    Demo {
        /// The available subcommands for managing demos.
        #[command(subcommand)]
        subcommand: DemoSubcommands,
    },
    /// Manage program settings.
    Settings {
        /// The subcommands for managing settings.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Generate { spec_path, opts } => handle_generate_command(&spec_path, &opts, None),
            Self::Expand {
                spec_path,
                output_dir,
                overwrite,
            } => handle_expand_command(&spec_path, output_dir.as_deref(), overwrite, None),
            Self::Validate { spec_path } => handle_validate_command(&spec_path, None),
            Self::Demo { subcommand } => subcommand.execute(),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start pdngen
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ pdngen --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Load program settings, if not provided
fn load_settings(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Create the output folder, falling back to one named after the specification
fn prepare_output_dir(
    spec_path: &Path,
    output_dir: Option<&Path>,
    allow_overwrite: bool,
) -> Result<(PathBuf, bool)> {
    let output_path = match output_dir {
        Some(p) => p.to_path_buf(),
        None => get_output_dir(spec_path)?,
    };

    let overwrite = create_output_directory(&output_path, allow_overwrite).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_path.display()
        )
    })?;

    Ok((output_path, overwrite))
}

/// Handle the `generate` command.
pub fn handle_generate_command(
    spec_path: &Path,
    opts: &GenerateOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let mut settings = load_settings(settings)?;

    // These settings can be overridden by command-line arguments
    if opts.debug_model {
        settings.debug_model = true;
    }
    if opts.overwrite {
        settings.overwrite = true;
    }

    let (output_path, overwrite) =
        prepare_output_dir(spec_path, opts.output_dir.as_deref(), settings.overwrite)?;

    // Initialise program logger
    log::init(Some(&settings.log_level), Some(&output_path))
        .context("Failed to initialise logging.")?;

    let scenarios = load_scenarios(spec_path).context("Failed to load scenarios.")?;
    info!("Loaded scenarios from {}", spec_path.display());
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    let dirs = OutputDirs::create(&output_path)?;
    let base_seed = opts.seed.unwrap_or_else(|| rand::thread_rng().r#gen());
    info!("Base seed: {base_seed}");

    for (s, params) in scenarios.iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(s as u64));
        generate_scenario(s, params, &dirs, settings.debug_model, &mut rng)
            .with_context(|| format!("Failed to generate scenario {s}."))?;
    }
    info!("Generated {} scenarios", scenarios.len());

    Ok(())
}

/// Handle the `expand` command.
pub fn handle_expand_command(
    spec_path: &Path,
    output_dir: Option<&Path>,
    allow_overwrite: bool,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = load_settings(settings)?;
    let (output_path, _) =
        prepare_output_dir(spec_path, output_dir, allow_overwrite || settings.overwrite)?;

    // Only log to the console; the output folder only holds scenario files
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let spec = read_toml(spec_path)?;
    let configurations =
        generate_configurations(&spec).with_context(|| input_err_msg(spec_path))?;
    for (s, configuration) in configurations.iter().enumerate() {
        let file_path = output_path.join(format!("scenario_{s}.toml"));
        fs::write(&file_path, toml::to_string(configuration)?)
            .with_context(|| format!("Could not write {}", file_path.display()))?;
    }
    info!(
        "Wrote {} scenarios to {}",
        configurations.len(),
        output_path.display()
    );

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(spec_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = load_settings(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let scenarios = load_scenarios(spec_path).context("Failed to validate scenarios.")?;
    info!("Validation of {} scenarios successful!", scenarios.len());

    Ok(())
}
