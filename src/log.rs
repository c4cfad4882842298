//! Program logging.
//!
//! Messages go to the terminal and, when generating networks, to `pdngen.log` in the output folder.
//! While a scenario is being generated, messages are tagged with its ID (`<scenario>` or
//! `<scenario>_<realisation>`), so lines from different scenarios can be told apart in the log.
use anyhow::{Context, Result, anyhow};
use chrono::Local;
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};
use log::{Level, LevelFilter};
use std::cell::RefCell;
use std::env;
use std::fmt::{Arguments, Display};
use std::fs::File;
use std::io::IsTerminal;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable which takes precedence over the log level in `settings.toml`
const LOG_LEVEL_ENV_VAR: &str = "PDNGEN_LOG_LEVEL";

/// The log level used when none is given
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Name of the log file written to the output folder
const LOG_FILE_NAME: &str = "pdngen.log";

/// A flag indicating whether the logger has been initialised
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

thread_local! {
    static CURRENT_SCENARIO: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Tags messages logged on the current thread with a scenario ID until dropped.
///
/// Contexts can be nested; dropping one restores the ID that was active before it.
#[must_use]
pub struct ScenarioContext {
    previous: Option<String>,
}

impl ScenarioContext {
    /// Start tagging messages with `id`
    pub fn enter(id: impl Into<String>) -> Self {
        let previous = CURRENT_SCENARIO.with(|current| current.replace(Some(id.into())));
        Self { previous }
    }
}

impl Drop for ScenarioContext {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_SCENARIO.with(|current| *current.borrow_mut() = previous);
    }
}

/// The scenario ID that messages on this thread are currently tagged with
pub fn current_scenario() -> Option<String> {
    CURRENT_SCENARIO.with(|current| current.borrow().clone())
}

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Convert a log level name (`off`, `error`, `warn`, `info`, `debug` or `trace`, any case)
pub fn level_from_name(name: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(name).map_err(|_| anyhow!("Unknown log level: {name}"))
}

/// Pick the log level from the environment variable, then the settings file, then the default
fn parse_log_level(from_env: Option<&str>, from_settings: Option<&str>) -> Result<LevelFilter> {
    level_from_name(from_env.or(from_settings).unwrap_or(DEFAULT_LOG_LEVEL))
}

/// Initialise the program logger.
///
/// Messages at `warn` and `error` level go to stderr and the rest to stdout. If `log_file_dir` is
/// given, messages at `info` level and above (or lower, if a more verbose level is chosen) are
/// also written to `pdngen.log` inside it.
///
/// # Arguments
///
/// * `log_level_from_settings`: The log level specified in `settings.toml`
/// * `log_file_dir`: The folder to write the log file to
pub fn init(log_level_from_settings: Option<&str>, log_file_dir: Option<&Path>) -> Result<()> {
    let from_env = env::var(LOG_LEVEL_ENV_VAR).ok();
    let log_level = parse_log_level(from_env.as_deref(), log_level_from_settings)?;

    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let mut dispatch = Dispatch::new()
        .chain(
            console_dispatch(std::io::stdout().is_terminal(), colours)
                .filter(|metadata| metadata.level() > Level::Warn)
                .level(log_level)
                .chain(std::io::stdout()),
        )
        .chain(
            console_dispatch(std::io::stderr().is_terminal(), colours)
                .level(log_level.min(LevelFilter::Warn))
                .chain(std::io::stderr()),
        );

    if let Some(log_file_dir) = log_file_dir {
        let file_path = log_file_dir.join(LOG_FILE_NAME);
        let file = File::create(&file_path)
            .with_context(|| format!("Could not create log file {}", file_path.display()))?;
        dispatch = dispatch.chain(
            Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("{}", format_message(record.level(), message)));
                })
                .level(log_level.max(LevelFilter::Info))
                .chain(file),
        );
    }

    dispatch.apply().context("Logger already initialised")?;
    LOGGER_INIT.get_or_init(|| ());

    Ok(())
}

/// A dispatch writing to the terminal, colouring the level if `use_colour` is set
fn console_dispatch(use_colour: bool, colours: ColoredLevelConfig) -> Dispatch {
    Dispatch::new().format(move |out, message, record| {
        let line = if use_colour {
            format_message(colours.color(record.level()), message)
        } else {
            format_message(record.level(), message)
        };
        out.finish(format_args!("{line}"));
    })
}

/// Format a message as `[time level] message`, naming the current scenario if there is one
fn format_message<T: Display>(level: T, message: &Arguments) -> String {
    let timestamp = Local::now().format("%H:%M:%S");
    match current_scenario() {
        Some(id) => format!("[{timestamp} {level}] scenario {id}: {message}"),
        None => format!("[{timestamp} {level}] {message}"),
    }
}
