//! Common functionality for pdngen, a generator of synthetic poultry distribution networks.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod area_market;
pub mod bird;
pub mod cli;
pub mod edge;
pub mod expand;
pub mod farm;
pub mod flux;
pub mod geography;
pub mod input;
pub mod log;
pub mod market;
pub mod maths;
pub mod network;
pub mod output;
pub mod sampler;
pub mod scenario;
pub mod settings;

#[cfg(test)]
mod fixture;

/// Get config dir for program.
///
/// Panics if the user's config directory cannot be determined.
pub fn get_pdngen_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        panic!("Could not get path to config dir");
    };

    config_dir.push("pdngen");
    config_dir
}
