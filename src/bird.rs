//! Bird types are tracked separately through the whole distribution network.
use anyhow::{Result, ensure};
use itertools::Itertools;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use strum::EnumIter;

/// A category of poultry
#[derive(
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Copy,
    Clone,
    Debug,
    EnumIter,
    SerializeLabeledStringEnum,
    DeserializeLabeledStringEnum,
)]
pub enum BirdType {
    /// Broiler chickens
    #[string = "BR"]
    Broiler,
    /// Ducks
    #[string = "DE"]
    Duck,
    /// Any other kind of bird
    #[string = "SU"]
    Other,
}

/// Check that a list of requested bird types is non-empty and has no repeats
pub fn check_bird_types(bird_types: &[BirdType]) -> Result<()> {
    ensure!(!bird_types.is_empty(), "No bird types requested");
    ensure!(
        bird_types.iter().all_unique(),
        "Bird types must not be repeated: {}",
        bird_types.iter().join(", ")
    );

    Ok(())
}
