//! Placement of commercial farms and assignment of their attributes.
//!
//! Farms are allocated to areas with a probability that mixes a uniform choice over areas with a
//! choice proportional to each area's outgoing bird flux. Within an area, farms are placed uniformly
//! at random.
use crate::bird::BirdType;
use crate::flux::FluxEstimates;
use crate::geography::{RegionTable, random_points_in_region};
use crate::input::{check_probability, deserialise_proportion};
use crate::sampler::{ParameterField, Scalar};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use log::debug;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde::{Deserialize, Serialize, Serializer};
use std::fs;
use std::path::Path;

/// The number of farms to generate
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FarmCount {
    /// The same number of farms for every bird type
    Total(u32),
    /// A number of farms for each bird type
    PerBirdType(IndexMap<BirdType, u32>),
}

impl FarmCount {
    /// Get the number of farms for the given bird type
    pub fn for_bird_type(&self, bird_type: BirdType) -> Result<u32> {
        match self {
            Self::Total(n) => Ok(*n),
            Self::PerBirdType(counts) => counts
                .get(&bird_type)
                .copied()
                .with_context(|| format!("n_farms has no entry for {bird_type}")),
        }
    }
}

/// How the time until a farm is refilled with a new batch of birds is distributed
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode")]
pub enum RefillSpec {
    /// Geometric waiting time
    Geometric {
        /// Per-day probability of refilling
        p_refill: ParameterField,
    },
    /// Negative binomial waiting time
    NegativeBinomial {
        /// Success probability
        p_refill: ParameterField,
        /// Number of successes
        n_refill: ParameterField,
    },
}

/// Refill parameters of a single farm
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode_refill")]
pub enum Refill {
    /// Geometric waiting time
    Geometric {
        /// Per-day probability of refilling
        p_refill: f64,
    },
    /// Negative binomial waiting time
    NegativeBinomial {
        /// Success probability
        p_refill: f64,
        /// Number of successes
        n_refill: f64,
    },
}

fn check_refill_probability(p_refill: f64) -> Result<()> {
    ensure!(
        p_refill > 0.0 && p_refill <= 1.0,
        "p_refill must be in (0,1], got {p_refill}"
    );

    Ok(())
}

impl RefillSpec {
    /// Draw refill parameters for `nrep` farms
    pub fn sample<R: Rng + ?Sized>(&self, nrep: usize, rng: &mut R) -> Result<Vec<Refill>> {
        match self {
            Self::Geometric { p_refill } => p_refill
                .sample(nrep, rng)?
                .into_iter()
                .map(|p| {
                    let p_refill = p.as_f64();
                    check_refill_probability(p_refill)?;
                    Ok(Refill::Geometric { p_refill })
                })
                .collect(),
            Self::NegativeBinomial { p_refill, n_refill } => {
                let ps = p_refill.sample(nrep, rng)?;
                let ns = n_refill.sample(nrep, rng)?;
                ps.into_iter()
                    .zip(ns)
                    .map(|(p, n)| {
                        let (p_refill, n_refill) = (p.as_f64(), n.as_f64());
                        check_refill_probability(p_refill)?;
                        ensure!(
                            n_refill.is_finite() && n_refill > 0.0,
                            "n_refill must be positive, got {n_refill}"
                        );
                        Ok(Refill::NegativeBinomial { p_refill, n_refill })
                    })
                    .collect()
            }
        }
    }
}

/// Parameters controlling farm generation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FarmParameters {
    /// Number of farms
    pub n_farms: FarmCount,
    /// Probability that a farm is put in a uniformly chosen area, irrespective of its flux
    #[serde(deserialize_with = "deserialise_proportion")]
    pub p_random: f64,
    /// Farm sizes for each bird type
    pub size: IndexMap<BirdType, ParameterField>,
    /// Minimum rollout times for each bird type
    pub rollout_time: IndexMap<BirdType, ParameterField>,
    /// Refill time distributions for each bird type
    pub refill: IndexMap<BirdType, RefillSpec>,
}

impl FarmParameters {
    /// Check that parameters are given for every requested bird type
    pub fn validate(&self, bird_types: &[BirdType]) -> Result<()> {
        check_probability(self.p_random, "p_random")?;
        for &bird_type in bird_types {
            self.n_farms.for_bird_type(bird_type)?;
            ensure!(
                self.size.contains_key(&bird_type),
                "No farm size parameters for {bird_type}"
            );
            ensure!(
                self.rollout_time.contains_key(&bird_type),
                "No rollout time parameters for {bird_type}"
            );
            ensure!(
                self.refill.contains_key(&bird_type),
                "No refill parameters for {bird_type}"
            );
        }

        Ok(())
    }
}

/// The kind of farm
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FarmKind {
    /// A commercial poultry farm
    CommercialFarm,
}

fn serialise_as_list<S>(bird_type: &BirdType, serialiser: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    [bird_type].serialize(serialiser)
}

/// A poultry farm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Farm {
    /// Sequential ID across all bird types
    pub id: u32,
    /// The kind of farm
    #[serde(rename = "Type")]
    pub kind: FarmKind,
    /// Number of birds
    #[serde(rename = "Size")]
    pub size: u64,
    /// Position (metres)
    pub x: f64,
    /// Position (metres)
    pub y: f64,
    /// The bird type raised on this farm
    #[serde(rename = "BirdType", serialize_with = "serialise_as_list")]
    pub bird_type: BirdType,
    /// Minimum time before birds are sold
    pub rollout_time: u64,
    /// Local index of the area the farm is in
    pub catchment_area: u32,
    /// Refill parameters
    #[serde(flatten)]
    pub refill: Refill,
}

/// Farms, keyed by ID
pub type FarmCatalog = IndexMap<u32, Farm>;

/// Allocate farms to areas.
///
/// # Arguments
///
/// * `weights` - Area IDs paired with their (positive) outgoing flux
/// * `n_farms` - Number of farms to allocate
/// * `p_random` - Weight of the uniform component of the allocation
/// * `rng` - Random number generator
///
/// # Returns
///
/// The number of farms in each area, in the same order as `weights`.
pub fn allocate_farms<R: Rng + ?Sized>(
    weights: &[(u32, f64)],
    n_farms: u32,
    p_random: f64,
    rng: &mut R,
) -> Result<Vec<u32>> {
    check_probability(p_random, "p_random")?;
    let mut counts = vec![0; weights.len()];
    if n_farms == 0 {
        return Ok(counts);
    }
    ensure!(!weights.is_empty(), "No areas to allocate farms to");

    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    let n_areas = weights.len() as f64;
    let p_choose = weights
        .iter()
        .map(|(_, w)| p_random / n_areas + (1.0 - p_random) * w / total);
    let dist = WeightedIndex::new(p_choose).context("Invalid farm allocation weights")?;
    for _ in 0..n_farms {
        counts[dist.sample(rng)] += 1;
    }

    Ok(counts)
}

fn to_positive_integer(value: Scalar, name: &str, allow_zero: bool) -> Result<u64> {
    let value = value
        .to_integer()
        .with_context(|| format!("{name} must be an integer"))?;
    ensure!(
        value > 0 || (allow_zero && value == 0),
        "{name} must be {}, got {value}",
        if allow_zero { "non-negative" } else { "positive" }
    );

    Ok(value.unsigned_abs())
}

/// Generate farms for all bird types.
///
/// Farm IDs are sequential across bird types, in the order the bird types are given.
pub fn create_farms<R: Rng + ?Sized>(
    regions: &RegionTable,
    estimates: &FluxEstimates,
    bird_types: &[BirdType],
    params: &FarmParameters,
    rng: &mut R,
) -> Result<FarmCatalog> {
    params.validate(bird_types)?;
    let local_indexes = regions.local_indexes();

    let mut farms = FarmCatalog::new();
    for &bird_type in bird_types {
        let n_farms = params.n_farms.for_bird_type(bird_type)?;
        let weights: Vec<(u32, f64)> = estimates
            .by_bird_type
            .get(&bird_type)
            .with_context(|| format!("No flux estimates for {bird_type}"))?
            .iter()
            .filter(|(_, flux)| flux.weight() > 0.0)
            .map(|(id, flux)| (*id, flux.weight()))
            .collect();

        let counts = allocate_farms(&weights, n_farms, params.p_random, rng)
            .with_context(|| format!("Could not allocate {bird_type} farms"))?;

        let mut locations = Vec::with_capacity(n_farms as usize);
        for (&(area_id, _), &count) in weights.iter().zip(&counts) {
            if count == 0 {
                continue;
            }
            let region = regions
                .get(area_id)
                .with_context(|| format!("Area {area_id} not found"))?;
            let catchment_area = *local_indexes
                .get(&area_id)
                .with_context(|| format!("Area {area_id} is not included"))?;
            let points = random_points_in_region(&region.geometry, count as usize, rng)
                .with_context(|| format!("Could not place farms in area {area_id}"))?;
            locations.extend(points.into_iter().map(|point| (catchment_area, point)));
        }

        let nrep = locations.len();
        let sizes = params.size[&bird_type].sample(nrep, rng)?;
        let rollout_times = params.rollout_time[&bird_type].sample(nrep, rng)?;
        let refills = params.refill[&bird_type].sample(nrep, rng)?;
        for (((catchment_area, point), size), (rollout_time, refill)) in locations
            .into_iter()
            .zip(sizes)
            .zip(rollout_times.into_iter().zip(refills))
        {
            let id = u32::try_from(farms.len())?;
            let farm = Farm {
                id,
                kind: FarmKind::CommercialFarm,
                size: to_positive_integer(size, "Farm size", false)?,
                x: point.x,
                y: point.y,
                bird_type,
                rollout_time: to_positive_integer(rollout_time, "Rollout time", true)?,
                catchment_area,
                refill,
            };
            farms.insert(id, farm);
        }
        debug!("Created {nrep} {bird_type} farms");
    }

    Ok(farms)
}

/// Write a farm catalog to a JSON file
pub fn write_farm_catalog(file_path: &Path, farms: &FarmCatalog) -> Result<()> {
    fs::write(file_path, serde_json::to_string(farms)?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, fitted_fluxes, region_table, rng};
    use float_cmp::assert_approx_eq;
    use geo::BoundingRect;
    use rand::rngs::StdRng;
    use rstest::{fixture, rstest};
    use tempfile::tempdir;

    #[fixture]
    fn farm_parameters() -> FarmParameters {
        toml::from_str(
            r#"
            n_farms = 50
            p_random = 0.2
            size = { BR = 1000 }
            rollout_time = { BR = { mode = "Custom", values = [20, 30], pmf = [1, 1] } }
            refill = { BR = { mode = "NegativeBinomial", p_refill = 0.5, n_refill = 3 } }
            "#,
        )
        .unwrap()
    }

    #[rstest]
    #[case(0.0, [0.25, 0.75])]
    #[case(1.0, [0.5, 0.5])]
    #[case(0.5, [0.375, 0.625])]
    fn test_allocate_farms_shares(
        mut rng: StdRng,
        #[case] p_random: f64,
        #[case] expected: [f64; 2],
    ) {
        let counts = allocate_farms(&[(0, 1.0), (5, 3.0)], 4000, p_random, &mut rng).unwrap();
        assert_eq!(counts.iter().sum::<u32>(), 4000);
        for (count, share) in counts.iter().zip(expected) {
            assert_approx_eq!(f64, f64::from(*count) / 4000.0, share, epsilon = 0.03);
        }
    }

    #[rstest]
    fn test_allocate_farms_no_areas(mut rng: StdRng) {
        assert!(allocate_farms(&[], 0, 0.5, &mut rng).unwrap().is_empty());
        assert_error!(
            allocate_farms(&[], 3, 0.5, &mut rng),
            "No areas to allocate farms to"
        );
        assert!(allocate_farms(&[(0, 1.0)], 3, 1.5, &mut rng).is_err());
    }

    #[test]
    fn test_farm_count() {
        assert_eq!(FarmCount::Total(3).for_bird_type(BirdType::Duck).unwrap(), 3);
        let counts = FarmCount::PerBirdType([(BirdType::Broiler, 7)].into_iter().collect());
        assert_eq!(counts.for_bird_type(BirdType::Broiler).unwrap(), 7);
        assert_error!(
            counts.for_bird_type(BirdType::Duck),
            "n_farms has no entry for DE"
        );
    }

    #[rstest]
    fn test_refill_spec_sample(mut rng: StdRng) {
        let spec: RefillSpec = toml::from_str("mode = \"Geometric\"\np_refill = 0.1").unwrap();
        assert_eq!(
            spec.sample(2, &mut rng).unwrap(),
            [Refill::Geometric { p_refill: 0.1 }; 2]
        );

        let spec: RefillSpec = toml::from_str("mode = \"Geometric\"\np_refill = 0.0").unwrap();
        assert!(spec.sample(1, &mut rng).is_err());

        assert!(toml::from_str::<RefillSpec>("mode = \"Poisson\"\np_refill = 0.1").is_err());
    }

    #[rstest]
    fn test_create_farms(
        region_table: RegionTable,
        fitted_fluxes: FluxEstimates,
        farm_parameters: FarmParameters,
        mut rng: StdRng,
    ) {
        let farms = create_farms(
            &region_table,
            &fitted_fluxes,
            &[BirdType::Broiler],
            &farm_parameters,
            &mut rng,
        )
        .unwrap();
        assert_eq!(farms.len(), 50);

        let local_indexes = region_table.local_indexes();
        for (id, farm) in &farms {
            assert_eq!(*id, farm.id);
            assert_eq!(farm.size, 1000);
            assert!([20, 30].contains(&farm.rollout_time));
            assert_eq!(
                farm.refill,
                Refill::NegativeBinomial {
                    p_refill: 0.5,
                    n_refill: 3.0
                }
            );

            // Farms lie inside their catchment area
            let (&area_id, _) = local_indexes
                .iter()
                .find(|(_, local)| **local == farm.catchment_area)
                .unwrap();
            let geometry = &region_table.get(area_id).unwrap().geometry;
            let bounds = geometry.bounding_rect().unwrap();
            assert!((bounds.min().x..=bounds.max().x).contains(&farm.x));
            assert!((bounds.min().y..=bounds.max().y).contains(&farm.y));
        }
    }

    #[rstest]
    fn test_create_farms_missing_bird_type(
        region_table: RegionTable,
        fitted_fluxes: FluxEstimates,
        farm_parameters: FarmParameters,
        mut rng: StdRng,
    ) {
        assert_error!(
            create_farms(
                &region_table,
                &fitted_fluxes,
                &[BirdType::Duck],
                &farm_parameters,
                &mut rng,
            ),
            "No farm size parameters for DE"
        );
    }

    #[rstest]
    fn test_write_farm_catalog(
        region_table: RegionTable,
        fitted_fluxes: FluxEstimates,
        farm_parameters: FarmParameters,
        mut rng: StdRng,
    ) {
        let farms = create_farms(
            &region_table,
            &fitted_fluxes,
            &[BirdType::Broiler],
            &farm_parameters,
            &mut rng,
        )
        .unwrap();
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("farms.json");
        write_farm_catalog(&file_path, &farms).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&file_path).unwrap()).unwrap();
        let farm = &json["0"];
        assert_eq!(farm["id"], 0);
        assert_eq!(farm["Type"], "CommercialFarm");
        assert_eq!(farm["Size"], 1000);
        assert_eq!(farm["BirdType"], serde_json::json!(["BR"]));
        assert_eq!(farm["mode_refill"], "NegativeBinomial");
        assert_eq!(farm["n_refill"], 3.0);
    }
}
