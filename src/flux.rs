//! Estimation of bird fluxes from administrative areas to markets.
//!
//! Raw flux tables give, for each origin area (row), the observed flow of birds to each destination
//! market (column). Market columns are named `<market>_<GROUP>`, where `GROUP` is the sub-region the
//! market belongs to. Origin areas are identified by their 0-based row position, which must match
//! the order of regions in the geometry source.
use crate::bird::BirdType;
use crate::input::input_err_msg;
use crate::maths::{brent_root, digamma};
use anyhow::{Context, Result, ensure};
use float_cmp::approx_eq;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_string_enum::DeserializeLabeledStringEnum;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Lower end of the bracket used to fit the Dirichlet heterogeneity parameter
pub const ALPHA_LOWER_BOUND: f64 = 1e-3;

/// Upper end of the bracket used to fit the Dirichlet heterogeneity parameter
pub const ALPHA_UPPER_BOUND: f64 = 1e3;

/// A table of observed fluxes from origin areas to destination markets
#[derive(Debug, Clone, PartialEq)]
pub struct FluxTable {
    /// IDs of origin areas, one per row
    pub origins: Vec<u32>,
    /// Names of destination markets, one per column
    pub markets: Vec<String>,
    /// Flows, indexed by row then column
    pub flows: Vec<Vec<f64>>,
}

/// Get the group tag of a market column name (the part after the last underscore)
fn market_group(market: &str) -> &str {
    market.rsplit('_').next().unwrap_or(market)
}

/// Indexes of `totals` sorted by descending value, keeping input order for ties
fn rank_descending(totals: &[f64]) -> Vec<usize> {
    (0..totals.len())
        .sorted_by(|&i, &j| totals[j].total_cmp(&totals[i]))
        .collect()
}

/// Convert a requested count into the number of items to keep (non-positive means keep all)
fn count_to_keep(requested: i64, available: usize) -> usize {
    usize::try_from(requested)
        .ok()
        .filter(|&n| n > 0)
        .map_or(available, |n| n.min(available))
}

impl FluxTable {
    /// Total outgoing flux for each row
    fn flux_out(&self) -> Vec<f64> {
        self.flows.iter().map(|row| row.iter().sum()).collect()
    }

    /// Total incoming flux for each column
    fn flux_in(&self) -> Vec<f64> {
        (0..self.markets.len())
            .map(|col| self.flows.iter().map(|row| row[col]).sum())
            .collect()
    }

    /// Select a subset of areas and markets.
    ///
    /// Only markets belonging to one of `groups` are kept and areas with no outgoing flux to them
    /// are dropped. Markets are then ranked by incoming flux and areas by outgoing flux (both
    /// computed on the filtered table) and only the top `n_markets` markets and top `n_areas` areas
    /// are retained. Non-positive counts keep everything.
    ///
    /// Markets in the result are ordered by descending incoming flux and areas by descending
    /// outgoing flux.
    pub fn select(&self, groups: &[String], n_areas: i64, n_markets: i64) -> Result<FluxTable> {
        ensure!(!groups.is_empty(), "No market groups specified");

        let market_cols: Vec<usize> = self
            .markets
            .iter()
            .positions(|market| groups.iter().any(|g| g == market_group(market)))
            .collect();

        let mut filtered = FluxTable {
            origins: Vec::new(),
            markets: market_cols
                .iter()
                .map(|&col| self.markets[col].clone())
                .collect(),
            flows: Vec::new(),
        };
        for (origin, row) in self.origins.iter().zip(&self.flows) {
            let row: Vec<f64> = market_cols.iter().map(|&col| row[col]).collect();
            if row.iter().sum::<f64>() > 0.0 {
                filtered.origins.push(*origin);
                filtered.flows.push(row);
            }
        }

        let flux_out = filtered.flux_out();
        let flux_in = filtered.flux_in();

        let top_markets = rank_descending(&flux_in)
            .into_iter()
            .take(count_to_keep(n_markets, flux_in.len()))
            .collect_vec();
        let top_areas = rank_descending(&flux_out)
            .into_iter()
            .take(count_to_keep(n_areas, flux_out.len()))
            .collect_vec();

        Ok(FluxTable {
            origins: top_areas.iter().map(|&row| filtered.origins[row]).collect(),
            markets: top_markets
                .iter()
                .map(|&col| filtered.markets[col].clone())
                .collect(),
            flows: top_areas
                .iter()
                .map(|&row| {
                    top_markets
                        .iter()
                        .map(|&col| filtered.flows[row][col])
                        .collect()
                })
                .collect(),
        })
    }
}

/// Read a raw flux table from a CSV file
pub fn read_flux_table(file_path: &Path) -> Result<FluxTable> {
    read_flux_table_inner(file_path).with_context(|| input_err_msg(file_path))
}

fn read_flux_table_inner(file_path: &Path) -> Result<FluxTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(file_path)?;
    let markets: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    ensure!(!markets.is_empty(), "Flux table has no market columns");

    let mut table = FluxTable {
        origins: Vec::new(),
        markets,
        flows: Vec::new(),
    };
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let row = record
            .iter()
            .map(|field| {
                let value: f64 = field
                    .parse()
                    .with_context(|| format!("Invalid flux value '{field}' in row {row_idx}"))?;
                ensure!(
                    value.is_finite() && value >= 0.0,
                    "Flux values must be non-negative, got {value} in row {row_idx}"
                );
                Ok(value)
            })
            .collect::<Result<Vec<_>>>()?;

        table.origins.push(u32::try_from(row_idx)?);
        table.flows.push(row);
    }
    ensure!(!table.flows.is_empty(), "Flux table cannot be empty");

    Ok(table)
}

/// How area-market fluxes are estimated
#[derive(Debug, Clone, Copy, PartialEq, Default, DeserializeLabeledStringEnum)]
pub enum FluxMode {
    /// Keep observed fluxes as they are
    #[string = "raw"]
    Raw,
    /// Summarise observed fluxes by fitting a Dirichlet distribution
    #[default]
    #[string = "dirichlet"]
    Dirichlet,
}

/// Estimated flux from one area to markets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AreaFlux {
    /// Observed fluxes to each market
    Raw {
        /// Flux to each market, in market order
        values: Vec<f64>,
        /// Total outgoing flux
        weight: f64,
    },
    /// Summary of observed fluxes
    Fitted {
        /// Fraction of markets receiving any flux from this area
        p_connectivity: f64,
        /// Total outgoing flux
        weight: f64,
        /// Dirichlet heterogeneity of fluxes (only defined if the area supplies >= 2 markets)
        alpha: Option<f64>,
    },
}

impl AreaFlux {
    /// Total outgoing flux from the area
    pub fn weight(&self) -> f64 {
        match self {
            Self::Raw { weight, .. } | Self::Fitted { weight, .. } => *weight,
        }
    }
}

/// Estimated fluxes for a single bird type, keyed by area ID
pub type AreaFluxMap = BTreeMap<u32, AreaFlux>;

/// Estimated fluxes for all bird types
#[derive(Debug, Clone, PartialEq)]
pub struct FluxEstimates {
    /// The way fluxes were estimated
    pub mode: FluxMode,
    /// Estimated fluxes by bird type
    pub by_bird_type: IndexMap<BirdType, AreaFluxMap>,
}

/// Residual of the implicit maximum-likelihood equation for a symmetric Dirichlet parameter.
///
/// # Arguments
///
/// * `alpha` - Candidate value of the Dirichlet parameter
/// * `proportions` - Positive values summing to 1
pub fn dirichlet_mle_residual(alpha: f64, proportions: &[f64]) -> f64 {
    let n = proportions.len() as f64;
    let mean_log = proportions.iter().map(|p| p.ln()).sum::<f64>() / n;
    mean_log - digamma(alpha) + digamma(alpha * n)
}

/// Fit the heterogeneity parameter of a symmetric Dirichlet distribution to observed proportions.
///
/// The estimate is the root of [`dirichlet_mle_residual`] in
/// [[`ALPHA_LOWER_BOUND`], [`ALPHA_UPPER_BOUND`]].
///
/// For identical proportions `1/k` the residual is `digamma(k·α) - digamma(α) - ln k`, which is
/// positive for every finite `α` and only tends to zero as `α` grows, so no bracket holds a root.
/// These give `f64::INFINITY` instead, i.e. uniform weights, which is the limiting estimate.
/// Proportions that differ but are so close to uniform that the root lies beyond the upper bound
/// are still an error.
pub fn fit_dirichlet_alpha(proportions: &[f64]) -> Result<f64> {
    ensure!(
        proportions.len() >= 2,
        "At least two proportions are needed to fit a Dirichlet distribution"
    );

    let first = proportions[0];
    if proportions
        .iter()
        .all(|p| approx_eq!(f64, *p, first, epsilon = 1e-12))
    {
        return Ok(f64::INFINITY);
    }

    brent_root(
        |alpha| dirichlet_mle_residual(alpha, proportions),
        ALPHA_LOWER_BOUND,
        ALPHA_UPPER_BOUND,
    )
}

/// Estimate the flux from each area in a (selected) flux table
pub fn estimate_area_fluxes(table: &FluxTable, mode: FluxMode) -> Result<AreaFluxMap> {
    let mut fluxes = AreaFluxMap::new();
    for (&area_id, row) in table.origins.iter().zip(&table.flows) {
        let weight: f64 = row.iter().sum();
        let flux = match mode {
            FluxMode::Raw => AreaFlux::Raw {
                values: row.clone(),
                weight,
            },
            FluxMode::Dirichlet => {
                let positive: Vec<f64> = row.iter().copied().filter(|v| *v > 0.0).collect();
                let degree = positive.len();
                if degree == 0 {
                    debug!("Area {area_id} has no flux to the selected markets; skipping");
                    continue;
                }

                let alpha = if degree >= 2 {
                    let proportions: Vec<f64> = positive.iter().map(|v| v / weight).collect();
                    Some(fit_dirichlet_alpha(&proportions).with_context(|| {
                        format!("Could not fit flux heterogeneity for area {area_id}")
                    })?)
                } else {
                    None
                };

                AreaFlux::Fitted {
                    p_connectivity: degree as f64 / table.markets.len() as f64,
                    weight,
                    alpha,
                }
            }
        };
        fluxes.insert(area_id, flux);
    }

    Ok(fluxes)
}

/// Parameters controlling how area-market fluxes are estimated
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FluxParameters {
    /// How fluxes are estimated
    #[serde(default)]
    pub mode: FluxMode,
    /// Number of areas to keep (those with the largest outgoing flux). Non-positive keeps all.
    #[serde(default)]
    pub n_areas: i64,
    /// Number of markets to keep (those with the largest incoming flux). Non-positive keeps all.
    ///
    /// Only used with raw fluxes.
    #[serde(default)]
    pub n_markets: i64,
    /// Groups of markets to include
    pub districts: Vec<String>,
    /// Paths to raw flux tables for each bird type
    pub paths_raw_flux: IndexMap<BirdType, PathBuf>,
}

/// Estimate area-market fluxes for each of the requested bird types
pub fn compute_flux_parameters(
    params: &FluxParameters,
    bird_types: &[BirdType],
) -> Result<FluxEstimates> {
    ensure!(!params.districts.is_empty(), "districts is empty");

    let mut by_bird_type = IndexMap::new();
    for &bird_type in bird_types {
        let path = params
            .paths_raw_flux
            .get(&bird_type)
            .with_context(|| format!("No flux file given for {bird_type}"))?;

        // Markets are never truncated when fitting
        let n_markets = match params.mode {
            FluxMode::Raw => params.n_markets,
            FluxMode::Dirichlet => -1,
        };
        let table = read_flux_table(path)?.select(&params.districts, params.n_areas, n_markets)?;
        debug!(
            "Flux table for {bird_type}: {} areas, {} markets",
            table.origins.len(),
            table.markets.len()
        );

        let fluxes = estimate_area_fluxes(&table, params.mode)
            .with_context(|| format!("Could not estimate fluxes for {bird_type}"))?;
        by_bird_type.insert(bird_type, fluxes);
    }

    Ok(FluxEstimates {
        mode: params.mode,
        by_bird_type,
    })
}

/// Get IDs of areas with a positive outgoing flux for any of the given bird types.
///
/// # Returns
///
/// Sorted area IDs. A warning is emitted if there are none.
pub fn get_areas_included(estimates: &FluxEstimates, bird_types: &[BirdType]) -> Vec<u32> {
    let areas: BTreeSet<u32> = bird_types
        .iter()
        .filter_map(|bt| estimates.by_bird_type.get(bt))
        .flat_map(|fluxes| {
            fluxes
                .iter()
                .filter(|(_, flux)| flux.weight() > 0.0)
                .map(|(id, _)| *id)
        })
        .collect();

    if areas.is_empty() {
        warn!("No areas included");
    }

    areas.into_iter().collect()
}

/// Write estimated fluxes to a JSON file
pub fn write_flux_parameters(file_path: &Path, estimates: &FluxEstimates) -> Result<()> {
    let json = serde_json::to_string(&estimates.by_bird_type)?;
    fs::write(file_path, json)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}
