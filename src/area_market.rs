//! Edges carrying birds from areas to markets.
use crate::bird::BirdType;
use crate::edge::WeightedEdge;
use crate::flux::{ALPHA_LOWER_BOUND, AreaFlux, FluxEstimates};
use crate::geography::RegionTable;
use crate::network::Heterogeneity;
use anyhow::{Context, Result, ensure};
use itertools::Itertools;
use log::warn;
use rand::Rng;
use rand::seq::index;
use rand_distr::{Binomial, Distribution};

/// Convert an area's observed fluxes into edges with weights proportional to those fluxes
fn raw_edges(
    area_index: u32,
    values: &[f64],
    n_markets: u32,
    bird_type: BirdType,
) -> Result<Vec<WeightedEdge>> {
    ensure!(
        values.len() <= n_markets as usize,
        "Observed fluxes refer to {} markets but there are only {n_markets}",
        values.len()
    );

    let total: f64 = values.iter().sum();
    Ok((0..)
        .zip(values)
        .filter(|(_, value)| **value > 0.0)
        .map(|(market, value)| WeightedEdge::new(area_index, market, value / total, bird_type))
        .collect())
}

/// Draw an area's edges to markets from its fitted connectivity and heterogeneity.
///
/// The number of markets is binomial, redrawn until at least one market is chosen. Markets are
/// chosen uniformly without replacement and edge weights follow a symmetric Dirichlet distribution.
pub fn sample_area_edges<R: Rng + ?Sized>(
    area_index: u32,
    p_connectivity: f64,
    heterogeneity: Heterogeneity,
    n_markets: u32,
    bird_type: BirdType,
    rng: &mut R,
) -> Result<Vec<WeightedEdge>> {
    ensure!(
        p_connectivity > 0.0 && p_connectivity <= 1.0,
        "Connectivity must be in (0,1], got {p_connectivity}"
    );
    ensure!(n_markets > 0, "There are no markets to connect to");

    let binomial = Binomial::new(u64::from(n_markets), p_connectivity)
        .context("Invalid binomial distribution parameters")?;
    let out_degree = loop {
        let k = binomial.sample(rng) as usize;
        if k > 0 {
            break k;
        }
    };

    let markets = index::sample(rng, n_markets as usize, out_degree)
        .into_iter()
        .sorted_unstable()
        .collect_vec();
    let weights = heterogeneity.sample_weights(out_degree, rng)?;

    Ok(markets
        .into_iter()
        .zip(weights)
        .map(|(market, weight)| WeightedEdge::new(area_index, market as u32, weight, bird_type))
        .collect())
}

/// Generate edges from included areas to markets for every bird type.
///
/// Raw estimates are replayed as observed. Fitted estimates are used to draw a random set of edges.
/// Areas with no outgoing flux are skipped. Areas are identified by their local index.
pub fn compute_area_market_flux<R: Rng + ?Sized>(
    regions: &RegionTable,
    estimates: &FluxEstimates,
    bird_types: &[BirdType],
    n_markets: u32,
    rng: &mut R,
) -> Result<Vec<WeightedEdge>> {
    let local_indexes = regions.local_indexes();

    let mut edges = Vec::new();
    for &bird_type in bird_types {
        let fluxes = estimates
            .by_bird_type
            .get(&bird_type)
            .with_context(|| format!("No flux estimates for {bird_type}"))?;

        for (area_id, &area_index) in &local_indexes {
            let Some(flux) = fluxes.get(area_id) else {
                continue;
            };
            if flux.weight() == 0.0 {
                continue;
            }

            let area_edges = match flux {
                AreaFlux::Raw { values, .. } => raw_edges(area_index, values, n_markets, bird_type),
                AreaFlux::Fitted {
                    p_connectivity,
                    alpha,
                    ..
                } => {
                    let heterogeneity =
                        Heterogeneity::from_concentration(alpha.unwrap_or(ALPHA_LOWER_BOUND))?;
                    sample_area_edges(
                        area_index,
                        *p_connectivity,
                        heterogeneity,
                        n_markets,
                        bird_type,
                        rng,
                    )
                }
            };
            edges.extend(area_edges.with_context(|| {
                format!("Could not generate {bird_type} market links for area {area_id}")
            })?);
        }
    }

    if edges.is_empty() {
        warn!("No area-market flux generated");
    }

    Ok(edges)
}
