//! Generation of the weighted network of bird movements between markets.
//!
//! The network is a directed acyclic graph: edges always run from an earlier market to a later one.
//! Sources are picked either uniformly at random or from an urn in which every market appears once
//! for each time it has already been picked, so that busy markets attract more links.
use crate::bird::BirdType;
use crate::edge::WeightedEdge;
use crate::input::{check_probability, deserialise_proportion};
use crate::maths::sample_dirichlet;
use anyhow::{Context, Result, ensure};
use itertools::Itertools;
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Binomial, Distribution};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

/// An unweighted, directed edge between two markets
pub type Edge = (u32, u32);

/// A multiset of market indexes, one copy for each time a market has been chosen as a source
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUrn(Vec<u32>);

impl NodeUrn {
    /// Create an urn holding only the first market
    pub fn new() -> Self {
        Self(vec![0])
    }

    /// Add one more copy of `node`
    pub fn push(&mut self, node: u32) {
        self.0.push(node);
    }

    /// Draw a node not in `exclude`, with probability proportional to its number of copies.
    ///
    /// Returns `None` if every node in the urn is excluded.
    pub fn draw_excluding<R: Rng + ?Sized>(&self, exclude: &[u32], rng: &mut R) -> Option<u32> {
        let candidates = self
            .0
            .iter()
            .filter(|node| !exclude.contains(node))
            .collect_vec();
        candidates.choose(rng).map(|node| **node)
    }
}

/// Draw uniformly from the nodes in `0..j` which are not in `exclude`
fn draw_unused<R: Rng + ?Sized>(j: u32, exclude: &[u32], rng: &mut R) -> Option<u32> {
    (0..j)
        .filter(|node| !exclude.contains(node))
        .collect_vec()
        .choose(rng)
        .copied()
}

impl Default for NodeUrn {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a directed acyclic graph over `n` nodes by mixed random and preferential attachment.
///
/// # Arguments
///
/// * `n` - Number of nodes
/// * `rho` - Edge density: node `j` gets `Binomial(j, rho)` incoming edges
/// * `p_random` - Probability that an edge's source is chosen uniformly rather than from the urn
/// * `rng` - Random number generator
///
/// # Returns
///
/// Edges as `(source, dest)` pairs, with `source < dest`.
pub fn generate_mixed_attachment_network<R: Rng + ?Sized>(
    n: u32,
    rho: f64,
    p_random: f64,
    rng: &mut R,
) -> Result<Vec<Edge>> {
    check_probability(rho, "rho")?;
    check_probability(p_random, "p_random")?;

    let mut edges = Vec::new();
    if rho == 0.0 {
        return Ok(edges);
    }

    let mut urn = NodeUrn::new();
    for j in 1..n {
        let in_degree = Binomial::new(u64::from(j), rho)
            .context("Invalid binomial distribution parameters")?
            .sample(rng) as usize;

        let mut sources: Vec<u32> = Vec::with_capacity(in_degree);
        while sources.len() < in_degree {
            let source = if rng.r#gen::<f64>() < p_random {
                rng.gen_range(0..j)
            } else {
                // Once every node in the urn is taken, fall back to the unused earlier nodes
                urn.draw_excluding(&sources, rng)
                    .or_else(|| draw_unused(j, &sources, rng))
                    .with_context(|| format!("No unused source left for market {j}"))?
            };

            if !sources.contains(&source) {
                edges.push((source, j));
                urn.push(source);
                sources.push(source);
            }
        }
    }

    Ok(edges)
}

/// How the weights of a market's outgoing edges vary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Heterogeneity {
    /// All outgoing edges have the same weight
    Uniform,
    /// Weights are drawn from a symmetric Dirichlet distribution with this concentration
    Dirichlet(f64),
}

impl Heterogeneity {
    /// Interpret a concentration parameter, with infinity meaning uniform weights
    pub fn from_concentration(alpha: f64) -> Result<Self> {
        ensure!(
            alpha > 0.0,
            "Heterogeneity parameter must be positive, got {alpha}"
        );
        if alpha == f64::INFINITY {
            Ok(Self::Uniform)
        } else {
            Ok(Self::Dirichlet(alpha))
        }
    }

    /// Draw `k` weights summing to 1
    pub fn sample_weights<R: Rng + ?Sized>(self, k: usize, rng: &mut R) -> Result<Vec<f64>> {
        match self {
            Self::Uniform => {
                ensure!(k > 0, "Cannot draw weights for no edges");
                Ok(vec![1.0 / k as f64; k])
            }
            Self::Dirichlet(alpha) => sample_dirichlet(alpha, k, rng),
        }
    }
}

/// Assign weights to edges and add self-loops.
///
/// Every node with outgoing edges gets a self-loop of weight `self_w`, with the remaining
/// `1 - self_w` split between its outgoing edges. Nodes without outgoing edges get a self-loop of
/// weight 1.
pub fn compute_weights_dirichlet<R: Rng + ?Sized>(
    n: u32,
    edges: &[Edge],
    self_w: f64,
    heterogeneity: Heterogeneity,
    bird_type: BirdType,
    rng: &mut R,
) -> Result<Vec<WeightedEdge>> {
    check_probability(self_w, "self_w")?;

    let mut adjacency: Vec<Vec<u32>> = vec![Vec::new(); n as usize];
    for &(source, dest) in edges {
        ensure!(
            source < n && dest < n,
            "Edge ({source}, {dest}) refers to a node outside 0..{n}"
        );
        adjacency[source as usize].push(dest);
    }

    let mut weighted = Vec::with_capacity(edges.len() + n as usize);
    for (source, dests) in (0..n).zip(&adjacency) {
        if dests.is_empty() {
            weighted.push(WeightedEdge::new(source, source, 1.0, bird_type));
            continue;
        }

        weighted.push(WeightedEdge::new(source, source, self_w, bird_type));
        if self_w < 1.0 {
            let weights = heterogeneity.sample_weights(dests.len(), rng)?;
            weighted.extend(
                dests
                    .iter()
                    .zip(weights)
                    .map(|(&dest, w)| {
                        WeightedEdge::new(source, dest, (1.0 - self_w) * w, bird_type)
                    }),
            );
        }
    }

    Ok(weighted)
}

/// The model used to generate the market network
#[derive(Debug, Clone, Copy, PartialEq, Default, DeserializeLabeledStringEnum)]
pub enum NetworkMode {
    /// Mixed random and preferential attachment
    #[default]
    #[string = "generative_mixed_attachment_model"]
    MixedAttachment,
}

/// Parameters controlling the market network
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketNetworkParameters {
    /// The model used to generate the network
    #[serde(default)]
    pub mode: NetworkMode,
    /// Edge density
    #[serde(deserialize_with = "deserialise_proportion")]
    pub rho_market: f64,
    /// Probability that an edge's source is chosen uniformly at random
    #[serde(deserialize_with = "deserialise_proportion")]
    pub p_random_market: f64,
    /// Weight of self-loops
    #[serde(deserialize_with = "deserialise_proportion")]
    pub self_w_market: f64,
    /// Heterogeneity of edge weights (`inf` for uniform weights)
    pub het_w_market: f64,
}

/// Generate an independent weighted market network for each bird type
pub fn generate_market_network<R: Rng + ?Sized>(
    n_markets: u32,
    bird_types: &[BirdType],
    params: &MarketNetworkParameters,
    rng: &mut R,
) -> Result<Vec<WeightedEdge>> {
    let heterogeneity = Heterogeneity::from_concentration(params.het_w_market)?;

    let mut weighted = Vec::new();
    for &bird_type in bird_types {
        let edges = match params.mode {
            NetworkMode::MixedAttachment => generate_mixed_attachment_network(
                n_markets,
                params.rho_market,
                params.p_random_market,
                rng,
            )?,
        };
        weighted.extend(compute_weights_dirichlet(
            n_markets,
            &edges,
            params.self_w_market,
            heterogeneity,
            bird_type,
            rng,
        )?);
    }

    Ok(weighted)
}
