//! Markets and the layered split of birds sold on to wholesalers and retailers.
use crate::bird::{BirdType, check_bird_types};
use anyhow::{Context, Result, ensure};
use float_cmp::approx_eq;
use geo::Coord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Proportion of birds sold to wholesalers and retailers at each layer of the vendor hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerProportions {
    /// Proportion sold to wholesalers, by layer
    #[serde(rename(serialize = "propBirdsSold2WS", deserialize = "W"))]
    pub wholesale: Vec<f64>,
    /// Proportion sold to retailers, by layer
    #[serde(rename(serialize = "propBirdsSold2R", deserialize = "R"))]
    pub retail: Vec<f64>,
}

impl LayerProportions {
    /// Check the proportions for one bird type.
    ///
    /// Both lists must have one entry per layer, everything must go to either wholesalers or
    /// retailers in the first layer and nothing is sold on from the last layer.
    pub fn validate(&self, n_layers: usize) -> Result<()> {
        ensure!(n_layers > 0, "n_layers must be positive");
        ensure!(
            self.wholesale.len() == n_layers,
            "Wholesaler parameters list must contain {n_layers} values"
        );
        ensure!(
            self.retail.len() == n_layers,
            "Retailer parameters list must contain {n_layers} values"
        );
        ensure!(
            self.wholesale
                .iter()
                .chain(&self.retail)
                .all(|p| (0.0..=1.0).contains(p)),
            "Wholesaler and retailer parameters must be in [0,1]"
        );
        ensure!(
            approx_eq!(f64, self.wholesale[0] + self.retail[0], 1.0, epsilon = 1e-9),
            "Wholesaler and retailer parameters must add up to 1 in first layer"
        );
        ensure!(
            self.wholesale[n_layers - 1] == 0.0 && self.retail[n_layers - 1] == 0.0,
            "Last layer parameters must be equal to 0"
        );

        Ok(())
    }
}

/// Market coordinates along one axis
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MarketCoordinates {
    /// All markets share this coordinate
    Shared(f64),
    /// One coordinate per market
    PerMarket(Vec<f64>),
}

impl MarketCoordinates {
    fn expand(&self, n: usize, axis: &str) -> Result<Vec<f64>> {
        match self {
            Self::Shared(value) => Ok(vec![*value; n]),
            Self::PerMarket(values) => {
                ensure!(
                    values.len() == n,
                    "{axis}s must contain exactly {n} elements, contains {}",
                    values.len()
                );
                Ok(values.clone())
            }
        }
    }
}

/// Parameters describing the markets
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketParameters {
    /// Number of markets
    pub n_markets: u32,
    /// Number of layers in the vendor hierarchy
    pub n_layers: u32,
    /// Layered sales proportions for each bird type
    pub prop_birds_market: IndexMap<BirdType, LayerProportions>,
    /// Market x coordinates (metres). If omitted, markets are placed at the origin.
    pub xs: Option<MarketCoordinates>,
    /// Market y coordinates (metres). If omitted, markets are placed at the origin.
    pub ys: Option<MarketCoordinates>,
}

/// Work out market positions from optional coordinates
pub fn market_positions(
    n: usize,
    xs: Option<&MarketCoordinates>,
    ys: Option<&MarketCoordinates>,
) -> Result<Vec<Coord<f64>>> {
    let (Some(xs), Some(ys)) = (xs, ys) else {
        return Ok(vec![Coord { x: 0.0, y: 0.0 }; n]);
    };

    let xs = xs.expand(n, "x")?;
    let ys = ys.expand(n, "y")?;
    Ok(xs.into_iter().zip(ys).map(|(x, y)| Coord { x, y }).collect())
}

/// The kind of node
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum MarketKind {
    /// A live bird market
    Market,
}

/// A live bird market
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Market {
    /// Market index
    pub id: u32,
    /// Position (metres)
    pub x: f64,
    /// Position (metres)
    pub y: f64,
    /// The kind of node
    #[serde(rename = "Type")]
    pub kind: MarketKind,
    /// Sales proportions for each bird type traded
    #[serde(rename = "TradedBirds")]
    pub traded_birds: IndexMap<BirdType, LayerProportions>,
}

/// Markets, keyed by ID
pub type MarketCatalog = IndexMap<u32, Market>;

/// Create the market catalog.
///
/// # Arguments
///
/// * `bird_types` - Bird types traded in every market
/// * `params` - Market parameters
pub fn create_market_info(
    bird_types: &[BirdType],
    params: &MarketParameters,
) -> Result<MarketCatalog> {
    check_bird_types(bird_types)?;
    let n_layers = params.n_layers as usize;
    let traded_birds: IndexMap<BirdType, LayerProportions> = bird_types
        .iter()
        .map(|&bird_type| {
            let proportions = params
                .prop_birds_market
                .get(&bird_type)
                .with_context(|| format!("{bird_type} not in prop_birds_market"))?;
            proportions
                .validate(n_layers)
                .with_context(|| format!("Invalid market proportions for {bird_type}"))?;
            Ok((bird_type, proportions.clone()))
        })
        .collect::<Result<_>>()?;

    let positions = market_positions(
        params.n_markets as usize,
        params.xs.as_ref(),
        params.ys.as_ref(),
    )?;

    Ok((0..params.n_markets)
        .zip(positions)
        .map(|(id, position)| {
            let market = Market {
                id,
                x: position.x,
                y: position.y,
                kind: MarketKind::Market,
                traded_birds: traded_birds.clone(),
            };
            (id, market)
        })
        .collect())
}

/// Write a market catalog to a JSON file
pub fn write_market_catalog(file_path: &Path, markets: &MarketCatalog) -> Result<()> {
    fs::write(file_path, serde_json::to_string(markets)?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}
