//! Fixtures for tests

use crate::bird::BirdType;
use crate::flux::{AreaFlux, FluxEstimates, FluxMode};
use crate::geography::RegionTable;
use geo::{MultiPolygon, Rect};
use indexmap::indexmap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// An axis-aligned square with its lower-left corner at (`x`, `y`)
pub fn square(x: f64, y: f64, side: f64) -> MultiPolygon<f64> {
    Rect::new((x, y), (x + side, y + side)).to_polygon().into()
}

#[fixture]
pub fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

/// Four 1km squares in a row; areas 0, 1 and 3 are included
#[fixture]
pub fn region_table() -> RegionTable {
    RegionTable::from_geometries(
        (0..4)
            .map(|i| square(f64::from(i) * 1000.0, 0.0, 1000.0))
            .collect(),
        &[0, 1, 3],
    )
    .unwrap()
}

fn fitted(p_connectivity: f64, weight: f64, alpha: Option<f64>) -> AreaFlux {
    AreaFlux::Fitted {
        p_connectivity,
        weight,
        alpha,
    }
}

/// Fitted fluxes consistent with [`region_table`]
#[fixture]
pub fn fitted_fluxes() -> FluxEstimates {
    FluxEstimates {
        mode: FluxMode::Dirichlet,
        by_bird_type: indexmap! {
            BirdType::Broiler => [
                (0, fitted(0.5, 10.0, Some(0.5))),
                (1, fitted(0.25, 30.0, None)),
                (3, fitted(1.0, 60.0, Some(2.0))),
            ]
            .into_iter()
            .collect(),
            BirdType::Duck => [(3, fitted(0.5, 5.0, Some(1.0)))].into_iter().collect(),
        },
    }
}

/// Raw fluxes to three markets, consistent with [`region_table`]
#[fixture]
pub fn raw_fluxes() -> FluxEstimates {
    let raw = |values: Vec<f64>| AreaFlux::Raw {
        weight: values.iter().sum(),
        values,
    };

    FluxEstimates {
        mode: FluxMode::Raw,
        by_bird_type: indexmap! {
            BirdType::Broiler => [
                (0, raw(vec![1.0, 0.0, 3.0])),
                (1, raw(vec![0.0, 0.0, 0.0])),
                (3, raw(vec![2.0, 2.0, 4.0])),
            ]
            .into_iter()
            .collect(),
        },
    }
}
