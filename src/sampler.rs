//! Draws per-entity values (farm sizes, rollout times, refill parameters, etc.) from a configurable
//! family of distributions.
//!
//! A parameter field is either a plain number, used for every entity, or a table with a `mode` key
//! selecting how values are drawn:
//!
//! * `Constant` - broadcast `value`
//! * `Custom` - sample with replacement from `values` with probability mass `pmf`
//! * `List` - use `values` verbatim (must contain exactly one value per entity)
//! * `NegativeBinomial` - sample from a negative binomial with parameters `p` and `n`, optionally
//!   truncated to the integer range `bounds = [lo, hi]`
use anyhow::{Context, Result, bail, ensure};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand_distr::{Gamma, Poisson};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, NegativeBinomial};
use std::fmt;

/// Largest number of values a truncated negative binomial may range over
const MAX_TRUNCATED_SPAN: u64 = 1_000_000;

/// A scalar parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// An integer value
    Integer(i64),
    /// A floating-point value
    Float(f64),
}

impl Scalar {
    /// The value as an `f64`
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Integer(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    /// The value as an integer.
    ///
    /// Floats are accepted only if they hold an integer value.
    pub fn to_integer(self) -> Result<i64> {
        match self {
            Self::Integer(value) => Ok(value),
            Self::Float(value) => {
                ensure!(
                    value.is_finite() && value.fract() == 0.0,
                    "{value} is not an integer"
                );
                Ok(value as i64)
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

/// Describes how to draw the values of a parameter field
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode")]
pub enum ParameterDescriptor {
    /// Every entity gets the same value
    Constant {
        /// The value
        value: Scalar,
    },
    /// Values are drawn with replacement from a discrete distribution
    Custom {
        /// The possible values
        values: Vec<Scalar>,
        /// Probability mass for each value (need not be normalised)
        pmf: Vec<f64>,
    },
    /// Values are given explicitly, one per entity
    List {
        /// The values
        values: Vec<Scalar>,
    },
    /// Values are drawn from a (possibly truncated) negative binomial distribution
    NegativeBinomial {
        /// Probability of success
        p: f64,
        /// Number of successes
        n: f64,
        /// Inclusive range of values to which the distribution is truncated
        #[serde(default)]
        bounds: Option<(u64, u64)>,
    },
}

impl ParameterDescriptor {
    /// Check that the descriptor's parameters are valid
    fn validate(&self) -> Result<()> {
        match self {
            Self::Constant { .. } | Self::List { .. } => {}
            Self::Custom { values, pmf } => {
                ensure!(!values.is_empty(), "Custom mode requires at least one value");
                ensure!(
                    values.len() == pmf.len(),
                    "Custom mode requires the same number of values ({}) and pmf entries ({})",
                    values.len(),
                    pmf.len()
                );
                ensure!(
                    pmf.iter().all(|p| p.is_finite() && *p >= 0.0),
                    "pmf entries must be non-negative"
                );
                ensure!(
                    pmf.iter().sum::<f64>() > 0.0,
                    "pmf must have a positive total"
                );
            }
            Self::NegativeBinomial { p, n, bounds } => {
                ensure!(
                    *p > 0.0 && *p <= 1.0,
                    "NegativeBinomial p must be in (0,1], got {p}"
                );
                ensure!(
                    n.is_finite() && *n > 0.0,
                    "NegativeBinomial n must be positive, got {n}"
                );
                if let Some((lo, hi)) = bounds {
                    ensure!(lo <= hi, "Invalid bounds [{lo}, {hi}]");
                    ensure!(
                        hi - lo < MAX_TRUNCATED_SPAN,
                        "Bounds [{lo}, {hi}] span more than {MAX_TRUNCATED_SPAN} values"
                    );
                }
            }
        }

        Ok(())
    }

    /// Draw exactly `nrep` values
    pub fn sample<R: Rng + ?Sized>(&self, nrep: usize, rng: &mut R) -> Result<Vec<Scalar>> {
        match self {
            Self::Constant { value } => Ok(vec![*value; nrep]),
            Self::Custom { values, pmf } => {
                let dist = WeightedIndex::new(pmf).context("Invalid pmf")?;
                Ok((0..nrep).map(|_| values[dist.sample(rng)]).collect())
            }
            Self::List { values } => {
                ensure!(
                    values.len() == nrep,
                    "Number of values ({}) does not match number of replicates ({nrep})",
                    values.len()
                );
                Ok(values.clone())
            }
            Self::NegativeBinomial { p, n, bounds: None } => {
                sample_negative_binomial(*p, *n, nrep, rng)
            }
            Self::NegativeBinomial {
                p,
                n,
                bounds: Some((lo, hi)),
            } => sample_truncated_negative_binomial(*p, *n, *lo, *hi, nrep, rng),
        }
    }
}

/// Convert a sampled count into a [`Scalar`]
fn count_to_scalar(count: u64) -> Result<Scalar> {
    Ok(Scalar::Integer(
        i64::try_from(count).context("Sampled value is too large")?,
    ))
}

/// Draw `nrep` counts of failures before `n` successes with success probability `p`.
///
/// Drawn as a Gamma-Poisson mixture, which also covers non-integer `n`.
fn sample_negative_binomial<R: Rng + ?Sized>(
    p: f64,
    n: f64,
    nrep: usize,
    rng: &mut R,
) -> Result<Vec<Scalar>> {
    if p == 1.0 {
        return Ok(vec![Scalar::Integer(0); nrep]);
    }

    // statrs 0.17 draws the mixing rate with an inverted scale, so the mixture is built here
    let gamma = Gamma::new(n, (1.0 - p) / p).context("Invalid Gamma distribution parameters")?;
    (0..nrep)
        .map(|_| {
            let lambda = gamma.sample(rng);
            if lambda <= 0.0 {
                return count_to_scalar(0);
            }
            let count: f64 = Poisson::new(lambda)
                .context("Invalid Poisson distribution parameters")?
                .sample(rng);
            count_to_scalar(count as u64)
        })
        .collect()
}

/// Sample from a negative binomial PMF restricted to `[lo, hi]` and renormalised
fn sample_truncated_negative_binomial<R: Rng + ?Sized>(
    p: f64,
    n: f64,
    lo: u64,
    hi: u64,
    nrep: usize,
    rng: &mut R,
) -> Result<Vec<Scalar>> {
    if p == 1.0 {
        // All of the mass is at zero
        ensure!(
            lo == 0,
            "Negative binomial has no probability mass in [{lo}, {hi}]"
        );
        return Ok(vec![Scalar::Integer(0); nrep]);
    }

    let dist = NegativeBinomial::new(n, p).context("Invalid negative binomial parameters")?;
    let ln_pmf: Vec<f64> = (lo..=hi).map(|k| dist.ln_pmf(k)).collect();

    // Rescale before exponentiating so that far tails don't underflow to zero
    let max = ln_pmf.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    ensure!(
        max.is_finite(),
        "Negative binomial has no probability mass in [{lo}, {hi}]"
    );
    let weights: Vec<f64> = ln_pmf.iter().map(|l| (l - max).exp()).collect();

    let dist = WeightedIndex::new(&weights).context("Invalid truncated pmf")?;
    (0..nrep)
        .map(|_| count_to_scalar(lo + dist.sample(rng) as u64))
        .collect()
}

/// A parameter field: either a fixed number or a descriptor of how to draw values
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "toml::Value")]
pub enum ParameterField {
    /// The same number for every entity
    Fixed(Scalar),
    /// Values drawn according to a descriptor
    Random(ParameterDescriptor),
}

impl TryFrom<toml::Value> for ParameterField {
    type Error = anyhow::Error;

    fn try_from(value: toml::Value) -> Result<Self> {
        match value {
            toml::Value::Integer(value) => Ok(Self::Fixed(Scalar::Integer(value))),
            toml::Value::Float(value) => Ok(Self::Fixed(Scalar::Float(value))),
            toml::Value::Table(table) => {
                ensure!(
                    table.contains_key("mode"),
                    "Parameter table is missing a `mode` key"
                );
                let descriptor: ParameterDescriptor = toml::Value::Table(table)
                    .try_into()
                    .context("Invalid parameter descriptor")?;
                descriptor.validate()?;
                Ok(Self::Random(descriptor))
            }
            other => bail!(
                "Parameter must be a number or a table with a `mode` key, got {}",
                other.type_str()
            ),
        }
    }
}

impl From<Scalar> for ParameterField {
    fn from(value: Scalar) -> Self {
        Self::Fixed(value)
    }
}

impl ParameterField {
    /// Draw exactly `nrep` values for this field
    pub fn sample<R: Rng + ?Sized>(&self, nrep: usize, rng: &mut R) -> Result<Vec<Scalar>> {
        match self {
            Self::Fixed(value) => Ok(vec![*value; nrep]),
            Self::Random(descriptor) => descriptor.sample(nrep, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::{fixture, rstest};
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrapper {
        field: ParameterField,
    }

    fn parse_field(toml_str: &str) -> Result<ParameterField> {
        let wrapper: Wrapper = toml::from_str(toml_str)?;
        Ok(wrapper.field)
    }

    #[fixture]
    fn rng() -> StdRng {
        StdRng::seed_from_u64(1234)
    }

    #[rstest]
    #[case("field = 5", 0)]
    #[case("field = 5", 7)]
    #[case("field = 2.5", 3)]
    #[case("field = { mode = \"Constant\", value = 10 }", 4)]
    #[case("field = { mode = \"Custom\", values = [1, 2, 3], pmf = [1, 1, 2] }", 50)]
    #[case("field = { mode = \"NegativeBinomial\", p = 0.3, n = 2 }", 25)]
    #[case("field = { mode = \"NegativeBinomial\", p = 0.3, n = 2, bounds = [3, 8] }", 25)]
    fn test_sample_returns_nrep_values(
        mut rng: StdRng,
        #[case] toml_str: &str,
        #[case] nrep: usize,
    ) {
        let field = parse_field(toml_str).unwrap();
        assert_eq!(field.sample(nrep, &mut rng).unwrap().len(), nrep);
    }

    #[rstest]
    fn test_sample_constant(mut rng: StdRng) {
        let field = parse_field("field = { mode = \"Constant\", value = 10 }").unwrap();
        assert_eq!(
            field.sample(3, &mut rng).unwrap(),
            [Scalar::Integer(10); 3]
        );

        let field = parse_field("field = 0.5").unwrap();
        assert_eq!(field.sample(2, &mut rng).unwrap(), [Scalar::Float(0.5); 2]);
    }

    #[rstest]
    #[case(3, true)]
    #[case(2, false)]
    #[case(4, false)]
    fn test_sample_list(mut rng: StdRng, #[case] nrep: usize, #[case] expected_valid: bool) {
        let field = parse_field("field = { mode = \"List\", values = [4, 5, 6] }").unwrap();
        let result = field.sample(nrep, &mut rng);
        assert_eq!(result.is_ok(), expected_valid);
        if expected_valid {
            assert_eq!(
                result.unwrap(),
                [Scalar::Integer(4), Scalar::Integer(5), Scalar::Integer(6)]
            );
        }
    }

    #[rstest]
    fn test_sample_custom_respects_support(mut rng: StdRng) {
        let field =
            parse_field("field = { mode = \"Custom\", values = [1, 2, 3], pmf = [0.5, 0.0, 0.5] }")
                .unwrap();
        let values = field.sample(200, &mut rng).unwrap();
        assert!(values.contains(&Scalar::Integer(1)));
        assert!(values.contains(&Scalar::Integer(3)));
        assert!(!values.contains(&Scalar::Integer(2)));
    }

    #[rstest]
    fn test_sample_truncated_negative_binomial_within_bounds(mut rng: StdRng) {
        let field =
            parse_field("field = { mode = \"NegativeBinomial\", p = 0.1, n = 5, bounds = [10, 12] }")
                .unwrap();
        for value in field.sample(100, &mut rng).unwrap() {
            assert!((10..=12).contains(&value.to_integer().unwrap()));
        }
    }

    #[rstest]
    fn test_sample_negative_binomial_mean(mut rng: StdRng) {
        // Mean of the number of failures is n(1-p)/p
        let field =
            parse_field("field = { mode = \"NegativeBinomial\", p = 0.25, n = 4 }").unwrap();
        let draws = 20_000;
        let total: i64 = field
            .sample(draws, &mut rng)
            .unwrap()
            .into_iter()
            .map(|value| value.to_integer().unwrap())
            .sum();
        assert_approx_eq!(f64, total as f64 / draws as f64, 12.0, epsilon = 0.3);
    }

    #[rstest]
    #[case("field = { mode = \"NegativeBinomial\", p = 1.0, n = 3 }")]
    #[case("field = { mode = \"NegativeBinomial\", p = 1.0, n = 3, bounds = [0, 4] }")]
    fn test_sample_negative_binomial_certain_success(mut rng: StdRng, #[case] toml_str: &str) {
        let field = parse_field(toml_str).unwrap();
        assert_eq!(field.sample(5, &mut rng).unwrap(), [Scalar::Integer(0); 5]);
    }

    #[rstest]
    fn test_sample_truncated_negative_binomial_geometric(mut rng: StdRng) {
        // With n = 1 the pmf is p (1-p)^k, so over [0, 1] zero is drawn with probability 1/(2-p)
        let field =
            parse_field("field = { mode = \"NegativeBinomial\", p = 0.5, n = 1, bounds = [0, 1] }")
                .unwrap();
        let draws = 20_000;
        let zeros = field
            .sample(draws, &mut rng)
            .unwrap()
            .into_iter()
            .filter(|value| *value == Scalar::Integer(0))
            .count();
        assert_approx_eq!(f64, zeros as f64 / draws as f64, 2.0 / 3.0, epsilon = 0.02);
    }

    #[test]
    fn test_sample_truncated_negative_binomial_no_mass() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sample_truncated_negative_binomial(1.0, 2.0, 1, 3, 4, &mut rng).is_err());
    }

    #[rstest]
    #[case("field = \"five\"")] // Not a number or table
    #[case("field = [1, 2]")] // Not a number or table
    #[case("field = { value = 1 }")] // Missing mode
    #[case("field = { mode = \"Poisson\", lambda = 1 }")] // Unknown mode
    #[case("field = { mode = \"Constant\" }")] // Missing value
    #[case("field = { mode = \"Custom\", values = [1, 2], pmf = [1] }")] // Length mismatch
    #[case("field = { mode = \"Custom\", values = [1, 2], pmf = [1, -1] }")] // Negative pmf
    #[case("field = { mode = \"Custom\", values = \"abc\", pmf = [1] }")] // Type mismatch
    #[case("field = { mode = \"NegativeBinomial\", p = 0.0, n = 1 }")] // Invalid p
    #[case("field = { mode = \"NegativeBinomial\", p = 0.5, n = 0 }")] // Invalid n
    #[case("field = { mode = \"NegativeBinomial\", p = 0.5, n = 1, bounds = [5, 2] }")]
    #[case("field = { mode = \"NegativeBinomial\", p = 0.5, n = 1, bounds = [0, 10000000000] }")]
    fn test_parse_field_invalid(#[case] toml_str: &str) {
        assert!(parse_field(toml_str).is_err());
    }

    #[rstest]
    #[case(Scalar::Integer(3), Some(3))]
    #[case(Scalar::Float(3.0), Some(3))]
    #[case(Scalar::Float(3.5), None)]
    #[case(Scalar::Float(f64::NAN), None)]
    fn test_scalar_to_integer(#[case] value: Scalar, #[case] expected: Option<i64>) {
        assert_eq!(value.to_integer().ok(), expected);
    }
}
