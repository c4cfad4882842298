//! Numerical routines shared by the generators: root finding and Dirichlet sampling.
use anyhow::{Context, Result, bail, ensure};
use rand::Rng;
use rand_distr::{Distribution, Gamma};

pub use statrs::function::gamma::digamma;

/// Absolute tolerance on the root's position for [`brent_root`]
const ROOT_XTOL: f64 = 2e-12;

/// Maximum number of iterations for [`brent_root`]
const ROOT_MAX_ITERATIONS: usize = 100;

/// Find a root of `f` within the bracket `[lower, upper]` using Brent's method.
///
/// `f(lower)` and `f(upper)` must have opposite signs (or one of them must be exactly zero).
///
/// # Arguments
///
/// * `f` - The function whose root is sought
/// * `lower` - Lower end of the bracket
/// * `upper` - Upper end of the bracket
///
/// # Returns
///
/// The position of the root, or an error if the bracket does not contain a sign change or the
/// method fails to converge.
pub fn brent_root<F>(f: F, lower: f64, upper: f64) -> Result<f64>
where
    F: Fn(f64) -> f64,
{
    ensure!(lower < upper, "Invalid bracket [{lower}, {upper}]");

    let (mut a, mut b) = (lower, upper);
    let (mut fa, mut fb) = (f(a), f(b));
    ensure!(
        fa.is_finite() && fb.is_finite(),
        "Function is not finite at the ends of the bracket [{lower}, {upper}]"
    );
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    ensure!(
        fa.signum() != fb.signum(),
        "f(a) and f(b) must have different signs (bracket [{lower}, {upper}])"
    );

    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;
    for _ in 0..ROOT_MAX_ITERATIONS {
        if fb.signum() == fc.signum() {
            // Root lies between a and b
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * ROOT_XTOL;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol || fb == 0.0 {
            return Ok(b);
        }

        if e.abs() >= tol && fa.abs() > fb.abs() {
            // Attempt inverse quadratic interpolation (or secant step)
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();

            let min1 = 3.0 * xm * q - (tol * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                // Interpolation failed, use bisection
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(xm) };
        fb = f(b);
    }

    bail!("Root finding did not converge after {ROOT_MAX_ITERATIONS} iterations")
}

/// Draw the logarithm of a Gamma(`alpha`, 1) variate.
///
/// Working in log space keeps draws with very small shape parameters from underflowing to zero.
fn sample_ln_gamma<R: Rng + ?Sized>(gamma: &Gamma<f64>, alpha: f64, rng: &mut R) -> f64 {
    if alpha < 1.0 {
        // Gamma(a) ~ Gamma(a + 1) * U^(1/a)
        let u = 1.0 - rng.r#gen::<f64>();
        gamma.sample(rng).ln() + u.ln() / alpha
    } else {
        gamma.sample(rng).ln()
    }
}

/// Draw a weight vector of length `k` from a symmetric Dirichlet distribution.
///
/// # Arguments
///
/// * `alpha` - Concentration parameter (must be positive and finite)
/// * `k` - Number of components
/// * `rng` - Random number generator
pub fn sample_dirichlet<R: Rng + ?Sized>(alpha: f64, k: usize, rng: &mut R) -> Result<Vec<f64>> {
    ensure!(k > 0, "Cannot draw a Dirichlet sample with no components");
    ensure!(
        alpha.is_finite() && alpha > 0.0,
        "Dirichlet concentration must be a positive finite number, got {alpha}"
    );

    if k == 1 {
        return Ok(vec![1.0]);
    }

    let shape = if alpha < 1.0 { alpha + 1.0 } else { alpha };
    let gamma = Gamma::new(shape, 1.0).context("Invalid Gamma distribution parameters")?;
    let log_draws: Vec<f64> = (0..k)
        .map(|_| sample_ln_gamma(&gamma, alpha, rng))
        .collect();

    // Normalise with the log-sum-exp trick
    let max = log_draws.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let draws: Vec<f64> = log_draws.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = draws.iter().sum();

    Ok(draws.into_iter().map(|w| w / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    #[rstest]
    #[case(|x: f64| x - 2.0, 0.0, 5.0, 2.0)]
    #[case(|x: f64| x * x - 2.0, 0.0, 2.0, std::f64::consts::SQRT_2)]
    #[case(|x: f64| x.cos() - x, 0.0, 1.0, 0.739_085_133_215_160_7)]
    #[case(|x: f64| x.ln(), 0.5, 1.0, 1.0)] // Root at end of bracket
    fn test_brent_root(
        #[case] f: fn(f64) -> f64,
        #[case] lower: f64,
        #[case] upper: f64,
        #[case] expected: f64,
    ) {
        let root = brent_root(f, lower, upper).unwrap();
        assert_approx_eq!(f64, root, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_brent_root_no_sign_change() {
        assert!(brent_root(|x| x * x + 1.0, -1.0, 1.0).is_err());
        assert!(brent_root(|x| x, 1.0, -1.0).is_err());
    }

    #[rstest]
    #[case(0.001, 5)]
    #[case(0.5, 3)]
    #[case(1.0, 10)]
    #[case(50.0, 2)]
    fn test_sample_dirichlet_sums_to_one(#[case] alpha: f64, #[case] k: usize) {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let weights = sample_dirichlet(alpha, k, &mut rng).unwrap();
            assert_eq!(weights.len(), k);
            assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
            assert_approx_eq!(f64, weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_sample_dirichlet_single_component() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sample_dirichlet(0.3, 1, &mut rng).unwrap(), [1.0]);
    }

    #[test]
    fn test_sample_dirichlet_invalid() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sample_dirichlet(1.0, 0, &mut rng).is_err());
        assert!(sample_dirichlet(0.0, 3, &mut rng).is_err());
        assert!(sample_dirichlet(f64::INFINITY, 3, &mut rng).is_err());
    }
}
