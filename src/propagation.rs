//! First-order Gaussian error propagation
//!
//! For a formula $f(x_1, \dots, x_n)$ evaluated at an operating point with independent absolute
//! uncertainties $\sigma_i$, the propagated uncertainty is
//! $$
//!     \sigma_f = \sqrt{\sum_i \left(\frac{\partial f}{\partial x_i} \sigma_i\right)^2}
//! $$
//! where every partial derivative is taken symbolically and evaluated at the operating point.
use itertools::izip;
use ndarray::Array2;

use crate::error::{Error, Result};
use crate::formula::Formula;
use crate::math::outer_product;
use crate::measurement::Measurement;
use crate::statistics::pythagorean_addition;

/// Propagate the uncertainties of `values` through `formula`
///
/// `variable_names`, `values` and `errors` are matched by position. The lengths are checked before
/// the formula is parsed, so a length disagreement is always reported as a dimension mismatch.
///
/// # Examples
///
/// ```
/// use error_propagation::propagate;
///
/// let result = propagate("sin(x) * exp(y)", &["x", "y"], &[5.0, 2.0], &[0.5, 0.1]).unwrap();
///
/// assert!((result.value - 5f64.sin() * 2f64.exp()).abs() < 1e-12);
/// assert!((result.uncertainty - 1.265).abs() < 1e-3);
/// ```
///
/// # Errors
/// - [`Error::DimensionMismatch`] if the three sequences differ in length
/// - any error of [`Formula::parse`] or [`Formula::propagate`]
pub fn propagate<S: AsRef<str>>(
    formula: &str,
    variable_names: &[S],
    values: &[f64],
    errors: &[f64],
) -> Result<Measurement> {
    let n = variable_names.len();
    if values.len() != n {
        return Err(Error::dimension_mismatch("values", n, values.len()));
    }
    if errors.len() != n {
        return Err(Error::dimension_mismatch("uncertainties", n, errors.len()));
    }

    Formula::parse(formula, variable_names)?.propagate(values, errors)
}

/// The share of the total uncertainty which comes from one input
#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    pub variable: String,
    /// The partial derivative at the operating point
    pub sensitivity: f64,
    /// `|sensitivity * uncertainty|`
    pub contribution: f64,
}

impl Formula {
    fn check_uncertainties(&self, errors: &[f64]) -> Result<()> {
        if errors.len() != self.variables().len() {
            return Err(Error::dimension_mismatch(
                "uncertainties",
                self.variables().len(),
                errors.len(),
            ));
        }
        for (name, &error) in izip!(self.variables(), errors) {
            if !error.is_finite() || error < 0.0 {
                return Err(Error::InvalidUncertainty {
                    name: name.clone(),
                    value: error,
                });
            }
        }
        Ok(())
    }

    /// Evaluate the formula and its propagated uncertainty at one operating point
    ///
    /// # Errors
    /// - [`Error::DimensionMismatch`] if `values` or `errors` has the wrong length
    /// - [`Error::InvalidUncertainty`] for a negative or non-finite uncertainty
    /// - [`Error::Domain`] or [`Error::NonDifferentiable`] if the formula or one of its partial
    ///   derivatives cannot be evaluated at `values`
    /// - [`Error::Domain`] if the propagated uncertainty is too large to represent
    pub fn propagate(&self, values: &[f64], errors: &[f64]) -> Result<Measurement> {
        let (value, budget) = self.budget_at(values, errors)?;
        let contributions: Vec<f64> = budget.iter().map(|c| c.contribution).collect();

        let uncertainty = pythagorean_addition(&contributions);
        if !uncertainty.is_finite() {
            return Err(self.unrepresentable(values, uncertainty));
        }
        Ok(Measurement { value, uncertainty })
    }

    /// Break the propagated uncertainty down by input variable
    ///
    /// The quadrature sum of the contributions is the uncertainty returned by
    /// [`Formula::propagate`].
    ///
    /// # Errors
    /// As [`Formula::propagate`].
    pub fn uncertainty_budget(&self, values: &[f64], errors: &[f64]) -> Result<Vec<Contribution>> {
        Ok(self.budget_at(values, errors)?.1)
    }

    fn budget_at(&self, values: &[f64], errors: &[f64]) -> Result<(f64, Vec<Contribution>)> {
        self.check_point(values)?;
        self.check_uncertainties(errors)?;
        // A failure in the formula itself is reported ahead of one in a derivative
        let value = self.value_at(values)?;
        let gradient = self.gradient_at(values)?;

        let budget: Vec<Contribution> = izip!(self.variables(), &gradient, errors)
            .map(|(name, &sensitivity, &error)| Contribution {
                variable: name.clone(),
                sensitivity,
                contribution: (sensitivity * error).abs(),
            })
            .collect();
        if let Some(overflow) = budget.iter().find(|c| !c.contribution.is_finite()) {
            return Err(self.unrepresentable(values, overflow.contribution));
        }
        Ok((value, budget))
    }

    /// Propagate uncertainties which are correlated
    ///
    /// With the gradient $g$ at `values` and the covariance matrix $C$ of the inputs the variance
    /// of the result is $g^T C g$. A diagonal `covariance` holding the squared uncertainties gives
    /// the same result as [`Formula::propagate`].
    ///
    /// # Errors
    /// - [`Error::DimensionMismatch`] if `values` has the wrong length
    /// - [`Error::InvalidCovariance`] if `covariance` is not square of the right size, not
    ///   symmetric, or has a negative or non-finite variance on its diagonal
    /// - [`Error::Domain`] or [`Error::NonDifferentiable`] as for [`Formula::propagate`]
    pub fn propagate_correlated(
        &self,
        values: &[f64],
        covariance: &Array2<f64>,
    ) -> Result<Measurement> {
        self.check_point(values)?;
        let n = self.variables().len();
        if covariance.dim() != (n, n) {
            return Err(Error::InvalidCovariance(format!(
                "expected a {n} x {n} matrix, got {} x {}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        for (ii, name) in self.variables().iter().enumerate() {
            let variance = covariance[[ii, ii]];
            if !variance.is_finite() || variance < 0.0 {
                return Err(Error::InvalidCovariance(format!(
                    "variance of `{name}` is {variance}"
                )));
            }
            for jj in 0..ii {
                let (upper, lower) = (covariance[[jj, ii]], covariance[[ii, jj]]);
                let scale = upper.abs().max(lower.abs()).max(f64::MIN_POSITIVE);
                if (upper - lower).abs() > 1e-12 * scale {
                    return Err(Error::InvalidCovariance(format!(
                        "matrix is not symmetric at ({ii}, {jj})"
                    )));
                }
            }
        }

        let value = self.value_at(values)?;
        let gradient = self.gradient_at(values)?;

        let variance = (outer_product(gradient.view(), gradient.view())? * covariance).sum();
        if !variance.is_finite() {
            return Err(self.unrepresentable(values, variance));
        }
        if variance < 0.0 {
            return Err(Error::InvalidCovariance(format!(
                "matrix is not positive semi-definite, the propagated variance is {variance}"
            )));
        }

        Ok(Measurement {
            value,
            uncertainty: variance.sqrt(),
        })
    }
}

/// Product of two measured values with their uncertainties propagated
///
/// The uncertainty is $\sqrt{(b\,\delta a)^2 + (a\,\delta b)^2}$, which stays meaningful when one of
/// the factors is zero.
pub fn gauss_error_product(a: f64, b: f64, da: f64, db: f64) -> Measurement {
    Measurement {
        value: a * b,
        uncertainty: pythagorean_addition(&[b * da, a * db]),
    }
}

#[cfg(test)]
mod tests {
    use super::{gauss_error_product, propagate};
    use crate::error::Error;
    use crate::formula::Formula;

    use ndarray::{arr2, Array2};
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    #[test]
    fn products_propagate_in_quadrature() {
        let result = propagate("x * y", &["x", "y"], &[5.0, 2.0], &[0.5, 0.1]).unwrap();
        assert_eq!(result.value, 10.0);
        approx::assert_relative_eq!(result.uncertainty, 1.25f64.sqrt(), max_relative = 1e-15);
    }

    #[test]
    fn lengths_are_checked_before_parsing() {
        let result = propagate("not a formula (", &["x", "y"], &[1.0], &[0.1, 0.2]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                what: "values",
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn negative_uncertainties_are_rejected() {
        let formula = Formula::parse("x + y", &["x", "y"]).unwrap();
        assert!(matches!(
            formula.propagate(&[1.0, 2.0], &[0.1, -0.2]),
            Err(Error::InvalidUncertainty { name, .. }) if name == "y"
        ));
    }

    #[test]
    fn budget_sums_in_quadrature_to_the_total() {
        let formula = Formula::parse("sqrt(x) / y + z^3", &["x", "y", "z"]).unwrap();
        let values = [4.0, 2.0, -1.5];
        let errors = [0.2, 0.05, 0.01];

        let budget = formula.uncertainty_budget(&values, &errors).unwrap();
        let total = formula.propagate(&values, &errors).unwrap();

        let squares: f64 = budget.iter().map(|c| c.contribution.powi(2)).sum();
        approx::assert_relative_eq!(squares.sqrt(), total.uncertainty, max_relative = 1e-14);

        assert_eq!(budget[2].variable, "z");
        approx::assert_relative_eq!(budget[2].sensitivity, 3.0 * 1.5f64.powi(2));
    }

    #[test]
    fn diagonal_covariance_matches_independent_propagation() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        let formula = Formula::parse("a * exp(-b * c) + c / a", &["a", "b", "c"]).unwrap();
        let values: Vec<f64> = (0..3).map(|_| rng.gen_range(0.5..2.0)).collect();
        let errors: Vec<f64> = (0..3).map(|_| rng.gen_range(0.01..0.1)).collect();

        let mut covariance = Array2::zeros((3, 3));
        for (ii, error) in errors.iter().enumerate() {
            covariance[[ii, ii]] = error * error;
        }

        let independent = formula.propagate(&values, &errors).unwrap();
        let correlated = formula.propagate_correlated(&values, &covariance).unwrap();

        approx::assert_relative_eq!(independent.value, correlated.value);
        approx::assert_relative_eq!(
            independent.uncertainty,
            correlated.uncertainty,
            max_relative = 1e-12
        );
    }

    #[test]
    fn fully_anticorrelated_inputs_cancel_in_a_sum() {
        let formula = Formula::parse("x + y", &["x", "y"]).unwrap();
        let covariance = arr2(&[[0.04, -0.04], [-0.04, 0.04]]);
        let result = formula
            .propagate_correlated(&[1.0, 2.0], &covariance)
            .unwrap();
        approx::assert_abs_diff_eq!(result.uncertainty, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn malformed_covariances_are_rejected() {
        let formula = Formula::parse("x + y", &["x", "y"]).unwrap();
        for covariance in [
            arr2(&[[0.04, 0.01], [0.0, 0.04]]),
            arr2(&[[-0.04, 0.0], [0.0, 0.04]]),
            Array2::zeros((3, 3)),
        ] {
            assert!(matches!(
                formula.propagate_correlated(&[1.0, 2.0], &covariance),
                Err(Error::InvalidCovariance(_))
            ));
        }
    }

    #[test]
    fn huge_contributions_combine_without_overflow() {
        let result = propagate("x * y", &["x", "y"], &[1e200, 1.0], &[0.0, 1.0]).unwrap();
        approx::assert_relative_eq!(result.value, 1e200);
        approx::assert_relative_eq!(result.uncertainty, 1e200, max_relative = 1e-15);

        let helper = gauss_error_product(1e200, 1.0, 1e180, 1.0);
        approx::assert_relative_eq!(helper.uncertainty, 1e200, max_relative = 1e-15);
    }

    #[test]
    fn unrepresentable_uncertainties_are_domain_errors() {
        let formula = Formula::parse("1e200 * x", &["x"]).unwrap();

        match formula.propagate(&[1.0], &[1e200]) {
            Err(Error::Domain(violation)) => {
                assert_eq!(violation.function, "uncertainty");
                assert_eq!(violation.bindings, vec![("x".to_owned(), 1.0)]);
            }
            other => panic!("expected a domain error, got {other:?}"),
        }
        assert!(matches!(
            formula.uncertainty_budget(&[1.0], &[1e200]),
            Err(Error::Domain(_))
        ));

        let covariance = arr2(&[[1e300]]);
        assert!(matches!(
            formula.propagate_correlated(&[1.0], &covariance),
            Err(Error::Domain(_))
        ));
    }

    #[test]
    fn product_helper_agrees_with_the_engine() {
        let helper = gauss_error_product(3.0, -4.0, 0.3, 0.2);
        let engine = propagate("a * b", &["a", "b"], &[3.0, -4.0], &[0.3, 0.2]).unwrap();
        approx::assert_relative_eq!(helper.value, engine.value);
        approx::assert_relative_eq!(helper.uncertainty, engine.uncertainty);

        let at_zero = gauss_error_product(0.0, 5.0, 0.1, 0.2);
        approx::assert_relative_eq!(at_zero.uncertainty, 0.5);
    }
}
