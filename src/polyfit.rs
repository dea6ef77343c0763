//! Weighted least-squares polynomial fits
//!
//! Coefficients are reported in increasing power, so `solution()[i]` multiplies `x^i`.
use itertools::{izip, Itertools};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{FactorizeC, InverseC, SolveC, UPLO};

use crate::error::{Error, Result};
use crate::math::vandermonde;
use crate::measurement::Measurement;

/// How the covariance of the fitted coefficients is reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scaling {
    /// `(AᵀWA)⁻¹`, appropriate when the weights are true inverse variances
    Unscaled,
    /// `(AᵀWA)⁻¹` multiplied by the reduced chi-squared of the fit, appropriate when the weights
    /// are only relative
    Scaled,
}

#[derive(Clone, Debug)]
pub struct FitResult {
    solution: Array1<f64>,
    covariance: Array2<f64>,
    chi_squared: f64,
    r_squared: f64,
    window: (f64, f64),
}

impl FitResult {
    pub const fn solution(&self) -> &Array1<f64> {
        &self.solution
    }

    pub const fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn degree(&self) -> usize {
        self.solution.len() - 1
    }

    /// The fitted coefficients with their standard uncertainties
    pub fn coefficients(&self) -> Vec<Measurement> {
        izip!(&self.solution, self.covariance.diag())
            .map(|(&value, &variance)| Measurement::new(value, variance.sqrt()))
            .collect()
    }

    /// Weighted sum of squared residuals
    pub const fn chi_squared(&self) -> f64 {
        self.chi_squared
    }

    /// Coefficient of determination, computed with the fit weights
    pub const fn r_squared(&self) -> f64 {
        self.r_squared
    }

    /// The range of the independent variable covered by the fitted data
    pub const fn window(&self) -> (f64, f64) {
        self.window
    }

    pub fn window_contains(&self, x: f64) -> bool {
        (self.window.0..=self.window.1).contains(&x)
    }

    /// The fitted polynomial at `x`
    pub fn evaluate(&self, x: f64) -> f64 {
        self.solution
            .iter()
            .rev()
            .fold(0.0, |acc, &coefficient| acc.mul_add(x, coefficient))
    }

    /// The fitted polynomial at `x` with the uncertainty due to the fit
    ///
    /// With $v = (1, x, \dots, x^n)$ the uncertainty is $\sqrt{v^T C v}$, which includes the
    /// correlations between the coefficients.
    ///
    /// # Errors
    /// Fails if the degree of the fit does not fit in an `i32`.
    pub fn predict(&self, x: f64) -> Result<Measurement> {
        let powers = vandermonde(&[x], self.degree())?.index_axis_move(Axis(0), 0);
        let variance = powers.dot(&self.covariance.dot(&powers));
        Ok(Measurement::new(self.evaluate(x), variance.max(0.0).sqrt()))
    }
}

/// Convert standard uncertainties to the inverse-variance weights expected by [`polyfit`]
///
/// # Errors
/// Returns [`Error::DivisionByZero`] if any uncertainty is zero.
pub fn weights_from_uncertainties(uncertainties: &[f64]) -> Result<Vec<f64>> {
    uncertainties
        .iter()
        .map(|&sigma| {
            if sigma == 0.0 {
                Err(Error::DivisionByZero(
                    "an exact point cannot be weighted by its inverse variance".into(),
                ))
            } else {
                Ok(sigma.powi(-2))
            }
        })
        .collect()
}

/// Weighted coefficient of determination, $1 - \chi^2 / \sum_i w_i (y_i - \bar{y}_w)^2$
///
/// Data with no spread is perfectly described by a fit with no residual, and not at all otherwise.
pub(crate) fn coefficient_of_determination(
    y: &Array1<f64>,
    weights: &Array1<f64>,
    chi_squared: f64,
) -> f64 {
    let weighted_mean = (weights * y).sum() / weights.sum();
    let total = (weights * &y.mapv(|yi| (yi - weighted_mean).powi(2))).sum();
    if total > 0.0 {
        1.0 - chi_squared / total
    } else if chi_squared == 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Fit a polynomial of `degree` to the points `(x, y)`
///
/// `weights` are the inverse variances of `y`. With no weights every point counts equally.
///
/// # Errors
/// - [`Error::DimensionMismatch`] if `y` or `weights` do not match `x` in length
/// - [`Error::InsufficientData`] for fewer than `degree + 1` points, or `degree + 2` when
///   `scaling` is [`Scaling::Scaled`] and the scatter must be estimated from the residuals
/// - [`Error::Fit`] for negative or non-finite weights
/// - [`Error::Linalg`] when the normal equations are singular, as for repeated abscissae
pub fn polyfit(
    x: &[f64],
    y: &[f64],
    degree: usize,
    weights: Option<&[f64]>,
    scaling: Scaling,
) -> Result<FitResult> {
    let n = x.len();
    if y.len() != n {
        return Err(Error::dimension_mismatch("dependent values", n, y.len()));
    }
    let weights: Array1<f64> = match weights {
        Some(weights) if weights.len() != n => {
            return Err(Error::dimension_mismatch("weights", n, weights.len()))
        }
        Some(weights) => Array1::from(weights.to_vec()),
        None => Array1::ones(n),
    };
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(Error::Fit("weights must be finite and non-negative".into()));
    }

    let required = match scaling {
        Scaling::Unscaled => degree + 1,
        Scaling::Scaled => degree + 2,
    };
    if n < required {
        return Err(Error::InsufficientData {
            required,
            actual: n,
        });
    }

    let design = vandermonde(x, degree)?;
    let y = Array1::from(y.to_vec());
    let weighted_design = &design * &weights.view().insert_axis(Axis(1));

    let normal = weighted_design.t().dot(&design);
    let rhs = weighted_design.t().dot(&y);
    let factorized = normal.factorizec(UPLO::Lower)?;
    let solution = factorized.solvec(&rhs)?;
    let mut covariance = factorized.invc()?;

    let residuals = &y - &design.dot(&solution);
    let chi_squared = (&residuals * &residuals * &weights).sum();

    if scaling == Scaling::Scaled {
        #[allow(clippy::cast_precision_loss)]
        let degrees_of_freedom = (n - degree - 1) as f64;
        covariance *= chi_squared / degrees_of_freedom;
    }

    let r_squared = coefficient_of_determination(&y, &weights, chi_squared);

    let window = x
        .iter()
        .copied()
        .minmax()
        .into_option()
        .ok_or(Error::InsufficientData {
            required,
            actual: 0,
        })?;

    tracing::debug!(degree, points = n, chi_squared, r_squared, "polynomial fit");

    Ok(FitResult {
        solution,
        covariance,
        chi_squared,
        r_squared,
        window,
    })
}
