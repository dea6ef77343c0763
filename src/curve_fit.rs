//! Non-linear least squares fits of formula models
//!
//! The model is an ordinary [`Formula`]. One of its variables is the independent variable and
//! all the others are parameters to be fitted, in the order they were declared. The Jacobian is
//! built from the symbolic partial derivatives of the model, so no finite differencing is needed.
use argmin::core::{Executor, Jacobian, Operator, State, TerminationReason, TerminationStatus};
use argmin::solver::gaussnewton::GaussNewtonLS;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use ndarray::{s, Array1, Array2};
use ndarray_linalg::InverseC;

use crate::error::{Error, Result};
use crate::formula::Formula;
use crate::measurement::Measurement;
use crate::polyfit::{coefficient_of_determination, weights_from_uncertainties};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitOptions {
    pub max_iterations: u64,
    /// Change in the cost between two iterations below which the fit has converged
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: f64::EPSILON.sqrt(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CurveFit {
    parameters: Vec<(String, Measurement)>,
    covariance: Array2<f64>,
    chi_squared: f64,
    r_squared: f64,
    iterations: u64,
}

impl CurveFit {
    /// The fitted parameters with their standard uncertainties, in declared order
    pub fn parameters(&self) -> &[(String, Measurement)] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<Measurement> {
        self.parameters
            .iter()
            .find(|(parameter, _)| parameter == name)
            .map(|(_, measurement)| *measurement)
    }

    /// Covariance of the parameters, scaled by the reduced chi-squared
    pub const fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub const fn chi_squared(&self) -> f64 {
        self.chi_squared
    }

    pub const fn r_squared(&self) -> f64 {
        self.r_squared
    }

    pub const fn iterations(&self) -> u64 {
        self.iterations
    }
}

#[derive(Clone)]
struct Problem<'a> {
    model: &'a Formula,
    independent: usize,
    /// Positions of the parameters among the variables of `model`
    parameters: Vec<usize>,
    x: &'a [f64],
    y: Array1<f64>,
    /// Square roots of the weights, which multiply both residuals and Jacobian rows
    scale: Array1<f64>,
}

impl Problem<'_> {
    /// The variables of the model at data point `ii`
    fn point(&self, params: &Array1<f64>, ii: usize) -> Vec<f64> {
        let mut point = vec![0.0; self.model.variables().len()];
        point[self.independent] = self.x[ii];
        for (&index, &value) in self.parameters.iter().zip(params) {
            point[index] = value;
        }
        point
    }

    /// The model at every data point
    fn compute(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        (0..self.x.len())
            .map(|ii| self.model.value_at(&self.point(params, ii)))
            .collect()
    }

    /// Weighted residuals, `sqrt(w) * (f - y)`
    fn residuals(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        Ok((self.compute(params)? - &self.y) * &self.scale)
    }

    /// Jacobian of the weighted residuals, one row per data point
    fn weighted_jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let mut jacobian = Array2::zeros((self.x.len(), self.parameters.len()));
        for ii in 0..self.x.len() {
            let gradient = self.model.gradient_at(&self.point(params, ii))?;
            let row = self
                .parameters
                .iter()
                .map(|&index| gradient[index] * self.scale[ii])
                .collect::<Array1<f64>>();
            jacobian.slice_mut(s![ii, ..]).assign(&row);
        }
        Ok(jacobian)
    }
}

impl Operator for Problem<'_> {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.residuals(p)?)
    }
}

impl Jacobian for Problem<'_> {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        Ok(self.weighted_jacobian(p)?)
    }
}

/// Recover a crate error raised inside the solver, such as a model leaving its domain
fn solver_error(error: argmin::core::Error) -> Error {
    error
        .downcast::<Error>()
        .unwrap_or_else(|error| Error::Fit(error.to_string()))
}

/// Fit the parameters of `model` to the points `(x, y)`
///
/// `independent` names the variable of `model` which takes the values of `x`. `sigma` are the
/// standard uncertainties of `y`, and with `None` every point counts equally. The fit uses the
/// Gauss-Newton method with a More-Thuente line search, started from `initial`. The reported
/// covariance is `(JᵀWJ)⁻¹ · χ²/(n - p)`.
///
/// # Examples
///
/// ```
/// use error_propagation::curve_fit::{curve_fit, FitOptions};
/// use error_propagation::Formula;
///
/// let model = Formula::with_symbols("a * exp(-b * t)", "t a b").unwrap();
/// let t = [0.0, 1.0, 2.0, 3.0, 4.0];
/// let y: Vec<f64> = t.iter().map(|t| 3.0 * (-0.7_f64 * t).exp()).collect();
///
/// let fit = curve_fit(&model, "t", &t, &y, None, &[1.0, 1.0], &FitOptions::default()).unwrap();
/// assert!((fit.parameter("b").unwrap().value - 0.7).abs() < 1e-6);
/// ```
///
/// # Errors
/// - [`Error::UndefinedVariable`] if `independent` is not a variable of `model`
/// - [`Error::DimensionMismatch`] if the data or the initial parameters have the wrong length
/// - [`Error::InsufficientData`] unless there are more points than parameters
/// - [`Error::Domain`] or [`Error::NonDifferentiable`] if the model cannot be evaluated at the
///   initial parameters or at a point the solver steps to
/// - [`Error::Fit`] if the fit does not converge within `options.max_iterations`
/// - [`Error::Linalg`] if the parameters are not determined by the data at the solution
pub fn curve_fit(
    model: &Formula,
    independent: &str,
    x: &[f64],
    y: &[f64],
    sigma: Option<&[f64]>,
    initial: &[f64],
    options: &FitOptions,
) -> Result<CurveFit> {
    let independent_index = model
        .index_of(independent)
        .ok_or_else(|| Error::UndefinedVariable {
            name: independent.to_owned(),
            formula: model.text().to_owned(),
        })?;
    let parameters: Vec<usize> = (0..model.variables().len())
        .filter(|&index| index != independent_index)
        .collect();

    let n = x.len();
    let p = parameters.len();
    if y.len() != n {
        return Err(Error::dimension_mismatch("dependent values", n, y.len()));
    }
    if initial.len() != p {
        return Err(Error::dimension_mismatch(
            "initial parameters",
            p,
            initial.len(),
        ));
    }
    if n <= p {
        return Err(Error::InsufficientData {
            required: p + 1,
            actual: n,
        });
    }
    let weights = match sigma {
        Some(sigma) if sigma.len() != n => {
            return Err(Error::dimension_mismatch("uncertainties", n, sigma.len()))
        }
        Some(sigma) => Array1::from(weights_from_uncertainties(sigma)?),
        None => Array1::ones(n),
    };

    let problem = Problem {
        model,
        independent: independent_index,
        parameters,
        x,
        y: Array1::from(y.to_vec()),
        scale: weights.mapv(f64::sqrt),
    };

    let initial = Array1::from(initial.to_vec());
    let initial_residuals = problem.residuals(&initial)?;
    let (params, iterations) = if initial_residuals.dot(&initial_residuals) == 0.0 {
        (initial, 0)
    } else {
        solve(&problem, initial, options)?
    };

    let residuals = problem.residuals(&params)?;
    let chi_squared = residuals.dot(&residuals);
    let jacobian = problem.weighted_jacobian(&params)?;

    #[allow(clippy::cast_precision_loss)]
    let reduced_chi_squared = chi_squared / (n - p) as f64;
    let covariance = jacobian.t().dot(&jacobian).invc()? * reduced_chi_squared;

    let parameters = problem
        .parameters
        .iter()
        .zip(&params)
        .enumerate()
        .map(|(ii, (&index, &value))| {
            (
                model.variables()[index].clone(),
                Measurement::new(value, covariance[[ii, ii]].max(0.0).sqrt()),
            )
        })
        .collect();

    Ok(CurveFit {
        parameters,
        covariance,
        chi_squared,
        r_squared: coefficient_of_determination(&problem.y, &weights, chi_squared),
        iterations,
    })
}

fn solve(
    problem: &Problem<'_>,
    initial: Array1<f64>,
    options: &FitOptions,
) -> Result<(Array1<f64>, u64)> {
    let linesearch = MoreThuenteLineSearch::new()
        .with_bounds(0.0, 1.0)
        .map_err(solver_error)?;
    let solver = GaussNewtonLS::new(linesearch)
        .with_tolerance(options.tolerance)
        .map_err(solver_error)?;

    let res = Executor::new(problem.clone(), solver)
        .configure(|state| state.param(initial).max_iters(options.max_iterations))
        .run()
        .map_err(solver_error)?;

    let state = res.state();
    let iterations = state.get_iter();
    if let TerminationStatus::Terminated(TerminationReason::MaxItersReached) =
        state.get_termination_status()
    {
        tracing::warn!(
            max_iterations = options.max_iterations,
            cost = state.get_best_cost(),
            "curve fit did not converge"
        );
        return Err(Error::Fit(format!(
            "no convergence after {} iterations",
            options.max_iterations
        )));
    }

    let params = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| Error::Fit("the solver returned no parameters".into()))?;
    tracing::debug!(iterations, cost = state.get_best_cost(), "curve fit converged");
    Ok((params, iterations))
}
