//! Analysis descriptions read from TOML
//!
//! An analysis names a formula and its variables, lists the measured rows, and optionally asks for
//! a polynomial fit of the results. The description is an immutable value: running it twice gives
//! the same report.
//!
//! ```toml
//! name = "spring constant"
//! unit = "N/m"
//! formula = "4 * pi^2 * m / T^2"
//! variables = ["m", "T"]
//! significant_digits = 2
//!
//! [[rows]]
//! values = [0.1, 0.63]
//! errors = [0.001, 0.01]
//! ```
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::batch::{evaluate_rows, BatchReport, Row};
use crate::error::{Error, Result};
use crate::formula::Formula;
use crate::measurement::Measurement;
use crate::polyfit::{polyfit, weights_from_uncertainties, FitResult, Scaling};

const fn unit_scaling() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AnalysisConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub formula: String,
    pub variables: Vec<String>,
    /// Exact factor applied to every result, for example to convert units
    #[serde(default = "unit_scaling")]
    pub scaling_factor: f64,
    /// Significant digits of the uncertainty when the report is displayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significant_digits: Option<usize>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitConfig>,
}

/// A polynomial fit of the row results against an independent variable
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FitConfig {
    /// One value of the independent variable per row
    pub x: Vec<f64>,
    pub degree: usize,
    /// Weight each result by its inverse variance. Unweighted fits estimate the scatter from the
    /// residuals instead.
    #[serde(default)]
    pub weighted: bool,
}

/// Read an analysis description from a TOML file
///
/// # Errors
/// Fails if the file cannot be read or is not a valid description.
pub fn load(path: impl AsRef<Path>) -> Result<AnalysisConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: AnalysisConfig = contents.parse()?;
    tracing::debug!(path = %path.display(), name = %config.name, "read analysis config");
    Ok(config)
}

impl FromStr for AnalysisConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl AnalysisConfig {
    /// Propagate every row, then combine and fit the results
    ///
    /// Rows which fail are skipped and reported. The weighted mean is computed when at least one
    /// row succeeded and no successful result is exact. The fit uses the successful rows only.
    ///
    /// # Errors
    /// - any error of [`Formula::parse`] for the formula and variables
    /// - [`Error::InvalidScalingFactor`] if `scaling_factor` is not finite
    /// - [`Error::DimensionMismatch`] if the fit does not list one `x` per row
    /// - any error of [`polyfit`]
    pub fn run(&self) -> Result<AnalysisReport> {
        let formula = Formula::parse(&self.formula, &self.variables)?;
        if let Some(fit) = &self.fit {
            if fit.x.len() != self.rows.len() {
                return Err(Error::dimension_mismatch(
                    "fit abscissae",
                    self.rows.len(),
                    fit.x.len(),
                ));
            }
        }

        tracing::info!(name = %self.name, rows = self.rows.len(), "running analysis");
        let batch = evaluate_rows(&formula, &self.rows, self.scaling_factor)?;

        let combinable = {
            let mut successes = batch.measurements().peekable();
            successes.peek().is_some()
                && successes.all(|(_, measurement)| measurement.uncertainty > 0.0)
        };
        let weighted_mean = if combinable {
            Some(batch.weighted_mean()?)
        } else {
            None
        };

        let fit = self
            .fit
            .as_ref()
            .map(|fit| fit.run(&batch))
            .transpose()?;

        let failed = batch.failures().count();
        if failed > 0 {
            tracing::warn!(name = %self.name, failed, "rows were skipped");
        }

        Ok(AnalysisReport {
            name: self.name.clone(),
            unit: self.unit.clone(),
            significant_digits: self.significant_digits,
            batch,
            weighted_mean,
            fit,
        })
    }
}

impl FitConfig {
    fn run(&self, batch: &BatchReport) -> Result<FitResult> {
        let (x, results): (Vec<f64>, Vec<Measurement>) = batch
            .measurements()
            .map(|(row, measurement)| (self.x[row], measurement))
            .unzip();
        let y: Vec<f64> = results.iter().map(|m| m.value).collect();

        if self.weighted {
            let uncertainties: Vec<f64> = results.iter().map(|m| m.uncertainty).collect();
            let weights = weights_from_uncertainties(&uncertainties)?;
            polyfit(&x, &y, self.degree, Some(&weights), Scaling::Unscaled)
        } else {
            polyfit(&x, &y, self.degree, None, Scaling::Scaled)
        }
    }
}

#[derive(Debug)]
pub struct AnalysisReport {
    pub name: String,
    pub unit: Option<String>,
    significant_digits: Option<usize>,
    pub batch: BatchReport,
    pub weighted_mean: Option<Measurement>,
    pub fit: Option<FitResult>,
}

impl AnalysisReport {
    fn presented(&self, measurement: Measurement) -> Measurement {
        self.significant_digits
            .map_or(measurement, |digits| measurement.rounded(digits))
    }

    fn unit_suffix(&self) -> String {
        self.unit
            .as_ref()
            .map_or_else(String::new, |unit| format!(" {unit}"))
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit_suffix();
        writeln!(f, "{}", self.name)?;
        for (row, outcome) in self.batch.outcomes().iter().enumerate() {
            match outcome {
                Ok(measurement) => {
                    writeln!(f, "  row {row}: {}{unit}", self.presented(*measurement))?;
                }
                Err(failure) => writeln!(f, "  row {row}: skipped, {}", failure.source)?,
            }
        }
        if let Some(mean) = self.weighted_mean {
            writeln!(f, "  weighted mean: {}{unit}", self.presented(mean))?;
        }
        if let Some(fit) = &self.fit {
            write!(f, "  fit:")?;
            for (power, coefficient) in fit.coefficients().into_iter().enumerate() {
                write!(f, " c{power} = {}", self.presented(coefficient))?;
            }
            writeln!(f, " (R² = {:.4})", fit.r_squared())?;
        }
        Ok(())
    }
}
