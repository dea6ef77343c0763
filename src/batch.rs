//! Propagation over many measurement rows
//!
//! Every row of an analysis is independent. A row that cannot be evaluated is recorded with its
//! index and skipped, so that one bad manual entry does not invalidate the rest of the data set.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::formula::Formula;
use crate::measurement::Measurement;
use crate::statistics::weighted_mean;

/// One operating point: the measured values and their absolute uncertainties
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Row {
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
}

impl Row {
    pub fn new(values: impl Into<Vec<f64>>, errors: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            errors: errors.into(),
        }
    }
}

/// A row which could not be propagated
#[derive(Debug, thiserror::Error)]
#[error("row {row}: {source}")]
pub struct RowError {
    /// Zero-based index of the row in the input
    pub row: usize,
    #[source]
    pub source: Error,
}

impl From<RowError> for Error {
    fn from(value: RowError) -> Self {
        value.source.in_row(value.row)
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<std::result::Result<Measurement, RowError>>,
}

impl BatchReport {
    /// Number of rows processed, including those which failed
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// The outcome of every row, in input order
    pub fn outcomes(&self) -> &[std::result::Result<Measurement, RowError>] {
        &self.outcomes
    }

    /// The successful rows with their indices
    pub fn measurements(&self) -> impl Iterator<Item = (usize, Measurement)> + '_ {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(row, outcome)| outcome.as_ref().ok().map(|m| (row, *m)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowError> + '_ {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
    }

    /// Inverse-variance weighted mean of the successful rows
    ///
    /// # Errors
    /// Returns [`Error::DivisionByZero`] when no row succeeded or a successful row has an exact
    /// result.
    pub fn weighted_mean(&self) -> Result<Measurement> {
        let (values, errors): (Vec<f64>, Vec<f64>) = self
            .measurements()
            .map(|(_, measurement)| (measurement.value, measurement.uncertainty))
            .unzip();
        weighted_mean(&values, &errors)
    }
}

/// Propagate `formula` over every row and multiply each result by `scaling_factor`
///
/// The scaling factor is exact, as for a unit conversion, so the uncertainty is multiplied by its
/// magnitude. Failing rows are logged and reported in the [`BatchReport`] rather than aborting
/// the batch.
///
/// # Errors
/// Returns [`Error::InvalidScalingFactor`] if `scaling_factor` is not finite, before any row is
/// evaluated.
pub fn evaluate_rows(formula: &Formula, rows: &[Row], scaling_factor: f64) -> Result<BatchReport> {
    if !scaling_factor.is_finite() {
        return Err(Error::InvalidScalingFactor(scaling_factor));
    }

    let outcomes = rows
        .iter()
        .enumerate()
        .map(|(row, Row { values, errors })| {
            match formula.propagate(values, errors) {
                Ok(measurement) => {
                    let measurement = measurement.scaled(scaling_factor);
                    tracing::debug!(row, %formula, %measurement, "propagated row");
                    Ok(measurement)
                }
                Err(source) => {
                    tracing::warn!(row, %formula, error = %source, "skipping row");
                    Err(RowError { row, source })
                }
            }
        })
        .collect();

    Ok(BatchReport { outcomes })
}

#[cfg(test)]
mod tests {
    use super::{evaluate_rows, Row, RowError};
    use crate::error::Error;
    use crate::formula::Formula;

    #[test]
    fn failing_rows_do_not_stop_the_batch() {
        let formula = Formula::parse("log(x) * y", &["x", "y"]).unwrap();
        let rows = [
            Row::new([2.0, 3.0], [0.1, 0.1]),
            Row::new([-1.0, 3.0], [0.1, 0.1]),
            Row::new([4.0], [0.1]),
            Row::new([3.0, 1.0], [0.2, 0.0]),
        ];

        let report = evaluate_rows(&formula, &rows, 1.0).unwrap();

        assert_eq!(report.len(), 4);
        let succeeded: Vec<usize> = report.measurements().map(|(row, _)| row).collect();
        assert_eq!(succeeded, [0, 3]);

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures[0].row, 1);
        assert!(matches!(failures[0].source, Error::Domain(_)));
        assert_eq!(failures[1].row, 2);
        assert!(matches!(failures[1].source, Error::DimensionMismatch { .. }));
        assert!(failures[0].to_string().starts_with("row 1: domain error"));
    }

    #[test]
    fn scaling_applies_to_value_and_uncertainty() {
        let formula = Formula::parse("x + y", &["x", "y"]).unwrap();
        let rows = [Row::new([1.0, 2.0], [0.3, 0.4])];

        let report = evaluate_rows(&formula, &rows, -1000.0).unwrap();
        let (_, measurement) = report.measurements().next().unwrap();

        approx::assert_relative_eq!(measurement.value, -3000.0);
        approx::assert_relative_eq!(measurement.uncertainty, 500.0);
    }

    #[test]
    fn weighted_mean_uses_only_successful_rows() {
        let formula = Formula::parse("sqrt(x)", &["x"]).unwrap();
        let rows = [
            Row::new([100.0], [2.0]),
            Row::new([-4.0], [1.0]),
            Row::new([400.0], [4.0]),
        ];

        let mean = evaluate_rows(&formula, &rows, 1.0)
            .unwrap()
            .weighted_mean()
            .unwrap();

        // Both successful rows have a propagated uncertainty of 0.1
        approx::assert_relative_eq!(mean.value, 15.0);
        approx::assert_relative_eq!(mean.uncertainty, 0.1 / 2f64.sqrt());
    }

    #[test]
    fn non_finite_scaling_factors_are_rejected() {
        let formula = Formula::parse("x + y", &["x", "y"]).unwrap();
        let rows = [Row::new([1.0, 2.0], [0.3, 0.4])];

        for factor in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                evaluate_rows(&formula, &rows, factor),
                Err(Error::InvalidScalingFactor(_))
            ));
        }
    }

    #[test]
    fn row_errors_keep_their_index_as_crate_errors() {
        let error = Error::from(RowError {
            row: 7,
            source: Error::DivisionByZero("x".into()),
        });
        assert!(matches!(error, Error::Row { row: 7, .. }));
        assert!(matches!(error.root(), Error::DivisionByZero(_)));
    }
}
