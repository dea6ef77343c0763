//! Combination rules for independent uncertainties
//!
//! These are the helpers which sit next to the propagation engine in every analysis: adding
//! uncertainty contributions in quadrature, inverse-variance weighting of repeated results, and
//! turning an instrument datasheet specification into an absolute uncertainty.
use itertools::izip;
use num_traits::Float;

use crate::error::{Error, Result};
use crate::measurement::Measurement;

/// Combine independent uncertainties in quadrature
///
/// $$
///     \sigma = \sqrt{\sum_i \sigma_i^2}
/// $$
///
/// This is how a statistical standard error is combined with the accuracy specification of the
/// instrument that took the readings. An empty slice combines to zero. The sum is accumulated with
/// `hypot`, so contributions whose squares exceed the range of the float type still combine.
///
/// # Examples
///
/// ```
/// use error_propagation::statistics::pythagorean_addition;
///
/// let combined = pythagorean_addition(&[3.0, 4.0]);
/// assert_eq!(combined, 5.0);
/// ```
pub fn pythagorean_addition<E: Float>(errors: &[E]) -> E {
    errors
        .iter()
        .fold(E::zero(), |sum, &error| sum.hypot(error))
}

/// Inverse-variance weighted mean of repeated determinations of one quantity
///
/// Each value is weighted by $w_i = 1 / \sigma_i^2$. The mean is $\sum w_i x_i / \sum w_i$ and its
/// uncertainty is $1 / \sqrt{\sum w_i}$.
///
/// # Errors
/// - [`Error::DimensionMismatch`] if `values` and `errors` differ in length
/// - [`Error::DivisionByZero`] if there are no values or any uncertainty is zero, as an exact value
///   would carry infinite weight
pub fn weighted_mean<E: Float>(values: &[E], errors: &[E]) -> Result<Measurement<E>> {
    if values.len() != errors.len() {
        return Err(Error::dimension_mismatch(
            "uncertainties",
            values.len(),
            errors.len(),
        ));
    }
    if errors.iter().any(|&error| error == E::zero()) {
        return Err(Error::DivisionByZero(
            "a weighted mean needs every uncertainty to be non-zero".into(),
        ));
    }

    let (weighted_sum, sum_of_weights) = izip!(values, errors).fold(
        (E::zero(), E::zero()),
        |(weighted_sum, sum_of_weights), (&value, &error)| {
            let weight = (error * error).recip();
            (weighted_sum + weight * value, sum_of_weights + weight)
        },
    );

    if sum_of_weights == E::zero() {
        return Err(Error::DivisionByZero(
            "the weights of a weighted mean sum to zero".into(),
        ));
    }

    Ok(Measurement {
        value: weighted_sum / sum_of_weights,
        uncertainty: sum_of_weights.sqrt().recip(),
    })
}

fn arithmetic_mean<E: Float>(values: &[E]) -> Result<E> {
    let count = E::from(values.len()).ok_or_else(|| Error::InsufficientData {
        required: 1,
        actual: values.len(),
    })?;
    Ok(values.iter().fold(E::zero(), |sum, &value| sum + value) / count)
}

fn require<E>(values: &[E], required: usize) -> Result<()> {
    if values.len() < required {
        return Err(Error::InsufficientData {
            required,
            actual: values.len(),
        });
    }
    Ok(())
}

/// Sample standard deviation, normalised by `n - 1`
///
/// # Errors
/// Returns [`Error::InsufficientData`] for fewer than two values.
pub fn standard_deviation<E: Float>(values: &[E]) -> Result<E> {
    require(values, 2)?;
    let mean = arithmetic_mean(values)?;
    let squares = values
        .iter()
        .fold(E::zero(), |sum, &value| sum + (value - mean).powi(2));
    let degrees_of_freedom = E::from(values.len() - 1).ok_or_else(|| Error::InsufficientData {
        required: 2,
        actual: values.len(),
    })?;
    Ok((squares / degrees_of_freedom).sqrt())
}

/// Mean of repeated readings with a combined uncertainty
///
/// The value is the arithmetic mean shifted by `correction` (a known systematic offset such as a
/// zero reading). The uncertainty is the standard error of the mean, $s / \sqrt{n}$, added in
/// quadrature with every entry of `instrument_errors`.
///
/// # Errors
/// Returns [`Error::InsufficientData`] for fewer than two values, where the scatter of the
/// readings cannot be estimated.
pub fn mean_with_errors<E: Float>(
    values: &[E],
    instrument_errors: &[E],
    correction: E,
) -> Result<Measurement<E>> {
    let standard_error = standard_deviation(values)?
        / E::from(values.len())
            .ok_or_else(|| Error::InsufficientData {
                required: 2,
                actual: values.len(),
            })?
            .sqrt();

    let mut contributions = instrument_errors.to_vec();
    contributions.push(standard_error);

    Ok(Measurement {
        value: arithmetic_mean(values)? + correction,
        uncertainty: pythagorean_addition(&contributions),
    })
}

/// Absolute uncertainty of a digital multimeter reading
///
/// Datasheets quote accuracy as a percentage of the reading plus a number of counts of the last
/// digit: `±(percent · |reading| + digits · resolution)`. `percent` is a fraction, so `0.01` is 1%.
pub fn multimeter_uncertainty<E: Float>(reading: E, percent: E, resolution: E, digits: E) -> E {
    reading.abs() * percent + resolution * digits
}

/// The power of ten which brings `uncertainty` to `significant_digits` integer digits
pub(crate) fn decimal_exponent(uncertainty: f64, significant_digits: usize) -> Option<i32> {
    if uncertainty == 0.0 || !uncertainty.is_finite() || significant_digits == 0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let magnitude = uncertainty.abs().log10().floor() as i32;
    let digits = i32::try_from(significant_digits).ok()?;
    Some(digits - 1 - magnitude)
}

fn scale_by_power_of_ten(value: f64, exponent: i32) -> f64 {
    // Powers of ten are exact up to 1e22, and dividing by an exact power rounds correctly where
    // multiplying by its inexact reciprocal would not
    if exponent >= 0 {
        value * 10f64.powi(exponent)
    } else {
        value / 10f64.powi(-exponent)
    }
}

/// Round `value` half away from zero to a multiple of `10^-exponent`
pub(crate) fn round_to_exponent(value: f64, exponent: i32) -> f64 {
    scale_by_power_of_ten(scale_by_power_of_ten(value, exponent).round(), -exponent)
}

/// Round an uncertainty up to `significant_digits`
///
/// Rounding an uncertainty down would claim more precision than was measured, so any digits
/// beyond the requested precision push the last kept digit up by one. Values that are already
/// exact at that precision are unchanged. Zero, non-finite input and zero requested digits are
/// returned as given.
///
/// # Examples
///
/// ```
/// use error_propagation::statistics::round_uncertainty;
///
/// assert_eq!(round_uncertainty(0.122879, 2), 0.13);
/// assert_eq!(round_uncertainty(0.120, 2), 0.12);
/// assert_eq!(round_uncertainty(115.0, 2), 120.0);
/// ```
pub fn round_uncertainty(uncertainty: f64, significant_digits: usize) -> f64 {
    let Some(exponent) = decimal_exponent(uncertainty, significant_digits) else {
        return uncertainty;
    };

    let scaled = scale_by_power_of_ten(uncertainty.abs(), exponent);
    let nearest = scaled.round();
    // Representation error in the input must not bump an exact value to the next digit
    let kept = if (scaled - nearest).abs() <= 1e-9 * scaled.max(1.0) {
        nearest
    } else {
        scaled.ceil()
    };

    scale_by_power_of_ten(kept, -exponent).copysign(uncertainty)
}

#[cfg(test)]
mod tests {
    use super::{
        mean_with_errors, multimeter_uncertainty, pythagorean_addition, round_uncertainty,
        standard_deviation, weighted_mean,
    };
    use crate::error::Error;

    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    #[test]
    fn pythagorean_addition_of_nothing_is_zero() {
        assert_eq!(pythagorean_addition::<f64>(&[]), 0.0);
        approx::assert_relative_eq!(
            pythagorean_addition(&[0.3, 0.4, 1.2]),
            1.3,
            max_relative = 1e-15
        );
    }

    #[test]
    fn pythagorean_addition_survives_squares_beyond_range() {
        let combined = pythagorean_addition(&[3e200, -4e200]);
        approx::assert_relative_eq!(combined, 5e200, max_relative = 1e-15);

        let single = pythagorean_addition(&[1e30f32]);
        assert_eq!(single, 1e30);
    }

    #[test]
    fn weighted_mean_of_equal_weights_is_the_mean() {
        let mean = weighted_mean(&[10.0, 20.0], &[1.0, 1.0]).unwrap();
        approx::assert_relative_eq!(mean.value, 15.0);
        approx::assert_relative_eq!(mean.uncertainty, 1.0 / 2f64.sqrt());
    }

    #[test]
    fn weighted_mean_favours_precise_values() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        let values: Vec<f64> = (0..20).map(|_| rng.gen_range(9.0..11.0)).collect();
        let errors: Vec<f64> = (0..20).map(|_| rng.gen_range(0.1..2.0)).collect();

        let mean = weighted_mean(&values, &errors).unwrap();

        let weights: Vec<f64> = errors.iter().map(|e| e.powi(-2)).collect();
        let expected = values.iter().zip(&weights).map(|(v, w)| v * w).sum::<f64>()
            / weights.iter().sum::<f64>();
        approx::assert_relative_eq!(mean.value, expected, max_relative = 1e-12);

        let smallest = errors.iter().copied().fold(f64::INFINITY, f64::min);
        assert!(mean.uncertainty < smallest);
    }

    #[test]
    fn weighted_mean_rejects_exact_and_missing_values() {
        assert!(matches!(
            weighted_mean(&[1.0, 2.0], &[0.1, 0.0]),
            Err(Error::DivisionByZero(_))
        ));
        assert!(matches!(
            weighted_mean::<f64>(&[], &[]),
            Err(Error::DivisionByZero(_))
        ));
        assert!(matches!(
            weighted_mean(&[1.0, 2.0], &[0.1]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn standard_deviation_uses_bessels_correction() {
        let deviation = standard_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        approx::assert_relative_eq!(deviation, (32.0f64 / 7.0).sqrt());
        assert!(matches!(
            standard_deviation(&[1.0]),
            Err(Error::InsufficientData {
                required: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn mean_with_errors_combines_scatter_and_instrument() {
        let values = [9.8, 10.0, 10.2];
        let mean = mean_with_errors(&values, &[0.05], 0.1).unwrap();

        let standard_error = 0.2 / 3f64.sqrt();
        approx::assert_relative_eq!(mean.value, 10.1, max_relative = 1e-12);
        approx::assert_relative_eq!(
            mean.uncertainty,
            (standard_error.powi(2) + 0.05f64.powi(2)).sqrt(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn multimeter_uncertainty_uses_the_magnitude_of_the_reading() {
        approx::assert_relative_eq!(multimeter_uncertainty(-5.0, 0.01, 0.01, 2.0), 0.07);
    }

    #[test]
    fn uncertainties_round_up_to_significant_digits() {
        let cases = [
            (0.120, 2, 0.12),
            (0.122_879_494_984, 2, 0.13),
            (0.129, 2, 0.13),
            (12.598_498_4, 2, 13.0),
            (12.516_846_498_4, 2, 13.0),
            (115.0, 2, 120.0),
            (11565.0, 3, 11600.0),
            (-0.123_655_646_848_64, 2, -0.13),
        ];
        for (input, digits, expected) in cases {
            approx::assert_relative_eq!(round_uncertainty(input, digits), expected);
        }
        assert_eq!(round_uncertainty(0.0, 2), 0.0);
    }
}
