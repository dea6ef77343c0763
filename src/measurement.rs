use std::fmt;

use num_traits::Float;

use crate::statistics::{decimal_exponent, round_to_exponent, round_uncertainty};

/// A value together with its absolute standard uncertainty
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement<E = f64> {
    pub value: E,
    pub uncertainty: E,
}

impl<E: Float> Measurement<E> {
    pub const fn new(value: E, uncertainty: E) -> Self {
        Self { value, uncertainty }
    }

    /// A value known without uncertainty
    pub fn from_centroid(value: E) -> Self {
        Self {
            value,
            uncertainty: E::zero(),
        }
    }

    /// The uncertainty as a fraction of the magnitude of the value
    ///
    /// Returns `None` for a zero value, where the ratio is undefined.
    pub fn relative_uncertainty(&self) -> Option<E> {
        if self.value == E::zero() {
            None
        } else {
            Some(self.uncertainty / self.value.abs())
        }
    }

    /// Multiply by an exact factor, as when converting units
    #[must_use]
    pub fn scaled(&self, factor: E) -> Self {
        Self {
            value: self.value * factor,
            uncertainty: self.uncertainty * factor.abs(),
        }
    }
}

impl Measurement<f64> {
    /// Round for reporting
    ///
    /// The uncertainty is rounded up to `significant_digits` and the value is rounded half away
    /// from zero to the same decimal place, so the reported interval never understates the
    /// uncertainty. Exact measurements are returned unchanged.
    #[must_use]
    pub fn rounded(&self, significant_digits: usize) -> Self {
        let Some(exponent) = decimal_exponent(self.uncertainty, significant_digits) else {
            return *self;
        };
        Self {
            value: round_to_exponent(self.value, exponent),
            uncertainty: round_uncertainty(self.uncertainty, significant_digits),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Measurement<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ± {}", self.value, self.uncertainty)
    }
}

#[cfg(test)]
mod tests {
    use super::Measurement;

    #[test]
    fn scaling_keeps_uncertainty_non_negative() {
        let measurement = Measurement::new(2.0, 0.5);
        let scaled = measurement.scaled(-3.0);
        approx::assert_relative_eq!(scaled.value, -6.0);
        approx::assert_relative_eq!(scaled.uncertainty, 1.5);
    }

    #[test]
    fn relative_uncertainty_is_undefined_at_zero() {
        assert_eq!(Measurement::new(0.0, 0.1).relative_uncertainty(), None);
        approx::assert_relative_eq!(
            Measurement::new(-4.0, 0.2).relative_uncertainty().unwrap(),
            0.05
        );
    }

    #[test]
    fn rounding_matches_the_uncertainty_decimal_place() {
        let rounded = Measurement::new(9.81234, 0.01234).rounded(2);
        approx::assert_relative_eq!(rounded.value, 9.812);
        approx::assert_relative_eq!(rounded.uncertainty, 0.013);

        let rounded = Measurement::new(1234.5, 115.0).rounded(2);
        approx::assert_relative_eq!(rounded.value, 1230.0);
        approx::assert_relative_eq!(rounded.uncertainty, 120.0);
    }

    #[test]
    fn exact_values_are_not_rounded() {
        let exact = Measurement::from_centroid(std::f64::consts::PI);
        assert_eq!(exact.rounded(2), exact);
    }

    #[test]
    fn measurements_display_with_plus_minus() {
        assert_eq!(Measurement::new(10.0, 1.5).to_string(), "10 ± 1.5");
    }
}
