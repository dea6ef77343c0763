use ndarray::{Array, Array2, ArrayView1};

use crate::error::{Error, Result};

/// Compute the outer product of two one-dimensional vectors of length (m x 1) and (n x 1)
///
/// The outer product is the (m x n) matrix whose elements are products of elements in the first
/// vector with those in the second.
///
/// # Examples
///
/// ```
/// use error_propagation::math::outer_product;
/// use ndarray::{arr1, arr2};
///
/// let u = arr1(&[1., 2., 3.]);
/// let v = arr1(&[4., 5., 6.]);
/// let outer_product = outer_product(u.view(), v.view()).unwrap();
///
/// let expected = arr2(&[[4., 5., 6.], [8., 10., 12.], [12., 15., 18.]]);
/// assert_eq!(outer_product, expected);
///```
///
/// # Errors
/// Only fails if the inputs cannot be reshaped, which does not happen for one-dimensional views.
pub fn outer_product(u: ArrayView1<f64>, v: ArrayView1<f64>) -> Result<Array2<f64>> {
    let u: Array2<f64> = u.to_owned().into_shape((u.len(), 1))?;
    let v: Array2<f64> = v.to_owned().into_shape((1, v.len()))?;

    Ok(ndarray::linalg::kron(&u, &v))
}

/// Generate the Vandermode matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation `x` from power `0` to `degree` inclusive.
///
/// # Examples
///
/// ```
/// use error_propagation::math::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2).unwrap();
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
///
/// # Errors
/// Fails if `degree` does not fit in an `i32`.
pub fn vandermonde(x: &[f64], degree: usize) -> Result<Array2<f64>> {
    let max_power = i32::try_from(degree)
        .map_err(|_| Error::Fit(format!("polynomial degree {degree} is too large")))?;
    let vals = x
        .iter()
        .flat_map(|xi| (0..=max_power).map(move |power| xi.powi(power)));

    Ok(Array::from_iter(vals).into_shape((x.len(), degree + 1))?)
}
