#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

//! Gaussian error propagation for laboratory measurements
//!
//! A formula is written as text over named variables, parsed into an expression tree and
//! differentiated symbolically. Each measurement row then supplies values and absolute
//! uncertainties, and the result is propagated to first order:
//!
//! ```
//! use error_propagation::propagate;
//!
//! let result = propagate("x * y", &["x", "y"], &[5.0, 2.0], &[0.5, 0.1]).unwrap();
//! assert_eq!(result.value, 10.0);
//! ```
//!
//! Around the engine sit the usual companions of an analysis: combination rules in
//! [`statistics`], polynomial and non-linear fits in [`polyfit`] and [`curve_fit`], row-by-row
//! processing in [`batch`] and TOML analysis descriptions in [`config`].

// Links the BLAS and LAPACK backend used through `ndarray-linalg`
extern crate blas_src;

pub mod batch;
pub mod config;
pub mod curve_fit;
mod derivative;
pub mod error;
mod evaluate;
pub mod expression;
pub mod formula;
pub mod math;
pub mod measurement;
mod parser;
pub mod polyfit;
pub mod propagation;
pub mod statistics;

pub use error::{Error, Result, Violation};
pub use formula::Formula;
pub use measurement::Measurement;
pub use propagation::{gauss_error_product, propagate};
pub use statistics::{pythagorean_addition, weighted_mean};
