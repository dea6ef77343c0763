use std::fmt;

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// The failing point of an evaluation.
///
/// Carries enough context for a lab user to find the bad data entry: the formula as written, the
/// sub-expression that could not be evaluated, the elementary function and the argument it was
/// given, and the values of the variables that feed into that sub-expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    pub formula: String,
    pub expression: String,
    pub function: &'static str,
    pub argument: f64,
    pub bindings: Vec<(String, f64)>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` is undefined for argument {} in `{}` of formula `{}`",
            self.function, self.argument, self.expression, self.formula
        )?;
        if !self.bindings.is_empty() {
            write!(f, " (")?;
            for (ii, (name, value)) in self.bindings.iter().enumerate() {
                if ii > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name} = {value}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("`{name}` is used in `{formula}` but is not a declared variable")]
    UndefinedVariable { name: String, formula: String },

    #[error("invalid variable name `{0}`")]
    InvalidVariableName(String),

    #[error("variable `{0}` is declared more than once")]
    DuplicateVariable(String),

    #[error("dimension mismatch: expected {expected} {what}, got {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("uncertainty of `{name}` must be finite and non-negative, got {value}")]
    InvalidUncertainty { name: String, value: f64 },

    #[error("domain error: {0}")]
    Domain(Box<Violation>),

    #[error("not differentiable: {0}")]
    NonDifferentiable(Box<Violation>),

    #[error("scaling factor must be finite, got {0}")]
    InvalidScalingFactor(f64),

    #[error("division by zero: {0}")]
    DivisionByZero(String),

    #[error("at least {required} data points are required, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid covariance matrix: {0}")]
    InvalidCovariance(String),

    #[error("fit failed: {0}")]
    Fit(String),

    #[error("row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("linear algebra failure: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Attach the index of the measurement row that produced this error
    #[must_use]
    pub fn in_row(self, row: usize) -> Self {
        Self::Row {
            row,
            source: Box::new(self),
        }
    }

    /// The error with any row context stripped
    pub fn root(&self) -> &Self {
        match self {
            Self::Row { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) const fn dimension_mismatch(what: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            what,
            expected,
            found,
        }
    }
}
