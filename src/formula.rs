use std::collections::HashSet;
use std::fmt;

use itertools::izip;
use ndarray::Array1;

use crate::error::{Error, Result, Violation};
use crate::evaluate::{evaluate, Fault};
use crate::expression::{Expr, FaultKind};
use crate::parser::parse;

/// A parsed formula over an ordered list of named variables
///
/// The formula is parsed and differentiated once, at construction. Evaluating it for another
/// measurement row only substitutes numbers, so one `Formula` is meant to be reused for every row
/// of an analysis. It is immutable and can be shared freely between threads.
#[derive(Clone, Debug)]
pub struct Formula {
    text: String,
    variables: Vec<String>,
    expression: Expr,
    /// `partials[i]` is the derivative with respect to `variables[i]`
    partials: Vec<Expr>,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Formula {
    /// Parse `text` as a formula in `variables`
    ///
    /// The order of `variables` is the order in which values and uncertainties must later be
    /// supplied. Variables that do not appear in the formula are allowed and simply have a zero
    /// partial derivative.
    ///
    /// # Examples
    ///
    /// ```
    /// use error_propagation::Formula;
    ///
    /// let formula = Formula::parse("x * y", &["x", "y"]).unwrap();
    /// let product = formula.propagate(&[5.0, 2.0], &[0.5, 0.1]).unwrap();
    ///
    /// assert_eq!(product.value, 10.0);
    /// assert!((product.uncertainty - 1.25f64.sqrt()).abs() < 1e-12);
    /// ```
    ///
    /// # Errors
    /// - [`Error::InvalidVariableName`] or [`Error::DuplicateVariable`] for a bad variable list
    /// - [`Error::Parse`] if `text` is not a valid formula
    /// - [`Error::UndefinedVariable`] if `text` uses a name missing from `variables`
    pub fn parse<S: AsRef<str>>(text: &str, variables: &[S]) -> Result<Self> {
        let variables: Vec<String> = variables
            .iter()
            .map(|name| name.as_ref().trim().to_owned())
            .collect();

        let mut seen = HashSet::new();
        for name in &variables {
            if !is_identifier(name) {
                return Err(Error::InvalidVariableName(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::DuplicateVariable(name.clone()));
            }
        }

        let expression = parse(text, &variables)?;
        let partials = (0..variables.len())
            .map(|index| expression.derivative(index))
            .collect();

        Ok(Self {
            text: text.to_owned(),
            variables,
            expression,
            partials,
        })
    }

    /// Parse with the variables given as one whitespace or comma separated string, `"x y"`
    ///
    /// # Errors
    /// As [`Formula::parse`].
    pub fn with_symbols(text: &str, symbols: &str) -> Result<Self> {
        let variables: Vec<&str> = symbols
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|name| !name.is_empty())
            .collect();
        Self::parse(text, &variables)
    }

    /// The formula as it was written
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|variable| variable == name)
    }

    pub const fn expression(&self) -> &Expr {
        &self.expression
    }

    /// The symbolic partial derivative with respect to the variable at `index`
    pub fn partial(&self, index: usize) -> Option<&Expr> {
        self.partials.get(index)
    }

    /// The symbolic partial derivative with respect to `name`, rendered as text
    pub fn partial_text(&self, name: &str) -> Option<String> {
        let index = self.index_of(name)?;
        Some(self.partials[index].render(&self.variables).to_string())
    }

    pub(crate) fn check_point(&self, values: &[f64]) -> Result<()> {
        if values.len() == self.variables.len() {
            Ok(())
        } else {
            Err(Error::dimension_mismatch(
                "values",
                self.variables.len(),
                values.len(),
            ))
        }
    }

    /// Evaluate the formula at `values`
    ///
    /// # Errors
    /// - [`Error::DimensionMismatch`] if `values` does not have one entry per variable
    /// - [`Error::Domain`] or [`Error::NonDifferentiable`] if the formula is undefined at `values`
    pub fn value_at(&self, values: &[f64]) -> Result<f64> {
        self.check_point(values)?;
        evaluate(&self.expression, values).map_err(|fault| self.violation(&fault, values))
    }

    /// Evaluate every partial derivative at `values`, in variable order
    ///
    /// # Errors
    /// As [`Formula::value_at`].
    pub fn gradient_at(&self, values: &[f64]) -> Result<Array1<f64>> {
        self.check_point(values)?;
        self.partials
            .iter()
            .map(|partial| {
                evaluate(partial, values).map_err(|fault| self.violation(&fault, values))
            })
            .collect()
    }

    /// The propagated uncertainty at `values` is beyond the range of `f64`
    pub(crate) fn unrepresentable(&self, values: &[f64], uncertainty: f64) -> Error {
        Error::Domain(Box::new(Violation {
            formula: self.text.clone(),
            expression: self.text.clone(),
            function: "uncertainty",
            argument: uncertainty,
            bindings: izip!(&self.variables, values)
                .map(|(name, &value)| (name.clone(), value))
                .collect(),
        }))
    }

    fn violation(&self, fault: &Fault<'_>, values: &[f64]) -> Error {
        let bindings = fault
            .expression
            .variables()
            .into_iter()
            .map(|index| (self.variables[index].clone(), values[index]))
            .collect();

        let violation = Box::new(Violation {
            formula: self.text.clone(),
            expression: fault.expression.render(&self.variables).to_string(),
            function: fault.function,
            argument: fault.argument,
            bindings,
        });

        match fault.kind {
            FaultKind::Domain => Error::Domain(violation),
            FaultKind::NonDifferentiable => Error::NonDifferentiable(violation),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
