use crate::expression::{BinaryOp, Expr, FaultKind};

/// A sub-expression which could not be evaluated at the requested point
#[derive(Debug)]
pub(crate) struct Fault<'a> {
    pub(crate) kind: FaultKind,
    pub(crate) function: &'static str,
    pub(crate) argument: f64,
    pub(crate) expression: &'a Expr,
}

impl<'a> Fault<'a> {
    const fn domain(function: &'static str, argument: f64, expression: &'a Expr) -> Self {
        Self {
            kind: FaultKind::Domain,
            function,
            argument,
            expression,
        }
    }
}

/// Evaluate `expr` with `values[i]` substituted for variable `i`
///
/// Every intermediate result must be a finite real number. The first sub-expression that is not
/// is returned as the fault, so the innermost offending term is the one reported.
pub(crate) fn evaluate<'a>(expr: &'a Expr, values: &[f64]) -> Result<f64, Fault<'a>> {
    match expr {
        Expr::Constant(value) => Ok(*value),
        Expr::Variable(index) => Ok(values[*index]),
        Expr::Negate(inner) => Ok(-evaluate(inner, values)?),
        Expr::Function { function, argument } => {
            let x = evaluate(argument, values)?;
            function.apply(x).map_err(|kind| Fault {
                kind,
                function: function.reported_name(),
                argument: x,
                expression: expr,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = evaluate(lhs, values)?;
            let b = evaluate(rhs, values)?;
            let value = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(Fault::domain(op.symbol(), b, expr));
                    }
                    a / b
                }
                BinaryOp::Pow => {
                    // Negative bases are only real for integer exponents, zero has no negative
                    // powers
                    if (a < 0.0 && b.fract() != 0.0) || (a == 0.0 && b < 0.0) {
                        return Err(Fault::domain(op.symbol(), a, expr));
                    }
                    a.powf(b)
                }
            };
            if value.is_finite() {
                Ok(value)
            } else {
                Err(Fault::domain(op.symbol(), a, expr))
            }
        }
    }
}
