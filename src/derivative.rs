//! Structural differentiation. Every node kind has exactly one closed-form rule and the operator
//! impls on `Expr` simplify while the result is assembled, so terms which do not depend on the
//! variable collapse to zero instead of surviving into evaluation.
use std::f64::consts::LN_10;

use crate::expression::{BinaryOp, Expr, Function};

impl Expr {
    /// The partial derivative with respect to the variable at `index`
    #[must_use]
    pub fn derivative(&self, index: usize) -> Self {
        match self {
            Self::Constant(_) => Self::constant(0.0),
            Self::Variable(ii) => Self::constant(if *ii == index { 1.0 } else { 0.0 }),
            Self::Negate(inner) => -inner.derivative(index),
            Self::Function { function, argument } => {
                let inner = argument.derivative(index);
                if inner == Self::constant(0.0) {
                    return inner;
                }
                outer_derivative(*function, argument) * inner
            }
            Self::Binary { op, lhs, rhs } => binary_derivative(*op, lhs, rhs, index),
        }
    }
}

/// `f'(u)` for an elementary function `f`, still to be multiplied by `u'`
fn outer_derivative(function: Function, u: &Expr) -> Expr {
    let u = u.clone();
    let one = || Expr::constant(1.0);
    let square = |e: Expr| e.pow(Expr::constant(2.0));

    match function {
        Function::Sin => Expr::apply(Function::Cos, u),
        Function::Cos => -Expr::apply(Function::Sin, u),
        Function::Tan => one() / square(Expr::apply(Function::Cos, u)),
        Function::Asin => one() / Expr::apply(Function::Sqrt, one() - square(u)),
        Function::Acos => -(one() / Expr::apply(Function::Sqrt, one() - square(u))),
        Function::Atan => one() / (one() + square(u)),
        Function::Sinh => Expr::apply(Function::Cosh, u),
        Function::Cosh => Expr::apply(Function::Sinh, u),
        Function::Tanh => one() - square(Expr::apply(Function::Tanh, u)),
        Function::Exp => Expr::apply(Function::Exp, u),
        Function::Ln => one() / u,
        Function::Log10 => one() / (u * Expr::constant(LN_10)),
        Function::Sqrt => one() / (Expr::constant(2.0) * Expr::apply(Function::Sqrt, u)),
        Function::Abs => Expr::apply(Function::Sign, u),
        // Zero wherever it is defined, and evaluating `sign` itself rejects the kink
        Function::Sign => Expr::constant(0.0),
    }
}

fn binary_derivative(op: BinaryOp, lhs: &Expr, rhs: &Expr, index: usize) -> Expr {
    let (u, v) = (lhs.clone(), rhs.clone());
    match op {
        BinaryOp::Add => lhs.derivative(index) + rhs.derivative(index),
        BinaryOp::Sub => lhs.derivative(index) - rhs.derivative(index),
        BinaryOp::Mul => lhs.derivative(index) * v + u * rhs.derivative(index),
        BinaryOp::Div => {
            let du = lhs.derivative(index);
            let dv = rhs.derivative(index);
            if dv == Expr::constant(0.0) {
                return du / v;
            }
            (du * v.clone() - u * dv) / v.pow(Expr::constant(2.0))
        }
        BinaryOp::Pow => {
            let base_varies = lhs.depends_on(index);
            let exponent_varies = rhs.depends_on(index);
            match (base_varies, exponent_varies) {
                (false, false) => Expr::constant(0.0),
                // Power rule, which also keeps negative bases with integer exponents evaluable
                (true, false) => {
                    let reduced = v.clone() - Expr::constant(1.0);
                    v * u.pow(reduced) * lhs.derivative(index)
                }
                (false, true) => {
                    u.clone().pow(v) * Expr::apply(Function::Ln, u) * rhs.derivative(index)
                }
                (true, true) => {
                    let du = lhs.derivative(index);
                    let dv = rhs.derivative(index);
                    let power = u.clone().pow(v.clone());
                    power * (dv * Expr::apply(Function::Ln, u.clone()) + v * du / u)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::evaluate::evaluate;
    use crate::expression::{Expr, Function};
    use crate::parser::parse;

    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    fn variables() -> Vec<String> {
        vec!["x".into(), "y".into()]
    }

    /// Compare a symbolic partial derivative against a central difference
    fn assert_matches_finite_difference(formula: &str, point: [f64; 2]) {
        let variables = variables();
        let expr = parse(formula, &variables).unwrap();
        for index in 0..2 {
            let symbolic = evaluate(&expr.derivative(index), &point).unwrap();

            let delta = 1e-6 * point[index].abs().max(1.0);
            let mut plus = point;
            plus[index] += delta;
            let mut minus = point;
            minus[index] -= delta;
            let numeric = (evaluate(&expr, &plus).unwrap() - evaluate(&expr, &minus).unwrap())
                / (2. * delta);

            approx::assert_relative_eq!(symbolic, numeric, max_relative = 1e-5, epsilon = 1e-8);
        }
    }

    #[test]
    fn derivatives_of_products_are_closed_form() {
        let variables = variables();
        let expr = parse("x * y", &variables).unwrap();
        assert_eq!(expr.derivative(0), Expr::variable(1));
        assert_eq!(expr.derivative(1), Expr::variable(0));
    }

    #[test]
    fn unrelated_variables_differentiate_to_zero() {
        let variables = variables();
        let expr = parse("sin(x) + log(x)", &variables).unwrap();
        assert_eq!(expr.derivative(1), Expr::constant(0.0));
    }

    #[test]
    fn abs_differentiates_to_sign() {
        let variables = variables();
        let expr = parse("abs(x)", &variables).unwrap();
        assert_eq!(
            expr.derivative(0),
            Expr::apply(Function::Sign, Expr::variable(0))
        );
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        let formulas = [
            "sin(x) * exp(y)",
            "x / y",
            "x^3 - 2*x*y + y^2",
            "sqrt(x^2 + y^2)",
            "atan(y / x)",
            "log(x) * cos(y)",
            "log10(x * y)",
            "x^y",
            "2^(x*y)",
            "tan(x / 4) + tanh(y)",
            "asin(x / 4) + acos(y / 4)",
            "sinh(x) / cosh(y)",
            "abs(x - 10) * y",
            "exp(-x / y) / sqrt(y)",
        ];

        for formula in formulas {
            for _ in 0..5 {
                let point = [rng.gen_range(0.5..3.0), rng.gen_range(0.5..3.0)];
                assert_matches_finite_difference(formula, point);
            }
        }
    }

    #[test]
    fn integer_powers_of_negative_bases_are_differentiable() {
        let variables = variables();
        let expr = parse("x^3", &variables).unwrap();
        let slope = evaluate(&expr.derivative(0), &[-2.0, 0.0]).unwrap();
        approx::assert_relative_eq!(slope, 12.0);
    }
}
