//! Expression trees over an ordered set of real variables
//!
//! An [`Expr`] only ever refers to variables by their position in the owning formula's variable
//! list. Names are supplied again when an expression is rendered, so the same tree can be shown
//! against whatever list it was parsed with.
//!
//! The arithmetic operator impls simplify as they build: neutral elements are dropped and
//! constant sub-trees are folded whenever the folded value is finite. Differentiation relies on
//! this to keep derivative trees close to what a person would write down by hand.
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Why an elementary operation rejected its argument
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FaultKind {
    Domain,
    NonDifferentiable,
}

/// The whitelisted elementary functions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    /// Natural logarithm
    Ln,
    Log10,
    Sqrt,
    Abs,
    /// Slope of `abs`. Only produced by differentiation and undefined at zero.
    Sign,
}

impl Function {
    /// Look a function up by the name used in formula text
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "exp" => Self::Exp,
            "log" | "ln" => Self::Ln,
            "log10" => Self::Log10,
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            _ => return None,
        };
        Some(function)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Exp => "exp",
            Self::Ln => "log",
            Self::Log10 => "log10",
            Self::Sqrt => "sqrt",
            Self::Abs => "abs",
            Self::Sign => "sign",
        }
    }

    /// Apply the function to a real argument, rejecting points outside its domain
    pub(crate) fn apply(self, x: f64) -> Result<f64, FaultKind> {
        let value = match self {
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => {
                if x.cos() == 0.0 {
                    return Err(FaultKind::Domain);
                }
                x.tan()
            }
            Self::Asin | Self::Acos if x.abs() > 1.0 => return Err(FaultKind::Domain),
            Self::Asin => x.asin(),
            Self::Acos => x.acos(),
            Self::Atan => x.atan(),
            Self::Sinh => x.sinh(),
            Self::Cosh => x.cosh(),
            Self::Tanh => x.tanh(),
            Self::Exp => x.exp(),
            Self::Ln | Self::Log10 if x <= 0.0 => return Err(FaultKind::Domain),
            Self::Ln => x.ln(),
            Self::Log10 => x.log10(),
            Self::Sqrt if x < 0.0 => return Err(FaultKind::Domain),
            Self::Sqrt => x.sqrt(),
            Self::Abs => x.abs(),
            Self::Sign if x == 0.0 => return Err(FaultKind::NonDifferentiable),
            Self::Sign => x.signum(),
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FaultKind::Domain)
        }
    }

    /// The name a failure of this function is reported under
    pub(crate) const fn reported_name(self) -> &'static str {
        match self {
            // `sign` only exists as the derivative of `abs`
            Self::Sign => "abs",
            other => other.name(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }

    const fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Pow => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(f64),
    /// Index into the owning formula's variable list
    Variable(usize),
    Negate(Box<Expr>),
    Function {
        function: Function,
        argument: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

const NEGATE_PRECEDENCE: u8 = 3;
const ATOM_PRECEDENCE: u8 = 5;

impl Expr {
    pub const fn constant(value: f64) -> Self {
        Self::Constant(value)
    }

    pub const fn variable(index: usize) -> Self {
        Self::Variable(index)
    }

    const fn zero() -> Self {
        Self::Constant(0.0)
    }

    const fn one() -> Self {
        Self::Constant(1.0)
    }

    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn as_constant(&self) -> Option<f64> {
        match self {
            Self::Constant(value) => Some(*value),
            _ => None,
        }
    }

    fn is_constant(&self, target: f64) -> bool {
        self.as_constant().is_some_and(|value| value == target)
    }

    /// Apply an elementary function
    ///
    /// Constant arguments are folded when the function is defined there.
    #[must_use]
    pub fn apply(function: Function, argument: Self) -> Self {
        if let Some(value) = argument.as_constant().and_then(|x| function.apply(x).ok()) {
            return Self::Constant(value);
        }
        Self::Function {
            function,
            argument: Box::new(argument),
        }
    }

    /// Raise to a power
    #[must_use]
    pub fn pow(self, exponent: Self) -> Self {
        if exponent.is_constant(0.0) {
            return Self::one();
        }
        if exponent.is_constant(1.0) {
            return self;
        }
        if let (Some(base), Some(power)) = (self.as_constant(), exponent.as_constant()) {
            let folded = base.powf(power);
            if folded.is_finite() && !(base == 0.0 && power < 0.0) {
                return Self::Constant(folded);
            }
        }
        Self::binary(BinaryOp::Pow, self, exponent)
    }

    /// Whether the variable at `index` occurs anywhere in the expression
    pub fn depends_on(&self, index: usize) -> bool {
        match self {
            Self::Constant(_) => false,
            Self::Variable(ii) => *ii == index,
            Self::Negate(inner) => inner.depends_on(index),
            Self::Function { argument, .. } => argument.depends_on(index),
            Self::Binary { lhs, rhs, .. } => lhs.depends_on(index) || rhs.depends_on(index),
        }
    }

    /// The indices of every variable used, in ascending order
    pub fn variables(&self) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        self.collect_variables(&mut found);
        found
    }

    fn collect_variables(&self, found: &mut BTreeSet<usize>) {
        match self {
            Self::Constant(_) => {}
            Self::Variable(index) => {
                found.insert(*index);
            }
            Self::Negate(inner) | Self::Function { argument: inner, .. } => {
                inner.collect_variables(found);
            }
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(found);
                rhs.collect_variables(found);
            }
        }
    }

    /// Display the expression using `names` for its variables
    pub const fn render<'a>(&'a self, names: &'a [String]) -> Rendered<'a> {
        Rendered { expr: self, names }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Constant(value) if value.is_sign_negative() => NEGATE_PRECEDENCE,
            Self::Negate(_) => NEGATE_PRECEDENCE,
            Self::Binary { op, .. } => op.precedence(),
            Self::Constant(_) | Self::Variable(_) | Self::Function { .. } => ATOM_PRECEDENCE,
        }
    }
}

impl Add for Expr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if self.is_constant(0.0) {
            return rhs;
        }
        if rhs.is_constant(0.0) {
            return self;
        }
        if let (Some(a), Some(b)) = (self.as_constant(), rhs.as_constant()) {
            if (a + b).is_finite() {
                return Self::Constant(a + b);
            }
        }
        match rhs {
            Self::Negate(inner) => Self::binary(BinaryOp::Sub, self, *inner),
            rhs => Self::binary(BinaryOp::Add, self, rhs),
        }
    }
}

impl Sub for Expr {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        if rhs.is_constant(0.0) {
            return self;
        }
        if self.is_constant(0.0) {
            return -rhs;
        }
        if let (Some(a), Some(b)) = (self.as_constant(), rhs.as_constant()) {
            if (a - b).is_finite() {
                return Self::Constant(a - b);
            }
        }
        Self::binary(BinaryOp::Sub, self, rhs)
    }
}

impl Mul for Expr {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        if self.is_constant(0.0) || rhs.is_constant(0.0) {
            return Self::zero();
        }
        if self.is_constant(1.0) {
            return rhs;
        }
        if rhs.is_constant(1.0) {
            return self;
        }
        if self.is_constant(-1.0) {
            return -rhs;
        }
        if rhs.is_constant(-1.0) {
            return -self;
        }
        if let (Some(a), Some(b)) = (self.as_constant(), rhs.as_constant()) {
            if (a * b).is_finite() {
                return Self::Constant(a * b);
            }
        }
        Self::binary(BinaryOp::Mul, self, rhs)
    }
}

impl Div for Expr {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        if rhs.is_constant(1.0) {
            return self;
        }
        if self.is_constant(0.0) {
            return Self::zero();
        }
        if let (Some(a), Some(b)) = (self.as_constant(), rhs.as_constant()) {
            if b != 0.0 && (a / b).is_finite() {
                return Self::Constant(a / b);
            }
        }
        Self::binary(BinaryOp::Div, self, rhs)
    }
}

impl Neg for Expr {
    type Output = Self;

    fn neg(self) -> Self {
        match self {
            Self::Constant(value) => Self::Constant(-value),
            Self::Negate(inner) => *inner,
            other => Self::Negate(Box::new(other)),
        }
    }
}

/// An expression paired with the names of its variables, ready for display
pub struct Rendered<'a> {
    expr: &'a Expr,
    names: &'a [String],
}

impl Rendered<'_> {
    fn child<'b>(&'b self, expr: &'b Expr) -> Rendered<'b> {
        Rendered {
            expr,
            names: self.names,
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
        if parens {
            write!(f, "({})", self.child(expr))
        } else {
            write!(f, "{}", self.child(expr))
        }
    }
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr {
            Expr::Constant(value) => write!(f, "{value}"),
            Expr::Variable(index) => match self.names.get(*index) {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "x{index}"),
            },
            Expr::Negate(inner) => {
                write!(f, "-")?;
                self.write_operand(f, inner, inner.precedence() <= NEGATE_PRECEDENCE)
            }
            Expr::Function { function, argument } => {
                write!(f, "{}({})", function.name(), self.child(argument))
            }
            Expr::Binary { op, lhs, rhs } => {
                let precedence = op.precedence();
                let (lhs_parens, rhs_parens) = match op {
                    BinaryOp::Add | BinaryOp::Mul => {
                        (lhs.precedence() < precedence, rhs.precedence() < precedence)
                    }
                    BinaryOp::Sub | BinaryOp::Div => {
                        (lhs.precedence() < precedence, rhs.precedence() <= precedence)
                    }
                    BinaryOp::Pow => {
                        (lhs.precedence() <= precedence, rhs.precedence() < precedence)
                    }
                };
                self.write_operand(f, lhs, lhs_parens)?;
                if *op == BinaryOp::Pow {
                    write!(f, "^")?;
                } else {
                    write!(f, " {} ", op.symbol())?;
                }
                self.write_operand(f, rhs, rhs_parens)
            }
        }
    }
}
