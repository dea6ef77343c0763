//! Formula parser
//!
//! A recursive descent parser over a deliberately small grammar: numeric literals, declared
//! variables, the constants `pi` and `E`, the four arithmetic operators, exponentiation (`^` or
//! `**`) and a fixed whitelist of elementary functions. Nothing outside of that grammar is
//! accepted, so a formula string can never do more than describe arithmetic.
use std::f64::consts;

use crate::error::{Error, Result};
use crate::expression::{Expr, Function};

/// Deepest expression tree the parser builds. Differentiation and evaluation recurse over the
/// tree, so this bounds their stack use as well.
const MAX_DEPTH: usize = 256;

/// Parse `formula` into an expression over `variables`
///
/// Identifiers are resolved against `variables` first, then against the constants `pi` and `E`.
/// Anything else is reported as [`Error::UndefinedVariable`].
///
/// # Errors
/// Returns [`Error::Parse`] for malformed input and [`Error::UndefinedVariable`] for identifiers
/// which are not declared.
pub fn parse(formula: &str, variables: &[String]) -> Result<Expr> {
    let tokens = tokenize(formula)?;
    let mut parser = Parser {
        formula,
        variables,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;

    let (position, token) = parser.peek();
    if *token != Token::End {
        return Err(Error::Parse {
            position,
            message: format!("unexpected {} after expression", token.describe()),
        });
    }

    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LeftParen,
    RightParen,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(value) => format!("number {value}"),
            Self::Identifier(name) => format!("identifier `{name}`"),
            Self::Plus => "`+`".into(),
            Self::Minus => "`-`".into(),
            Self::Star => "`*`".into(),
            Self::Slash => "`/`".into(),
            Self::Caret => "`^`".into(),
            Self::LeftParen => "`(`".into(),
            Self::RightParen => "`)`".into(),
            Self::Comma => "`,`".into(),
            Self::End => "end of input".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = vec![];
    let mut ii = 0;

    while ii < chars.len() {
        let (position, c) = chars[ii];

        if c.is_whitespace() {
            ii += 1;
            continue;
        }

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if matches!(chars.get(ii + 1), Some((_, '*'))) => {
                ii += 1;
                Token::Caret
            }
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            ',' => Token::Comma,
            c if c.is_ascii_digit() || c == '.' => {
                let (token, next) = scan_number(input, &chars, ii)?;
                tokens.push((position, token));
                ii = next;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = ii;
                while ii < chars.len() && (chars[ii].1.is_ascii_alphanumeric() || chars[ii].1 == '_')
                {
                    ii += 1;
                }
                let end = chars.get(ii).map_or(input.len(), |(p, _)| *p);
                tokens.push((position, Token::Identifier(input[chars[start].0..end].to_owned())));
                continue;
            }
            other => {
                return Err(Error::Parse {
                    position,
                    message: format!("unexpected character `{other}`"),
                })
            }
        };
        tokens.push((position, token));
        ii += 1;
    }

    tokens.push((input.len(), Token::End));
    Ok(tokens)
}

/// Scan a numeric literal starting at `chars[start]`, returning it with the index after it
fn scan_number(input: &str, chars: &[(usize, char)], start: usize) -> Result<(Token, usize)> {
    let digit_at = |ii: usize| chars.get(ii).is_some_and(|(_, c)| c.is_ascii_digit());

    let mut ii = start;
    while digit_at(ii) {
        ii += 1;
    }
    if matches!(chars.get(ii), Some((_, '.'))) {
        ii += 1;
        while digit_at(ii) {
            ii += 1;
        }
    }
    // An exponent only counts when digits follow, so `2e` stays a number then an identifier
    if matches!(chars.get(ii), Some((_, 'e' | 'E'))) {
        let mut jj = ii + 1;
        if matches!(chars.get(jj), Some((_, '+' | '-'))) {
            jj += 1;
        }
        if digit_at(jj) {
            ii = jj;
            while digit_at(ii) {
                ii += 1;
            }
        }
    }

    let position = chars[start].0;
    let end = chars.get(ii).map_or(input.len(), |(p, _)| *p);
    let text = &input[position..end];
    let value = text.parse::<f64>().map_err(|_| Error::Parse {
        position,
        message: format!("invalid number `{text}`"),
    })?;
    if !value.is_finite() {
        return Err(Error::Parse {
            position,
            message: format!("number `{text}` is out of range"),
        });
    }
    Ok((Token::Number(value), ii))
}

struct Parser<'a> {
    formula: &'a str,
    variables: &'a [String],
    tokens: Vec<(usize, Token)>,
    pos: usize,
    /// Depth of the tree under construction at the current token
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> (usize, &Token) {
        let (position, token) = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        (*position, token)
    }

    fn advance(&mut self) -> (usize, Token) {
        let (position, token) = self.peek();
        let token = token.clone();
        if token != Token::End {
            self.pos += 1;
        }
        (position, token)
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        let (position, token) = self.advance();
        if token == *expected {
            Ok(())
        } else {
            Err(Error::Parse {
                position,
                message: format!("expected {}, found {}", expected.describe(), token.describe()),
            })
        }
    }

    fn descend(&mut self, position: usize) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::Parse {
                position,
                message: format!("formula is nested more than {MAX_DEPTH} levels deep"),
            });
        }
        Ok(())
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        // Every operator in a chain adds a level above the operands before it
        let entry = self.depth;
        let mut expr = self.parse_term()?;
        loop {
            match self.peek().1 {
                Token::Plus => {
                    let (position, _) = self.advance();
                    self.descend(position)?;
                    expr = expr + self.parse_term()?;
                }
                Token::Minus => {
                    let (position, _) = self.advance();
                    self.descend(position)?;
                    expr = expr - self.parse_term()?;
                }
                _ => {
                    self.depth = entry;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let entry = self.depth;
        let mut expr = self.parse_unary()?;
        loop {
            match self.peek().1 {
                Token::Star => {
                    let (position, _) = self.advance();
                    self.descend(position)?;
                    expr = expr * self.parse_unary()?;
                }
                Token::Slash => {
                    let (position, _) = self.advance();
                    self.descend(position)?;
                    expr = expr / self.parse_unary()?;
                }
                _ => {
                    self.depth = entry;
                    return Ok(expr);
                }
            }
        }
    }

    /// Every nesting (signs, exponents, parentheses and calls) passes through here
    fn parse_unary(&mut self) -> Result<Expr> {
        self.descend(self.peek().0)?;
        let expr = self.parse_signed()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_signed(&mut self) -> Result<Expr> {
        match self.peek().1 {
            Token::Minus => {
                self.advance();
                Ok(-self.parse_unary()?)
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if *self.peek().1 == Token::Caret {
            self.advance();
            // Right associative, and the exponent may carry its own sign
            let exponent = self.parse_unary()?;
            return Ok(base.pow(exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let (position, token) = self.advance();
        match token {
            Token::Number(value) => Ok(Expr::constant(value)),
            Token::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }
            Token::Identifier(name) => {
                if *self.peek().1 == Token::LeftParen {
                    self.advance();
                    self.parse_call(position, &name)
                } else {
                    self.resolve(&name)
                }
            }
            other => Err(Error::Parse {
                position,
                message: format!("expected an operand, found {}", other.describe()),
            }),
        }
    }

    fn parse_call(&mut self, position: usize, name: &str) -> Result<Expr> {
        let function = Function::from_name(name).ok_or_else(|| Error::Parse {
            position,
            message: format!("unknown function `{name}`"),
        })?;

        let mut arguments = vec![self.parse_expression()?];
        while *self.peek().1 == Token::Comma {
            self.advance();
            arguments.push(self.parse_expression()?);
        }
        self.expect(&Token::RightParen)?;

        match (function, arguments.len()) {
            (_, 1) => Ok(Expr::apply(function, arguments.remove(0))),
            // log(x, b) is the logarithm of x to base b
            (Function::Ln, 2) if name == "log" => {
                let base = arguments.remove(1);
                let argument = arguments.remove(0);
                Ok(Expr::apply(Function::Ln, argument) / Expr::apply(Function::Ln, base))
            }
            (_, count) => Err(Error::Parse {
                position,
                message: format!("`{name}` takes 1 argument, got {count}"),
            }),
        }
    }

    fn resolve(&self, name: &str) -> Result<Expr> {
        if let Some(index) = self.variables.iter().position(|variable| variable == name) {
            return Ok(Expr::variable(index));
        }
        match name {
            "pi" => Ok(Expr::constant(consts::PI)),
            "E" => Ok(Expr::constant(consts::E)),
            _ => Err(Error::UndefinedVariable {
                name: name.to_owned(),
                formula: self.formula.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse;
    use crate::error::Error;
    use crate::expression::{Expr, Function};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|&name| name.to_owned()).collect()
    }

    #[test]
    fn precedence_and_associativity_follow_convention() {
        let variables = names(&["x", "y"]);
        let x = Expr::variable(0);
        let y = Expr::variable(1);

        assert_eq!(
            parse("x + y * x", &variables).unwrap(),
            x.clone() + y.clone() * x.clone()
        );
        assert_eq!(
            parse("-x^2", &variables).unwrap(),
            -(x.clone().pow(Expr::constant(2.0)))
        );
        assert_eq!(
            parse("x ** y ** 2", &variables).unwrap(),
            x.clone().pow(y.clone().pow(Expr::constant(2.0)))
        );
        assert_eq!(
            parse("x - y - x", &variables).unwrap(),
            (x.clone() - y.clone()) - x.clone()
        );
        assert_eq!(
            parse("2^-x", &variables).unwrap(),
            Expr::constant(2.0).pow(-x)
        );
    }

    #[test]
    fn numbers_accept_scientific_notation() {
        assert_eq!(parse("1.5e-3", &[]).unwrap(), Expr::constant(1.5e-3));
        assert_eq!(parse(".5", &[]).unwrap(), Expr::constant(0.5));
        assert_eq!(parse("2E2", &[]).unwrap(), Expr::constant(200.0));
    }

    #[test]
    fn literals_beyond_f64_are_rejected_where_they_start() {
        let variables = names(&["x"]);
        for (formula, expected_position) in [("1e999", 0), ("x + 2.5E+400", 4)] {
            match parse(formula, &variables) {
                Err(Error::Parse { position, message }) => {
                    assert_eq!(position, expected_position);
                    assert!(message.contains("out of range"));
                }
                other => panic!("`{formula}` should not parse, got {other:?}"),
            }
        }
        // Underflow to zero is still a finite number
        assert_eq!(parse("1e-999", &[]).unwrap(), Expr::constant(0.0));
    }

    #[test]
    fn nesting_is_bounded() {
        let variables = names(&["x"]);
        let shallow = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&shallow, &variables).unwrap(), Expr::variable(0));

        for formula in [
            format!("{}x{}", "(".repeat(200_000), ")".repeat(200_000)),
            format!("{}x", "-".repeat(1_000)),
            vec!["x"; 1_000].join(" ^ "),
            vec!["x"; 1_000].join(" + "),
            format!("{}x{}", "sin(".repeat(1_000), ")".repeat(1_000)),
        ] {
            assert!(matches!(
                parse(&formula, &variables),
                Err(Error::Parse { .. })
            ));
        }
    }

    #[test]
    fn functions_and_constants_resolve() {
        let variables = names(&["x"]);
        assert_eq!(
            parse("sin(x)", &variables).unwrap(),
            Expr::apply(Function::Sin, Expr::variable(0))
        );
        assert_eq!(
            parse("ln(x)", &variables).unwrap(),
            parse("log(x)", &variables).unwrap()
        );
        assert_eq!(parse("pi", &[]).unwrap(), Expr::constant(std::f64::consts::PI));
    }

    #[test]
    fn declared_variables_shadow_constants() {
        let variables = names(&["E"]);
        assert_eq!(parse("E", &variables).unwrap(), Expr::variable(0));
    }

    #[test]
    fn two_argument_log_changes_base() {
        let variables = names(&["x"]);
        let expected = Expr::apply(Function::Ln, Expr::variable(0))
            / Expr::apply(Function::Ln, Expr::constant(2.0));
        assert_eq!(parse("log(x, 2)", &variables).unwrap(), expected);
    }

    #[test]
    fn undeclared_identifiers_are_reported() {
        let variables = names(&["x"]);
        match parse("x * z", &variables) {
            Err(Error::UndefinedVariable { name, formula }) => {
                assert_eq!(name, "z");
                assert_eq!(formula, "x * z");
            }
            other => panic!("expected an undefined variable, got {other:?}"),
        }
    }

    #[test]
    fn malformed_input_is_rejected_with_a_position() {
        let variables = names(&["x"]);
        for (formula, expected_position) in [("x +", 3), ("(x", 2), ("x $ 2", 2), ("x x", 2)] {
            match parse(formula, &variables) {
                Err(Error::Parse { position, .. }) => assert_eq!(position, expected_position),
                other => panic!("`{formula}` should not parse, got {other:?}"),
            }
        }
    }

    #[test]
    fn only_whitelisted_functions_are_callable() {
        let variables = names(&["x"]);
        assert!(matches!(
            parse("system(x)", &variables),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            parse("sin(x, x)", &variables),
            Err(Error::Parse { .. })
        ));
    }
}
