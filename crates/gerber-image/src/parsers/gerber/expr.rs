//! Aperture macro arithmetic.
//!
//! Gerber uses `x` or `X` for multiplication (not `*`, which terminates
//! statements). Operators are `+ - x /`, unary minus, parentheses, numeric
//! literals and `$n` variable references.

use std::collections::HashMap;
use std::fmt;

use log::warn;

use crate::error::GerberError;

/// Numbered macro variables (`$1`, `$2`, ...).
pub type MacroMemory = HashMap<u32, f64>;

/// Expression node for macro parameter evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable(u32), // $1 = Variable(1)
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate against the current variable memory.
    ///
    /// Unset variables read as zero; dividing by zero yields zero.
    pub fn eval(&self, memory: &MacroMemory) -> f64 {
        match self {
            Expr::Literal(v) => *v,
            Expr::Variable(idx) => memory.get(idx).copied().unwrap_or(0.0),
            Expr::Neg(a) => -a.eval(memory),
            Expr::Add(a, b) => a.eval(memory) + b.eval(memory),
            Expr::Sub(a, b) => a.eval(memory) - b.eval(memory),
            Expr::Mul(a, b) => a.eval(memory) * b.eval(memory),
            Expr::Div(a, b) => {
                let denom = b.eval(memory);
                if denom.abs() < 1e-15 {
                    warn!("Macro expression divides by zero: {self}");
                    0.0
                } else {
                    a.eval(memory) / denom
                }
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(..) | Expr::Sub(..) => 1,
            Expr::Mul(..) | Expr::Div(..) => 2,
            Expr::Neg(_) => 3,
            Expr::Literal(v) if *v < 0.0 => 3,
            Expr::Literal(_) | Expr::Variable(_) => 4,
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let own = self.precedence();
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Variable(idx) => write!(f, "${idx}"),
            Expr::Neg(a) => {
                write!(f, "-")?;
                write_operand(f, a, a.precedence() < 4)
            }
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                let op = match self {
                    Expr::Add(..) => "+",
                    Expr::Sub(..) => "-",
                    Expr::Mul(..) => "x",
                    _ => "/",
                };
                write_operand(f, a, a.precedence() < own)?;
                write!(f, "{op}")?;
                // Right operands of equal precedence need grouping to keep associativity
                write_operand(f, b, b.precedence() <= own)
            }
        }
    }
}

// ─── Parser ──────────────────────────────────────────────────────────

/// Parse a macro expression string into an [`Expr`] tree.
pub fn parse_expr(s: &str, line: usize) -> Result<Expr, GerberError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Expr::Literal(0.0));
    }
    let tokens = tokenize_expr(s, line)?;
    let (expr, rest) = parse_add_sub(&tokens, line)?;
    if !rest.is_empty() {
        return Err(GerberError::unparsable(
            line,
            s,
            "unexpected tokens after macro expression",
        ));
    }
    Ok(expr)
}

#[derive(Debug, Clone)]
enum ExprToken {
    Num(f64),
    Var(u32),
    Plus,
    Minus,
    Mul,
    Div,
    LParen,
    RParen,
}

fn tokenize_expr(s: &str, line: usize) -> Result<Vec<ExprToken>, GerberError> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(ExprToken::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(ExprToken::Minus);
            }
            'x' | 'X' => {
                chars.next();
                tokens.push(ExprToken::Mul);
            }
            '/' => {
                chars.next();
                tokens.push(ExprToken::Div);
            }
            '(' => {
                chars.next();
                tokens.push(ExprToken::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(ExprToken::RParen);
            }
            '$' => {
                chars.next(); // consume '$'
                let mut num_str = String::new();
                while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
                    num_str.push(c);
                }
                let idx: u32 = num_str.parse().map_err(|_| {
                    GerberError::unparsable(line, s, "bad macro variable reference")
                })?;
                tokens.push(ExprToken::Var(idx));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut num_str = String::new();
                while let Some(c) = chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
                    num_str.push(c);
                }
                let val: f64 = num_str
                    .parse()
                    .map_err(|_| GerberError::unparsable(line, s, "bad number in macro expression"))?;
                tokens.push(ExprToken::Num(val));
            }
            _ => {
                return Err(GerberError::unparsable(
                    line,
                    s,
                    &format!("unexpected character '{ch}' in macro expression"),
                ));
            }
        }
    }

    Ok(tokens)
}

type Parsed<'a> = Result<(Expr, &'a [ExprToken]), GerberError>;

// Recursive descent: add/sub -> mul/div -> unary -> atom
fn parse_add_sub(tokens: &[ExprToken], line: usize) -> Parsed<'_> {
    let (mut left, mut rest) = parse_mul_div(tokens, line)?;
    loop {
        match rest.first() {
            Some(ExprToken::Plus) => {
                let (right, r) = parse_mul_div(&rest[1..], line)?;
                left = Expr::Add(Box::new(left), Box::new(right));
                rest = r;
            }
            Some(ExprToken::Minus) => {
                let (right, r) = parse_mul_div(&rest[1..], line)?;
                left = Expr::Sub(Box::new(left), Box::new(right));
                rest = r;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_mul_div(tokens: &[ExprToken], line: usize) -> Parsed<'_> {
    let (mut left, mut rest) = parse_unary(tokens, line)?;
    loop {
        match rest.first() {
            Some(ExprToken::Mul) => {
                let (right, r) = parse_unary(&rest[1..], line)?;
                left = Expr::Mul(Box::new(left), Box::new(right));
                rest = r;
            }
            Some(ExprToken::Div) => {
                let (right, r) = parse_unary(&rest[1..], line)?;
                left = Expr::Div(Box::new(left), Box::new(right));
                rest = r;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_unary(tokens: &[ExprToken], line: usize) -> Parsed<'_> {
    match tokens.first() {
        Some(ExprToken::Minus) => {
            let (operand, rest) = parse_unary(&tokens[1..], line)?;
            let negated = match operand {
                Expr::Literal(v) => Expr::Literal(-v),
                other => Expr::Neg(Box::new(other)),
            };
            Ok((negated, rest))
        }
        Some(ExprToken::Plus) => parse_unary(&tokens[1..], line),
        _ => parse_atom(tokens, line),
    }
}

fn parse_atom(tokens: &[ExprToken], line: usize) -> Parsed<'_> {
    match tokens.first() {
        Some(ExprToken::Num(v)) => Ok((Expr::Literal(*v), &tokens[1..])),
        Some(ExprToken::Var(idx)) => Ok((Expr::Variable(*idx), &tokens[1..])),
        Some(ExprToken::LParen) => {
            let (expr, rest) = parse_add_sub(&tokens[1..], line)?;
            match rest.first() {
                Some(ExprToken::RParen) => Ok((expr, &rest[1..])),
                _ => Err(GerberError::parse(
                    line,
                    "missing closing parenthesis in macro expression",
                )),
            }
        }
        _ => Err(GerberError::parse(
            line,
            "unexpected end of macro expression",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(s: &str, memory: &MacroMemory) -> f64 {
        parse_expr(s, 1).unwrap().eval(memory)
    }

    #[test]
    fn test_literals_and_precedence() {
        let mem = MacroMemory::new();
        assert!((eval("1.5", &mem) - 1.5).abs() < 1e-12);
        assert!((eval("1+2x3", &mem) - 7.0).abs() < 1e-12);
        assert!((eval("(1+2)X3", &mem) - 9.0).abs() < 1e-12);
        assert!((eval("10-4-3", &mem) - 3.0).abs() < 1e-12);
        assert!((eval("8/4/2", &mem) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unary_minus() {
        let mem = MacroMemory::from([(1, 2.0)]);
        assert!((eval("-$1", &mem) + 2.0).abs() < 1e-12);
        assert!((eval("3x-2", &mem) + 6.0).abs() < 1e-12);
        assert!((eval("--1", &mem) - 1.0).abs() < 1e-12);
        assert!((eval("-(1+1)", &mem) + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_variables() {
        let mem = MacroMemory::from([(1, 0.5), (2, 4.0)]);
        assert!((eval("$1x$2", &mem) - 2.0).abs() < 1e-12);
        assert!((eval("1.08239X$1", &mem) - 0.541195).abs() < 1e-12);
        // Unset variables read as zero
        assert!((eval("$9+1", &mem) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_divide_by_zero_is_zero() {
        let mem = MacroMemory::new();
        assert_eq!(eval("1/0", &mem), 0.0);
        assert_eq!(eval("1/$3", &mem), 0.0);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(parse_expr("", 1).unwrap(), Expr::Literal(0.0));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_expr("1+", 3), Err(GerberError::Parse { line: 3, .. })));
        assert!(parse_expr("(1+2", 1).is_err());
        assert!(parse_expr("1 2", 1).is_err());
        assert!(parse_expr("$", 1).is_err());
        assert!(parse_expr("2*3", 1).is_err());
    }

    #[test]
    fn test_display_minimal_parentheses() {
        let cases = [
            ("1+2x3", "1+2x3"),
            ("(1+2)x3", "(1+2)x3"),
            ("1-(2-3)", "1-(2-3)"),
            ("(1-2)-3", "1-2-3"),
            ("$1/($2x2)", "$1/($2x2)"),
            ("-($1+1)", "-($1+1)"),
            ("-0.5", "-0.5"),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_expr(input, 1).unwrap().to_string(), expected, "input {input}");
        }
    }

    #[test]
    fn test_display_reparses_to_same_value() {
        let mem = MacroMemory::from([(1, 3.0), (2, -1.25)]);
        for input in ["$1x(2-$2)/4", "-$2x-$1", "((1))", "0.1+$1/$2-7"] {
            let expr = parse_expr(input, 1).unwrap();
            let again = parse_expr(&expr.to_string(), 1).unwrap();
            assert!((expr.eval(&mem) - again.eval(&mem)).abs() < 1e-12, "input {input}");
        }
    }
}
