//! Restricted arithmetic evaluator.
//!
//! Accepts only digits, `+ - * / . ( )` and whitespace. Anything else is
//! rejected while tokenizing, before any evaluation happens.

use thiserror::Error;

const MAX_DEPTH: usize = 64;
const MAX_LENGTH: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArithmeticError {
    #[error("expression is empty")]
    Empty,
    #[error("expression longer than {MAX_LENGTH} characters")]
    TooLong,
    #[error("disallowed character '{0}' at position {1}")]
    DisallowedCharacter(char, usize),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected '{0}' at position {1}")]
    UnexpectedToken(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expression nested too deeply")]
    TooDeep,
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn eval(&self) -> Result<f64, ArithmeticError> {
        Ok(match self {
            Expr::Number(n) => *n,
            Expr::Neg(inner) => -inner.eval()?,
            Expr::Add(a, b) => a.eval()? + b.eval()?,
            Expr::Sub(a, b) => a.eval()? - b.eval()?,
            Expr::Mul(a, b) => a.eval()? * b.eval()?,
            Expr::Div(a, b) => {
                let divisor = b.eval()?;
                if divisor == 0.0 {
                    return Err(ArithmeticError::DivisionByZero);
                }
                a.eval()? / divisor
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ArithmeticError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' | '-' | '*' | '/' | '(' | ')' => {
                tokens.push((Token::Op(c), i));
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ArithmeticError::InvalidNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
            }
            other => return Err(ArithmeticError::DisallowedCharacter(other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<(Token, usize)> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Expr, ArithmeticError> {
        let mut lhs = self.term()?;
        while let Some((Token::Op(op @ ('+' | '-')), _)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = if op == '+' {
                Expr::Add(Box::new(lhs), Box::new(rhs))
            } else {
                Expr::Sub(Box::new(lhs), Box::new(rhs))
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ArithmeticError> {
        let mut lhs = self.factor()?;
        while let Some((Token::Op(op @ ('*' | '/')), _)) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = if op == '*' {
                Expr::Mul(Box::new(lhs), Box::new(rhs))
            } else {
                Expr::Div(Box::new(lhs), Box::new(rhs))
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ArithmeticError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ArithmeticError::TooDeep);
        }

        let result = match self.peek() {
            None => Err(ArithmeticError::UnexpectedEnd),
            Some((Token::Number(n), _)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some((Token::Op('-'), _)) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.factor()?)))
            }
            Some((Token::Op('+'), _)) => {
                self.pos += 1;
                self.factor()
            }
            Some((Token::Op('('), _)) => {
                self.pos += 1;
                let inner = self.expr()?;
                match self.peek() {
                    Some((Token::Op(')'), _)) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    Some((Token::Op(c), at)) => Err(ArithmeticError::UnexpectedToken(c, at)),
                    Some((Token::Number(_), at)) => Err(ArithmeticError::UnexpectedToken('0', at)),
                    None => Err(ArithmeticError::UnexpectedEnd),
                }
            }
            Some((Token::Op(c), at)) => Err(ArithmeticError::UnexpectedToken(c, at)),
        };

        self.depth -= 1;
        result
    }
}

/// Parse `input` into an expression tree without evaluating it.
pub fn parse(input: &str) -> Result<Expr, ArithmeticError> {
    if input.len() > MAX_LENGTH {
        return Err(ArithmeticError::TooLong);
    }
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ArithmeticError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;

    match parser.peek() {
        None => Ok(expr),
        Some((Token::Op(c), at)) => Err(ArithmeticError::UnexpectedToken(c, at)),
        Some((Token::Number(_), at)) => Err(ArithmeticError::UnexpectedToken('0', at)),
    }
}

pub fn evaluate(input: &str) -> Result<f64, ArithmeticError> {
    parse(input)?.eval()
}

/// Render a result without a trailing `.0` for whole numbers.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
