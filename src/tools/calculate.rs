//! Arithmetic calculator tool.
//!
//! Input is sanitized down to digits, whitespace, `+ - * / ( ) .` and then
//! evaluated by a small recursive-descent parser. Nothing is ever handed
//! to a general-purpose evaluator.

use async_trait::async_trait;
use thiserror::Error;

use super::{ParamKind, ParamSpec, Tool, ToolArgs};

/// Longest sanitized expression the evaluator accepts.
const MAX_EXPRESSION_LEN: usize = 1000;

/// Deepest nesting of parentheses and unary signs.
const MAX_DEPTH: usize = 64;

/// Evaluate an arithmetic expression.
pub struct Calculate;

#[async_trait]
impl Tool for Calculate {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Perform arithmetic calculations. Supports numbers, + - * /, and parentheses with standard operator precedence."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "expression",
            ParamKind::String,
            "The mathematical expression to evaluate",
        )]
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<String> {
        let expression = args.string("expression")?;
        let sanitized = sanitize(expression);
        if sanitized != expression {
            tracing::debug!(
                input = %expression,
                sanitized = %sanitized,
                "Stripped non-arithmetic characters"
            );
        }

        let value = evaluate(&sanitized)?;
        Ok(format_number(value))
    }
}

/// Errors from evaluating a sanitized expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("calculation error: empty expression")]
    Empty,

    #[error("calculation error: expression longer than {} characters", MAX_EXPRESSION_LEN)]
    TooLong,

    #[error("calculation error: nesting deeper than {} levels", MAX_DEPTH)]
    TooDeep,

    #[error("calculation error: invalid number '{0}'")]
    InvalidNumber(String),

    #[error("calculation error: unexpected '{0}'")]
    UnexpectedToken(String),

    #[error("calculation error: unexpected end of expression")]
    UnexpectedEnd,

    #[error("calculation error: division by zero")]
    DivisionByZero,

    #[error("calculation error: result is not a finite number")]
    NotFinite,
}

/// Keep only characters that can appear in an arithmetic expression.
pub fn sanitize(expression: &str) -> String {
    expression
        .chars()
        .filter(|c| c.is_ascii_digit() || c.is_whitespace() || "+-*/().".contains(*c))
        .collect()
}

/// Evaluate a sanitized expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(CalcError::TooLong);
    }

    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(CalcError::UnexpectedToken(token.describe()));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

/// Integral values print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl Token {
    fn describe(self) -> String {
        match self {
            Token::Number(n) => format_number(n),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Star => "*".to_string(),
            Token::Slash => "/".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let mut end = start;
            while let Some(&(idx, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    end = idx + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let literal = &input[start..end];
            let value: f64 = literal
                .parse()
                .map_err(|_| CalcError::InvalidNumber(literal.to_string()))?;
            tokens.push(Token::Number(value));
            continue;
        }

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(CalcError::UnexpectedToken(other.to_string())),
        };
        tokens.push(token);
        chars.next();
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.next();
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.next();
            let rhs = self.unary()?;
            value = if op == Token::Star {
                value * rhs
            } else {
                if rhs == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                value / rhs
            };
        }
        Ok(value)
    }

    // unary := ('+' | '-') unary | primary
    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Plus) | Some(Token::Minus) => {
                let negate = self.next() == Some(Token::Minus);
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(if negate { -value } else { value })
            }
            _ => self.primary(),
        }
    }

    // primary := number | '(' expr ')'
    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    Some(other) => Err(CalcError::UnexpectedToken(other.describe())),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(other) => Err(CalcError::UnexpectedToken(other.describe())),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}
