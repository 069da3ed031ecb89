//! Placeholder expression evaluation
//!
//! The expression language inside `{{ ... }}` placeholders: integer and
//! quoted string literals, variable references, `+ - * /` with string
//! concatenation via `+`, parentheses, and the identifier generators
//! `UUID(...)` and `SHORT_UUID(...)`. Evaluation is strict: unknown
//! variables and type mismatches are errors, not empty strings.

use indexmap::IndexMap;

use super::RenderError;
use super::ids::IdGen;

// ============================================================================
// Values
// ============================================================================

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// String.
    Str(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn expr_error(message: impl Into<String>) -> RenderError {
    RenderError::Expr(message.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>, RenderError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => literal.push(ch),
                        None => return Err(expr_error("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '0'..='9' => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = digits
                    .parse()
                    .map_err(|_| expr_error(format!("integer literal '{digits}' out of range")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&i) = chars.peek() {
                    if i.is_ascii_alphanumeric() || i == '_' {
                        ident.push(i);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(expr_error(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser / Evaluator
// ============================================================================

struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    variables: &'a IndexMap<String, serde_json::Value>,
    ids: &'a mut IdGen,
}

/// Evaluates one placeholder expression.
///
/// # Errors
///
/// Returns [`RenderError::Expr`] on syntax errors, unknown variables and
/// type mismatches, and [`RenderError::IdCollision`] when the id
/// generator exhausts its salted retries.
pub fn eval(
    input: &str,
    variables: &IndexMap<String, serde_json::Value>,
    ids: &mut IdGen,
) -> Result<Value, RenderError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(expr_error("empty expression"));
    }
    let mut evaluator = Evaluator {
        tokens,
        pos: 0,
        variables,
        ids,
    };
    let value = evaluator.expr()?;
    if evaluator.pos != evaluator.tokens.len() {
        return Err(expr_error(format!("trailing input in expression '{input}'")));
    }
    Ok(value)
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Value, RenderError> {
        let mut left = self.term()?;
        loop {
            let is_plus = match self.peek() {
                Some(Token::Plus) => true,
                Some(Token::Minus) => false,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = if is_plus {
                add(left, right)
            } else {
                int_op(left, right, "-", i64::checked_sub)?
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Value, RenderError> {
        let mut left = self.factor()?;
        loop {
            let is_mul = match self.peek() {
                Some(Token::Star) => true,
                Some(Token::Slash) => false,
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = if is_mul {
                int_op(left, right, "*", i64::checked_mul)?
            } else {
                int_op(left, right, "/", i64::checked_div)?
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Value, RenderError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Value::Int(n)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Minus) => match self.factor()? {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Str(_) => Err(expr_error("unary '-' applied to a string")),
            },
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(expr_error("missing closing parenthesis")),
                }
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let argument = self.expr()?;
                    match self.next() {
                        Some(Token::RParen) => {}
                        _ => return Err(expr_error("missing closing parenthesis")),
                    }
                    self.call(&name, argument)
                } else {
                    self.variable(&name)
                }
            }
            _ => Err(expr_error("expected a value")),
        }
    }

    fn call(&mut self, name: &str, argument: Value) -> Result<Value, RenderError> {
        let label = argument.to_string();
        match name {
            "UUID" => Ok(Value::Str(self.ids.full(&label)?)),
            "SHORT_UUID" => Ok(Value::Str(self.ids.short(&label)?)),
            other => Err(expr_error(format!("unknown generator '{other}'"))),
        }
    }

    fn variable(&self, name: &str) -> Result<Value, RenderError> {
        let value = self
            .variables
            .get(name)
            .ok_or_else(|| expr_error(format!("unknown variable '{name}'")))?;
        match value {
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Ok(Value::Str(n.to_string())),
                |i| Ok(Value::Int(i)),
            ),
            serde_json::Value::Bool(b) => Ok(Value::Str(b.to_string())),
            serde_json::Value::Null => {
                Err(expr_error(format!("variable '{name}' has no value")))
            }
            _ => Err(expr_error(format!("variable '{name}' is not a scalar"))),
        }
    }
}

fn add(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
        (a, b) => Value::Str(format!("{a}{b}")),
    }
}

fn int_op(
    left: Value,
    right: Value,
    symbol: &str,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<Value, RenderError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => op(a, b)
            .map(Value::Int)
            .ok_or_else(|| expr_error(format!("arithmetic overflow in '{a} {symbol} {b}'"))),
        _ => Err(expr_error(format!("'{symbol}' requires integer operands"))),
    }
}

// ============================================================================
// Tests
// ============================================================================
