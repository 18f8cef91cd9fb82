//! Arithmetic expressions over an execution context.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := number | string | 'context' '[' key ']' | '(' expr ')'
//! key     := identifier | string | ':' identifier
//! ```

use graphos_core::action::ArgMap;
use serde_json::Value;

/// Longest accepted source, in bytes.
pub const MAX_SOURCE_LEN: usize = 4096;
/// Deepest accepted nesting of parentheses and unary minus.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Atom(String),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Context(String),
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    fn from_json(key: &str, value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Int(i)),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| format!("context[{key}] is not a representable number")),
            },
            Value::String(s) => Ok(Self::Str(s.clone())),
            other => Err(format!(
                "context[{key}] must be a number or string, got {}",
                json_type(other)
            )),
        }
    }

    fn into_json(self) -> Result<Value, String> {
        match self {
            Self::Int(i) => Ok(Value::from(i)),
            Self::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| format!("result {f} is not a finite number")),
            Self::Str(s) => Ok(Value::String(s)),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '"' => {
                let (literal, next) = read_string(&chars, i + 1)?;
                tokens.push(Token::Str(literal));
                i = next;
            }
            ':' => {
                let (name, next) = read_identifier(&chars, i + 1);
                if name.is_empty() {
                    return Err(format!("expected atom name after ':' at offset {i}"));
                }
                tokens.push(Token::Atom(name));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (token, next) = read_number(&chars, i)?;
                tokens.push(token);
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (name, next) = read_identifier(&chars, i);
                tokens.push(Token::Ident(name));
                i = next;
            }
            other => return Err(format!("unexpected character '{other}' at offset {i}")),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], mut i: usize) -> Result<(String, usize), String> {
    let mut literal = String::new();
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((literal, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).ok_or("unterminated escape in string")?;
                literal.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

fn read_identifier(chars: &[char], mut i: usize) -> (String, usize) {
    let mut name = String::new();
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        name.push(chars[i]);
        i += 1;
    }
    (name, i)
}

fn read_number(chars: &[char], mut i: usize) -> Result<(Token, usize), String> {
    let mut digits = String::new();
    let mut is_float = false;
    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() => digits.push(c),
            '_' => {}
            '.' if !is_float && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                is_float = true;
                digits.push('.');
            }
            _ => break,
        }
        i += 1;
    }
    let token = if is_float {
        Token::Float(
            digits
                .parse()
                .map_err(|err| format!("invalid float literal {digits}: {err}"))?,
        )
    } else {
        Token::Int(
            digits
                .parse()
                .map_err(|err| format!("invalid integer literal {digits}: {err}"))?,
        )
    };
    Ok((token, i))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_NESTING {
            return Err("expression nesting too deep".to_string());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?}, found {token:?}")),
            None => Err(format!("expected {expected:?}, found end of input")),
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Expr::Int(i)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.nested(Self::expr)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "context" => {
                self.expect(Token::LBracket)?;
                let key = match self.next() {
                    Some(Token::Ident(key) | Token::Str(key) | Token::Atom(key)) => key,
                    Some(token) => return Err(format!("invalid context key {token:?}")),
                    None => return Err("expected context key, found end of input".to_string()),
                };
                self.expect(Token::RBracket)?;
                Ok(Expr::Context(key))
            }
            Some(Token::Ident(name)) => Err(format!("unknown identifier '{name}'")),
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of input".to_string()),
        }
    }
}

/// Parse `source` into an expression tree.
pub fn parse(source: &str) -> Result<Expr, String> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(format!(
            "expression is {} bytes, limit is {MAX_SOURCE_LEN}",
            source.len()
        ));
    }
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err("expression is empty".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected trailing token {token:?}"));
    }
    Ok(expr)
}

impl Expr {
    /// Evaluate against `context`. Integer arithmetic stays integer.
    pub fn eval(&self, context: &ArgMap) -> Result<Value, String> {
        self.eval_scalar(context)?.into_json()
    }

    fn eval_scalar(&self, context: &ArgMap) -> Result<Scalar, String> {
        match self {
            Self::Int(i) => Ok(Scalar::Int(*i)),
            Self::Float(f) => Ok(Scalar::Float(*f)),
            Self::Str(s) => Ok(Scalar::Str(s.clone())),
            Self::Context(key) => {
                let value = context
                    .get(key)
                    .ok_or_else(|| format!("context has no key '{key}'"))?;
                Scalar::from_json(key, value)
            }
            Self::Neg(inner) => match inner.eval_scalar(context)? {
                Scalar::Int(i) => i
                    .checked_neg()
                    .map(Scalar::Int)
                    .ok_or_else(|| "integer overflow".to_string()),
                Scalar::Float(f) => Ok(Scalar::Float(-f)),
                Scalar::Str(_) => Err("cannot negate a string".to_string()),
            },
            Self::Binary(lhs, op, rhs) => {
                apply(*op, lhs.eval_scalar(context)?, rhs.eval_scalar(context)?)
            }
        }
    }
}

fn apply(op: BinaryOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar, String> {
    match (lhs, rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err("division by zero".to_string());
                    }
                    a.checked_div(b)
                }
            };
            result
                .map(Scalar::Int)
                .ok_or_else(|| "integer overflow".to_string())
        }
        (Scalar::Str(a), Scalar::Str(b)) if op == BinaryOp::Add => Ok(Scalar::Str(a + &b)),
        (a @ Scalar::Str(_), b) | (a, b @ Scalar::Str(_)) => Err(format!(
            "operator {op:?} is not defined for {} and {}",
            a.type_name(),
            b.type_name()
        )),
        (a, b) => {
            let (x, y) = (as_float(&a), as_float(&b));
            match op {
                BinaryOp::Add => Ok(Scalar::Float(x + y)),
                BinaryOp::Sub => Ok(Scalar::Float(x - y)),
                BinaryOp::Mul => Ok(Scalar::Float(x * y)),
                BinaryOp::Div if y == 0.0 => Err("division by zero".to_string()),
                BinaryOp::Div => Ok(Scalar::Float(x / y)),
            }
        }
    }
}

fn as_float(scalar: &Scalar) -> f64 {
    match scalar {
        Scalar::Int(i) => *i as f64,
        Scalar::Float(f) => *f,
        Scalar::Str(_) => f64::NAN,
    }
}
