//! Closed-form arithmetic over model parameters, used for declared R0 expressions.
//!
//! Supports `+ - * / ^`, parentheses, unary minus, numeric literals, parameter
//! names, and the functions `sqrt`, `exp` and `ln`. `^` is right-associative
//! and binds tighter than unary minus on its left (`-a^2 == -(a^2)`).

use std::collections::BTreeMap;
use std::fmt;

use logos::Logos;

/// Deepest nesting of parentheses, calls, signs and exponents accepted.
pub const MAX_DEPTH: usize = 256;

/// Errors produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected input `{snippet}` at offset {offset}")]
    Lex { offset: usize, snippet: String },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[regex(r"([0-9]+\.?[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Num(f64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("^")]
    Caret,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{n}"),
            Token::Ident(s) => f.write_str(s),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Caret => f.write_str("^"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut lexer = Token::lexer(src);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(token),
            Err(_) => {
                let span = lexer.span();
                return Err(ExprError::Lex {
                    offset: span.start,
                    snippet: src[span].to_string(),
                });
            }
        }
    }
    Ok(tokens)
}

/// Recursive-descent evaluator over a token slice.
///
/// Every recursion cycle passes through [`Evaluator::unary`], which is where
/// nesting depth is counted.
struct Evaluator<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    vars: &'a BTreeMap<String, f64>,
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut acc = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    acc += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    acc -= self.term()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ExprError> {
        let mut acc = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    acc *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    acc /= self.unary()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.unary().map(|v| -v)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        };
        self.depth -= 1;
        value
    }

    fn power(&mut self) -> Result<f64, ExprError> {
        let base = self.atom()?;
        if let Some(Token::Caret) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let arg = self.expr()?;
                    self.expect(Token::RParen)?;
                    return match name.as_str() {
                        "sqrt" => Ok(arg.sqrt()),
                        "exp" => Ok(arg.exp()),
                        "ln" => Ok(arg.ln()),
                        _ => Err(ExprError::UnknownFunction(name)),
                    };
                }
                self.vars
                    .get(&name)
                    .copied()
                    .ok_or(ExprError::UnknownParameter(name))
            }
            Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

/// Evaluate `src` with identifiers bound to `vars`.
pub fn evaluate(src: &str, vars: &BTreeMap<String, f64>) -> Result<f64, ExprError> {
    let tokens = tokenize(src)?;
    let mut ev = Evaluator {
        tokens: &tokens,
        pos: 0,
        depth: 0,
        vars,
    };
    let value = ev.expr()?;
    match ev.peek() {
        None => Ok(value),
        Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
    }
}
