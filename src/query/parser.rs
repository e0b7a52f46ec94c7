//! Recursive-descent parser for search strings
//!
//! ```text
//! query   := and_expr EOF
//! and_expr:= or_expr*                      (juxtaposition or AND)
//! or_expr := unary ( OR unary )*
//! unary   := NOT unary | primary
//! primary := '(' and_expr ')' | word | "phrase" | field:value
//! ```
//!
//! `OR` binds tighter than the implicit AND, so `a b OR c` means
//! `a AND (b OR c)`.

use super::lexer::{Token, TokenKind};
use crate::error::{CrowdError, Result};

/// Deepest group or negation nesting a query may use
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFilter {
    TopicId(String),
    Reviewed(bool),
    Hidden(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Empty list matches everything
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Word(String),
    Phrase(String),
    Field(FieldFilter),
}

fn parse_bool(field: &str, value: &str, position: usize) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CrowdError::syntax(
            position,
            format!("field '{}' expects true or false, got '{}'", field, value),
        )),
    }
}

fn field_filter(name: &str, value: &str, position: usize) -> Result<FieldFilter> {
    match name {
        "topic_id" => Ok(FieldFilter::TopicId(value.to_string())),
        "reviewed" => parse_bool(name, value, position).map(FieldFilter::Reviewed),
        "hidden" => parse_bool(name, value, position).map(FieldFilter::Hidden),
        _ => Err(CrowdError::syntax(position, format!("unknown field '{}'", name))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    next: usize,
    /// Byte length of the input, reported for errors at end of input
    end: usize,
    /// Open groups and negations around the current token
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.next).map(|t| &t.kind)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.next).map(|t| t.position).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.next).cloned();
        if token.is_some() {
            self.next += 1;
        }
        token
    }

    fn enter(&mut self, position: usize) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CrowdError::syntax(position, "query nested too deeply"));
        }
        Ok(())
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut terms = vec![];
        loop {
            match self.peek() {
                None | Some(TokenKind::RParen) => break,
                Some(TokenKind::And) => {
                    let position = self.position();
                    self.advance();
                    if matches!(self.peek(), None | Some(TokenKind::RParen)) || terms.is_empty() {
                        return Err(CrowdError::syntax(position, "AND needs a term on both sides"));
                    }
                }
                Some(_) => terms.push(self.or_expr()?),
            }
        }
        Ok(match terms.len() {
            1 => terms.remove(0),
            _ => Expr::And(terms),
        })
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut alternatives = vec![self.unary()?];
        while matches!(self.peek(), Some(TokenKind::Or)) {
            self.advance();
            alternatives.push(self.unary()?);
        }
        Ok(match alternatives.len() {
            1 => alternatives.remove(0),
            _ => Expr::Or(alternatives),
        })
    }

    fn unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(TokenKind::Not)) {
            self.enter(self.position())?;
            self.advance();
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let position = self.position();
        let Some(token) = self.advance() else {
            return Err(CrowdError::syntax(position, "expected a term"));
        };

        match token.kind {
            TokenKind::Word(word) => Ok(Expr::Word(word)),
            TokenKind::Phrase(phrase) => Ok(Expr::Phrase(phrase)),
            TokenKind::Field { name, value } => Ok(Expr::Field(field_filter(&name, &value, position)?)),
            TokenKind::LParen => {
                if matches!(self.peek(), Some(TokenKind::RParen)) {
                    return Err(CrowdError::syntax(position, "empty group"));
                }
                self.enter(position)?;
                let inner = self.and_expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token { kind: TokenKind::RParen, .. }) => Ok(inner),
                    _ => Err(CrowdError::syntax(position, "unbalanced '('")),
                }
            }
            TokenKind::RParen => Err(CrowdError::syntax(position, "unbalanced ')'")),
            TokenKind::Or | TokenKind::And => {
                Err(CrowdError::syntax(position, "operator needs a term on both sides"))
            }
            TokenKind::Not => Err(CrowdError::syntax(position, "expected a term")),
        }
    }
}

/// Parse tokens into an expression; no tokens yields `Expr::And([])`
pub fn parse(tokens: Vec<Token>, input_len: usize) -> Result<Expr> {
    let mut parser = Parser {
        tokens,
        next: 0,
        end: input_len,
        depth: 0,
    };
    let expr = parser.and_expr()?;
    if parser.peek().is_some() {
        return Err(CrowdError::syntax(parser.position(), "unbalanced ')'"));
    }
    Ok(expr)
}
