//! Tokenizer for search strings

use crate::error::{CrowdError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    Or,
    /// Explicit `AND`; same as juxtaposition
    And,
    /// `NOT` or a leading `-`
    Not,
    Word(String),
    Phrase(String),
    Field { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the search string
    pub position: usize,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || c == '(' || c == ')' || c == '"'
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Body of a quoted string; the opening quote is already consumed
    fn quoted(&mut self, start: usize) -> Result<String> {
        let rest = &self.input[self.pos..];
        match rest.find('"') {
            Some(end) => {
                let body = rest[..end].to_string();
                self.pos += end + 1;
                Ok(body)
            }
            None => Err(CrowdError::syntax(start, "unterminated quote")),
        }
    }

    fn bare(&mut self) -> &'a str {
        let input = self.input;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.bump();
        }
        &input[start..self.pos]
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        let position = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let kind = match c {
            '(' => {
                self.bump();
                TokenKind::LParen
            }
            ')' => {
                self.bump();
                TokenKind::RParen
            }
            '"' => {
                self.bump();
                TokenKind::Phrase(self.quoted(position)?)
            }
            '-' if self.input[self.pos + 1..]
                .chars()
                .next()
                .is_some_and(|next| !next.is_whitespace() && next != ')') =>
            {
                self.bump();
                TokenKind::Not
            }
            _ => {
                let word = self.bare();
                match word {
                    "OR" => TokenKind::Or,
                    "AND" => TokenKind::And,
                    "NOT" => TokenKind::Not,
                    _ => self.field_or_word(word, position)?,
                }
            }
        };

        Ok(Some(Token { kind, position }))
    }

    fn field_or_word(&mut self, word: &'a str, position: usize) -> Result<TokenKind> {
        let Some((name, value)) = word.split_once(':') else {
            return Ok(TokenKind::Word(word.to_string()));
        };
        if !is_field_name(name) {
            return Ok(TokenKind::Word(word.to_string()));
        }

        let value = if value.is_empty() && self.peek() == Some('"') {
            let quote_at = self.pos;
            self.bump();
            self.quoted(quote_at)?
        } else {
            value.to_string()
        };
        if value.is_empty() {
            return Err(CrowdError::syntax(position, format!("missing value for field '{}'", name)));
        }

        Ok(TokenKind::Field {
            name: name.to_string(),
            value,
        })
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { input, pos: 0 };
    let mut tokens = vec![];
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_words_phrases_fields() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#"(beds OR water) topic_id:water "open beds" -closed"#),
            vec![
                LParen,
                Word("beds".into()),
                Or,
                Word("water".into()),
                RParen,
                Field { name: "topic_id".into(), value: "water".into() },
                Phrase("open beds".into()),
                Not,
                Word("closed".into()),
            ]
        );
    }

    #[test]
    fn test_quoted_field_value() {
        assert_eq!(
            kinds(r#"topic_id:"gas leak""#),
            vec![TokenKind::Field { name: "topic_id".into(), value: "gas leak".into() }]
        );
    }

    #[test]
    fn test_non_identifier_prefix_is_a_word() {
        assert_eq!(kinds("10:30"), vec![TokenKind::Word("10:30".into())]);
        assert_eq!(kinds("a - b"), vec![
            TokenKind::Word("a".into()),
            TokenKind::Word("-".into()),
            TokenKind::Word("b".into()),
        ]);
    }

    #[test]
    fn test_errors_carry_position() {
        let err = tokenize(r#"beds "available"#).unwrap_err();
        assert!(matches!(err, CrowdError::QuerySyntax { position: 5, .. }));

        let err = tokenize("water topic_id:").unwrap_err();
        assert!(matches!(err, CrowdError::QuerySyntax { position: 6, .. }));
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("  beds OR").unwrap();
        assert_eq!(tokens[0].position, 2);
        assert_eq!(tokens[1].position, 7);
    }
}
