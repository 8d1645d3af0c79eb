use crate::token::{Position, Token, TokenKind};
use crate::LexerError;

/// Cursor over a lexed token sequence with lookahead.
///
/// The sequence always ends with an `End` token, which is never consumed:
/// peeking past the end keeps returning it.
#[derive(Debug, Clone)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !tokens.last().is_some_and(|t| t.kind == TokenKind::End) {
            let end = tokens
                .last()
                .map(|t| t.position.advance(&t.text))
                .unwrap_or_else(|| Position::new(0, 1, 1));
            tokens.push(Token::new(TokenKind::End, "", end));
        }
        Self { tokens, pos: 0 }
    }

    /// Token `n` places ahead of the cursor.
    pub fn peek(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    /// Whether the current token has one of the given kinds.
    pub fn is(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.peek(0).kind)
    }

    /// Consume the current token if it has one of the given kinds.
    pub fn try_consume(&mut self, kinds: &[TokenKind]) -> Option<Token> {
        if self.is(kinds) {
            Some(self.next_token())
        } else {
            None
        }
    }

    /// Consume the current token, which must have one of the given kinds.
    pub fn consume(&mut self, kinds: &[TokenKind]) -> Result<Token, LexerError> {
        if let Some(token) = self.try_consume(kinds) {
            return Ok(token);
        }
        let token = self.peek(0);
        let expected: Vec<&str> = kinds.iter().map(|k| k.describe()).collect();
        let found = if token.kind == TokenKind::End {
            "end".to_string()
        } else {
            format!("'{}'", token.text)
        };
        Err(LexerError {
            message: format!("Unexpected {found}, expecting {}", expected.join(" or ")),
            line: token.position.line,
            column: token.position.column,
        })
    }

    /// Consume the current token whatever its kind.
    pub fn next_token(&mut self) -> Token {
        let token = self.peek(0).clone();
        if token.kind != TokenKind::End {
            self.pos += 1;
        }
        token
    }

    /// Position of the current token.
    pub fn position(&self) -> Position {
        self.peek(0).position
    }

    pub fn is_at_end(&self) -> bool {
        self.peek(0).kind == TokenKind::End
    }
}
