//! Lexer for tag arguments.
//!
//! Tokenizes the expression language used inside template tags. Tokens keep
//! their exact source text and absolute source position, so later rewrite
//! passes can splice, insert and re-kind tokens without losing track of where
//! an error should point.
//!
//! # Examples
//!
//! ```
//! use mortar_lexer::Position;
//! use mortar_parser::expr_lexer::{ExprKind, ExprLexer};
//!
//! let tokens = ExprLexer::tokenize("$count + 1", Position::new(0, 1, 1)).unwrap();
//! assert_eq!(tokens[0].kind, ExprKind::Variable);
//! assert_eq!(tokens[1].kind, ExprKind::Plus);
//! assert_eq!(tokens[2].kind, ExprKind::Integer);
//! ```

use mortar_lexer::Position;

use crate::CompileError;

/// A token produced by the expression lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprToken {
    pub kind: ExprKind,
    pub text: String,
    pub position: Position,
}

impl ExprToken {
    pub fn new(kind: ExprKind, text: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    /// Identifier with the given text, compared case-insensitively.
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == ExprKind::Identifier && self.text.eq_ignore_ascii_case(word)
    }
}

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    // Operands
    Variable,
    Identifier,
    Integer,
    Float,
    String,
    Cast,

    // Always rejected, kept so the deny pass can point at them
    Comment,
    Backtick,
    Dollar,

    // Member access
    Arrow,
    NullsafeArrow,
    DoubleColon,
    OptionalBracket,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Punctuation
    Comma,
    Semicolon,
    Colon,
    Question,
    DoubleArrow,
    Ellipsis,
    Pipe,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    Dot,
    PlusPlus,
    MinusMinus,
    Not,
    Tilde,
    At,
    Amp,
    Caret,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Spaceship,
    AndAnd,
    OrOr,
    Coalesce,
    Assign,
    CompoundAssign,

    // Produced by rewrite passes
    Intrinsic,
    MediatedArrow,
    MediatedNullsafeArrow,
    MediatedDoubleColon,
    MediatedCallOpen,
}

impl ExprKind {
    pub fn is_opening(self) -> bool {
        matches!(
            self,
            ExprKind::LParen
                | ExprKind::LBracket
                | ExprKind::LBrace
                | ExprKind::OptionalBracket
                | ExprKind::MediatedCallOpen
        )
    }

    pub fn is_closing(self) -> bool {
        matches!(self, ExprKind::RParen | ExprKind::RBracket | ExprKind::RBrace)
    }

    /// `->`, `?->`, `::` and their mediated forms.
    pub fn is_member_access(self) -> bool {
        matches!(
            self,
            ExprKind::Arrow
                | ExprKind::NullsafeArrow
                | ExprKind::DoubleColon
                | ExprKind::MediatedArrow
                | ExprKind::MediatedNullsafeArrow
                | ExprKind::MediatedDoubleColon
        )
    }
}

/// Operators and punctuation, longest first.
const SYMBOLS: &[(&str, ExprKind)] = &[
    ("<=>", ExprKind::Spaceship),
    ("===", ExprKind::Identical),
    ("!==", ExprKind::NotIdentical),
    ("**=", ExprKind::CompoundAssign),
    ("??=", ExprKind::CompoundAssign),
    ("<<=", ExprKind::CompoundAssign),
    (">>=", ExprKind::CompoundAssign),
    ("...", ExprKind::Ellipsis),
    ("?->", ExprKind::NullsafeArrow),
    ("->", ExprKind::Arrow),
    ("::", ExprKind::DoubleColon),
    ("=>", ExprKind::DoubleArrow),
    ("**", ExprKind::Pow),
    ("++", ExprKind::PlusPlus),
    ("--", ExprKind::MinusMinus),
    ("<<", ExprKind::Shl),
    (">>", ExprKind::Shr),
    ("<=", ExprKind::Le),
    (">=", ExprKind::Ge),
    ("==", ExprKind::Equal),
    ("!=", ExprKind::NotEqual),
    ("<>", ExprKind::NotEqual),
    ("&&", ExprKind::AndAnd),
    ("||", ExprKind::OrOr),
    ("??", ExprKind::Coalesce),
    ("+=", ExprKind::CompoundAssign),
    ("-=", ExprKind::CompoundAssign),
    ("*=", ExprKind::CompoundAssign),
    ("/=", ExprKind::CompoundAssign),
    ("%=", ExprKind::CompoundAssign),
    (".=", ExprKind::CompoundAssign),
    ("&=", ExprKind::CompoundAssign),
    ("|=", ExprKind::CompoundAssign),
    ("^=", ExprKind::CompoundAssign),
    ("(", ExprKind::LParen),
    (")", ExprKind::RParen),
    ("[", ExprKind::LBracket),
    ("]", ExprKind::RBracket),
    ("{", ExprKind::LBrace),
    ("}", ExprKind::RBrace),
    (",", ExprKind::Comma),
    (";", ExprKind::Semicolon),
    (":", ExprKind::Colon),
    ("?", ExprKind::Question),
    ("|", ExprKind::Pipe),
    ("+", ExprKind::Plus),
    ("-", ExprKind::Minus),
    ("*", ExprKind::Star),
    ("/", ExprKind::Slash),
    ("%", ExprKind::Percent),
    (".", ExprKind::Dot),
    ("!", ExprKind::Not),
    ("~", ExprKind::Tilde),
    ("@", ExprKind::At),
    ("&", ExprKind::Amp),
    ("^", ExprKind::Caret),
    ("<", ExprKind::Lt),
    (">", ExprKind::Gt),
    ("=", ExprKind::Assign),
];

const CAST_TYPES: &[&str] = &[
    "int", "integer", "bool", "boolean", "float", "double", "real", "string", "array",
    "object", "binary",
];

/// Expression lexer.
///
/// Operates on the argument text of a single tag, e.g. the `$a + 1` of `{=$a + 1}`.
pub struct ExprLexer {
    chars: Vec<char>,
    pos: usize,
    position: Position,
}

impl ExprLexer {
    /// Create a new expression lexer; `start` is the source position of the first character.
    pub fn new(source: &str, start: Position) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            position: start,
        }
    }

    /// Tokenize the entire source into a vector of tokens. Whitespace is dropped.
    pub fn tokenize(source: &str, start: Position) -> Result<Vec<ExprToken>, CompileError> {
        let mut lexer = ExprLexer::new(source, start);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Read the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<ExprToken>, CompileError> {
        self.skip_whitespace();
        if self.is_at_end() {
            return Ok(None);
        }

        let start = self.position;
        let ch = self.current();

        let token = match ch {
            '0'..='9' => self.read_number(start)?,
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number(start)?,
            '\'' | '"' => self.read_string(start)?,
            '`' => self.read_backtick(start)?,
            '$' => self.read_variable(start),
            '/' if self.peek() == Some('*') => self.read_comment(start)?,
            '(' if self.cast_length().is_some() => {
                let len = self.cast_length().unwrap_or(1);
                let text = self.take(len);
                let normalized: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                ExprToken::new(ExprKind::Cast, normalized.to_ascii_lowercase(), start)
            }
            '?' if self.peek() == Some('[') && !self.preceded_by_whitespace() => {
                let text = self.take(2);
                ExprToken::new(ExprKind::OptionalBracket, text, start)
            }
            c if is_name_start(c) || c == '\\' => self.read_identifier(start)?,
            _ => match SYMBOLS.iter().find(|(s, _)| self.starts_with(s)) {
                Some((symbol, kind)) => {
                    let text = self.take(symbol.chars().count());
                    ExprToken::new(*kind, text, start)
                }
                None => {
                    return Err(CompileError::syntax(
                        format!("Unexpected character '{ch}'"),
                        start,
                    ))
                }
            },
        };
        Ok(Some(token))
    }

    // --- Private helpers ---

    fn read_number(&mut self, start: Position) -> Result<ExprToken, CompileError> {
        let mut text = String::new();
        let mut float = false;

        if self.current() == '0' && matches!(self.peek(), Some('x' | 'X' | 'b' | 'B' | 'o' | 'O')) {
            text.push_str(&self.take(2));
            while !self.is_at_end() && (self.current().is_ascii_hexdigit() || self.current() == '_') {
                text.push(self.advance());
            }
            return Ok(ExprToken::new(ExprKind::Integer, text, start));
        }

        while !self.is_at_end() {
            let c = self.current();
            if c.is_ascii_digit() || c == '_' {
                text.push(self.advance());
            } else if c == '.' && !float && self.peek().is_some_and(|n| n.is_ascii_digit()) {
                float = true;
                text.push(self.advance());
            } else if matches!(c, 'e' | 'E')
                && (self.peek().is_some_and(|n| n.is_ascii_digit())
                    || (matches!(self.peek(), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|n| n.is_ascii_digit())))
            {
                float = true;
                text.push(self.advance());
                text.push(self.advance());
            } else {
                break;
            }
        }

        if !self.is_at_end() && is_name_start(self.current()) {
            return Err(CompileError::syntax(
                format!("Invalid number '{text}{}'", self.current()),
                start,
            ));
        }

        let kind = if float {
            ExprKind::Float
        } else {
            ExprKind::Integer
        };
        Ok(ExprToken::new(kind, text, start))
    }

    fn read_string(&mut self, start: Position) -> Result<ExprToken, CompileError> {
        let quote = self.current();
        let mut text = String::new();
        text.push(self.advance()); // opening quote

        while !self.is_at_end() && self.current() != quote {
            if self.current() == '\\' {
                text.push(self.advance());
                if self.is_at_end() {
                    break;
                }
            } else if quote == '"' && self.current() == '$' {
                return Err(CompileError::syntax(
                    "Variables in double-quoted strings are not supported, use concatenation",
                    self.position,
                ));
            }
            text.push(self.advance());
        }

        if self.is_at_end() {
            return Err(CompileError::syntax("Unterminated string", start));
        }

        text.push(self.advance()); // closing quote
        Ok(ExprToken::new(ExprKind::String, text, start))
    }

    fn read_backtick(&mut self, start: Position) -> Result<ExprToken, CompileError> {
        let mut text = String::new();
        text.push(self.advance());
        while !self.is_at_end() && self.current() != '`' {
            text.push(self.advance());
        }
        if self.is_at_end() {
            return Err(CompileError::syntax("Unterminated backtick string", start));
        }
        text.push(self.advance());
        Ok(ExprToken::new(ExprKind::Backtick, text, start))
    }

    fn read_variable(&mut self, start: Position) -> ExprToken {
        if !self.peek().is_some_and(is_name_start) {
            // `$$name` and `${expr}`
            let text = self.take(1);
            return ExprToken::new(ExprKind::Dollar, text, start);
        }
        let mut text = String::new();
        text.push(self.advance());
        while !self.is_at_end() && is_name_char(self.current()) {
            text.push(self.advance());
        }
        ExprToken::new(ExprKind::Variable, text, start)
    }

    fn read_comment(&mut self, start: Position) -> Result<ExprToken, CompileError> {
        let mut text = self.take(2);
        while !self.is_at_end() && !self.starts_with("*/") {
            text.push(self.advance());
        }
        if self.is_at_end() {
            return Err(CompileError::syntax("Unterminated comment", start));
        }
        text.push_str(&self.take(2));
        Ok(ExprToken::new(ExprKind::Comment, text, start))
    }

    /// Names, including namespaced ones: `strlen`, `\App\Model`.
    fn read_identifier(&mut self, start: Position) -> Result<ExprToken, CompileError> {
        let mut text = String::new();
        loop {
            if self.current() == '\\' {
                text.push(self.advance());
                if self.is_at_end() || !is_name_start(self.current()) {
                    return Err(CompileError::syntax("Invalid namespaced name", start));
                }
            }
            while !self.is_at_end() && is_name_char(self.current()) {
                text.push(self.advance());
            }
            if self.is_at_end() || self.current() != '\\' {
                break;
            }
        }
        Ok(ExprToken::new(ExprKind::Identifier, text, start))
    }

    /// Length of a cast such as `( int )` at the current position.
    fn cast_length(&self) -> Option<usize> {
        let mut i = 1;
        while self.peek_at(i).is_some_and(|c| c == ' ' || c == '\t') {
            i += 1;
        }
        let word_start = i;
        while self.peek_at(i).is_some_and(|c| c.is_ascii_alphabetic()) {
            i += 1;
        }
        let word: String = self.chars[self.pos + word_start..self.pos + i].iter().collect();
        while self.peek_at(i).is_some_and(|c| c == ' ' || c == '\t') {
            i += 1;
        }
        let known = CAST_TYPES.iter().any(|t| t.eq_ignore_ascii_case(&word));
        (known && self.peek_at(i) == Some(')')).then_some(i + 1)
    }

    fn preceded_by_whitespace(&self) -> bool {
        self.pos > 0 && self.chars[self.pos - 1].is_whitespace()
    }

    fn current(&self) -> char {
        self.chars[self.pos]
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(1)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        self.position = self.position.advance(ch.encode_utf8(&mut [0; 4]));
        ch
    }

    fn take(&mut self, n: usize) -> String {
        let mut text = String::new();
        for _ in 0..n {
            if self.is_at_end() {
                break;
            }
            text.push(self.advance());
        }
        text
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.current().is_whitespace() {
            self.advance();
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || !c.is_ascii()
}
