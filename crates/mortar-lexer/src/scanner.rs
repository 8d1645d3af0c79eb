use crate::token::{is_raw_text_element, ContentType, Position, Token, TokenKind};
use crate::LexerError;

/// Scanner state determines which structural tokens are recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Element content or plain text.
    Text,
    /// Inside `<name ...>` until `>`.
    Tag { after_equals: bool },
    /// Inside a quoted attribute value.
    AttrValue(char),
    /// Inside `<!-- ... -->`.
    HtmlComment,
    /// Inside `<!...>` or `<?...>`.
    Bogus,
    /// Content of a raw text element such as `<script>`, ended by `</name`.
    RawText(String),
}

/// Template source scanner.
///
/// Tokenizes template source into a flat stream of positioned tokens.
/// Every character of the input ends up in exactly one token, so joining
/// the token texts reproduces the source.
///
/// - `Vec<char>` source for index-based navigation
/// - State machine for HTML structure (tag, attribute value, comment, raw text)
/// - Template tags `{...}` and comments `{* ... *}` are recognized in every state
/// - Position tracking on every token
pub struct Scanner {
    chars: Vec<char>,
    pos: usize,
    position: Position,
    tokens: Vec<Token>,
    content_type: ContentType,
    state: State,
    /// Where the current HTML construct began, for unterminated errors.
    state_start: Position,
    /// Name of the element whose tag is being scanned, and whether it is an end tag.
    tag: Option<(String, bool)>,
    at_line_start: bool,
    text: String,
    text_start: Position,
}

impl Scanner {
    /// Create a new scanner for the given source.
    pub fn new(source: &str, content_type: ContentType) -> Self {
        let start = Position::new(0, 1, 1);
        Self {
            chars: source.chars().collect(),
            pos: 0,
            position: start,
            tokens: Vec::new(),
            content_type,
            state: State::Text,
            state_start: start,
            tag: None,
            at_line_start: true,
            text: String::new(),
            text_start: start,
        }
    }

    /// Tokenize the entire source into a vector of tokens, ending with `End`.
    pub fn tokenize(source: &str, content_type: ContentType) -> Result<Vec<Token>, LexerError> {
        let mut scanner = Scanner::new(source, content_type);
        scanner.scan_tokens()?;
        log::debug!(
            "tokenized {} bytes of {content_type} into {} tokens",
            source.len(),
            scanner.tokens.len()
        );
        Ok(scanner.tokens)
    }

    fn scan_tokens(&mut self) -> Result<(), LexerError> {
        while !self.is_at_end() {
            match self.state.clone() {
                State::Tag { after_equals } => self.scan_in_tag(after_equals)?,
                _ => self.scan_text_like()?,
            }
        }
        self.flush_text();

        match self.state {
            State::Text | State::RawText(_) => {}
            State::Tag { .. } | State::Bogus => {
                return Err(self.error_at("Unterminated HTML tag", self.state_start))
            }
            State::AttrValue(_) => {
                return Err(self.error_at(
                    "Unterminated HTML attribute value",
                    self.state_start,
                ))
            }
            State::HtmlComment => {
                return Err(self.error_at("Unterminated HTML comment", self.state_start))
            }
        }

        self.tokens
            .push(Token::new(TokenKind::End, "", self.position));
        Ok(())
    }

    // --- Text-like states ---

    /// Scan one step of text, raw text, attribute value, comment or bogus content.
    fn scan_text_like(&mut self) -> Result<(), LexerError> {
        if self.at_line_start {
            self.at_line_start = false;
            if matches!(self.peek(), ' ' | '\t') {
                self.flush_text();
                let start = self.position;
                let mut indent = String::new();
                while matches!(self.peek(), ' ' | '\t') {
                    indent.push(self.bump());
                }
                self.push(TokenKind::Indentation, indent, start);
                return Ok(());
            }
        }

        let ch = self.peek();

        if ch == '\n' || (ch == '\r' && self.peek_at(1) == '\n') {
            self.flush_text();
            let start = self.position;
            let text = if ch == '\r' {
                self.take(2)
            } else {
                self.take(1)
            };
            self.push(TokenKind::Newline, text, start);
            self.at_line_start = true;
            return Ok(());
        }

        if ch == '{' && self.is_template_tag_start() {
            self.flush_text();
            return self.scan_template_tag();
        }

        if self.content_type.is_markup() && self.scan_markup_boundary() {
            return Ok(());
        }

        self.text_char();
        Ok(())
    }

    /// Recognize the structural boundary that ends the current text-like state.
    /// Returns `true` when tokens were emitted.
    fn scan_markup_boundary(&mut self) -> bool {
        match self.state.clone() {
            State::Text => {
                if self.peek() != '<' {
                    return false;
                }
                if self.starts_with("<!--") {
                    self.flush_text();
                    self.state_start = self.position;
                    self.push_taken(TokenKind::HtmlCommentOpen, 4);
                    self.state = State::HtmlComment;
                    true
                } else if self.peek_at(1).is_ascii_alphabetic() {
                    self.flush_text();
                    self.open_html_tag(false);
                    true
                } else if self.peek_at(1) == '/' && self.peek_at(2).is_ascii_alphabetic() {
                    self.flush_text();
                    self.open_html_tag(true);
                    true
                } else if matches!(self.peek_at(1), '!' | '?') {
                    self.flush_text();
                    self.state_start = self.position;
                    self.push_taken(TokenKind::HtmlBogusOpen, 2);
                    self.state = State::Bogus;
                    true
                } else {
                    false
                }
            }
            State::RawText(name) => {
                let closing = format!("</{name}");
                let boundary = self.peek_at(closing.chars().count());
                if self.starts_with_ignore_case(&closing)
                    && !(boundary.is_alphanumeric() || boundary == '-')
                {
                    self.flush_text();
                    self.open_html_tag(true);
                    true
                } else {
                    false
                }
            }
            State::AttrValue(quote) => {
                if self.peek() != quote {
                    return false;
                }
                self.flush_text();
                self.push_taken(TokenKind::Quote, 1);
                self.state = State::Tag {
                    after_equals: false,
                };
                true
            }
            State::HtmlComment => {
                if !self.starts_with("-->") {
                    return false;
                }
                self.flush_text();
                self.push_taken(TokenKind::HtmlCommentClose, 3);
                self.state = State::Text;
                true
            }
            State::Bogus => {
                if self.peek() != '>' {
                    return false;
                }
                self.flush_text();
                self.push_taken(TokenKind::HtmlTagClose, 1);
                self.state = State::Text;
                true
            }
            State::Tag { .. } => false,
        }
    }

    /// Emit `<`, optional `/`, and the element name, entering the tag state.
    fn open_html_tag(&mut self, end: bool) {
        self.state_start = self.position;
        self.push_taken(TokenKind::HtmlTagOpen, 1);
        if end {
            self.push_taken(TokenKind::Slash, 1);
        }
        let start = self.position;
        let mut name = String::new();
        while self.peek().is_alphanumeric() || matches!(self.peek(), '-' | '_' | ':' | '.') {
            name.push(self.bump());
        }
        self.push(TokenKind::HtmlName, name.clone(), start);
        self.tag = Some((name, end));
        self.state = State::Tag {
            after_equals: false,
        };
    }

    // --- Tag state ---

    /// Scan one token inside `<name ...>`.
    fn scan_in_tag(&mut self, after_equals: bool) -> Result<(), LexerError> {
        let ch = self.peek();

        if ch.is_whitespace() {
            let start = self.position;
            let mut ws = String::new();
            while !self.is_at_end() && self.peek().is_whitespace() {
                ws.push(self.bump());
            }
            self.push(TokenKind::Whitespace, ws, start);
            return Ok(());
        }

        if ch == '{' && self.is_template_tag_start() {
            self.state = State::Tag {
                after_equals: false,
            };
            return self.scan_template_tag();
        }

        match ch {
            '>' => {
                let self_closing = self
                    .tokens
                    .last()
                    .is_some_and(|t| t.kind == TokenKind::Slash);
                self.push_taken(TokenKind::HtmlTagClose, 1);
                self.state = match self.tag.take() {
                    Some((name, false))
                        if self.content_type == ContentType::Html
                            && is_raw_text_element(&name)
                            && !self_closing =>
                    {
                        State::RawText(name.to_ascii_lowercase())
                    }
                    _ => State::Text,
                };
                self.at_line_start = false;
            }
            '/' if !after_equals => self.push_taken(TokenKind::Slash, 1),
            '=' => {
                self.push_taken(TokenKind::Equals, 1);
                self.state = State::Tag { after_equals: true };
            }
            '"' | '\'' => {
                self.state_start = self.position;
                self.push_taken(TokenKind::Quote, 1);
                self.state = State::AttrValue(ch);
                self.at_line_start = false;
            }
            _ if after_equals => {
                // Unquoted attribute value.
                let start = self.position;
                let mut value = String::new();
                while !self.is_at_end()
                    && !self.peek().is_whitespace()
                    && self.peek() != '>'
                    && !(self.peek() == '{' && self.is_template_tag_start())
                {
                    value.push(self.bump());
                }
                self.push(TokenKind::Text, value, start);
                self.state = State::Tag {
                    after_equals: false,
                };
            }
            _ => {
                let start = self.position;
                let mut name = String::new();
                while !self.is_at_end()
                    && !self.peek().is_whitespace()
                    && !matches!(self.peek(), '=' | '>' | '/' | '"' | '\'')
                    && !(self.peek() == '{' && self.is_template_tag_start())
                {
                    name.push(self.bump());
                }
                if name.is_empty() {
                    return Err(self.error(format!("Unexpected character '{}'", self.peek())));
                }
                self.push(TokenKind::HtmlName, name, start);
            }
        }
        Ok(())
    }

    // --- Template tags ---

    /// Whether the `{` at the current position opens a template tag or comment.
    fn is_template_tag_start(&self) -> bool {
        let next = self.peek_at(1);
        next != '\0' && !next.is_whitespace() && !matches!(next, '\'' | '"' | '{' | '}')
    }

    /// Scan `{* comment *}` or `{tag body}`.
    fn scan_template_tag(&mut self) -> Result<(), LexerError> {
        let open = self.position;

        if self.peek_at(1) == '*' {
            self.push_taken(TokenKind::LatteCommentOpen, 2);
            let start = self.position;
            let mut content = String::new();
            while !self.is_at_end() && !self.starts_with("*}") {
                content.push(self.bump());
            }
            if self.is_at_end() {
                return Err(self.error_at("Unterminated template comment", open));
            }
            if !content.is_empty() {
                self.push(TokenKind::Text, content, start);
            }
            self.push_taken(TokenKind::LatteCommentClose, 2);
            return Ok(());
        }

        self.push_taken(TokenKind::LatteTagOpen, 1);
        let start = self.position;
        let mut body = String::new();
        let mut depth = 0usize;

        loop {
            if self.is_at_end() {
                return Err(self.error_at("Unterminated template tag", open));
            }
            match self.peek() {
                quote @ ('\'' | '"') => {
                    body.push(self.bump());
                    while !self.is_at_end() && self.peek() != quote {
                        if self.peek() == '\\' {
                            body.push(self.bump());
                            if self.is_at_end() {
                                break;
                            }
                        }
                        body.push(self.bump());
                    }
                    if self.is_at_end() {
                        return Err(self.error_at("Unterminated template tag", open));
                    }
                    body.push(self.bump());
                }
                '{' => {
                    depth += 1;
                    body.push(self.bump());
                }
                '}' if depth == 0 => break,
                '}' => {
                    depth -= 1;
                    body.push(self.bump());
                }
                _ => body.push(self.bump()),
            }
        }

        self.push(TokenKind::LatteTagBody, body, start);
        self.push_taken(TokenKind::LatteTagClose, 1);
        Ok(())
    }

    // --- Helpers ---

    fn text_char(&mut self) {
        if self.text.is_empty() {
            self.text_start = self.position;
        }
        let ch = self.bump();
        self.text.push(ch);
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.tokens
                .push(Token::new(TokenKind::Text, text, self.text_start));
        }
    }

    fn push(&mut self, kind: TokenKind, text: String, start: Position) {
        self.tokens.push(Token::new(kind, text, start));
    }

    fn push_taken(&mut self, kind: TokenKind, n: usize) {
        let start = self.position;
        let text = self.take(n);
        self.push(kind, text, start);
    }

    fn take(&mut self, n: usize) -> String {
        let mut text = String::new();
        for _ in 0..n {
            if self.is_at_end() {
                break;
            }
            text.push(self.bump());
        }
        text
    }

    fn bump(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        self.position.offset += ch.len_utf8();
        if ch == '\n' {
            self.position.line += 1;
            self.position.column = 1;
        } else {
            self.position.column += 1;
        }
        ch
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> char {
        self.chars.get(self.pos + offset).copied().unwrap_or('\0')
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == c)
    }

    fn starts_with_ignore_case(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i).eq_ignore_ascii_case(&c))
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn error(&self, message: String) -> LexerError {
        LexerError {
            message,
            line: self.position.line,
            column: self.position.column,
        }
    }

    fn error_at(&self, message: &str, at: Position) -> LexerError {
        LexerError {
            message: message.into(),
            line: at.line,
            column: at.column,
        }
    }
}
