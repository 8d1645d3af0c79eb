use std::fmt;
use std::str::FromStr;

/// A position in source text, tracking line and column for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Byte offset into the source.
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }

    /// Position reached after walking over `text` starting here.
    pub fn advance(self, text: &str) -> Self {
        let mut pos = self;
        for ch in text.chars() {
            pos.offset += ch.len_utf8();
            if ch == '\n' {
                pos.line += 1;
                pos.column = 1;
            } else {
                pos.column += 1;
            }
        }
        pos
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Content type of a template, selecting which structural tokens are recognized
/// and which escaping table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Html,
    Xml,
    Text,
    #[serde(alias = "js")]
    JavaScript,
    Css,
    ICal,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Html => "html",
            ContentType::Xml => "xml",
            ContentType::Text => "text",
            ContentType::JavaScript => "js",
            ContentType::Css => "css",
            ContentType::ICal => "ical",
        }
    }

    /// Whether HTML structure (tags, attributes, comments) is tokenized.
    pub fn is_markup(self) -> bool {
        matches!(self, ContentType::Html | ContentType::Xml)
    }

    /// Resolve a `{contentType}` argument such as `xml`, `text/html` or
    /// `application/javascript`.
    pub fn from_mime(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if let Ok(ct) = value.parse() {
            return Some(ct);
        }
        if value.contains("html") {
            Some(ContentType::Html)
        } else if value.contains("xml") {
            Some(ContentType::Xml)
        } else if value.contains("javascript") || value.contains("json") {
            Some(ContentType::JavaScript)
        } else if value.contains("css") {
            Some(ContentType::Css)
        } else if value.contains("calendar") {
            Some(ContentType::ICal)
        } else if value.starts_with("text/") {
            Some(ContentType::Text)
        } else {
            None
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Ok(ContentType::Html),
            "xml" => Ok(ContentType::Xml),
            "text" => Ok(ContentType::Text),
            "js" | "javascript" => Ok(ContentType::JavaScript),
            "css" => Ok(ContentType::Css),
            "ical" => Ok(ContentType::ICal),
            other => Err(format!("unknown content type '{other}'")),
        }
    }
}

/// Token classification for template source.
///
/// Tokens carry their exact source text, so the kinds are plain tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Text
    Text,
    Indentation,
    Newline,
    Whitespace,

    // Template tags
    LatteTagOpen,  // {
    LatteTagBody,  // name and arguments
    LatteTagClose, // }
    LatteCommentOpen,
    LatteCommentClose,

    // HTML structure
    HtmlTagOpen,  // <
    HtmlTagClose, // >
    HtmlName,     // element or attribute name
    HtmlCommentOpen,
    HtmlCommentClose,
    HtmlBogusOpen, // <! or <?
    Equals,
    Quote, // attribute value begin/end
    Slash,

    // End of input
    End,
}

impl TokenKind {
    /// Human-readable description used in error messages.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Text => "text",
            TokenKind::Indentation => "indentation",
            TokenKind::Newline => "newline",
            TokenKind::Whitespace => "whitespace",
            TokenKind::LatteTagOpen => "'{'",
            TokenKind::LatteTagBody => "tag name",
            TokenKind::LatteTagClose => "'}'",
            TokenKind::LatteCommentOpen => "'{*'",
            TokenKind::LatteCommentClose => "'*}'",
            TokenKind::HtmlTagOpen => "'<'",
            TokenKind::HtmlTagClose => "'>'",
            TokenKind::HtmlName => "HTML name",
            TokenKind::HtmlCommentOpen => "'<!--'",
            TokenKind::HtmlCommentClose => "'-->'",
            TokenKind::HtmlBogusOpen => "'<!'",
            TokenKind::Equals => "'='",
            TokenKind::Quote => "quote",
            TokenKind::Slash => "'/'",
            TokenKind::End => "end",
        }
    }
}

/// A token produced by the template lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

/// HTML5 void elements (no content, no end tag).
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Check if a tag name is an HTML5 void element.
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}

/// Elements whose content is raw text in HTML.
pub fn is_raw_text_element(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("script") || tag.eq_ignore_ascii_case("style")
}
