use mortar_lexer::{LexerError, Position};

/// Compile-time error. Every variant aborts the compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Malformed template: unbalanced tags, bad expressions, unknown names.
    #[error("{message} (on line {line} at column {column}){}", did_you_mean(.suggestion))]
    Syntax {
        message: String,
        line: usize,
        column: usize,
        suggestion: Option<String>,
    },

    /// Policy denial or forbidden construct. Never recoverable from template code.
    #[error("Security violation: {message} (on line {line} at column {column})")]
    Security {
        message: String,
        line: usize,
        column: usize,
    },

    /// A tag handler broke the suspend/resume contract.
    #[error("Internal protocol error: {message} (on line {line} at column {column})")]
    Protocol {
        message: String,
        line: usize,
        column: usize,
    },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(", did you mean {s}?"),
        None => String::new(),
    }
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, at: Position) -> Self {
        CompileError::Syntax {
            message: message.into(),
            line: at.line,
            column: at.column,
            suggestion: None,
        }
    }

    pub fn security(message: impl Into<String>, at: Position) -> Self {
        CompileError::Security {
            message: message.into(),
            line: at.line,
            column: at.column,
        }
    }

    pub fn protocol(message: impl Into<String>, at: Position) -> Self {
        CompileError::Protocol {
            message: message.into(),
            line: at.line,
            column: at.column,
        }
    }

    /// Attach a "did you mean" suggestion to a syntax error.
    pub fn with_suggestion(self, suggestion: Option<String>) -> Self {
        match self {
            CompileError::Syntax {
                message,
                line,
                column,
                ..
            } => CompileError::Syntax {
                message,
                line,
                column,
                suggestion,
            },
            other => other,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Syntax { message, .. }
            | CompileError::Security { message, .. }
            | CompileError::Protocol { message, .. } => message,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            CompileError::Syntax { line, .. }
            | CompileError::Security { line, .. }
            | CompileError::Protocol { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            CompileError::Syntax { column, .. }
            | CompileError::Security { column, .. }
            | CompileError::Protocol { column, .. } => *column,
        }
    }

    pub fn is_security(&self) -> bool {
        matches!(self, CompileError::Security { .. })
    }
}

impl From<LexerError> for CompileError {
    fn from(e: LexerError) -> Self {
        CompileError::Syntax {
            message: e.message,
            line: e.line,
            column: e.column,
            suggestion: None,
        }
    }
}

/// Closest candidate to `name` by edit distance, if close enough to be a likely typo.
pub fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let limit = name.chars().count() / 4 + 1;
    candidates
        .into_iter()
        .filter(|c| *c != name)
        .map(|c| (levenshtein(name, c), c))
        .filter(|(d, _)| *d <= limit)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            let next = (row[j + 1] + 1).min(row[j] + 1).min(prev + cost);
            prev = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("foreach", "foreach"), 0);
        assert_eq!(levenshtein("forech", "foreach"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }

    #[test]
    fn test_suggest_picks_closest() {
        let names = ["if", "ifset", "foreach", "for"];
        assert_eq!(suggest("forech", names), Some("foreach".into()));
        assert_eq!(suggest("iff", names), Some("if".into()));
        assert_eq!(suggest("capture", names), None);
    }

    #[test]
    fn test_display_includes_position_and_suggestion() {
        let err = CompileError::syntax("Unexpected tag {forech}", Position::new(0, 3, 7))
            .with_suggestion(Some("{foreach}".into()));
        assert_eq!(
            err.to_string(),
            "Unexpected tag {forech} (on line 3 at column 7), did you mean {foreach}?"
        );
    }

    #[test]
    fn test_lexer_error_converts_to_syntax() {
        let err: CompileError = LexerError {
            message: "Unterminated template tag".into(),
            line: 2,
            column: 4,
        }
        .into();
        assert!(matches!(err, CompileError::Syntax { line: 2, column: 4, .. }));
    }
}
