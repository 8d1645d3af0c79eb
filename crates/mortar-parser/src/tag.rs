//! Tag occurrences and the handler suspend/resume protocol.
//!
//! A handler receives the opening `Tag` and answers with a `TagStep`:
//! either a finished node, or a request for the content up to one of the
//! listed end tags. The driver parses that section and resumes the handler
//! with it. Multi-section tags (`{if}…{else}…{/if}`) simply suspend again
//! from the continuation.

use std::fmt;

use mortar_lexer::Position;

use crate::ast::{Fragment, Node};
use crate::parser::TemplateParser;
use crate::CompileError;

/// Where a tag was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `{name ...}`
    Bracket,
    /// `n:name="..."` on an element.
    Attribute(AttrPrefix),
}

/// Prefix of an attribute-form tag, selecting what it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttrPrefix {
    /// `n:if` wraps the whole element.
    None,
    /// `n:tag-if` wraps the start and end tag markup.
    Tag,
    /// `n:inner-if` wraps the element content.
    Inner,
}

impl AttrPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            AttrPrefix::None => "",
            AttrPrefix::Tag => "tag-",
            AttrPrefix::Inner => "inner-",
        }
    }

    /// Split `n:inner-foreach` style names into prefix and base name.
    pub fn split(name: &str) -> (AttrPrefix, &str) {
        if let Some(base) = name.strip_prefix("inner-") {
            (AttrPrefix::Inner, base)
        } else if let Some(base) = name.strip_prefix("tag-") {
            (AttrPrefix::Tag, base)
        } else {
            (AttrPrefix::None, name)
        }
    }
}

/// One tag occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    /// Raw argument text.
    pub args: String,
    pub args_position: Position,
    pub position: Position,
    /// `{/name}`
    pub closing: bool,
    /// `{name /}`
    pub void: bool,
    pub placement: Placement,
}

impl Tag {
    /// Split a bracket tag body such as `/if`, `=$a`, `$a|upper` or
    /// `block name /` into its parts.
    pub fn from_body(body: &str, body_position: Position, position: Position) -> Tag {
        let closing = body.starts_with('/');
        let mut consumed = usize::from(closing);
        let rest = &body[consumed..];
        let ident_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let starts_alpha = rest.starts_with(|c: char| c.is_ascii_alphabetic());

        let name = if closing {
            consumed += ident_len;
            rest[..ident_len].to_string()
        } else if let Some(stripped) = rest.strip_prefix('=') {
            consumed += rest.len() - stripped.len();
            "=".to_string()
        } else if starts_alpha && !continues_as_expression(&rest[ident_len..]) {
            consumed += ident_len;
            rest[..ident_len].to_string()
        } else {
            "=".to_string()
        };

        let after = &body[consumed..];
        let args_start = consumed + (after.len() - after.trim_start().len());
        let mut args = body[args_start..].trim_end();
        let void = !closing && name != "=" && args.ends_with('/');
        if void {
            args = args[..args.len() - 1].trim_end();
        }

        Tag {
            name,
            args: args.to_string(),
            args_position: body_position.advance(&body[..args_start]),
            position,
            closing,
            void,
            placement: Placement::Bracket,
        }
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.placement, Placement::Attribute(_))
    }

    /// The tag as written, for error messages: `{if}`, `{/if}`, `n:inner-if`.
    pub fn display(&self) -> String {
        match self.placement {
            Placement::Attribute(prefix) => format!("n:{}{}", prefix.as_str(), self.name),
            Placement::Bracket if self.closing => format!("{{/{}}}", self.name),
            Placement::Bracket => format!("{{{}}}", self.name),
        }
    }

    pub fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.position)
    }

    pub fn expect_args(&self) -> Result<(), CompileError> {
        if self.args.is_empty() {
            return Err(self.error(format!("Missing arguments in {}", self.display())));
        }
        Ok(())
    }

    pub fn expect_no_args(&self) -> Result<(), CompileError> {
        if !self.args.is_empty() {
            return Err(CompileError::syntax(
                format!("Unexpected arguments in {}", self.display()),
                self.args_position,
            ));
        }
        Ok(())
    }
}

/// After a name, these mean the tag is really an expression: `{foo()}`,
/// `{Foo::BAR}`, `{App\foo()}`.
fn continues_as_expression(rest: &str) -> bool {
    rest.starts_with('(') || rest.starts_with("::") || rest.starts_with('\\')
}

/// Content of one section, handed back to a suspended handler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    pub content: Fragment,
    /// The tag that ended the section; `None` for attribute-form and void tags.
    pub end: Option<Tag>,
}

/// Continuation of a suspended handler.
pub type Resume = Box<dyn FnOnce(Section, &mut TemplateParser) -> Result<TagStep, CompileError>>;

/// Signature of a tag handler.
pub type TagHandler = fn(Tag, &mut TemplateParser) -> Result<TagStep, CompileError>;

/// What a handler wants next.
pub enum TagStep {
    Done(Node),
    /// Parse content until a closing tag or one of `ends`, then call `then`.
    Suspend {
        ends: &'static [&'static str],
        then: Resume,
    },
}

impl TagStep {
    pub fn suspend(
        ends: &'static [&'static str],
        then: impl FnOnce(Section, &mut TemplateParser) -> Result<TagStep, CompileError> + 'static,
    ) -> Self {
        TagStep::Suspend {
            ends,
            then: Box::new(then),
        }
    }
}

impl fmt::Debug for TagStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagStep::Done(node) => f.debug_tuple("Done").field(node).finish(),
            TagStep::Suspend { ends, .. } => f.debug_struct("Suspend").field("ends", ends).finish(),
        }
    }
}
