//! Template parser driver.
//!
//! Walks the template token stream with recursive descent, building
//! `Fragment`s of text, HTML elements and tag nodes. Tag semantics live in
//! the handlers of the `TagRegistry`; the driver runs their suspend/resume
//! protocol (see `tag`) and keeps a stack of open tags and elements, used
//! to decide which tag ends which section and for `closest()` queries.

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::sync::Arc;

use mortar_lexer::token::is_void_element;
use mortar_lexer::{ContentType, Position, Scanner, Token, TokenKind, TokenStream};

use crate::ast::{Attribute, Element, Fragment, Node, Template};
use crate::error::suggest;
use crate::expr_lexer::ExprLexer;
use crate::expr_parser::ExprParser;
use crate::passes::{self, SANDBOX_DENIED};
use crate::policy::Policy;
use crate::registry::TagRegistry;
use crate::tag::{AttrPrefix, Placement, Resume, Section, Tag, TagHandler, TagStep};
use crate::CompileError;

/// Configuration of one compile.
#[derive(Clone)]
pub struct ParserOptions {
    /// Initial content type; selects the lexer rules and default escaping.
    pub content_type: ContentType,
    pub registry: Arc<TagRegistry>,
    /// Presence of a policy turns the sandbox on.
    pub policy: Option<Arc<dyn Policy>>,
    /// Names callable from templates as template functions.
    pub functions: Vec<String>,
    /// Keywords rejected in expressions under the sandbox.
    pub denied_keywords: Vec<String>,
}

impl ParserOptions {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_functions(mut self, functions: Vec<String>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_registry(mut self, registry: TagRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            content_type: ContentType::Html,
            registry: Arc::new(TagRegistry::with_defaults()),
            policy: None,
            functions: Vec::new(),
            denied_keywords: SANDBOX_DENIED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Debug for ParserOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserOptions")
            .field("content_type", &self.content_type)
            .field("registry", &self.registry)
            .field("sandbox", &self.policy.is_some())
            .field("functions", &self.functions)
            .finish()
    }
}

/// Parse template source into an AST.
pub fn parse(source: &str, options: &ParserOptions) -> Result<Template, CompileError> {
    let tokens = Scanner::tokenize(source, options.content_type)?;
    TemplateParser::new(tokens, options.clone()).parse_template()
}

/// Which structural region the current fragment is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    /// Between `<name` and `>`.
    Tag,
    AttrValue,
    Comment,
    Bogus,
}

#[derive(Debug)]
enum Context {
    Tag {
        name: String,
        ends: &'static [&'static str],
        /// Opened from an `n:` attribute; never ended by a bracket tag.
        attribute: bool,
    },
    Element(String),
}

/// Why a fragment stopped.
#[derive(Debug)]
enum Stop {
    End,
    /// A bracket tag that ends the innermost open section.
    Tag(Tag),
    /// `</name` of an open element, not consumed.
    EndTag(String),
    /// The delimiter closing the current mode, not consumed.
    Delimiter,
}

/// An `n:` attribute whose handler is waiting for the element.
struct Opened {
    prefix: AttrPrefix,
    display: String,
    position: Position,
    then: Resume,
}

/// Template parser. One instance per compile.
pub struct TemplateParser {
    stream: TokenStream,
    options: ParserOptions,
    mode: Mode,
    stack: Vec<Context>,
    content_type: ContentType,
    blocks: HashSet<String>,
}

impl TemplateParser {
    pub fn new(tokens: Vec<Token>, options: ParserOptions) -> Self {
        Self {
            stream: TokenStream::new(tokens),
            content_type: options.content_type,
            options,
            mode: Mode::Text,
            stack: Vec::new(),
            blocks: HashSet::new(),
        }
    }

    pub fn parse_template(mut self) -> Result<Template, CompileError> {
        let (root, stop) = self.parse_fragment()?;
        if !matches!(stop, Stop::End) {
            return Err(self.unexpected_token());
        }
        log::debug!(
            "parsed {} template with {} top-level nodes",
            self.content_type,
            root.children.len()
        );
        Ok(Template {
            root,
            content_type: self.content_type,
        })
    }

    // =========================================================================
    // Services for tag handlers
    // =========================================================================

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Expression parser over the tag's arguments, after the rewrite passes.
    pub fn expression(&self, tag: &Tag) -> Result<ExprParser, CompileError> {
        let tokens = ExprLexer::tokenize(&tag.args, tag.args_position)?;
        let tokens = passes::rewrite(
            tokens,
            self.options.policy.as_deref(),
            &self.options.denied_keywords,
        )?;
        Ok(ExprParser::new(tokens, tag.args_position.advance(&tag.args))
            .with_functions(self.options.functions.clone()))
    }

    /// Name of the nearest enclosing tag among `names`. The search does not
    /// cross `{block}` or `{define}`, which print as separate methods.
    pub fn closest(&self, names: &[&str]) -> Option<String> {
        for context in self.stack.iter().rev() {
            if let Context::Tag { name, .. } = context {
                if names.contains(&name.as_str()) {
                    return Some(name.clone());
                }
                if name == "block" || name == "define" {
                    return None;
                }
            }
        }
        None
    }

    /// Whether no tag or element is open.
    pub fn is_top_level(&self) -> bool {
        self.stack.is_empty()
    }

    /// Declared content type of the whole template.
    pub fn set_content_type(&mut self, content_type: ContentType) {
        self.content_type = content_type;
    }

    /// Register a block or define name, which must be unique per template.
    pub fn declare_block(&mut self, name: &str, at: Position) -> Result<(), CompileError> {
        if !self.blocks.insert(name.to_string()) {
            return Err(CompileError::syntax(
                format!("Cannot redeclare block '{name}'"),
                at,
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Fragments
    // =========================================================================

    fn parse_fragment(&mut self) -> Result<(Fragment, Stop), CompileError> {
        let mut fragment = Fragment::default();

        loop {
            let token = self.stream.peek(0).clone();
            match token.kind {
                TokenKind::End => return Ok((fragment, Stop::End)),
                TokenKind::Text
                | TokenKind::Newline
                | TokenKind::Indentation
                | TokenKind::Whitespace => {
                    self.stream.next_token();
                    fragment.push(Node::Text(token.text));
                }
                TokenKind::LatteCommentOpen => self.skip_comment()?,
                TokenKind::LatteTagOpen => {
                    let tag = self.parse_tag()?;
                    if self.ends_section(&tag)? {
                        return Ok((fragment, Stop::Tag(tag)));
                    }
                    fragment.push(self.dispatch(tag)?);
                }
                TokenKind::HtmlTagOpen if self.stream.peek(1).kind == TokenKind::Slash => {
                    let name = self.stream.peek(2).text.clone();
                    if self.is_open_element(&name) {
                        return Ok((fragment, Stop::EndTag(name)));
                    }
                    fragment.push(Node::Text(self.stray_end_tag()));
                }
                TokenKind::HtmlTagOpen => {
                    let (node, stop) = self.parse_element()?;
                    fragment.push(node);
                    if let Some(stop) = stop {
                        return Ok((fragment, stop));
                    }
                }
                TokenKind::HtmlCommentOpen => fragment.push(self.parse_html_comment()?),
                TokenKind::HtmlBogusOpen => fragment.push(self.parse_bogus()?),
                TokenKind::HtmlName if self.mode == Mode::Tag => {
                    if token.text.starts_with("n:") {
                        return Err(CompileError::syntax(
                            format!("Attribute {} must not be placed inside a tag", token.text),
                            token.position,
                        ));
                    }
                    fragment.push(self.parse_attribute()?);
                }
                TokenKind::Quote if self.mode == Mode::AttrValue => {
                    return Ok((fragment, Stop::Delimiter))
                }
                TokenKind::HtmlCommentClose if self.mode == Mode::Comment => {
                    return Ok((fragment, Stop::Delimiter))
                }
                TokenKind::HtmlTagClose if matches!(self.mode, Mode::Tag | Mode::Bogus) => {
                    return Ok((fragment, Stop::Delimiter))
                }
                TokenKind::Slash if self.mode == Mode::Tag => {
                    return Ok((fragment, Stop::Delimiter))
                }
                _ => return Err(self.unexpected_token()),
            }
        }
    }

    fn in_mode<T>(
        &mut self,
        mode: Mode,
        f: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        let saved = mem::replace(&mut self.mode, mode);
        let result = f(self);
        self.mode = saved;
        result
    }

    /// Consume the delimiter a fragment stopped at.
    fn expect_delimiter(&mut self, stop: Stop, kind: TokenKind) -> Result<(), CompileError> {
        match stop {
            Stop::Delimiter => {
                self.stream.consume(&[kind])?;
                Ok(())
            }
            Stop::Tag(tag) => Err(tag.error(format!("Unexpected {}", tag.display()))),
            Stop::End | Stop::EndTag(_) => Err(self.unexpected_token()),
        }
    }

    fn unexpected_token(&self) -> CompileError {
        let token = self.stream.peek(0);
        let message = if token.kind == TokenKind::End {
            "Unexpected end".to_string()
        } else {
            format!("Unexpected '{}'", token.text)
        };
        CompileError::syntax(message, token.position)
    }

    fn skip_comment(&mut self) -> Result<(), CompileError> {
        self.stream.consume(&[TokenKind::LatteCommentOpen])?;
        while !self.stream.is(&[TokenKind::LatteCommentClose, TokenKind::End]) {
            self.stream.next_token();
        }
        self.stream.consume(&[TokenKind::LatteCommentClose])?;
        Ok(())
    }

    // =========================================================================
    // Bracket tags
    // =========================================================================

    fn parse_tag(&mut self) -> Result<Tag, CompileError> {
        let open = self.stream.consume(&[TokenKind::LatteTagOpen])?;
        let body = self.stream.consume(&[TokenKind::LatteTagBody])?;
        self.stream.consume(&[TokenKind::LatteTagClose])?;
        Ok(Tag::from_body(&body.text, body.position, open.position))
    }

    /// Whether `tag` ends the innermost open section. A closing tag that
    /// does not match that section is an error.
    fn ends_section(&self, tag: &Tag) -> Result<bool, CompileError> {
        let open = self.stack.iter().rev().find_map(|context| match context {
            Context::Tag {
                name,
                ends,
                attribute: false,
            } => Some((name, ends)),
            _ => None,
        });

        match open {
            None if tag.closing => Err(tag.error(format!("Unexpected {}", tag.display()))),
            None => Ok(false),
            Some((name, _)) if tag.closing => {
                if tag.name.is_empty() || tag.name == *name {
                    Ok(true)
                } else {
                    Err(tag.error(format!(
                        "Unexpected {}, expecting {{/{name}}}",
                        tag.display()
                    )))
                }
            }
            Some((_, ends)) => Ok(ends.contains(&tag.name.as_str())),
        }
    }

    fn check_tag_allowed(&self, name: &str, at: Position) -> Result<(), CompileError> {
        match &self.options.policy {
            Some(policy) if !policy.is_tag_allowed(name) => Err(CompileError::security(
                format!("Tag {{{name}}} is not allowed"),
                at,
            )),
            _ => Ok(()),
        }
    }

    fn dispatch(&mut self, tag: Tag) -> Result<Node, CompileError> {
        let Some(handler) = self.options.registry.tag(&tag.name) else {
            let suggestion = suggest(&tag.name, self.options.registry.tag_names())
                .map(|name| format!("{{{name}}}"));
            return Err(tag
                .error(format!("Unexpected tag {}", tag.display()))
                .with_suggestion(suggestion));
        };
        self.check_tag_allowed(&tag.name, tag.position)?;
        log::trace!("dispatching {} at {}", tag.display(), tag.position);
        self.run(handler, tag)
    }

    /// Drive a bracket tag handler through all of its sections.
    fn run(&mut self, handler: TagHandler, tag: Tag) -> Result<Node, CompileError> {
        let name = tag.name.clone();
        let display = tag.display();
        let position = tag.position;
        let void = tag.void;

        let mut step = handler(tag, self)?;
        let mut closed = false;

        loop {
            let (ends, then) = match step {
                TagStep::Done(node) => return Ok(node),
                TagStep::Suspend { ends, then } => (ends, then),
            };
            if closed {
                return Err(CompileError::protocol(
                    format!("{display} requested content after its closing tag"),
                    position,
                ));
            }
            if void {
                closed = true;
                step = then(Section::default(), self)?;
                continue;
            }

            self.stack.push(Context::Tag {
                name: name.clone(),
                ends,
                attribute: false,
            });
            let result = self.parse_fragment();
            self.stack.pop();
            let (content, stop) = result?;

            let end = match stop {
                Stop::Tag(end) => end,
                Stop::End => {
                    return Err(CompileError::syntax(
                        format!("Unexpected end, expecting {{/{name}}}"),
                        self.stream.position(),
                    ))
                }
                Stop::EndTag(_) | Stop::Delimiter => {
                    let token = self.stream.peek(0);
                    return Err(CompileError::syntax(
                        format!("Unexpected '{}', expecting {{/{name}}}", token.text),
                        token.position,
                    ));
                }
            };
            closed = end.closing;
            step = then(
                Section {
                    content,
                    end: Some(end),
                },
                self,
            )?;
        }
    }

    // =========================================================================
    // HTML
    // =========================================================================

    /// Whether `</name` closes an element opened within the current section.
    fn is_open_element(&self, name: &str) -> bool {
        for context in self.stack.iter().rev() {
            match context {
                Context::Element(open) if open.eq_ignore_ascii_case(name) => return true,
                Context::Tag {
                    attribute: false, ..
                } => return false,
                _ => {}
            }
        }
        false
    }

    /// An end tag with no open element is kept as text.
    fn stray_end_tag(&mut self) -> String {
        let mut text = String::new();
        while !self.stream.is_at_end() {
            let token = self.stream.next_token();
            text.push_str(&token.text);
            if token.kind == TokenKind::HtmlTagClose {
                break;
            }
        }
        text
    }

    fn parse_html_comment(&mut self) -> Result<Node, CompileError> {
        self.stream.consume(&[TokenKind::HtmlCommentOpen])?;
        let (content, stop) = self.in_mode(Mode::Comment, Self::parse_fragment)?;
        self.expect_delimiter(stop, TokenKind::HtmlCommentClose)?;
        Ok(Node::HtmlComment(content))
    }

    fn parse_bogus(&mut self) -> Result<Node, CompileError> {
        let open = self.stream.consume(&[TokenKind::HtmlBogusOpen])?;
        let (content, stop) = self.in_mode(Mode::Bogus, Self::parse_fragment)?;
        self.expect_delimiter(stop, TokenKind::HtmlTagClose)?;
        let mut fragment = Fragment::new(vec![Node::Text(open.text)]);
        for node in content.children {
            fragment.push(node);
        }
        Ok(Node::Bogus(fragment))
    }

    /// Parse an element. The second value is a stop propagated from the
    /// content when the element was closed implicitly.
    fn parse_element(&mut self) -> Result<(Node, Option<Stop>), CompileError> {
        let open = self.stream.consume(&[TokenKind::HtmlTagOpen])?;
        let name = self.stream.consume(&[TokenKind::HtmlName])?.text;
        let (attributes, mut n_attrs) = self.in_mode(Mode::Tag, Self::parse_start_tag)?;
        let self_closing = self.stream.try_consume(&[TokenKind::Slash]).is_some();
        self.stream.consume(&[TokenKind::HtmlTagClose])?;
        let void = self_closing
            || (self.options.content_type == ContentType::Html && is_void_element(&name));

        let registry = Arc::clone(&self.options.registry);
        n_attrs.sort_by_key(|tag| {
            let prefix = match tag.placement {
                Placement::Attribute(prefix) => prefix,
                Placement::Bracket => AttrPrefix::None,
            };
            (prefix, registry.attribute_order(&tag.name).unwrap_or(usize::MAX))
        });

        let mut opened = Vec::with_capacity(n_attrs.len());
        for tag in n_attrs {
            opened.push(self.open_attribute(&registry, tag, &name, void)?);
        }

        let mut has_end_tag = false;
        let mut stop = None;
        let content = if void {
            None
        } else {
            self.stack.push(Context::Element(name.clone()));
            let result = self.parse_fragment();
            self.stack.pop();
            let (content, end) = result?;
            match end {
                Stop::EndTag(end_name) if end_name.eq_ignore_ascii_case(&name) => {
                    self.parse_end_tag()?;
                    has_end_tag = true;
                }
                other => {
                    if let Some(first) = opened.first() {
                        return Err(CompileError::syntax(
                            format!("Missing </{name}> for element with {}", first.display),
                            open.position,
                        ));
                    }
                    stop = Some(other);
                }
            }
            Some(content)
        };
        for _ in &opened {
            self.stack.pop();
        }

        let mut element = Element {
            name,
            attributes,
            content,
            self_closing,
            has_end_tag,
            tag_node: None,
            position: open.position,
        };

        // Close in reverse opening order: inner-, then tag-, then plain.
        let split = opened
            .iter()
            .position(|o| o.prefix != AttrPrefix::None)
            .unwrap_or(opened.len());
        let wrapping = opened.split_off(split);
        for attr in wrapping.into_iter().rev() {
            if attr.prefix == AttrPrefix::Inner {
                let body = element.content.take().unwrap_or_default();
                let node = self.close_attribute(attr, body)?;
                element.content = Some(Fragment::new(vec![node]));
            } else {
                let inner = element.tag_node.take().map_or(Node::CapturedTag, |n| *n);
                let node = self.close_attribute(attr, Fragment::new(vec![inner]))?;
                element.tag_node = Some(Box::new(node));
            }
        }

        let mut node = Node::Element(Box::new(element));
        for attr in opened.into_iter().rev() {
            node = self.close_attribute(attr, Fragment::new(vec![node]))?;
        }
        Ok((node, stop))
    }

    fn parse_start_tag(&mut self) -> Result<(Fragment, Vec<Tag>), CompileError> {
        let mut attributes = Fragment::default();
        let mut n_attrs: Vec<Tag> = Vec::new();

        loop {
            let token = self.stream.peek(0).clone();
            match token.kind {
                TokenKind::Whitespace => {
                    self.stream.next_token();
                    attributes.push(Node::Text(token.text));
                }
                TokenKind::HtmlName if token.text.starts_with("n:") => {
                    let tag = self.parse_n_attribute()?;
                    if n_attrs
                        .iter()
                        .any(|t| t.name == tag.name && t.placement == tag.placement)
                    {
                        return Err(
                            tag.error(format!("Found multiple attributes {}", tag.display()))
                        );
                    }
                    let blank = matches!(
                        attributes.children.last(),
                        Some(Node::Text(t)) if t.trim().is_empty()
                    );
                    if blank {
                        attributes.children.pop();
                    }
                    n_attrs.push(tag);
                }
                TokenKind::HtmlName => attributes.push(self.parse_attribute()?),
                TokenKind::LatteCommentOpen => self.skip_comment()?,
                TokenKind::LatteTagOpen => {
                    let tag = self.parse_tag()?;
                    if self.ends_section(&tag)? {
                        return Err(
                            tag.error(format!("Unexpected {} inside HTML tag", tag.display()))
                        );
                    }
                    attributes.push(self.dispatch(tag)?);
                }
                TokenKind::Slash | TokenKind::HtmlTagClose => return Ok((attributes, n_attrs)),
                _ => return Err(self.unexpected_token()),
            }
        }
    }

    /// Consume `=` after an attribute name, allowing whitespace around it.
    fn try_equals(&mut self) -> bool {
        let at = usize::from(self.stream.peek(0).kind == TokenKind::Whitespace);
        if self.stream.peek(at).kind != TokenKind::Equals {
            return false;
        }
        for _ in 0..=at {
            self.stream.next_token();
        }
        self.stream.try_consume(&[TokenKind::Whitespace]);
        true
    }

    fn parse_attribute(&mut self) -> Result<Node, CompileError> {
        let name = self.stream.consume(&[TokenKind::HtmlName])?.text;
        let mut attribute = Attribute {
            name,
            value: None,
            quote: None,
        };

        if self.try_equals() {
            let token = self.stream.peek(0).clone();
            match token.kind {
                TokenKind::Quote => {
                    self.stream.next_token();
                    let (value, stop) = self.in_mode(Mode::AttrValue, Self::parse_fragment)?;
                    self.expect_delimiter(stop, TokenKind::Quote)?;
                    attribute.quote = token.text.chars().next();
                    attribute.value = Some(value);
                }
                TokenKind::Text => {
                    self.stream.next_token();
                    attribute.value = Some(Fragment::new(vec![Node::Text(token.text)]));
                }
                TokenKind::LatteTagOpen => {
                    let tag = self.parse_tag()?;
                    if self.ends_section(&tag)? {
                        return Err(
                            tag.error(format!("Unexpected {} inside HTML tag", tag.display()))
                        );
                    }
                    let node = self.in_mode(Mode::AttrValue, |p| p.dispatch(tag))?;
                    attribute.value = Some(Fragment::new(vec![node]));
                }
                _ => return Err(self.unexpected_token()),
            }
        }

        Ok(Node::Attribute(Box::new(attribute)))
    }

    fn parse_n_attribute(&mut self) -> Result<Tag, CompileError> {
        let token = self.stream.consume(&[TokenKind::HtmlName])?;
        let (prefix, base) = AttrPrefix::split(&token.text[2..]);
        let mut args = String::new();
        let mut args_position = token.position.advance(&token.text);

        if self.try_equals() {
            let value = self.stream.next_token();
            match value.kind {
                TokenKind::Text => {
                    args = value.text;
                    args_position = value.position;
                }
                TokenKind::Quote => {
                    args_position = value.position.advance(&value.text);
                    loop {
                        let part = self.stream.next_token();
                        match part.kind {
                            TokenKind::Quote => break,
                            TokenKind::Text | TokenKind::Newline | TokenKind::Indentation => {
                                args.push_str(&part.text)
                            }
                            TokenKind::LatteTagOpen => {
                                return Err(CompileError::syntax(
                                    format!("Tags are not allowed in attribute {}", token.text),
                                    part.position,
                                ))
                            }
                            _ => {
                                return Err(CompileError::syntax(
                                    format!("Unterminated value of attribute {}", token.text),
                                    value.position,
                                ))
                            }
                        }
                    }
                }
                _ => {
                    return Err(CompileError::syntax(
                        format!("Unexpected '{}'", value.text),
                        value.position,
                    ))
                }
            }
        }

        let trimmed = args.trim_start();
        let args_position = args_position.advance(&args[..args.len() - trimmed.len()]);
        Ok(Tag {
            name: base.to_string(),
            args: trimmed.trim_end().to_string(),
            args_position,
            position: token.position,
            closing: false,
            void: false,
            placement: Placement::Attribute(prefix),
        })
    }

    fn open_attribute(
        &mut self,
        registry: &TagRegistry,
        tag: Tag,
        element: &str,
        void: bool,
    ) -> Result<Opened, CompileError> {
        let display = tag.display();
        let Some(handler) = registry.attribute(&tag.name) else {
            let candidates: Vec<String> = registry
                .attribute_names()
                .map(|name| format!("n:{}{name}", tag_prefix(&tag).as_str()))
                .collect();
            let suggestion = suggest(&display, candidates.iter().map(String::as_str));
            return Err(tag
                .error(format!("Unexpected attribute {display}"))
                .with_suggestion(suggestion));
        };
        let prefix = tag_prefix(&tag);
        if prefix == AttrPrefix::Inner && void {
            return Err(tag.error(format!(
                "Unexpected {display} on void element <{element}>"
            )));
        }
        self.check_tag_allowed(&tag.name, tag.position)?;
        log::trace!("opening {display} on <{element}>");

        let position = tag.position;
        let name = tag.name.clone();
        let then = match handler(tag, self)? {
            TagStep::Suspend { then, .. } => then,
            TagStep::Done(_) => {
                return Err(CompileError::protocol(
                    format!("{display} must wrap the element"),
                    position,
                ))
            }
        };
        self.stack.push(Context::Tag {
            name,
            ends: &[],
            attribute: true,
        });
        Ok(Opened {
            prefix,
            display,
            position,
            then,
        })
    }

    fn close_attribute(&mut self, attr: Opened, content: Fragment) -> Result<Node, CompileError> {
        let section = Section { content, end: None };
        match (attr.then)(section, self)? {
            TagStep::Done(node) => Ok(node),
            TagStep::Suspend { .. } => Err(CompileError::protocol(
                format!("{} requested more than one section", attr.display),
                attr.position,
            )),
        }
    }

    fn parse_end_tag(&mut self) -> Result<(), CompileError> {
        self.stream.consume(&[TokenKind::HtmlTagOpen])?;
        self.stream.consume(&[TokenKind::Slash])?;
        self.stream.consume(&[TokenKind::HtmlName])?;
        self.stream.try_consume(&[TokenKind::Whitespace]);
        self.stream.consume(&[TokenKind::HtmlTagClose])?;
        Ok(())
    }
}

fn tag_prefix(tag: &Tag) -> AttrPrefix {
    match tag.placement {
        Placement::Attribute(prefix) => prefix,
        Placement::Bracket => AttrPrefix::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, IfNode};
    use crate::policy::StaticPolicy;
    use pretty_assertions::assert_eq;

    fn parse_html(source: &str) -> Result<Template, CompileError> {
        parse(source, &ParserOptions::default())
    }

    fn root(source: &str) -> Vec<Node> {
        parse_html(source).unwrap().root.children
    }

    fn element(node: &Node) -> &Element {
        match node {
            Node::Element(el) => el,
            other => panic!("expected element, got {other:?}"),
        }
    }

    // --- Text and tags ---

    #[test]
    fn test_text_and_print() {
        let nodes = root("Hello {$name}!");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], Node::Text("Hello ".into()));
        assert!(matches!(&nodes[1], Node::Print(p) if p.expr == Expr::Variable("$name".into())));
    }

    #[test]
    fn test_template_comments_are_dropped() {
        assert_eq!(root("a{* note *}b"), vec![Node::Text("ab".into())]);
    }

    #[test]
    fn test_balanced_sections() {
        let nodes = root("{if $a}x{elseif $b}y{else}z{/if}");
        let Node::If(IfNode { branches, otherwise }) = &nodes[0] else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise.as_ref().unwrap().children, vec![Node::Text("z".into())]);
    }

    #[test]
    fn test_anonymous_closing_tag() {
        assert!(matches!(root("{if $a}x{/}")[0], Node::If(_)));
    }

    #[test]
    fn test_unclosed_tag_names_expected_closer() {
        let err = parse_html("{if $a}{foreach $b as $c}").unwrap_err();
        assert_eq!(err.message(), "Unexpected end, expecting {/foreach}");
    }

    #[test]
    fn test_mismatched_closing_tag() {
        let err = parse_html("{if $a}{/foreach}").unwrap_err();
        assert_eq!(err.message(), "Unexpected {/foreach}, expecting {/if}");
        assert_eq!(err.column(), 8);

        let err = parse_html("{/if}").unwrap_err();
        assert_eq!(err.message(), "Unexpected {/if}");
    }

    #[test]
    fn test_stray_section_tag() {
        let err = parse_html("{else}").unwrap_err();
        assert_eq!(err.message(), "Unexpected {else}");
    }

    #[test]
    fn test_unknown_tag_suggestion() {
        let err = parse_html("{foreac $a as $b}{/foreach}").unwrap_err();
        assert_eq!(err.message(), "Unexpected tag {foreac}");
        assert!(err.to_string().contains("did you mean {foreach}?"));
    }

    #[test]
    fn test_policy_denies_tag() {
        let options = ParserOptions::default()
            .with_policy(Arc::new(StaticPolicy::new().allow_tags(&["="])));
        let err = parse("{do $a = 1}", &options).unwrap_err();
        assert!(err.is_security());
        assert!(parse("{$a}", &options).is_ok());
    }

    #[test]
    fn test_closest_stops_at_define() {
        let err = parse_html("{foreach $a as $b}{define x}{continueIf $b}{/define}{/foreach}")
            .unwrap_err();
        assert_eq!(err.message(), "Tag {continueIf} is unexpected here");
    }

    #[test]
    fn test_duplicate_block() {
        let err = parse_html("{block a}{/block}{define a}{/define}").unwrap_err();
        assert_eq!(err.message(), "Cannot redeclare block 'a'");
    }

    // --- HTML ---

    #[test]
    fn test_element_with_attributes() {
        let nodes = root(r#"<a href="{$url}" class=big>x</a>"#);
        let el = element(&nodes[0]);
        assert_eq!(el.name, "a");
        assert!(el.has_end_tag);
        let attrs: Vec<&Attribute> = el
            .attributes
            .children
            .iter()
            .filter_map(|n| match n {
                Node::Attribute(a) => Some(a.as_ref()),
                _ => None,
            })
            .collect();
        assert_eq!(attrs[0].name, "href");
        assert_eq!(attrs[0].quote, Some('"'));
        assert!(matches!(attrs[0].value.as_ref().unwrap().children[0], Node::Print(_)));
        assert_eq!(attrs[1].quote, None);
        assert_eq!(el.content.as_ref().unwrap().children, vec![Node::Text("x".into())]);
    }

    #[test]
    fn test_void_and_self_closing() {
        let nodes = root(r#"<br><img src="x"/><p>a</p>"#);
        assert!(element(&nodes[0]).content.is_none());
        assert!(element(&nodes[1]).content.is_none());
        assert!(element(&nodes[2]).has_end_tag);
    }

    #[test]
    fn test_implicit_close() {
        let nodes = root("<ul><li>a<li>b</ul>");
        let ul = element(&nodes[0]);
        assert!(ul.has_end_tag);
        let items = &ul.content.as_ref().unwrap().children;
        assert!(!element(&items[0]).has_end_tag);
    }

    #[test]
    fn test_element_closed_by_template_tag() {
        let nodes = root("{if $a}<p>x{/if}");
        let Node::If(node) = &nodes[0] else { panic!() };
        assert!(!element(&node.branches[0].content.children[0]).has_end_tag);
    }

    #[test]
    fn test_stray_end_tag_is_text() {
        assert_eq!(root("a</b>c"), vec![Node::Text("a</b>c".into())]);
    }

    #[test]
    fn test_comment_and_bogus() {
        let nodes = root("<!-- {$a} --><!DOCTYPE html>");
        assert!(matches!(&nodes[0], Node::HtmlComment(f) if f.children.len() == 3));
        assert_eq!(nodes[1], Node::Bogus(Fragment::new(vec![Node::Text("<!DOCTYPE html".into())])));
    }

    #[test]
    fn test_tag_inside_start_tag() {
        let nodes = root(r#"<div {if $a}class="x"{/if}>y</div>"#);
        let el = element(&nodes[0]);
        assert!(matches!(el.attributes.children[1], Node::If(_)));
    }

    #[test]
    fn test_unclosed_tag_inside_start_tag() {
        let err = parse_html("<div {if $a}>x</div>").unwrap_err();
        assert_eq!(err.message(), "Unexpected '>', expecting {/if}");
    }

    // --- n:attributes ---

    #[test]
    fn test_n_attribute_wraps_element() {
        let nodes = root(r#"<p n:if="$a" class="x">y</p>"#);
        let Node::If(node) = &nodes[0] else { panic!() };
        let p = element(&node.branches[0].content.children[0]);
        // whitespace before n:if is dropped
        assert_eq!(p.attributes.children.len(), 2);
    }

    #[test]
    fn test_n_attribute_order() {
        let nodes = root(r#"<li n:if="$x" n:foreach="$items as $x" n:inner-if="$y">z</li>"#);
        let Node::Foreach(foreach) = &nodes[0] else {
            panic!("foreach must be outermost")
        };
        let Node::If(outer_if) = &foreach.content.children[0] else { panic!() };
        let li = element(&outer_if.branches[0].content.children[0]);
        let inner = &li.content.as_ref().unwrap().children[0];
        assert!(matches!(inner, Node::If(_)));
    }

    #[test]
    fn test_tag_prefix_wraps_markup() {
        let nodes = root(r#"<a n:tag-if="$link">x</a>"#);
        let a = element(&nodes[0]);
        let Some(node) = &a.tag_node else { panic!() };
        let Node::If(node) = node.as_ref() else { panic!() };
        assert_eq!(node.branches[0].content.children, vec![Node::CapturedTag]);
    }

    #[test]
    fn test_n_attribute_errors() {
        let err = parse_html(r#"<p n:if="$a" n:if="$b"></p>"#).unwrap_err();
        assert_eq!(err.message(), "Found multiple attributes n:if");

        let err = parse_html(r#"<br n:inner-if="$a">"#).unwrap_err();
        assert!(err.message().contains("void element"));

        let err = parse_html(r#"<p n:iff="$a"></p>"#).unwrap_err();
        assert!(err.to_string().contains("did you mean n:if?"));

        let err = parse_html(r#"<p n:if="$a">x"#).unwrap_err();
        assert_eq!(err.message(), "Missing </p> for element with n:if");
    }

    #[test]
    fn test_n_attribute_position() {
        let err = parse_html(r#"<p n:if="$a +"></p>"#).unwrap_err();
        assert_eq!((err.line(), err.column()), (1, 14));
    }

    #[test]
    fn test_jump_inside_n_foreach() {
        let nodes = root(r#"<li n:foreach="$a as $b">{continueIf $b}</li>"#);
        assert!(matches!(nodes[0], Node::Foreach(_)));
    }

    // --- Protocol ---

    fn wraps_nothing(_: Tag, _: &mut TemplateParser) -> Result<TagStep, CompileError> {
        Ok(TagStep::Done(Node::Text(String::new())))
    }

    fn suspends_twice(_: Tag, _: &mut TemplateParser) -> Result<TagStep, CompileError> {
        Ok(TagStep::suspend(&[], |_, _| {
            Ok(TagStep::suspend(&[], |_, _| Ok(TagStep::Done(Node::Text(String::new())))))
        }))
    }

    fn options_with(registry: TagRegistry) -> ParserOptions {
        ParserOptions::default().with_registry(registry)
    }

    #[test]
    fn test_attribute_handler_must_suspend() {
        let mut registry = TagRegistry::with_defaults();
        registry.add_attribute("bad", wraps_nothing);
        let err = parse(r#"<p n:bad>x</p>"#, &options_with(registry)).unwrap_err();
        assert!(matches!(err, CompileError::Protocol { .. }));
    }

    #[test]
    fn test_suspend_after_closing_tag() {
        let mut registry = TagRegistry::with_defaults();
        registry.add_tag("twice", suspends_twice);
        registry.add_attribute("twice", suspends_twice);
        let options = options_with(registry);

        let err = parse("{twice}a{/twice}", &options).unwrap_err();
        assert!(matches!(err, CompileError::Protocol { .. }));
        let err = parse("<p n:twice>a</p>", &options).unwrap_err();
        assert!(matches!(err, CompileError::Protocol { .. }));
        let err = parse("{twice /}", &options).unwrap_err();
        assert!(matches!(err, CompileError::Protocol { .. }));
    }

    #[test]
    fn test_content_type_tag_sets_template_type() {
        let template = parse_html("{contentType xml}<a/>").unwrap();
        assert_eq!(template.content_type, ContentType::Xml);
    }
}
