//! Mutable state threaded through code generation.

use mortar_lexer::{ContentType, Position};
use mortar_parser::ast::{Element, Param};
use mortar_parser::CompileError;

use crate::escaper::Escaper;

/// An auxiliary method generated for a `{block}` or `{define}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMethod {
    pub name: String,
    pub method: String,
    /// Tag that declared the block, used in the method's doc comment.
    pub tag: String,
    pub position: Position,
    /// `{define}` parameters, bound from positional or named arguments.
    pub params: Vec<Param>,
    pub body: String,
}

/// Markup of an element wrapped by `n:tag-` attributes, printed when the
/// wrapping node reaches its `CapturedTag` placeholder.
#[derive(Debug, Clone)]
pub struct CapturedTag {
    pub element: Element,
    pub end: bool,
}

/// Shared state of one compile: escaping position, output buffer, block
/// registry and the counter for temporary variable names.
pub struct CompilationContext {
    pub escaper: Escaper,
    pub blocks: Vec<BlockMethod>,
    pub captured: Vec<CapturedTag>,
    next_id: usize,
    out: String,
    indent: usize,
    /// Static text not yet flushed into an `echo`.
    pending: String,
}

impl CompilationContext {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            escaper: Escaper::new(content_type),
            blocks: Vec::new(),
            captured: Vec::new(),
            next_id: 0,
            out: String::new(),
            indent: 2,
            pending: String::new(),
        }
    }

    /// Unique suffix for temporary variables.
    pub fn assign_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    /// Queue static output; adjacent text ends up in one `echo`.
    pub fn text(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Emit one statement line.
    pub fn line(&mut self, code: impl AsRef<str>) {
        self.flush();
        self.push_line(code.as_ref());
    }

    /// Emit `header {` and indent.
    pub fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.indent += 1;
    }

    /// Close the current brace and open the next one: `} else {`.
    pub fn reopen(&mut self, header: impl AsRef<str>) {
        self.flush();
        self.indent -= 1;
        self.push_line(&format!("}} {} {{", header.as_ref()));
        self.indent += 1;
    }

    /// Emit `}` (or `}` followed by `tail`) and dedent.
    pub fn close(&mut self, tail: &str) {
        self.flush();
        self.indent -= 1;
        self.push_line(&format!("}}{tail}"));
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        self.push_line(&format!("echo {};", php_string(&text)));
    }

    fn push_line(&mut self, code: &str) {
        for _ in 0..self.indent {
            self.out.push('\t');
        }
        self.out.push_str(code);
        self.out.push('\n');
    }

    /// Generate code into a fresh method body and return it. The escaping
    /// position is restored afterwards.
    pub fn isolated<F>(&mut self, build: F) -> Result<String, CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        let escaper = self.escaper.clone();
        let out = std::mem::take(&mut self.out);
        let pending = std::mem::take(&mut self.pending);
        let indent = std::mem::replace(&mut self.indent, 2);

        let result = build(self);
        self.flush();

        let body = std::mem::replace(&mut self.out, out);
        self.pending = pending;
        self.indent = indent;
        self.escaper = escaper;
        result.map(|()| body)
    }

    /// Finish and return the main body.
    pub fn finish(mut self) -> (String, Vec<BlockMethod>) {
        self.flush();
        (self.out, self.blocks)
    }

    /// Register a block method, deriving a unique method name.
    pub fn add_block(
        &mut self,
        name: &str,
        tag: &str,
        position: Position,
        params: Vec<Param>,
        body: String,
    ) -> String {
        let mut method = method_name(name);
        if self.blocks.iter().any(|b| b.method == method) {
            method = format!("{method}_{}", self.assign_id());
        }
        log::trace!("block '{name}' generated as {method}()");
        self.blocks.push(BlockMethod {
            name: name.to_string(),
            method: method.clone(),
            tag: tag.to_string(),
            position,
            params,
            body,
        });
        method
    }
}

/// `content` → `blockContent`, `side-menu` → `blockSide_menu`.
fn method_name(block: &str) -> String {
    let mut chars = block.chars();
    let mut name = String::from("block");
    if let Some(first) = chars.next() {
        name.extend(first.to_uppercase());
    }
    name.extend(chars.map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }));
    name
}

/// PHP string literal. Single quotes unless the text holds control characters.
pub fn php_string(text: &str) -> String {
    if text.contains(['\n', '\r', '\t']) {
        let mut out = String::with_capacity(text.len() + 2);
        out.push('"');
        for c in text.chars() {
            match c {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '$' => out.push_str("\\$"),
                c => out.push(c),
            }
        }
        out.push('"');
        out
    } else {
        format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_php_string() {
        assert_eq!(php_string("it's"), "'it\\'s'");
        assert_eq!(php_string("a\\b"), "'a\\\\b'");
        assert_eq!(php_string("<p>\n\t$x</p>"), "\"<p>\\n\\t\\$x</p>\"");
    }

    #[test]
    fn test_adjacent_text_is_merged() {
        let mut ctx = CompilationContext::new(ContentType::Html);
        ctx.text("<p>");
        ctx.text("hi</p>");
        ctx.open("if ($a)");
        ctx.text("x");
        ctx.close("");
        let (body, _) = ctx.finish();
        assert_eq!(
            body,
            "\t\techo '<p>hi</p>';\n\t\tif ($a) {\n\t\t\techo 'x';\n\t\t}\n"
        );
    }

    #[test]
    fn test_isolated_body() {
        let mut ctx = CompilationContext::new(ContentType::Html);
        ctx.text("a");
        let body = ctx
            .isolated(|ctx| {
                ctx.text("b");
                ctx.escaper.enter_comment();
                Ok(())
            })
            .unwrap();
        assert_eq!(body, "\t\techo 'b';\n");
        assert_eq!(ctx.escaper, Escaper::new(ContentType::Html));
        assert_eq!(ctx.finish().0, "\t\techo 'a';\n");
    }

    #[test]
    fn test_block_method_names() {
        let mut ctx = CompilationContext::new(ContentType::Html);
        let mut add = |name: &str| ctx.add_block(name, "block", Position::default(), vec![], String::new());
        assert_eq!(add("content"), "blockContent");
        assert_eq!(add("side-menu"), "blockSide_menu");
        assert_eq!(add("side_menu"), "blockSide_menu_1");
    }
}
