//! Printing, variables and other single-tag statements.

use mortar_lexer::ContentType;

use crate::ast::{ContentTypeNode, DoNode, Expr, Node, PrintNode, VarNode};
use crate::expr_lexer::ExprKind;
use crate::parser::TemplateParser;
use crate::tag::{Tag, TagStep};
use crate::CompileError;

/// `{= expr|filters}`, also reached by `{$var}` and other bare expressions.
pub fn print_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let (expr, filters) = p.parse_filtered()?;
    p.expect_end()?;
    Ok(TagStep::Done(Node::Print(PrintNode {
        expr,
        filters,
        position: tag.position,
    })))
}

/// `{var $a = 1, $b = 2}` and `{default ...}`, which only assigns unset variables.
pub fn var_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let mut assignments = Vec::new();
    loop {
        let name = p.expect(ExprKind::Variable, "variable")?.text;
        let value = if p.try_consume(ExprKind::Assign).is_some() {
            p.parse_expression()?
        } else {
            Expr::Constant("null".into())
        };
        assignments.push((name, value));
        if p.try_consume(ExprKind::Comma).is_none() {
            break;
        }
    }
    p.expect_end()?;

    let node = VarNode {
        assignments,
        position: tag.position,
    };
    Ok(TagStep::Done(if tag.name == "default" {
        Node::Default(node)
    } else {
        Node::Var(node)
    }))
}

/// `{do expr}` evaluates without printing.
pub fn do_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let expr = p.parse_expression()?;
    p.expect_end()?;
    Ok(TagStep::Done(Node::Do(DoNode {
        expr,
        position: tag.position,
    })))
}

/// `{contentType html}`, `{contentType application/json}` or a runtime
/// `{contentType $type}`. At top level it also sets the template's type.
pub fn content_type_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let position = tag.position;

    if tag.args.starts_with('$') {
        let mut p = parser.expression(&tag)?;
        let dynamic = p.parse_expression()?;
        p.expect_end()?;
        return Ok(TagStep::Done(Node::ContentType(ContentTypeNode {
            content_type: None,
            dynamic: Some(dynamic),
            position,
        })));
    }

    let value = tag.args.trim_matches(|c| c == '\'' || c == '"');
    let Some(content_type) = ContentType::from_mime(value) else {
        return Err(CompileError::syntax(
            format!("Unknown content type '{value}'"),
            tag.args_position,
        ));
    };
    if parser.is_top_level() {
        parser.set_content_type(content_type);
    }
    log::debug!("content type switched to {content_type} at {position}");
    Ok(TagStep::Done(Node::ContentType(ContentTypeNode {
        content_type: Some(content_type),
        dynamic: None,
        position,
    })))
}

/// `{l}` and `{r}` print literal braces.
pub fn delimiter_tag(tag: Tag, _: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_no_args()?;
    let brace = if tag.name == "l" { "{" } else { "}" };
    Ok(TagStep::Done(Node::Text(brace.to_string())))
}
