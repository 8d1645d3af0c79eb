//! Blocks, includes, captures and `{try}`.

use crate::ast::{
    BlockNode, CaptureNode, DefineNode, Expr, IncludeNode, IncludeTarget, Node, TryNode,
};
use crate::expr_lexer::ExprKind;
use crate::expr_parser::ExprParser;
use crate::parser::TemplateParser;
use crate::tag::{Tag, TagStep};
use crate::tags::{content_only, with_else};
use crate::CompileError;

/// `{block [name] [|filters]}`. Anonymous blocks only apply filters.
pub fn block_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    let mut p = parser.expression(&tag)?;
    let name = if p.peek_kind_at(0) == Some(ExprKind::Identifier) {
        Some(p.parse_name()?)
    } else {
        None
    };
    let filters = p.parse_filters()?;
    p.expect_end()?;
    if let Some(name) = &name {
        parser.declare_block(name, tag.position)?;
    }

    let position = tag.position;
    Ok(content_only(move |content| {
        Node::Block(BlockNode {
            name,
            filters,
            content,
            position,
        })
    }))
}

/// `{define name, $param = default, ...}`
pub fn define_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let name = p.parse_name()?;
    let mut params = Vec::new();
    if p.try_consume(ExprKind::Comma).is_some() {
        loop {
            params.push(p.parse_param()?);
            if p.try_consume(ExprKind::Comma).is_none() {
                break;
            }
        }
    }
    p.expect_end()?;
    parser.declare_block(&name, tag.position)?;

    let position = tag.position;
    Ok(content_only(move |content| {
        Node::Define(DefineNode {
            name,
            params,
            content,
            position,
        })
    }))
}

/// `{include [block|file] target [, args] [|filters]}`
///
/// A bare name or the `block` keyword names a block; a string or the
/// `file` keyword names a template.
pub fn include_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;

    let target = if p.try_word("block") {
        IncludeTarget::Block(block_name(&mut p)?)
    } else if p.try_word("file") {
        IncludeTarget::File(p.parse_expression()?)
    } else if p.peek_kind_at(0) == Some(ExprKind::Identifier)
        && matches!(
            p.peek_kind_at(1),
            None | Some(ExprKind::Comma) | Some(ExprKind::Pipe)
        )
    {
        IncludeTarget::Block(block_name(&mut p)?)
    } else {
        IncludeTarget::File(p.parse_expression()?)
    };

    let args = if p.try_consume(ExprKind::Comma).is_some() {
        p.parse_items()?
    } else {
        Vec::new()
    };
    let filters = p.parse_filters()?;
    p.expect_end()?;

    Ok(TagStep::Done(Node::Include(IncludeNode {
        target,
        args,
        filters,
        position: tag.position,
    })))
}

/// Bare block names become string literals.
fn block_name(p: &mut ExprParser) -> Result<Expr, CompileError> {
    if p.peek_kind_at(0) == Some(ExprKind::Identifier) {
        let name = p.parse_name()?;
        return Ok(Expr::Literal(format!("'{name}'")));
    }
    p.parse_expression()
}

/// `{capture $var [|filters]}`
pub fn capture_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let target = p.parse_expression()?;
    if !target.is_assignable() {
        return Err(CompileError::syntax(
            format!("Cannot capture into this expression in {}", tag.display()),
            tag.args_position,
        ));
    }
    let filters = p.parse_filters()?;
    p.expect_end()?;

    let position = tag.position;
    Ok(content_only(move |content| {
        Node::Capture(CaptureNode {
            target,
            filters,
            content,
            position,
        })
    }))
}

/// `{try}` with optional `{else}`.
pub fn try_tag(tag: Tag, _: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_no_args()?;
    let position = tag.position;
    Ok(with_else(&tag, move |body, otherwise| {
        Node::Try(TryNode {
            body,
            otherwise,
            position,
        })
    }))
}

/// `{rollback}` abandons the enclosing `{try}`.
pub fn rollback_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    if parser.closest(&["try"]).is_none() {
        return Err(tag.error("Tag {rollback} must be inside {try} ... {/try}"));
    }
    tag.expect_no_args()?;
    Ok(TagStep::Done(Node::Rollback(tag.position)))
}
