//! Loops and the tags that only make sense inside them.

use crate::ast::{
    Expr, ForNode, ForeachNode, IterationMarker, IterationMarkerNode, JumpKind, JumpNode, Node,
    WhileNode,
};
use crate::expr_lexer::ExprKind;
use crate::parser::TemplateParser;
use crate::tag::{Tag, TagStep};
use crate::tags::{content_only, with_else};
use crate::CompileError;

/// `{foreach $items as [$key =>] $value}` with optional `{else}`.
pub fn foreach_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let mut expr = p.parse_expression()?;
    for filter in p.parse_filters()? {
        expr = Expr::Filter {
            expr: Box::new(expr),
            filter,
        };
    }
    if !p.try_word("as") {
        return Err(CompileError::syntax(
            format!("Missing 'as' in {}", tag.display()),
            p.position(),
        ));
    }

    let first = p.parse_expression()?;
    let (key, value) = if p.try_consume(ExprKind::DoubleArrow).is_some() {
        (Some(first), p.parse_expression()?)
    } else {
        (None, first)
    };
    p.expect_end()?;
    if !value.is_assignable() || key.as_ref().is_some_and(|k| !k.is_assignable()) {
        return Err(tag.error(format!("Cannot assign to loop variable in {}", tag.display())));
    }

    let position = tag.position;
    Ok(with_else(&tag, move |content, otherwise| {
        Node::Foreach(ForeachNode {
            expr,
            key,
            value,
            content,
            otherwise,
            position,
        })
    }))
}

/// `{for init; condition; step}`
pub fn for_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let init = p.parse_expressions(Some(ExprKind::Semicolon))?;
    p.expect(ExprKind::Semicolon, "';'")?;
    let condition = p.parse_expressions(Some(ExprKind::Semicolon))?;
    p.expect(ExprKind::Semicolon, "';'")?;
    let step = p.parse_expressions(None)?;
    p.expect_end()?;

    let position = tag.position;
    Ok(content_only(move |content| {
        Node::For(ForNode {
            init,
            condition,
            step,
            content,
            position,
        })
    }))
}

/// `{while $cond}...{/while}` or `{while}...{/while $cond}`.
pub fn while_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    let position = tag.position;

    if tag.args.is_empty() && !tag.is_attribute() {
        return Ok(TagStep::suspend(&[], move |section, parser| {
            let end = match section.end {
                Some(end) if !end.args.is_empty() => end,
                Some(end) => return Err(end.error("Missing condition in {/while}")),
                None => return Err(CompileError::syntax("Missing condition in {while}", position)),
            };
            let mut p = parser.expression(&end)?;
            let condition = p.parse_expression()?;
            p.expect_end()?;
            Ok(TagStep::Done(Node::While(WhileNode {
                condition,
                content: section.content,
                do_while: true,
                position,
            })))
        }));
    }

    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let condition = p.parse_expression()?;
    p.expect_end()?;
    Ok(TagStep::suspend(&[], move |section, _| {
        if let Some(end) = &section.end {
            end.expect_no_args()?;
        }
        Ok(TagStep::Done(Node::While(WhileNode {
            condition,
            content: section.content,
            do_while: false,
            position,
        })))
    }))
}

/// `{continueIf}`, `{breakIf}` and `{skipIf}`.
pub fn jump_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    let kind = match tag.name.as_str() {
        "breakIf" => JumpKind::Break,
        "skipIf" => JumpKind::Skip,
        _ => JumpKind::Continue,
    };
    let loops: &[&str] = match kind {
        JumpKind::Skip => &["foreach"],
        _ => &["foreach", "for", "while"],
    };
    let Some(within) = parser.closest(loops) else {
        return Err(tag.error(format!("Tag {} is unexpected here", tag.display())));
    };

    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let condition = p.parse_expression()?;
    p.expect_end()?;
    Ok(TagStep::Done(Node::Jump(JumpNode {
        kind,
        condition,
        within,
        position: tag.position,
    })))
}

/// `{first}`, `{last}` and `{sep}`, with an optional group width.
pub fn iteration_marker_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    let marker = match tag.name.as_str() {
        "first" => IterationMarker::First,
        "last" => IterationMarker::Last,
        _ => IterationMarker::Sep,
    };
    if parser.closest(&["foreach"]).is_none() {
        return Err(tag.error(format!("Tag {} must be inside {{foreach}}", tag.display())));
    }

    let width = if tag.args.is_empty() {
        None
    } else {
        let mut p = parser.expression(&tag)?;
        let width = p.parse_expression()?;
        p.expect_end()?;
        Some(width)
    };

    let position = tag.position;
    Ok(with_else(&tag, move |content, otherwise| {
        Node::IterationMarker(IterationMarkerNode {
            marker,
            width,
            content,
            otherwise,
            position,
        })
    }))
}
