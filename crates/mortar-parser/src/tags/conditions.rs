//! `{if}`, `{ifset}` and `{switch}`.

use mortar_lexer::Position;

use crate::ast::{Expr, IfBranch, IfNode, Node, SwitchCase, SwitchNode};
use crate::parser::TemplateParser;
use crate::tag::{Section, Tag, TagStep};
use crate::CompileError;

const IF_ENDS: &[&str] = &["elseif", "elseifset", "else"];
const SWITCH_ENDS: &[&str] = &["case", "default"];

/// `{if}` / `{ifset}` and their attribute forms.
pub fn if_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    let condition = parse_condition(&tag, parser)?;
    let position = tag.position;

    if tag.is_attribute() {
        return Ok(TagStep::suspend(&[], move |section, _| {
            Ok(TagStep::Done(Node::If(IfNode {
                branches: vec![IfBranch {
                    condition,
                    content: section.content,
                    position,
                }],
                otherwise: None,
            })))
        }));
    }

    let node = IfNode {
        branches: Vec::new(),
        otherwise: None,
    };
    Ok(TagStep::suspend(IF_ENDS, move |section, parser| {
        next_branch(node, condition, position, section, parser)
    }))
}

fn next_branch(
    mut node: IfNode,
    condition: Expr,
    position: Position,
    section: Section,
    parser: &mut TemplateParser,
) -> Result<TagStep, CompileError> {
    node.branches.push(IfBranch {
        condition,
        content: section.content,
        position,
    });

    let Some(end) = section.end.filter(|end| !end.closing) else {
        return Ok(TagStep::Done(Node::If(node)));
    };
    if end.name == "else" {
        end.expect_no_args()?;
        return Ok(TagStep::suspend(&[], move |section, _| {
            node.otherwise = Some(section.content);
            Ok(TagStep::Done(Node::If(node)))
        }));
    }

    let condition = parse_condition(&end, parser)?;
    Ok(TagStep::suspend(IF_ENDS, move |section, parser| {
        next_branch(node, condition, end.position, section, parser)
    }))
}

/// `{ifset}` tests its arguments with `isset()`.
fn parse_condition(tag: &Tag, parser: &TemplateParser) -> Result<Expr, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(tag)?;
    let condition = if tag.name.ends_with("ifset") {
        Expr::Isset(p.parse_expressions(None)?)
    } else {
        p.parse_expression()?
    };
    p.expect_end()?;
    Ok(condition)
}

/// `{switch}` with `{case}` and `{default}` sections.
pub fn switch_tag(tag: Tag, parser: &mut TemplateParser) -> Result<TagStep, CompileError> {
    tag.expect_args()?;
    let mut p = parser.expression(&tag)?;
    let subject = p.parse_expression()?;
    p.expect_end()?;

    let node = SwitchNode {
        subject,
        cases: Vec::new(),
        default: None,
        position: tag.position,
    };
    Ok(TagStep::suspend(SWITCH_ENDS, move |section, parser| {
        if !section.content.is_blank() {
            return Err(CompileError::syntax(
                "Unexpected text before {case}",
                node.position,
            ));
        }
        next_case(node, section.end, parser)
    }))
}

fn next_case(
    mut node: SwitchNode,
    end: Option<Tag>,
    parser: &mut TemplateParser,
) -> Result<TagStep, CompileError> {
    let Some(end) = end.filter(|end| !end.closing) else {
        return Ok(TagStep::Done(Node::Switch(node)));
    };

    if end.name == "default" {
        if node.default.is_some() {
            return Err(end.error("Tag {switch} may only contain one {default} clause"));
        }
        end.expect_no_args()?;
        return Ok(TagStep::suspend(SWITCH_ENDS, move |section, parser| {
            node.default = Some(section.content);
            next_case(node, section.end, parser)
        }));
    }

    end.expect_args()?;
    let mut p = parser.expression(&end)?;
    let values = p.parse_expressions(None)?;
    p.expect_end()?;
    let position = end.position;
    Ok(TagStep::suspend(SWITCH_ENDS, move |section, parser| {
        node.cases.push(SwitchCase {
            values,
            content: section.content,
            position,
        });
        next_case(node, section.end, parser)
    }))
}

/// Section tags used outside of the tag they belong to.
pub fn misplaced_tag(tag: Tag, _: &mut TemplateParser) -> Result<TagStep, CompileError> {
    Err(tag.error(format!("Unexpected {}", tag.display())))
}
