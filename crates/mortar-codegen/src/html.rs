//! Markup generation.
//!
//! Walks fragments, printing static markup as text and moving the escaper
//! through the document structure. Tag nodes are handed to `tags`.

use mortar_parser::ast::{Attribute, Element, Fragment, Node};
use mortar_parser::CompileError;

use crate::context::{CapturedTag, CompilationContext};
use crate::tags;

/// Generate code for every node of a fragment.
pub fn generate(fragment: &Fragment, ctx: &mut CompilationContext) -> Result<(), CompileError> {
    for node in &fragment.children {
        generate_node(node, ctx)?;
    }
    Ok(())
}

pub fn generate_node(node: &Node, ctx: &mut CompilationContext) -> Result<(), CompileError> {
    match node {
        Node::Text(text) => {
            ctx.text(text);
            Ok(())
        }
        Node::Element(element) => generate_element(element, ctx),
        Node::Attribute(attribute) => generate_attribute(attribute, ctx),
        Node::CapturedTag => generate_captured(ctx),
        Node::HtmlComment(content) => {
            ctx.text("<!--");
            ctx.escaper.enter_comment();
            generate(content, ctx)?;
            ctx.escaper.enter_text();
            ctx.text("-->");
            Ok(())
        }
        Node::Bogus(content) => {
            ctx.escaper.enter_bogus();
            generate(content, ctx)?;
            ctx.escaper.enter_text();
            ctx.text(">");
            Ok(())
        }
        Node::Print(node) => tags::generate_print(node, ctx),
        Node::If(node) => tags::generate_if(node, ctx),
        Node::Foreach(node) => tags::generate_foreach(node, ctx),
        Node::For(node) => tags::generate_for(node, ctx),
        Node::While(node) => tags::generate_while(node, ctx),
        Node::Switch(node) => tags::generate_switch(node, ctx),
        Node::Jump(node) => tags::generate_jump(node, ctx),
        Node::Try(node) => tags::generate_try(node, ctx),
        Node::Rollback(position) => {
            ctx.line(format!("throw new MR\\RollbackException /* line {} */;", position.line));
            Ok(())
        }
        Node::Block(node) => tags::generate_block(node, ctx),
        Node::Define(node) => tags::generate_define(node, ctx),
        Node::Include(node) => tags::generate_include(node, ctx),
        Node::Var(node) => tags::generate_var(node, ctx),
        Node::Default(node) => tags::generate_default(node, ctx),
        Node::Do(node) => {
            ctx.line(format!(
                "{} /* line {} */;",
                crate::printer::print_expr(&node.expr),
                node.position.line
            ));
            Ok(())
        }
        Node::Capture(node) => tags::generate_capture(node, ctx),
        Node::ContentType(node) => tags::generate_content_type(node, ctx),
        Node::IterationMarker(node) => tags::generate_iteration_marker(node, ctx),
    }
}

fn generate_element(element: &Element, ctx: &mut CompilationContext) -> Result<(), CompileError> {
    match &element.tag_node {
        Some(node) => wrapped(element, false, node, ctx)?,
        None => generate_start_tag(element, ctx)?,
    }

    if let Some(content) = &element.content {
        let type_attr = static_attribute(element, "type");
        ctx.escaper.enter_content(&element.name, type_attr.as_deref());
        generate(content, ctx)?;
        ctx.escaper.enter_text();
    }

    if element.has_end_tag {
        match &element.tag_node {
            Some(node) => wrapped(element, true, node, ctx)?,
            None => ctx.text(&format!("</{}>", element.name)),
        }
    }
    Ok(())
}

/// Generate the `n:tag-` node around one of the element's tags.
fn wrapped(
    element: &Element,
    end: bool,
    node: &Node,
    ctx: &mut CompilationContext,
) -> Result<(), CompileError> {
    ctx.captured.push(CapturedTag {
        element: Element {
            content: None,
            tag_node: None,
            ..element.clone()
        },
        end,
    });
    let result = generate_node(node, ctx);
    ctx.captured.pop();
    result
}

fn generate_captured(ctx: &mut CompilationContext) -> Result<(), CompileError> {
    let Some(captured) = ctx.captured.last().cloned() else {
        return Ok(());
    };
    if captured.end {
        ctx.text(&format!("</{}>", captured.element.name));
        Ok(())
    } else {
        generate_start_tag(&captured.element, ctx)
    }
}

fn generate_start_tag(element: &Element, ctx: &mut CompilationContext) -> Result<(), CompileError> {
    ctx.text(&format!("<{}", element.name));
    ctx.escaper.enter_tag(&element.name);
    generate(&element.attributes, ctx)?;
    ctx.escaper.enter_text();
    ctx.text(if element.self_closing { "/>" } else { ">" });
    Ok(())
}

fn generate_attribute(attribute: &Attribute, ctx: &mut CompilationContext) -> Result<(), CompileError> {
    ctx.text(&attribute.name);
    let Some(value) = &attribute.value else {
        return Ok(());
    };

    let quote = attribute.quote.map(String::from).unwrap_or_default();
    ctx.text(&format!("={quote}"));
    ctx.escaper.enter_attribute(&attribute.name, attribute.quote);
    generate(value, ctx)?;
    ctx.escaper.leave_attribute();
    ctx.text(&quote);
    Ok(())
}

/// Value of an attribute written as plain text, such as `type="module"`.
fn static_attribute(element: &Element, name: &str) -> Option<String> {
    element.attributes.children.iter().find_map(|node| match node {
        Node::Attribute(attr) if attr.name.eq_ignore_ascii_case(name) => {
            let value = attr.value.as_ref()?;
            value
                .children
                .iter()
                .map(|n| match n {
                    Node::Text(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect::<Option<String>>()
        }
        _ => None,
    })
}
