//! Built-in tags.
//!
//! Each handler parses its arguments with the expression parser and
//! suspends for as many sections as the tag has.

pub mod blocks;
pub mod conditions;
pub mod loops;
pub mod output;

use crate::ast::{Fragment, Node};
use crate::registry::TagRegistry;
use crate::tag::{Tag, TagStep};

pub fn register_defaults(registry: &mut TagRegistry) {
    registry
        .add_tag("=", output::print_tag)
        .add_tag("var", output::var_tag)
        .add_tag("default", output::var_tag)
        .add_tag("do", output::do_tag)
        .add_tag("contentType", output::content_type_tag)
        .add_tag("l", output::delimiter_tag)
        .add_tag("r", output::delimiter_tag)
        .add_tag("if", conditions::if_tag)
        .add_tag("ifset", conditions::if_tag)
        .add_tag("switch", conditions::switch_tag)
        .add_tag("else", conditions::misplaced_tag)
        .add_tag("elseif", conditions::misplaced_tag)
        .add_tag("elseifset", conditions::misplaced_tag)
        .add_tag("case", conditions::misplaced_tag)
        .add_tag("foreach", loops::foreach_tag)
        .add_tag("for", loops::for_tag)
        .add_tag("while", loops::while_tag)
        .add_tag("continueIf", loops::jump_tag)
        .add_tag("breakIf", loops::jump_tag)
        .add_tag("skipIf", loops::jump_tag)
        .add_tag("first", loops::iteration_marker_tag)
        .add_tag("last", loops::iteration_marker_tag)
        .add_tag("sep", loops::iteration_marker_tag)
        .add_tag("block", blocks::block_tag)
        .add_tag("define", blocks::define_tag)
        .add_tag("include", blocks::include_tag)
        .add_tag("capture", blocks::capture_tag)
        .add_tag("try", blocks::try_tag)
        .add_tag("rollback", blocks::rollback_tag);

    // Several attributes on one element open in this order, outermost first.
    registry
        .add_attribute("block", blocks::block_tag)
        .add_attribute("capture", blocks::capture_tag)
        .add_attribute("foreach", loops::foreach_tag)
        .add_attribute("for", loops::for_tag)
        .add_attribute("while", loops::while_tag)
        .add_attribute("first", loops::iteration_marker_tag)
        .add_attribute("last", loops::iteration_marker_tag)
        .add_attribute("sep", loops::iteration_marker_tag)
        .add_attribute("ifset", conditions::if_tag)
        .add_attribute("if", conditions::if_tag)
        .add_attribute("try", blocks::try_tag);
}

/// Suspend for a single section and build the node from its content.
pub(crate) fn content_only(build: impl FnOnce(Fragment) -> Node + 'static) -> TagStep {
    TagStep::suspend(&[], move |section, _| Ok(TagStep::Done(build(section.content))))
}

/// Suspend for the content and an optional `{else}` section. Attribute forms
/// have no `{else}`.
pub(crate) fn with_else(
    tag: &Tag,
    build: impl FnOnce(Fragment, Option<Fragment>) -> Node + 'static,
) -> TagStep {
    if tag.is_attribute() {
        return TagStep::suspend(&[], move |section, _| {
            Ok(TagStep::Done(build(section.content, None)))
        });
    }
    TagStep::suspend(&["else"], move |section, _| match section.end {
        Some(end) if !end.closing => {
            end.expect_no_args()?;
            let content = section.content;
            Ok(TagStep::suspend(&[], move |section, _| {
                Ok(TagStep::Done(build(content, Some(section.content))))
            }))
        }
        _ => Ok(TagStep::Done(build(section.content, None))),
    })
}
