//! PHP generation for tag nodes.

use mortar_lexer::Position;
use mortar_parser::ast::{
    AssignOp, BlockNode, CaptureNode, ContentTypeNode, DefineNode, Expr, FilterCall, ForNode,
    ForeachNode, IfNode, IncludeNode, IncludeTarget, IterationMarker, IterationMarkerNode,
    JumpKind, JumpNode, PrintNode, SwitchNode, TryNode, VarNode, WhileNode,
};
use mortar_parser::CompileError;

use crate::context::{php_string, CompilationContext};
use crate::html::generate;
use crate::printer::{apply_filter, print_expr, print_items};

type Result<T = ()> = std::result::Result<T, CompileError>;

/// `{$expr|filters}`
pub fn generate_print(node: &PrintNode, ctx: &mut CompilationContext) -> Result {
    let code = escape_output(print_expr(&node.expr), &node.filters, node.position, ctx)?;
    ctx.line(format!("echo {code} /* line {} */;", node.position.line));
    Ok(())
}

/// Apply filters, the URL check and the escaper to printed code.
fn escape_output(
    mut code: String,
    filters: &[FilterCall],
    at: Position,
    ctx: &CompilationContext,
) -> Result<String> {
    let mut escape = true;
    let mut check_url = true;
    for filter in filters {
        match filter.name.as_str() {
            "noescape" => escape = false,
            "nocheck" => check_url = false,
            "datastream" | "dataStream" => {
                check_url = false;
                code = apply_filter(code, filter);
            }
            _ => code = apply_filter(code, filter),
        }
    }
    if check_url && ctx.escaper.is_url() {
        code = format!("MR\\Filters::safeUrl({code})");
    }
    if escape {
        code = ctx.escaper.escape(&code, at)?;
    }
    Ok(code)
}

/// Filters applied to captured output; the escaping flags make no sense there.
fn content_filters(code: &str, filters: &[FilterCall]) -> String {
    filters
        .iter()
        .filter(|f| !matches!(f.name.as_str(), "noescape" | "nocheck"))
        .fold(code.to_string(), apply_filter)
}

/// Run `build` with its output buffered and passed through `filters`.
fn filtered<F>(ctx: &mut CompilationContext, filters: &[FilterCall], line: usize, build: F) -> Result
where
    F: FnOnce(&mut CompilationContext) -> Result,
{
    if filters.is_empty() {
        return build(ctx);
    }
    ctx.line("ob_start(fn() => '');");
    ctx.open(format!("try /* line {line} */"));
    build(ctx)?;
    ctx.reopen("finally");
    ctx.line(format!("echo {};", content_filters("ob_get_clean()", filters)));
    ctx.close("");
    Ok(())
}

pub fn generate_if(node: &IfNode, ctx: &mut CompilationContext) -> Result {
    for (i, branch) in node.branches.iter().enumerate() {
        let header = format!(
            "if ({}) /* line {} */",
            print_expr(&branch.condition),
            branch.position.line
        );
        if i == 0 {
            ctx.open(header);
        } else {
            ctx.reopen(format!("else{header}"));
        }
        generate(&branch.content, ctx)?;
    }
    if let Some(otherwise) = &node.otherwise {
        ctx.reopen("else");
        generate(otherwise, ctx)?;
    }
    ctx.close("");
    Ok(())
}

/// Loops run over `MR\CachingIterator`, exposed to the template as `$iterator`.
pub fn generate_foreach(node: &ForeachNode, ctx: &mut CompilationContext) -> Result {
    let target = match &node.key {
        Some(key) => format!("{} => {}", print_expr(key), print_expr(&node.value)),
        None => print_expr(&node.value),
    };
    let empty = node.otherwise.as_ref().map(|_| format!("$__empty{}", ctx.assign_id()));

    if let Some(flag) = &empty {
        ctx.line(format!("{flag} = true;"));
    }
    ctx.open(format!(
        "foreach ($iterator = $__it = new MR\\CachingIterator({}, $__it ?? null) as {target}) /* line {} */",
        print_expr(&node.expr),
        node.position.line
    ));
    if let Some(flag) = &empty {
        ctx.line(format!("{flag} = false;"));
    }
    generate(&node.content, ctx)?;
    ctx.close("");
    ctx.line("$iterator = $__it = $__it->getParent();");

    if let (Some(flag), Some(otherwise)) = (&empty, &node.otherwise) {
        ctx.open(format!("if ({flag})"));
        generate(otherwise, ctx)?;
        ctx.close("");
    }
    Ok(())
}

pub fn generate_for(node: &ForNode, ctx: &mut CompilationContext) -> Result {
    let list = |exprs: &[Expr]| exprs.iter().map(print_expr).collect::<Vec<_>>().join(", ");
    ctx.open(format!(
        "for ({}; {}; {}) /* line {} */",
        list(&node.init),
        list(&node.condition),
        list(&node.step),
        node.position.line
    ));
    generate(&node.content, ctx)?;
    ctx.close("");
    Ok(())
}

pub fn generate_while(node: &WhileNode, ctx: &mut CompilationContext) -> Result {
    let condition = print_expr(&node.condition);
    let line = node.position.line;
    if node.do_while {
        ctx.open(format!("do /* line {line} */"));
        generate(&node.content, ctx)?;
        ctx.close(&format!(" while ({condition});"));
    } else {
        ctx.open(format!("while ({condition}) /* line {line} */"));
        generate(&node.content, ctx)?;
        ctx.close("");
    }
    Ok(())
}

/// `{switch}` compares strictly, case by case, with `{default}` last.
pub fn generate_switch(node: &SwitchNode, ctx: &mut CompilationContext) -> Result {
    let subject = format!("$__switch{}", ctx.assign_id());
    ctx.line(format!(
        "{subject} = {} /* line {} */;",
        print_expr(&node.subject),
        node.position.line
    ));

    if node.cases.is_empty() {
        if let Some(default) = &node.default {
            generate(default, ctx)?;
        }
        return Ok(());
    }

    for (i, case) in node.cases.iter().enumerate() {
        let values = case.values.iter().map(print_expr).collect::<Vec<_>>().join(", ");
        let header = format!(
            "if (in_array({subject}, [{values}], true)) /* line {} */",
            case.position.line
        );
        if i == 0 {
            ctx.open(header);
        } else {
            ctx.reopen(format!("else{header}"));
        }
        generate(&case.content, ctx)?;
    }
    if let Some(default) = &node.default {
        ctx.reopen("else");
        generate(default, ctx)?;
    }
    ctx.close("");
    Ok(())
}

pub fn generate_jump(node: &JumpNode, ctx: &mut CompilationContext) -> Result {
    let header = format!(
        "if ({}) /* line {} */",
        print_expr(&node.condition),
        node.position.line
    );
    match node.kind {
        JumpKind::Continue => ctx.line(format!("{header} continue;")),
        JumpKind::Break => ctx.line(format!("{header} break;")),
        JumpKind::Skip => {
            ctx.open(header);
            ctx.line("$__it->skipRound();");
            ctx.line("continue;");
            ctx.close("");
        }
    }
    Ok(())
}

/// `{try}` buffers its body; an exception or `{rollback}` drops the buffer
/// and renders `{else}` instead.
pub fn generate_try(node: &TryNode, ctx: &mut CompilationContext) -> Result {
    let saved = format!("$__try{}", ctx.assign_id());
    ctx.line(format!("{saved} = $__it ?? null;"));
    ctx.line("ob_start(fn() => '');");
    ctx.open(format!("try /* line {} */", node.position.line));
    generate(&node.body, ctx)?;

    ctx.reopen("catch (\\Throwable $__e)");
    ctx.line("ob_clean();");
    ctx.open(
        "if (!($__e instanceof MR\\RollbackException) && isset($this->global->exceptionHandler))",
    );
    ctx.line("($this->global->exceptionHandler)($__e, $this);");
    ctx.close("");
    if let Some(otherwise) = &node.otherwise {
        generate(otherwise, ctx)?;
    }

    ctx.reopen("finally");
    ctx.line("echo ob_get_clean();");
    ctx.line(format!("$iterator = $__it = {saved};"));
    ctx.close("");
    Ok(())
}

/// Named blocks become methods rendered in place; anonymous blocks only
/// apply their filters.
pub fn generate_block(node: &BlockNode, ctx: &mut CompilationContext) -> Result {
    let line = node.position.line;
    let Some(name) = &node.name else {
        return filtered(ctx, &node.filters, line, |ctx| generate(&node.content, ctx));
    };

    let body = ctx.isolated(|ctx| generate(&node.content, ctx))?;
    ctx.add_block(name, "block", node.position, Vec::new(), body);
    let call = format!(
        "$this->renderBlock({}, get_defined_vars()) /* line {line} */;",
        php_string(name)
    );
    filtered(ctx, &node.filters, line, |ctx| {
        ctx.line(call);
        Ok(())
    })
}

/// `{define}` only declares a method; nothing renders in place.
pub fn generate_define(node: &DefineNode, ctx: &mut CompilationContext) -> Result {
    let body = ctx.isolated(|ctx| generate(&node.content, ctx))?;
    ctx.add_block(&node.name, "define", node.position, node.params.clone(), body);
    Ok(())
}

pub fn generate_include(node: &IncludeNode, ctx: &mut CompilationContext) -> Result {
    let line = node.position.line;
    let args = print_items(&node.args);
    let call = match &node.target {
        IncludeTarget::Block(name) => {
            let vars = if args.is_empty() {
                "get_defined_vars()".to_string()
            } else {
                format!("[{args}] + get_defined_vars()")
            };
            format!("$this->renderBlock({}, {vars})", print_expr(name))
        }
        IncludeTarget::File(file) => {
            let content_type = match ctx.escaper.content_type() {
                Some(content_type) => php_string(content_type.as_str()),
                None => "$this->getContentType()".to_string(),
            };
            format!(
                "$this->createTemplate({}, [{args}] + $this->params, 'include')->renderToContentType({content_type})",
                print_expr(file)
            )
        }
    };
    filtered(ctx, &node.filters, line, |ctx| {
        ctx.line(format!("{call} /* line {line} */;"));
        Ok(())
    })
}

pub fn generate_var(node: &VarNode, ctx: &mut CompilationContext) -> Result {
    for (name, value) in &node.assignments {
        let assign = Expr::Assign {
            op: AssignOp::Assign,
            target: Box::new(Expr::Variable(name.clone())),
            value: Box::new(value.clone()),
        };
        ctx.line(format!("{} /* line {} */;", print_expr(&assign), node.position.line));
    }
    Ok(())
}

/// `{default}` assigns only variables that are not set yet.
pub fn generate_default(node: &VarNode, ctx: &mut CompilationContext) -> Result {
    let items = node
        .assignments
        .iter()
        .map(|(name, value)| {
            format!(
                "{} => {}",
                php_string(name.trim_start_matches('$')),
                print_expr(value)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    ctx.line(format!(
        "extract([{items}], EXTR_SKIP) /* line {} */;",
        node.position.line
    ));
    Ok(())
}

/// `{capture $var}` renders into a variable. Markup stays marked as safe HTML.
pub fn generate_capture(node: &CaptureNode, ctx: &mut CompilationContext) -> Result {
    ctx.line("ob_start(fn() => '');");
    ctx.open(format!("try /* line {} */", node.position.line));
    generate(&node.content, ctx)?;
    ctx.reopen("finally");
    let mut value = content_filters("ob_get_clean()", &node.filters);
    if ctx.escaper.content_type().is_some_and(|ct| ct.is_markup()) {
        value = format!("new MR\\Html({value})");
    }
    ctx.line(format!("{} = {value};", print_expr(&node.target)));
    ctx.close("");
    Ok(())
}

/// `{contentType}` switches the escaper. A runtime type is also handed to
/// the template so dynamic escaping can see it.
pub fn generate_content_type(node: &ContentTypeNode, ctx: &mut CompilationContext) -> Result {
    match (&node.content_type, &node.dynamic) {
        (Some(content_type), _) => ctx.escaper.set_content_type(Some(*content_type)),
        (None, Some(expr)) => {
            ctx.line(format!(
                "$this->setContentType({}) /* line {} */;",
                print_expr(expr),
                node.position.line
            ));
            ctx.escaper.set_content_type(None);
        }
        (None, None) => {}
    }
    log::trace!("escaper switched to {} at {}", ctx.escaper, node.position);
    Ok(())
}

/// `{first}`, `{last}` and `{sep}` test the innermost loop's iterator.
pub fn generate_iteration_marker(
    node: &IterationMarkerNode,
    ctx: &mut CompilationContext,
) -> Result {
    let width = node.width.as_ref().map(print_expr).unwrap_or_default();
    let condition = match node.marker {
        IterationMarker::First => format!("$__it->isFirst({width})"),
        IterationMarker::Last => format!("$__it->isLast({width})"),
        IterationMarker::Sep => format!("!$__it->isLast({width})"),
    };
    ctx.open(format!("if ({condition}) /* line {} */", node.position.line));
    generate(&node.content, ctx)?;
    if let Some(otherwise) = &node.otherwise {
        ctx.reopen("else");
        generate(otherwise, ctx)?;
    }
    ctx.close("");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mortar_lexer::ContentType;
    use mortar_parser::{parse, ParserOptions};
    use pretty_assertions::assert_eq;

    fn body(source: &str) -> String {
        let template = parse(source, &ParserOptions::default()).unwrap();
        let mut ctx = CompilationContext::new(ContentType::Html);
        generate(&template.root, &mut ctx).unwrap();
        ctx.finish().0
    }

    /// Body lines without the method indentation.
    fn lines(source: &str) -> Vec<String> {
        body(source)
            .lines()
            .map(|l| l.strip_prefix("\t\t").unwrap_or(l).to_string())
            .collect()
    }

    #[test]
    fn test_print_filters_run_before_escaping() {
        assert_eq!(
            lines("{$a|upper|truncate: 5}"),
            vec!["echo MR\\Filters::escapeHtmlText(($this->filters->truncate)(($this->filters->upper)($a), 5)) /* line 1 */;"]
        );
        assert_eq!(lines("{$a|noescape}"), vec!["echo $a /* line 1 */;"]);
    }

    #[test]
    fn test_url_check() {
        let out = body("<a href={$u}>x</a>");
        assert!(out.contains("'\"' . MR\\Filters::escapeHtmlAttr(MR\\Filters::safeUrl($u)) . '\"'"));
        let out = body("<a href=\"{$u|nocheck}\">x</a>");
        assert!(out.contains("echo MR\\Filters::escapeHtmlAttr($u) /* line 1 */;"));
        let out = body("<img src=\"{$u|datastream}\">");
        assert!(out.contains("MR\\Filters::escapeHtmlAttr(($this->filters->datastream)($u))"));
    }

    #[test]
    fn test_if_chain() {
        assert_eq!(
            lines("{if $a}A{elseif $b}B{else}C{/if}"),
            vec![
                "if ($a) /* line 1 */ {",
                "\techo 'A';",
                "} elseif ($b) /* line 1 */ {",
                "\techo 'B';",
                "} else {",
                "\techo 'C';",
                "}",
            ]
        );
    }

    #[test]
    fn test_foreach_with_else() {
        assert_eq!(
            lines("{foreach $items as $k => $v}{$v}{else}none{/foreach}"),
            vec![
                "$__empty1 = true;",
                "foreach ($iterator = $__it = new MR\\CachingIterator($items, $__it ?? null) as $k => $v) /* line 1 */ {",
                "\t$__empty1 = false;",
                "\techo MR\\Filters::escapeHtmlText($v) /* line 1 */;",
                "}",
                "$iterator = $__it = $__it->getParent();",
                "if ($__empty1) {",
                "\techo 'none';",
                "}",
            ]
        );
    }

    #[test]
    fn test_jumps() {
        let out = lines("{foreach $a as $b}{continueIf $b}{breakIf !$b}{skipIf $b > 1}{/foreach}");
        assert_eq!(out[1], "\tif ($b) /* line 1 */ continue;");
        assert_eq!(out[2], "\tif (!$b) /* line 1 */ break;");
        assert_eq!(
            out[3..7].to_vec(),
            vec!["\tif ($b > 1) /* line 1 */ {", "\t\t$__it->skipRound();", "\t\tcontinue;", "\t}"]
        );
    }

    #[test]
    fn test_iteration_markers() {
        let out = lines("{foreach $a as $b}{$b}{sep}, {/sep}{last 2}|{/last}{/foreach}");
        assert!(out.contains(&"\tif (!$__it->isLast()) /* line 1 */ {".to_string()));
        assert!(out.contains(&"\tif ($__it->isLast(2)) /* line 1 */ {".to_string()));
    }

    #[test]
    fn test_for_and_while() {
        assert_eq!(
            lines("{for $i = 0; $i < 3; $i++}x{/for}")[0],
            "for ($i = 0; $i < 3; $i++) /* line 1 */ {"
        );
        assert_eq!(
            lines("{while}x{/while $a}"),
            vec!["do /* line 1 */ {", "\techo 'x';", "} while ($a);"]
        );
    }

    #[test]
    fn test_switch_is_strict_and_default_last() {
        assert_eq!(
            lines("{switch $x}{default}C{case 1}A{case 2, 3}B{/switch}"),
            vec![
                "$__switch1 = $x /* line 1 */;",
                "if (in_array($__switch1, [1], true)) /* line 1 */ {",
                "\techo 'A';",
                "} elseif (in_array($__switch1, [2, 3], true)) /* line 1 */ {",
                "\techo 'B';",
                "} else {",
                "\techo 'C';",
                "}",
            ]
        );
    }

    #[test]
    fn test_try_buffers_and_restores_iterator() {
        let out = lines("{try}a{rollback}{else}b{/try}");
        assert_eq!(
            out,
            vec![
                "$__try1 = $__it ?? null;",
                "ob_start(fn() => '');",
                "try /* line 1 */ {",
                "\techo 'a';",
                "\tthrow new MR\\RollbackException /* line 1 */;",
                "} catch (\\Throwable $__e) {",
                "\tob_clean();",
                "\tif (!($__e instanceof MR\\RollbackException) && isset($this->global->exceptionHandler)) {",
                "\t\t($this->global->exceptionHandler)($__e, $this);",
                "\t}",
                "\techo 'b';",
                "} finally {",
                "\techo ob_get_clean();",
                "\t$iterator = $__it = $__try1;",
                "}",
            ]
        );
    }

    #[test]
    fn test_named_block_renders_in_place() {
        let template = parse("a{block title|upper}T{/block}", &ParserOptions::default()).unwrap();
        let mut ctx = CompilationContext::new(ContentType::Html);
        generate(&template.root, &mut ctx).unwrap();
        let (main, blocks) = ctx.finish();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].method, "blockTitle");
        assert_eq!(blocks[0].body, "\t\techo 'T';\n");
        assert!(main.contains("\t\t\t$this->renderBlock('title', get_defined_vars()) /* line 1 */;\n"));
        assert!(main.contains("echo ($this->filters->upper)(ob_get_clean());"));
    }

    #[test]
    fn test_define_renders_nothing() {
        let template = parse("{define item, $x}{$x}{/define}", &ParserOptions::default()).unwrap();
        let mut ctx = CompilationContext::new(ContentType::Html);
        generate(&template.root, &mut ctx).unwrap();
        let (main, blocks) = ctx.finish();
        assert_eq!(main, "");
        assert_eq!(blocks[0].params.len(), 1);
    }

    #[test]
    fn test_includes() {
        assert_eq!(
            lines("{include item, 1, label: 'x'}"),
            vec!["$this->renderBlock('item', [1, 'label' => 'x'] + get_defined_vars()) /* line 1 */;"]
        );
        assert_eq!(
            lines("{include 'footer.latte'}"),
            vec!["$this->createTemplate('footer.latte', [] + $this->params, 'include')->renderToContentType('html') /* line 1 */;"]
        );
    }

    #[test]
    fn test_var_and_default() {
        assert_eq!(
            lines("{var $a = 1, $b = $x and $y}{default $c = 2}"),
            vec![
                "$a = 1 /* line 1 */;",
                "$b = ($x and $y) /* line 1 */;",
                "extract(['c' => 2], EXTR_SKIP) /* line 1 */;",
            ]
        );
    }

    #[test]
    fn test_capture_wraps_markup() {
        let out = lines("{capture $out}<b>x</b>{/capture}");
        assert_eq!(out[4], "\t$out = new MR\\Html(ob_get_clean());");
    }

    #[test]
    fn test_content_type_switches_escaper() {
        let out = body("{contentType js}{$a}");
        assert!(out.contains("MR\\Filters::escapeJs($a)"));
        let out = body("{contentType $type}{$a}");
        assert!(out.contains("$this->setContentType($type) /* line 1 */;"));
        assert!(out.contains("MR\\Filters::escapeDynamic($a, $this->getContentType(), 'text')"));
    }

    #[test]
    fn test_runtime_content_type_checks_urls() {
        let out = body("{contentType $type}<a href=\"{$u}\" onclick=\"{$j}\">x</a>");
        assert!(out.contains(
            "echo MR\\Filters::escapeDynamic(MR\\Filters::safeUrl($u), $this->getContentType(), 'attr-url') /* line 1 */;"
        ));
        assert!(out.contains(
            "echo MR\\Filters::escapeDynamic($j, $this->getContentType(), 'attr-js') /* line 1 */;"
        ));
    }
}
