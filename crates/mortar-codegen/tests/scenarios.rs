//! End-to-end compiles of whole templates.

use std::sync::Arc;

use mortar_codegen::{compile, Options};
use mortar_parser::{CompileError, StaticPolicy};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn php(source: &str) -> String {
    match compile(source, &Options::default()) {
        Ok(output) => output.code,
        Err(err) => panic!("{source}: {err}"),
    }
}

fn error(source: &str) -> CompileError {
    compile(source, &Options::default()).unwrap_err()
}

fn sandboxed(source: &str) -> Result<String, CompileError> {
    let mut options = Options::default();
    options.parser = options.parser.with_policy(Arc::new(StaticPolicy::safe()));
    compile(source, &options).map(|output| output.code)
}

/// Lines of the main method body, without indentation.
fn main_body(code: &str) -> Vec<&str> {
    code.lines()
        .skip_while(|l| !l.contains("unset($__args);"))
        .skip(2)
        .take_while(|l| *l != "\t}")
        .map(str::trim_start)
        .collect()
}

/// Lines of the main body that reach an object or callee without the sandbox:
/// a bare `->`, or a `(` right after a value or an unknown function name.
fn unmediated(code: &str) -> Vec<String> {
    const CALLS: [&str; 4] = ["escapeHtmlText", "prop", "callMethod", "call"];
    let mut found = Vec::new();
    for line in main_body(code) {
        let line = line.replace("$this->global->sandbox->", "");
        let bypass = line.contains("->")
            || line.match_indices('(').any(|(i, _)| {
                let head = &line[..i];
                let start = head
                    .trim_end_matches(|c: char| c.is_ascii_alphanumeric() || c == '_')
                    .len();
                match &head[start..] {
                    "" => head.ends_with(['\'', '"', ')', ']', '}']),
                    word => !CALLS.contains(&word) || head[..start].ends_with('$'),
                }
            });
        if bypass {
            found.push(line);
        }
    }
    found
}

#[test]
fn foreach_with_continue_if_and_iterator() {
    let code = php("{foreach [0, 1, 2, 3] as $item}{continueIf $item % 2}{$iterator->counter}. item{/foreach}");
    assert_eq!(
        main_body(&code),
        vec![
            "foreach ($iterator = $__it = new MR\\CachingIterator([0, 1, 2, 3], $__it ?? null) as $item) /* line 1 */ {",
            "if ($item % 2) /* line 1 */ continue;",
            "echo MR\\Filters::escapeHtmlText($iterator->counter) /* line 1 */;",
            "echo '. item';",
            "}",
            "$iterator = $__it = $__it->getParent();",
        ]
    );
}

#[test]
fn url_attribute_is_checked_then_escaped() {
    let code = php("<a href=\"{$url}\">link</a>");
    assert!(code.contains("echo MR\\Filters::escapeHtmlAttr(MR\\Filters::safeUrl($url)) /* line 1 */;"));

    let code = php("<a title=\"{$url}\">link</a>");
    assert!(code.contains("echo MR\\Filters::escapeHtmlAttr($url) /* line 1 */;"));
}

#[test]
fn switch_compiles_and_rejects_text_before_case() {
    let code = php("{switch $x}{case 1}A{case 2,3}B{default}C{/switch}");
    assert!(code.contains("if (in_array($__switch1, [1], true)) /* line 1 */ {"));
    assert!(code.contains("} elseif (in_array($__switch1, [2, 3], true)) /* line 1 */ {"));
    assert!(code.contains("} else {"));

    let err = error("{switch $x}oops{case 1}A{/switch}");
    assert!(matches!(err, CompileError::Syntax { .. }));
    assert_eq!(err.message(), "Unexpected text before {case}");
}

#[test]
fn denied_filter_is_a_security_violation() {
    let err = sandboxed("<p>\n  {$x|noescape}</p>").unwrap_err();
    assert!(err.is_security());
    assert_eq!(err.message(), "Filter |noescape is not allowed");
    assert_eq!((err.line(), err.column()), (2, 7));
}

#[test]
fn try_buffers_body_and_rolls_back_into_else() {
    let code = php("{try}{$a}{rollback}{else}fallback{/try}");
    assert_eq!(
        main_body(&code),
        vec![
            "$__try1 = $__it ?? null;",
            "ob_start(fn() => '');",
            "try /* line 1 */ {",
            "echo MR\\Filters::escapeHtmlText($a) /* line 1 */;",
            "throw new MR\\RollbackException /* line 1 */;",
            "} catch (\\Throwable $__e) {",
            "ob_clean();",
            "if (!($__e instanceof MR\\RollbackException) && isset($this->global->exceptionHandler)) {",
            "($this->global->exceptionHandler)($__e, $this);",
            "}",
            "echo 'fallback';",
            "} finally {",
            "echo ob_get_clean();",
            "$iterator = $__it = $__try1;",
            "}",
        ]
    );
}

#[test]
fn unclosed_tag_names_the_closer() {
    assert_eq!(error("{if $a}{foreach $b as $c}").message(), "Unexpected end, expecting {/foreach}");
}

#[test]
fn sandbox_mediates_member_access() {
    let code = sandboxed("{$user->name} {$user->getName()|upper}").unwrap();
    assert!(code.contains("$this->global->sandbox->prop($user, 'name')"));
    assert!(code.contains("$this->global->sandbox->callMethod($user, 'getName', [])"));
    assert!(!code.contains("$user->"));
    assert!(!code.contains("$user?->"));
}

#[test]
fn sandbox_mediates_string_callees() {
    let cases = [
        ("{='system'('id')}", "'system'"),
        ("{=\"system\"('id')}", "\"system\""),
    ];
    for (source, callee) in cases {
        let code = sandboxed(source).unwrap();
        let call = format!("$this->global->sandbox->call({callee}, ['id'])");
        assert!(code.contains(&call), "{code}");
        assert!(!code.contains(&format!("{callee}('id')")), "{code}");
        assert_eq!(unmediated(&code), Vec::<String>::new());
    }
    assert!(!unmediated(&php("{='system'('id')}")).is_empty());
    assert!(!unmediated(&php("{$user->name}")).is_empty());
}

fn callee_chain() -> impl Strategy<Value = String> {
    let base = prop::sample::select(vec![
        "$a", "$obj", "'system'", "\"system\"", "[1, 2]", "($a)", "Foo::m()", "Foo::m(1)",
    ]);
    let suffix = prop::sample::select(vec![
        "->name", "?->name", "->m()", "?->m($a)", "()", "('id')", "['k']",
    ]);
    (base, prop::collection::vec(suffix, 0..5))
        .prop_map(|(base, suffixes)| format!("{base}{}", suffixes.concat()))
}

proptest! {
    #[test]
    fn prop_sandbox_mediates_every_chain(chain in callee_chain()) {
        let source = format!("{{={chain}}}");
        let code = sandboxed(&source).unwrap();
        prop_assert!(!main_body(&code).is_empty());
        prop_assert_eq!(unmediated(&code), Vec::<String>::new(), "{}", source);
    }
}

#[test]
fn runtime_content_type_keeps_url_check() {
    let code = php("{contentType $type}<a href=\"{$u}\" onclick=\"{$j}\">x</a>{$t}");
    assert!(code.contains(
        "echo MR\\Filters::escapeDynamic(MR\\Filters::safeUrl($u), $this->getContentType(), 'attr-url') /* line 1 */;"
    ));
    assert!(code.contains(
        "echo MR\\Filters::escapeDynamic($j, $this->getContentType(), 'attr-js') /* line 1 */;"
    ));
    assert!(code.contains(
        "echo MR\\Filters::escapeDynamic($t, $this->getContentType(), 'text') /* line 1 */;"
    ));
}

#[test]
fn escaping_depends_on_position_only() {
    let first = php("<p title=\"{$a}\">{$a}</p><script>{$a}</script>");
    assert_eq!(first, php("<p title=\"{$a}\">{$a}</p><script>{$a}</script>"));

    let other = php("<p title=\"{$b + 1}\">{$b + 1}</p><script>{$b + 1}</script>");
    assert_eq!(first.replace("$a", "$b + 1"), other);
}

#[test]
fn nested_blocks_and_includes() {
    let output = compile(
        "{block layout}<main>{block content}{$body}{/block}</main>{/block}{include content, body: 'x'}",
        &Options::default(),
    )
    .unwrap();
    assert_eq!(output.blocks, vec!["content", "layout"]);
    assert!(output.code.contains("$this->renderBlock('layout', get_defined_vars()) /* line 1 */;"));
    assert!(output.code.contains("$this->renderBlock('content', ['body' => 'x'] + get_defined_vars()) /* line 1 */;"));
}

#[test]
fn n_attributes_compile_like_tags() {
    let code = php("<ul n:if=\"$items\"><li n:foreach=\"$items as $item\">{$item}</li></ul>");
    assert!(code.contains("if ($items) /* line 1 */ {"));
    assert!(code.contains("as $item) /* line 1 */ {"));
    assert!(code.contains("echo MR\\Filters::escapeHtmlText($item) /* line 1 */;"));
}
