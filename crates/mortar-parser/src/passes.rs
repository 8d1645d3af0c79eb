//! Token rewrite passes applied to tag arguments before parsing.
//!
//! Each pass is a pure `Vec<ExprToken> -> Result<Vec<ExprToken>>` transform.
//! They run in a fixed order, every later pass relying on the desugarings of
//! the earlier ones:
//!
//! 1. `strip_comments`
//! 2. `optional_chaining`: `$a?[k]` becomes `($a[k] ?? null)`
//! 3. `short_ternary`: `a ? b` becomes `a ? b : null`
//! 4. `in_operator`: `x in list` becomes `in_array(x, list, true)`
//! 5. `named_arguments`: top-level and array `name: v` become `'name' => v`
//! 6. `deny_keywords`
//! 7. `sandbox` (only with a policy)
//!
//! Bracket nesting is preserved by every pass, and running the whole
//! pipeline on its own output changes nothing.

use mortar_lexer::Position;

use crate::expr_lexer::{ExprKind, ExprToken};
use crate::policy::Policy;
use crate::CompileError;

/// Denied in every expression, sandboxed or not.
pub const ALWAYS_DENIED: &[&str] = &[
    "eval",
    "include",
    "include_once",
    "require",
    "require_once",
    "exit",
    "die",
    "__halt_compiler",
];

/// Default keyword denylist applied when a sandbox policy is active.
pub const SANDBOX_DENIED: &[&str] = &[
    "function", "class", "interface", "trait", "enum", "namespace", "use", "global", "static",
    "return", "goto", "echo", "print", "new", "yield", "throw", "declare", "unset", "if", "else",
    "elseif", "for", "foreach", "while", "do", "switch", "match", "break", "continue", "try",
    "catch", "finally",
];

/// Call-like constructs that are not function calls.
const LANGUAGE_CONSTRUCTS: &[&str] = &["isset", "empty", "array", "list", "fn"];

/// Run the full pipeline. The sandbox pass runs only when `policy` is given.
pub fn rewrite(
    tokens: Vec<ExprToken>,
    policy: Option<&dyn Policy>,
    denied_keywords: &[String],
) -> Result<Vec<ExprToken>, CompileError> {
    let tokens = strip_comments(tokens)?;
    let tokens = optional_chaining(tokens)?;
    let tokens = short_ternary(tokens)?;
    let tokens = in_operator(tokens)?;
    let tokens = named_arguments(tokens)?;
    let tokens = deny_keywords(tokens, policy.is_some(), denied_keywords)?;
    match policy {
        Some(policy) => sandbox(tokens, policy),
        None => Ok(tokens),
    }
}

pub fn strip_comments(tokens: Vec<ExprToken>) -> Result<Vec<ExprToken>, CompileError> {
    Ok(tokens
        .into_iter()
        .filter(|t| t.kind != ExprKind::Comment)
        .collect())
}

pub fn optional_chaining(mut tokens: Vec<ExprToken>) -> Result<Vec<ExprToken>, CompileError> {
    while let Some(q) = tokens
        .iter()
        .position(|t| t.kind == ExprKind::OptionalBracket)
    {
        let position = tokens[q].position;
        if q == 0 {
            return Err(CompileError::syntax("Unexpected '?['", position));
        }
        let start = operand_start(&tokens, q - 1)?;
        let close = matching_close(&tokens, q)?;
        let end = chain_end(&tokens, close + 1)?;
        log::trace!("optional chaining over tokens {start}..{end}");

        tokens[q] = ExprToken::new(ExprKind::LBracket, "[", position);
        let mut out = Vec::with_capacity(tokens.len() + 4);
        out.extend_from_slice(&tokens[..start]);
        out.push(ExprToken::new(ExprKind::LParen, "(", position));
        out.extend_from_slice(&tokens[start..end]);
        out.push(ExprToken::new(ExprKind::Coalesce, "??", position));
        out.push(ExprToken::new(ExprKind::Identifier, "null", position));
        out.push(ExprToken::new(ExprKind::RParen, ")", position));
        out.extend_from_slice(&tokens[end..]);
        tokens = out;
    }
    Ok(tokens)
}

pub fn short_ternary(mut tokens: Vec<ExprToken>) -> Result<Vec<ExprToken>, CompileError> {
    let mut inserts: Vec<(usize, Position)> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != ExprKind::Question {
            continue;
        }
        let mut depth = 0usize;
        let mut nested = 0usize;
        let mut found = false;
        let mut j = i + 1;
        while j < tokens.len() {
            let kind = tokens[j].kind;
            if kind.is_opening() {
                depth += 1;
            } else if kind.is_closing() {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            } else if depth == 0 {
                match kind {
                    ExprKind::Comma
                    | ExprKind::DoubleArrow
                    | ExprKind::Semicolon
                    | ExprKind::Pipe => break,
                    ExprKind::Question => nested += 1,
                    ExprKind::Colon if nested == 0 => {
                        found = true;
                        break;
                    }
                    ExprKind::Colon => nested -= 1,
                    _ => {}
                }
            }
            j += 1;
        }
        if !found {
            inserts.push((j, token.position));
        }
    }

    inserts.sort_by(|a, b| b.0.cmp(&a.0));
    for (at, position) in inserts {
        tokens.insert(at, ExprToken::new(ExprKind::Identifier, "null", position));
        tokens.insert(at, ExprToken::new(ExprKind::Colon, ":", position));
    }
    Ok(tokens)
}

pub fn in_operator(mut tokens: Vec<ExprToken>) -> Result<Vec<ExprToken>, CompileError> {
    while let Some(i) = (1..tokens.len().saturating_sub(1))
        .find(|&i| tokens[i].is_word("in") && is_operand_end(tokens[i - 1].kind))
    {
        let position = tokens[i].position;
        let start = operand_start(&tokens, i - 1)?;
        let end = operand_forward(&tokens, i + 1)?;

        let mut out = Vec::with_capacity(tokens.len() + 6);
        out.extend_from_slice(&tokens[..start]);
        out.push(ExprToken::new(ExprKind::Intrinsic, "in_array", position));
        out.push(ExprToken::new(ExprKind::LParen, "(", position));
        out.extend_from_slice(&tokens[start..i]);
        out.push(ExprToken::new(ExprKind::Comma, ",", position));
        out.extend_from_slice(&tokens[i + 1..end]);
        out.push(ExprToken::new(ExprKind::Comma, ",", position));
        out.push(ExprToken::new(ExprKind::Identifier, "true", position));
        out.push(ExprToken::new(ExprKind::RParen, ")", position));
        out.extend_from_slice(&tokens[end..]);
        tokens = out;
    }
    Ok(tokens)
}

pub fn named_arguments(tokens: Vec<ExprToken>) -> Result<Vec<ExprToken>, CompileError> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut stack: Vec<ExprKind> = Vec::new();
    let mut after_filter = false;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        let at_argument_start = match stack.last() {
            None => i == 0 || tokens[i - 1].kind == ExprKind::Comma,
            Some(ExprKind::LBracket) => matches!(
                tokens[i - 1].kind,
                ExprKind::Comma | ExprKind::LBracket
            ),
            Some(_) => false,
        };

        if !after_filter
            && at_argument_start
            && token.kind == ExprKind::Identifier
            && tokens.get(i + 1).is_some_and(|t| t.kind == ExprKind::Colon)
        {
            out.push(ExprToken::new(
                ExprKind::String,
                format!("'{}'", token.text),
                token.position,
            ));
            out.push(ExprToken::new(
                ExprKind::DoubleArrow,
                "=>",
                tokens[i + 1].position,
            ));
            i += 2;
            continue;
        }

        if token.kind.is_opening() {
            stack.push(token.kind);
        } else if token.kind.is_closing() {
            stack.pop();
        } else if token.kind == ExprKind::Pipe && stack.is_empty() {
            after_filter = true;
        }
        out.push(token.clone());
        i += 1;
    }
    Ok(out)
}

/// Reject forbidden keywords and variables. Never rewrites anything.
pub fn deny_keywords(
    tokens: Vec<ExprToken>,
    sandboxed: bool,
    denied_keywords: &[String],
) -> Result<Vec<ExprToken>, CompileError> {
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            ExprKind::Backtick => {
                return Err(CompileError::security(
                    "Backtick operator is forbidden",
                    token.position,
                ))
            }
            ExprKind::Dollar => {
                return Err(CompileError::security(
                    "Variable variables are forbidden",
                    token.position,
                ))
            }
            ExprKind::Variable if is_reserved_variable(&token.text) => {
                return Err(CompileError::security(
                    format!("Forbidden variable {}", token.text),
                    token.position,
                ))
            }
            ExprKind::Identifier => {
                if i > 0 && tokens[i - 1].kind.is_member_access() {
                    continue;
                }
                let word = token.text.to_ascii_lowercase();
                if ALWAYS_DENIED.contains(&word.as_str()) {
                    return Err(CompileError::security(
                        format!("Keyword '{}' is forbidden", token.text),
                        token.position,
                    ));
                }
                if sandboxed && denied_keywords.iter().any(|k| k.eq_ignore_ascii_case(&word)) {
                    return Err(CompileError::security(
                        format!("Keyword '{}' is not allowed in sandbox mode", token.text),
                        token.position,
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(tokens)
}

/// Route member access and calls through the runtime sandbox and check
/// functions and filters against the policy.
pub fn sandbox(
    mut tokens: Vec<ExprToken>,
    policy: &dyn Policy,
) -> Result<Vec<ExprToken>, CompileError> {
    for i in 0..tokens.len() {
        let next = tokens.get(i + 1).map(|t| t.kind);
        match tokens[i].kind {
            ExprKind::Arrow => tokens[i].kind = ExprKind::MediatedArrow,
            ExprKind::NullsafeArrow => tokens[i].kind = ExprKind::MediatedNullsafeArrow,
            ExprKind::DoubleColon | ExprKind::MediatedDoubleColon => match next {
                Some(ExprKind::Variable | ExprKind::Dollar) => {
                    return Err(CompileError::security(
                        "Forbidden access to static property",
                        tokens[i].position,
                    ))
                }
                Some(ExprKind::Identifier)
                    if tokens.get(i + 2).is_some_and(|t| t.kind == ExprKind::LParen) =>
                {
                    tokens[i].kind = ExprKind::MediatedDoubleColon;
                }
                _ => {}
            },
            ExprKind::LParen if i > 0 => {
                let prev = &tokens[i - 1];
                match prev.kind {
                    ExprKind::Variable
                    | ExprKind::String
                    | ExprKind::RParen
                    | ExprKind::RBracket
                    | ExprKind::RBrace => tokens[i].kind = ExprKind::MediatedCallOpen,
                    ExprKind::Identifier => {
                        let is_member = i >= 2 && tokens[i - 2].kind.is_member_access();
                        let is_new = i >= 2 && tokens[i - 2].is_word("new");
                        let name = prev.text.trim_start_matches('\\');
                        let is_construct = LANGUAGE_CONSTRUCTS
                            .iter()
                            .any(|c| c.eq_ignore_ascii_case(name));
                        if !is_member && !is_new && !is_construct && !policy.is_function_allowed(name)
                        {
                            return Err(CompileError::security(
                                format!("Function {name}() is not allowed"),
                                prev.position,
                            ));
                        }
                    }
                    _ => {}
                }
            }
            ExprKind::Pipe => {
                if let Some(filter) = tokens.get(i + 1).filter(|t| t.kind == ExprKind::Identifier) {
                    if !policy.is_filter_allowed(&filter.text) {
                        return Err(CompileError::security(
                            format!("Filter |{} is not allowed", filter.text),
                            filter.position,
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(tokens)
}

// --- Helpers ---

fn is_reserved_variable(name: &str) -> bool {
    name == "$this" || name == "$GLOBALS" || name.starts_with("$__")
}

/// Token kinds that can end an operand.
fn is_operand_end(kind: ExprKind) -> bool {
    matches!(
        kind,
        ExprKind::Variable
            | ExprKind::Identifier
            | ExprKind::Intrinsic
            | ExprKind::String
            | ExprKind::Integer
            | ExprKind::Float
    ) || kind.is_closing()
}

pub(crate) fn matching_close(tokens: &[ExprToken], open: usize) -> Result<usize, CompileError> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.kind.is_opening() {
            depth += 1;
        } else if token.kind.is_closing() {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }
    Err(CompileError::syntax(
        format!("Unclosed '{}'", tokens[open].text),
        tokens[open].position,
    ))
}

fn matching_open(tokens: &[ExprToken], close: usize) -> Result<usize, CompileError> {
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        let kind = tokens[i].kind;
        if kind.is_closing() {
            depth += 1;
        } else if kind.is_opening() {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }
    Err(CompileError::syntax(
        format!("Unexpected '{}'", tokens[close].text),
        tokens[close].position,
    ))
}

/// First token of the operand chain ending at `end` (inclusive).
fn operand_start(tokens: &[ExprToken], end: usize) -> Result<usize, CompileError> {
    let mut i = end;
    loop {
        let kind = tokens[i].kind;
        if kind.is_closing() {
            i = matching_open(tokens, i)?;
        } else if !is_operand_end(kind) {
            return Err(CompileError::syntax(
                format!("Unexpected '{}'", tokens[i].text),
                tokens[i].position,
            ));
        }
        if i == 0 {
            return Ok(0);
        }
        let prev = tokens[i - 1].kind;
        if prev.is_member_access() && i >= 2 {
            i -= 2;
        } else if matches!(
            tokens[i].kind,
            ExprKind::LParen | ExprKind::LBracket | ExprKind::MediatedCallOpen
        ) && is_operand_end(prev)
        {
            i -= 1;
        } else {
            return Ok(i);
        }
    }
}

/// End (exclusive) of the operand chain starting at `start`.
fn operand_forward(tokens: &[ExprToken], start: usize) -> Result<usize, CompileError> {
    let Some(token) = tokens.get(start) else {
        let at = tokens.last().map(|t| t.position).unwrap_or_default();
        return Err(CompileError::syntax("Missing operand after 'in'", at));
    };
    let next = match token.kind {
        ExprKind::LBracket | ExprKind::LParen => matching_close(tokens, start)? + 1,
        ExprKind::Variable | ExprKind::Identifier | ExprKind::String | ExprKind::Intrinsic => {
            start + 1
        }
        _ => {
            return Err(CompileError::syntax(
                format!("Unexpected '{}' after 'in'", token.text),
                token.position,
            ))
        }
    };
    chain_end(tokens, next)
}

/// Extend an operand over following `[..]`, `(..)` and member accesses.
fn chain_end(tokens: &[ExprToken], from: usize) -> Result<usize, CompileError> {
    let mut j = from;
    while let Some(token) = tokens.get(j) {
        match token.kind {
            ExprKind::LBracket
            | ExprKind::OptionalBracket
            | ExprKind::LParen
            | ExprKind::MediatedCallOpen => j = matching_close(tokens, j)? + 1,
            kind if kind.is_member_access() => {
                j += 1;
                match tokens.get(j).map(|t| t.kind) {
                    Some(ExprKind::LBrace) => j = matching_close(tokens, j)? + 1,
                    Some(_) => j += 1,
                    None => break,
                }
            }
            _ => break,
        }
    }
    Ok(j)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr_lexer::ExprLexer;
    use crate::policy::StaticPolicy;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn lex(source: &str) -> Vec<ExprToken> {
        ExprLexer::tokenize(source, Position::new(0, 1, 1)).unwrap()
    }

    fn join(tokens: &[ExprToken]) -> String {
        tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run(source: &str) -> String {
        join(&rewrite(lex(source), None, &[]).unwrap())
    }

    fn policy() -> StaticPolicy {
        StaticPolicy {
            tags: vec!["*".into()],
            filters: vec!["upper".into(), "escape".into()],
            functions: vec!["strlen".into()],
        }
    }

    fn sandboxed(source: &str) -> Result<Vec<ExprToken>, CompileError> {
        let denied: Vec<String> = SANDBOX_DENIED.iter().map(|s| s.to_string()).collect();
        rewrite(lex(source), Some(&policy()), &denied)
    }

    // --- Desugaring ---

    #[test]
    fn test_strip_comments() {
        assert_eq!(run("$a /* x */ + 1"), "$a + 1");
    }

    #[test]
    fn test_optional_chaining() {
        assert_eq!(run("$a?['k']"), "( $a [ 'k' ] ?? null )");
        assert_eq!(
            run("$x + $a->b?[1]->c"),
            "$x + ( $a -> b [ 1 ] -> c ?? null )"
        );
        assert_eq!(run("foo($a)?[0]"), "( foo ( $a ) [ 0 ] ?? null )");
    }

    #[test]
    fn test_short_ternary() {
        assert_eq!(run("$a ? 'yes'"), "$a ? 'yes' : null");
        assert_eq!(run("$a ? 1 : 2"), "$a ? 1 : 2");
        assert_eq!(run("$a ?: 2"), "$a ? : 2");
        assert_eq!(run("[$a ? 1, 2]"), "[ $a ? 1 : null , 2 ]");
        assert_eq!(run("$a ? $b ? 1"), "$a ? $b ? 1 : null : null");
        assert_eq!(run("$a ? $b ? 1 : 2"), "$a ? $b ? 1 : 2 : null");
        assert_eq!(run("$a ? $b|upper"), "$a ? $b : null | upper");
    }

    #[test]
    fn test_in_operator() {
        assert_eq!(
            run("$x in [1, 2]"),
            "in_array ( $x , [ 1 , 2 ] , true )"
        );
        assert_eq!(
            run("!$u->role in $roles"),
            "! in_array ( $u -> role , $roles , true )"
        );
    }

    #[test]
    fn test_named_arguments() {
        assert_eq!(run("'file', a: 1, b: $c"), "'file' , 'a' => 1 , 'b' => $c");
        assert_eq!(run("[x: 1, y: 2]"), "[ 'x' => 1 , 'y' => 2 ]");
        // native call syntax stays as is
        assert_eq!(run("foo(x: 1)"), "foo ( x : 1 )");
        assert_eq!(run("$v|truncate: 10"), "$v | truncate : 10");
    }

    // --- Deny lists ---

    #[test]
    fn test_always_denied() {
        for source in ["eval('x')", "include 'a'", "exit", "`ls`", "$$a", "${'a'}", "$this", "$__it", "$GLOBALS"] {
            let err = rewrite(lex(source), None, &[]).unwrap_err();
            assert!(err.is_security(), "{source}: {err}");
        }
        // member names are not keywords
        assert!(rewrite(lex("$obj->exit()"), None, &[]).is_ok());
    }

    #[test]
    fn test_sandbox_denylist() {
        let err = sandboxed("new Foo").unwrap_err();
        assert!(err.is_security());
        assert!(err.message().contains("new"));
        assert!(rewrite(lex("new Foo"), None, &[]).is_ok());
    }

    // --- Sandbox ---

    #[test]
    fn test_sandbox_mediates_member_access() {
        let tokens = sandboxed("$a->b?->c($d)").unwrap();
        let kinds: Vec<ExprKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ExprKind::Variable,
                ExprKind::MediatedArrow,
                ExprKind::Identifier,
                ExprKind::MediatedNullsafeArrow,
                ExprKind::Identifier,
                ExprKind::LParen,
                ExprKind::Variable,
                ExprKind::RParen,
            ]
        );
    }

    #[test]
    fn test_sandbox_mediates_dynamic_calls() {
        let tokens = sandboxed("$f(1)(2) . Foo::bar()").unwrap();
        assert_eq!(tokens[1].kind, ExprKind::MediatedCallOpen);
        assert_eq!(tokens[4].kind, ExprKind::MediatedCallOpen);
        assert_eq!(tokens[9].kind, ExprKind::MediatedDoubleColon);
    }

    #[test]
    fn test_sandbox_mediates_string_callees() {
        for source in ["'system'('id')", "\"system\"('id')"] {
            let tokens = sandboxed(source).unwrap();
            assert!(tokens.iter().all(|t| t.kind != ExprKind::LParen), "{source}");
        }
        let tokens = sandboxed("'system'('id')").unwrap();
        assert_eq!(tokens[1].kind, ExprKind::MediatedCallOpen);
    }

    #[test]
    fn test_sandbox_checks_functions() {
        assert!(sandboxed("strlen($a)").is_ok());
        assert!(sandboxed("isset($a) && empty($b)").is_ok());
        let err = sandboxed("$a + system('ls')").unwrap_err();
        assert!(err.is_security());
        assert_eq!(err.column(), 6);
    }

    #[test]
    fn test_sandbox_denies_static_properties() {
        assert!(sandboxed("Foo::$bar").unwrap_err().is_security());
        assert!(sandboxed("Foo::BAR").is_ok());
    }

    #[test]
    fn test_sandbox_checks_filters() {
        assert!(sandboxed("$a|upper").is_ok());
        let err = sandboxed("$x|noescape").unwrap_err();
        assert!(err.is_security());
        assert_eq!(err.column(), 4);
        assert!(sandboxed("$a || $b").is_ok());
    }

    #[test]
    fn test_unbalanced_brackets() {
        assert!(rewrite(lex("$a?[1"), None, &[]).is_err());
    }

    // --- Idempotence ---

    const SNIPPETS: &[&str] = &[
        "$a", "$a?['k']", "$b ? 1", "$c in [1, 2]", "x: 3", "$o->p", "$o?->m(1)", "strlen($s)",
        "Foo::bar()", "$f(2)", "($a ?: $b)", "[k: $v?[0]]", "$x ? $y ? 1 : 2",
    ];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn prop_pipeline_is_idempotent(
            parts in prop::collection::vec(prop::sample::select(SNIPPETS), 1..4),
            sandbox in any::<bool>(),
        ) {
            let source = parts.join(", ");
            let policy = policy();
            let policy: Option<&dyn Policy> = if sandbox { Some(&policy) } else { None };
            let once = rewrite(lex(&source), policy, &[]).unwrap();
            let twice = rewrite(once.clone(), policy, &[]).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
