//! Expression printer.
//!
//! Renders `Expr` trees back to PHP source with the fewest parentheses the
//! host grammar allows. A child is parenthesized when it binds looser than
//! its parent, or binds equally but sits on the side the parent's
//! associativity does not group. Mediated nodes (see the sandbox pass) are
//! printed as calls into `$this->global->sandbox`.

use mortar_parser::ast::{
    Arg, ArrayItem, Assoc, Callee, Expr, FilterCall, Member, Param, UnaryOp, ASSIGN_PRECEDENCE,
    TERNARY_PRECEDENCE, UNARY_PRECEDENCE,
};

const SANDBOX: &str = "$this->global->sandbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Print an expression as PHP source.
pub fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::Variable(name) | Expr::Literal(name) | Expr::Constant(name) => name.clone(),

        Expr::Array(items) => format!("[{}]", print_items(items)),

        Expr::Unary { op, operand } => {
            let operand_str = print_child(operand, op.precedence(), Side::Right);
            match op {
                UnaryOp::Cast(cast) => format!("{cast} {operand_str}"),
                UnaryOp::Neg | UnaryOp::Plus | UnaryOp::PreInc | UnaryOp::PreDec => {
                    let symbol = op.symbol();
                    // `- -$a`, never `--$a`
                    if operand_str.starts_with(['-', '+']) {
                        format!("{symbol} {operand_str}")
                    } else {
                        format!("{symbol}{operand_str}")
                    }
                }
                _ => format!("{}{operand_str}", op.symbol()),
            }
        }

        Expr::Postfix { op, operand } => format!("{}{}", print_expr(operand), op.symbol()),

        Expr::Binary { op, left, right } => {
            let precedence = op.precedence();
            format!(
                "{} {} {}",
                print_child(left, precedence, Side::Left),
                op.symbol(),
                print_child(right, precedence, Side::Right),
            )
        }

        Expr::Assign { op, target, value } => format!(
            "{} {} {}",
            print_expr(target),
            op.symbol(),
            print_child(value, (ASSIGN_PRECEDENCE, Assoc::Right), Side::Right),
        ),

        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            let ternary = (TERNARY_PRECEDENCE, Assoc::None);
            let condition = print_child(condition, ternary, Side::Left);
            let otherwise = print_child(otherwise, ternary, Side::Right);
            match then {
                Some(then) => format!("{condition} ? {} : {otherwise}", print_expr(then)),
                None => format!("{condition} ?: {otherwise}"),
            }
        }

        Expr::Prop {
            object,
            name,
            nullsafe,
            mediated: true,
        } => {
            let mut args = vec![print_expr(object), print_member_value(name)];
            if *nullsafe {
                args.push("true".into());
            }
            format!("{SANDBOX}->prop({})", args.join(", "))
        }

        Expr::Prop {
            object,
            name,
            nullsafe,
            mediated: false,
        } => format!(
            "{}{}{}",
            print_deref(object),
            arrow(*nullsafe),
            print_member(name)
        ),

        Expr::MethodCall {
            object,
            name,
            args,
            nullsafe,
            mediated: true,
        } => {
            let mut parts = vec![
                print_expr(object),
                print_member_value(name),
                format!("[{}]", print_args_array(args)),
            ];
            if *nullsafe {
                parts.push("true".into());
            }
            format!("{SANDBOX}->callMethod({})", parts.join(", "))
        }

        Expr::MethodCall {
            object,
            name,
            args,
            nullsafe,
            mediated: false,
        } => format!(
            "{}{}{}({})",
            print_deref(object),
            arrow(*nullsafe),
            print_member(name),
            print_args(args)
        ),

        Expr::StaticCall {
            class,
            name,
            args,
            mediated: true,
        } => {
            let class = match class.as_ref() {
                Expr::Constant(name) => format!("{name}::class"),
                other => print_expr(other),
            };
            format!(
                "{SANDBOX}->call([{class}, '{name}'], [{}])",
                print_args_array(args)
            )
        }

        Expr::StaticCall {
            class,
            name,
            args,
            mediated: false,
        } => format!("{}::{name}({})", print_deref(class), print_args(args)),

        Expr::StaticProp { class, name } | Expr::ClassConst { class, name } => {
            format!("{}::{name}", print_deref(class))
        }

        Expr::Index { object, index } => format!(
            "{}[{}]",
            print_deref(object),
            index.as_deref().map(print_expr).unwrap_or_default()
        ),

        Expr::Call {
            callee,
            args,
            mediated,
        } => match callee {
            Callee::Function(name) => format!("{name}({})", print_args(args)),
            Callee::TemplateFunction(name) => {
                let mut list = vec!["$this".to_string()];
                list.extend(args.iter().map(print_arg));
                format!("($this->global->fn->{name})({})", list.join(", "))
            }
            Callee::Dynamic(target) if *mediated => format!(
                "{SANDBOX}->call({}, [{}])",
                print_expr(target),
                print_args_array(args)
            ),
            Callee::Dynamic(target) => {
                let target_str = print_expr(target);
                if target.is_dereferencable() && !matches!(target.as_ref(), Expr::Constant(_)) {
                    format!("{target_str}({})", print_args(args))
                } else {
                    format!("({target_str})({})", print_args(args))
                }
            }
        },

        Expr::New { class, args } => {
            let class = match class.as_ref() {
                Expr::Constant(name) | Expr::Variable(name) => name.clone(),
                other => format!("({})", print_expr(other)),
            };
            format!("new {class}({})", print_args(args))
        }

        Expr::Clone(operand) => format!(
            "clone {}",
            print_child(operand, (UNARY_PRECEDENCE, Assoc::Right), Side::Right)
        ),

        Expr::ArrowFn { params, body } => format!(
            "fn({}) => {}",
            print_params(params),
            print_child(body, (ASSIGN_PRECEDENCE, Assoc::Right), Side::Right)
        ),

        Expr::Isset(list) => format!(
            "isset({})",
            list.iter().map(print_expr).collect::<Vec<_>>().join(", ")
        ),

        Expr::Empty(inner) => format!("empty({})", print_expr(inner)),

        Expr::Filter { expr, filter } => apply_filter(print_expr(expr), filter),
    }
}

/// Wrap already printed code in a filter call.
pub fn apply_filter(code: String, filter: &FilterCall) -> String {
    let mut args = vec![code];
    args.extend(filter.args.iter().map(|a| print_expr(&a.value)));
    format!("($this->filters->{})({})", filter.name, args.join(", "))
}

/// Wrap already printed code in a chain of filter calls, first filter innermost.
pub fn apply_filters(code: String, filters: &[FilterCall]) -> String {
    filters.iter().fold(code, apply_filter)
}

/// Comma separated argument list for a direct call.
pub fn print_args(args: &[Arg]) -> String {
    args.iter().map(print_arg).collect::<Vec<_>>().join(", ")
}

/// Parameters of an arrow function or a `{define}`.
pub fn print_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| match &p.default {
            Some(default) => format!(
                "{} = {}",
                p.name,
                print_child(default, (ASSIGN_PRECEDENCE, Assoc::Right), Side::Right)
            ),
            None => p.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Array items without the surrounding brackets.
pub fn print_items(items: &[ArrayItem]) -> String {
    items
        .iter()
        .map(|item| {
            let value = print_expr(&item.value);
            match (&item.key, item.unpack) {
                (_, true) => format!("...{value}"),
                (Some(key), false) => format!("{} => {value}", print_expr(key)),
                (None, false) => value,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_arg(arg: &Arg) -> String {
    let value = print_expr(&arg.value);
    match (&arg.name, arg.unpack) {
        (_, true) => format!("...{value}"),
        (Some(name), false) => format!("{name}: {value}"),
        (None, false) => value,
    }
}

/// Arguments as array items, for the sandbox's `call`/`callMethod`.
fn print_args_array(args: &[Arg]) -> String {
    args.iter()
        .map(|arg| {
            let value = print_expr(&arg.value);
            match (&arg.name, arg.unpack) {
                (_, true) => format!("...{value}"),
                (Some(name), false) => format!("'{name}' => {value}"),
                (None, false) => value,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_child(child: &Expr, parent: (u8, Assoc), side: Side) -> String {
    let printed = print_expr(child);
    if needs_parens(child, parent, side) {
        format!("({printed})")
    } else {
        printed
    }
}

fn needs_parens(child: &Expr, (precedence, assoc): (u8, Assoc), side: Side) -> bool {
    let Some((child_precedence, _)) = child.precedence() else {
        return false;
    };
    if child_precedence != precedence {
        return child_precedence > precedence;
    }
    match assoc {
        Assoc::Left => side == Side::Right,
        Assoc::Right => side == Side::Left,
        Assoc::None => true,
    }
}

fn print_deref(expr: &Expr) -> String {
    let printed = print_expr(expr);
    if expr.is_dereferencable() {
        printed
    } else {
        format!("({printed})")
    }
}

fn arrow(nullsafe: bool) -> &'static str {
    if nullsafe {
        "?->"
    } else {
        "->"
    }
}

fn print_member(member: &Member) -> String {
    match member {
        Member::Name(name) => name.clone(),
        Member::Expr(expr) => match expr.as_ref() {
            Expr::Variable(name) => name.clone(),
            other => format!("{{{}}}", print_expr(other)),
        },
    }
}

/// Member name as a runtime value.
fn print_member_value(member: &Member) -> String {
    match member {
        Member::Name(name) => format!("'{name}'"),
        Member::Expr(expr) => print_expr(expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mortar_parser::ast::BinaryOp;
    use mortar_parser::ExprParser;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn reprint(source: &str) -> String {
        print_expr(&ExprParser::parse_source(source).unwrap())
    }

    fn var(name: &str) -> Expr {
        Expr::Variable(name.into())
    }

    fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn test_minimal_parentheses() {
        assert_eq!(reprint("$a + $b * $c"), "$a + $b * $c");
        assert_eq!(reprint("($a + $b) * $c"), "($a + $b) * $c");
        assert_eq!(reprint("(($a))"), "$a");
        assert_eq!(reprint("$a - ($b - $c)"), "$a - ($b - $c)");
        assert_eq!(reprint("($a - $b) - $c"), "$a - $b - $c");
        assert_eq!(reprint("$a ** ($b ** $c)"), "$a ** $b ** $c");
        assert_eq!(reprint("($a ** $b) ** $c"), "($a ** $b) ** $c");
        assert_eq!(reprint("$a ?? ($b ?? $c)"), "$a ?? $b ?? $c");
    }

    #[test]
    fn test_non_associative_comparison() {
        let expr = bin(BinaryOp::Lt, bin(BinaryOp::Lt, var("$a"), var("$b")), var("$c"));
        assert_eq!(print_expr(&expr), "($a < $b) < $c");
        let expr = bin(BinaryOp::Equal, var("$a"), bin(BinaryOp::Equal, var("$b"), var("$c")));
        assert_eq!(print_expr(&expr), "$a == ($b == $c)");
    }

    fn not(operand: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    fn lit(value: &str) -> Expr {
        Expr::Literal(value.into())
    }

    #[test]
    fn test_php8_operator_order() {
        let foo = || Expr::Constant("Foo".into());
        let cases = [
            ("$a . $b + 1", bin(BinaryOp::Concat, var("$a"), bin(BinaryOp::Add, var("$b"), lit("1")))),
            ("$a + $b . $c", bin(BinaryOp::Concat, bin(BinaryOp::Add, var("$a"), var("$b")), var("$c"))),
            ("$a . $b << 2", bin(BinaryOp::Concat, var("$a"), bin(BinaryOp::Shl, var("$b"), lit("2")))),
            ("!$a instanceof Foo", not(bin(BinaryOp::Instanceof, var("$a"), foo()))),
            (
                "$a ?? $b ?: $c",
                Expr::Ternary {
                    condition: Box::new(bin(BinaryOp::Coalesce, var("$a"), var("$b"))),
                    then: None,
                    otherwise: Box::new(var("$c")),
                },
            ),
            (
                "-$a ** 2",
                Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(bin(BinaryOp::Pow, var("$a"), lit("2"))),
                },
            ),
            ("$a & $b == $c", bin(BinaryOp::BitAnd, var("$a"), bin(BinaryOp::Equal, var("$b"), var("$c")))),
        ];
        for (source, expected) in cases {
            assert_eq!(ExprParser::parse_source(source).unwrap(), expected, "{source}");
            assert_eq!(print_expr(&expected), source);
        }

        for (symbol, op) in [
            ("and", BinaryOp::LogicalAnd),
            ("xor", BinaryOp::LogicalXor),
            ("or", BinaryOp::LogicalOr),
        ] {
            let source = format!("$a = $b {symbol} $c");
            let assign = Expr::Assign {
                op: mortar_parser::ast::AssignOp::Assign,
                target: Box::new(var("$a")),
                value: Box::new(var("$b")),
            };
            let expected = bin(op, assign, var("$c"));
            assert_eq!(ExprParser::parse_source(&source).unwrap(), expected, "{source}");
            assert_eq!(print_expr(&expected), source);
        }
    }

    #[test]
    fn test_php8_operator_order_needs_parentheses() {
        let foo = || Expr::Constant("Foo".into());
        let concat = bin(BinaryOp::Concat, var("$a"), var("$b"));
        assert_eq!(print_expr(&bin(BinaryOp::Add, concat.clone(), lit("1"))), "($a . $b) + 1");
        assert_eq!(print_expr(&bin(BinaryOp::Shl, concat, lit("2"))), "($a . $b) << 2");
        assert_eq!(
            print_expr(&bin(BinaryOp::Instanceof, not(var("$a")), foo())),
            "(!$a) instanceof Foo"
        );
        let pow = bin(BinaryOp::Pow, var("$a"), not(var("$b")));
        assert_eq!(print_expr(&bin(BinaryOp::Instanceof, pow, foo())), "$a ** (!$b) instanceof Foo");
        assert_eq!(reprint("$a ** !($b instanceof Foo)"), "$a ** (!$b instanceof Foo)");
        let short = Expr::Ternary {
            condition: Box::new(var("$a")),
            then: None,
            otherwise: Box::new(var("$b")),
        };
        assert_eq!(print_expr(&bin(BinaryOp::Coalesce, short, var("$c"))), "($a ?: $b) ?? $c");
        let and = bin(BinaryOp::BitAnd, var("$a"), var("$b"));
        assert_eq!(print_expr(&bin(BinaryOp::Equal, and, var("$c"))), "($a & $b) == $c");
    }

    #[test]
    fn test_unary() {
        assert_eq!(reprint("-($a ** 2)"), "-$a ** 2");
        assert_eq!(reprint("(-$a) ** 2"), "(-$a) ** 2");
        assert_eq!(reprint("-(-$a)"), "- -$a");
        assert_eq!(reprint("!($a && $b)"), "!($a && $b)");
        assert_eq!(reprint("!$a instanceof Foo"), "!$a instanceof Foo");
        assert_eq!(reprint("(int)$a + 1"), "(int) $a + 1");
        assert_eq!(reprint("@$a[1]"), "@$a[1]");
    }

    #[test]
    fn test_ternary_and_assignment() {
        assert_eq!(reprint("$a ? $b : $c"), "$a ? $b : $c");
        assert_eq!(reprint("$a ?: $c"), "$a ?: $c");
        assert_eq!(reprint("($a ? 1 : 2) ? 3 : 4"), "($a ? 1 : 2) ? 3 : 4");
        assert_eq!(reprint("$a ? 1 : ($b ? 2 : 3)"), "$a ? 1 : ($b ? 2 : 3)");
        assert_eq!(reprint("$a = $b = 1"), "$a = $b = 1");
        assert_eq!(reprint("$a = ($b and $c)"), "$a = ($b and $c)");
        assert_eq!(reprint("($a = 1) + 2"), "($a = 1) + 2");
        assert_eq!(reprint("$x ??= $a ? 1 : 2"), "$x ??= $a ? 1 : 2");
    }

    #[test]
    fn test_member_access_and_calls() {
        assert_eq!(reprint("$a->b?->c($d, ...$e)"), "$a->b?->c($d, ...$e)");
        assert_eq!(reprint("$a->$b"), "$a->$b");
        assert_eq!(reprint("$a->{'x' . $b}"), "$a->{'x' . $b}");
        assert_eq!(reprint("Foo::bar(1)::BAZ"), "Foo::bar(1)::BAZ");
        assert_eq!(reprint("Foo::$bar[0]"), "Foo::$bar[0]");
        assert_eq!(reprint("(new Foo)->bar"), "(new Foo())->bar");
        assert_eq!(reprint("strlen(value: $a)"), "strlen(value: $a)");
        assert_eq!(reprint("$f(1)(2)"), "$f(1)(2)");
        assert_eq!(reprint("(fn($x, $y = 2) => $x + $y)(1)"), "(fn($x, $y = 2) => $x + $y)(1)");
    }

    #[test]
    fn test_arrays_and_constructs() {
        assert_eq!(reprint("['a' => 1, ...$b, 2]"), "['a' => 1, ...$b, 2]");
        assert_eq!(reprint("isset($a, $b['x'])"), "isset($a, $b['x'])");
        assert_eq!(reprint("empty($a)"), "empty($a)");
        assert_eq!(reprint("clone $a"), "clone $a");
        assert_eq!(reprint("$a[]"), "$a[]");
    }

    #[test]
    fn test_inline_filter() {
        assert_eq!(
            reprint("($a|truncate: 10, '...')"),
            "($this->filters->truncate)($a, 10, '...')"
        );
    }

    #[test]
    fn test_template_function() {
        let expr = Expr::Call {
            callee: Callee::TemplateFunction("asset".into()),
            args: vec![Arg::positional(Expr::Literal("'app.css'".into()))],
            mediated: false,
        };
        assert_eq!(print_expr(&expr), "($this->global->fn->asset)($this, 'app.css')");
    }

    #[test]
    fn test_mediated_forms() {
        let prop = Expr::Prop {
            object: Box::new(var("$user")),
            name: Member::Name("name".into()),
            nullsafe: false,
            mediated: true,
        };
        assert_eq!(print_expr(&prop), "$this->global->sandbox->prop($user, 'name')");

        let call = Expr::MethodCall {
            object: Box::new(prop),
            name: Member::Expr(Box::new(var("$m"))),
            args: vec![Arg {
                name: Some("limit".into()),
                unpack: false,
                value: Expr::Literal("3".into()),
            }],
            nullsafe: true,
            mediated: true,
        };
        assert_eq!(
            print_expr(&call),
            "$this->global->sandbox->callMethod($this->global->sandbox->prop($user, 'name'), $m, ['limit' => 3], true)"
        );

        let call = Expr::StaticCall {
            class: Box::new(Expr::Constant("Foo".into())),
            name: "bar".into(),
            args: vec![],
            mediated: true,
        };
        assert_eq!(print_expr(&call), "$this->global->sandbox->call([Foo::class, 'bar'], [])");

        let call = Expr::Call {
            callee: Callee::Dynamic(Box::new(var("$fn"))),
            args: vec![Arg::positional(var("$x"))],
            mediated: true,
        };
        assert_eq!(print_expr(&call), "$this->global->sandbox->call($fn, [$x])");
    }

    // --- Round trip ---

    fn leaf() -> impl Strategy<Value = Expr> {
        prop_oneof![
            prop::sample::select(vec!["$a", "$b", "$c"]).prop_map(|v| Expr::Variable(v.into())),
            prop::sample::select(vec!["1", "2.5", "'s'"]).prop_map(|v| Expr::Literal(v.into())),
        ]
    }

    fn expression() -> impl Strategy<Value = Expr> {
        leaf().prop_recursive(5, 48, 3, |inner| {
            let ops = BinaryOp::ALL.to_vec();
            prop_oneof![
                (prop::sample::select(ops), inner.clone(), inner.clone()).prop_map(
                    |(op, left, right)| {
                        // the right side of instanceof is a class name
                        let right = match op {
                            BinaryOp::Instanceof => Expr::Constant("Foo".into()),
                            _ => right,
                        };
                        Expr::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        }
                    }
                ),
                (
                    prop::sample::select(vec![UnaryOp::Neg, UnaryOp::Plus, UnaryOp::Not, UnaryOp::BitNot]),
                    inner.clone()
                )
                    .prop_map(|(op, operand)| Expr::Unary {
                        op,
                        operand: Box::new(operand),
                    }),
                (inner.clone(), prop::option::of(inner.clone()), inner.clone()).prop_map(
                    |(condition, then, otherwise)| Expr::Ternary {
                        condition: Box::new(condition),
                        then: then.map(Box::new),
                        otherwise: Box::new(otherwise),
                    }
                ),
                (prop::sample::select(vec!["$a", "$b"]), inner).prop_map(|(target, value)| {
                    Expr::Assign {
                        op: mortar_parser::ast::AssignOp::Assign,
                        target: Box::new(Expr::Variable(target.into())),
                        value: Box::new(value),
                    }
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_print_then_parse_is_identity(expr in expression()) {
            let printed = print_expr(&expr);
            let reparsed = ExprParser::parse_source(&printed).unwrap();
            prop_assert_eq!(reparsed, expr, "printed as {}", printed);
        }

        #[test]
        fn prop_printing_is_stable(expr in expression()) {
            let printed = print_expr(&expr);
            let reparsed = ExprParser::parse_source(&printed).unwrap();
            prop_assert_eq!(print_expr(&reparsed), printed);
        }
    }
}
