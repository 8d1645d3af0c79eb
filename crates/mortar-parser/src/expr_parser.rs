//! Expression parser for tag arguments.
//!
//! Parses rewritten expression tokens (see `passes`) into `Expr` nodes using
//! recursive descent with Pratt parsing for operator precedence. Handlers
//! drive the parser piecewise: a `{foreach}` parses an expression, the word
//! `as`, then the value target; a `{case}` parses a comma separated list.

use mortar_lexer::Position;

use crate::ast::{
    Arg, ArrayItem, AssignOp, Assoc, BinaryOp, Callee, Expr, FilterCall, Member, Param,
    PostfixOp, UnaryOp, ASSIGN_PRECEDENCE, LOWEST_PRECEDENCE, TERNARY_PRECEDENCE,
    UNARY_PRECEDENCE,
};
use crate::expr_lexer::{ExprKind, ExprLexer, ExprToken};
use crate::{passes, CompileError};

/// Expression parser over the tokens of one tag.
#[derive(Debug, Clone)]
pub struct ExprParser {
    tokens: Vec<ExprToken>,
    pos: usize,
    /// Position just past the last token, for errors at end of input.
    end: Position,
    /// Names callable as template functions.
    functions: Vec<String>,
}

impl ExprParser {
    /// Create a new expression parser for the given tokens.
    pub fn new(tokens: Vec<ExprToken>, end: Position) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<String>) -> Self {
        self.functions = functions;
        self
    }

    /// Lex, rewrite (without sandbox) and parse a complete expression.
    pub fn parse_source(source: &str) -> Result<Expr, CompileError> {
        let start = Position::new(0, 1, 1);
        let tokens = passes::rewrite(ExprLexer::tokenize(source, start)?, None, &[])?;
        let mut parser = ExprParser::new(tokens, start.advance(source));
        let expr = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(expr)
    }

    // --- Cursor ---

    pub fn is_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<ExprKind> {
        self.peek().map(|t| t.kind)
    }

    pub fn peek_kind_at(&self, n: usize) -> Option<ExprKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind)
    }

    /// Position of the current token, or the end position.
    pub fn position(&self) -> Position {
        self.peek().map(|t| t.position).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<ExprToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn try_consume(&mut self, kind: ExprKind) -> Option<ExprToken> {
        if self.peek_kind() == Some(kind) {
            self.advance()
        } else {
            None
        }
    }

    pub fn expect(&mut self, kind: ExprKind, what: &str) -> Result<ExprToken, CompileError> {
        match self.try_consume(kind) {
            Some(token) => Ok(token),
            None => Err(self.unexpected(&format!(", expecting {what}"))),
        }
    }

    /// Consume an identifier with the given text (case-insensitive).
    pub fn try_word(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_word(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_end(&self) -> Result<(), CompileError> {
        if self.is_end() {
            Ok(())
        } else {
            Err(self.unexpected(""))
        }
    }

    fn unexpected(&self, suffix: &str) -> CompileError {
        match self.peek() {
            Some(token) => {
                CompileError::syntax(format!("Unexpected '{}'{suffix}", token.text), token.position)
            }
            None => CompileError::syntax(format!("Unexpected end{suffix}"), self.end),
        }
    }

    // --- Tag-level entry points ---

    /// A bare name such as a block name.
    pub fn parse_name(&mut self) -> Result<String, CompileError> {
        match self.peek_kind() {
            Some(ExprKind::Identifier) => Ok(self.advance().map(|t| t.text).unwrap_or_default()),
            _ => Err(self.unexpected(", expecting name")),
        }
    }

    /// Full expression at the loosest precedence.
    pub fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary(LOWEST_PRECEDENCE)
    }

    /// Expression followed by top-level filters.
    pub fn parse_filtered(&mut self) -> Result<(Expr, Vec<FilterCall>), CompileError> {
        let expr = self.parse_expression()?;
        let filters = self.parse_filters()?;
        Ok((expr, filters))
    }

    /// `|name:arg,arg|name2` sequence, possibly empty.
    pub fn parse_filters(&mut self) -> Result<Vec<FilterCall>, CompileError> {
        let mut filters = Vec::new();
        while self.try_consume(ExprKind::Pipe).is_some() {
            let position = self.position();
            let name = self.parse_name()?;
            let mut args = Vec::new();
            if self.try_consume(ExprKind::Colon).is_some() {
                loop {
                    args.push(Arg::positional(self.parse_binary(ASSIGN_PRECEDENCE)?));
                    if self.try_consume(ExprKind::Comma).is_none() {
                        break;
                    }
                }
            }
            filters.push(FilterCall {
                name,
                args,
                position,
            });
        }
        Ok(filters)
    }

    /// Comma separated expressions up to the end or a stop token.
    pub fn parse_expressions(&mut self, stop: Option<ExprKind>) -> Result<Vec<Expr>, CompileError> {
        let mut list = Vec::new();
        while !self.is_end() && self.peek_kind() != stop {
            list.push(self.parse_expression()?);
            if self.try_consume(ExprKind::Comma).is_none() {
                break;
            }
        }
        Ok(list)
    }

    /// Comma separated array items (`value`, `key => value`, `...spread`)
    /// up to the end or a filter.
    pub fn parse_items(&mut self) -> Result<Vec<ArrayItem>, CompileError> {
        let mut items = Vec::new();
        while !self.is_end() && self.peek_kind() != Some(ExprKind::Pipe) {
            items.push(self.parse_array_item()?);
            if self.try_consume(ExprKind::Comma).is_none() {
                break;
            }
        }
        Ok(items)
    }

    // --- Operators ---

    fn parse_binary(&mut self, max: u8) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            if matches!(token.kind, ExprKind::Assign | ExprKind::CompoundAssign) {
                let position = token.position;
                let Some(op) = AssignOp::from_symbol(&token.text) else {
                    return Err(self.unexpected(""));
                };
                if !left.is_assignable() {
                    return Err(CompileError::syntax(
                        "Cannot assign to this expression",
                        position,
                    ));
                }
                self.pos += 1;
                let value = self.parse_binary(ASSIGN_PRECEDENCE)?;
                left = Expr::Assign {
                    op,
                    target: Box::new(left),
                    value: Box::new(value),
                };
                continue;
            }

            if token.kind == ExprKind::Question {
                if TERNARY_PRECEDENCE > max {
                    break;
                }
                self.pos += 1;
                let then = if self.try_consume(ExprKind::Colon).is_some() {
                    None
                } else {
                    let then = self.parse_binary(LOWEST_PRECEDENCE)?;
                    self.expect(ExprKind::Colon, "':'")?;
                    Some(Box::new(then))
                };
                let otherwise = self.parse_binary(TERNARY_PRECEDENCE - 1)?;
                left = Expr::Ternary {
                    condition: Box::new(left),
                    then,
                    otherwise: Box::new(otherwise),
                };
                continue;
            }

            let Some(op) = binary_op(token) else {
                break;
            };
            let (precedence, assoc) = op.precedence();
            if precedence > max {
                break;
            }
            self.pos += 1;
            let right = match assoc {
                Assoc::Right => self.parse_binary(precedence)?,
                Assoc::Left | Assoc::None => self.parse_binary(precedence - 1)?,
            };
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected(""));
        };

        let op = match token.kind {
            ExprKind::Not => Some(UnaryOp::Not),
            ExprKind::Minus => Some(UnaryOp::Neg),
            ExprKind::Plus => Some(UnaryOp::Plus),
            ExprKind::Tilde => Some(UnaryOp::BitNot),
            ExprKind::At => Some(UnaryOp::Silence),
            ExprKind::PlusPlus => Some(UnaryOp::PreInc),
            ExprKind::MinusMinus => Some(UnaryOp::PreDec),
            ExprKind::Cast => Some(UnaryOp::Cast(token.text.clone())),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let (precedence, _) = op.precedence();
            let operand = self.parse_binary(precedence)?;
            if matches!(op, UnaryOp::PreInc | UnaryOp::PreDec) && !operand.is_assignable() {
                return Err(CompileError::syntax(
                    format!("Cannot apply '{}' to this expression", token.text),
                    token.position,
                ));
            }
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        if token.is_word("new") {
            self.pos += 1;
            return self.parse_new();
        }
        if token.is_word("clone") {
            self.pos += 1;
            let operand = self.parse_binary(UNARY_PRECEDENCE)?;
            return Ok(Expr::Clone(Box::new(operand)));
        }
        if token.is_word("fn") && self.peek_kind_at(1) == Some(ExprKind::LParen) {
            self.pos += 1;
            return self.parse_arrow_fn();
        }

        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    // --- Operands ---

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let Some(token) = self.advance() else {
            return Err(self.unexpected(""));
        };

        match token.kind {
            ExprKind::Variable => Ok(Expr::Variable(token.text)),
            ExprKind::Integer | ExprKind::Float | ExprKind::String => Ok(Expr::Literal(token.text)),
            ExprKind::Intrinsic => {
                self.expect(ExprKind::LParen, "'('")?;
                let args = self.parse_args()?;
                Ok(Expr::Call {
                    callee: Callee::Function(token.text),
                    args,
                    mediated: false,
                })
            }
            ExprKind::Identifier => self.parse_name_expr(token),
            ExprKind::LBracket => {
                let items = self.parse_array_items(ExprKind::RBracket)?;
                Ok(Expr::Array(items))
            }
            ExprKind::LParen => {
                let mut expr = self.parse_expression()?;
                for filter in self.parse_filters()? {
                    expr = Expr::Filter {
                        expr: Box::new(expr),
                        filter,
                    };
                }
                self.expect(ExprKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected(""))
            }
        }
    }

    /// An identifier in operand position: construct, function call or constant.
    fn parse_name_expr(&mut self, token: ExprToken) -> Result<Expr, CompileError> {
        let lower = token.text.to_ascii_lowercase();
        let call_follows = self.peek_kind() == Some(ExprKind::LParen);

        if call_follows {
            match lower.as_str() {
                "isset" => {
                    self.pos += 1;
                    let list = self.parse_expressions(Some(ExprKind::RParen))?;
                    self.expect(ExprKind::RParen, "')'")?;
                    return Ok(Expr::Isset(list));
                }
                "empty" => {
                    self.pos += 1;
                    let expr = self.parse_expression()?;
                    self.expect(ExprKind::RParen, "')'")?;
                    return Ok(Expr::Empty(Box::new(expr)));
                }
                "array" | "list" => {
                    self.pos += 1;
                    let items = self.parse_array_items(ExprKind::RParen)?;
                    return Ok(Expr::Array(items));
                }
                _ => {}
            }

            self.pos += 1;
            let args = self.parse_args()?;
            let callee = if self.functions.iter().any(|f| *f == token.text) {
                Callee::TemplateFunction(token.text)
            } else {
                Callee::Function(token.text)
            };
            return Ok(Expr::Call {
                callee,
                args,
                mediated: false,
            });
        }

        Ok(Expr::Constant(token.text))
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, CompileError> {
        while let Some(kind) = self.peek_kind() {
            match kind {
                ExprKind::Arrow
                | ExprKind::NullsafeArrow
                | ExprKind::MediatedArrow
                | ExprKind::MediatedNullsafeArrow => {
                    self.pos += 1;
                    let nullsafe =
                        matches!(kind, ExprKind::NullsafeArrow | ExprKind::MediatedNullsafeArrow);
                    let mediated =
                        matches!(kind, ExprKind::MediatedArrow | ExprKind::MediatedNullsafeArrow);
                    let name = self.parse_member()?;
                    expr = match self.peek_kind() {
                        Some(open @ (ExprKind::LParen | ExprKind::MediatedCallOpen)) => {
                            self.pos += 1;
                            let args = self.parse_args()?;
                            Expr::MethodCall {
                                object: Box::new(expr),
                                name,
                                args,
                                nullsafe,
                                mediated: mediated || open == ExprKind::MediatedCallOpen,
                            }
                        }
                        _ => Expr::Prop {
                            object: Box::new(expr),
                            name,
                            nullsafe,
                            mediated,
                        },
                    };
                }
                ExprKind::DoubleColon | ExprKind::MediatedDoubleColon => {
                    self.pos += 1;
                    let Some(member) = self.advance() else {
                        return Err(self.unexpected(", expecting member name"));
                    };
                    expr = match member.kind {
                        ExprKind::Variable => Expr::StaticProp {
                            class: Box::new(expr),
                            name: member.text,
                        },
                        ExprKind::Identifier if self.peek_kind() == Some(ExprKind::LParen) => {
                            self.pos += 1;
                            let args = self.parse_args()?;
                            Expr::StaticCall {
                                class: Box::new(expr),
                                name: member.text,
                                args,
                                mediated: kind == ExprKind::MediatedDoubleColon,
                            }
                        }
                        ExprKind::Identifier => Expr::ClassConst {
                            class: Box::new(expr),
                            name: member.text,
                        },
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected(", expecting member name"));
                        }
                    };
                }
                ExprKind::LBracket => {
                    self.pos += 1;
                    let index = if self.try_consume(ExprKind::RBracket).is_some() {
                        None
                    } else {
                        let index = self.parse_expression()?;
                        self.expect(ExprKind::RBracket, "']'")?;
                        Some(Box::new(index))
                    };
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index,
                    };
                }
                ExprKind::LParen | ExprKind::MediatedCallOpen => {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Callee::Dynamic(Box::new(expr)),
                        args,
                        mediated: kind == ExprKind::MediatedCallOpen,
                    };
                }
                ExprKind::PlusPlus | ExprKind::MinusMinus if expr.is_assignable() => {
                    self.pos += 1;
                    let op = if kind == ExprKind::PlusPlus {
                        PostfixOp::Increment
                    } else {
                        PostfixOp::Decrement
                    };
                    return Ok(Expr::Postfix {
                        op,
                        operand: Box::new(expr),
                    });
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Member name after `->`: `name`, `$var` or `{expr}`.
    fn parse_member(&mut self) -> Result<Member, CompileError> {
        match self.peek_kind() {
            Some(ExprKind::Identifier) => Ok(Member::Name(self.parse_name()?)),
            Some(ExprKind::Variable) => {
                let text = self.advance().map(|t| t.text).unwrap_or_default();
                Ok(Member::Expr(Box::new(Expr::Variable(text))))
            }
            Some(ExprKind::LBrace) => {
                self.pos += 1;
                let expr = self.parse_expression()?;
                self.expect(ExprKind::RBrace, "'}'")?;
                Ok(Member::Expr(Box::new(expr)))
            }
            _ => Err(self.unexpected(", expecting member name")),
        }
    }

    /// Call arguments after the opening parenthesis, consuming the closing one.
    fn parse_args(&mut self) -> Result<Vec<Arg>, CompileError> {
        let mut args = Vec::new();
        while self.peek_kind() != Some(ExprKind::RParen) {
            let unpack = self.try_consume(ExprKind::Ellipsis).is_some();
            let name = if !unpack
                && self.peek_kind() == Some(ExprKind::Identifier)
                && self.peek_kind_at(1) == Some(ExprKind::Colon)
            {
                let name = self.parse_name()?;
                self.pos += 1;
                Some(name)
            } else {
                None
            };
            let value = self.parse_expression()?;
            args.push(Arg {
                name,
                unpack,
                value,
            });
            if self.try_consume(ExprKind::Comma).is_none() {
                break;
            }
        }
        self.expect(ExprKind::RParen, "')'")?;
        Ok(args)
    }

    /// Array items after the opening bracket, consuming `close`.
    fn parse_array_items(&mut self, close: ExprKind) -> Result<Vec<ArrayItem>, CompileError> {
        let mut items = Vec::new();
        while self.peek_kind() != Some(close) {
            items.push(self.parse_array_item()?);
            if self.try_consume(ExprKind::Comma).is_none() {
                break;
            }
        }
        let what = if close == ExprKind::RBracket { "']'" } else { "')'" };
        self.expect(close, what)?;
        Ok(items)
    }

    fn parse_array_item(&mut self) -> Result<ArrayItem, CompileError> {
        if self.try_consume(ExprKind::Ellipsis).is_some() {
            return Ok(ArrayItem {
                key: None,
                value: self.parse_expression()?,
                unpack: true,
            });
        }
        let first = self.parse_expression()?;
        if self.try_consume(ExprKind::DoubleArrow).is_some() {
            let value = self.parse_expression()?;
            return Ok(ArrayItem {
                key: Some(first),
                value,
                unpack: false,
            });
        }
        Ok(ArrayItem {
            key: None,
            value: first,
            unpack: false,
        })
    }

    fn parse_new(&mut self) -> Result<Expr, CompileError> {
        let class = match self.peek_kind() {
            Some(ExprKind::Identifier) => Expr::Constant(self.parse_name()?),
            Some(ExprKind::Variable) => {
                Expr::Variable(self.advance().map(|t| t.text).unwrap_or_default())
            }
            Some(ExprKind::LParen) => {
                self.pos += 1;
                let expr = self.parse_expression()?;
                self.expect(ExprKind::RParen, "')'")?;
                expr
            }
            _ => return Err(self.unexpected(", expecting class name")),
        };
        let args = match self.peek_kind() {
            Some(ExprKind::LParen | ExprKind::MediatedCallOpen) => {
                self.pos += 1;
                self.parse_args()?
            }
            _ => Vec::new(),
        };
        Ok(Expr::New {
            class: Box::new(class),
            args,
        })
    }

    fn parse_arrow_fn(&mut self) -> Result<Expr, CompileError> {
        self.expect(ExprKind::LParen, "'('")?;
        let mut params = Vec::new();
        while self.peek_kind() != Some(ExprKind::RParen) {
            let name = self.expect(ExprKind::Variable, "parameter")?.text;
            let default = if self.try_consume(ExprKind::Assign).is_some() {
                Some(self.parse_binary(TERNARY_PRECEDENCE)?)
            } else {
                None
            };
            params.push(Param { name, default });
            if self.try_consume(ExprKind::Comma).is_none() {
                break;
            }
        }
        self.expect(ExprKind::RParen, "')'")?;
        self.expect(ExprKind::DoubleArrow, "'=>'")?;
        let body = self.parse_binary(ASSIGN_PRECEDENCE)?;
        Ok(Expr::ArrowFn {
            params,
            body: Box::new(body),
        })
    }

    /// `$name` or `$name = default`, as used by `{define}` parameters.
    pub fn parse_param(&mut self) -> Result<Param, CompileError> {
        let name = self.expect(ExprKind::Variable, "parameter")?.text;
        let default = if self.try_consume(ExprKind::Assign).is_some() {
            Some(self.parse_binary(TERNARY_PRECEDENCE)?)
        } else {
            None
        };
        Ok(Param { name, default })
    }
}

fn binary_op(token: &ExprToken) -> Option<BinaryOp> {
    let op = match token.kind {
        ExprKind::Pow => BinaryOp::Pow,
        ExprKind::Star => BinaryOp::Mul,
        ExprKind::Slash => BinaryOp::Div,
        ExprKind::Percent => BinaryOp::Mod,
        ExprKind::Plus => BinaryOp::Add,
        ExprKind::Minus => BinaryOp::Sub,
        ExprKind::Shl => BinaryOp::Shl,
        ExprKind::Shr => BinaryOp::Shr,
        ExprKind::Dot => BinaryOp::Concat,
        ExprKind::Lt => BinaryOp::Lt,
        ExprKind::Le => BinaryOp::Le,
        ExprKind::Gt => BinaryOp::Gt,
        ExprKind::Ge => BinaryOp::Ge,
        ExprKind::Equal => BinaryOp::Equal,
        ExprKind::NotEqual => BinaryOp::NotEqual,
        ExprKind::Identical => BinaryOp::Identical,
        ExprKind::NotIdentical => BinaryOp::NotIdentical,
        ExprKind::Spaceship => BinaryOp::Spaceship,
        ExprKind::Amp => BinaryOp::BitAnd,
        ExprKind::Caret => BinaryOp::BitXor,
        ExprKind::AndAnd => BinaryOp::And,
        ExprKind::OrOr => BinaryOp::Or,
        ExprKind::Coalesce => BinaryOp::Coalesce,
        ExprKind::Identifier => {
            return match token.text.to_ascii_lowercase().as_str() {
                "and" | "or" | "xor" | "instanceof" => BinaryOp::from_symbol(&token.text),
                _ => None,
            }
        }
        _ => return None,
    };
    Some(op)
}
