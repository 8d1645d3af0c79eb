//! Abstract Syntax Tree for Mortar templates.
//!
//! Contains both template-level nodes (text, HTML elements, tag nodes)
//! and expression-level nodes (operators, calls, member access, filters).

use mortar_lexer::{ContentType, Position};

// ---------------------------------------------------------------------------
// Template-level AST
// ---------------------------------------------------------------------------

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub root: Fragment,
    pub content_type: ContentType,
}

/// Ordered sequence of sibling nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    pub children: Vec<Node>,
}

impl Fragment {
    pub fn new(children: Vec<Node>) -> Self {
        Self { children }
    }

    /// Append a node, merging adjacent text.
    pub fn push(&mut self, node: Node) {
        if let Node::Text(text) = &node {
            if let Some(Node::Text(last)) = self.children.last_mut() {
                last.push_str(text);
                return;
            }
        }
        self.children.push(node);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the fragment holds nothing but whitespace text.
    pub fn is_blank(&self) -> bool {
        self.children.iter().all(|n| match n {
            Node::Text(t) => t.trim().is_empty(),
            _ => false,
        })
    }
}

/// A node in the template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Static text, printed verbatim.
    Text(String),

    /// An HTML element with its attributes and content.
    Element(Box<Element>),

    /// An attribute inside a start tag.
    Attribute(Box<Attribute>),

    /// Markup of an element start or end tag captured for an `n:tag-` attribute.
    CapturedTag,

    /// `<!-- ... -->`
    HtmlComment(Fragment),

    /// `<!...>` or `<?...>`
    Bogus(Fragment),

    /// `{=expr|filters}` / `{$var}`
    Print(PrintNode),

    /// `{if}` / `{ifset}` with `{elseif}` / `{else}` branches.
    If(IfNode),

    /// `{foreach}` with optional `{else}`.
    Foreach(ForeachNode),

    /// `{for init; cond; step}`
    For(ForNode),

    /// `{while}`, with the condition on either the opening or closing tag.
    While(WhileNode),

    /// `{switch}` / `{case}` / `{default}`
    Switch(SwitchNode),

    /// `{continueIf}` / `{breakIf}` / `{skipIf}`
    Jump(JumpNode),

    /// `{try}` with optional `{else}`.
    Try(TryNode),

    /// `{rollback}`
    Rollback(Position),

    /// `{block}` named or anonymous.
    Block(BlockNode),

    /// `{define}`
    Define(DefineNode),

    /// `{include}`
    Include(IncludeNode),

    /// `{var}`
    Var(VarNode),

    /// `{default}`
    Default(VarNode),

    /// `{do}`
    Do(DoNode),

    /// `{capture}`
    Capture(CaptureNode),

    /// `{contentType}`
    ContentType(ContentTypeNode),

    /// `{first}` / `{last}` / `{sep}`
    IterationMarker(IterationMarkerNode),
}

/// An HTML element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    /// Attributes, whitespace between them, and tags placed inside the start tag.
    pub attributes: Fragment,
    /// `None` for void elements and `<x/>`.
    pub content: Option<Fragment>,
    pub self_closing: bool,
    /// False when the element was closed implicitly.
    pub has_end_tag: bool,
    /// Node produced by `n:tag-` attributes; wraps the start and end tag markup.
    pub tag_node: Option<Box<Node>>,
    pub position: Position,
}

/// An attribute inside a start tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<Fragment>,
    /// `None` for unquoted values.
    pub quote: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintNode {
    pub expr: Expr,
    pub filters: Vec<FilterCall>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub condition: Expr,
    pub content: Fragment,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    /// `{if}` followed by each `{elseif}`.
    pub branches: Vec<IfBranch>,
    pub otherwise: Option<Fragment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeachNode {
    pub expr: Expr,
    pub key: Option<Expr>,
    pub value: Expr,
    pub content: Fragment,
    pub otherwise: Option<Fragment>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub init: Vec<Expr>,
    pub condition: Vec<Expr>,
    pub step: Vec<Expr>,
    pub content: Fragment,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileNode {
    pub condition: Expr,
    pub content: Fragment,
    /// Condition was given on the closing tag: `{while}...{/while $cond}`.
    pub do_while: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub content: Fragment,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchNode {
    pub subject: Expr,
    pub cases: Vec<SwitchCase>,
    pub default: Option<Fragment>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Continue,
    Break,
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JumpNode {
    pub kind: JumpKind,
    pub condition: Expr,
    /// Name of the enclosing loop tag.
    pub within: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryNode {
    pub body: Fragment,
    pub otherwise: Option<Fragment>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    /// `None` for an anonymous block, which is printed inline.
    pub name: Option<String>,
    pub filters: Vec<FilterCall>,
    pub content: Fragment,
    pub position: Position,
}

/// Parameter of a `{define}` block or an arrow function.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Variable name including `$`.
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefineNode {
    pub name: String,
    pub params: Vec<Param>,
    pub content: Fragment,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncludeTarget {
    /// A block of this template, by name or by expression.
    Block(Expr),
    /// Another template file.
    File(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeNode {
    pub target: IncludeTarget,
    pub args: Vec<ArrayItem>,
    pub filters: Vec<FilterCall>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarNode {
    /// Each entry is an assignment `$name = value`.
    pub assignments: Vec<(String, Expr)>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoNode {
    pub expr: Expr,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureNode {
    pub target: Expr,
    pub filters: Vec<FilterCall>,
    pub content: Fragment,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentTypeNode {
    /// `None` when the content type is only known at render time.
    pub content_type: Option<ContentType>,
    /// Argument expression for a runtime content type.
    pub dynamic: Option<Expr>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationMarker {
    First,
    Last,
    Sep,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationMarkerNode {
    pub marker: IterationMarker,
    pub width: Option<Expr>,
    pub content: Fragment,
    pub otherwise: Option<Fragment>,
    pub position: Position,
}

// ---------------------------------------------------------------------------
// Expression-level AST
// ---------------------------------------------------------------------------

/// Expression variants.
///
/// Literals keep their source text; printing reproduces them verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `$name`
    Variable(String),

    /// Number or string literal: `42`, `1.5`, `'x'`
    Literal(String),

    /// Constant or class name: `true`, `PHP_EOL`, `\App\Model`
    Constant(String),

    /// `[1, 'k' => 2, ...$rest]`
    Array(Vec<ArrayItem>),

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    Postfix {
        op: PostfixOp,
        operand: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },

    /// `a ? b : c`; `then` is `None` for `a ?: c`.
    Ternary {
        condition: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },

    /// `$obj->name` / `$obj?->name`
    Prop {
        object: Box<Expr>,
        name: Member,
        nullsafe: bool,
        mediated: bool,
    },

    /// `$obj->name(...)`
    MethodCall {
        object: Box<Expr>,
        name: Member,
        args: Vec<Arg>,
        nullsafe: bool,
        mediated: bool,
    },

    /// `Class::name(...)`
    StaticCall {
        class: Box<Expr>,
        name: String,
        args: Vec<Arg>,
        mediated: bool,
    },

    /// `Class::$name`
    StaticProp {
        class: Box<Expr>,
        name: String,
    },

    /// `Class::NAME`, `Class::class`
    ClassConst {
        class: Box<Expr>,
        name: String,
    },

    /// `$a[index]`; `index` is `None` for `$a[]`.
    Index {
        object: Box<Expr>,
        index: Option<Box<Expr>>,
    },

    Call {
        callee: Callee,
        args: Vec<Arg>,
        mediated: bool,
    },

    New {
        class: Box<Expr>,
        args: Vec<Arg>,
    },

    Clone(Box<Expr>),

    /// `fn($x) => expr`
    ArrowFn {
        params: Vec<Param>,
        body: Box<Expr>,
    },

    Isset(Vec<Expr>),

    Empty(Box<Expr>),

    /// `(expr|name:args)` inside parentheses.
    Filter {
        expr: Box<Expr>,
        filter: FilterCall,
    },
}

impl Expr {
    /// Whether the expression can be the object of `->`, `[]` or `()` without parentheses.
    pub fn is_dereferencable(&self) -> bool {
        matches!(
            self,
            Expr::Variable(_)
                | Expr::Literal(_)
                | Expr::Constant(_)
                | Expr::Array(_)
                | Expr::Prop { .. }
                | Expr::MethodCall { .. }
                | Expr::StaticCall { .. }
                | Expr::StaticProp { .. }
                | Expr::ClassConst { .. }
                | Expr::Index { .. }
                | Expr::Call { .. }
                | Expr::Isset(_)
                | Expr::Empty(_)
                | Expr::Filter { .. }
        ) && !matches!(self, Expr::Literal(text) if !text.starts_with(['\'', '"']))
    }

    /// Whether the expression may appear on the left of an assignment.
    pub fn is_assignable(&self) -> bool {
        match self {
            Expr::Variable(_)
            | Expr::Prop { .. }
            | Expr::StaticProp { .. }
            | Expr::Index { .. } => true,
            Expr::Array(items) => items.iter().all(|i| !i.unpack && i.value.is_assignable()),
            _ => false,
        }
    }

    /// Precedence and associativity, `None` for atomic expressions.
    pub fn precedence(&self) -> Option<(u8, Assoc)> {
        match self {
            Expr::Unary { op, .. } => Some(op.precedence()),
            Expr::Binary { op, .. } => Some(op.precedence()),
            Expr::Assign { .. } | Expr::ArrowFn { .. } => Some((ASSIGN_PRECEDENCE, Assoc::Right)),
            Expr::Ternary { .. } => Some((TERNARY_PRECEDENCE, Assoc::None)),
            Expr::Clone(_) | Expr::New { .. } => Some((UNARY_PRECEDENCE, Assoc::Right)),
            _ => None,
        }
    }
}

/// Member name after `->` or `?->`.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Name(String),
    /// `$obj->$name` or `$obj->{expr}`
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Global function: `strlen(...)`
    Function(String),
    /// Function provided to templates: `($this->global->fn->name)($this, ...)`
    TemplateFunction(String),
    /// `$closure(...)`, `($a)(...)`
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub unpack: bool,
    pub value: Expr,
}

impl Arg {
    pub fn positional(value: Expr) -> Self {
        Self {
            name: None,
            unpack: false,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayItem {
    pub key: Option<Expr>,
    pub value: Expr,
    pub unpack: bool,
}

/// `|name:arg1,arg2`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Arg>,
    pub position: Position,
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
    None,
}

pub const UNARY_PRECEDENCE: u8 = 10;
pub const NOT_PRECEDENCE: u8 = 30;
pub const TERNARY_PRECEDENCE: u8 = 150;
pub const ASSIGN_PRECEDENCE: u8 = 160;
/// Loosest precedence, accepting any expression.
pub const LOWEST_PRECEDENCE: u8 = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    BitNot,
    Not,
    Silence,
    PreInc,
    PreDec,
    /// Normalized cast text such as `(int)`.
    Cast(String),
}

impl UnaryOp {
    pub fn symbol(&self) -> &str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::BitNot => "~",
            UnaryOp::Not => "!",
            UnaryOp::Silence => "@",
            UnaryOp::PreInc => "++",
            UnaryOp::PreDec => "--",
            UnaryOp::Cast(text) => text,
        }
    }

    pub fn precedence(&self) -> (u8, Assoc) {
        match self {
            UnaryOp::Not => (NOT_PRECEDENCE, Assoc::Right),
            _ => (UNARY_PRECEDENCE, Assoc::Right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

impl PostfixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            PostfixOp::Increment => "++",
            PostfixOp::Decrement => "--",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Pow,
    Instanceof,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Concat,
    Lt,
    Le,
    Gt,
    Ge,
    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Spaceship,
    BitAnd,
    BitXor,
    And,
    Or,
    Coalesce,
    LogicalAnd,
    LogicalXor,
    LogicalOr,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 27] = [
        BinaryOp::Pow,
        BinaryOp::Instanceof,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::Concat,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Equal,
        BinaryOp::NotEqual,
        BinaryOp::Identical,
        BinaryOp::NotIdentical,
        BinaryOp::Spaceship,
        BinaryOp::BitAnd,
        BinaryOp::BitXor,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Coalesce,
        BinaryOp::LogicalAnd,
        BinaryOp::LogicalXor,
        BinaryOp::LogicalOr,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Pow => "**",
            BinaryOp::Instanceof => "instanceof",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Concat => ".",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Identical => "===",
            BinaryOp::NotIdentical => "!==",
            BinaryOp::Spaceship => "<=>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
            BinaryOp::LogicalAnd => "and",
            BinaryOp::LogicalXor => "xor",
            BinaryOp::LogicalOr => "or",
        }
    }

    /// Host-language precedence (lower binds tighter) and associativity.
    pub fn precedence(self) -> (u8, Assoc) {
        match self {
            BinaryOp::Pow => (0, Assoc::Right),
            BinaryOp::Instanceof => (20, Assoc::Left),
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => (40, Assoc::Left),
            BinaryOp::Add | BinaryOp::Sub => (50, Assoc::Left),
            BinaryOp::Shl | BinaryOp::Shr => (60, Assoc::Left),
            BinaryOp::Concat => (65, Assoc::Left),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => (70, Assoc::None),
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::Identical
            | BinaryOp::NotIdentical
            | BinaryOp::Spaceship => (80, Assoc::None),
            BinaryOp::BitAnd => (90, Assoc::Left),
            BinaryOp::BitXor => (100, Assoc::Left),
            BinaryOp::And => (120, Assoc::Left),
            BinaryOp::Or => (130, Assoc::Left),
            BinaryOp::Coalesce => (140, Assoc::Right),
            BinaryOp::LogicalAnd => (170, Assoc::Left),
            BinaryOp::LogicalXor => (180, Assoc::Left),
            BinaryOp::LogicalOr => (190, Assoc::Left),
        }
    }

    /// Map operator text (case-insensitive for word operators) to an operator.
    pub fn from_symbol(text: &str) -> Option<BinaryOp> {
        if text == "<>" {
            return Some(BinaryOp::NotEqual);
        }
        let lower = text.to_ascii_lowercase();
        BinaryOp::ALL.into_iter().find(|op| op.symbol() == lower)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Coalesce,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Mod => "%=",
            AssignOp::Pow => "**=",
            AssignOp::Concat => ".=",
            AssignOp::BitAnd => "&=",
            AssignOp::BitOr => "|=",
            AssignOp::BitXor => "^=",
            AssignOp::Shl => "<<=",
            AssignOp::Shr => ">>=",
            AssignOp::Coalesce => "??=",
        }
    }

    pub fn from_symbol(text: &str) -> Option<AssignOp> {
        [
            AssignOp::Assign,
            AssignOp::Add,
            AssignOp::Sub,
            AssignOp::Mul,
            AssignOp::Div,
            AssignOp::Mod,
            AssignOp::Pow,
            AssignOp::Concat,
            AssignOp::BitAnd,
            AssignOp::BitOr,
            AssignOp::BitXor,
            AssignOp::Shl,
            AssignOp::Shr,
            AssignOp::Coalesce,
        ]
        .into_iter()
        .find(|op| op.symbol() == text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_merges_text() {
        let mut f = Fragment::default();
        f.push(Node::Text("a".into()));
        f.push(Node::Text("b".into()));
        f.push(Node::Rollback(Position::default()));
        f.push(Node::Text("c".into()));
        assert_eq!(f.children.len(), 3);
        assert_eq!(f.children[0], Node::Text("ab".into()));
    }

    #[test]
    fn test_blank_fragment() {
        assert!(Fragment::new(vec![Node::Text(" \n\t".into())]).is_blank());
        assert!(!Fragment::new(vec![Node::Text(" x ".into())]).is_blank());
    }

    #[test]
    fn test_precedence_order() {
        let order = [
            BinaryOp::Pow,
            BinaryOp::Instanceof,
            BinaryOp::Mul,
            BinaryOp::Add,
            BinaryOp::Shl,
            BinaryOp::Concat,
            BinaryOp::Lt,
            BinaryOp::Equal,
            BinaryOp::BitAnd,
            BinaryOp::BitXor,
            BinaryOp::And,
            BinaryOp::Or,
            BinaryOp::Coalesce,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].precedence().0 < pair[1].precedence().0, "{pair:?}");
        }
        assert!(BinaryOp::Coalesce.precedence().0 < TERNARY_PRECEDENCE);
        assert!(TERNARY_PRECEDENCE < ASSIGN_PRECEDENCE);
        assert!(ASSIGN_PRECEDENCE < BinaryOp::LogicalAnd.precedence().0);
    }

    #[test]
    fn test_operator_symbols_round_trip() {
        for op in BinaryOp::ALL {
            assert_eq!(BinaryOp::from_symbol(op.symbol()), Some(op));
        }
        assert_eq!(BinaryOp::from_symbol("AND"), Some(BinaryOp::LogicalAnd));
        assert_eq!(BinaryOp::from_symbol("<>"), Some(BinaryOp::NotEqual));
        assert_eq!(AssignOp::from_symbol("??="), Some(AssignOp::Coalesce));
    }

    #[test]
    fn test_dereferencable() {
        assert!(Expr::Variable("$a".into()).is_dereferencable());
        assert!(Expr::Literal("'abc'".into()).is_dereferencable());
        assert!(!Expr::Literal("1".into()).is_dereferencable());
        assert!(!Expr::New {
            class: Box::new(Expr::Constant("Foo".into())),
            args: vec![]
        }
        .is_dereferencable());
    }
}
