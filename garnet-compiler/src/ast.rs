use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl SourceSpan {
    pub fn new(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    pub fn single_point(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }

    pub fn union(a: &Self, b: &Self) -> Self {
        if a.line == 0 {
            return *b;
        }
        if b.line == 0 {
            return *a;
        }

        let (start_line, start_column) =
            if (a.line < b.line) || (a.line == b.line && a.column <= b.column) {
                (a.line, a.column)
            } else {
                (b.line, b.column)
            };

        let (end_line, end_column) = if (a.end_line > b.end_line)
            || (a.end_line == b.end_line && a.end_column >= b.end_column)
        {
            (a.end_line, a.end_column)
        } else {
            (b.end_line, b.end_column)
        };

        Self::new(start_line, start_column, end_line, end_column)
    }

    /// True when this span starts strictly after `other` ends.
    pub fn starts_after(&self, other: &Self) -> bool {
        (self.line, self.column) > (other.end_line, other.end_column)
    }

    pub fn contains(&self, other: &Self) -> bool {
        (self.line, self.column) <= (other.line, other.column)
            && (self.end_line, self.end_column) >= (other.end_line, other.end_column)
    }
}

impl Default for SourceSpan {
    fn default() -> Self {
        Self {
            line: 0,
            column: 0,
            end_line: 0,
            end_column: 0,
        }
    }
}

/// Identity of a syntax node. Unique across every module parsed by one compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub body: Body,
}

impl Module {
    pub fn new(body: Body) -> Self {
        Self { body }
    }
}

/// A statement sequence. Its value is the value of the last expression.
#[derive(Debug, Clone, Default)]
pub struct Body {
    pub expressions: Vec<Expression>,
}

impl Body {
    pub fn new(expressions: Vec<Expression>) -> Self {
        Self { expressions }
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub id: NodeId,
    pub span: SourceSpan,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Literal(Literal),
    Local(String),
    InstanceVar(String),
    Global(String),
    Constant(String),
    SelfRef,
    Assignment(AssignmentExpression),
    Call(CallExpression),
    Yield(YieldExpression),
    Return(ReturnExpression),
    Break(BreakExpression),
    Conditional(ConditionalExpression),
    While(WhileExpression),
    Logical(LogicalExpression),
    Not(Box<Expression>),
    Function(FunctionDefinition),
    Class(ClassDefinition),
    Lib(LibDefinition),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Char(char),
    Boolean(bool),
    Nil,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignTarget {
    Local(String),
    InstanceVar(String),
    Global(String),
    Constant(String),
}

#[derive(Debug, Clone)]
pub struct AssignmentExpression {
    pub target: AssignTarget,
    pub target_span: SourceSpan,
    pub value: Box<Expression>,
}

#[derive(Debug, Clone)]
pub struct CallExpression {
    pub receiver: Option<Box<Expression>>,
    pub name: String,
    pub name_span: SourceSpan,
    pub arguments: Vec<Expression>,
    pub block: Option<Block>,
}

/// A block literal attached to a call site.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: NodeId,
    pub span: SourceSpan,
    pub parameters: Vec<BlockParameter>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub struct BlockParameter {
    pub name: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct YieldExpression {
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct ReturnExpression {
    pub value: Option<Box<Expression>>,
}

#[derive(Debug, Clone)]
pub struct BreakExpression {
    pub value: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalKind {
    If,
    Unless,
}

#[derive(Debug, Clone)]
pub struct ConditionalExpression {
    pub kind: ConditionalKind,
    pub condition: Box<Expression>,
    pub consequent: Body,
    pub alternative: Option<Body>,
}

#[derive(Debug, Clone)]
pub struct WhileExpression {
    pub condition: Box<Expression>,
    pub body: Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct LogicalExpression {
    pub operator: LogicalOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub id: NodeId,
    pub name: String,
    pub name_span: SourceSpan,
    pub parameters: Vec<FunctionParameter>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub struct FunctionParameter {
    pub name: String,
    pub span: SourceSpan,
    pub restriction: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: String,
    pub name_span: SourceSpan,
    pub type_parameters: Vec<String>,
    pub superclass: Option<String>,
    pub methods: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone)]
pub struct LibDefinition {
    pub name: String,
    pub name_span: SourceSpan,
    pub functions: Vec<ExternFunction>,
}

#[derive(Debug, Clone)]
pub struct ExternFunction {
    pub name: String,
    pub span: SourceSpan,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Option<String>,
}

impl Expression {
    pub fn is_true_literal(&self) -> bool {
        matches!(self.kind, ExpressionKind::Literal(Literal::Boolean(true)))
    }

    /// Direct sub-expressions, including block bodies but not nested definitions.
    pub fn children(&self) -> Vec<&Expression> {
        let mut children = Vec::new();
        match &self.kind {
            ExpressionKind::Literal(_)
            | ExpressionKind::Local(_)
            | ExpressionKind::InstanceVar(_)
            | ExpressionKind::Global(_)
            | ExpressionKind::Constant(_)
            | ExpressionKind::SelfRef
            | ExpressionKind::Function(_)
            | ExpressionKind::Class(_)
            | ExpressionKind::Lib(_) => {}
            ExpressionKind::Assignment(assignment) => children.push(assignment.value.as_ref()),
            ExpressionKind::Call(call) => {
                if let Some(receiver) = &call.receiver {
                    children.push(receiver.as_ref());
                }
                children.extend(call.arguments.iter());
                if let Some(block) = &call.block {
                    children.extend(block.body.expressions.iter());
                }
            }
            ExpressionKind::Yield(yield_expr) => children.extend(yield_expr.arguments.iter()),
            ExpressionKind::Return(ReturnExpression { value })
            | ExpressionKind::Break(BreakExpression { value }) => {
                if let Some(value) = value {
                    children.push(value.as_ref());
                }
            }
            ExpressionKind::Conditional(conditional) => {
                children.push(conditional.condition.as_ref());
                children.extend(conditional.consequent.expressions.iter());
                if let Some(alternative) = &conditional.alternative {
                    children.extend(alternative.expressions.iter());
                }
            }
            ExpressionKind::While(while_expr) => {
                children.push(while_expr.condition.as_ref());
                children.extend(while_expr.body.expressions.iter());
            }
            ExpressionKind::Logical(logical) => {
                children.push(logical.left.as_ref());
                children.push(logical.right.as_ref());
            }
            ExpressionKind::Not(operand) => children.push(operand.as_ref()),
        }
        children
    }

    pub fn contains_yield(&self) -> bool {
        matches!(self.kind, ExpressionKind::Yield(_))
            || self.children().into_iter().any(Expression::contains_yield)
    }
}

impl FunctionDefinition {
    /// A method yields when a `yield` appears anywhere in its body, blocks included.
    pub fn yields(&self) -> bool {
        self.body.expressions.iter().any(Expression::contains_yield)
    }
}
