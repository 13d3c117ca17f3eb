use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::lexer::{Keyword, Token, TokenKind};
use crate::source::SourceFile;

#[derive(Copy, Clone, PartialEq, PartialOrd)]
enum Precedence {
    Lowest = 0,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
}

impl Precedence {
    fn of(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::PipePipe => Some(Precedence::Or),
            TokenKind::AmpersandAmpersand => Some(Precedence::And),
            TokenKind::DoubleEqual | TokenKind::BangEqual => Some(Precedence::Equality),
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => Some(Precedence::Comparison),
            TokenKind::Plus | TokenKind::Minus => Some(Precedence::Term),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some(Precedence::Factor),
            _ => None,
        }
    }
}

/// Names known to be locals at the current parse position. A bare identifier
/// that is not one of these parses as a call with an implicit receiver.
struct LocalScope {
    names: HashSet<String>,
    inherits: bool,
}

pub struct Parser<'a> {
    _source: &'a SourceFile,
    tokens: Vec<Token>,
    current: usize,
    diagnostics: Diagnostics,
    next_node_id: u32,
    scopes: Vec<LocalScope>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a SourceFile, tokens: Vec<Token>) -> Self {
        Self {
            _source: source,
            tokens,
            current: 0,
            diagnostics: Diagnostics::new(),
            next_node_id: 0,
            scopes: vec![LocalScope {
                names: HashSet::new(),
                inherits: false,
            }],
        }
    }

    /// Continue node numbering from an earlier parse so ids stay unique per compilation.
    pub fn starting_at(mut self, first: NodeId) -> Self {
        self.next_node_id = first.0;
        self
    }

    pub fn next_node_id(&self) -> NodeId {
        NodeId(self.next_node_id)
    }

    fn span_from_token(token: &Token) -> SourceSpan {
        let len = token.lexeme.chars().count().max(1);
        SourceSpan::new(
            token.line,
            token.column,
            token.line,
            token.column + len.saturating_sub(1),
        )
    }

    fn make_expression(&mut self, span: SourceSpan, kind: ExpressionKind) -> Expression {
        Expression {
            id: self.allocate_node_id(),
            span,
            kind,
        }
    }

    fn union_spans(a: &SourceSpan, b: &SourceSpan) -> SourceSpan {
        SourceSpan::union(a, b)
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    pub fn parse(&mut self) -> Result<Module> {
        let body = self.parse_body_until(terminator_eof)?;
        Ok(Module::new(body))
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    fn push_scope(&mut self, inherits: bool) {
        self.scopes.push(LocalScope {
            names: HashSet::new(),
            inherits,
        });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_local(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.to_string());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.names.contains(name) {
                return true;
            }
            if !scope.inherits {
                break;
            }
        }
        false
    }

    fn parse_body_until(&mut self, terminator: fn(&TokenKind) -> bool) -> Result<Body> {
        let mut expressions = Vec::new();

        loop {
            self.skip_separators();
            if self.is_at_end() || terminator(self.peek_kind()) {
                break;
            }

            if self.check_keyword(Keyword::Require) {
                self.parse_require()?;
            } else {
                expressions.push(self.parse_statement()?);
            }

            match self.peek_kind() {
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.advance();
                }
                kind if terminator(kind) || matches!(kind, TokenKind::Eof) => {}
                _ => {
                    return self.unexpected("expected newline or ';' after expression");
                }
            }
        }

        Ok(Body::new(expressions))
    }

    fn parse_require(&mut self) -> Result<()> {
        self.advance(); // consume 'require'
        match self.peek_kind() {
            TokenKind::StringLiteral(_) => {
                self.advance();
                Ok(())
            }
            _ => self.unexpected("expected a string after 'require'"),
        }
    }

    fn parse_statement(&mut self) -> Result<Expression> {
        let mut expression = match self.peek_kind() {
            TokenKind::Keyword(Keyword::Def) => self.parse_def_expression()?,
            TokenKind::Keyword(Keyword::Class) => self.parse_class()?,
            TokenKind::Keyword(Keyword::Lib) => self.parse_lib()?,
            _ => self.parse_expression()?,
        };

        // Postfix modifiers: `break if done`, `return 1 unless ok`.
        while let Some(kind) = match self.peek_kind() {
            TokenKind::Keyword(Keyword::If) => Some(ConditionalKind::If),
            TokenKind::Keyword(Keyword::Unless) => Some(ConditionalKind::Unless),
            _ => None,
        } {
            self.advance();
            let condition = self.parse_expression()?;
            let span = Self::union_spans(&expression.span, &condition.span);
            expression = self.make_expression(
                span,
                ExpressionKind::Conditional(ConditionalExpression {
                    kind,
                    condition: Box::new(condition),
                    consequent: Body::new(vec![expression]),
                    alternative: None,
                }),
            );
        }

        Ok(expression)
    }

    fn parse_def_expression(&mut self) -> Result<Expression> {
        let def_token = self.peek().clone();
        let function = self.parse_def()?;
        let span = Self::union_spans(&Self::span_from_token(&def_token), &function.name_span);
        Ok(self.make_expression(
            span,
            ExpressionKind::Function(function),
        ))
    }

    fn parse_def(&mut self) -> Result<FunctionDefinition> {
        self.expect_keyword(Keyword::Def, "expected 'def'")?;
        let id = self.allocate_node_id();
        let name_token = self.peek().clone();
        if name_token.kind != TokenKind::Identifier {
            return self.unexpected("expected method name after 'def'");
        }
        self.advance();
        let name_span = Self::span_from_token(&name_token);

        self.push_scope(false);
        let signature = self.parse_def_parameters_and_body();
        self.pop_scope();
        let (parameters, body) = signature?;

        self.expect_keyword(Keyword::End, "expected 'end' to close method definition")?;

        Ok(FunctionDefinition {
            id,
            name: name_token.lexeme,
            name_span,
            parameters,
            body,
        })
    }

    fn parse_def_parameters_and_body(&mut self) -> Result<(Vec<FunctionParameter>, Body)> {
        let parameters = self.parse_parameters()?;
        for parameter in &parameters {
            self.declare_local(&parameter.name);
        }
        let body = self.parse_body_until(terminator_end)?;
        Ok((parameters, body))
    }

    fn parse_parameters(&mut self) -> Result<Vec<FunctionParameter>> {
        let mut parameters = Vec::new();
        if !matches!(self.peek_kind(), TokenKind::LParen) {
            return Ok(parameters);
        }
        self.advance(); // consume '('
        self.skip_newlines();

        while !matches!(self.peek_kind(), TokenKind::RParen) {
            let name_token = self.peek().clone();
            if name_token.kind != TokenKind::Identifier {
                return self.unexpected("expected parameter name");
            }
            self.advance();

            let restriction = if matches!(self.peek_kind(), TokenKind::Colon) {
                self.advance();
                Some(self.parse_type_name()?)
            } else {
                None
            };

            parameters.push(FunctionParameter {
                name: name_token.lexeme.clone(),
                span: Self::span_from_token(&name_token),
                restriction,
            });

            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
            } else if !matches!(self.peek_kind(), TokenKind::RParen) {
                return self.unexpected("expected ',' or ')' in parameter list");
            }
        }

        self.expect_token(TokenKind::RParen, "expected ')' after parameters")?;
        Ok(parameters)
    }

    fn parse_type_name(&mut self) -> Result<String> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Constant => {
                self.advance();
                Ok(token.lexeme)
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.advance();
                Ok("Nil".to_string())
            }
            _ => self.unexpected("expected a type name"),
        }
    }

    fn parse_class(&mut self) -> Result<Expression> {
        let class_token = self.advance().clone();
        let name_token = self.peek().clone();
        if name_token.kind != TokenKind::Constant {
            return self.unexpected("expected class name after 'class'");
        }
        self.advance();

        let mut type_parameters = Vec::new();
        if matches!(self.peek_kind(), TokenKind::LParen) {
            self.advance();
            loop {
                type_parameters.push(self.parse_type_name()?);
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect_token(TokenKind::RParen, "expected ')' after type parameters")?;
        }

        let superclass = if matches!(self.peek_kind(), TokenKind::Less) {
            self.advance();
            Some(self.parse_type_name()?)
        } else {
            None
        };

        let mut methods = Vec::new();
        loop {
            self.skip_separators();
            match self.peek_kind() {
                TokenKind::Keyword(Keyword::End) => break,
                TokenKind::Keyword(Keyword::Def) => methods.push(self.parse_def()?),
                _ => return self.unexpected("expected 'def' or 'end' inside class body"),
            }
        }
        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close class")?;

        let span = Self::union_spans(
            &Self::span_from_token(&class_token),
            &Self::span_from_token(&end_token),
        );
        Ok(self.make_expression(
            span,
            ExpressionKind::Class(ClassDefinition {
                name: name_token.lexeme.clone(),
                name_span: Self::span_from_token(&name_token),
                type_parameters,
                superclass,
                methods,
            }),
        ))
    }

    fn parse_lib(&mut self) -> Result<Expression> {
        let lib_token = self.advance().clone();
        let name_token = self.peek().clone();
        if name_token.kind != TokenKind::Constant {
            return self.unexpected("expected library name after 'lib'");
        }
        self.advance();

        let mut functions = Vec::new();
        loop {
            self.skip_separators();
            match self.peek_kind() {
                TokenKind::Keyword(Keyword::End) => break,
                TokenKind::Keyword(Keyword::Fun) => {
                    self.advance();
                    let fun_name = self.peek().clone();
                    if fun_name.kind != TokenKind::Identifier {
                        return self.unexpected("expected function name after 'fun'");
                    }
                    self.advance();
                    let parameters = self.parse_parameters()?;
                    let return_type = if matches!(self.peek_kind(), TokenKind::Colon) {
                        self.advance();
                        Some(self.parse_type_name()?)
                    } else {
                        None
                    };
                    functions.push(ExternFunction {
                        name: fun_name.lexeme.clone(),
                        span: Self::span_from_token(&fun_name),
                        parameters,
                        return_type,
                    });
                }
                _ => return self.unexpected("expected 'fun' or 'end' inside lib"),
            }
        }
        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close lib")?;

        let span = Self::union_spans(
            &Self::span_from_token(&lib_token),
            &Self::span_from_token(&end_token),
        );
        Ok(self.make_expression(
            span,
            ExpressionKind::Lib(LibDefinition {
                name: name_token.lexeme.clone(),
                name_span: Self::span_from_token(&name_token),
                functions,
            }),
        ))
    }

    fn parse_expression(&mut self) -> Result<Expression> {
        if let Some(target) = self.assignment_target() {
            return self.parse_assignment(target);
        }

        let condition = self.parse_expression_prec(Precedence::Lowest)?;
        if !matches!(self.peek_kind(), TokenKind::Question) {
            return Ok(condition);
        }

        self.advance(); // consume '?'
        self.skip_newlines();
        let then_branch = self.parse_expression()?;
        self.skip_newlines();
        self.expect_token(TokenKind::Colon, "expected ':' in conditional expression")?;
        self.skip_newlines();
        let else_branch = self.parse_expression()?;

        let span = Self::union_spans(&condition.span, &else_branch.span);
        Ok(self.make_expression(
            span,
            ExpressionKind::Conditional(ConditionalExpression {
                kind: ConditionalKind::If,
                condition: Box::new(condition),
                consequent: Body::new(vec![then_branch]),
                alternative: Some(Body::new(vec![else_branch])),
            }),
        ))
    }

    fn assignment_target(&self) -> Option<AssignTarget> {
        let is_assignment = matches!(
            self.peek_kind_at(1),
            Some(
                TokenKind::Equal
                    | TokenKind::PlusEqual
                    | TokenKind::MinusEqual
                    | TokenKind::StarEqual
            )
        );
        if !is_assignment {
            return None;
        }

        let token = self.peek();
        match token.kind {
            TokenKind::Identifier => Some(AssignTarget::Local(token.lexeme.clone())),
            TokenKind::InstanceVar => Some(AssignTarget::InstanceVar(token.lexeme.clone())),
            TokenKind::Global => Some(AssignTarget::Global(token.lexeme.clone())),
            TokenKind::Constant => Some(AssignTarget::Constant(token.lexeme.clone())),
            _ => None,
        }
    }

    fn parse_assignment(&mut self, target: AssignTarget) -> Result<Expression> {
        let target_token = self.advance().clone();
        let target_span = Self::span_from_token(&target_token);
        let operator = self.advance().clone();
        self.skip_newlines();

        if let AssignTarget::Local(name) = &target {
            self.declare_local(name);
        }

        let mut value = self.parse_expression()?;

        // `a += b` is `a = a + b`
        let compound = match operator.kind {
            TokenKind::PlusEqual => Some("+"),
            TokenKind::MinusEqual => Some("-"),
            TokenKind::StarEqual => Some("*"),
            _ => None,
        };
        if let Some(method) = compound {
            let read_kind = match &target {
                AssignTarget::Local(name) => ExpressionKind::Local(name.clone()),
                AssignTarget::InstanceVar(name) => ExpressionKind::InstanceVar(name.clone()),
                AssignTarget::Global(name) => ExpressionKind::Global(name.clone()),
                AssignTarget::Constant(name) => ExpressionKind::Constant(name.clone()),
            };
            let current = self.make_expression(target_span, read_kind);
            let span = Self::union_spans(&target_span, &value.span);
            value = self.make_expression(
                span,
                ExpressionKind::Call(CallExpression {
                    receiver: Some(Box::new(current)),
                    name: method.to_string(),
                    name_span: Self::span_from_token(&operator),
                    arguments: vec![value],
                    block: None,
                }),
            );
        }

        let span = Self::union_spans(&target_span, &value.span);
        Ok(self.make_expression(
            span,
            ExpressionKind::Assignment(AssignmentExpression {
                target,
                target_span,
                value: Box::new(value),
            }),
        ))
    }

    fn parse_expression_prec(&mut self, precedence: Precedence) -> Result<Expression> {
        let mut expr = self.parse_unary()?;

        loop {
            let next_precedence = match Precedence::of(self.peek_kind()) {
                Some(p) => p,
                None => break,
            };

            if precedence >= next_precedence {
                break;
            }

            expr = self.parse_infix_expression(expr, next_precedence)?;
        }

        Ok(expr)
    }

    fn parse_infix_expression(
        &mut self,
        left: Expression,
        precedence: Precedence,
    ) -> Result<Expression> {
        let operator_token = self.advance().clone();
        let operator_span = Self::span_from_token(&operator_token);
        self.skip_newlines();
        let right = self.parse_expression_prec(precedence)?;
        let span = Self::union_spans(&Self::union_spans(&left.span, &operator_span), &right.span);

        let kind = match operator_token.kind {
            TokenKind::PipePipe | TokenKind::AmpersandAmpersand => {
                let operator = if operator_token.kind == TokenKind::PipePipe {
                    LogicalOperator::Or
                } else {
                    LogicalOperator::And
                };
                ExpressionKind::Logical(LogicalExpression {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            // Arithmetic and comparison operators are ordinary method calls.
            _ => ExpressionKind::Call(CallExpression {
                receiver: Some(Box::new(left)),
                name: operator_token.lexeme.clone(),
                name_span: operator_span,
                arguments: vec![right],
                block: None,
            }),
        };

        Ok(self.make_expression(span, kind))
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        match self.peek_kind() {
            TokenKind::Bang => {
                let bang = self.advance().clone();
                let operand = self.parse_unary()?;
                let span = Self::union_spans(&Self::span_from_token(&bang), &operand.span);
                Ok(self.make_expression(
                    span,
                    ExpressionKind::Not(Box::new(operand)),
                ))
            }
            TokenKind::Minus => {
                let minus = self.advance().clone();
                let minus_span = Self::span_from_token(&minus);
                let operand = self.parse_unary()?;
                let span = Self::union_spans(&minus_span, &operand.span);
                let kind = match operand.kind {
                    ExpressionKind::Literal(Literal::Integer(value)) => {
                        ExpressionKind::Literal(Literal::Integer(-value))
                    }
                    ExpressionKind::Literal(Literal::Float(value)) => {
                        ExpressionKind::Literal(Literal::Float(-value))
                    }
                    _ => ExpressionKind::Call(CallExpression {
                        receiver: Some(Box::new(operand)),
                        name: "-".to_string(),
                        name_span: minus_span,
                        arguments: Vec::new(),
                        block: None,
                    }),
                };
                Ok(self.make_expression(span, kind))
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_postfix(&mut self, mut expr: Expression) -> Result<Expression> {
        loop {
            if matches!(self.peek_kind(), TokenKind::Dot) {
                self.advance();
                self.skip_newlines();
                let name_token = self.peek().clone();
                if !matches!(name_token.kind, TokenKind::Identifier | TokenKind::Constant) {
                    return self.unexpected("expected method name after '.'");
                }
                self.advance();
                expr = self.finish_call(Some(expr), &name_token)?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn finish_call(
        &mut self,
        receiver: Option<Expression>,
        name_token: &Token,
    ) -> Result<Expression> {
        let name_span = Self::span_from_token(name_token);
        let arguments = self.parse_call_arguments()?;

        let mut span = receiver
            .as_ref()
            .map(|receiver| Self::union_spans(&receiver.span, &name_span))
            .unwrap_or(name_span);
        if let Some(last) = arguments.last() {
            span = Self::union_spans(&span, &last.span);
        }

        let block = if matches!(
            self.peek_kind(),
            TokenKind::LBrace | TokenKind::Keyword(Keyword::Do)
        ) {
            let block = self.parse_block()?;
            span = Self::union_spans(&span, &block.span);
            Some(block)
        } else {
            None
        };

        Ok(self.make_expression(
            span,
            ExpressionKind::Call(CallExpression {
                receiver: receiver.map(Box::new),
                name: name_token.lexeme.clone(),
                name_span,
                arguments,
                block,
            }),
        ))
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Expression>> {
        let mut arguments = Vec::new();

        if matches!(self.peek_kind(), TokenKind::LParen) {
            self.advance();
            self.skip_newlines();
            while !matches!(self.peek_kind(), TokenKind::RParen) {
                arguments.push(self.parse_expression()?);
                self.skip_newlines();
                match self.peek_kind() {
                    TokenKind::Comma => {
                        self.advance();
                        self.skip_newlines();
                    }
                    TokenKind::RParen => {}
                    _ => return self.unexpected("expected ',' or ')' in argument list"),
                }
            }
            self.expect_token(TokenKind::RParen, "expected ')' after arguments")?;
        } else if starts_command_argument(self.peek_kind()) {
            loop {
                arguments.push(self.parse_expression()?);
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    self.advance();
                    self.skip_newlines();
                } else {
                    break;
                }
            }
        }

        Ok(arguments)
    }

    fn parse_block(&mut self) -> Result<Block> {
        let open = self.advance().clone();
        let braced = open.kind == TokenKind::LBrace;
        let id = self.allocate_node_id();

        let mut parameters = Vec::new();
        if matches!(self.peek_kind(), TokenKind::Pipe) {
            self.advance();
            while !matches!(self.peek_kind(), TokenKind::Pipe) {
                let token = self.peek().clone();
                if token.kind != TokenKind::Identifier {
                    return self.unexpected("expected block parameter name");
                }
                self.advance();
                parameters.push(BlockParameter {
                    name: token.lexeme.clone(),
                    span: Self::span_from_token(&token),
                });
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    self.advance();
                } else if !matches!(self.peek_kind(), TokenKind::Pipe) {
                    return self.unexpected("expected ',' or '|' in block parameters");
                }
            }
            self.advance(); // consume closing '|'
        }

        self.push_scope(true);
        for parameter in &parameters {
            self.declare_local(&parameter.name);
        }
        let terminator = if braced { terminator_rbrace } else { terminator_end };
        let body = self.parse_body_until(terminator);
        self.pop_scope();
        let body = body?;

        let close = self.peek().clone();
        if braced {
            self.expect_token(TokenKind::RBrace, "expected '}' to close block")?;
        } else {
            self.expect_keyword(Keyword::End, "expected 'end' to close block")?;
        }

        Ok(Block {
            id,
            span: Self::union_spans(
                &Self::span_from_token(&open),
                &Self::span_from_token(&close),
            ),
            parameters,
            body,
        })
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        let token = self.peek().clone();
        let token_span = Self::span_from_token(&token);
        let literal = match &token.kind {
            TokenKind::IntegerLiteral(value) => Some(Literal::Integer(*value)),
            TokenKind::FloatLiteral(value) => Some(Literal::Float(*value)),
            TokenKind::StringLiteral(value) => Some(Literal::String(value.clone())),
            TokenKind::CharLiteral(value) => Some(Literal::Char(*value)),
            TokenKind::BooleanLiteral(value) => Some(Literal::Boolean(*value)),
            TokenKind::Keyword(Keyword::Nil) => Some(Literal::Nil),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(self.make_expression(
                token_span,
                ExpressionKind::Literal(literal),
            ));
        }

        match token.kind {
            TokenKind::Identifier => {
                self.advance();
                if self.is_local(&token.lexeme) && !matches!(self.peek_kind(), TokenKind::LParen) {
                    Ok(self.make_expression(
                        token_span,
                        ExpressionKind::Local(token.lexeme),
                    ))
                } else {
                    self.finish_call(None, &token)
                }
            }
            TokenKind::Constant => {
                self.advance();
                Ok(self.make_expression(
                    token_span,
                    ExpressionKind::Constant(token.lexeme),
                ))
            }
            TokenKind::InstanceVar => {
                self.advance();
                Ok(self.make_expression(
                    token_span,
                    ExpressionKind::InstanceVar(token.lexeme),
                ))
            }
            TokenKind::Global => {
                self.advance();
                Ok(self.make_expression(
                    token_span,
                    ExpressionKind::Global(token.lexeme),
                ))
            }
            TokenKind::Keyword(Keyword::SelfRef) => {
                self.advance();
                Ok(self.make_expression(token_span, ExpressionKind::SelfRef))
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let mut inner = self.parse_expression()?;
                self.skip_newlines();
                let close = self.peek().clone();
                self.expect_token(TokenKind::RParen, "expected ')' after expression")?;
                inner.span = Self::union_spans(&token_span, &Self::span_from_token(&close));
                Ok(inner)
            }
            TokenKind::Keyword(Keyword::Yield) => {
                self.advance();
                let arguments = self.parse_call_arguments()?;
                let span = arguments
                    .last()
                    .map(|last| Self::union_spans(&token_span, &last.span))
                    .unwrap_or(token_span);
                Ok(self.make_expression(
                    span,
                    ExpressionKind::Yield(YieldExpression { arguments }),
                ))
            }
            TokenKind::Keyword(Keyword::Return) | TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                let value = if starts_exit_value(self.peek_kind()) {
                    Some(Box::new(self.parse_expression()?))
                } else {
                    None
                };
                let span = value
                    .as_ref()
                    .map(|value| Self::union_spans(&token_span, &value.span))
                    .unwrap_or(token_span);
                let kind = if token.kind == TokenKind::Keyword(Keyword::Return) {
                    ExpressionKind::Return(ReturnExpression { value })
                } else {
                    ExpressionKind::Break(BreakExpression { value })
                };
                Ok(self.make_expression(span, kind))
            }
            TokenKind::Keyword(Keyword::If) => self.parse_conditional(ConditionalKind::If),
            TokenKind::Keyword(Keyword::Unless) => self.parse_conditional(ConditionalKind::Unless),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            _ => self.unexpected("expected an expression"),
        }
    }

    fn parse_conditional(&mut self, kind: ConditionalKind) -> Result<Expression> {
        let keyword = self.advance().clone();
        let condition = self.parse_expression()?;
        let consequent = self.parse_body_until(terminator_end_or_else)?;

        let alternative = match self.peek_kind() {
            TokenKind::Keyword(Keyword::Elsif) if kind == ConditionalKind::If => {
                // `elsif` nests a conditional in the else branch and shares its `end`.
                let nested = self.parse_conditional(ConditionalKind::If)?;
                let span = Self::union_spans(&Self::span_from_token(&keyword), &nested.span);
                return Ok(self.make_expression(
                    span,
                    ExpressionKind::Conditional(ConditionalExpression {
                        kind,
                        condition: Box::new(condition),
                        consequent,
                        alternative: Some(Body::new(vec![nested])),
                    }),
                ));
            }
            TokenKind::Keyword(Keyword::Else) => {
                self.advance();
                Some(self.parse_body_until(terminator_end)?)
            }
            _ => None,
        };

        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close conditional")?;

        let span = Self::union_spans(
            &Self::span_from_token(&keyword),
            &Self::span_from_token(&end_token),
        );
        Ok(self.make_expression(
            span,
            ExpressionKind::Conditional(ConditionalExpression {
                kind,
                condition: Box::new(condition),
                consequent,
                alternative,
            }),
        ))
    }

    fn parse_while(&mut self) -> Result<Expression> {
        let keyword = self.advance().clone();
        let condition = self.parse_expression()?;
        let body = self.parse_body_until(terminator_end)?;
        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close loop")?;

        let span = Self::union_spans(
            &Self::span_from_token(&keyword),
            &Self::span_from_token(&end_token),
        );
        Ok(self.make_expression(
            span,
            ExpressionKind::While(WhileExpression {
                condition: Box::new(condition),
                body,
            }),
        ))
    }

    fn unexpected<T>(&mut self, message: &str) -> Result<T> {
        let token = self.peek().clone();
        self.diagnostics
            .push_error_with_span(message, Some(Self::span_from_token(&token)));
        bail!(
            "{} at line {}, column {} (found '{}')",
            message,
            token.line,
            token.column,
            token.lexeme
        );
    }

    fn expect_keyword(&mut self, keyword: Keyword, message: &str) -> Result<()> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            self.unexpected(message)
        }
    }

    fn expect_token(&mut self, expected: TokenKind, message: &str) -> Result<()> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&expected) {
            self.advance();
            Ok(())
        } else {
            self.unexpected(message)
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(kw) if *kw == keyword)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.current].kind
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens
            .get(self.current + offset)
            .map(|token| token.kind.clone())
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }
}

fn terminator_eof(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Eof)
}

fn terminator_end(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Keyword(Keyword::End))
}

fn terminator_end_or_else(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Keyword(Keyword::End)
            | TokenKind::Keyword(Keyword::Else)
            | TokenKind::Keyword(Keyword::Elsif)
    )
}

fn terminator_rbrace(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::RBrace)
}

/// Tokens that begin a paren-less argument list: `foo 1`, `yield a, b`.
fn starts_command_argument(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Identifier
            | TokenKind::Constant
            | TokenKind::InstanceVar
            | TokenKind::Global
            | TokenKind::IntegerLiteral(_)
            | TokenKind::FloatLiteral(_)
            | TokenKind::StringLiteral(_)
            | TokenKind::CharLiteral(_)
            | TokenKind::BooleanLiteral(_)
            | TokenKind::Keyword(Keyword::Nil)
            | TokenKind::Keyword(Keyword::SelfRef)
            | TokenKind::Keyword(Keyword::Yield)
    )
}

/// `return`/`break` take a value unless the statement ends or a modifier follows.
fn starts_exit_value(kind: &TokenKind) -> bool {
    starts_command_argument(kind)
        || matches!(
            kind,
            TokenKind::LParen | TokenKind::Bang | TokenKind::Minus
        )
}
