//! Recursive-descent parser with Pratt-style precedence climbing.

use std::rc::Rc;

use super::ast::{BinOp, Body, Expr, FunctionDecl, Literal, LogicalOp, Program, Stmt, UnaryOp};
use super::lexer::{Token, TokenKind};
use super::ScriptError;

const ANONYMOUS: &str = "<anonymous>";

/// Deepest syntax tree the parser builds. Evaluating and dropping the tree
/// both recurse over it, so this bounds the stack the worker needs.
const MAX_NESTING: usize = 128;

/// Parse a token stream (as produced by [`super::lexer::lex`]) into a program.
pub fn parse_program(tokens: Vec<Token>) -> Result<Program, ScriptError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut statements = Vec::new();
    while !parser.check(&TokenKind::Eof) {
        statements.push(parser.statement()?);
    }
    Ok(Program { statements })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

enum Infix {
    Binary(BinOp),
    Logical(LogicalOp),
}

impl Parser {
    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        self.check_nesting(0)?;
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// `extra` counts levels a loop is about to add on top of the current depth.
    fn check_nesting(&self, extra: usize) -> Result<(), ScriptError> {
        if self.depth + extra >= MAX_NESTING {
            return Err(self.error("code is nested too deeply"));
        }
        Ok(())
    }

    // -- Statements --

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nested(Self::bare_statement)
    }

    fn bare_statement(&mut self) -> Result<Stmt, ScriptError> {
        match self.peek_kind().clone() {
            TokenKind::Function => {
                self.advance();
                let decl = self.function_decl()?;
                Ok(Stmt::Function(Rc::new(decl)))
            }
            TokenKind::Const | TokenKind::Let => {
                let mutable = matches!(self.advance().kind, TokenKind::Let);
                self.let_binding(mutable)
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) || self.check(&TokenKind::RBrace)
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                Ok(Stmt::Return(value))
            }
            TokenKind::If => {
                self.advance();
                self.if_statement()
            }
            TokenKind::For => {
                self.advance();
                self.for_of()
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value))
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.block()?)),
            TokenKind::Ident(name)
                if matches!(
                    self.peek_at(1),
                    Some(TokenKind::Assign) | Some(TokenKind::PlusAssign)
                ) =>
            {
                self.advance();
                let compound = matches!(self.advance().kind, TokenKind::PlusAssign);
                let rhs = self.expression()?;
                self.end_statement();
                let value = if compound {
                    Expr::Binary {
                        op: BinOp::Add,
                        left: Box::new(Expr::Ident(name.clone())),
                        right: Box::new(rhs),
                    }
                } else {
                    rhs
                };
                Ok(Stmt::Assign { name, value })
            }
            _ => {
                let expr = self.expression()?;
                self.end_statement();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// `name(params) { body }`, after `function`
    fn function_decl(&mut self) -> Result<FunctionDecl, ScriptError> {
        let name = self.expect_ident("expected function name")?;
        self.expect(&TokenKind::LParen, "expected '(' after function name")?;
        let params = self.param_list()?;
        let body = Body::Block(self.block()?);
        Ok(FunctionDecl { name, params, body })
    }

    /// Identifiers up to and including the closing `)`.
    fn param_list(&mut self) -> Result<Vec<String>, ScriptError> {
        let mut params = Vec::new();
        if self.match_token(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            params.push(self.expect_ident("expected parameter name")?);
            if self.match_token(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RParen, "expected ')' after parameters")?;
            return Ok(params);
        }
    }

    fn let_binding(&mut self, mutable: bool) -> Result<Stmt, ScriptError> {
        let name = self.expect_ident("expected binding name")?;
        let init = if self.match_token(&TokenKind::Assign) {
            Some(match self.expression()? {
                // `const f = (a) => ...` names the arrow after its binding.
                Expr::Arrow(decl) if decl.name == ANONYMOUS => Expr::Arrow(Rc::new(FunctionDecl {
                    name: name.clone(),
                    params: decl.params.clone(),
                    body: decl.body.clone(),
                })),
                other => other,
            })
        } else if mutable {
            None
        } else {
            return Err(self.error("missing initializer in const declaration"));
        };
        self.end_statement();
        Ok(Stmt::Let {
            name,
            mutable,
            init,
        })
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.expect(&TokenKind::LParen, "expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RParen, "expected ')' after condition")?;
        let then = self.branch()?;
        let otherwise = if self.match_token(&TokenKind::Else) {
            if self.match_token(&TokenKind::If) {
                Some(vec![self.if_statement()?])
            } else {
                Some(self.branch()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then,
            otherwise,
        })
    }

    fn for_of(&mut self) -> Result<Stmt, ScriptError> {
        self.expect(&TokenKind::LParen, "expected '(' after 'for'")?;
        if !(self.match_token(&TokenKind::Const) || self.match_token(&TokenKind::Let)) {
            return Err(self.error("expected 'const' or 'let' in for-of loop"));
        }
        let name = self.expect_ident("expected loop variable")?;
        self.expect(&TokenKind::Of, "expected 'of' (only for-of loops are supported)")?;
        let iterable = self.expression()?;
        self.expect(&TokenKind::RParen, "expected ')' after for-of header")?;
        let body = self.branch()?;
        Ok(Stmt::ForOf {
            name,
            iterable,
            body,
        })
    }

    /// A braced block or a single statement.
    fn branch(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        if self.check(&TokenKind::LBrace) {
            self.block()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(&TokenKind::LBrace, "expected '{'")?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("expected '}' before end of input"));
            }
            statements.push(self.statement()?);
        }
        self.advance();
        Ok(statements)
    }

    fn end_statement(&mut self) {
        self.match_token(&TokenKind::Semicolon);
    }

    // -- Expressions --

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let condition = self.pratt_expr(0)?;
        if !self.match_token(&TokenKind::Question) {
            return Ok(condition);
        }
        let then = self.expression()?;
        self.expect(&TokenKind::Colon, "expected ':' in conditional expression")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn infix_bp(&self) -> Option<(Infix, u8, u8)> {
        let (op, l_bp) = match self.peek_kind() {
            TokenKind::OrOr => (Infix::Logical(LogicalOp::Or), 1),
            TokenKind::AndAnd => (Infix::Logical(LogicalOp::And), 3),
            TokenKind::EqEq => (Infix::Binary(BinOp::Eq), 5),
            TokenKind::NotEq => (Infix::Binary(BinOp::NotEq), 5),
            TokenKind::Lt => (Infix::Binary(BinOp::Lt), 7),
            TokenKind::LtEq => (Infix::Binary(BinOp::LtEq), 7),
            TokenKind::Gt => (Infix::Binary(BinOp::Gt), 7),
            TokenKind::GtEq => (Infix::Binary(BinOp::GtEq), 7),
            TokenKind::Plus => (Infix::Binary(BinOp::Add), 9),
            TokenKind::Minus => (Infix::Binary(BinOp::Sub), 9),
            TokenKind::Star => (Infix::Binary(BinOp::Mul), 11),
            TokenKind::Slash => (Infix::Binary(BinOp::Div), 11),
            TokenKind::Percent => (Infix::Binary(BinOp::Rem), 11),
            _ => return None,
        };
        Some((op, l_bp, l_bp + 1))
    }

    fn pratt_expr(&mut self, min_bp: u8) -> Result<Expr, ScriptError> {
        let mut lhs = self.unary_or_postfix()?;
        let mut chained = 0;

        while let Some((op, l_bp, r_bp)) = self.infix_bp() {
            if l_bp < min_bp {
                break;
            }
            chained += 1;
            self.check_nesting(chained)?;
            self.advance();
            let rhs = self.pratt_expr(r_bp)?;
            lhs = match op {
                Infix::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                Infix::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
            };
        }

        Ok(lhs)
    }

    fn unary_or_postfix(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::bare_unary_or_postfix)
    }

    fn bare_unary_or_postfix(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek_kind() {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary_or_postfix()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        let mut expr = self.primary()?;
        let mut chained = 0;
        loop {
            if matches!(
                self.peek_kind(),
                TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot
            ) {
                chained += 1;
                self.check_nesting(chained)?;
            }
            match self.peek_kind() {
                TokenKind::LParen => {
                    let line = self.advance().line;
                    let args = self.call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(&TokenKind::RBracket, "expected ']' after index")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident("expected property name after '.'")?;
                    expr = Expr::Member {
                        target: Box::new(expr),
                        name,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.match_token(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.match_token(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RParen, "expected ')' after arguments")?;
            return Ok(args);
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        if self.at_arrow() {
            return self.arrow();
        }

        let token = self.advance();
        match token.kind {
            TokenKind::Int(n) => Ok(Expr::Literal(Literal::Int(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            TokenKind::True => Ok(Expr::Literal(Literal::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Literal::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(Literal::Null)),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "expected ')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.match_token(&TokenKind::RBracket) {
                    items.push(self.expression()?);
                    if !self.match_token(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBracket, "expected ']' after array items")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Function => {
                let params = {
                    // Anonymous function expressions may omit the name.
                    if matches!(self.peek_kind(), TokenKind::Ident(_)) {
                        self.advance();
                    }
                    self.expect(&TokenKind::LParen, "expected '(' after 'function'")?;
                    self.param_list()?
                };
                let body = Body::Block(self.block()?);
                Ok(Expr::Arrow(Rc::new(FunctionDecl {
                    name: ANONYMOUS.to_string(),
                    params,
                    body,
                })))
            }
            other => Err(ScriptError::Syntax {
                line: token.line,
                message: format!("unexpected token {:?}", other),
            }),
        }
    }

    /// `x =>` or `(a, b) =>` ahead
    fn at_arrow(&self) -> bool {
        match self.peek_kind() {
            TokenKind::Ident(_) => matches!(self.peek_at(1), Some(TokenKind::Arrow)),
            TokenKind::LParen => {
                let mut offset = 1;
                loop {
                    match self.peek_at(offset) {
                        Some(TokenKind::Ident(_)) | Some(TokenKind::Comma) => offset += 1,
                        Some(TokenKind::RParen) => {
                            return matches!(self.peek_at(offset + 1), Some(TokenKind::Arrow))
                        }
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr, ScriptError> {
        let params = if self.match_token(&TokenKind::LParen) {
            self.param_list()?
        } else {
            vec![self.expect_ident("expected parameter name")?]
        };
        self.expect(&TokenKind::Arrow, "expected '=>'")?;
        let body = if self.check(&TokenKind::LBrace) {
            Body::Block(self.block()?)
        } else {
            Body::Expr(self.expression()?)
        };
        Ok(Expr::Arrow(Rc::new(FunctionDecl {
            name: ANONYMOUS.to_string(),
            params,
            body,
        })))
    }

    // -- Token helpers --

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind, msg: &str) -> Result<Token, ScriptError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(msg))
        }
    }

    fn expect_ident(&mut self, msg: &str) -> Result<String, ScriptError> {
        if let TokenKind::Ident(name) = self.peek_kind() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(msg))
        }
    }

    fn error(&self, message: &str) -> ScriptError {
        let token = &self.tokens[self.pos];
        ScriptError::Syntax {
            line: token.line,
            message: format!("{}, found {:?}", message, token.kind),
        }
    }
}
