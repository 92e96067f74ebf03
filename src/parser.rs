//! Parser for kernel source
//!
//! Parses programs like:
//! - `__kernel void add(__global const int* x0, __global const int* x1, __global int* out) { ... }`
//! - `for (int t0 = 0; t0 < 8; t0 += 1) { out[i] += x0[t0]; }`
//! - `float l2 = (float)(l0 > l1);`

use crate::ast::{AssignOp, BinaryOp, Expr, Function, Module, Param, Place, Stmt, UnaryOp};
use crate::error::{DispatchError, DispatchResult};
use crate::lexer::{line_col, Lexer, Spanned, Token};
use crate::types::ElementType;

/// Binary operator precedence levels, loosest first
const BINARY_LEVELS: &[&[(Token, BinaryOp)]] = &[
    &[(Token::OrOr, BinaryOp::LogicalOr)],
    &[(Token::AndAnd, BinaryOp::LogicalAnd)],
    &[(Token::Pipe, BinaryOp::BitOr)],
    &[(Token::Amp, BinaryOp::BitAnd)],
    &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::Ne)],
    &[
        (Token::Lt, BinaryOp::Lt),
        (Token::Gt, BinaryOp::Gt),
        (Token::Le, BinaryOp::Le),
        (Token::Ge, BinaryOp::Ge),
    ],
    &[(Token::Shl, BinaryOp::Shl), (Token::Shr, BinaryOp::Shr)],
    &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
    &[
        (Token::Star, BinaryOp::Mul),
        (Token::Slash, BinaryOp::Div),
        (Token::Percent, BinaryOp::Rem),
    ],
];

/// Parser for kernel source
pub struct Parser<'source> {
    source: &'source str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> DispatchResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            source,
            tokens,
            pos: 0,
        })
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn lookahead(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    /// Advance to the next token
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Consume the token if it matches
    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> DispatchResult<Token> {
        if self.check(&expected) {
            self.advance()
                .ok_or_else(|| self.error(format!("expected `{}`", expected)))
        } else {
            Err(self.error(format!("expected `{}`", expected)))
        }
    }

    fn expect_ident(&mut self) -> DispatchResult<String> {
        match self.current() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    /// A compile error located at the current token
    fn error(&self, message: impl Into<String>) -> DispatchError {
        let (location, found) = match self.tokens.get(self.pos) {
            Some(t) => (line_col(self.source, t.span.start), format!("`{}`", t.token)),
            None => (line_col(self.source, self.source.len()), "end of input".to_string()),
        };
        DispatchError::compile(format!("{}: {}, found {}", location, message.into(), found))
    }

    /// Parse every kernel function in the source
    pub fn parse_module(&mut self) -> DispatchResult<Module> {
        let mut functions = Vec::new();

        while self.current().is_some() {
            functions.push(self.parse_function()?);
        }

        Ok(Module { functions })
    }

    /// `__kernel void name(params) { body }`
    fn parse_function(&mut self) -> DispatchResult<Function> {
        self.expect(Token::Kernel)?;
        self.expect(Token::Void)?;
        let name = self.expect_ident()?;

        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        let body = self.parse_block()?;
        Ok(Function { name, params, body })
    }

    /// `__global [const] T* name` or `[const] T name`
    fn parse_param(&mut self) -> DispatchResult<Param> {
        let global = self.eat(&Token::Global);
        self.eat(&Token::Const);
        let ty = self.parse_type()?;
        let pointer = self.eat(&Token::Star);
        self.eat(&Token::Const);

        if global != pointer {
            return Err(self.error("pointer parameters must be `__global` and `__global` parameters must be pointers"));
        }

        let name = self.expect_ident()?;
        Ok(Param { name, ty, pointer })
    }

    fn parse_type(&mut self) -> DispatchResult<ElementType> {
        match self.current() {
            Some(Token::IntType) => {
                self.pos += 1;
                Ok(ElementType::Integral)
            }
            Some(Token::FloatType) => {
                self.pos += 1;
                Ok(ElementType::Floating)
            }
            _ => Err(self.error("expected `int` or `float`")),
        }
    }

    fn parse_block(&mut self) -> DispatchResult<Vec<Stmt>> {
        self.expect(Token::LBrace)?;
        let mut statements = Vec::new();

        while !self.check(&Token::RBrace) {
            if self.current().is_none() {
                return Err(self.error("unterminated block"));
            }
            statements.push(self.parse_statement()?);
        }

        self.expect(Token::RBrace)?;
        Ok(statements)
    }

    /// A braced block or a single statement, as a loop or branch body
    fn parse_body(&mut self) -> DispatchResult<Vec<Stmt>> {
        if self.check(&Token::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    fn parse_statement(&mut self) -> DispatchResult<Stmt> {
        match self.current() {
            Some(Token::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            Some(Token::For) => self.parse_for(),
            Some(Token::If) => self.parse_if(),
            Some(Token::Semicolon) => {
                self.pos += 1;
                Ok(Stmt::Block(Vec::new()))
            }
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.expect(Token::Semicolon)?;
                Ok(stmt)
            }
        }
    }

    /// Declaration or assignment without the trailing `;`
    fn parse_simple_statement(&mut self) -> DispatchResult<Stmt> {
        if matches!(
            self.current(),
            Some(Token::Const) | Some(Token::IntType) | Some(Token::FloatType)
        ) {
            self.eat(&Token::Const);
            let ty = self.parse_type()?;
            let name = self.expect_ident()?;
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(Stmt::Declare { ty, name, init });
        }

        let name = self.expect_ident()?;
        let target = if self.eat(&Token::LBracket) {
            let index = self.parse_expr()?;
            self.expect(Token::RBracket)?;
            Place::Element { base: name, index }
        } else {
            Place::Local(name)
        };

        let op = match self.current() {
            Some(Token::Assign) => AssignOp::Set,
            Some(Token::PlusAssign) => AssignOp::Add,
            Some(Token::MinusAssign) => AssignOp::Sub,
            Some(Token::StarAssign) => AssignOp::Mul,
            Some(Token::SlashAssign) => AssignOp::Div,
            Some(Token::PlusPlus) => {
                self.pos += 1;
                return Ok(Stmt::Assign {
                    target,
                    op: AssignOp::Add,
                    value: Expr::Int(1),
                });
            }
            _ => return Err(self.error("expected assignment")),
        };
        self.pos += 1;

        let value = self.parse_expr()?;
        Ok(Stmt::Assign { target, op, value })
    }

    /// `for (init; cond; step) body`
    fn parse_for(&mut self) -> DispatchResult<Stmt> {
        self.expect(Token::For)?;
        self.expect(Token::LParen)?;
        let init = self.parse_simple_statement()?;
        self.expect(Token::Semicolon)?;
        let cond = self.parse_expr()?;
        self.expect(Token::Semicolon)?;
        let step = self.parse_simple_statement()?;
        self.expect(Token::RParen)?;
        let body = self.parse_body()?;

        Ok(Stmt::For {
            init: Box::new(init),
            cond,
            step: Box::new(step),
            body,
        })
    }

    fn parse_if(&mut self) -> DispatchResult<Stmt> {
        self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let then_branch = self.parse_body()?;
        let else_branch = if self.eat(&Token::Else) {
            self.parse_body()?
        } else {
            Vec::new()
        };

        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_expr(&mut self) -> DispatchResult<Expr> {
        let cond = self.parse_binary(0)?;

        if self.eat(&Token::Question) {
            let then_value = self.parse_expr()?;
            self.expect(Token::Colon)?;
            let else_value = self.parse_expr()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
            });
        }

        Ok(cond)
    }

    /// Left-associative binary operators at `level` and tighter
    fn parse_binary(&mut self, level: usize) -> DispatchResult<Expr> {
        if level == BINARY_LEVELS.len() {
            return self.parse_unary();
        }

        let mut left = self.parse_binary(level + 1)?;

        'outer: loop {
            for (token, op) in BINARY_LEVELS[level] {
                if self.check(token) {
                    self.pos += 1;
                    let right = self.parse_binary(level + 1)?;
                    left = Expr::Binary {
                        op: *op,
                        lhs: Box::new(left),
                        rhs: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            break;
        }

        Ok(left)
    }

    /// Parse unary expressions: -x, !x, (T)x
    fn parse_unary(&mut self) -> DispatchResult<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(match operand {
                Expr::Int(n) => Expr::Int(n.wrapping_neg()),
                Expr::Float(n) => Expr::Float(-n),
                other => Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(other),
                },
            });
        }

        if self.eat(&Token::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }

        if self.check(&Token::LParen)
            && matches!(self.lookahead(1), Some(Token::IntType) | Some(Token::FloatType))
        {
            self.pos += 1;
            let ty = self.parse_type()?;
            self.expect(Token::RParen)?;
            let expr = self.parse_unary()?;
            return Ok(Expr::Cast {
                ty,
                expr: Box::new(expr),
            });
        }

        self.parse_primary()
    }

    /// Literals, identifiers, calls, indexing and parenthesised expressions
    fn parse_primary(&mut self) -> DispatchResult<Expr> {
        match self.current().cloned() {
            Some(Token::IntLit(n)) => {
                self.pos += 1;
                Ok(Expr::Int(n))
            }
            Some(Token::FloatLit(n)) => {
                self.pos += 1;
                Ok(Expr::Float(n))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;

                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Call { name, args });
                }

                if self.eat(&Token::LBracket) {
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    return Ok(Expr::Index {
                        base: name,
                        index: Box::new(index),
                    });
                }

                Ok(Expr::Ident(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            _ => Err(self.error("expected expression")),
        }
    }
}

/// Parse a complete kernel source text
pub fn parse(source: &str) -> DispatchResult<Module> {
    Parser::new(source)?.parse_module()
}
