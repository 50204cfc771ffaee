//! Recursive-descent parser.
//!
//! Recovers per external declaration: on error, skips tokens until the next
//! `kernel`/`function`/`const`/`static` keyword at brace-depth 0, logs a
//! diagnostic, and continues with the remaining translation unit.

use crate::ast::*;
use crate::diagnostics::{Diagnostic, DiagnosticLog, ErrorKind, SourcePos};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::types::{Qualifier, Specifier};

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, ()>;

pub fn parse(src: &str, log: &mut DiagnosticLog) -> TranslationUnit {
    let toks = Lexer::new(src).tokenize(log);
    let mut p = Parser { toks, pos: 0 };
    p.parse_translation_unit(log)
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.toks[self.pos.min(self.toks.len() - 1)].kind
    }

    fn peek_pos(&self) -> SourcePos {
        self.toks[self.pos.min(self.toks.len() - 1)].pos
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn bump(&mut self) -> Token {
        let t = self.toks[self.pos.min(self.toks.len() - 1)].clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, log: &mut DiagnosticLog, what: &str) -> PResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            log.push(Diagnostic::error(
                ErrorKind::Parse,
                self.peek_pos(),
                format!("expected {what}, found {:?}", self.peek()),
            ));
            Err(())
        }
    }

    fn expect_ident(&mut self, log: &mut DiagnosticLog) -> PResult<String> {
        if let TokenKind::Ident(name) = self.peek().clone() {
            self.bump();
            Ok(name)
        } else {
            log.push(Diagnostic::error(
                ErrorKind::Parse,
                self.peek_pos(),
                format!("expected identifier, found {:?}", self.peek()),
            ));
            Err(())
        }
    }

    fn specifier_token(kind: &TokenKind) -> Option<Specifier> {
        Some(match kind {
            TokenKind::KwVoid => Specifier::Void,
            TokenKind::KwFloat => Specifier::Float,
            TokenKind::KwInt => Specifier::Int,
            TokenKind::KwBool => Specifier::Bool,
            TokenKind::KwVec2 => Specifier::Vec2,
            TokenKind::KwVec3 => Specifier::Vec3,
            TokenKind::KwVec4 => Specifier::Vec4,
            TokenKind::KwColor => Specifier::Color,
            TokenKind::KwSampler => Specifier::Sampler,
            _ => return None,
        })
    }

    fn is_external_decl_start(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::KwKernel | TokenKind::KwFunction | TokenKind::KwConst | TokenKind::KwStatic
        )
    }

    /// Skip to the next token that can start an external declaration, or EOF.
    fn recover_to_next_external_decl(&mut self) {
        while !self.at_eof() && !self.is_external_decl_start() {
            self.bump();
        }
    }

    fn parse_translation_unit(&mut self, log: &mut DiagnosticLog) -> TranslationUnit {
        let mut decls = Vec::new();
        while !self.at_eof() {
            match self.parse_external_decl(log) {
                Ok(decl) => decls.push(decl),
                Err(()) => self.recover_to_next_external_decl(),
            }
        }
        TranslationUnit { decls }
    }

    fn parse_external_decl(&mut self, log: &mut DiagnosticLog) -> PResult<ExternalDecl> {
        match self.peek().clone() {
            TokenKind::KwKernel => self.parse_kernel(log).map(ExternalDecl::Kernel),
            TokenKind::KwFunction => self.parse_function(log).map(ExternalDecl::Function),
            TokenKind::KwConst | TokenKind::KwStatic => {
                let decl = self.parse_var_decl(log)?;
                self.expect(&TokenKind::Semicolon, log, "';'")?;
                Ok(ExternalDecl::Global(decl))
            }
            _ => {
                log.push(Diagnostic::error(
                    ErrorKind::Parse,
                    self.peek_pos(),
                    format!(
                        "expected 'kernel', 'function', 'const' or 'static', found {:?}",
                        self.peek()
                    ),
                ));
                Err(())
            }
        }
    }

    fn parse_kernel(&mut self, log: &mut DiagnosticLog) -> PResult<KernelDecl> {
        let pos = self.peek_pos();
        self.expect(&TokenKind::KwKernel, log, "'kernel'")?;
        let return_specifier = self.parse_specifier(log)?;
        let name = self.expect_ident(log)?;
        let params = self.parse_params(log)?;
        let body = self.parse_block(log)?;
        Ok(KernelDecl {
            name,
            params,
            return_specifier,
            body,
            pos,
        })
    }

    fn parse_function(&mut self, log: &mut DiagnosticLog) -> PResult<FunctionDecl> {
        let pos = self.peek_pos();
        self.expect(&TokenKind::KwFunction, log, "'function'")?;
        let return_specifier = self.parse_specifier(log)?;
        let name = self.expect_ident(log)?;
        let params = self.parse_params(log)?;
        let body = self.parse_block(log)?;
        Ok(FunctionDecl {
            name,
            params,
            return_specifier,
            body,
            pos,
        })
    }

    fn parse_specifier(&mut self, log: &mut DiagnosticLog) -> PResult<Specifier> {
        let kind = self.peek().clone();
        if let Some(spec) = Self::specifier_token(&kind) {
            self.bump();
            Ok(spec)
        } else {
            log.push(Diagnostic::error(
                ErrorKind::Parse,
                self.peek_pos(),
                format!("expected a type specifier, found {kind:?}"),
            ));
            Err(())
        }
    }

    fn parse_params(&mut self, log: &mut DiagnosticLog) -> PResult<Vec<Param>> {
        self.expect(&TokenKind::LParen, log, "'('")?;
        let mut params = Vec::new();
        if self.peek() != &TokenKind::RParen {
            loop {
                params.push(self.parse_param(log)?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, log, "')'")?;
        Ok(params)
    }

    fn parse_param(&mut self, log: &mut DiagnosticLog) -> PResult<Param> {
        let pos = self.peek_pos();
        let direction = match self.peek() {
            TokenKind::KwIn => {
                self.bump();
                ParamDirection::In
            }
            TokenKind::KwOut => {
                self.bump();
                ParamDirection::Out
            }
            TokenKind::KwInOut => {
                self.bump();
                ParamDirection::InOut
            }
            _ => ParamDirection::In,
        };
        let qualifier = match self.peek() {
            TokenKind::KwConst => {
                self.bump();
                Qualifier::Const
            }
            TokenKind::KwStatic => {
                self.bump();
                Qualifier::Static
            }
            _ => Qualifier::None,
        };
        let specifier = self.parse_specifier(log)?;
        let name = self.expect_ident(log)?;
        Ok(Param {
            direction,
            qualifier,
            specifier,
            name,
            pos,
        })
    }

    fn parse_var_decl(&mut self, log: &mut DiagnosticLog) -> PResult<VarDecl> {
        let pos = self.peek_pos();
        let qualifier = match self.peek() {
            TokenKind::KwConst => {
                self.bump();
                Qualifier::Const
            }
            TokenKind::KwStatic => {
                self.bump();
                Qualifier::Static
            }
            _ => Qualifier::None,
        };
        let specifier = self.parse_specifier(log)?;
        let name = self.expect_ident(log)?;
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr(log)?)
        } else {
            None
        };
        Ok(VarDecl {
            qualifier,
            specifier,
            name,
            init,
            pos,
        })
    }

    fn looks_like_var_decl(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::KwConst
                | TokenKind::KwStatic
                | TokenKind::KwVoid
                | TokenKind::KwFloat
                | TokenKind::KwInt
                | TokenKind::KwBool
                | TokenKind::KwVec2
                | TokenKind::KwVec3
                | TokenKind::KwVec4
                | TokenKind::KwColor
                | TokenKind::KwSampler
        )
    }

    fn parse_block(&mut self, log: &mut DiagnosticLog) -> PResult<Block> {
        self.expect(&TokenKind::LBrace, log, "'{'")?;
        let mut stmts = Vec::new();
        while self.peek() != &TokenKind::RBrace && !self.at_eof() {
            match self.parse_stmt(log) {
                Ok(s) => stmts.push(s),
                Err(()) => {
                    // recover to the next statement boundary within this block
                    while !self.at_eof()
                        && self.peek() != &TokenKind::Semicolon
                        && self.peek() != &TokenKind::RBrace
                    {
                        self.bump();
                    }
                    self.eat(&TokenKind::Semicolon);
                }
            }
        }
        self.expect(&TokenKind::RBrace, log, "'}'")?;
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self, log: &mut DiagnosticLog) -> PResult<Stmt> {
        match self.peek().clone() {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block(log)?)),
            TokenKind::KwReturn => {
                let pos = self.peek_pos();
                self.bump();
                let value = if self.peek() != &TokenKind::Semicolon {
                    Some(self.parse_expr(log)?)
                } else {
                    None
                };
                self.expect(&TokenKind::Semicolon, log, "';'")?;
                Ok(Stmt::Return(value, pos))
            }
            TokenKind::KwBreak => {
                let pos = self.peek_pos();
                self.bump();
                self.expect(&TokenKind::Semicolon, log, "';'")?;
                Ok(Stmt::Break(pos))
            }
            TokenKind::KwContinue => {
                let pos = self.peek_pos();
                self.bump();
                self.expect(&TokenKind::Semicolon, log, "';'")?;
                Ok(Stmt::Continue(pos))
            }
            TokenKind::KwIf => {
                self.bump();
                self.expect(&TokenKind::LParen, log, "'('")?;
                let cond = self.parse_expr(log)?;
                self.expect(&TokenKind::RParen, log, "')'")?;
                let then_branch = self.parse_stmt_as_block(log)?;
                let else_branch = if self.eat(&TokenKind::KwElse) {
                    Some(self.parse_stmt_as_block(log)?)
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            TokenKind::KwWhile => {
                self.bump();
                self.expect(&TokenKind::LParen, log, "'('")?;
                let cond = self.parse_expr(log)?;
                self.expect(&TokenKind::RParen, log, "')'")?;
                let body = self.parse_stmt_as_block(log)?;
                Ok(Stmt::While { cond, body })
            }
            TokenKind::KwFor => {
                self.bump();
                self.expect(&TokenKind::LParen, log, "'('")?;
                let init = if self.peek() == &TokenKind::Semicolon {
                    self.bump();
                    None
                } else {
                    let s = if self.looks_like_var_decl() {
                        Stmt::VarDecl(self.parse_var_decl(log)?)
                    } else {
                        Stmt::Expr(self.parse_expr(log)?)
                    };
                    self.expect(&TokenKind::Semicolon, log, "';'")?;
                    Some(Box::new(s))
                };
                let cond = if self.peek() == &TokenKind::Semicolon {
                    None
                } else {
                    Some(self.parse_expr(log)?)
                };
                self.expect(&TokenKind::Semicolon, log, "';'")?;
                let step = if self.peek() == &TokenKind::RParen {
                    None
                } else {
                    Some(self.parse_expr(log)?)
                };
                self.expect(&TokenKind::RParen, log, "')'")?;
                let body = self.parse_stmt_as_block(log)?;
                Ok(Stmt::For {
                    init,
                    cond,
                    step,
                    body,
                })
            }
            _ if self.looks_like_var_decl() => {
                let decl = self.parse_var_decl(log)?;
                self.expect(&TokenKind::Semicolon, log, "';'")?;
                Ok(Stmt::VarDecl(decl))
            }
            _ => {
                let expr = self.parse_expr(log)?;
                self.expect(&TokenKind::Semicolon, log, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// `if (c) stmt` without braces is wrapped in a single-statement block.
    fn parse_stmt_as_block(&mut self, log: &mut DiagnosticLog) -> PResult<Block> {
        if self.peek() == &TokenKind::LBrace {
            self.parse_block(log)
        } else {
            let stmt = self.parse_stmt(log)?;
            Ok(Block { stmts: vec![stmt] })
        }
    }

    // --- expressions, precedence climbing ---

    fn parse_expr(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        self.parse_assignment(log)
    }

    fn parse_assignment(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        let lhs = self.parse_ternary(log)?;
        let op = match self.peek() {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::AddAssign,
            TokenKind::MinusAssign => AssignOp::SubAssign,
            TokenKind::StarAssign => AssignOp::MulAssign,
            TokenKind::SlashAssign => AssignOp::DivAssign,
            _ => return Ok(lhs),
        };
        let pos = self.peek_pos();
        self.bump();
        let rhs = self.parse_assignment(log)?;
        Ok(Expr::Assign {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            pos,
        })
    }

    fn parse_ternary(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        let cond = self.parse_logical_or(log)?;
        if self.eat(&TokenKind::Question) {
            let pos = cond.pos();
            let then_expr = self.parse_expr(log)?;
            self.expect(&TokenKind::Colon, log, "':'")?;
            let else_expr = self.parse_assignment(log)?;
            Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                pos,
            })
        } else {
            Ok(cond)
        }
    }

    fn parse_binop_level(
        &mut self,
        log: &mut DiagnosticLog,
        ops: &[(TokenKind, BinOp)],
        next: fn(&mut Self, &mut DiagnosticLog) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut lhs = next(self, log)?;
        loop {
            let found = ops.iter().find(|(tok, _)| self.peek() == tok);
            let Some((_, op)) = found else { break };
            let op = *op;
            let pos = self.peek_pos();
            self.bump();
            let rhs = next(self, log)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        self.parse_binop_level(log, &[(TokenKind::PipePipe, BinOp::Or)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        self.parse_binop_level(log, &[(TokenKind::AmpAmp, BinOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        self.parse_binop_level(
            log,
            &[(TokenKind::EqEq, BinOp::Eq), (TokenKind::NotEq, BinOp::Ne)],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        self.parse_binop_level(
            log,
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Le, BinOp::Le),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::Ge, BinOp::Ge),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        self.parse_binop_level(
            log,
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        self.parse_binop_level(
            log,
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        let pos = self.peek_pos();
        match self.peek().clone() {
            TokenKind::Minus => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(self.parse_unary(log)?),
                    pos,
                })
            }
            TokenKind::Bang => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnOp::Not,
                    operand: Box::new(self.parse_unary(log)?),
                    pos,
                })
            }
            TokenKind::PlusPlus => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnOp::PreInc,
                    operand: Box::new(self.parse_unary(log)?),
                    pos,
                })
            }
            TokenKind::MinusMinus => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnOp::PreDec,
                    operand: Box::new(self.parse_unary(log)?),
                    pos,
                })
            }
            TokenKind::LParen => {
                // Could be a parenthesised cast `(float) expr` or a grouped expr.
                if let Some(spec) = Self::specifier_token(&self.toks[self.pos + 1].kind) {
                    if self.toks[self.pos + 2].kind == TokenKind::RParen {
                        self.bump();
                        self.bump();
                        self.bump();
                        let operand = self.parse_unary(log)?;
                        return Ok(Expr::Cast {
                            specifier: spec,
                            operand: Box::new(operand),
                            pos,
                        });
                    }
                }
                self.parse_postfix(log)
            }
            _ => self.parse_postfix(log),
        }
    }

    fn parse_postfix(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        let mut expr = self.parse_primary(log)?;
        loop {
            match self.peek().clone() {
                TokenKind::Dot => {
                    let pos = self.peek_pos();
                    self.bump();
                    let field = self.expect_ident(log)?;
                    let components = parse_swizzle(&field, pos, log)?;
                    expr = Expr::Swizzle {
                        base: Box::new(expr),
                        components,
                        pos,
                    };
                }
                TokenKind::PlusPlus => {
                    let pos = self.peek_pos();
                    self.bump();
                    expr = Expr::Unary {
                        op: UnOp::PostInc,
                        operand: Box::new(expr),
                        pos,
                    };
                }
                TokenKind::MinusMinus => {
                    let pos = self.peek_pos();
                    self.bump();
                    expr = Expr::Unary {
                        op: UnOp::PostDec,
                        operand: Box::new(expr),
                        pos,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self, log: &mut DiagnosticLog) -> PResult<Expr> {
        let pos = self.peek_pos();
        match self.peek().clone() {
            TokenKind::IntLit(v) => {
                self.bump();
                Ok(Expr::IntLit(v, pos))
            }
            TokenKind::FloatLit(v) => {
                self.bump();
                Ok(Expr::FloatLit(v, pos))
            }
            TokenKind::KwTrue => {
                self.bump();
                Ok(Expr::BoolLit(true, pos))
            }
            TokenKind::KwFalse => {
                self.bump();
                Ok(Expr::BoolLit(false, pos))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr(log)?;
                self.expect(&TokenKind::RParen, log, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if self.peek() != &TokenKind::RParen {
                        loop {
                            args.push(self.parse_expr(log)?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, log, "')'")?;
                    Ok(Expr::Call {
                        callee: name,
                        args,
                        pos,
                    })
                } else {
                    Ok(Expr::Ident(name, pos))
                }
            }
            kind @ (TokenKind::KwVec2 | TokenKind::KwVec3 | TokenKind::KwVec4 | TokenKind::KwColor) => {
                self.bump();
                let specifier = Self::specifier_token(&kind).expect("matched above");
                self.expect(&TokenKind::LParen, log, "'('")?;
                let mut args = Vec::new();
                if self.peek() != &TokenKind::RParen {
                    loop {
                        args.push(self.parse_expr(log)?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, log, "')'")?;
                Ok(Expr::VectorCtor {
                    specifier,
                    args,
                    pos,
                })
            }
            other => {
                log.push(Diagnostic::error(
                    ErrorKind::Parse,
                    pos,
                    format!("unexpected token {other:?} in expression"),
                ));
                Err(())
            }
        }
    }
}

fn parse_swizzle(
    field: &str,
    pos: SourcePos,
    log: &mut DiagnosticLog,
) -> PResult<Vec<SwizzleComponent>> {
    let mut out = Vec::with_capacity(field.len());
    for c in field.chars() {
        let comp = match c {
            'x' | 'r' => SwizzleComponent::X,
            'y' | 'g' => SwizzleComponent::Y,
            'z' | 'b' => SwizzleComponent::Z,
            'w' | 'a' => SwizzleComponent::W,
            _ => {
                log.push(Diagnostic::error(
                    ErrorKind::Parse,
                    pos,
                    format!("'{field}' is not a valid swizzle mask"),
                ));
                return Err(());
            }
        };
        out.push(comp);
    }
    if out.is_empty() || out.len() > 4 {
        log.push(Diagnostic::error(
            ErrorKind::Parse,
            pos,
            format!("'{field}' is not a valid swizzle mask"),
        ));
        return Err(());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identity_kernel() {
        let mut log = DiagnosticLog::default();
        let tu = parse(
            "kernel vec4 identity(sampler src) { return sample(src, samplerCoord(src)); }",
            &mut log,
        );
        assert!(!log.has_errors(), "{:?}", log.diagnostics);
        assert_eq!(tu.decls.len(), 1);
        match &tu.decls[0] {
            ExternalDecl::Kernel(k) => {
                assert_eq!(k.name, "identity");
                assert_eq!(k.return_specifier, Specifier::Color);
                assert_eq!(k.params.len(), 1);
            }
            _ => panic!("expected kernel"),
        }
    }

    #[test]
    fn recovers_from_bad_declaration_and_keeps_parsing_next_one() {
        let mut log = DiagnosticLog::default();
        let tu = parse(
            "kernel vec4 broken( { return 1; } kernel vec4 ok() { return vec4(0.0, 0.0, 0.0, 1.0); }",
            &mut log,
        );
        assert!(log.has_errors());
        assert_eq!(tu.decls.len(), 1);
        match &tu.decls[0] {
            ExternalDecl::Kernel(k) => assert_eq!(k.name, "ok"),
            _ => panic!("expected kernel"),
        }
    }

    #[test]
    fn parses_swizzle_and_ternary() {
        let mut log = DiagnosticLog::default();
        let tu = parse(
            "kernel vec4 f() { vec4 c = vec4(1.0, 2.0, 3.0, 4.0); return c.x > 0.0 ? c.wzyx : c; }",
            &mut log,
        );
        assert!(!log.has_errors(), "{:?}", log.diagnostics);
        assert_eq!(tu.decls.len(), 1);
    }

    #[test]
    fn parses_static_param_qualifier() {
        let mut log = DiagnosticLog::default();
        let tu = parse(
            "kernel vec4 tint(sampler src, static vec4 color) { return sample(src, samplerCoord(src)) * color; }",
            &mut log,
        );
        assert!(!log.has_errors(), "{:?}", log.diagnostics);
        match &tu.decls[0] {
            ExternalDecl::Kernel(k) => {
                assert_eq!(k.params[1].qualifier, Qualifier::Static);
            }
            _ => panic!("expected kernel"),
        }
    }
}
