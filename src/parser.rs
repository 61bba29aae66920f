// Recursive-descent parser
//
// This file is part of blend65c.
// Copyright (C) 2015 Jeffrey Sharp
//
// blend65c is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published
// by the Free Software Foundation, either version 3 of the License,
// or (at your option) any later version.
//
// blend65c is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See
// the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with blend65c.  If not, see <http://www.gnu.org/licenses/>.
//
// Hand-written, single-token-lookahead recursive descent over `Lexer`.
// Precedence climbing handles binary operators; everything else follows
// the grammar shape directly. On a syntax error the parser reports through
// the diagnostic bus and resynchronizes to the next statement boundary
// (`;` or `}`) rather than aborting, so one bad statement does not hide
// diagnostics in the rest of the file.

use std::rc::Rc;

use crate::ast::*;
use crate::diagnostics::{code, DiagnosticBus};
use crate::lexer::{LexError, Lexer, Token, TokenKind};
use crate::source::Range;

pub struct Parser {
    lexer: Lexer,
    current: Token,
    ids: NodeIdSource,
}

impl Parser {
    pub fn new(file: impl Into<Rc<str>>, source: &str) -> Result<Self, LexError> {
        let mut lexer = Lexer::new(file, source);
        let current = lexer.next()?;
        Ok(Parser { lexer, current, ids: NodeIdSource::new() })
    }

    fn bump(&mut self) -> Result<Token, LexError> {
        let next = self.lexer.next()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn location(&self) -> Range {
        self.current.location.clone()
    }

    fn eat(&mut self, kind: TokenKind, bus: &mut DiagnosticBus) -> Result<Token, ()> {
        if self.current.kind == kind {
            self.bump().map_err(|e| self.report_lex_error(bus, e))
        } else {
            bus.error(
                code::P_UNEXPECTED_TOKEN,
                format!("expected {:?}, found {:?}", kind, self.current.kind),
                self.location(),
            );
            Err(())
        }
    }

    fn eat_ident(&mut self, bus: &mut DiagnosticBus) -> Result<(String, Range), ()> {
        let loc = self.location();
        match self.current.kind.clone() {
            TokenKind::Ident(name) => {
                self.bump().map_err(|e| self.report_lex_error(bus, e))?;
                Ok((name, loc))
            }
            _ => {
                bus.error(code::P_EXPECTED_IDENT, "expected identifier", loc);
                Err(())
            }
        }
    }

    fn report_lex_error(&self, bus: &mut DiagnosticBus, e: LexError) {
        match e {
            LexError::UnterminatedString(r) => {
                bus.error(code::P_UNTERMINATED_BLOCK, "unterminated string literal", r)
            }
            LexError::UnterminatedComment(r) => {
                bus.error(code::P_UNTERMINATED_BLOCK, "unterminated block comment", r)
            }
            LexError::InvalidNumber(r, text) => {
                bus.error(code::P_BAD_NUMBER, format!("invalid numeric literal `{}`", text), r)
            }
            LexError::UnexpectedChar(r, c) => {
                bus.error(code::P_UNEXPECTED_TOKEN, format!("unexpected character `{}`", c), r)
            }
        }
    }

    /// Skips tokens until a statement boundary, for panic-mode recovery.
    fn resync(&mut self, bus: &mut DiagnosticBus) {
        loop {
            match self.current.kind {
                TokenKind::Semi => {
                    let _ = self.bump().map_err(|e| self.report_lex_error(bus, e));
                    return;
                }
                TokenKind::RBrace | TokenKind::Eof => return,
                _ => {
                    if self.bump().map_err(|e| self.report_lex_error(bus, e)).is_err() {
                        return;
                    }
                }
            }
        }
    }

    pub fn parse_program(&mut self, bus: &mut DiagnosticBus) -> Option<Program> {
        let header_loc = self.location();
        if !self.at(&TokenKind::KwModule) {
            bus.error(
                code::P_MODULE_FIRST,
                "a source file must begin with `module <name>;`",
                header_loc.clone(),
            );
            return None;
        }
        self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
        let (name, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::Semi, bus).ok()?;

        let module = ModuleDecl { id: self.ids.next(), name, location: header_loc };

        let mut decls = Vec::new();
        let mut seen_executable = false;
        while !self.at(&TokenKind::Eof) {
            match self.parse_decl(bus, &mut seen_executable) {
                Some(decl) => decls.push(decl),
                None => self.resync(bus),
            }
        }

        Some(Program { module, decls })
    }

    fn parse_decl(&mut self, bus: &mut DiagnosticBus, seen_executable: &mut bool) -> Option<Decl> {
        let exported = if self.at(&TokenKind::KwExport) {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            true
        } else {
            false
        };

        match &self.current.kind {
            TokenKind::KwImport => self.parse_import(bus).map(Decl::Import),
            TokenKind::KwFunction => {
                *seen_executable = true;
                self.parse_function(bus, exported).map(Decl::Function)
            }
            TokenKind::KwLet | TokenKind::KwConst => {
                if *seen_executable {
                    bus.warning(code::P_DECL_AFTER_CODE, "declaration follows executable code", self.location());
                }
                self.parse_var(bus, exported).map(Decl::Variable)
            }
            TokenKind::KwType => self.parse_type_alias(bus).map(Decl::TypeAlias),
            TokenKind::KwEnum => self.parse_enum(bus).map(Decl::Enum),
            TokenKind::At => {
                if *seen_executable {
                    bus.warning(code::P_DECL_AFTER_CODE, "declaration follows executable code", self.location());
                }
                self.parse_var(bus, exported).map(Decl::Variable)
            }
            _ => {
                bus.error(
                    code::P_UNEXPECTED_TOKEN,
                    format!("expected a declaration, found {:?}", self.current.kind),
                    self.location(),
                );
                None
            }
        }
    }

    fn parse_import(&mut self, bus: &mut DiagnosticBus) -> Option<ImportDecl> {
        let loc = self.location();
        self.eat(TokenKind::KwImport, bus).ok()?;
        let (symbol, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::KwFrom, bus).ok()?;
        let (from_module, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::Semi, bus).ok()?;
        Some(ImportDecl { id: self.ids.next(), symbol, from_module, location: loc })
    }

    fn parse_storage_sigil(&mut self, bus: &mut DiagnosticBus) -> Option<(StorageClassSpec, Option<u32>)> {
        if !self.at(&TokenKind::At) {
            return Some((StorageClassSpec::Inferred, None));
        }
        self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
        let (name, loc) = self.eat_ident(bus).ok()?;
        match name.as_str() {
            "zp" => Some((StorageClassSpec::Zp, None)),
            "ram" => Some((StorageClassSpec::Ram, None)),
            "data" => Some((StorageClassSpec::Data, None)),
            "map" => {
                self.eat(TokenKind::LParen, bus).ok()?;
                let addr = self.parse_expr(bus)?;
                self.eat(TokenKind::RParen, bus).ok()?;
                let address = match addr {
                    Expr::Literal(_, _, Literal::Number(n)) => n as u32,
                    _ => {
                        bus.error(code::P_BAD_STORAGE_CLASS, "`@map` address must be a constant", loc);
                        0
                    }
                };
                Some((StorageClassSpec::Ram, Some(address)))
            }
            other => {
                bus.error(code::P_BAD_STORAGE_CLASS, format!("unknown storage sigil `@{}`", other), loc);
                None
            }
        }
    }

    fn parse_var(&mut self, bus: &mut DiagnosticBus, exported: bool) -> Option<VarDecl> {
        let loc = self.location();
        let (storage_class, fixed_address) = self.parse_storage_sigil(bus)?;
        let is_const = self.at(&TokenKind::KwConst);
        if is_const {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
        } else {
            self.eat(TokenKind::KwLet, bus).ok()?;
        }
        let (name, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::Colon, bus).ok()?;
        let ty = self.parse_type_expr(bus)?;
        let init = if self.at(&TokenKind::Assign) {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            Some(self.parse_expr(bus)?)
        } else {
            None
        };
        self.eat(TokenKind::Semi, bus).ok()?;
        Some(VarDecl {
            id: self.ids.next(),
            name,
            storage_class,
            ty,
            init,
            is_const,
            exported,
            fixed_address,
            location: loc,
        })
    }

    fn parse_function(&mut self, bus: &mut DiagnosticBus, exported: bool) -> Option<FuncDecl> {
        let loc = self.location();
        self.eat(TokenKind::KwFunction, bus).ok()?;
        let (name, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::LParen, bus).ok()?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let ploc = self.location();
            let (pname, _) = self.eat_ident(bus).ok()?;
            self.eat(TokenKind::Colon, bus).ok()?;
            let pty = self.parse_type_expr(bus)?;
            params.push(Param { id: self.ids.next(), name: pname, ty: pty, location: ploc });
            if self.at(&TokenKind::Comma) {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            } else {
                break;
            }
        }
        self.eat(TokenKind::RParen, bus).ok()?;
        self.eat(TokenKind::Colon, bus).ok()?;
        let return_type = self.parse_type_expr(bus)?;
        let body = self.parse_block(bus)?;
        Some(FuncDecl { id: self.ids.next(), name, params, return_type, body, exported, location: loc })
    }

    fn parse_type_alias(&mut self, bus: &mut DiagnosticBus) -> Option<TypeAliasDecl> {
        let loc = self.location();
        self.eat(TokenKind::KwType, bus).ok()?;
        let (name, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::Assign, bus).ok()?;
        let ty = self.parse_type_expr(bus)?;
        self.eat(TokenKind::Semi, bus).ok()?;
        Some(TypeAliasDecl { id: self.ids.next(), name, ty, location: loc })
    }

    fn parse_enum(&mut self, bus: &mut DiagnosticBus) -> Option<EnumDecl> {
        let loc = self.location();
        self.eat(TokenKind::KwEnum, bus).ok()?;
        let (name, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::LBrace, bus).ok()?;
        let mut members = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let (member_name, _) = self.eat_ident(bus).ok()?;
            let value = if self.at(&TokenKind::Assign) {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                match self.current.kind.clone() {
                    TokenKind::Int(n) => {
                        self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                        Some(n)
                    }
                    _ => {
                        bus.error(code::P_EXPECTED_EXPR, "enum member value must be an integer literal", self.location());
                        None
                    }
                }
            } else {
                None
            };
            members.push((member_name, value));
            if self.at(&TokenKind::Comma) {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            } else {
                break;
            }
        }
        self.eat(TokenKind::RBrace, bus).ok()?;
        Some(EnumDecl { id: self.ids.next(), name, members, location: loc })
    }

    fn parse_type_expr(&mut self, bus: &mut DiagnosticBus) -> Option<TypeExpr> {
        let base = match self.current.kind.clone() {
            TokenKind::KwVoid => { self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?; TypeExpr::Void }
            TokenKind::Ident(name) if name == "bool" => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                TypeExpr::Bool
            }
            TokenKind::KwByte => { self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?; TypeExpr::Byte }
            TokenKind::KwWord => { self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?; TypeExpr::Word }
            TokenKind::Star => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                let inner = self.parse_type_expr(bus)?;
                TypeExpr::Pointer(Box::new(inner))
            }
            TokenKind::Ident(name) => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                TypeExpr::Named(name)
            }
            _ => {
                bus.error(code::P_EXPECTED_TYPE, format!("expected a type, found {:?}", self.current.kind), self.location());
                return None;
            }
        };
        if self.at(&TokenKind::LBracket) {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            let len = self.parse_expr(bus)?;
            self.eat(TokenKind::RBracket, bus).ok()?;
            return Some(TypeExpr::Array(Box::new(base), len));
        }
        Some(base)
    }

    fn parse_block(&mut self, bus: &mut DiagnosticBus) -> Option<Stmt> {
        let loc = self.location();
        self.eat(TokenKind::LBrace, bus).ok()?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            match self.parse_stmt(bus) {
                Some(s) => stmts.push(s),
                None => self.resync(bus),
            }
        }
        self.eat(TokenKind::RBrace, bus).ok()?;
        Some(Stmt::Block(self.ids.next(), loc, stmts))
    }

    fn parse_stmt(&mut self, bus: &mut DiagnosticBus) -> Option<Stmt> {
        let loc = self.location();
        match &self.current.kind {
            TokenKind::LBrace => self.parse_block(bus),
            TokenKind::KwIf => self.parse_if(bus),
            TokenKind::KwWhile => self.parse_while(bus),
            TokenKind::KwDo => self.parse_do_while(bus),
            TokenKind::KwFor => self.parse_for(bus),
            TokenKind::KwSwitch => self.parse_switch(bus),
            TokenKind::KwBreak => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                self.eat(TokenKind::Semi, bus).ok()?;
                Some(Stmt::Break(self.ids.next(), loc))
            }
            TokenKind::KwContinue => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                self.eat(TokenKind::Semi, bus).ok()?;
                Some(Stmt::Continue(self.ids.next(), loc))
            }
            TokenKind::KwReturn => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                let value = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr(bus)?)
                };
                self.eat(TokenKind::Semi, bus).ok()?;
                Some(Stmt::Return(self.ids.next(), loc, value))
            }
            TokenKind::KwLet | TokenKind::KwConst | TokenKind::At => {
                // A block-scoped variable: parsed exactly like a module-level
                // declaration, then surfaced as an initializing assignment so
                // statement lowering does not need a separate declaration form.
                let decl = self.parse_var(bus, false)?;
                let ident_id = self.ids.next();
                let assign_id = self.ids.next();
                let fallback_id = self.ids.next();
                Some(Stmt::Expr(
                    self.ids.next(),
                    decl.location.clone(),
                    Expr::Assignment(
                        assign_id,
                        decl.location.clone(),
                        Box::new(Expr::Ident(ident_id, decl.location.clone(), decl.name.clone())),
                        Box::new(decl.init.unwrap_or(Expr::Literal(
                            fallback_id,
                            decl.location.clone(),
                            Literal::Number(0),
                        ))),
                    ),
                ))
            }
            _ => {
                let expr = self.parse_expr(bus)?;
                self.eat(TokenKind::Semi, bus).ok()?;
                Some(Stmt::Expr(self.ids.next(), loc, expr))
            }
        }
    }

    fn parse_if(&mut self, bus: &mut DiagnosticBus) -> Option<Stmt> {
        let loc = self.location();
        self.eat(TokenKind::KwIf, bus).ok()?;
        self.eat(TokenKind::LParen, bus).ok()?;
        let cond = self.parse_expr(bus)?;
        self.eat(TokenKind::RParen, bus).ok()?;
        let then = self.parse_stmt(bus)?;
        let els = if self.at(&TokenKind::KwElse) {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            Some(Box::new(self.parse_stmt(bus)?))
        } else {
            None
        };
        Some(Stmt::If(self.ids.next(), loc, cond, Box::new(then), els))
    }

    fn parse_while(&mut self, bus: &mut DiagnosticBus) -> Option<Stmt> {
        let loc = self.location();
        self.eat(TokenKind::KwWhile, bus).ok()?;
        self.eat(TokenKind::LParen, bus).ok()?;
        let cond = self.parse_expr(bus)?;
        self.eat(TokenKind::RParen, bus).ok()?;
        let body = self.parse_stmt(bus)?;
        Some(Stmt::While(self.ids.next(), loc, cond, Box::new(body)))
    }

    fn parse_do_while(&mut self, bus: &mut DiagnosticBus) -> Option<Stmt> {
        let loc = self.location();
        self.eat(TokenKind::KwDo, bus).ok()?;
        let body = self.parse_stmt(bus)?;
        self.eat(TokenKind::KwWhile, bus).ok()?;
        self.eat(TokenKind::LParen, bus).ok()?;
        let cond = self.parse_expr(bus)?;
        self.eat(TokenKind::RParen, bus).ok()?;
        self.eat(TokenKind::Semi, bus).ok()?;
        Some(Stmt::DoWhile(self.ids.next(), loc, Box::new(body), cond))
    }

    fn parse_for(&mut self, bus: &mut DiagnosticBus) -> Option<Stmt> {
        let loc = self.location();
        self.eat(TokenKind::KwFor, bus).ok()?;
        self.eat(TokenKind::LParen, bus).ok()?;
        let (var, _) = self.eat_ident(bus).ok()?;
        self.eat(TokenKind::Assign, bus).ok()?;
        let from = self.parse_expr(bus)?;
        let downto = if self.at(&TokenKind::KwTo) {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            false
        } else {
            self.eat(TokenKind::KwDownto, bus).ok()?;
            true
        };
        let to = self.parse_expr(bus)?;
        let step = if self.at(&TokenKind::KwStep) {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            Some(self.parse_expr(bus)?)
        } else {
            None
        };
        self.eat(TokenKind::RParen, bus).ok()?;
        let body = self.parse_stmt(bus)?;
        Some(Stmt::For(
            self.ids.next(),
            loc,
            ForHeader { var, from, to, downto, step },
            Box::new(body),
        ))
    }

    fn parse_switch(&mut self, bus: &mut DiagnosticBus) -> Option<Stmt> {
        let loc = self.location();
        self.eat(TokenKind::KwSwitch, bus).ok()?;
        self.eat(TokenKind::LParen, bus).ok()?;
        let scrutinee = self.parse_expr(bus)?;
        self.eat(TokenKind::RParen, bus).ok()?;
        self.eat(TokenKind::LBrace, bus).ok()?;
        let mut cases = Vec::new();
        let mut default = None;
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::KwCase) {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                let value = self.parse_expr(bus)?;
                self.eat(TokenKind::Colon, bus).ok()?;
                let body = self.parse_stmt(bus)?;
                cases.push(SwitchCase { value, body });
            } else if self.at(&TokenKind::KwDefault) {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                self.eat(TokenKind::Colon, bus).ok()?;
                default = Some(Box::new(self.parse_stmt(bus)?));
            } else {
                bus.error(code::P_EXPECTED_STMT, "expected `case` or `default`", self.location());
                self.resync(bus);
            }
        }
        self.eat(TokenKind::RBrace, bus).ok()?;
        Some(Stmt::Switch(self.ids.next(), loc, scrutinee, cases, default))
    }

    // --- Expressions, precedence climbing, weakest to strongest ---

    fn parse_expr(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_assignment(bus)
    }

    fn parse_assignment(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        let lhs = self.parse_ternary(bus)?;
        if self.at(&TokenKind::Assign) {
            let loc = self.location();
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            let rhs = self.parse_assignment(bus)?;
            if !lhs.is_lvalue() {
                bus.error(code::S_NOT_ASSIGNABLE, "left side of `=` is not assignable", lhs.location().clone());
            }
            return Some(Expr::Assignment(self.ids.next(), loc, Box::new(lhs), Box::new(rhs)));
        }
        Some(lhs)
    }

    fn parse_ternary(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        let cond = self.parse_logical_or(bus)?;
        if self.at(&TokenKind::Question) {
            let loc = self.location();
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            let then = self.parse_assignment(bus)?;
            self.eat(TokenKind::Colon, bus).ok()?;
            let els = self.parse_assignment(bus)?;
            return Some(Expr::Ternary(self.ids.next(), loc, Box::new(cond), Box::new(then), Box::new(els)));
        }
        Some(cond)
    }

    fn parse_binary_level(
        &mut self,
        bus: &mut DiagnosticBus,
        ops: &[(TokenKind, BinOp)],
        next: fn(&mut Self, &mut DiagnosticBus) -> Option<Expr>,
    ) -> Option<Expr> {
        let mut lhs = next(self, bus)?;
        loop {
            let matched = ops.iter().find(|(tok, _)| self.current.kind == *tok);
            let Some((_, op)) = matched else { break };
            let op = *op;
            let loc = self.location();
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            let rhs = next(self, bus)?;
            lhs = Expr::Binary(self.ids.next(), loc, op, Box::new(lhs), Box::new(rhs));
        }
        Some(lhs)
    }

    fn parse_logical_or(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(bus, &[(TokenKind::PipePipe, BinOp::LogicalOr)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(bus, &[(TokenKind::AmpAmp, BinOp::LogicalAnd)], Self::parse_bitor)
    }

    fn parse_bitor(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(bus, &[(TokenKind::Pipe, BinOp::Or)], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(bus, &[(TokenKind::Caret, BinOp::Xor)], Self::parse_bitand)
    }

    fn parse_bitand(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(bus, &[(TokenKind::Amp, BinOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(
            bus,
            &[(TokenKind::Eq, BinOp::Eq), (TokenKind::Ne, BinOp::Ne)],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(
            bus,
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Le, BinOp::Le),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::Ge, BinOp::Ge),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(
            bus,
            &[(TokenKind::Shl, BinOp::Shl), (TokenKind::Shr, BinOp::Shr)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(
            bus,
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        self.parse_binary_level(
            bus,
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        let loc = self.location();
        let op = match self.current.kind {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Tilde => Some(UnOp::Not),
            TokenKind::Bang => Some(UnOp::LogicalNot),
            TokenKind::Amp => Some(UnOp::AddressOf),
            TokenKind::Star => Some(UnOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
            let operand = self.parse_unary(bus)?;
            return Some(Expr::Unary(self.ids.next(), loc, op, Box::new(operand)));
        }
        self.parse_postfix(bus)
    }

    fn parse_postfix(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        let mut expr = self.parse_primary(bus)?;
        loop {
            match self.current.kind {
                TokenKind::LBracket => {
                    let loc = self.location();
                    self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                    let index = self.parse_expr(bus)?;
                    self.eat(TokenKind::RBracket, bus).ok()?;
                    expr = Expr::Index(self.ids.next(), loc, Box::new(expr), Box::new(index));
                }
                TokenKind::Dot => {
                    let loc = self.location();
                    self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                    let (name, _) = self.eat_ident(bus).ok()?;
                    expr = Expr::Member(self.ids.next(), loc, Box::new(expr), name);
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self, bus: &mut DiagnosticBus) -> Option<Expr> {
        let loc = self.location();
        match self.current.kind.clone() {
            TokenKind::Int(n) => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                Some(Expr::Literal(self.ids.next(), loc, Literal::Number(n)))
            }
            TokenKind::Str(s) => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                Some(Expr::Literal(self.ids.next(), loc, Literal::Str(s)))
            }
            TokenKind::Ident(name) if name == "true" => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                Some(Expr::Literal(self.ids.next(), loc, Literal::Bool(true)))
            }
            TokenKind::Ident(name) if name == "false" => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                Some(Expr::Literal(self.ids.next(), loc, Literal::Bool(false)))
            }
            TokenKind::Ident(name) => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                if self.at(&TokenKind::LParen) {
                    self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                    let mut args = Vec::new();
                    while !self.at(&TokenKind::RParen) {
                        args.push(self.parse_expr(bus)?);
                        if self.at(&TokenKind::Comma) {
                            self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                        } else {
                            break;
                        }
                    }
                    self.eat(TokenKind::RParen, bus).ok()?;
                    Some(Expr::Call(self.ids.next(), loc, name, args))
                } else {
                    Some(Expr::Ident(self.ids.next(), loc, name))
                }
            }
            TokenKind::LParen => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                let inner = self.parse_expr(bus)?;
                self.eat(TokenKind::RParen, bus).ok()?;
                Some(inner)
            }
            TokenKind::LBracket => {
                self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                let mut elems = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    elems.push(self.parse_expr(bus)?);
                    if self.at(&TokenKind::Comma) {
                        self.bump().map_err(|e| self.report_lex_error(bus, e)).ok()?;
                    } else {
                        break;
                    }
                }
                self.eat(TokenKind::RBracket, bus).ok()?;
                Some(Expr::Literal(self.ids.next(), loc, Literal::Array(elems)))
            }
            _ => {
                bus.error(
                    code::P_EXPECTED_EXPR,
                    format!("expected an expression, found {:?}", self.current.kind),
                    loc,
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Option<Program>, DiagnosticBus) {
        let mut bus = DiagnosticBus::default();
        let mut parser = Parser::new("t.b65", src).expect("lex error");
        let program = parser.parse_program(&mut bus);
        (program, bus)
    }

    #[test]
    fn parses_minimal_module() {
        let (program, bus) = parse("module M;");
        assert!(!bus.has_errors());
        let program = program.unwrap();
        assert_eq!(program.module.name, "M");
        assert!(program.decls.is_empty());
    }

    #[test]
    fn parses_const_declaration() {
        let (program, bus) = parse("module M; const C: word = $D020;");
        assert!(!bus.has_errors());
        let program = program.unwrap();
        assert_eq!(program.decls.len(), 1);
        match &program.decls[0] {
            Decl::Variable(v) => {
                assert_eq!(v.name, "C");
                assert!(v.is_const);
                assert!(matches!(v.ty, TypeExpr::Word));
            }
            _ => panic!("expected a variable declaration"),
        }
    }

    #[test]
    fn parses_for_loop_header() {
        let (program, bus) = parse(
            "module T; function f(): void { for (i = 0 to 3) { let x: byte = 1; } }",
        );
        assert!(!bus.has_errors());
        let program = program.unwrap();
        match &program.decls[0] {
            Decl::Function(f) => match &f.body {
                Stmt::Block(_, _, stmts) => {
                    assert_eq!(stmts.len(), 1);
                    assert!(matches!(stmts[0], Stmt::For(..)));
                }
                _ => panic!("expected a block body"),
            },
            _ => panic!("expected a function declaration"),
        }
    }

    #[test]
    fn missing_module_header_is_an_error() {
        let (program, bus) = parse("let x: byte = 1;");
        assert!(bus.has_errors());
        assert!(program.is_none());
    }

    #[test]
    fn map_sigil_carries_fixed_address() {
        let (program, bus) = parse("module M; @map($D020) let BORDER: byte;");
        assert!(!bus.has_errors());
        let program = program.unwrap();
        match &program.decls[0] {
            Decl::Variable(v) => assert_eq!(v.fixed_address, Some(0xD020)),
            _ => panic!("expected a variable declaration"),
        }
    }

    #[test]
    fn assignment_target_must_be_lvalue() {
        let (_, bus) = parse("module M; function f(): void { 1 = 2; }");
        assert!(bus.has_errors());
    }

    #[test]
    fn address_of_and_deref_parse_as_unary_ops() {
        let (program, bus) = parse(
            "module M; function f(): void { let p: *byte = &x; *p = 1; }",
        );
        assert!(!bus.has_errors());
        let program = program.unwrap();
        match &program.decls[0] {
            Decl::Function(f) => match &f.body {
                Stmt::Block(_, _, stmts) => {
                    let init = match &stmts[0] {
                        Stmt::Expr(_, _, Expr::Assignment(_, _, _, init)) => init,
                        other => panic!("expected an initializing assignment, got {other:?}"),
                    };
                    assert!(matches!(**init, Expr::Unary(_, _, UnOp::AddressOf, _)));

                    match &stmts[1] {
                        Stmt::Expr(_, _, Expr::Assignment(_, _, target, _)) => {
                            assert!(matches!(**target, Expr::Unary(_, _, UnOp::Deref, _)));
                        }
                        other => panic!("expected an assignment through a deref, got {other:?}"),
                    }
                }
                _ => panic!("expected a block body"),
            },
            _ => panic!("expected a function declaration"),
        }
    }
}
