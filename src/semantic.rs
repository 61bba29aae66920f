// Semantic analyzer
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
// Orchestrates four passes over a checked program, in a fixed order:
// symbol-table building, type resolution, type checking, then control-flow
// analysis (CFG + natural loops) per function, followed by whole-program
// alias analysis. Each later pass still runs even if an earlier one found
// errors, since the six end-to-end scenarios need a best-effort IL even out
// of a program with diagnostics; `compile()` in `pipeline.rs` is what
// decides whether to stop at diagnostics instead of emitting IL.

use std::collections::HashMap;

use crate::alias::{self, AliasAnalysis};
use crate::arena::Id;
use crate::ast::{Decl, Expr, ForHeader, FuncDecl, Literal, Program, Stmt, SwitchCase, TypeExpr, UnOp};
use crate::ast::ExprTypes;
use crate::cfg::{self, Cfg};
use crate::diagnostics::{code, DiagnosticBus};
use crate::dominance;
use crate::loops::{self, NaturalLoop};
use crate::scope::{Scope, ScopeKind};
use crate::symbol::{StorageClass, Symbol, SymbolKind};
use crate::types::{self, Type};

pub struct AnalysisResult {
    pub symbols: crate::scope::SymbolTable,
    pub fn_scopes: HashMap<String, Id<Scope>>,
    pub fn_return_types: HashMap<String, Type>,
    pub expr_types: ExprTypes,
    pub cfgs: HashMap<String, Cfg>,
    pub loops: HashMap<String, Vec<NaturalLoop>>,
    pub aliases: AliasAnalysis,
}

#[tracing::instrument(skip_all, fields(module = %program.module.name))]
pub fn analyze(program: &Program, bus: &mut DiagnosticBus) -> AnalysisResult {
    tracing::debug!("building symbol table");
    let (mut symbols, fn_scopes, fn_return_types) = build_symbols(program, bus);

    tracing::debug!("resolving types");
    resolve_types(program, &symbols, bus);

    tracing::debug!("checking types");
    let mut expr_types = ExprTypes::new();
    check_types(program, &mut symbols, &fn_scopes, &fn_return_types, &mut expr_types, bus);

    tracing::debug!("building control-flow graphs");
    let mut cfgs = HashMap::new();
    let mut function_loops = HashMap::new();
    for decl in &program.decls {
        if let Decl::Function(f) = decl {
            let graph = cfg::build(&f.body);
            let dom = dominance::compute(&graph);
            function_loops.insert(f.name.clone(), loops::find_loops(&graph, &dom));
            cfgs.insert(f.name.clone(), graph);
        }
    }

    tracing::debug!("running alias analysis");
    let aliases = alias::analyze(program);

    AnalysisResult {
        symbols,
        fn_scopes,
        fn_return_types,
        expr_types,
        cfgs,
        loops: function_loops,
        aliases,
    }
}

/// Resolves a `TypeExpr` to a `Type`, validating `Named` references against
/// already-declared type aliases/enums. Array lengths must
/// be literal; anything else is `S008`.
pub fn resolve_type_expr(ty: &TypeExpr, table: &crate::scope::SymbolTable, bus: &mut DiagnosticBus) -> Type {
    match ty {
        TypeExpr::Void => Type::Void,
        TypeExpr::Bool => Type::Bool,
        TypeExpr::Byte => Type::Byte,
        TypeExpr::Word => Type::Word,
        TypeExpr::Pointer(inner) => Type::pointer(resolve_type_expr(inner, table, bus)),
        TypeExpr::Array(inner, len_expr) => {
            let len = match len_expr {
                Expr::Literal(_, _, Literal::Number(n)) => *n as u32,
                other => {
                    bus.error(code::S_BAD_ARRAY_LENGTH, "array length must be a literal integer", other.location().clone());
                    0
                }
            };
            Type::array(resolve_type_expr(inner, table, bus), len)
        }
        TypeExpr::Named(name) => match table.lookup_from(table.root(), name) {
            Some(sym) => sym.ty.clone(),
            None => {
                bus.error(code::S_UNKNOWN_TYPE, format!("unknown type `{name}`"), program_location(table));
                Type::Byte
            }
        },
    }
}

fn program_location(table: &crate::scope::SymbolTable) -> crate::source::Range {
    table.scope(table.root()).location.clone()
}

fn build_symbols(
    program: &Program,
    bus: &mut DiagnosticBus,
) -> (crate::scope::SymbolTable, HashMap<String, Id<Scope>>, HashMap<String, Type>) {
    let mut table = crate::scope::SymbolTable::new(program.module.location.clone());
    let mut fn_scopes = HashMap::new();
    let mut fn_return_types = HashMap::new();

    // Pre-pass: declare named types first so forward references resolve
    // regardless of declaration order.
    for decl in &program.decls {
        match decl {
            Decl::TypeAlias(d) => {
                let underlying = resolve_type_expr(&d.ty, &table, bus);
                let ty = Type::alias(d.name.clone(), underlying);
                declare_or_report(&mut table, Symbol::new(d.name.clone(), SymbolKind::Type, StorageClass::None, ty, table.root(), d.location.clone()), bus);
            }
            Decl::Enum(d) => {
                declare_or_report(
                    &mut table,
                    Symbol::new(d.name.clone(), SymbolKind::Enum, StorageClass::None, Type::Enum(d.name.clone()), table.root(), d.location.clone()),
                    bus,
                );
                for (member, _) in &d.members {
                    declare_or_report(
                        &mut table,
                        Symbol::new(member.clone(), SymbolKind::EnumMember, StorageClass::None, Type::Enum(d.name.clone()), table.root(), d.location.clone()),
                        bus,
                    );
                }
            }
            _ => {}
        }
    }

    let main_count = program.decls.iter().filter(|d| matches!(d, Decl::Function(f) if f.name == "main")).count();
    let mut seen_main = false;

    for decl in &program.decls {
        match decl {
            Decl::Import(d) => {
                declare_or_report(
                    &mut table,
                    Symbol::new(d.symbol.clone(), SymbolKind::Imported, StorageClass::None, Type::Byte, table.root(), d.location.clone()),
                    bus,
                );
            }
            Decl::Variable(d) => {
                let ty = resolve_type_expr(&d.ty, &table, bus);
                let (kind, storage) = if d.fixed_address.is_some() {
                    (SymbolKind::MapVariable, StorageClass::Map)
                } else {
                    use crate::ast::StorageClassSpec::*;
                    (SymbolKind::Variable, match d.storage_class {
                        Zp => StorageClass::Zp,
                        Ram | Inferred => StorageClass::Ram,
                        Data => StorageClass::Data,
                    })
                };
                let mut sym = Symbol::new(d.name.clone(), kind, storage, ty, table.root(), d.location.clone())
                    .exported(d.exported)
                    .constant(d.is_const);
                if let Some(addr) = d.fixed_address {
                    sym = sym.at_address(addr);
                }
                declare_or_report(&mut table, sym, bus);
            }
            Decl::Function(d) => {
                if d.name == "main" {
                    if seen_main && main_count > 1 {
                        bus.error(code::S_DUPLICATE_MAIN, "only one `main` function is allowed", d.location.clone());
                    }
                    seen_main = true;
                    if !d.exported {
                        bus.warning(code::W_IMPLICIT_MAIN_EXPORT, "`main` is exported implicitly", d.location.clone());
                    }
                }
                let ret = resolve_type_expr(&d.return_type, &table, bus);
                let param_types: Vec<Type> = d.params.iter().map(|p| resolve_type_expr(&p.ty, &table, bus)).collect();
                let fn_ty = Type::function(param_types.clone(), ret.clone());
                fn_return_types.insert(d.name.clone(), ret);
                declare_or_report(
                    &mut table,
                    Symbol::new(d.name.clone(), SymbolKind::Function, StorageClass::None, fn_ty, table.root(), d.location.clone()).exported(d.exported),
                    bus,
                );

                let fn_scope = table.create(ScopeKind::Function, d.location.clone());
                fn_scopes.insert(d.name.clone(), fn_scope);
                for (p, ty) in d.params.iter().zip(param_types) {
                    declare_or_report(
                        &mut table,
                        Symbol::new(p.name.clone(), SymbolKind::Parameter, StorageClass::None, ty, fn_scope, p.location.clone()),
                        bus,
                    );
                }
                declare_locals(&mut table, &d.body);
                table.exit();
            }
            Decl::TypeAlias(_) | Decl::Enum(_) => {}
        }
    }

    (table, fn_scopes, fn_return_types)
}

fn declare_or_report(table: &mut crate::scope::SymbolTable, symbol: Symbol, bus: &mut DiagnosticBus) {
    let name = symbol.name.clone();
    let loc = symbol.location.clone();
    if table.declare(symbol).is_err() {
        bus.error(code::S_DUPLICATE_SYMBOL, format!("`{name}` is already declared in this scope"), loc);
    }
}

/// Recovers the local variables the parser's assignment-desugaring dropped
/// (see the parser's open-question note in DESIGN.md): the first assignment
/// to a name not yet visible in the function's scope is treated as that
/// local's declaration, with its type inferred from the initializer.
fn declare_locals(table: &mut crate::scope::SymbolTable, stmt: &Stmt) {
    match stmt {
        Stmt::Block(_, _, stmts) => {
            for s in stmts {
                declare_locals(table, s);
            }
        }
        Stmt::Expr(_, _, Expr::Assignment(_, _, target, init)) => {
            if let Expr::Ident(_, loc, name) = target.as_ref() {
                if table.lookup_local(name).is_none() {
                    let ty = infer_literal_type(init);
                    let scope = table.current();
                    let _ = table.declare(Symbol::new(name.clone(), SymbolKind::Variable, StorageClass::None, ty, scope, loc.clone()));
                }
            }
        }
        Stmt::Expr(..) => {}
        Stmt::If(_, _, _, then, els) => {
            declare_locals(table, then);
            if let Some(els) = els {
                declare_locals(table, els);
            }
        }
        Stmt::While(_, _, _, body) | Stmt::DoWhile(_, _, body, _) => declare_locals(table, body),
        Stmt::For(_, _, header, body) => {
            if table.lookup_local(&header.var).is_none() {
                let ty = infer_literal_type(&header.from);
                let scope = table.current();
                let _ = table.declare(Symbol::new(header.var.clone(), SymbolKind::Variable, StorageClass::None, ty, scope, body.location().clone()));
            }
            declare_locals(table, body);
        }
        Stmt::Switch(_, _, _, cases, default) => {
            for c in cases {
                declare_locals(table, &c.body);
            }
            if let Some(d) = default {
                declare_locals(table, d);
            }
        }
        Stmt::Match(..) | Stmt::Break(..) | Stmt::Continue(..) | Stmt::Return(..) => {}
    }
}

fn infer_literal_type(expr: &Expr) -> Type {
    match expr {
        Expr::Literal(_, _, Literal::Number(n)) if *n <= 255 => Type::Byte,
        Expr::Literal(_, _, Literal::Number(_)) => Type::Word,
        Expr::Literal(_, _, Literal::Bool(_)) => Type::Bool,
        Expr::Unary(_, _, UnOp::AddressOf, inner) => Type::pointer(infer_literal_type(inner)),
        _ => Type::Byte,
    }
}

fn resolve_types(program: &Program, table: &crate::scope::SymbolTable, bus: &mut DiagnosticBus) {
    // Type resolution happens while symbols are declared; this pass exists
    // to validate annotations that appear only inside bodies (casts are not
    // part of this language, so today that is array-length expressions on
    // local declarations, already checked by `resolve_type_expr`).
    for decl in &program.decls {
        if let Decl::Variable(d) = decl {
            let _ = resolve_type_expr(&d.ty, table, bus);
        }
    }
    let _ = &program.decls;
}

fn check_types(
    program: &Program,
    table: &mut crate::scope::SymbolTable,
    fn_scopes: &HashMap<String, Id<Scope>>,
    fn_return_types: &HashMap<String, Type>,
    expr_types: &mut ExprTypes,
    bus: &mut DiagnosticBus,
) {
    for decl in &program.decls {
        if let Decl::Variable(d) = decl {
            if let Some(init) = &d.init {
                let declared = resolve_type_expr(&d.ty, table, bus);
                let actual = check_expr(table, init, expr_types, bus);
                if !types::is_assignable(&declared, &actual) {
                    bus.error(
                        code::S_NOT_ASSIGNABLE,
                        format!("cannot assign `{actual}` to `{declared}`"),
                        init.location().clone(),
                    );
                }
            }
        }
    }
    for decl in &program.decls {
        if let Decl::Function(f) = decl {
            check_function(table, fn_scopes, fn_return_types, f, expr_types, bus);
        }
    }
}

fn check_function(
    table: &mut crate::scope::SymbolTable,
    fn_scopes: &HashMap<String, Id<Scope>>,
    fn_return_types: &HashMap<String, Type>,
    f: &FuncDecl,
    expr_types: &mut ExprTypes,
    bus: &mut DiagnosticBus,
) {
    let Some(&scope) = fn_scopes.get(&f.name) else { return };
    let ret_ty = fn_return_types.get(&f.name).cloned().unwrap_or(Type::Void);
    table.enter(scope);
    check_stmt(table, &f.body, &ret_ty, expr_types, bus);
    table.exit();
}

fn check_stmt(
    table: &crate::scope::SymbolTable,
    stmt: &Stmt,
    ret_ty: &Type,
    expr_types: &mut ExprTypes,
    bus: &mut DiagnosticBus,
) {
    match stmt {
        Stmt::Block(_, _, stmts) => {
            for s in stmts {
                check_stmt(table, s, ret_ty, expr_types, bus);
            }
        }
        Stmt::Expr(_, _, e) => {
            check_expr(table, e, expr_types, bus);
        }
        Stmt::If(_, _, cond, then, els) => {
            check_expr(table, cond, expr_types, bus);
            check_stmt(table, then, ret_ty, expr_types, bus);
            if let Some(e) = els {
                check_stmt(table, e, ret_ty, expr_types, bus);
            }
        }
        Stmt::While(_, _, cond, body) => {
            check_expr(table, cond, expr_types, bus);
            check_stmt(table, body, ret_ty, expr_types, bus);
        }
        Stmt::DoWhile(_, _, body, cond) => {
            check_stmt(table, body, ret_ty, expr_types, bus);
            check_expr(table, cond, expr_types, bus);
        }
        Stmt::For(_, _, header, body) => {
            check_for_header(table, header, expr_types, bus);
            check_stmt(table, body, ret_ty, expr_types, bus);
        }
        Stmt::Switch(_, _, scrutinee, cases, default) => {
            check_expr(table, scrutinee, expr_types, bus);
            for c in cases {
                check_expr(table, &c.value, expr_types, bus);
                check_stmt(table, &c.body, ret_ty, expr_types, bus);
            }
            if let Some(d) = default {
                check_stmt(table, d, ret_ty, expr_types, bus);
            }
        }
        Stmt::Match(..) | Stmt::Break(..) | Stmt::Continue(..) => {}
        Stmt::Return(_, loc, value) => {
            let actual = match value {
                Some(e) => check_expr(table, e, expr_types, bus),
                None => Type::Void,
            };
            if actual != *ret_ty && !types::is_assignable(ret_ty, &actual) {
                bus.error(code::S_TYPE_MISMATCH, format!("function returns `{ret_ty}` but this `return` yields `{actual}`"), loc.clone());
            }
        }
    }
}

fn check_for_header(table: &crate::scope::SymbolTable, header: &ForHeader, expr_types: &mut ExprTypes, bus: &mut DiagnosticBus) {
    check_expr(table, &header.from, expr_types, bus);
    check_expr(table, &header.to, expr_types, bus);
    if let Some(step) = &header.step {
        check_expr(table, step, expr_types, bus);
    }
}

fn check_expr(table: &crate::scope::SymbolTable, expr: &Expr, expr_types: &mut ExprTypes, bus: &mut DiagnosticBus) -> Type {
    let ty = match expr {
        Expr::Literal(_, _, Literal::Number(n)) if *n <= 255 => Type::Byte,
        Expr::Literal(_, _, Literal::Number(_)) => Type::Word,
        Expr::Literal(_, _, Literal::Bool(_)) => Type::Bool,
        Expr::Literal(_, _, Literal::Str(_)) => Type::pointer(Type::Byte),
        Expr::Literal(_, _, Literal::Array(items)) => {
            let elem = items.first().map(|e| check_expr(table, e, expr_types, bus)).unwrap_or(Type::Byte);
            for it in items.iter().skip(1) {
                check_expr(table, it, expr_types, bus);
            }
            Type::array(elem, items.len() as u32)
        }
        Expr::Ident(_, loc, name) => match table.lookup(name) {
            Some(sym) => sym.ty.clone(),
            None => {
                bus.error(code::S_UNKNOWN_IDENT, format!("unknown identifier `{name}`"), loc.clone());
                Type::Byte
            }
        },
        Expr::Binary(_, loc, op, l, r) => {
            let lt = check_expr(table, l, expr_types, bus);
            let rt = check_expr(table, r, expr_types, bus);
            binary_result_type(*op, &lt, &rt, loc, bus)
        }
        Expr::Unary(_, _, UnOp::AddressOf, operand) => {
            let t = check_expr(table, operand, expr_types, bus);
            Type::pointer(t)
        }
        Expr::Unary(_, _, UnOp::Deref, operand) => {
            let t = check_expr(table, operand, expr_types, bus);
            match t.underlying() {
                Type::Pointer(inner) => (**inner).clone(),
                _ => t,
            }
        }
        Expr::Unary(_, _, UnOp::LogicalNot, operand) => {
            check_expr(table, operand, expr_types, bus);
            Type::Bool
        }
        Expr::Unary(_, _, _, operand) => check_expr(table, operand, expr_types, bus),
        Expr::Ternary(_, _, cond, t, e) => {
            check_expr(table, cond, expr_types, bus);
            let tt = check_expr(table, t, expr_types, bus);
            check_expr(table, e, expr_types, bus);
            tt
        }
        Expr::Call(_, loc, name, args) => {
            for a in args {
                check_expr(table, a, expr_types, bus);
            }
            if let Some(opcode) = crate::il::intrinsic_opcode(name) {
                intrinsic_return_type(opcode)
            } else {
                match table.lookup(name) {
                    Some(sym) if sym.kind == SymbolKind::Function => match &sym.ty {
                        Type::Function(_, ret) => (**ret).clone(),
                        _ => Type::Void,
                    },
                    Some(_) => {
                        bus.error(code::S_NOT_CALLABLE, format!("`{name}` is not callable"), loc.clone());
                        Type::Void
                    }
                    None => {
                        bus.error(code::S_UNKNOWN_IDENT, format!("unknown function `{name}`"), loc.clone());
                        Type::Void
                    }
                }
            }
        }
        Expr::Index(_, _, base, index) => {
            let bt = check_expr(table, base, expr_types, bus);
            check_expr(table, index, expr_types, bus);
            match bt.underlying() {
                Type::Array(elem, _) => (**elem).clone(),
                Type::Pointer(inner) => (**inner).clone(),
                _ => Type::Byte,
            }
        }
        Expr::Member(_, _, base, _) => {
            check_expr(table, base, expr_types, bus);
            Type::Byte
        }
        Expr::Assignment(_, loc, target, value) => {
            let tt = check_expr(table, target, expr_types, bus);
            let vt = check_expr(table, value, expr_types, bus);
            if !types::is_assignable(&tt, &vt) {
                bus.error(code::S_NOT_ASSIGNABLE, format!("cannot assign `{vt}` to `{tt}`"), loc.clone());
            }
            tt
        }
    };
    expr_types.insert(expr.id(), ty.clone());
    ty
}

fn binary_result_type(op: crate::ast::BinOp, lt: &Type, rt: &Type, loc: &crate::source::Range, bus: &mut DiagnosticBus) -> Type {
    use crate::ast::BinOp::*;
    match op {
        Eq | Ne | Lt | Le | Gt | Ge | LogicalAnd | LogicalOr => Type::Bool,
        _ => {
            if lt.underlying() == &Type::Word || rt.underlying() == &Type::Word {
                Type::Word
            } else if lt.is_integral() && rt.is_integral() {
                Type::Byte
            } else {
                bus.error(code::S_TYPE_MISMATCH, format!("`{op}` is not defined for `{lt}` and `{rt}`"), loc.clone());
                Type::Byte
            }
        }
    }
}

fn intrinsic_return_type(opcode: crate::il::Opcode) -> Type {
    use crate::il::Opcode::*;
    match opcode {
        IntrinsicPeek | IntrinsicLength | IntrinsicLo | IntrinsicHi => Type::Byte,
        IntrinsicPeekw => Type::Word,
        IntrinsicPoke | IntrinsicPokew => Type::Void,
        _ => Type::Byte,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeIdSource, VarDecl};
    use crate::source::Range;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("t.b65"))
    }

    fn program_with(decls: Vec<Decl>) -> Program {
        let mut ids = NodeIdSource::new();
        Program {
            module: crate::ast::ModuleDecl { id: ids.next(), name: "M".into(), location: range() },
            decls,
        }
    }

    #[test]
    fn duplicate_top_level_symbol_is_an_error() {
        let mut ids = NodeIdSource::new();
        let a = VarDecl { id: ids.next(), name: "x".into(), storage_class: crate::ast::StorageClassSpec::Ram, ty: TypeExpr::Byte, init: None, is_const: false, exported: false, fixed_address: None, location: range() };
        let b = VarDecl { id: ids.next(), name: "x".into(), storage_class: crate::ast::StorageClassSpec::Ram, ty: TypeExpr::Byte, init: None, is_const: false, exported: false, fixed_address: None, location: range() };
        let program = program_with(vec![Decl::Variable(a), Decl::Variable(b)]);
        let mut bus = DiagnosticBus::new();
        let result = analyze(&program, &mut bus);
        assert!(bus.has_errors());
        let _ = result;
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let mut ids = NodeIdSource::new();
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::Expr(ids.next(), range(), Expr::Ident(ids.next(), range(), "nope".into()))],
        );
        let f = FuncDecl { id: ids.next(), name: "main".into(), params: vec![], return_type: TypeExpr::Void, body, exported: true, location: range() };
        let program = program_with(vec![Decl::Function(f)]);
        let mut bus = DiagnosticBus::new();
        analyze(&program, &mut bus);
        assert!(bus.all().iter().any(|d| d.code == code::S_UNKNOWN_IDENT));
    }

    #[test]
    fn word_to_byte_return_without_truncation_is_flagged() {
        let mut ids = NodeIdSource::new();
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::Return(ids.next(), range(), Some(Expr::Literal(ids.next(), range(), Literal::Number(1000))))],
        );
        let f = FuncDecl { id: ids.next(), name: "f".into(), params: vec![], return_type: TypeExpr::Byte, body, exported: false, location: range() };
        let program = program_with(vec![Decl::Function(f)]);
        let mut bus = DiagnosticBus::new();
        analyze(&program, &mut bus);
        assert!(bus.all().iter().any(|d| d.code == code::S_TYPE_MISMATCH));
    }

    #[test]
    fn desugared_local_assignment_is_declared_and_typed() {
        let mut ids = NodeIdSource::new();
        let assign = Expr::Assignment(
            ids.next(),
            range(),
            Box::new(Expr::Ident(ids.next(), range(), "x".into())),
            Box::new(Expr::Literal(ids.next(), range(), Literal::Number(5))),
        );
        let body = Stmt::Block(ids.next(), range(), vec![Stmt::Expr(ids.next(), range(), assign)]);
        let f = FuncDecl { id: ids.next(), name: "f".into(), params: vec![], return_type: TypeExpr::Void, body, exported: false, location: range() };
        let program = program_with(vec![Decl::Function(f)]);
        let mut bus = DiagnosticBus::new();
        analyze(&program, &mut bus);
        assert!(!bus.has_errors());
    }
}
