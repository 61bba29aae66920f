// Points-to analysis
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
// Andersen-style, inclusion-based alias analysis. Four
// constraint forms are collected while walking every declaration's
// initializer and every function body:
//
//   x = &y   Base(x, y)   pts(x) <- pts(x) u {y}
//   x = y    Copy(x, y)   pts(x) <- pts(x) u pts(y)
//   x = *y   Load(x, y)   pts(x) <- pts(x) u (u over z in pts(y) of pts(z))
//   *x = y   Store(x, y)  for z in pts(x): pts(z) <- pts(z) u pts(y)
//
// and solved to a fixpoint with a naive "recheck everything" worklist; the
// constraint sets in a Blend65 program are small enough that the quadratic
// behavior of that approach never matters in practice.
//
// Variables are identified by declared name rather than by resolved symbol,
// since this analysis runs directly over the parsed tree ahead of (and
// independent of) the symbol table building in the semantic passes.

use std::collections::{HashMap, HashSet};

use crate::ast::{Decl, Expr, ForHeader, Program, Stmt, StorageClassSpec, SwitchCase, UnOp};
use crate::diagnostics::{code, DiagnosticBus};

/// The hardware memory regions a declaration's storage can land in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Region {
    ZeroPage,
    Ram,
    Data,
    Hardware,
    Stack,
}

fn region_of_decl(storage_class: StorageClassSpec, fixed_address: Option<u32>) -> Region {
    if fixed_address.is_some() {
        return Region::Hardware;
    }
    match storage_class {
        StorageClassSpec::Zp => Region::ZeroPage,
        StorageClassSpec::Ram | StorageClassSpec::Inferred => Region::Ram,
        StorageClassSpec::Data => Region::Data,
    }
}

enum Constraint {
    Base(String, String),
    Copy(String, String),
    Load(String, String),
    Store(String, String),
}

/// Points-to sets and region tags for every declaration visible in a program.
pub struct AliasAnalysis {
    points_to: HashMap<String, HashSet<String>>,
    regions: HashMap<String, Region>,
}

impl AliasAnalysis {
    pub fn points_to(&self, name: &str) -> Option<&HashSet<String>> {
        self.points_to.get(name)
    }

    pub fn region_of(&self, name: &str) -> Option<Region> {
        self.regions.get(name).copied()
    }

    /// Two declarations may alias when their points-to sets intersect.
    pub fn may_alias(&self, a: &str, b: &str) -> bool {
        match (self.points_to.get(a), self.points_to.get(b)) {
            (Some(pa), Some(pb)) => pa.intersection(pb).next().is_some(),
            _ => false,
        }
    }

    /// Reports `S101` for every `@map` declaration whose fixed address falls
    /// within `code_range` (supplied by the backend once it has assigned the
    /// program its load address; this analysis has no address map of its
    /// own to compare against).
    pub fn check_self_modifying(
        program: &Program,
        code_range: std::ops::Range<u32>,
        bus: &mut DiagnosticBus,
    ) {
        for decl in &program.decls {
            if let Decl::Variable(v) = decl {
                if let Some(addr) = v.fixed_address {
                    if code_range.contains(&addr) {
                        bus.warning(
                            code::S_SELF_MODIFYING_CODE,
                            format!(
                                "`{}` is mapped at ${:04X}, inside the program's own code range",
                                v.name, addr
                            ),
                            v.location.clone(),
                        );
                    }
                }
            }
        }
    }
}

pub fn analyze(program: &Program) -> AliasAnalysis {
    let mut regions = HashMap::new();
    let mut constraints = Vec::new();

    for decl in &program.decls {
        match decl {
            Decl::Variable(v) => {
                regions.insert(v.name.clone(), region_of_decl(v.storage_class, v.fixed_address));
                if let Some(init) = &v.init {
                    collect_init(&v.name, init, &mut constraints);
                }
            }
            Decl::Function(f) => {
                for p in &f.params {
                    regions.entry(p.name.clone()).or_insert(Region::Stack);
                }
                collect_stmt(&f.body, &mut regions, &mut constraints);
            }
            Decl::Import(_) | Decl::TypeAlias(_) | Decl::Enum(_) => {}
        }
    }

    let points_to = solve(&constraints);
    AliasAnalysis { points_to, regions }
}

fn collect_init(target: &str, init: &Expr, constraints: &mut Vec<Constraint>) {
    if let Some(c) = constraint_from(target, init) {
        constraints.push(c);
    }
}

fn collect_stmt(stmt: &Stmt, regions: &mut HashMap<String, Region>, constraints: &mut Vec<Constraint>) {
    match stmt {
        Stmt::Block(_, _, stmts) => {
            for s in stmts {
                collect_stmt(s, regions, constraints);
            }
        }
        Stmt::Expr(_, _, e) => collect_expr(e, regions, constraints),
        Stmt::If(_, _, cond, then, els) => {
            collect_expr(cond, regions, constraints);
            collect_stmt(then, regions, constraints);
            if let Some(els) = els {
                collect_stmt(els, regions, constraints);
            }
        }
        Stmt::While(_, _, cond, body) => {
            collect_expr(cond, regions, constraints);
            collect_stmt(body, regions, constraints);
        }
        Stmt::DoWhile(_, _, body, cond) => {
            collect_stmt(body, regions, constraints);
            collect_expr(cond, regions, constraints);
        }
        Stmt::For(_, _, header, body) => {
            let ForHeader { var, from, to, step, .. } = header;
            regions.entry(var.clone()).or_insert(Region::Stack);
            collect_expr(from, regions, constraints);
            collect_expr(to, regions, constraints);
            if let Some(step) = step {
                collect_expr(step, regions, constraints);
            }
            collect_stmt(body, regions, constraints);
        }
        Stmt::Switch(_, _, scrutinee, cases, default) => {
            collect_expr(scrutinee, regions, constraints);
            for SwitchCase { value, body } in cases {
                collect_expr(value, regions, constraints);
                collect_stmt(body, regions, constraints);
            }
            if let Some(default) = default {
                collect_stmt(default, regions, constraints);
            }
        }
        Stmt::Match(..) | Stmt::Break(..) | Stmt::Continue(..) => {}
        Stmt::Return(_, _, value) => {
            if let Some(value) = value {
                collect_expr(value, regions, constraints);
            }
        }
    }
}

fn collect_expr(expr: &Expr, regions: &mut HashMap<String, Region>, constraints: &mut Vec<Constraint>) {
    if let Expr::Assignment(_, _, target, value) = expr {
        match target.as_ref() {
            Expr::Ident(_, _, name) => {
                regions.entry(name.clone()).or_insert(Region::Stack);
                if let Some(c) = constraint_from(name, value) {
                    constraints.push(c);
                }
            }
            Expr::Unary(_, _, UnOp::Deref, inner) => {
                if let Expr::Ident(_, _, x) = inner.as_ref() {
                    if let Some(y) = ident_of(value) {
                        constraints.push(Constraint::Store(x.clone(), y));
                    }
                }
            }
            _ => {}
        }
    }

    // Descend regardless of whether this expression was itself an
    // assignment, so nested assignments and address-of/deref uses in
    // subexpressions are still visited.
    match expr {
        Expr::Literal(..) | Expr::Ident(..) => {}
        Expr::Binary(_, _, _, l, r) => {
            collect_expr(l, regions, constraints);
            collect_expr(r, regions, constraints);
        }
        Expr::Unary(_, _, _, e) => collect_expr(e, regions, constraints),
        Expr::Ternary(_, _, c, t, e) => {
            collect_expr(c, regions, constraints);
            collect_expr(t, regions, constraints);
            collect_expr(e, regions, constraints);
        }
        Expr::Call(_, _, _, args) => {
            for a in args {
                collect_expr(a, regions, constraints);
            }
        }
        Expr::Index(_, _, base, index) => {
            collect_expr(base, regions, constraints);
            collect_expr(index, regions, constraints);
        }
        Expr::Member(_, _, base, _) => collect_expr(base, regions, constraints),
        Expr::Assignment(_, _, target, value) => {
            collect_expr(target, regions, constraints);
            collect_expr(value, regions, constraints);
        }
    }
}

/// Builds the constraint generated by `target = value`, when `value` is one
/// of the three recognized right-hand forms (`&y`, `y`, `*y`).
fn constraint_from(target: &str, value: &Expr) -> Option<Constraint> {
    match value {
        Expr::Unary(_, _, UnOp::AddressOf, inner) => {
            ident_of(inner).map(|y| Constraint::Base(target.to_string(), y))
        }
        Expr::Unary(_, _, UnOp::Deref, inner) => {
            ident_of(inner).map(|y| Constraint::Load(target.to_string(), y))
        }
        Expr::Ident(_, _, y) => Some(Constraint::Copy(target.to_string(), y.clone())),
        _ => None,
    }
}

fn ident_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(_, _, name) => Some(name.clone()),
        _ => None,
    }
}

fn solve(constraints: &[Constraint]) -> HashMap<String, HashSet<String>> {
    let mut pts: HashMap<String, HashSet<String>> = HashMap::new();
    for c in constraints {
        let (x, y) = match c {
            Constraint::Base(x, y)
            | Constraint::Copy(x, y)
            | Constraint::Load(x, y)
            | Constraint::Store(x, y) => (x, y),
        };
        pts.entry(x.clone()).or_default();
        pts.entry(y.clone()).or_default();
    }

    loop {
        let mut changed = false;
        for c in constraints {
            match c {
                Constraint::Base(x, y) => {
                    changed |= pts.get_mut(x).unwrap().insert(y.clone());
                }
                Constraint::Copy(x, y) => {
                    let from: Vec<String> = pts[y].iter().cloned().collect();
                    let entry = pts.get_mut(x).unwrap();
                    for t in from {
                        changed |= entry.insert(t);
                    }
                }
                Constraint::Load(x, y) => {
                    let zs: Vec<String> = pts[y].iter().cloned().collect();
                    let mut additions = Vec::new();
                    for z in zs {
                        additions.extend(pts[&z].iter().cloned());
                    }
                    let entry = pts.get_mut(x).unwrap();
                    for t in additions {
                        changed |= entry.insert(t);
                    }
                }
                Constraint::Store(x, y) => {
                    let zs: Vec<String> = pts[x].iter().cloned().collect();
                    let from: Vec<String> = pts[y].iter().cloned().collect();
                    for z in zs {
                        let entry = pts.get_mut(&z).unwrap();
                        for t in &from {
                            changed |= entry.insert(t.clone());
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    pts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeIdSource, TypeExpr, VarDecl};
    use crate::source::Range;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("t.b65"))
    }

    fn program_with_decls(decls: Vec<Decl>) -> Program {
        let mut ids = NodeIdSource::new();
        Program {
            module: crate::ast::ModuleDecl { id: ids.next(), name: "M".into(), location: range() },
            decls,
        }
    }

    fn var(name: &str, storage: StorageClassSpec, init: Option<Expr>, fixed_address: Option<u32>) -> Decl {
        let mut ids = NodeIdSource::new();
        Decl::Variable(VarDecl {
            id: ids.next(),
            name: name.into(),
            storage_class: storage,
            ty: TypeExpr::Byte,
            init,
            is_const: false,
            exported: false,
            fixed_address,
            location: range(),
        })
    }

    #[test]
    fn address_of_creates_base_constraint() {
        let mut ids = NodeIdSource::new();
        let y = var("y", StorageClassSpec::Ram, None, None);
        let addr_of_y = Expr::Unary(
            ids.next(),
            range(),
            UnOp::AddressOf,
            Box::new(Expr::Ident(ids.next(), range(), "y".into())),
        );
        let x = var("x", StorageClassSpec::Ram, Some(addr_of_y), None);
        let program = program_with_decls(vec![y, x]);

        let analysis = analyze(&program);
        let pts = analysis.points_to("x").expect("x has a points-to set");
        assert!(pts.contains("y"));
    }

    #[test]
    fn copy_propagates_points_to_set() {
        let mut ids = NodeIdSource::new();
        let z = var("z", StorageClassSpec::Ram, None, None);
        let addr_of_z = Expr::Unary(
            ids.next(),
            range(),
            UnOp::AddressOf,
            Box::new(Expr::Ident(ids.next(), range(), "z".into())),
        );
        let x = var("x", StorageClassSpec::Ram, Some(addr_of_z), None);
        let y = var("y", StorageClassSpec::Ram, Some(Expr::Ident(ids.next(), range(), "x".into())), None);
        let program = program_with_decls(vec![z, x, y]);

        let analysis = analyze(&program);
        assert!(analysis.points_to("y").unwrap().contains("z"));
        assert!(analysis.may_alias("x", "y"));
    }

    #[test]
    fn unrelated_pointers_do_not_alias() {
        let mut ids = NodeIdSource::new();
        let a = var("a", StorageClassSpec::Ram, None, None);
        let b = var("b", StorageClassSpec::Ram, None, None);
        let addr_of_a = Expr::Unary(
            ids.next(),
            range(),
            UnOp::AddressOf,
            Box::new(Expr::Ident(ids.next(), range(), "a".into())),
        );
        let addr_of_b = Expr::Unary(
            ids.next(),
            range(),
            UnOp::AddressOf,
            Box::new(Expr::Ident(ids.next(), range(), "b".into())),
        );
        let p = var("p", StorageClassSpec::Ram, Some(addr_of_a), None);
        let q = var("q", StorageClassSpec::Ram, Some(addr_of_b), None);
        let program = program_with_decls(vec![a, b, p, q]);

        let analysis = analyze(&program);
        assert!(!analysis.may_alias("p", "q"));
    }

    #[test]
    fn map_declaration_is_tagged_hardware_region() {
        let border = var("BORDER", StorageClassSpec::Ram, None, Some(0xD020));
        let program = program_with_decls(vec![border]);
        let analysis = analyze(&program);
        assert_eq!(analysis.region_of("BORDER"), Some(Region::Hardware));
    }

    #[test]
    fn zero_page_declaration_is_tagged_zero_page_region() {
        let counter = var("counter", StorageClassSpec::Zp, None, None);
        let program = program_with_decls(vec![counter]);
        let analysis = analyze(&program);
        assert_eq!(analysis.region_of("counter"), Some(Region::ZeroPage));
    }

    #[test]
    fn map_inside_code_range_is_flagged_self_modifying() {
        let risky = var("RISKY", StorageClassSpec::Ram, None, Some(0x0850));
        let program = program_with_decls(vec![risky]);
        let mut bus = DiagnosticBus::new();
        AliasAnalysis::check_self_modifying(&program, 0x0801..0x2000, &mut bus);
        assert!(bus.all().iter().any(|d| d.code == code::S_SELF_MODIFYING_CODE));
    }

    #[test]
    fn map_outside_code_range_is_not_flagged() {
        let safe = var("SAFE", StorageClassSpec::Ram, None, Some(0xD020));
        let program = program_with_decls(vec![safe]);
        let mut bus = DiagnosticBus::new();
        AliasAnalysis::check_self_modifying(&program, 0x0801..0x2000, &mut bus);
        assert!(bus.all().is_empty());
    }
}
