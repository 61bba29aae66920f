// IL generator
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
// Lowers a checked program to the block-structured IL. Control constructs
// follow the same block-per-branch-arm shape as the control-flow graph
// builder, except switch case labels carry a per-case index suffix: IL
// blocks are addressed by label, so unlike CFG nodes (addressed by index,
// tolerant of repeated labels) every block in a function needs a label of
// its own. `&&`/`||` and `?:` lower via a branch to a two-way merge with a
// single PHI rather than a dedicated short-circuit opcode.

use crate::ast::{BinOp, Decl, Expr, ForHeader, FuncDecl, Literal, NodeId, Program, Stmt, SwitchCase, UnOp};
use crate::diagnostics::{code, DiagnosticBus};
use crate::il::{self, FunctionBuilder, IlError, Opcode, Value};
use crate::scope::Scope;
use crate::arena::Id;
use crate::semantic::AnalysisResult;
use crate::source::Range;
use crate::types::Type;

pub fn lower_program(program: &Program, analysis: &AnalysisResult, bus: &mut DiagnosticBus) -> Result<il::Module, IlError> {
    let mut module = il::Module::new(program.module.name.clone());

    for decl in &program.decls {
        match decl {
            Decl::Import(d) => module.imports.push(format!("{}.{}", d.from_module, d.symbol)),
            Decl::Variable(d) => {
                let ty = analysis
                    .symbols
                    .lookup_from(analysis.symbols.root(), &d.name)
                    .map(|s| s.ty.clone())
                    .unwrap_or(Type::Byte);
                let init = d.init.as_ref().and_then(lower_const_init);
                if d.exported {
                    module.exports.push(d.name.clone());
                }
                module.globals.push(il::Global { name: d.name.clone(), ty, init, exported: d.exported });
            }
            Decl::Function(f) => {
                if f.exported {
                    module.exports.push(f.name.clone());
                }
            }
            Decl::TypeAlias(_) | Decl::Enum(_) => {}
        }
    }

    for decl in &program.decls {
        if let Decl::Function(f) = decl {
            let function = lower_function(f, analysis, bus)?;
            module.functions.push(function);
        }
    }

    Ok(module)
}

/// Only literal initializers fold to a constant value today; anything else
/// is left for the backend's data-segment layout pass to materialize.
fn lower_const_init(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Literal(_, _, Literal::Number(n)) => Some(Value::Const(if *n <= 255 { Type::Byte } else { Type::Word }, *n)),
        Expr::Literal(_, _, Literal::Bool(v)) => Some(Value::Const(Type::Bool, if *v { 1 } else { 0 })),
        _ => None,
    }
}

fn lower_function(f: &FuncDecl, analysis: &AnalysisResult, bus: &mut DiagnosticBus) -> Result<il::Function, IlError> {
    let scope = analysis.fn_scopes.get(&f.name).copied().unwrap_or_else(|| analysis.symbols.root());
    let ret_ty = analysis.fn_return_types.get(&f.name).cloned().unwrap_or(Type::Void);
    let params: Vec<(String, Type)> = f
        .params
        .iter()
        .map(|p| {
            let ty = analysis.symbols.lookup_from(scope, &p.name).map(|s| s.ty.clone()).unwrap_or(Type::Byte);
            (p.name.clone(), ty)
        })
        .collect();

    let mut builder = FunctionBuilder::new(f.name.clone(), params, ret_ty.clone(), f.location.clone());
    let entry = builder.new_block("entry");
    builder.switch_to(entry);

    let mut lowering = Lowering { analysis, scope, bus, label_counter: 0, loop_stack: Vec::new(), reported_unreachable: false };
    lowering.stmt(&mut builder, &f.body)?;

    if !builder.is_current_terminated() {
        match &ret_ty {
            Type::Void => {
                builder.terminate(Opcode::ReturnVoid, vec![], f.location.clone())?;
            }
            _ => {
                builder.terminate(Opcode::Return, vec![Value::Undef], f.location.clone())?;
            }
        }
    }

    Ok(builder.finish())
}

struct LoopLabels {
    continue_target: String,
    break_target: String,
}

struct Lowering<'a> {
    analysis: &'a AnalysisResult,
    scope: Id<Scope>,
    bus: &'a mut DiagnosticBus,
    label_counter: u32,
    loop_stack: Vec<LoopLabels>,
    reported_unreachable: bool,
}

impl<'a> Lowering<'a> {
    fn next_suffix(&mut self) -> u32 {
        self.label_counter += 1;
        self.label_counter
    }

    fn stmt(&mut self, b: &mut FunctionBuilder, stmt: &Stmt) -> Result<(), IlError> {
        match stmt {
            Stmt::Block(_, _, stmts) => {
                for s in stmts {
                    if b.is_current_terminated() {
                        if !self.reported_unreachable {
                            self.bus.warning(code::W_UNREACHABLE_CODE, "unreachable code", s.location().clone());
                            self.reported_unreachable = true;
                        }
                        break;
                    }
                    self.stmt(b, s)?;
                }
                Ok(())
            }
            Stmt::Expr(_, _, e) => {
                self.expr(b, e)?;
                Ok(())
            }
            Stmt::If(_, loc, cond, then, els) => self.lower_if(b, cond, then, els.as_deref(), loc),
            Stmt::While(_, loc, cond, body) => self.lower_while(b, cond, body, loc),
            Stmt::DoWhile(_, loc, body, cond) => self.lower_do_while(b, body, cond, loc),
            Stmt::For(_, loc, header, body) => self.lower_for(b, header, body, loc),
            Stmt::Switch(_, loc, scrutinee, cases, default) => self.lower_switch(b, scrutinee, cases, default.as_deref(), loc),
            Stmt::Match(..) => Ok(()),
            Stmt::Break(_, loc) => {
                if let Some(target) = self.loop_stack.last().map(|l| l.break_target.clone()) {
                    b.terminate(Opcode::Jump, vec![Value::Label(target)], loc.clone())?;
                }
                Ok(())
            }
            Stmt::Continue(_, loc) => {
                if let Some(target) = self.loop_stack.last().map(|l| l.continue_target.clone()) {
                    b.terminate(Opcode::Jump, vec![Value::Label(target)], loc.clone())?;
                }
                Ok(())
            }
            Stmt::Return(_, loc, value) => {
                match value {
                    Some(e) => {
                        let v = self.expr(b, e)?;
                        b.terminate(Opcode::Return, vec![v], loc.clone())?;
                    }
                    None => {
                        b.terminate(Opcode::ReturnVoid, vec![], loc.clone())?;
                    }
                }
                Ok(())
            }
        }
    }

    fn lower_if(&mut self, b: &mut FunctionBuilder, cond: &Expr, then: &Stmt, els: Option<&Stmt>, loc: &Range) -> Result<(), IlError> {
        let suffix = self.next_suffix();
        let then_label = format!("if_then_{suffix}");
        let merge_label = format!("if_merge_{suffix}");
        let else_label = if els.is_some() { format!("if_else_{suffix}") } else { merge_label.clone() };

        let cond_value = self.expr(b, cond)?;
        b.terminate(Opcode::Branch, vec![cond_value, Value::Label(then_label.clone()), Value::Label(else_label.clone())], loc.clone())?;

        let then_idx = b.new_block(then_label);
        b.switch_to(then_idx);
        self.stmt(b, then)?;
        if !b.is_current_terminated() {
            b.terminate(Opcode::Jump, vec![Value::Label(merge_label.clone())], loc.clone())?;
        }

        if let Some(els) = els {
            let else_idx = b.new_block(else_label);
            b.switch_to(else_idx);
            self.stmt(b, els)?;
            if !b.is_current_terminated() {
                b.terminate(Opcode::Jump, vec![Value::Label(merge_label.clone())], loc.clone())?;
            }
        }

        let merge_idx = b.new_block(merge_label);
        b.switch_to(merge_idx);
        Ok(())
    }

    fn lower_while(&mut self, b: &mut FunctionBuilder, cond: &Expr, body: &Stmt, loc: &Range) -> Result<(), IlError> {
        let suffix = self.next_suffix();
        let header_label = format!("while_header_{suffix}");
        let body_label = format!("while_body_{suffix}");
        let exit_label = format!("while_exit_{suffix}");

        b.terminate(Opcode::Jump, vec![Value::Label(header_label.clone())], loc.clone())?;

        let header_idx = b.new_block(header_label.clone());
        b.switch_to(header_idx);
        let cond_value = self.expr(b, cond)?;
        b.terminate(Opcode::Branch, vec![cond_value, Value::Label(body_label.clone()), Value::Label(exit_label.clone())], loc.clone())?;

        self.loop_stack.push(LoopLabels { continue_target: header_label.clone(), break_target: exit_label.clone() });
        let body_idx = b.new_block(body_label);
        b.switch_to(body_idx);
        self.stmt(b, body)?;
        if !b.is_current_terminated() {
            b.terminate(Opcode::Jump, vec![Value::Label(header_label)], loc.clone())?;
        }
        self.loop_stack.pop();

        let exit_idx = b.new_block(exit_label);
        b.switch_to(exit_idx);
        Ok(())
    }

    fn lower_do_while(&mut self, b: &mut FunctionBuilder, body: &Stmt, cond: &Expr, loc: &Range) -> Result<(), IlError> {
        let suffix = self.next_suffix();
        let body_label = format!("do_body_{suffix}");
        let header_label = format!("do_header_{suffix}");
        let exit_label = format!("do_exit_{suffix}");

        b.terminate(Opcode::Jump, vec![Value::Label(body_label.clone())], loc.clone())?;

        self.loop_stack.push(LoopLabels { continue_target: header_label.clone(), break_target: exit_label.clone() });
        let body_idx = b.new_block(body_label.clone());
        b.switch_to(body_idx);
        self.stmt(b, body)?;
        if !b.is_current_terminated() {
            b.terminate(Opcode::Jump, vec![Value::Label(header_label.clone())], loc.clone())?;
        }
        self.loop_stack.pop();

        let header_idx = b.new_block(header_label);
        b.switch_to(header_idx);
        let cond_value = self.expr(b, cond)?;
        b.terminate(Opcode::Branch, vec![cond_value, Value::Label(body_label), Value::Label(exit_label.clone())], loc.clone())?;

        let exit_idx = b.new_block(exit_label);
        b.switch_to(exit_idx);
        Ok(())
    }

    fn lower_for(&mut self, b: &mut FunctionBuilder, header: &ForHeader, body: &Stmt, loc: &Range) -> Result<(), IlError> {
        let suffix = self.next_suffix();
        let init_label = format!("for_init_{suffix}");
        let header_label = format!("for_header_{suffix}");
        let body_label = format!("for_body_{suffix}");
        let incr_label = format!("for_incr_{suffix}");
        let exit_label = format!("for_exit_{suffix}");

        let var_ty = self.analysis.symbols.lookup_from(self.scope, &header.var).map(|s| s.ty.clone()).unwrap_or(Type::Byte);

        b.terminate(Opcode::Jump, vec![Value::Label(init_label.clone())], loc.clone())?;

        let init_idx = b.new_block(init_label);
        b.switch_to(init_idx);
        let from_value = self.expr(b, &header.from)?;
        b.emit(Opcode::StoreVar, None, vec![Value::Name(header.var.clone()), from_value], loc.clone())?;
        b.terminate(Opcode::Jump, vec![Value::Label(header_label.clone())], loc.clone())?;

        let header_idx = b.new_block(header_label.clone());
        b.switch_to(header_idx);
        let cur = b
            .emit(Opcode::LoadVar, Some(var_ty.clone()), vec![Value::Name(header.var.clone())], loc.clone())?
            .map(Value::Reg)
            .unwrap_or(Value::Undef);
        let to_value = self.expr(b, &header.to)?;
        let cmp_op = if header.downto { Opcode::CmpGe } else { Opcode::CmpLe };
        let cond_value = b.emit(cmp_op, Some(Type::Bool), vec![cur, to_value], loc.clone())?.map(Value::Reg).unwrap_or(Value::Undef);
        b.terminate(Opcode::Branch, vec![cond_value, Value::Label(body_label.clone()), Value::Label(exit_label.clone())], loc.clone())?;

        self.loop_stack.push(LoopLabels { continue_target: incr_label.clone(), break_target: exit_label.clone() });
        let body_idx = b.new_block(body_label);
        b.switch_to(body_idx);
        self.stmt(b, body)?;
        if !b.is_current_terminated() {
            b.terminate(Opcode::Jump, vec![Value::Label(incr_label.clone())], loc.clone())?;
        }
        self.loop_stack.pop();

        let incr_idx = b.new_block(incr_label);
        b.switch_to(incr_idx);
        let cur2 = b
            .emit(Opcode::LoadVar, Some(var_ty.clone()), vec![Value::Name(header.var.clone())], loc.clone())?
            .map(Value::Reg)
            .unwrap_or(Value::Undef);
        let step_value = match &header.step {
            Some(s) => self.expr(b, s)?,
            None => Value::Const(var_ty.clone(), 1),
        };
        let step_op = if header.downto { Opcode::Sub } else { Opcode::Add };
        let next_value = b.emit(step_op, Some(var_ty.clone()), vec![cur2, step_value], loc.clone())?.map(Value::Reg).unwrap_or(Value::Undef);
        b.emit(Opcode::StoreVar, None, vec![Value::Name(header.var.clone()), next_value], loc.clone())?;
        b.terminate(Opcode::Jump, vec![Value::Label(header_label)], loc.clone())?;

        let exit_idx = b.new_block(exit_label);
        b.switch_to(exit_idx);
        Ok(())
    }

    /// Per-case labels carry a `_{i}` suffix in addition to the shared switch
    /// suffix, since every IL block needs a name of its own.
    fn lower_switch(&mut self, b: &mut FunctionBuilder, scrutinee: &Expr, cases: &[SwitchCase], default: Option<&Stmt>, loc: &Range) -> Result<(), IlError> {
        let suffix = self.next_suffix();
        let exit_label = format!("switch_exit_{suffix}");
        let default_label = format!("switch_default_{suffix}");

        let scrutinee_value = self.expr(b, scrutinee)?;

        let test_labels: Vec<String> = (0..cases.len()).map(|i| format!("switch_case_{suffix}_{i}")).collect();
        let first_target = test_labels
            .first()
            .cloned()
            .unwrap_or_else(|| if default.is_some() { default_label.clone() } else { exit_label.clone() });
        b.terminate(Opcode::Jump, vec![Value::Label(first_target)], loc.clone())?;

        self.loop_stack.push(LoopLabels { continue_target: exit_label.clone(), break_target: exit_label.clone() });

        for (i, case) in cases.iter().enumerate() {
            let test_idx = b.new_block(test_labels[i].clone());
            b.switch_to(test_idx);
            let case_value = self.expr(b, &case.value)?;
            let cmp = b
                .emit(Opcode::CmpEq, Some(Type::Bool), vec![scrutinee_value.clone(), case_value], loc.clone())?
                .map(Value::Reg)
                .unwrap_or(Value::Undef);
            let body_label = format!("switch_body_{suffix}_{i}");
            let next_target = test_labels
                .get(i + 1)
                .cloned()
                .unwrap_or_else(|| if default.is_some() { default_label.clone() } else { exit_label.clone() });
            b.terminate(Opcode::Branch, vec![cmp, Value::Label(body_label.clone()), Value::Label(next_target)], loc.clone())?;

            let body_idx = b.new_block(body_label);
            b.switch_to(body_idx);
            self.stmt(b, &case.body)?;
            if !b.is_current_terminated() {
                b.terminate(Opcode::Jump, vec![Value::Label(exit_label.clone())], loc.clone())?;
            }
        }

        if let Some(default) = default {
            let default_idx = b.new_block(default_label);
            b.switch_to(default_idx);
            self.stmt(b, default)?;
            if !b.is_current_terminated() {
                b.terminate(Opcode::Jump, vec![Value::Label(exit_label.clone())], loc.clone())?;
            }
        }

        self.loop_stack.pop();

        let exit_idx = b.new_block(exit_label);
        b.switch_to(exit_idx);
        Ok(())
    }

    fn lower_logical(&mut self, b: &mut FunctionBuilder, is_and: bool, l: &Expr, r: &Expr, loc: &Range) -> Result<Value, IlError> {
        let lv = self.expr(b, l)?;
        let suffix = self.next_suffix();
        let rhs_label = format!("logical_rhs_{suffix}");
        let merge_label = format!("logical_merge_{suffix}");

        if is_and {
            b.terminate(Opcode::Branch, vec![lv.clone(), Value::Label(rhs_label.clone()), Value::Label(merge_label.clone())], loc.clone())?;
        } else {
            b.terminate(Opcode::Branch, vec![lv.clone(), Value::Label(merge_label.clone()), Value::Label(rhs_label.clone())], loc.clone())?;
        }

        let rhs_idx = b.new_block(rhs_label);
        b.switch_to(rhs_idx);
        let rv = self.expr(b, r)?;
        b.terminate(Opcode::Jump, vec![Value::Label(merge_label.clone())], loc.clone())?;

        let merge_idx = b.new_block(merge_label);
        b.switch_to(merge_idx);
        let dest = b.emit(Opcode::Phi, Some(Type::Bool), vec![lv, rv], loc.clone())?;
        Ok(dest.map(Value::Reg).unwrap_or(Value::Undef))
    }

    fn lower_ternary(&mut self, b: &mut FunctionBuilder, cond: &Expr, t: &Expr, e: &Expr, loc: &Range, ty: Type) -> Result<Value, IlError> {
        let cond_value = self.expr(b, cond)?;
        let suffix = self.next_suffix();
        let then_label = format!("ternary_then_{suffix}");
        let else_label = format!("ternary_else_{suffix}");
        let merge_label = format!("ternary_merge_{suffix}");

        b.terminate(Opcode::Branch, vec![cond_value, Value::Label(then_label.clone()), Value::Label(else_label.clone())], loc.clone())?;

        let then_idx = b.new_block(then_label);
        b.switch_to(then_idx);
        let tv = self.expr(b, t)?;
        b.terminate(Opcode::Jump, vec![Value::Label(merge_label.clone())], loc.clone())?;

        let else_idx = b.new_block(else_label);
        b.switch_to(else_idx);
        let ev = self.expr(b, e)?;
        b.terminate(Opcode::Jump, vec![Value::Label(merge_label.clone())], loc.clone())?;

        let merge_idx = b.new_block(merge_label);
        b.switch_to(merge_idx);
        let dest = b.emit(Opcode::Phi, Some(ty), vec![tv, ev], loc.clone())?;
        Ok(dest.map(Value::Reg).unwrap_or(Value::Undef))
    }

    fn lower_call(&mut self, b: &mut FunctionBuilder, name: &str, args: &[Expr], loc: &Range, id: NodeId) -> Result<Value, IlError> {
        let mut arg_values = Vec::with_capacity(args.len());
        for a in args {
            arg_values.push(self.expr(b, a)?);
        }
        if let Some(opcode) = il::intrinsic_opcode(name) {
            let dest_ty = match opcode {
                Opcode::IntrinsicPoke | Opcode::IntrinsicPokew => None,
                _ => self.analysis.expr_types.get(id).cloned(),
            };
            let dest = b.emit(opcode, dest_ty, arg_values, loc.clone())?;
            Ok(dest.map(Value::Reg).unwrap_or(Value::Undef))
        } else {
            let ret_ty = self.analysis.fn_return_types.get(name).cloned().unwrap_or(Type::Void);
            let mut operands = vec![Value::Name(name.to_string())];
            operands.extend(arg_values);
            if matches!(ret_ty, Type::Void) {
                b.emit(Opcode::CallVoid, None, operands, loc.clone())?;
                Ok(Value::Undef)
            } else {
                let dest = b.emit(Opcode::Call, Some(ret_ty), operands, loc.clone())?;
                Ok(dest.map(Value::Reg).unwrap_or(Value::Undef))
            }
        }
    }

    fn store(&mut self, b: &mut FunctionBuilder, target: &Expr, value: Value, loc: &Range) -> Result<(), IlError> {
        match target {
            Expr::Ident(_, _, name) => {
                b.emit(Opcode::StoreVar, None, vec![Value::Name(name.clone()), value], loc.clone())?;
            }
            Expr::Index(_, _, base, index) => {
                let base_v = self.expr(b, base)?;
                let idx_v = self.expr(b, index)?;
                b.emit(Opcode::StoreArray, None, vec![base_v, idx_v, value], loc.clone())?;
            }
            Expr::Member(_, _, base, field) => {
                let base_v = self.expr(b, base)?;
                b.emit(Opcode::StoreField, None, vec![base_v, Value::Name(field.clone()), value], loc.clone())?;
            }
            Expr::Unary(_, _, UnOp::Deref, inner) => {
                let ptr_v = self.expr(b, inner)?;
                b.emit(Opcode::StoreArray, None, vec![ptr_v, Value::Const(Type::Word, 0), value], loc.clone())?;
            }
            _ => unreachable!("the parser only accepts lvalue expressions as assignment targets"),
        }
        Ok(())
    }

    fn expr(&mut self, b: &mut FunctionBuilder, expr: &Expr) -> Result<Value, IlError> {
        let value = match expr {
            Expr::Literal(_, _, Literal::Number(n)) => {
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or(if *n <= 255 { Type::Byte } else { Type::Word });
                Value::Const(ty, *n)
            }
            Expr::Literal(_, _, Literal::Bool(v)) => Value::Const(Type::Bool, if *v { 1 } else { 0 }),
            // String/array literals are not yet materialized as a single IL
            // value; their data-segment layout belongs to the backend.
            Expr::Literal(_, _, Literal::Str(_)) => Value::Undef,
            Expr::Literal(_, _, Literal::Array(items)) => {
                for it in items {
                    self.expr(b, it)?;
                }
                Value::Undef
            }
            Expr::Ident(_, loc, name) => {
                let ty = self.analysis.symbols.lookup_from(self.scope, name).map(|s| s.ty.clone()).unwrap_or(Type::Byte);
                let dest = b.emit(Opcode::LoadVar, Some(ty), vec![Value::Name(name.clone())], loc.clone())?;
                dest.map(Value::Reg).unwrap_or(Value::Undef)
            }
            Expr::Binary(_, loc, BinOp::LogicalAnd, l, r) => self.lower_logical(b, true, l, r, loc)?,
            Expr::Binary(_, loc, BinOp::LogicalOr, l, r) => self.lower_logical(b, false, l, r, loc)?,
            Expr::Binary(_, loc, op, l, r) => {
                let lv = self.expr(b, l)?;
                let rv = self.expr(b, r)?;
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or(Type::Byte);
                let dest = b.emit(bin_opcode(*op), Some(ty), vec![lv, rv], loc.clone())?;
                dest.map(Value::Reg).unwrap_or(Value::Undef)
            }
            Expr::Unary(_, _, UnOp::AddressOf, inner) => {
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or_else(|| Type::pointer(Type::Byte));
                // No dedicated "address of" opcode exists; real address
                // materialization happens once the backend assigns `inner` a
                // memory location.
                let _ = self.expr(b, inner)?;
                Value::Const(ty, 0)
            }
            Expr::Unary(_, loc, UnOp::Deref, inner) => {
                let ptr = self.expr(b, inner)?;
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or(Type::Byte);
                let dest = b.emit(Opcode::LoadArray, Some(ty), vec![ptr, Value::Const(Type::Word, 0)], loc.clone())?;
                dest.map(Value::Reg).unwrap_or(Value::Undef)
            }
            Expr::Unary(_, loc, UnOp::LogicalNot, inner) => {
                let iv = self.expr(b, inner)?;
                let dest = b.emit(Opcode::LogicalNot, Some(Type::Bool), vec![iv], loc.clone())?;
                dest.map(Value::Reg).unwrap_or(Value::Undef)
            }
            Expr::Unary(_, loc, op, inner) => {
                let iv = self.expr(b, inner)?;
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or(Type::Byte);
                let opcode = match op {
                    UnOp::Neg => Opcode::Neg,
                    UnOp::Not => Opcode::Not,
                    UnOp::AddressOf | UnOp::Deref | UnOp::LogicalNot => unreachable!("handled above"),
                };
                let dest = b.emit(opcode, Some(ty), vec![iv], loc.clone())?;
                dest.map(Value::Reg).unwrap_or(Value::Undef)
            }
            Expr::Ternary(_, loc, cond, t, e) => {
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or(Type::Byte);
                self.lower_ternary(b, cond, t, e, loc, ty)?
            }
            Expr::Call(_, loc, name, args) => self.lower_call(b, name, args, loc, expr.id())?,
            Expr::Index(_, loc, base, index) => {
                let bv = self.expr(b, base)?;
                let iv = self.expr(b, index)?;
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or(Type::Byte);
                let dest = b.emit(Opcode::LoadArray, Some(ty), vec![bv, iv], loc.clone())?;
                dest.map(Value::Reg).unwrap_or(Value::Undef)
            }
            Expr::Member(_, loc, base, field) => {
                let bv = self.expr(b, base)?;
                let ty = self.analysis.expr_types.get(expr.id()).cloned().unwrap_or(Type::Byte);
                let dest = b.emit(Opcode::LoadField, Some(ty), vec![bv, Value::Name(field.clone())], loc.clone())?;
                dest.map(Value::Reg).unwrap_or(Value::Undef)
            }
            Expr::Assignment(_, loc, target, value) => {
                let v = self.expr(b, value)?;
                self.store(b, target, v.clone(), loc)?;
                v
            }
        };
        Ok(value)
    }
}

fn bin_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Or,
        BinOp::Xor => Opcode::Xor,
        BinOp::Shl => Opcode::Shl,
        BinOp::Shr => Opcode::Shr,
        BinOp::Eq => Opcode::CmpEq,
        BinOp::Ne => Opcode::CmpNe,
        BinOp::Lt => Opcode::CmpLt,
        BinOp::Le => Opcode::CmpLe,
        BinOp::Gt => Opcode::CmpGt,
        BinOp::Ge => Opcode::CmpGe,
        BinOp::LogicalAnd | BinOp::LogicalOr => unreachable!("short-circuit operators lower through lower_logical"),
    }
}
