// SSA construction
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
// Classic Cytron-et-al mem2reg: place `PHI`s at iterated dominance
// frontiers, then rename in a single dominator-tree preorder walk
// The IL generator lowers reads/writes of source-level
// variables through `LOAD_VAR`/`STORE_VAR`; this pass eliminates both,
// replacing each `LOAD_VAR`'s uses with whatever value currently reaches
// it (a register, a constant, or `undef` on a path with no definition).

use std::collections::{HashMap, HashSet};

use crate::il::{self, Function, Instr, Module, Opcode, RegId, Value};

/// Promotes every function in `module` to SSA form in place.
pub fn construct_module(module: &mut Module) {
    for f in &mut module.functions {
        construct(f);
    }
}

/// Promotes one function to SSA form in place. A no-op if `f.is_ssa` is
/// already set.
pub fn construct(f: &mut Function) {
    if f.is_ssa {
        return;
    }

    let dom = il::dominance(f);
    let defs = collect_defs(f);
    let vars: Vec<String> = defs.keys().cloned().collect();
    let phi_blocks = place_phis(&dom, &defs, &vars);
    let block_phi_vars = insert_phis(f, &phi_blocks);

    let children = dominator_children(&dom);
    let mut stacks: HashMap<String, Vec<Value>> = HashMap::new();
    for (i, (name, _ty)) in f.params.iter().enumerate() {
        stacks.entry(name.clone()).or_default().push(Value::Reg(RegId::from_raw(i as u32)));
    }

    rename_block(f.entry, f, &children, &block_phi_vars, &mut stacks);
    f.is_ssa = true;
}

fn collect_defs(f: &Function) -> HashMap<String, HashSet<usize>> {
    let mut defs: HashMap<String, HashSet<usize>> = HashMap::new();
    for (bi, b) in f.blocks.iter().enumerate() {
        for instr in &b.instrs {
            if instr.opcode == Opcode::StoreVar {
                if let Some(Value::Name(name)) = instr.operands.first() {
                    defs.entry(name.clone()).or_default().insert(bi);
                }
            }
        }
    }
    defs
}

fn place_phis(
    dom: &il::BlockDominance,
    defs: &HashMap<String, HashSet<usize>>,
    vars: &[String],
) -> HashMap<String, HashSet<usize>> {
    let mut phi_blocks: HashMap<String, HashSet<usize>> = HashMap::new();
    for var in vars {
        let def_blocks = &defs[var];
        let mut worklist: Vec<usize> = def_blocks.iter().copied().collect();
        let mut on_worklist: HashSet<usize> = worklist.iter().copied().collect();
        let mut has_phi: HashSet<usize> = HashSet::new();

        while let Some(n) = worklist.pop() {
            if n >= dom.frontier.len() {
                continue;
            }
            for &d in &dom.frontier[n] {
                if has_phi.insert(d) {
                    phi_blocks.entry(var.clone()).or_default().insert(d);
                    if on_worklist.insert(d) {
                        worklist.push(d);
                    }
                }
            }
        }
    }
    phi_blocks
}

/// Splices `PHI` instructions onto the front of each block that needs one,
/// returning the (deterministic, name-sorted) variable order per block so
/// renaming can find each phi's variable by its position in `instrs`.
fn insert_phis(f: &mut Function, phi_blocks: &HashMap<String, HashSet<usize>>) -> HashMap<usize, Vec<String>> {
    let mut block_vars: HashMap<usize, Vec<String>> = HashMap::new();
    for (var, blocks) in phi_blocks {
        for &b in blocks {
            block_vars.entry(b).or_default().push(var.clone());
        }
    }
    for vars in block_vars.values_mut() {
        vars.sort();
    }

    let mut next_reg = max_reg(f);
    for (&b, vars) in &block_vars {
        let preds_len = f.blocks[b].preds.len();
        let loc = il::block_location(&f.blocks[b], &f.location);
        let phis: Vec<Instr> = vars
            .iter()
            .map(|_| {
                let dest = RegId::from_raw(next_reg);
                next_reg += 1;
                Instr {
                    dest: Some(dest),
                    ty: None,
                    opcode: Opcode::Phi,
                    operands: vec![Value::Undef; preds_len],
                    location: loc.clone(),
                }
            })
            .collect();
        f.blocks[b].instrs.splice(0..0, phis);
    }
    block_vars
}

fn max_reg(f: &Function) -> u32 {
    let mut max: Option<u32> = None;
    for b in &f.blocks {
        for instr in b.instrs.iter().chain(b.terminator.iter()) {
            if let Some(d) = instr.dest {
                max = Some(max.map_or(d.raw(), |m| m.max(d.raw())));
            }
        }
    }
    max.map(|m| m + 1).unwrap_or(0)
}

fn dominator_children(dom: &il::BlockDominance) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); dom.idom.len()];
    for (node, parent) in dom.idom.iter().enumerate() {
        if let Some(p) = parent {
            children[*p].push(node);
        }
    }
    children
}

fn rewrite(value: &Value, subst: &HashMap<RegId, Value>) -> Value {
    match value {
        Value::Reg(r) => subst.get(r).cloned().unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

fn rename_block(
    b: usize,
    f: &mut Function,
    children: &[Vec<usize>],
    block_phi_vars: &HashMap<usize, Vec<String>>,
    stacks: &mut HashMap<String, Vec<Value>>,
) {
    let mut pushed: Vec<String> = Vec::new();
    let mut subst: HashMap<RegId, Value> = HashMap::new();

    let phi_vars = block_phi_vars.get(&b).cloned().unwrap_or_default();
    for (i, var) in phi_vars.iter().enumerate() {
        let dest = f.blocks[b].instrs[i].dest.expect("phi always has a dest");
        stacks.entry(var.clone()).or_default().push(Value::Reg(dest));
        pushed.push(var.clone());
    }

    let rest: Vec<Instr> = f.blocks[b].instrs.split_off(phi_vars.len());
    let mut new_instrs: Vec<Instr> = Vec::with_capacity(rest.len());
    for instr in rest {
        match instr.opcode {
            Opcode::LoadVar => {
                let Some(Value::Name(name)) = instr.operands.first().cloned() else {
                    new_instrs.push(instr);
                    continue;
                };
                let dest = instr.dest.expect("LOAD_VAR always has a dest");
                match stacks.get(&name).and_then(|s| s.last()).cloned() {
                    Some(value) => {
                        subst.insert(dest, value);
                    }
                    None => {
                        new_instrs.push(Instr { opcode: Opcode::Undef, operands: vec![], ..instr });
                    }
                }
            }
            Opcode::StoreVar => {
                let Some(Value::Name(name)) = instr.operands.first().cloned() else {
                    new_instrs.push(instr);
                    continue;
                };
                let value = instr.operands.get(1).map(|v| rewrite(v, &subst)).unwrap_or(Value::Undef);
                stacks.entry(name.clone()).or_default().push(value);
                pushed.push(name);
            }
            _ => {
                let operands = instr.operands.iter().map(|v| rewrite(v, &subst)).collect();
                new_instrs.push(Instr { operands, ..instr });
            }
        }
    }
    f.blocks[b].instrs.extend(new_instrs);

    if let Some(terminator) = f.blocks[b].terminator.take() {
        let operands = terminator.operands.iter().map(|v| rewrite(v, &subst)).collect();
        f.blocks[b].terminator = Some(Instr { operands, ..terminator });
    }

    let succs = f.blocks[b].succs.clone();
    for s in succs {
        let pred_index = f.blocks[s].preds.iter().position(|&p| p == b).unwrap_or(0);
        if let Some(vars) = block_phi_vars.get(&s) {
            for (i, var) in vars.iter().enumerate() {
                let value = stacks.get(var).and_then(|st| st.last()).cloned().unwrap_or(Value::Undef);
                f.blocks[s].instrs[i].operands[pred_index] = value;
            }
        }
    }

    for &child in &children[b] {
        rename_block(child, f, children, block_phi_vars, stacks);
    }

    for var in pushed {
        if let Some(stack) = stacks.get_mut(&var) {
            stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::FunctionBuilder;
    use crate::source::Range;
    use crate::types::Type;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("t.b65"))
    }

    /// if (cond) { x = 1 } else { x = 2 }; return x
    /// The classic diamond: a single phi should join the two definitions.
    fn diamond() -> Function {
        let mut b = FunctionBuilder::new("f", vec![("cond".into(), Type::Bool)], Type::Byte, range());
        let entry = b.new_block("entry");
        let then_blk = b.new_block("if_then_0");
        let else_blk = b.new_block("if_else_0");
        let merge = b.new_block("if_merge_0");

        b.switch_to(entry);
        b.terminate(Opcode::Branch, vec![Value::Reg(RegId::from_raw(0)), Value::Label("if_then_0".into()), Value::Label("if_else_0".into())], range()).unwrap();

        b.switch_to(then_blk);
        b.emit(Opcode::StoreVar, None, vec![Value::Name("x".into()), Value::Const(Type::Byte, 1)], range()).unwrap();
        b.terminate(Opcode::Jump, vec![Value::Label("if_merge_0".into())], range()).unwrap();

        b.switch_to(else_blk);
        b.emit(Opcode::StoreVar, None, vec![Value::Name("x".into()), Value::Const(Type::Byte, 2)], range()).unwrap();
        b.terminate(Opcode::Jump, vec![Value::Label("if_merge_0".into())], range()).unwrap();

        b.switch_to(merge);
        let load = b.emit(Opcode::LoadVar, Some(Type::Byte), vec![Value::Name("x".into())], range()).unwrap().unwrap();
        b.terminate(Opcode::Return, vec![Value::Reg(load)], range()).unwrap();

        b.finish()
    }

    #[test]
    fn promotes_a_diamond_join_to_a_single_phi() {
        let mut f = diamond();
        construct(&mut f);
        assert!(f.is_ssa);

        let merge = f.block_index("if_merge_0").unwrap();
        let phi_count = f.blocks[merge].instrs.iter().filter(|i| i.opcode == Opcode::Phi).count();
        assert_eq!(phi_count, 1);

        // no LOAD_VAR/STORE_VAR should survive promotion
        for b in &f.blocks {
            for i in b.instrs.iter().chain(b.terminator.iter()) {
                assert_ne!(i.opcode, Opcode::LoadVar);
                assert_ne!(i.opcode, Opcode::StoreVar);
            }
        }
    }

    #[test]
    fn validator_accepts_the_promoted_function() {
        let mut f = diamond();
        construct(&mut f);
        let module = Module { name: "M".into(), globals: vec![], imports: vec![], exports: vec![], functions: vec![f] };
        let mut bus = crate::diagnostics::DiagnosticBus::new();
        il::validate(&module, &mut bus);
        assert!(!bus.has_errors());
    }

    #[test]
    fn reading_an_uninitialized_local_yields_undef() {
        let mut b = FunctionBuilder::new("g", vec![], Type::Byte, range());
        let entry = b.new_block("entry");
        b.switch_to(entry);
        let load = b.emit(Opcode::LoadVar, Some(Type::Byte), vec![Value::Name("y".into())], range()).unwrap().unwrap();
        b.terminate(Opcode::Return, vec![Value::Reg(load)], range()).unwrap();
        let mut f = b.finish();
        construct(&mut f);
        let entry_blk = f.entry;
        assert!(f.blocks[entry_blk].instrs.iter().any(|i| i.opcode == Opcode::Undef));
    }

    #[test]
    fn already_ssa_function_is_left_untouched() {
        let mut f = diamond();
        construct(&mut f);
        let wrap = |f: Function| Module { name: "M".into(), globals: vec![], imports: vec![], exports: vec![], functions: vec![f] };
        let before = il::print_module(&wrap(f));
        let mut f = diamond();
        construct(&mut f);
        construct(&mut f);
        let after = il::print_module(&wrap(f));
        assert_eq!(before, after);
    }
}
