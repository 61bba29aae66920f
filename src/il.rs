// IL data model
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
// A three-address, virtual-register IL. Blocks
// own their instructions and a single optional terminator; a function's
// predecessor/successor lists are derived from terminator jump targets by
// `Function::link_edges` rather than maintained incrementally, so the
// builder never has to know a forward label before the block that defines
// it exists.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::source::Range;
use crate::types::Type;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegId(u32);

impl RegId {
    pub(crate) fn from_raw(n: u32) -> RegId {
        RegId(n)
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Default)]
pub struct RegIdSource(u32);

impl RegIdSource {
    pub fn new() -> Self {
        RegIdSource(0)
    }

    pub fn next(&mut self) -> RegId {
        let id = RegId(self.0);
        self.0 += 1;
        id
    }
}

/// An IL operand: a virtual register, a typed constant, a source-level
/// name (used by the `*_VAR`/hardware opcodes before SSA promotion erases
/// the name), or a block label (jump/branch targets).
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Reg(RegId),
    Const(Type, u64),
    Name(String),
    Label(String),
    /// An intentionally unknown value on a control-flow path with no
    /// reaching definition (an explicit `Undef` operand is allowed).
    Undef,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Reg(r) => write!(f, "{r}"),
            Value::Const(ty, bits) => write!(f, "{ty}({bits})"),
            Value::Name(n) => f.write_str(n),
            Value::Label(l) => f.write_str(l),
            Value::Undef => f.write_str("undef"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Add, Sub, Mul, Div, Mod, Neg,
    And, Or, Xor, Not, Shl, Shr,
    CmpEq, CmpNe, CmpLt, CmpLe, CmpGt, CmpGe,
    LogicalAnd, LogicalOr, LogicalNot,
    LoadVar, StoreVar, LoadArray, StoreArray, LoadField, StoreField,
    Jump, Branch, Return, ReturnVoid,
    Call, CallVoid, CallIndirect,
    ZeroExtend, Truncate, BoolToByte, ByteToBool,
    Const, Undef,
    Phi,
    IntrinsicPeek, IntrinsicPoke, IntrinsicPeekw, IntrinsicPokew,
    IntrinsicLength, IntrinsicLo, IntrinsicHi,
    HardwareRead, HardwareWrite,
    OptBarrier, VolatileRead, VolatileWrite,
    Sei, Cli, Nop, Brk, Pha, Pla, Php, Plp,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Branch | Opcode::Return | Opcode::ReturnVoid)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Opcode::Add => "ADD", Opcode::Sub => "SUB", Opcode::Mul => "MUL",
            Opcode::Div => "DIV", Opcode::Mod => "MOD", Opcode::Neg => "NEG",
            Opcode::And => "AND", Opcode::Or => "OR", Opcode::Xor => "XOR",
            Opcode::Not => "NOT", Opcode::Shl => "SHL", Opcode::Shr => "SHR",
            Opcode::CmpEq => "CMP_EQ", Opcode::CmpNe => "CMP_NE",
            Opcode::CmpLt => "CMP_LT", Opcode::CmpLe => "CMP_LE",
            Opcode::CmpGt => "CMP_GT", Opcode::CmpGe => "CMP_GE",
            Opcode::LogicalAnd => "LOGICAL_AND", Opcode::LogicalOr => "LOGICAL_OR",
            Opcode::LogicalNot => "LOGICAL_NOT",
            Opcode::LoadVar => "LOAD_VAR", Opcode::StoreVar => "STORE_VAR",
            Opcode::LoadArray => "LOAD_ARRAY", Opcode::StoreArray => "STORE_ARRAY",
            Opcode::LoadField => "LOAD_FIELD", Opcode::StoreField => "STORE_FIELD",
            Opcode::Jump => "JUMP", Opcode::Branch => "BRANCH",
            Opcode::Return => "RETURN", Opcode::ReturnVoid => "RETURN_VOID",
            Opcode::Call => "CALL", Opcode::CallVoid => "CALL_VOID",
            Opcode::CallIndirect => "CALL_INDIRECT",
            Opcode::ZeroExtend => "ZERO_EXTEND", Opcode::Truncate => "TRUNCATE",
            Opcode::BoolToByte => "BOOL_TO_BYTE", Opcode::ByteToBool => "BYTE_TO_BOOL",
            Opcode::Const => "CONST", Opcode::Undef => "UNDEF",
            Opcode::Phi => "PHI",
            Opcode::IntrinsicPeek => "INTRINSIC_PEEK", Opcode::IntrinsicPoke => "INTRINSIC_POKE",
            Opcode::IntrinsicPeekw => "INTRINSIC_PEEKW", Opcode::IntrinsicPokew => "INTRINSIC_POKEW",
            Opcode::IntrinsicLength => "INTRINSIC_LENGTH", Opcode::IntrinsicLo => "INTRINSIC_LO",
            Opcode::IntrinsicHi => "INTRINSIC_HI",
            Opcode::HardwareRead => "HARDWARE_READ", Opcode::HardwareWrite => "HARDWARE_WRITE",
            Opcode::OptBarrier => "OPT_BARRIER", Opcode::VolatileRead => "VOLATILE_READ",
            Opcode::VolatileWrite => "VOLATILE_WRITE",
            Opcode::Sei => "SEI", Opcode::Cli => "CLI", Opcode::Nop => "NOP",
            Opcode::Brk => "BRK", Opcode::Pha => "PHA", Opcode::Pla => "PLA",
            Opcode::Php => "PHP", Opcode::Plp => "PLP",
        };
        f.write_str(s)
    }
}

/// Maps an intrinsic call's source name onto its dedicated `INTRINSIC_*`
/// opcode.
pub fn intrinsic_opcode(name: &str) -> Option<Opcode> {
    match name {
        "peek" => Some(Opcode::IntrinsicPeek),
        "poke" => Some(Opcode::IntrinsicPoke),
        "peekw" => Some(Opcode::IntrinsicPeekw),
        "pokew" => Some(Opcode::IntrinsicPokew),
        "length" => Some(Opcode::IntrinsicLength),
        "lo" => Some(Opcode::IntrinsicLo),
        "hi" => Some(Opcode::IntrinsicHi),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct Instr {
    pub dest: Option<RegId>,
    pub ty: Option<Type>,
    pub opcode: Opcode,
    pub operands: Vec<Value>,
    pub location: Range,
}

pub struct Block {
    pub label: String,
    pub instrs: Vec<Instr>,
    pub terminator: Option<Instr>,
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,
}

impl Block {
    fn new(label: impl Into<String>) -> Self {
        Block { label: label.into(), instrs: Vec::new(), terminator: None, preds: Vec::new(), succs: Vec::new() }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

pub struct Function {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub return_type: Type,
    pub blocks: Vec<Block>,
    pub entry: usize,
    pub is_ssa: bool,
    pub location: Range,
}

impl Function {
    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Resolves `JUMP`/`BRANCH` label operands into predecessor/successor
    /// adjacency lists. Idempotent; safe to call again after edits.
    pub fn link_edges(&mut self) {
        for b in &mut self.blocks {
            b.succs.clear();
        }
        let targets: Vec<(usize, Vec<String>)> = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let labels = match &b.terminator {
                    Some(t) => t.operands.iter().filter_map(|v| match v {
                        Value::Label(l) => Some(l.clone()),
                        _ => None,
                    }).collect(),
                    None => Vec::new(),
                };
                (i, labels)
            })
            .collect();

        for (from, labels) in targets {
            for label in labels {
                if let Some(to) = self.block_index(&label) {
                    if !self.blocks[from].succs.contains(&to) {
                        self.blocks[from].succs.push(to);
                    }
                }
            }
        }

        for b in &mut self.blocks {
            b.preds.clear();
        }
        let edges: Vec<(usize, usize)> = self
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(i, b)| b.succs.iter().map(move |&s| (i, s)))
            .collect();
        for (from, to) in edges {
            if !self.blocks[to].preds.contains(&from) {
                self.blocks[to].preds.push(from);
            }
        }
    }
}

pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Option<Value>,
    pub exported: bool,
}

pub struct Module {
    pub name: String,
    pub globals: Vec<Global>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module { name: name.into(), globals: Vec::new(), imports: Vec::new(), exports: Vec::new(), functions: Vec::new() }
    }
}

#[derive(Error, Debug)]
pub enum IlError {
    #[error("block `{0}` already has a terminator")]
    BlockAlreadyTerminated(String),
    #[error("no current block selected in this function builder")]
    NoCurrentBlock,
}

/// Builds one function's blocks. Enforces the one-terminator-per-block
/// invariant and refuses to append past it.
pub struct FunctionBuilder {
    function: Function,
    current: Option<usize>,
    regs: RegIdSource,
}

impl FunctionBuilder {
    /// Reserves register ids `0..params.len()` for the function's
    /// parameters, in declaration order, before any other register is
    /// allocated. SSA construction (`ssa.rs`) relies on this convention to
    /// seed each parameter's initial definition without needing a dedicated
    /// "parameter value" opcode.
    pub fn new(name: impl Into<String>, params: Vec<(String, Type)>, return_type: Type, location: Range) -> Self {
        let mut regs = RegIdSource::new();
        for _ in 0..params.len() {
            regs.next();
        }
        FunctionBuilder {
            function: Function {
                name: name.into(),
                params,
                return_type,
                blocks: Vec::new(),
                entry: 0,
                is_ssa: false,
                location,
            },
            current: None,
            regs,
        }
    }

    pub fn new_block(&mut self, label: impl Into<String>) -> usize {
        let idx = self.function.blocks.len();
        self.function.blocks.push(Block::new(label));
        idx
    }

    pub fn switch_to(&mut self, block: usize) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<usize> {
        self.current
    }

    pub fn is_current_terminated(&self) -> bool {
        self.current.map(|i| self.function.blocks[i].is_terminated()).unwrap_or(true)
    }

    pub fn emit(&mut self, opcode: Opcode, dest_ty: Option<Type>, operands: Vec<Value>, location: Range) -> Result<Option<RegId>, IlError> {
        let idx = self.current.ok_or(IlError::NoCurrentBlock)?;
        if self.function.blocks[idx].is_terminated() {
            return Err(IlError::BlockAlreadyTerminated(self.function.blocks[idx].label.clone()));
        }
        let dest = dest_ty.as_ref().map(|_| self.regs.next());
        self.function.blocks[idx].instrs.push(Instr { dest, ty: dest_ty, opcode, operands, location });
        Ok(dest)
    }

    pub fn terminate(&mut self, opcode: Opcode, operands: Vec<Value>, location: Range) -> Result<(), IlError> {
        let idx = self.current.ok_or(IlError::NoCurrentBlock)?;
        if self.function.blocks[idx].is_terminated() {
            return Err(IlError::BlockAlreadyTerminated(self.function.blocks[idx].label.clone()));
        }
        self.function.blocks[idx].terminator = Some(Instr { dest: None, ty: None, opcode, operands, location });
        Ok(())
    }

    pub fn finish(mut self) -> Function {
        self.function.link_edges();
        self.function
    }
}

pub(crate) fn block_location(b: &Block, fallback: &Range) -> Range {
    b.terminator.as_ref().map(|t| t.location.clone())
        .or_else(|| b.instrs.first().map(|i| i.location.clone()))
        .unwrap_or_else(|| fallback.clone())
}

/// Dominator tree/frontier over an IL function's blocks. Kept separate
/// from `dominance::Dominance` (computed over `cfg::Cfg`, built from the
/// AST) since component H (SSA construction) runs its own dominance pass
/// directly on IL blocks, after the IL generator has already replaced the
/// AST-shaped CFG with a possibly different block layout (e.g. short-circuit
/// `&&`/`||` lowering introduces blocks the AST-level CFG never had).
pub struct BlockDominance {
    pub dom: Vec<HashSet<usize>>,
    pub idom: Vec<Option<usize>>,
    pub frontier: Vec<Vec<usize>>,
}

impl BlockDominance {
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        self.dom[b].contains(&a)
    }
}

pub fn dominance(f: &Function) -> BlockDominance {
    let n = f.blocks.len();
    let all: HashSet<usize> = (0..n).collect();
    let mut dom = vec![all.clone(); n];
    dom[f.entry] = [f.entry].into_iter().collect();

    let mut changed = true;
    while changed {
        changed = false;
        for node in 0..n {
            if node == f.entry {
                continue;
            }
            let preds = &f.blocks[node].preds;
            if preds.is_empty() {
                continue;
            }
            let mut new_dom = dom[preds[0]].clone();
            for &p in &preds[1..] {
                new_dom = new_dom.intersection(&dom[p]).copied().collect();
            }
            new_dom.insert(node);
            if new_dom != dom[node] {
                dom[node] = new_dom;
                changed = true;
            }
        }
    }

    let idom: Vec<Option<usize>> = (0..n)
        .map(|node| {
            if node == f.entry {
                return None;
            }
            let strict: Vec<usize> = dom[node].iter().copied().filter(|&d| d != node).collect();
            strict.iter().copied().find(|&cand| strict.iter().all(|&o| o == cand || dom[o].contains(&cand)))
        })
        .collect();

    let mut frontier: Vec<Vec<usize>> = vec![Vec::new(); n];
    for b in 0..n {
        let preds = &f.blocks[b].preds;
        if preds.len() < 2 {
            continue;
        }
        for &p in preds {
            let mut runner = p;
            while Some(runner) != idom[b] {
                if !frontier[runner].contains(&b) {
                    frontier[runner].push(b);
                }
                match idom[runner] {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }

    BlockDominance { dom, idom, frontier }
}

pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    for g in &module.globals {
        out.push_str(&format!("global {}: {}", g.name, g.ty));
        if let Some(init) = &g.init {
            out.push_str(&format!(" = {init}"));
        }
        out.push('\n');
    }
    for f in &module.functions {
        out.push_str(&print_function(f));
    }
    out
}

fn print_function(f: &Function) -> String {
    let params = f.params.iter().map(|(n, t)| format!("{n}:{t}")).collect::<Vec<_>>().join(", ");
    let mut out = format!("function {}({}) -> {} {{\n", f.name, params, f.return_type);
    for b in &f.blocks {
        out.push_str(&format!("{}:\n", b.label));
        for i in &b.instrs {
            out.push_str(&format!("  {}\n", print_instr(i)));
        }
        if let Some(t) = &b.terminator {
            out.push_str(&format!("  {}\n", print_instr(t)));
        }
    }
    out.push_str("}\n");
    out
}

fn print_instr(i: &Instr) -> String {
    let operands = i.operands.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
    match i.dest {
        Some(d) if operands.is_empty() => format!("{d} = {}", i.opcode),
        Some(d) => format!("{d} = {} {operands}", i.opcode),
        None if operands.is_empty() => i.opcode.to_string(),
        None => format!("{} {operands}", i.opcode),
    }
}

/// Reports violations of the IL's structural invariants: malformed
/// terminators, predecessor/successor mismatches and, for SSA-form
/// functions, multiple-definition, dominance and phi-arity violations.
pub fn validate(module: &Module, bus: &mut crate::diagnostics::DiagnosticBus) {
    for f in &module.functions {
        validate_function(f, bus);
    }
}

fn validate_function(f: &Function, bus: &mut crate::diagnostics::DiagnosticBus) {
    use crate::diagnostics::code;

    for b in &f.blocks {
        if b.terminator.is_none() {
            bus.error(
                code::I_MALFORMED_TERMINATOR,
                format!("block `{}` in function `{}` has no terminator", b.label, f.name),
                block_location(b, &f.location),
            );
        }
    }

    for (i, b) in f.blocks.iter().enumerate() {
        for &s in &b.succs {
            if !f.blocks[s].preds.contains(&i) {
                bus.error(
                    code::I_EDGE_MISMATCH,
                    format!("`{}` lists `{}` as a successor, but `{}` does not list it as a predecessor", b.label, f.blocks[s].label, f.blocks[s].label),
                    block_location(b, &f.location),
                );
            }
        }
        for &p in &b.preds {
            if !f.blocks[p].succs.contains(&i) {
                bus.error(
                    code::I_EDGE_MISMATCH,
                    format!("`{}` lists `{}` as a predecessor, but `{}` does not list it as a successor", b.label, f.blocks[p].label, f.blocks[p].label),
                    block_location(b, &f.location),
                );
            }
        }
    }

    if f.is_ssa {
        validate_ssa(f, bus);
    }
}

fn validate_ssa(f: &Function, bus: &mut crate::diagnostics::DiagnosticBus) {
    use crate::diagnostics::code;
    use std::collections::HashMap;

    let mut defs: HashMap<RegId, usize> = HashMap::new();
    for (bi, b) in f.blocks.iter().enumerate() {
        for instr in b.instrs.iter().chain(b.terminator.iter()) {
            if let Some(d) = instr.dest {
                if defs.insert(d, bi).is_some() {
                    bus.error(code::I_SSA_MULTI_DEF, format!("{d} is defined more than once"), instr.location.clone());
                }
            }
        }
    }

    for b in &f.blocks {
        for instr in &b.instrs {
            if instr.opcode == Opcode::Phi && instr.operands.len() != b.preds.len() {
                bus.error(
                    code::I_SSA_PHI_ARITY,
                    format!("phi in `{}` has {} operands but block has {} predecessors", b.label, instr.operands.len(), b.preds.len()),
                    instr.location.clone(),
                );
            }
        }
    }

    let dom = dominance(f);
    for (bi, b) in f.blocks.iter().enumerate() {
        for instr in b.instrs.iter().chain(b.terminator.iter()) {
            if instr.opcode == Opcode::Phi {
                continue;
            }
            for operand in &instr.operands {
                if let Value::Reg(r) = operand {
                    if let Some(&def_block) = defs.get(r) {
                        if def_block != bi && !dom.dominates(def_block, bi) {
                            bus.error(
                                code::I_SSA_USE_NOT_DOMINATED,
                                format!("use of {r} in `{}` is not dominated by its definition", b.label),
                                instr.location.clone(),
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("t.b65"))
    }

    fn simple_function() -> Function {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void, range());
        let entry = b.new_block("entry");
        b.switch_to(entry);
        b.terminate(Opcode::ReturnVoid, vec![], range()).unwrap();
        b.finish()
    }

    #[test]
    fn builder_refuses_to_append_past_a_terminator() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void, range());
        let entry = b.new_block("entry");
        b.switch_to(entry);
        b.terminate(Opcode::ReturnVoid, vec![], range()).unwrap();
        let err = b.emit(Opcode::Nop, None, vec![], range());
        assert!(err.is_err());
    }

    #[test]
    fn link_edges_resolves_jump_labels_to_indices() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void, range());
        let entry = b.new_block("entry");
        let exit = b.new_block("exit");
        b.switch_to(entry);
        b.terminate(Opcode::Jump, vec![Value::Label("exit".into())], range()).unwrap();
        b.switch_to(exit);
        b.terminate(Opcode::ReturnVoid, vec![], range()).unwrap();
        let f = b.finish();
        assert_eq!(f.blocks[entry].succs, vec![exit]);
        assert_eq!(f.blocks[exit].preds, vec![entry]);
    }

    #[test]
    fn validator_flags_a_missing_terminator() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void, range());
        let entry = b.new_block("entry");
        b.switch_to(entry);
        let f = b.finish();
        let module = Module { name: "M".into(), globals: vec![], imports: vec![], exports: vec![], functions: vec![f] };
        let mut bus = crate::diagnostics::DiagnosticBus::new();
        validate(&module, &mut bus);
        assert!(bus.all().iter().any(|d| d.code == crate::diagnostics::code::I_MALFORMED_TERMINATOR));
    }

    #[test]
    fn validator_accepts_a_well_formed_function() {
        let f = simple_function();
        let module = Module { name: "M".into(), globals: vec![], imports: vec![], exports: vec![], functions: vec![f] };
        let mut bus = crate::diagnostics::DiagnosticBus::new();
        validate(&module, &mut bus);
        assert!(!bus.has_errors());
    }

    #[test]
    fn printer_is_deterministic_for_equal_modules() {
        let m1 = Module { name: "M".into(), globals: vec![], imports: vec![], exports: vec![], functions: vec![simple_function()] };
        let m2 = Module { name: "M".into(), globals: vec![], imports: vec![], exports: vec![], functions: vec![simple_function()] };
        assert_eq!(print_module(&m1), print_module(&m2));
    }

    #[test]
    fn intrinsic_name_maps_to_dedicated_opcode() {
        assert_eq!(intrinsic_opcode("poke"), Some(Opcode::IntrinsicPoke));
        assert_eq!(intrinsic_opcode("nonsense"), None);
    }
}
