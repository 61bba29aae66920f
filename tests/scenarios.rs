// End-to-end scenario tests driving the public compilation entry point and,
// where the surface grammar cannot express the fixture directly, the
// symbol-table/target APIs that back it.
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

use std::io::Write;

use blend65c::diagnostics::{code, DiagnosticBus};
use blend65c::il::{self, Block, Opcode, Value};
use blend65c::optimize::OptLevel;
use blend65c::scope::SymbolTable;
use blend65c::source::Range;
use blend65c::symbol::{StorageClass, Symbol, SymbolKind};
use blend65c::target::Target;
use blend65c::types::Type;
use blend65c::{compile, CompileOptions};

fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("blend65c_scenario_{name}.b65"));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

fn find_block(func: &il::Function, prefix: &str) -> usize {
    func.blocks
        .iter()
        .position(|b| b.label.starts_with(prefix))
        .unwrap_or_else(|| panic!("no block with prefix `{prefix}`, have {:?}", func.blocks.iter().map(|b| &b.label).collect::<Vec<_>>()))
}

fn jump_targets(block: &Block) -> Vec<&str> {
    block
        .terminator
        .iter()
        .flat_map(|t| t.operands.iter())
        .filter_map(|v| match v {
            Value::Label(l) => Some(l.as_str()),
            _ => None,
        })
        .collect()
}

/// A `const` declaration with a literal initializer produces no diagnostics
/// and an IL global carrying the folded constant value.
#[test]
fn valid_const_module_compiles_to_a_single_constant_global() {
    let path = write_temp("const_module", "module M; const C: word = $D020;\n");
    let result = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    assert!(result.succeeded(), "{:?}", result.bus.all());
    assert_eq!(result.modules.len(), 1);
    let global = result.modules[0].globals.iter().find(|g| g.name == "C").unwrap();
    assert_eq!(global.ty, Type::Word);
    assert_eq!(global.init, Some(Value::Const(Type::Word, 0xD020)));
    let _ = std::fs::remove_file(path);
}

/// Assigning an out-of-range literal to a `byte` reports `S002` and produces
/// no IL for the offending module.
#[test]
fn byte_initializer_out_of_range_is_a_type_mismatch() {
    let path = write_temp("type_mismatch", "module M; let x: byte = 1000;\n");
    let result = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    assert!(!result.succeeded());
    assert!(result.bus.all().iter().any(|d| d.code == code::S_NOT_ASSIGNABLE));
    assert!(result.modules.is_empty());
    let _ = std::fs::remove_file(path);
}

/// A `for` loop lowers to the same init/header/body/incr/exit block shape the
/// control-flow graph builder uses: entry jumps into init, the body's
/// successor is incr, incr's successor is header, and exit (nothing follows
/// the loop here) carries the function's synthetic return.
#[test]
fn for_loop_lowers_to_the_five_block_shape() {
    let source = "module T; function f(): void { for (i = 0 to 3) { let x: byte = 1; } }\n";
    let path = write_temp("for_lowering", source);
    let result = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    assert!(result.succeeded(), "{:?}", result.bus.all());
    let func = &result.modules[0].functions[0];

    let header = find_block(func, "for_header");
    let body = find_block(func, "for_body");
    let incr = find_block(func, "for_incr");
    let exit = find_block(func, "for_exit");

    for idx in [header, body, incr, exit] {
        assert!(func.blocks[idx].is_terminated(), "block {} not terminated", func.blocks[idx].label);
    }

    assert!(jump_targets(&func.blocks[func.entry]).iter().any(|l| l.starts_with("for_init")));
    assert!(jump_targets(&func.blocks[body]).contains(&func.blocks[incr].label.as_str()));
    assert!(jump_targets(&func.blocks[incr]).contains(&func.blocks[header].label.as_str()));
    assert_eq!(func.blocks[exit].terminator.as_ref().unwrap().opcode, Opcode::ReturnVoid);

    let _ = std::fs::remove_file(path);
}

/// `poke` always lowers to `HARDWARE_WRITE`, even at `-O0`, since the
/// intrinsic-lowering pass runs unconditionally.
#[test]
fn poke_intrinsic_lowers_to_hardware_write_at_every_level() {
    for level in [OptLevel::O0, OptLevel::O1, OptLevel::O2] {
        let source = "module T; function f(): void { poke($D020, 0); }\n";
        let path = write_temp(&format!("intrinsic_lowering_{level:?}"), source);
        let mut options = CompileOptions::default();
        options.optimize = level;
        let result = compile(path.to_str().unwrap(), &options).unwrap();
        assert!(result.succeeded(), "{:?}", result.bus.all());

        let func = &result.modules[0].functions[0];
        let pokes = func.blocks.iter().flat_map(|b| &b.instrs).filter(|i| i.opcode == Opcode::IntrinsicPoke).count();
        assert_eq!(pokes, 0, "no INTRINSIC_POKE should survive at {level:?}");

        let write = func.blocks.iter().flat_map(|b| &b.instrs).find(|i| i.opcode == Opcode::HardwareWrite);
        let write = write.unwrap_or_else(|| panic!("no HARDWARE_WRITE at {level:?}"));
        assert_eq!(write.operands[0], Value::Const(Type::Word, 0xD020));
        assert_eq!(write.operands[1], Value::Const(Type::Byte, 0));

        let _ = std::fs::remove_file(path);
    }
}

/// SSA construction on a diamond assigns a single phi to the merge block for
/// the variable set in both arms. Mem2reg then eliminates every
/// `LOAD_VAR`/`STORE_VAR`, so the later read of `y` (itself assigned from the
/// phi'd `x`) resolves straight through to the phi's register.
#[test]
fn ssa_construction_inserts_a_phi_at_the_if_merge_block() {
    let source = "module T; function f(flag: bool): byte { let x: byte = 0; if (flag) { x = 10; } else { x = 20; } let y: byte = x; return y; }\n";
    let path = write_temp("ssa_diamond", source);
    let result = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    assert!(result.succeeded(), "{:?}", result.bus.all());
    let func = &result.modules[0].functions[0];
    assert!(func.is_ssa);

    let merge = find_block(func, "if_merge");
    assert!(func.blocks.iter().all(|b| b.instrs.iter().all(|i| i.opcode != Opcode::LoadVar && i.opcode != Opcode::StoreVar)));

    let phis: Vec<_> = func.blocks[merge].instrs.iter().filter(|i| i.opcode == Opcode::Phi).collect();
    assert_eq!(phis.len(), 1, "expected exactly one phi at the merge block");
    let phi = phis[0];
    assert_eq!(phi.operands.len(), 2);

    let terminator = func.blocks[merge].terminator.as_ref().unwrap();
    assert_eq!(terminator.opcode, Opcode::Return);
    assert_eq!(terminator.operands.first(), phi.dest.map(Value::Reg).as_ref());

    let _ = std::fs::remove_file(path);
}

/// A `@zp` placement at `$00` overlaps the 6510 I/O port and is rejected with
/// `S103`. The surface grammar has no way to write an explicit fixed address
/// on a `@zp` declaration, so this is exercised directly against the
/// symbol-table and target-analysis APIs that the checked semantic layer
/// would otherwise drive.
#[test]
fn c64_zero_page_rejects_the_io_port_address() {
    let target = Target::from_name("c64").unwrap();
    let mut table = SymbolTable::new(Range::synthetic(std::rc::Rc::from("t.b65")));
    let root = table.root();
    let sym = Symbol::new(
        "CURSOR_COLUMN",
        SymbolKind::Variable,
        StorageClass::Zp,
        Type::Byte,
        root,
        Range::synthetic(std::rc::Rc::from("t.b65")),
    )
    .at_address(0x00);
    table.declare_in(root, sym).unwrap();

    let mut bus = DiagnosticBus::new();
    target.analyze(&table, &mut bus);

    assert!(bus.has_errors());
    assert!(bus.all().iter().any(|d| d.code == code::S_ZP_RESERVED));
}

/// A `@zp` placement inside the free `$02`-`$8F` range is accepted.
#[test]
fn c64_zero_page_accepts_a_free_address() {
    let target = Target::from_name("c64").unwrap();
    let mut table = SymbolTable::new(Range::synthetic(std::rc::Rc::from("t.b65")));
    let root = table.root();
    let sym = Symbol::new(
        "COUNTER",
        SymbolKind::Variable,
        StorageClass::Zp,
        Type::Byte,
        root,
        Range::synthetic(std::rc::Rc::from("t.b65")),
    )
    .at_address(0x10);
    table.declare_in(root, sym).unwrap();

    let mut bus = DiagnosticBus::new();
    target.analyze(&table, &mut bus);

    assert!(!bus.has_errors(), "{:?}", bus.all());
}

/// Compiling the same module twice at the same optimizer level produces
/// textually identical IL.
#[test]
fn repeated_compilation_is_deterministic() {
    let source = "module T; function f(): void { poke($D020, 0); }\n";
    let path = write_temp("determinism", source);
    let a = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    let b = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    assert_eq!(il::print_module(&a.modules[0]), il::print_module(&b.modules[0]));
    let _ = std::fs::remove_file(path);
}

/// Every emitted block is terminated, matching well-formedness of the
/// control-flow graph the IL encodes.
#[test]
fn every_block_is_terminated_for_a_loop_with_a_mutated_parameter() {
    let source = "module T; function f(n: byte): byte { while (n > 0) { n = n - 1; } return n; }\n";
    let path = write_temp("cfg_well_formed", source);
    let result = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    assert!(result.succeeded(), "{:?}", result.bus.all());
    for func in &result.modules[0].functions {
        for block in &func.blocks {
            assert!(block.is_terminated(), "block {} has no terminator", block.label);
        }
    }
    let _ = std::fs::remove_file(path);
}

/// `il::validate` reports nothing for a well-formed, SSA-promoted,
/// optimized module, matching the IL round-trip/well-formedness invariant.
#[test]
fn validate_accepts_a_fully_compiled_module() {
    let source = "module T; function f(n: byte): byte { while (n > 0) { n = n - 1; } return n; }\n";
    let path = write_temp("validate_pass", source);
    let result = compile(path.to_str().unwrap(), &CompileOptions::default()).unwrap();
    assert!(result.succeeded(), "{:?}", result.bus.all());
    let mut bus = DiagnosticBus::new();
    il::validate(&result.modules[0], &mut bus);
    assert!(!bus.has_errors(), "{:?}", bus.all());
    let _ = std::fs::remove_file(path);
}
