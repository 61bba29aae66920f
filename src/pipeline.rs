// Top-level compilation pipeline
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
// Glues every phase together in a fixed order: parse -> register modules ->
// resolve imports -> semantic analysis -> IL generation -> SSA construction
// -> optimization -> target analysis. Diagnostics gate the pipeline: once
// any phase reports an error, later phases that would need a well-formed
// program to run safely (IL generation onward) are skipped, and `compile`
// returns whatever diagnostics have accumulated with no IL.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::diagnostics::DiagnosticBus;
use crate::error::CompileError;
use crate::il;
use crate::ilgen;
use crate::modules::{GlobalSymbolTable, Module, ModuleRegistry};
use crate::optimize::{self, OptLevel, OptimizeOptions, PassManager};
use crate::parser::Parser;
use crate::semantic::{self, AnalysisResult};
use crate::ssa;
use crate::target::Target;

pub struct CompileOptions {
    pub target: String,
    pub optimize: OptLevel,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { target: "generic".into(), optimize: OptLevel::O1 }
    }
}

pub struct CompileResult {
    pub bus: DiagnosticBus,
    pub modules: Vec<il::Module>,
}

impl CompileResult {
    pub fn succeeded(&self) -> bool {
        !self.bus.has_errors()
    }
}

#[tracing::instrument(skip(options), fields(target = %options.target))]
pub fn compile(root_path: &str, options: &CompileOptions) -> Result<CompileResult, CompileError> {
    let mut bus = DiagnosticBus::new();
    let target = Target::from_name(&options.target)?;

    let registry = load_registry(root_path)?;
    registry.detect_cycles(&mut bus);
    registry.resolve_imports(&mut bus);

    if bus.has_errors() {
        return Ok(CompileResult { bus, modules: vec![] });
    }

    let _globals = GlobalSymbolTable::build(&registry, &mut bus);
    if bus.has_errors() {
        return Ok(CompileResult { bus, modules: vec![] });
    }

    let mut analyses: Vec<(&Module, AnalysisResult)> = Vec::new();
    for module in registry.iter() {
        tracing::debug!(module = %module.name, "running semantic analysis");
        let analysis = semantic::analyze(&module.program, &mut bus);
        target.analyze(&analysis.symbols, &mut bus);
        analyses.push((module, analysis));
    }

    if bus.has_errors() {
        return Ok(CompileResult { bus, modules: vec![] });
    }

    let pass_manager = PassManager::for_level(&OptimizeOptions { level: options.optimize, max_iterations: 16 });
    let mut il_modules = Vec::new();
    for (module, analysis) in &analyses {
        tracing::debug!(module = %module.name, "lowering to IL");
        let mut il_module = match ilgen::lower_program(&module.program, analysis, &mut bus) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(module = %module.name, error = %e, "IL generation failed");
                continue;
            }
        };
        ssa::construct_module(&mut il_module);
        pass_manager.run(&mut il_module);
        il::validate(&il_module, &mut bus);
        il_modules.push(il_module);
    }

    Ok(CompileResult { bus, modules: il_modules })
}

/// Loads the root source file and breadth-first discovers any modules it
/// (transitively) imports, each expected as `<module-name>.b65` alongside
/// the root file. A module that cannot be read is simply left unregistered;
/// `resolve_imports` reports the resulting `P105` on its own.
fn load_registry(root_path: &str) -> Result<ModuleRegistry, CompileError> {
    let root_path = Path::new(root_path);
    let dir = root_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

    let mut registry = ModuleRegistry::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue = vec![root_path.to_path_buf()];

    while let Some(path) = queue.pop() {
        let source = std::fs::read_to_string(&path)?;
        let file: std::rc::Rc<str> = std::rc::Rc::from(path.to_string_lossy().as_ref());
        let mut parser = Parser::new(file, &source).map_err(|_| CompileError::Config(crate::error::ConfigError::ModuleNotFound(path.display().to_string())))?;
        let mut parse_bus = DiagnosticBus::new();
        let Some(program) = parser.parse_program(&mut parse_bus) else {
            continue;
        };

        let name = program.module.name.clone();
        if !seen.insert(name.clone()) {
            continue;
        }

        let mut next_imports = Vec::new();
        for decl in &program.decls {
            if let crate::ast::Decl::Import(import) = decl {
                if !seen.contains(&import.from_module) {
                    next_imports.push(import.from_module.clone());
                }
            }
        }

        registry.register(Module { name, path: path.display().to_string(), program })?;

        for imported in next_imports {
            queue.push(dir.join(format!("{imported}.b65")));
        }
    }

    Ok(registry)
}
