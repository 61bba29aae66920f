// Module registry, dependency graph, import resolution
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
// Duplicate module registration is the one fatal construction-time error
// in the whole pipeline; everything else past
// this point goes through the diagnostic bus. Cycle detection uses
// Tarjan's SCC algorithm over the registration-ordered module list so that
// which module gets blamed for a cycle is deterministic.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Decl, Program};
use crate::diagnostics::{code, DiagnosticBus};
use crate::error::CompileError;
use crate::ordered_map::OrderedMap;

pub struct Module {
    pub name: String,
    pub path: String,
    pub program: Program,
}

impl Module {
    fn dependencies(&self) -> Vec<&str> {
        let mut deps = Vec::new();
        for decl in &self.program.decls {
            if let Decl::Import(import) = decl {
                if !deps.contains(&import.from_module.as_str()) {
                    deps.push(&import.from_module);
                }
            }
        }
        deps
    }

    fn exported_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for decl in &self.program.decls {
            match decl {
                Decl::Variable(v) if v.exported => names.push(v.name.as_str()),
                Decl::Function(f) if f.exported => names.push(f.name.as_str()),
                _ => {}
            }
        }
        names
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: OrderedMap<Module>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    pub fn register(&mut self, module: Module) -> Result<(), CompileError> {
        let name = module.name.clone();
        self.modules
            .insert(&name, module)
            .map_err(|_| CompileError::DuplicateModuleRegistration(name))
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Directed edges `name -> dependency`, in registration order.
    fn dependency_graph(&self) -> Vec<(String, Vec<String>)> {
        self.modules
            .iter()
            .map(|m| (m.name.clone(), m.dependencies().into_iter().map(String::from).collect()))
            .collect()
    }

    /// Tarjan's SCC over the dependency graph. Any SCC with more than one
    /// node, or a single node with a self-edge, is a cycle.
    pub fn detect_cycles(&self, bus: &mut DiagnosticBus) {
        let graph = self.dependency_graph();
        let index_of: HashMap<&str, usize> =
            graph.iter().enumerate().map(|(i, (n, _))| (n.as_str(), i)).collect();

        let n = graph.len();
        let mut index = vec![None; n];
        let mut lowlink = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut next_index = 0usize;
        let mut sccs: Vec<Vec<usize>> = Vec::new();

        struct Frame {
            node: usize,
            child_iter: usize,
        }

        for start in 0..n {
            if index[start].is_some() {
                continue;
            }
            let mut call_stack = vec![Frame { node: start, child_iter: 0 }];
            index[start] = Some(next_index);
            lowlink[start] = next_index;
            next_index += 1;
            stack.push(start);
            on_stack[start] = true;

            while let Some(frame) = call_stack.last_mut() {
                let v = frame.node;
                let deps = &graph[v].1;
                if frame.child_iter < deps.len() {
                    let dep_name = &deps[frame.child_iter];
                    frame.child_iter += 1;
                    let Some(&w) = index_of.get(dep_name.as_str()) else { continue };
                    if index[w].is_none() {
                        index[w] = Some(next_index);
                        lowlink[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call_stack.push(Frame { node: w, child_iter: 0 });
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w].unwrap());
                    }
                } else {
                    call_stack.pop();
                    if let Some(parent) = call_stack.last() {
                        lowlink[parent.node] = lowlink[parent.node].min(lowlink[v]);
                    }
                    if lowlink[v] == index[v].unwrap() {
                        let mut component = Vec::new();
                        loop {
                            let w = stack.pop().unwrap();
                            on_stack[w] = false;
                            component.push(w);
                            if w == v {
                                break;
                            }
                        }
                        sccs.push(component);
                    }
                }
            }
        }

        for component in sccs {
            let is_cycle = component.len() > 1
                || graph[component[0]].1.iter().any(|d| d == &graph[component[0]].0);
            if is_cycle {
                let names: Vec<&str> = component.iter().map(|&i| graph[i].0.as_str()).collect();
                let first = self.modules.get(names[0]).unwrap();
                bus.error(
                    code::P_IMPORT_CYCLE,
                    format!("import cycle among modules: {}", names.join(", ")),
                    first.program.module.location.clone(),
                );
            }
        }
    }

    /// Validates every `import X from Y` against `Y`'s export set.
    pub fn resolve_imports(&self, bus: &mut DiagnosticBus) {
        for module in self.modules.iter() {
            for decl in &module.program.decls {
                let Decl::Import(import) = decl else { continue };
                match self.modules.get(&import.from_module) {
                    None => bus.error(
                        code::P_MODULE_NOT_FOUND,
                        format!("module `{}` not found", import.from_module),
                        import.location.clone(),
                    ),
                    Some(target) => {
                        if !target.exported_names().contains(&import.symbol.as_str()) {
                            if target.program.decls.iter().any(|d| decl_name(d) == Some(import.symbol.as_str())) {
                                bus.error(
                                    code::P_SYMBOL_NOT_EXPORTED,
                                    format!("`{}` is not exported from `{}`", import.symbol, import.from_module),
                                    import.location.clone(),
                                );
                            } else {
                                bus.error(
                                    code::P_SYMBOL_NOT_FOUND,
                                    format!("`{}` has no member `{}`", import.from_module, import.symbol),
                                    import.location.clone(),
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

fn decl_name(decl: &Decl) -> Option<&str> {
    match decl {
        Decl::Variable(v) => Some(&v.name),
        Decl::Function(f) => Some(&f.name),
        Decl::TypeAlias(t) => Some(&t.name),
        Decl::Enum(e) => Some(&e.name),
        Decl::Import(_) => None,
    }
}

/// Exported symbols across every registered module, keyed by `module.name`.
/// Built after import resolution succeeds.
#[derive(Default)]
pub struct GlobalSymbolTable {
    entries: HashMap<String, Rc<str>>,
}

impl GlobalSymbolTable {
    pub fn build(registry: &ModuleRegistry, bus: &mut DiagnosticBus) -> Self {
        let mut table = GlobalSymbolTable::default();
        for module in registry.iter() {
            for name in module.exported_names() {
                let key = format!("{}.{}", module.name, name);
                if table.entries.contains_key(&key) {
                    bus.error(
                        code::S_DUPLICATE_SYMBOL,
                        format!("duplicate exported symbol `{}`", key),
                        module.program.module.location.clone(),
                    );
                } else {
                    table.entries.insert(key, Rc::from(module.name.as_str()));
                }
            }
        }
        table
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.entries.contains_key(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ModuleDecl;
    use crate::source::Range;
    use std::rc::Rc as StdRc;

    fn program(name: &str, decls: Vec<Decl>) -> Program {
        Program {
            module: ModuleDecl {
                id: crate::ast::NodeIdSource::new().next(),
                name: name.to_string(),
                location: Range::synthetic(StdRc::from("x.b65")),
            },
            decls,
        }
    }

    #[test]
    fn duplicate_registration_is_fatal() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Module { name: "M".into(), path: "m.b65".into(), program: program("M", vec![]) })
            .unwrap();
        let err = registry.register(Module {
            name: "M".into(),
            path: "m2.b65".into(),
            program: program("M", vec![]),
        });
        assert!(matches!(err, Err(CompileError::DuplicateModuleRegistration(_))));
    }

    #[test]
    fn self_import_cycle_detected() {
        use crate::ast::ImportDecl;
        let mut registry = ModuleRegistry::new();
        let import = ImportDecl {
            id: crate::ast::NodeIdSource::new().next(),
            symbol: "x".into(),
            from_module: "M".into(),
            location: Range::synthetic(StdRc::from("m.b65")),
        };
        registry
            .register(Module { name: "M".into(), path: "m.b65".into(), program: program("M", vec![Decl::Import(import)]) })
            .unwrap();
        let mut bus = DiagnosticBus::new();
        registry.detect_cycles(&mut bus);
        assert!(bus.has_errors());
    }

    #[test]
    fn missing_module_reported() {
        use crate::ast::ImportDecl;
        let mut registry = ModuleRegistry::new();
        let import = ImportDecl {
            id: crate::ast::NodeIdSource::new().next(),
            symbol: "x".into(),
            from_module: "Missing".into(),
            location: Range::synthetic(StdRc::from("m.b65")),
        };
        registry
            .register(Module { name: "M".into(), path: "m.b65".into(), program: program("M", vec![Decl::Import(import)]) })
            .unwrap();
        let mut bus = DiagnosticBus::new();
        registry.resolve_imports(&mut bus);
        assert!(bus.has_errors());
    }
}
