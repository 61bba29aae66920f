// Diagnostic bus
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
// Collects coded diagnostics with source locations. No
// pass ever aborts the process on a single error; the bus is the sole sink
// and later phases consult `has_errors` to decide whether to proceed
// (the "phase gating rule").

use std::collections::HashMap;
use std::fmt;

use crate::source::Range;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Severity {
    Hint,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Severity::Hint => "hint",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// A reserved diagnostic code, namespaced:
///   P### parser, S### semantic, W### warning, H### hint, I### compiler-internal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Code(pub &'static str);

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

macro_rules! codes {
    ( $( $name:ident = $code:literal ),* $(,)? ) => {
        $( pub const $name: Code = Code($code); )*
    };
}

#[rustfmt::skip]
pub mod code {
    use super::Code;

    codes! {
        // P001-P008 basic parse
        P_UNEXPECTED_TOKEN   = "P001",
        P_EXPECTED_IDENT     = "P002",
        P_EXPECTED_TYPE      = "P003",
        P_EXPECTED_EXPR      = "P004",
        P_EXPECTED_STMT      = "P005",
        P_UNTERMINATED_BLOCK = "P006",
        P_BAD_STORAGE_CLASS  = "P007",
        P_BAD_NUMBER         = "P008",

        // P101-P108 import/export
        P_DUPLICATE_MODULE   = "P101",
        P_MODULE_MISMATCH    = "P102",
        P_IMPORT_SYNTAX      = "P103",
        P_EXPORT_SYNTAX      = "P104",
        P_MODULE_NOT_FOUND   = "P105",
        P_IMPORT_CYCLE       = "P106",
        P_SYMBOL_NOT_EXPORTED = "P107",
        P_SYMBOL_NOT_FOUND   = "P108",

        // P201-P203 ordering
        P_MODULE_FIRST            = "P201",
        P_EXECUTABLE_AT_MODULE    = "P202",
        P_DECL_AFTER_CODE         = "P203",

        // S001-S008 type/resolution
        S_TYPE_MISMATCH      = "S001",
        S_NOT_ASSIGNABLE     = "S002",
        S_UNKNOWN_TYPE       = "S003",
        S_DUPLICATE_SYMBOL   = "S004",
        S_DUPLICATE_MAIN     = "S005",
        S_UNKNOWN_IDENT      = "S006",
        S_NOT_CALLABLE       = "S007",
        S_BAD_ARRAY_LENGTH   = "S008",

        // S100-S104 memory layout
        S_OVERLAP            = "S100",
        S_SELF_MODIFYING_CODE = "S101",
        S_ZP_OVERFLOW         = "S102",
        S_ZP_RESERVED         = "S103",
        S_ZP_ALLOCATION       = "S104",

        // S110-S111 recursion
        S_DIRECT_RECURSION    = "S110",
        S_INDIRECT_RECURSION  = "S111",

        // W001-W004 warnings
        W_IMPLICIT_MAIN_EXPORT = "W001",
        W_UNUSED_VARIABLE      = "W002",
        W_UNUSED_FUNCTION      = "W003",
        W_UNREACHABLE_CODE     = "W004",

        // H001 hints
        H_UNUSED_IMPORT = "H001",

        // I001-I099 compiler-internal (IL validator / SSA verifier)
        I_MALFORMED_TERMINATOR = "I001",
        I_EDGE_MISMATCH        = "I002",
        I_SSA_MULTI_DEF        = "I003",
        I_SSA_USE_NOT_DOMINATED = "I004",
        I_SSA_PHI_ARITY        = "I005",
    }
}

#[derive(Clone, Debug)]
pub struct Edit {
    pub location: Range,
    pub replacement: String,
}

#[derive(Clone, Debug)]
pub struct Fix {
    pub message: String,
    pub edits: Vec<Edit>,
}

#[derive(Clone, Debug)]
pub struct Related {
    pub location: Range,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub code: Code,
    pub severity: Severity,
    pub message: String,
    pub primary: Range,
    pub related: Vec<Related>,
    pub fixes: Vec<Fix>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} {} {}: {}",
            self.code, self.severity, self.primary, self.message
        )?;
        for r in &self.related {
            writeln!(f, "    {}: {}", r.location, r.message)?;
        }
        for fix in &self.fixes {
            writeln!(f, "    fix: {}", fix.message)?;
        }
        Ok(())
    }
}

/// Append-only log of diagnostics for a single compilation.
/// Owned by whichever phase is currently running; read by subsequent phases
/// only through `has_errors`.
#[derive(Default)]
pub struct DiagnosticBus {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBus {
    pub fn new() -> Self {
        DiagnosticBus { diagnostics: Vec::new() }
    }

    pub fn report(
        &mut self,
        code: Code,
        severity: Severity,
        message: impl Into<String>,
        primary: Range,
        related: Vec<Related>,
        fixes: Vec<Fix>,
    ) {
        self.diagnostics.push(Diagnostic {
            code,
            severity,
            message: message.into(),
            primary,
            related,
            fixes,
        });
    }

    pub fn error(&mut self, code: Code, message: impl Into<String>, primary: Range) {
        self.report(code, Severity::Error, message, primary, vec![], vec![]);
    }

    pub fn warning(&mut self, code: Code, message: impl Into<String>, primary: Range) {
        self.report(code, Severity::Warning, message, primary, vec![], vec![]);
    }

    pub fn info(&mut self, code: Code, message: impl Into<String>, primary: Range) {
        self.report(code, Severity::Info, message, primary, vec![], vec![]);
    }

    pub fn hint(&mut self, code: Code, message: impl Into<String>, primary: Range) {
        self.report(code, Severity::Hint, message, primary, vec![], vec![]);
    }

    pub fn all(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn errors_only(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn counts_by_severity(&self) -> HashMap<Severity, usize> {
        let mut counts = HashMap::new();
        for d in &self.diagnostics {
            *counts.entry(d.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }

    /// Groups diagnostics by file, preserving first-seen file order and the
    /// order diagnostics were reported within each file.
    pub fn grouped_by_file(&self) -> Vec<(String, Vec<&Diagnostic>)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&Diagnostic>> = HashMap::new();
        for d in &self.diagnostics {
            let file = d.primary.file.to_string();
            if !groups.contains_key(&file) {
                order.push(file.clone());
            }
            groups.entry(file).or_default().push(d);
        }
        order.into_iter().map(|f| {
            let ds = groups.remove(&f).unwrap();
            (f, ds)
        }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("f.b65"))
    }

    #[test]
    fn empty_has_no_errors() {
        let bus = DiagnosticBus::new();
        assert!(!bus.has_errors());
        assert_eq!(bus.all().len(), 0);
    }

    #[test]
    fn error_sets_has_errors() {
        let mut bus = DiagnosticBus::new();
        bus.error(code::S_TYPE_MISMATCH, "type mismatch", range());
        assert!(bus.has_errors());
        assert_eq!(bus.errors_only().count(), 1);
    }

    #[test]
    fn warnings_do_not_set_has_errors() {
        let mut bus = DiagnosticBus::new();
        bus.warning(code::W_UNUSED_VARIABLE, "unused", range());
        assert!(!bus.has_errors());
    }

    #[test]
    fn clear_empties_log() {
        let mut bus = DiagnosticBus::new();
        bus.error(code::S_TYPE_MISMATCH, "x", range());
        bus.clear();
        assert_eq!(bus.all().len(), 0);
        assert!(!bus.has_errors());
    }

    #[test]
    fn display_format() {
        let mut bus = DiagnosticBus::new();
        bus.error(code::S_TYPE_MISMATCH, "type mismatch.", range());
        let text = bus.all()[0].to_string();
        assert!(text.starts_with("S001 error f.b65:1:1: type mismatch."));
    }
}
