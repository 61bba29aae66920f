// Error taxonomy
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
// Two of the four error classes never reach a `Result`:
// user errors go to the `DiagnosticBus`, and internal-invariant failures
// are reported there too, tagged with an `I###` code. `CompileError` and
// `ConfigError` cover what's left: the fatal construction error (duplicate
// module registration) and configuration problems (unknown target, a
// module path that doesn't resolve) that halt compilation at the API
// boundary rather than merely annotating a diagnostic.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("module `{0}` is already registered")]
    DuplicateModuleRegistration(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("source file read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown target `{0}`")]
    UnknownTarget(String),

    #[error("module `{0}` could not be found")]
    ModuleNotFound(String),
}
