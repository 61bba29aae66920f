// Command-line driver
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

use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use blend65c::optimize::OptLevel;
use blend65c::{compile, il, CompileOptions};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OptArg {
    O0,
    O1,
    O2,
}

impl From<OptArg> for OptLevel {
    fn from(arg: OptArg) -> Self {
        match arg {
            OptArg::O0 => OptLevel::O0,
            OptArg::O1 => OptLevel::O1,
            OptArg::O2 => OptLevel::O2,
        }
    }
}

/// Ahead-of-time compiler for the Blend65 systems language.
#[derive(Parser, Debug)]
#[command(name = "blend65c", version, about)]
struct Cli {
    /// Root source file (`.b65`); imported modules are discovered alongside it.
    source: String,

    /// Hardware target: c64, c128, x16, or generic.
    #[arg(long, default_value = "generic")]
    target: String,

    /// Optimization level.
    #[arg(short = 'O', long = "opt", value_enum, default_value_t = OptArg::O1)]
    opt: OptArg,

    /// Print the generated IL for every compiled module to stdout.
    #[arg(long)]
    emit_il: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let options = CompileOptions { target: cli.target, optimize: cli.opt.into() };

    let result = match compile(&cli.source, &options) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    for (file, diagnostics) in result.bus.grouped_by_file() {
        eprintln!("== {file} ==");
        for d in diagnostics {
            eprint!("{d}");
        }
    }

    if cli.emit_il {
        for module in &result.modules {
            println!("{}", il::print_module(module));
        }
    }

    if result.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
