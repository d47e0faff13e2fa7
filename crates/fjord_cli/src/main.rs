//! fjc: The Fjord compiler command-line front end.
//!
//! Usage:
//!   fjc [options] [file...]
//!
//! Parses each input file and reports diagnostics. The pipeline ends at
//! the syntax tree.

use bumpalo::Bump;
use clap::Parser as ClapParser;
use fjord_ast::name::Names;
use fjord_diagnostics::{Diagnostic, Severity};
use fjord_parser::{Parser, ParserOptions};
use std::process;
use std::time::Instant;

#[derive(ClapParser, Debug)]
#[command(name = "fjc", about = "fjc - the Fjord compiler front end", disable_version_flag = true)]
struct Cli {
    /// Fjord files to parse.
    #[arg(value_name = "FILE")]
    files: Vec<String>,

    /// Print the parsed tree of each file.
    #[arg(long = "dump-ast")]
    dump_ast: bool,

    /// Print timing statistics.
    #[arg(long)]
    stats: bool,

    /// Enable deprecation warnings for legacy syntax.
    #[arg(long)]
    future: bool,

    /// Allow omitting method parameter type annotations.
    #[arg(long = "Ymethod-infer")]
    method_infer: bool,

    /// Permit `trait T <: ...` to mark the trait deferred.
    #[arg(long = "Yvirt-classes")]
    virt_classes: bool,

    /// Print the compiler version.
    #[arg(short = 'v', long)]
    version: bool,
}

// ANSI color codes
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("fjc version 0.1.0");
        return;
    }

    if cli.files.is_empty() {
        eprintln!("fjc: no input files");
        process::exit(2);
    }

    let options = ParserOptions {
        future: cli.future,
        method_type_infer: cli.method_infer,
        virtual_classes: cli.virt_classes,
    };

    let start = Instant::now();
    let mut error_count = 0usize;
    for file in &cli.files {
        let source = match std::fs::read_to_string(file) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("fjc: cannot read {}: {}", file, e);
                error_count += 1;
                continue;
            }
        };
        let arena = Bump::new();
        let names = Names::new();
        let mut parser = Parser::new(&arena, &names, file, &source, options);
        let tree = parser.parse();
        if cli.dump_ast {
            println!("{:#?}", tree);
        }
        let diagnostics = parser.take_diagnostics();
        for d in diagnostics.diagnostics() {
            print_diagnostic(d);
        }
        error_count += diagnostics.error_count();
    }

    if cli.stats {
        eprintln!(
            "{}parsed {} file(s) in {:.2?}{}",
            GRAY,
            cli.files.len(),
            start.elapsed(),
            RESET
        );
    }

    if error_count > 0 {
        eprintln!("{}{} error(s) found{}", RED, error_count, RESET);
        process::exit(1);
    }
}

fn print_diagnostic(d: &Diagnostic) {
    let color = match d.severity {
        Severity::Error => RED,
        Severity::Warning => YELLOW,
    };
    eprintln!("{}{}{}", color, d, RESET);
}
