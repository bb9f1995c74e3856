//! REPL and file runner for the Wisp scripting language (spec.md §6).
//!
//! Deliberately thin: all the interesting behavior lives in `wisp::Interpreter`.
//! This binary only owns argument handling, the read-eval-print loop, and the
//! mapping from `wisp::Error` to process exit codes.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use wisp::{Error, Interpreter, Value};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            repl();
            ExitCode::SUCCESS
        }
        [path] => run_file(path),
        _ => {
            eprintln!("Usage: wisp [path]");
            ExitCode::from(64)
        }
    }
}

/// Reads one line at a time from standard input, running each against a
/// single persistent `Interpreter` so globals defined on one line are visible
/// to the next. The line `q` exits. Never calls `process::exit` on interpreter
/// errors (spec.md §7: "the VM remains usable for a subsequent interpret").
fn repl() {
    let mut interpreter = Interpreter::new();
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        line.clear();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }
        let source = line.trim_end();
        if source == "q" {
            break;
        }
        if source.is_empty() {
            continue;
        }

        match interpreter.run(source) {
            Ok(value) => {
                if !matches!(value, Value::Nil) {
                    println!("{}", value.to_print_string());
                }
            }
            Err(err) => report(&err),
        }
    }
}

/// Reads `path` as UTF-8 and interprets it once, mapping the outcome to an
/// exit code per spec.md §6: 0 success, 65 compile error, 70 runtime error.
/// A file that can't be read is a host I/O failure, not covered by those
/// three codes (spec.md §7 names it "the shim's responsibility"); this
/// reports it and exits 74, the conventional `sysexits.h` I/O-error code.
fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file '{path}': {err}");
            return ExitCode::from(74);
        }
    };

    let mut interpreter = Interpreter::new();
    match interpreter.run(&source) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err @ Error::Compile(_)) => {
            report(&err);
            ExitCode::from(65)
        }
        Err(err @ Error::Runtime(_)) => {
            report(&err);
            ExitCode::from(70)
        }
    }
}

fn report(err: &Error) {
    eprintln!("{err}");
}
