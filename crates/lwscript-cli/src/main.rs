//! `spec.md` §6's CLI driver: `-f/--file`, `-s/--serialize`, `-h/--help`,
//! `-v/--version`, REPL fallback with no args.
//!
//! Grounded on `ouros-cli/src/main.rs`'s manual `env::args()` parsing style
//! (no CLI-parsing crate is introduced, matching the teacher) and its
//! "read file, compile, run, report" shape; the REPL loop is new, since the
//! teacher drives a single file per invocation.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::{env, fs};

use lwscript::config::Config;
use lwscript::diagnostics::Diagnostic;
use lwscript::engine::Engine;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match parse_args(&args) {
        Ok(Action::Help) => {
            print_help();
            ExitCode::SUCCESS
        }
        Ok(Action::Version) => {
            println!("lwscript {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Ok(Action::Run { file, serialize_to }) => run_file(&file, serialize_to.as_deref()),
        Ok(Action::Repl) => repl(),
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

enum Action {
    Help,
    Version,
    Run { file: String, serialize_to: Option<String> },
    Repl,
}

fn parse_args(args: &[String]) -> Result<Action, String> {
    let mut file: Option<String> = None;
    let mut serialize_to: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Action::Help),
            "-v" | "--version" => return Ok(Action::Version),
            "-f" | "--file" => {
                i += 1;
                file = Some(args.get(i).ok_or_else(|| format!("{} requires a path", args[i - 1]))?.clone());
            }
            "-s" | "--serialize" => {
                i += 1;
                serialize_to = Some(args.get(i).ok_or_else(|| format!("{} requires a path", args[i - 1]))?.clone());
            }
            other => return Err(format!("unrecognized argument '{other}'")),
        }
        i += 1;
    }
    match (file, serialize_to) {
        (Some(file), serialize_to) => Ok(Action::Run { file, serialize_to }),
        (None, Some(_)) => Err("-s/--serialize requires -f/--file".to_string()),
        (None, None) => Ok(Action::Repl),
    }
}

fn print_help() {
    println!(
        "lwscript {version}\n\n\
         Usage: lwscript [-f|--file <path>] [-s|--serialize <path>]\n\
         \n\
         With no arguments, starts a REPL (type 'exit' to leave, 'clear' to\n\
         discard the current input buffer).\n\
         \n\
         -f, --file <path>       compile and run a source file\n\
         -s, --serialize <path>  write the compiled chunk's binary form to\n\
                                  <path> instead of running it (requires -f)\n\
         -h, --help              print this message and exit\n\
         -v, --version           print the version and exit",
        version = env!("CARGO_PKG_VERSION"),
    );
}

fn run_file(path: &str, serialize_to: Option<&str>) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: could not read {path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new(Config::default());
    let closure = match engine.compile(&source, path) {
        Ok(closure) => closure,
        Err(diagnostics) => {
            report_all(&diagnostics, path, &source);
            return ExitCode::FAILURE;
        }
    };

    if let Some(out_path) = serialize_to {
        let bytes = engine.serialize(closure);
        if let Err(err) = fs::write(out_path, bytes) {
            eprintln!("error: could not write {out_path}: {err}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    match engine.run(closure) {
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(diagnostic) => {
            report_all(std::slice::from_ref(&diagnostic), path, &source);
            ExitCode::FAILURE
        }
    }
}

fn report_all(diagnostics: &[Diagnostic], path: &str, source: &str) {
    for diagnostic in diagnostics {
        eprintln!("{}", diagnostic.render(path, source));
    }
}

/// Reads lines from stdin until EOF, accumulating them into one pending
/// source buffer so a statement can span more than one line. A buffer that
/// compiles cleanly runs immediately and is cleared for the next one;
/// `clear` discards a broken or abandoned in-progress entry without leaving
/// the REPL, `exit` leaves it.
fn repl() -> ExitCode {
    let mut engine = Engine::new(Config::default());
    let mut buffer = String::new();
    let stdin = io::stdin();
    print_prompt(&buffer);
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "exit" if buffer.is_empty() => break,
            "clear" => {
                buffer.clear();
                print_prompt(&buffer);
                continue;
            }
            _ => {}
        }
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&line);

        match engine.compile(&buffer, "<repl>") {
            Ok(closure) => {
                match engine.run(closure) {
                    Ok(value) => println!("{value}"),
                    Err(diagnostic) => eprintln!("{diagnostic}"),
                }
                buffer.clear();
            }
            Err(diagnostics) => {
                for diagnostic in &diagnostics {
                    eprintln!("{diagnostic}");
                }
            }
        }
        print_prompt(&buffer);
    }
    ExitCode::SUCCESS
}

fn print_prompt(buffer: &str) {
    print!("{}", if buffer.is_empty() { "> " } else { "... " });
    let _ = io::stdout().flush();
}
