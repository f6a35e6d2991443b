use cpslisp::ast::{Procedure, Value};
use cpslisp::evaluator::calling::Arity;
use cpslisp::reader::{ReaderConfig, parse_program, parse_with_config};
use cpslisp::{ParseErrorKind, Scope, create_global_scope, evaluate};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    let mut verbose = false;
    let mut file = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            _ => file = Some(arg),
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = file {
        process::exit(run_file(&path));
    }

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Evaluate every top-level expression of a file, printing each result.
fn run_file(path: &str) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{path}: {e}");
            return 1;
        }
    };
    let program = match parse_program(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{path}: {}", cpslisp::Error::from(e).report());
            return 1;
        }
    };

    let scope = create_global_scope();
    for expr in program.iter() {
        match evaluate(&scope, expr) {
            Ok(value) => println!("{value}"),
            Err(e) => {
                eprintln!("{}", e.report());
                return 1;
            }
        }
    }
    0
}

fn run_repl() {
    println!("cpslisp: a Lisp core with proper tail calls and first-class continuations");
    println!("Enter expressions like: (+ 1 (call/cc (lambda (k) (k 41))))");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let scope = create_global_scope();

    // Callable from user code for demonstration purposes
    scope.define_builtin("help", Arity::exactly(0), |_| {
        print_help();
        Ok(Value::Nil)
    });

    let config = ReaderConfig::default();
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "cpslisp> " } else { "   ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(command);

                    match command {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&scope);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                } else {
                    let _ = rl.add_history_entry(line.trim());
                }

                pending.push_str(&line);
                pending.push('\n');

                // Keep reading while the expression is still open
                let expr = match parse_with_config(&pending, config) {
                    Ok(expr) => expr,
                    Err(e) if e.kind == ParseErrorKind::Incomplete => continue,
                    Err(e) => {
                        println!("{}", cpslisp::Error::from(e).report());
                        pending.clear();
                        continue;
                    }
                };
                pending.clear();

                match evaluate(&scope, &expr) {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("{}", e.report()),
                }
            }

            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                pending.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("cpslisp REPL:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Abandon the current input, or exit");
    println!();
    println!("Special forms:");
    println!("  quote if and or while begin let setq set lambda macro call/cc (and eval)");
    println!();
    println!("Examples:");
    println!("  (setq fact (lambda (n) (if (< n 2) 1 (* n (fact (- n 1))))))");
    println!("  (fact 20)");
    println!("  (setq k nil) (+ 1 (call/cc (lambda (c) (setq k c) 1)))   then (k 10)");
    println!("  (write 'stdout \"hello\\n\")");
    println!();
}

fn print_environment(scope: &Scope) {
    let bindings = scope.bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Bindings ({} total):", bindings.len());
    println!();

    let mut primitives = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Procedure(Procedure::Builtin(_) | Procedure::Special(_)) => {
                primitives.push(name)
            }
            _ => user_defined.push((name, value)),
        }
    }

    if !primitives.is_empty() {
        println!("Built-in procedures and special forms ({}):", primitives.len());
        // Print in columns for readability
        let mut col = 0;
        for name in primitives {
            print!("  {:<15}", name.name());
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
