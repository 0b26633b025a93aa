use std::io::{self, BufRead, Write};
use std::{env, fs, process};

use loxvm::{Error, VM};

fn main() {
    let args: Vec<String> = env::args().collect();
    let code = match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: loxvm [script]");
            64
        }
    };
    process::exit(code);
}

fn repl() -> i32 {
    let mut vm = VM::default();
    let stdin = io::stdin();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return 0;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                return 0;
            }
            Ok(_) => {
                // Errors were already reported; the prompt just continues.
                let _ = vm.interpret(&line);
            }
        }
    }
}

fn run_file(path: &str) -> i32 {
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {}.", path, err);
            return 74;
        }
    };
    let mut vm = VM::default();
    match vm.interpret(&src) {
        Ok(()) => 0,
        Err(Error::Compile) => 65,
        Err(Error::Runtime) => 70,
    }
}
