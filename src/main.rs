use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use spud::{InterpretResult, VM};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 2 {
        eprintln!("Usage: spud [script]");
        return ExitCode::from(64);
    }

    let mut vm = VM::new();
    vm.inherit_env();

    if args.len() == 2 {
        vm.set_argv(&args[1..]);
        run_file(&mut vm, &args[1])
    } else {
        vm.set_argv(&[]);
        repl(&mut vm)
    }
}

fn run_file(vm: &mut VM, path: &str) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read \"{}\": {}.", path, err);
            return ExitCode::from(74);
        }
    };

    exit_code(vm.interpret(&source))
}

fn repl(vm: &mut VM) -> ExitCode {
    let stdin = io::stdin();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return ExitCode::SUCCESS;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                return ExitCode::SUCCESS;
            }
            Ok(_) => {}
        }

        match vm.interpret(&line) {
            InterpretResult::InterpretExitOk => return ExitCode::SUCCESS,
            InterpretResult::InterpretExit(code) => return ExitCode::from(code as u8),
            _ => {}
        }
    }
}

fn exit_code(result: InterpretResult) -> ExitCode {
    match result {
        InterpretResult::InterpretOk | InterpretResult::InterpretExitOk => ExitCode::SUCCESS,
        InterpretResult::InterpretCompileError => ExitCode::from(65),
        InterpretResult::InterpretRuntimeError => ExitCode::from(70),
        InterpretResult::InterpretExit(code) => ExitCode::from(code as u8),
    }
}
