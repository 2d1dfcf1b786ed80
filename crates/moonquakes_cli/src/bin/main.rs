use std::env;
use std::fs;
use std::io::{self, BufRead, Read, Write};

use moonquakes::{Lua, Value};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = "moonquakes 5.4";
const COPYRIGHT: &str = "Copyright (C) 2026 moonquakes contributors";

fn print_usage() {
    eprintln!("usage: moonquakes [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat        execute string 'stat'");
    eprintln!("  -i             enter interactive mode after executing 'script'");
    eprintln!("  -v, --version  show version information");
    eprintln!("  --             stop handling options");
    eprintln!("  -              stop handling options and execute stdin");
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    script_args: Vec<String>,
    show_version: bool,
    read_stdin: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut stop_options = false;
    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        if !stop_options && arg.starts_with('-') && arg.len() > 1 {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => opts.interactive = true,
                "-v" | "--version" => opts.show_version = true,
                "--" => stop_options = true,
                _ => return Err(format!("unrecognized option '{}'", arg)),
            }
        } else if !stop_options && arg == "-" {
            opts.read_stdin = true;
            stop_options = true;
        } else {
            opts.script_file = Some(arg.clone());
            i += 1;
            while i < args.len() {
                opts.script_args.push(args[i].clone());
                i += 1;
            }
            break;
        }
        i += 1;
    }
    Ok(opts)
}

/// Builds the global `arg` table: arg[0] is the script, positives are
/// script arguments, arg[-1] the interpreter path.
fn setup_arg_table(lua: &mut Lua, exe_path: &str, script: Option<&str>, args: &[String]) {
    let t = lua.new_table(args.len(), 2);
    if let Some(name) = script {
        let v = lua.new_string(name);
        lua.raw_seti(t, 0, v);
    }
    let exe = lua.new_string(exe_path);
    lua.raw_seti(t, -1, exe);
    for (i, a) in args.iter().enumerate() {
        let v = lua.new_string(a);
        lua.raw_seti(t, i as i64 + 1, v);
    }
    lua.set_global("arg", Value::Table(t));
}

fn report(err: &moonquakes::MoonError) {
    eprintln!("error: {}", err.message);
    match &err.traceback {
        Some(tb) => eprintln!("{}", tb),
        None => eprintln!("stack traceback:"),
    }
}

fn run_source(lua: &mut Lua, source: &str, chunk_name: &str) -> Result<(), ()> {
    let f = match lua.load_str(source, chunk_name) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("moonquakes: {}", e.message);
            return Err(());
        }
    };
    match lua.call(f, &[]) {
        Ok(_) => Ok(()),
        Err(e) => {
            report(&e);
            Err(())
        }
    }
}

fn execute_file(lua: &mut Lua, filename: &str) -> Result<(), ()> {
    let code = match fs::read_to_string(filename) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("moonquakes: cannot open {}: {}", filename, e);
            return Err(());
        }
    };
    let chunk_name = format!("@{}", filename);
    run_source(lua, &code, &chunk_name)
}

fn run_repl(lua: &mut Lua) {
    println!("{}", VERSION);
    println!("{}", COPYRIGHT);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut pending = String::new();
    loop {
        if pending.is_empty() {
            print!("> ");
        } else {
            print!(">> ");
        }
        let _ = io::stdout().flush();
        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };
        if pending.is_empty() && (line.trim() == "exit" || line.trim() == "quit") {
            break;
        }
        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(&line);
        // expression first, so `1+2` echoes its value
        let as_expr = format!("return {}", pending);
        let compiled = match lua.load_str(&as_expr, "=stdin") {
            Ok(f) => Ok(f),
            Err(_) => lua.load_str(&pending, "=stdin"),
        };
        match compiled {
            Ok(f) => {
                pending.clear();
                match lua.call(f, &[]) {
                    Ok(results) => {
                        for v in results {
                            println!("{}", lua.display(v));
                        }
                    }
                    Err(e) => report(&e),
                }
            }
            Err(e) => {
                if e.message.contains("<eof>") {
                    continue; // likely an unfinished statement
                }
                eprintln!("moonquakes: {}", e.message);
                pending.clear();
            }
        }
    }
}

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    let opts = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("moonquakes: {}", e);
            print_usage();
            return 1;
        }
    };
    if opts.show_version {
        println!("{}", VERSION);
        println!("{}", COPYRIGHT);
        if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin {
            return 0;
        }
    }
    let mut lua = Lua::new();
    lua.open_libs();

    let exe = env::args().next().unwrap_or_else(|| "moonquakes".to_string());
    setup_arg_table(
        &mut lua,
        &exe,
        opts.script_file.as_deref(),
        &opts.script_args,
    );

    for code in &opts.execute_strings {
        if run_source(&mut lua, code, "=(command line)").is_err() {
            return 1;
        }
    }

    if let Some(file) = &opts.script_file {
        if execute_file(&mut lua, file).is_err() {
            return 1;
        }
    } else if opts.read_stdin {
        let mut code = String::new();
        if io::stdin().read_to_string(&mut code).is_err() {
            eprintln!("moonquakes: error reading stdin");
            return 1;
        }
        if run_source(&mut lua, &code, "=stdin").is_err() {
            return 1;
        }
    }

    if opts.interactive {
        run_repl(&mut lua);
    } else if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin {
        if opts.show_version {
            return 0;
        }
        print_usage();
        return 1;
    }
    0
}
