use std::io::Read;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;

use moonwalk::{loader, ErrorKind, Interpreter, LuaValue};

#[derive(Parser)]
#[command(name = "moonwalk", version, about = "A Lua 5.4-compatible interpreter")]
struct Cli {
    /// Script file to run; reads stdin when omitted.
    script: Option<PathBuf>,

    /// Execute a string of code instead of a file.
    #[arg(short = 'e', value_name = "code")]
    execute: Option<String>,

    /// Arguments passed to the script (visible as `...` and `arg`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("moonwalk: {:#}", err);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let (source, chunk_name) = if let Some(code) = cli.execute {
        (code, "=(command line)".to_string())
    } else if let Some(path) = &cli.script {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        (source, path.display().to_string())
    } else {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source).context("reading stdin")?;
        (source, "=stdin".to_string())
    };

    let interp = Interpreter::new();
    install_arg_table(&interp, &chunk_name, &cli.args)?;
    // Modules resolve relative to the script as well as the working
    // directory.
    if let Some(path) = &cli.script {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                interp.add_module_search_path(dir.to_path_buf());
            }
        }
    }

    let program = match loader::compile(&source, &chunk_name) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("moonwalk: {}", err.message());
            return Ok(2);
        }
    };

    let script_args: Vec<LuaValue> =
        cli.args.iter().map(|a| LuaValue::from(a.as_str())).collect();
    match interp.execute_chunk(&program, &chunk_name, script_args) {
        Ok(_) => Ok(0),
        Err(err) => {
            eprintln!("moonwalk: {}", interp.describe_error(&err));
            eprintln!("{}", err.format_traceback());
            Ok(if err.kind() == ErrorKind::Syntax { 2 } else { 1 })
        }
    }
}

/// The conventional `arg` table: the chunk name at index 0, script arguments
/// from 1.
fn install_arg_table(interp: &Interpreter, chunk_name: &str, args: &[String]) -> anyhow::Result<()> {
    let table = LuaValue::new_table();
    if let LuaValue::Table(t) = &table {
        let mut t = t.borrow_mut();
        t.raw_set(LuaValue::Integer(0), LuaValue::from(chunk_name))
            .map_err(|err| anyhow::anyhow!(err.message()))?;
        for (i, value) in args.iter().enumerate() {
            t.raw_set(LuaValue::Integer(i as i64 + 1), LuaValue::from(value.as_str()))
                .map_err(|err| anyhow::anyhow!(err.message()))?;
        }
    }
    interp
        .globals()
        .borrow_mut()
        .raw_set(LuaValue::from("arg"), table)
        .map_err(|err| anyhow::anyhow!(err.message()))?;
    Ok(())
}
