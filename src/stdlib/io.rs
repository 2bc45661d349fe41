//! A small io library: default input/output plus file handles as userdata.
//!
//! File handles carry their state in a `LuaUserData` and a metatable with
//! `__index` (the method table), `__close`, and `__gc`, so `local f <close>`
//! and garbage collection both release the descriptor.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::rc::Rc;

use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::lua_string::LuaStr;
use crate::number;
use crate::stdlib::{native, native_sync, new_table, set, validation};
use crate::value::{LuaUserData, LuaValue, MultiValue, TableRef};

enum FileState {
    Reading(BufReader<File>),
    Writing(File),
    Closed,
}

struct FileHandle {
    state: FileState,
}

fn handle_of<'a>(value: &'a LuaValue, what: &str) -> LuaResult<&'a Rc<LuaUserData>> {
    match value {
        LuaValue::UserData(ud) => Ok(ud),
        other => Err(validation::bad_argument(what, 1, "file", other)),
    }
}

fn with_handle<R>(
    value: &LuaValue,
    what: &str,
    f: impl FnOnce(&mut FileHandle) -> LuaResult<R>,
) -> LuaResult<R> {
    let ud = handle_of(value, what)?;
    let mut data = ud.data.borrow_mut();
    match data.downcast_mut::<FileHandle>() {
        Some(handle) => f(handle),
        None => Err(LuaError::type_error(format!(
            "bad argument #1 to '{}' (file expected)",
            what
        ))),
    }
}

/// One read according to a Lua format: a line, the rest, a number, or a byte
/// count.
fn read_format(reader: &mut BufReader<File>, format: &LuaValue) -> LuaResult<LuaValue> {
    match format {
        LuaValue::Str(s) => {
            let spec = s.to_lossy();
            match spec.trim_start_matches('*') {
                "l" | "L" => {
                    let keep_newline = spec.ends_with('L');
                    let mut line = String::new();
                    let n = reader
                        .read_line(&mut line)
                        .map_err(|err| LuaError::runtime(format!("read error: {}", err)))?;
                    if n == 0 {
                        return Ok(LuaValue::Nil);
                    }
                    if !keep_newline {
                        while line.ends_with('\n') || line.ends_with('\r') {
                            line.pop();
                        }
                    }
                    Ok(LuaValue::from(line))
                }
                "a" => {
                    let mut rest = Vec::new();
                    reader
                        .read_to_end(&mut rest)
                        .map_err(|err| LuaError::runtime(format!("read error: {}", err)))?;
                    Ok(LuaValue::Str(LuaStr::from_vec(rest)))
                }
                "n" => {
                    let mut line = String::new();
                    let n = reader
                        .read_line(&mut line)
                        .map_err(|err| LuaError::runtime(format!("read error: {}", err)))?;
                    if n == 0 {
                        return Ok(LuaValue::Nil);
                    }
                    Ok(number::parse_lua_number(line.trim()).unwrap_or(LuaValue::Nil))
                }
                other => {
                    Err(LuaError::runtime(format!("invalid format '{}' to 'read'", other)))
                }
            }
        }
        count @ (LuaValue::Integer(_) | LuaValue::Float(_)) => {
            let wanted = number::exact_integer(count)
                .ok_or_else(|| LuaError::runtime("invalid byte count to 'read'"))?;
            let mut buffer = vec![0u8; wanted.max(0) as usize];
            let mut filled = 0;
            while filled < buffer.len() {
                let n = reader
                    .read(&mut buffer[filled..])
                    .map_err(|err| LuaError::runtime(format!("read error: {}", err)))?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 && !buffer.is_empty() {
                return Ok(LuaValue::Nil);
            }
            buffer.truncate(filled);
            Ok(LuaValue::Str(LuaStr::from_vec(buffer)))
        }
        other => Err(validation::bad_argument("read", 2, "string or number", other)),
    }
}

fn file_read(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let this = validation::check_any("read", &args, 1)?;
    let formats: Vec<LuaValue> = if args.len() > 1 {
        args[1..].to_vec()
    } else {
        vec![LuaValue::from("l")]
    };
    with_handle(&this, "read", |handle| match &mut handle.state {
        FileState::Reading(reader) => {
            let mut out = Vec::new();
            for format in &formats {
                let value = read_format(reader, format)?;
                let done = value.is_nil();
                out.push(value);
                if done {
                    break;
                }
            }
            Ok(MultiValue::from_vec(out))
        }
        FileState::Writing(_) => Err(LuaError::runtime("file not opened for reading")),
        FileState::Closed => Err(LuaError::runtime("attempt to use a closed file")),
    })
}

fn file_write(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let this = validation::check_any("write", &args, 1)?;
    with_handle(&this, "write", |handle| match &mut handle.state {
        FileState::Writing(file) => {
            for (index, value) in args[1..].iter().enumerate() {
                let bytes = match value {
                    LuaValue::Str(s) => s.as_bytes().to_vec(),
                    n @ (LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_)) => {
                        number::format_number(n).into_bytes()
                    }
                    other => {
                        return Err(validation::bad_argument("write", index + 2, "string", other))
                    }
                };
                file.write_all(&bytes)
                    .map_err(|err| LuaError::runtime(format!("write error: {}", err)))?;
            }
            Ok(())
        }
        FileState::Reading(_) => Err(LuaError::runtime("file not opened for writing")),
        FileState::Closed => Err(LuaError::runtime("attempt to use a closed file")),
    })?;
    Ok(MultiValue::single(this))
}

fn file_close(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let this = validation::check_any("close", &args, 1)?;
    with_handle(&this, "close", |handle| {
        handle.state = FileState::Closed;
        Ok(())
    })?;
    Ok(MultiValue::single(LuaValue::Boolean(true)))
}

fn file_lines(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let this = validation::check_any("lines", &args, 1)?;
    handle_of(&this, "lines")?;
    let iterator = native_sync("lines_iterator", move |_: &Interpreter, iter_args| {
        let file = validation::check_any("lines", &iter_args, 1)?;
        with_handle(&file, "lines", |handle| match &mut handle.state {
            FileState::Reading(reader) => read_format(reader, &LuaValue::from("l"))
                .map(MultiValue::single),
            _ => Err(LuaError::runtime("attempt to use a closed file")),
        })
    });
    Ok(MultiValue::from_vec(vec![iterator, this]))
}

/// Build the shared file metatable: methods via `__index`, cleanup via
/// `__close`/`__gc`.
fn file_metatable() -> TableRef {
    let methods = new_table();
    set(&methods, "read", native_sync("read", file_read));
    set(&methods, "write", native_sync("write", file_write));
    set(&methods, "close", native_sync("close", file_close));
    set(&methods, "lines", native_sync("lines", file_lines));

    let meta = new_table();
    set(&meta, "__index", LuaValue::Table(methods));
    set(&meta, "__name", LuaValue::from("FILE*"));
    set(&meta, "__close", native_sync("close", file_close));
    set(&meta, "__gc", native_sync("close", file_close));
    meta
}

fn open_file(path: &str, mode: &str, meta: &TableRef) -> LuaResult<LuaValue> {
    let state = match mode.trim_end_matches('b') {
        "r" => FileState::Reading(BufReader::new(
            File::open(path).map_err(|err| LuaError::runtime(format!("{}: {}", path, err)))?,
        )),
        "w" => FileState::Writing(
            File::create(path).map_err(|err| LuaError::runtime(format!("{}: {}", path, err)))?,
        ),
        "a" => FileState::Writing(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|err| LuaError::runtime(format!("{}: {}", path, err)))?,
        ),
        other => {
            return Err(LuaError::runtime(format!(
                "bad argument #2 to 'open' (invalid mode '{}')",
                other
            )));
        }
    };
    let ud = LuaUserData::new(Box::new(FileHandle { state }));
    *ud.metatable.borrow_mut() = Some(meta.clone());
    Ok(LuaValue::UserData(ud))
}

fn lua_write(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (index, value) in args.iter().enumerate() {
        let bytes = match value {
            LuaValue::Str(s) => s.as_bytes().to_vec(),
            n @ (LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_)) => {
                number::format_number(n).into_bytes()
            }
            other => return Err(validation::bad_argument("write", index + 1, "string", other)),
        };
        out.write_all(&bytes)
            .map_err(|err| LuaError::runtime(format!("write error: {}", err)))?;
    }
    let _ = out.flush();
    Ok(MultiValue::empty())
}

fn lua_read(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let spec = validation::opt_str("read", &args, 1, "l")?.to_lossy();
    let stdin = std::io::stdin();
    match spec.trim_start_matches('*') {
        "l" => {
            let mut line = String::new();
            let n = stdin
                .read_line(&mut line)
                .map_err(|err| LuaError::runtime(format!("read error: {}", err)))?;
            if n == 0 {
                return Ok(MultiValue::single(LuaValue::Nil));
            }
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(MultiValue::single(LuaValue::from(line)))
        }
        "n" => {
            let mut line = String::new();
            let n = stdin
                .read_line(&mut line)
                .map_err(|err| LuaError::runtime(format!("read error: {}", err)))?;
            if n == 0 {
                return Ok(MultiValue::single(LuaValue::Nil));
            }
            Ok(MultiValue::single(
                number::parse_lua_number(line.trim()).unwrap_or(LuaValue::Nil),
            ))
        }
        "a" => {
            let mut rest = String::new();
            stdin
                .lock()
                .read_to_string(&mut rest)
                .map_err(|err| LuaError::runtime(format!("read error: {}", err)))?;
            Ok(MultiValue::single(LuaValue::from(rest)))
        }
        other => Err(LuaError::runtime(format!("invalid format '{}' to 'read'", other))),
    }
}

pub fn install(_interp: &Interpreter, globals: &TableRef) {
    let meta = file_metatable();
    let io = new_table();
    set(&io, "write", native_sync("write", lua_write));
    set(&io, "read", native_sync("read", lua_read));

    let open_meta = meta.clone();
    set(
        &io,
        "open",
        native_sync("open", move |_: &Interpreter, args| {
            let path = validation::check_str("open", &args, 1)?.to_lossy();
            let mode = validation::opt_str("open", &args, 2, "r")?.to_lossy();
            match open_file(&path, &mode, &open_meta) {
                Ok(handle) => Ok(MultiValue::single(handle)),
                Err(err) => Ok(MultiValue::from_vec(vec![LuaValue::Nil, err.value()])),
            }
        }),
    );

    let lines_meta = meta;
    set(
        &io,
        "lines",
        native("lines", move |interp: Interpreter, args| {
            let lines_meta = lines_meta.clone();
            async move {
                let path = validation::check_str("lines", &args, 1)?.to_lossy();
                let handle = open_file(&path, "r", &lines_meta)?;
                file_lines(&interp, vec![handle])
            }
        }),
    );

    set(globals, "io", LuaValue::Table(io));
}
