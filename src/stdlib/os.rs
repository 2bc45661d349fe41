//! A small os library: clock/time/date plus environment access.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};

use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::stdlib::{native_sync, new_table, set, validation};
use crate::value::{LuaValue, MultiValue, TableRef};

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn lua_clock(_: &Interpreter, _args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let elapsed = process_start().elapsed();
    Ok(MultiValue::single(LuaValue::Float(elapsed.as_secs_f64())))
}

fn table_time_field(table: &TableRef, key: &str, default: Option<i64>) -> LuaResult<i64> {
    let value = table.borrow().raw_get(&LuaValue::from(key));
    match crate::number::exact_integer(&value) {
        Some(i) => Ok(i),
        None => default.ok_or_else(|| {
            LuaError::runtime(format!("field '{}' missing in date table", key))
        }),
    }
}

fn lua_time(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    match args.first() {
        None | Some(LuaValue::Nil) => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            Ok(MultiValue::single(LuaValue::Integer(now)))
        }
        Some(LuaValue::Table(table)) => {
            let year = table_time_field(table, "year", None)?;
            let month = table_time_field(table, "month", None)?;
            let day = table_time_field(table, "day", None)?;
            let hour = table_time_field(table, "hour", Some(12))?;
            let min = table_time_field(table, "min", Some(0))?;
            let sec = table_time_field(table, "sec", Some(0))?;
            let naive = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| d.and_hms_opt(hour as u32, min as u32, sec as u32))
                .ok_or_else(|| LuaError::runtime("time result cannot be represented"))?;
            let stamp = Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp())
                .ok_or_else(|| LuaError::runtime("time result cannot be represented"))?;
            Ok(MultiValue::single(LuaValue::Integer(stamp)))
        }
        Some(other) => Err(validation::bad_argument("time", 1, "table", other)),
    }
}

fn date_components(dt: &DateTime<Local>) -> LuaResult<TableRef> {
    let table = new_table();
    {
        let mut t = table.borrow_mut();
        t.raw_set(LuaValue::from("year"), LuaValue::Integer(dt.year() as i64))?;
        t.raw_set(LuaValue::from("month"), LuaValue::Integer(dt.month() as i64))?;
        t.raw_set(LuaValue::from("day"), LuaValue::Integer(dt.day() as i64))?;
        t.raw_set(LuaValue::from("hour"), LuaValue::Integer(dt.hour() as i64))?;
        t.raw_set(LuaValue::from("min"), LuaValue::Integer(dt.minute() as i64))?;
        t.raw_set(LuaValue::from("sec"), LuaValue::Integer(dt.second() as i64))?;
        t.raw_set(
            LuaValue::from("wday"),
            LuaValue::Integer(dt.weekday().number_from_sunday() as i64),
        )?;
        t.raw_set(LuaValue::from("yday"), LuaValue::Integer(dt.ordinal() as i64))?;
        t.raw_set(LuaValue::from("isdst"), LuaValue::Boolean(false))?;
    }
    Ok(table)
}

fn lua_date(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let spec = validation::opt_str("date", &args, 1, "%c")?.to_lossy();
    let stamp = match args.get(1) {
        None | Some(LuaValue::Nil) => None,
        Some(_) => Some(validation::check_int("date", &args, 2)?),
    };

    let (utc, fmt) = match spec.strip_prefix('!') {
        Some(rest) => (true, rest.to_string()),
        None => (false, spec),
    };

    let local: DateTime<Local> = match stamp {
        Some(secs) => Local
            .timestamp_opt(secs, 0)
            .earliest()
            .ok_or_else(|| LuaError::runtime("time value out of range"))?,
        None => Local::now(),
    };

    if fmt == "*t" {
        let table = date_components(&local)?;
        return Ok(MultiValue::single(LuaValue::Table(table)));
    }

    let items: Vec<Item> = StrftimeItems::new(&fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(LuaError::runtime(format!(
            "bad argument #1 to 'date' (invalid conversion specifier '{}')",
            fmt
        )));
    }
    let text = if utc {
        local.with_timezone(&Utc).format_with_items(items.iter().cloned()).to_string()
    } else {
        local.format_with_items(items.iter().cloned()).to_string()
    };
    Ok(MultiValue::single(LuaValue::from(text)))
}

fn lua_getenv(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let name = validation::check_str("getenv", &args, 1)?.to_lossy();
    let value = std::env::var(&name).map(LuaValue::from).unwrap_or(LuaValue::Nil);
    Ok(MultiValue::single(value))
}

fn lua_exit(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let code = match args.first() {
        None | Some(LuaValue::Nil) | Some(LuaValue::Boolean(true)) => 0,
        Some(LuaValue::Boolean(false)) => 1,
        Some(_) => validation::check_int("exit", &args, 1)? as i32,
    };
    std::process::exit(code);
}

pub fn install(_interp: &Interpreter, globals: &TableRef) {
    let os = new_table();
    set(&os, "clock", native_sync("clock", lua_clock));
    set(&os, "time", native_sync("time", lua_time));
    set(&os, "date", native_sync("date", lua_date));
    set(&os, "getenv", native_sync("getenv", lua_getenv));
    set(&os, "exit", native_sync("exit", lua_exit));
    set(globals, "os", LuaValue::Table(os));
}
