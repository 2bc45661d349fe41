//! Chunk loading: text compilation, the binary chunk format used by
//! `string.dump`/`load`, and the module registry behind `require`.
//!
//! Binary chunks start with the Lua 5.4 header (signature, version/format,
//! conversion-check bytes, size bytes, LUAC_INT and LUAC_NUM markers); the
//! payload is either `AST:` plus a serialized function body with its named
//! upvalues, or `SRC:` plus plain source as a fallback.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{
    AssignTarget, Block, Expr, ExprKind, FunctionBody, Program, Stat, StatKind, TableEntry,
};
use crate::env::{Environment, SlotAttrib};
use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::lua_string::LuaStr;
use crate::value::{Closure, LuaFunction, LuaValue};

/// Compile source text into a checked program.
pub fn compile(source: &str, chunk: &str) -> LuaResult<Program> {
    let program = crate::parser::parse(source, chunk)?;
    crate::semantic::check_program(&program, chunk)?;
    Ok(program)
}

// ---------------------------------------------------------------------------
// Binary chunks
// ---------------------------------------------------------------------------

const LUAC_VERSION: u8 = 0x54;
const LUAC_FORMAT: u8 = 0x00;
const LUAC_DATA: [u8; 6] = [0x19, 0x93, 0x0D, 0x0A, 0x1A, 0x0A];
const LUAC_INT: i64 = 0x5678;
const LUAC_NUM: f64 = 370.5;

fn binary_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(31);
    header.extend_from_slice(b"\x1BLua");
    header.push(LUAC_VERSION);
    header.push(LUAC_FORMAT);
    header.extend_from_slice(&LUAC_DATA);
    header.push(4); // instruction size
    header.push(8); // integer size
    header.push(8); // number size
    header.extend_from_slice(&LUAC_INT.to_le_bytes());
    header.extend_from_slice(&LUAC_NUM.to_le_bytes());
    header
}

/// Binary chunks are recognized by their leading escape byte.
pub fn is_binary_chunk(bytes: &[u8]) -> bool {
    bytes.first() == Some(&0x1B)
}

/// A serializable snapshot of an upvalue's value. Values without a stable
/// serialized form are dumped as nil, keeping the name bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum DumpValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Big(String),
}

impl DumpValue {
    fn from_value(value: &LuaValue) -> DumpValue {
        match value {
            LuaValue::Boolean(b) => DumpValue::Bool(*b),
            LuaValue::Integer(i) => DumpValue::Int(*i),
            LuaValue::Float(f) => DumpValue::Float(*f),
            LuaValue::Str(s) => DumpValue::Bytes(s.as_bytes().to_vec()),
            LuaValue::BigInt(b) => DumpValue::Big(b.to_string()),
            _ => DumpValue::Nil,
        }
    }

    fn into_value(self) -> LuaValue {
        match self {
            DumpValue::Nil => LuaValue::Nil,
            DumpValue::Bool(b) => LuaValue::Boolean(b),
            DumpValue::Int(i) => LuaValue::Integer(i),
            DumpValue::Float(f) => LuaValue::Float(f),
            DumpValue::Bytes(bytes) => LuaValue::Str(LuaStr::from_vec(bytes)),
            DumpValue::Big(digits) => match num_bigint::BigInt::parse_bytes(digits.as_bytes(), 10)
            {
                Some(big) => crate::number::normalize_bigint(big),
                None => LuaValue::Nil,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DumpPayload {
    body: FunctionBody,
    upvalues: Vec<(String, DumpValue)>,
}

enum BinaryChunk {
    Ast(DumpPayload),
    Source(String),
}

/// Serialize a closure: header, then the AST payload with the closure's
/// named upvalues and their current values.
pub fn dump_function(closure: &Rc<Closure>) -> LuaResult<Vec<u8>> {
    let mut upvalues = Vec::new();
    for name in free_names(&closure.body) {
        if let Some(slot) = closure.env.lookup(&name) {
            upvalues.push((name, DumpValue::from_value(&slot.get())));
        }
    }
    let payload = DumpPayload { body: (*closure.body).clone(), upvalues };
    let json = serde_json::to_string(&payload)
        .map_err(|err| LuaError::runtime(format!("unable to dump given function: {}", err)))?;
    let mut bytes = binary_header();
    bytes.extend_from_slice(b"AST:");
    bytes.extend_from_slice(json.as_bytes());
    Ok(bytes)
}

fn parse_binary(bytes: &[u8]) -> LuaResult<BinaryChunk> {
    let header = binary_header();
    if bytes.len() < header.len() || bytes[..header.len()] != header[..] {
        return Err(LuaError::syntax_plain("binary chunk truncated"));
    }
    let payload = &bytes[header.len()..];
    if let Some(json) = payload.strip_prefix(b"AST:") {
        let payload: DumpPayload = serde_json::from_slice(json)
            .map_err(|_| LuaError::syntax_plain("binary chunk truncated"))?;
        return Ok(BinaryChunk::Ast(payload));
    }
    if let Some(source) = payload.strip_prefix(b"SRC:") {
        let source = std::str::from_utf8(source)
            .map_err(|_| LuaError::syntax_plain("binary chunk truncated"))?;
        return Ok(BinaryChunk::Source(source.to_string()));
    }
    Err(LuaError::syntax_plain("binary chunk truncated"))
}

/// The `load` core: accept text or binary according to `mode`, wrap the
/// result as a function with the requested `_ENV`.
pub(crate) fn load_chunk(
    interp: &Interpreter,
    bytes: &[u8],
    chunk_name: &str,
    mode: &str,
    env: Option<LuaValue>,
) -> LuaResult<LuaValue> {
    if is_binary_chunk(bytes) {
        if !mode.contains('b') {
            return Err(LuaError::syntax_plain(format!(
                "attempt to load a binary chunk (mode is '{}')",
                mode
            )));
        }
        return match parse_binary(bytes)? {
            BinaryChunk::Ast(payload) => {
                let scope = Environment::root();
                let env_value = env.unwrap_or_else(|| LuaValue::Table(interp.globals()));
                scope.declare("_ENV", env_value, SlotAttrib::Regular);
                for (name, value) in payload.upvalues {
                    if name != "_ENV" {
                        scope.declare(&name, value.into_value(), SlotAttrib::Regular);
                    }
                }
                log::debug!("loaded binary chunk '{}'", chunk_name);
                Ok(LuaValue::Function(LuaFunction::Lua(Rc::new(Closure {
                    body: Rc::new(payload.body),
                    env: scope,
                    chunk: Rc::from(chunk_name),
                    name: std::cell::RefCell::new(None),
                }))))
            }
            BinaryChunk::Source(source) => load_text(interp, &source, chunk_name, env),
        };
    }
    if !mode.contains('t') {
        return Err(LuaError::syntax_plain(format!(
            "attempt to load a text chunk (mode is '{}')",
            mode
        )));
    }
    let source = std::str::from_utf8(bytes)
        .map_err(|_| LuaError::syntax_plain("source chunk is not valid text"))?;
    load_text(interp, source, chunk_name, env)
}

fn load_text(
    interp: &Interpreter,
    source: &str,
    chunk_name: &str,
    env: Option<LuaValue>,
) -> LuaResult<LuaValue> {
    let program = compile(source, chunk_name)?;
    Ok(interp.load_program(&program, chunk_name, env))
}

// ---------------------------------------------------------------------------
// Free-variable analysis for `dump`
// ---------------------------------------------------------------------------

struct FreeVars {
    scopes: Vec<Vec<String>>,
    free: Vec<String>,
}

/// Names a function body reads or writes that are not bound inside it; these
/// are the closure's potential upvalues. `_ENV` is excluded, the loader
/// always rebinds it.
fn free_names(body: &FunctionBody) -> Vec<String> {
    let mut walker = FreeVars { scopes: Vec::new(), free: Vec::new() };
    walker.walk_body(body);
    walker.free
}

impl FreeVars {
    fn bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.iter().any(|n| n == name))
    }

    fn note(&mut self, name: &str) {
        if name != "_ENV" && !self.bound(name) && !self.free.iter().any(|n| n == name) {
            self.free.push(name.to_string());
        }
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn walk_body(&mut self, body: &FunctionBody) {
        self.scopes.push(body.params.clone());
        self.walk_block_stats(&body.block);
        self.scopes.pop();
    }

    fn walk_block(&mut self, block: &Block, pre_locals: &[String]) {
        self.scopes.push(pre_locals.to_vec());
        self.walk_block_stats(block);
        self.scopes.pop();
    }

    fn walk_block_stats(&mut self, block: &Block) {
        for stat in &block.stats {
            self.walk_stat(stat);
        }
    }

    fn walk_stat(&mut self, stat: &Stat) {
        match &stat.kind {
            StatKind::LocalDeclaration { names, values } => {
                for value in values {
                    self.walk_expr(value);
                }
                for (name, _) in names {
                    self.declare(name);
                }
            }
            StatKind::Assignment { targets, values } => {
                for value in values {
                    self.walk_expr(value);
                }
                for target in targets {
                    match target {
                        AssignTarget::Name { name, .. } => self.note(name),
                        AssignTarget::Field { object, .. } => self.walk_expr(object),
                        AssignTarget::Index { object, index, .. } => {
                            self.walk_expr(object);
                            self.walk_expr(index);
                        }
                    }
                }
            }
            StatKind::If { cond, then_block, elseifs, else_block } => {
                self.walk_expr(cond);
                self.walk_block(then_block, &[]);
                for (elseif_cond, elseif_block) in elseifs {
                    self.walk_expr(elseif_cond);
                    self.walk_block(elseif_block, &[]);
                }
                if let Some(block) = else_block {
                    self.walk_block(block, &[]);
                }
            }
            StatKind::While { cond, body } => {
                self.walk_expr(cond);
                self.walk_block(body, &[]);
            }
            StatKind::RepeatUntil { body, cond } => {
                self.scopes.push(Vec::new());
                self.walk_block_stats(body);
                self.walk_expr(cond);
                self.scopes.pop();
            }
            StatKind::NumericFor { var, start, limit, step, body } => {
                self.walk_expr(start);
                self.walk_expr(limit);
                if let Some(step) = step {
                    self.walk_expr(step);
                }
                self.walk_block(body, std::slice::from_ref(var));
            }
            StatKind::GenericFor { names, exprs, body } => {
                for expr in exprs {
                    self.walk_expr(expr);
                }
                self.walk_block(body, names);
            }
            StatKind::FunctionDef { name_path, body, .. } => {
                self.note(&name_path[0]);
                self.walk_body(body);
            }
            StatKind::LocalFunctionDef { name, body } => {
                self.declare(name);
                self.walk_body(body);
            }
            StatKind::Return { values } | StatKind::Yield { values } => {
                for value in values {
                    self.walk_expr(value);
                }
            }
            StatKind::DoBlock { body } => self.walk_block(body, &[]),
            StatKind::ExpressionStatement { expr } => self.walk_expr(expr),
            StatKind::Break | StatKind::Goto { .. } | StatKind::Label { .. } => {}
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Identifier(name) => self.note(name),
            ExprKind::BinaryOp { lhs, rhs, .. } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
            }
            ExprKind::UnaryOp { operand, .. } => self.walk_expr(operand),
            ExprKind::Grouped(inner) => self.walk_expr(inner),
            ExprKind::FunctionCall { func, args } => {
                self.walk_expr(func);
                for arg in args {
                    self.walk_expr(arg);
                }
            }
            ExprKind::MethodCall { object, args, .. } => {
                self.walk_expr(object);
                for arg in args {
                    self.walk_expr(arg);
                }
            }
            ExprKind::TableFieldAccess { object, .. } => self.walk_expr(object),
            ExprKind::TableIndexAccess { object, index } => {
                self.walk_expr(object);
                self.walk_expr(index);
            }
            ExprKind::TableConstructor { entries } => {
                for entry in entries {
                    match entry {
                        TableEntry::Keyed { value, .. } => self.walk_expr(value),
                        TableEntry::Indexed { key, value } => {
                            self.walk_expr(key);
                            self.walk_expr(value);
                        }
                        TableEntry::Array(value) => self.walk_expr(value),
                    }
                }
            }
            ExprKind::FunctionLiteral(body) => self.walk_body(body),
            ExprKind::NilLiteral
            | ExprKind::BoolLiteral(_)
            | ExprKind::NumberLiteral(_)
            | ExprKind::StringLiteral { .. }
            | ExprKind::VarArg => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Module registry for `require`
// ---------------------------------------------------------------------------

/// Search paths and cache for loaded modules; detects require cycles.
pub struct ModuleRegistry {
    pub search_paths: Vec<PathBuf>,
    pub loaded: HashMap<String, LuaValue>,
    loading: HashSet<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry {
            search_paths: vec![PathBuf::from("."), PathBuf::from("lib")],
            loaded: HashMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.push(path);
    }

    /// `a.b.c` resolves to `a/b/c.lua` under some search path.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = format!("{}.lua", name.replace('.', "/"));
        self.search_paths
            .iter()
            .map(|base| base.join(&relative))
            .find(|candidate| candidate.is_file())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `require(name)`: cached module value, or load, run, and cache it.
pub(crate) async fn require_module(interp: &Interpreter, name: &str) -> LuaResult<LuaValue> {
    if let Some(value) = interp.state().modules.borrow().loaded.get(name) {
        return Ok(value.clone());
    }
    {
        let mut modules = interp.state().modules.borrow_mut();
        if !modules.loading.insert(name.to_string()) {
            return Err(LuaError::runtime(format!(
                "loop or previous error loading module '{}'",
                name
            )));
        }
    }
    let result = require_module_inner(interp, name).await;
    interp.state().modules.borrow_mut().loading.remove(name);
    let value = result?;
    interp
        .state()
        .modules
        .borrow_mut()
        .loaded
        .insert(name.to_string(), value.clone());
    Ok(value)
}

async fn require_module_inner(interp: &Interpreter, name: &str) -> LuaResult<LuaValue> {
    let path = interp
        .state()
        .modules
        .borrow()
        .resolve(name)
        .ok_or_else(|| LuaError::runtime(format!("module '{}' not found", name)))?;
    let source = std::fs::read_to_string(&path)
        .map_err(|err| LuaError::runtime(format!("cannot open module '{}': {}", name, err)))?;
    log::debug!("loading module '{}' from {}", name, path.display());
    let chunk_name = path.display().to_string();
    let chunk = load_text(interp, &source, &chunk_name, None)?;
    let result = interp.call_value(chunk, vec![LuaValue::from(name)]).await?;
    let value = result.into_first();
    Ok(if value.is_nil() { LuaValue::Boolean(true) } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_shape() {
        let header = binary_header();
        assert_eq!(&header[..4], b"\x1BLua");
        assert_eq!(header[4], 0x54);
        assert_eq!(header.len(), 4 + 1 + 1 + 6 + 3 + 8 + 8);
    }

    #[test]
    fn test_binary_round_trip() {
        let program = compile("local up return function() return up end", "t").unwrap();
        // Hand-build a closure over a scope with one upvalue.
        let scope = Environment::root();
        scope.declare("up", LuaValue::Integer(9), SlotAttrib::Regular);
        let body = match &program.block.stats[1].kind {
            StatKind::Return { values } => match &values[0].kind {
                ExprKind::FunctionLiteral(body) => body.clone(),
                other => panic!("expected function literal, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        };
        let closure = Rc::new(Closure {
            body,
            env: scope,
            chunk: Rc::from("t"),
            name: std::cell::RefCell::new(None),
        });
        let bytes = dump_function(&closure).unwrap();
        assert!(is_binary_chunk(&bytes));
        match parse_binary(&bytes).unwrap() {
            BinaryChunk::Ast(payload) => {
                assert_eq!(payload.upvalues.len(), 1);
                assert_eq!(payload.upvalues[0].0, "up");
            }
            BinaryChunk::Source(_) => panic!("expected AST payload"),
        }
    }

    #[test]
    fn test_truncation_rejected() {
        let header = binary_header();
        assert!(parse_binary(&header[..10]).is_err());
        let mut wrong = header.clone();
        // Flip an endianness-marker byte.
        let n = wrong.len() - 3;
        wrong[n] ^= 0xFF;
        wrong.extend_from_slice(b"AST:{}");
        assert!(parse_binary(&wrong).is_err());
    }

    #[test]
    fn test_free_names() {
        let program =
            compile("local a return function(p) local q = p return a + b + q end", "t").unwrap();
        let body = match &program.block.stats[1].kind {
            StatKind::Return { values } => match &values[0].kind {
                ExprKind::FunctionLiteral(body) => body.clone(),
                other => panic!("expected function literal, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        };
        let names = free_names(&body);
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_module_resolution_misses() {
        let registry = ModuleRegistry::new();
        assert!(registry.resolve("definitely.not.a.module").is_none());
    }

    #[test]
    fn test_added_search_path_is_consulted() {
        let dir = std::env::temp_dir().join(format!("moonwalk-modules-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("answer.lua"), "return 42").unwrap();

        let mut registry = ModuleRegistry::new();
        assert!(registry.resolve("answer").is_none());
        registry.add_search_path(dir.clone());
        assert_eq!(registry.resolve("answer"), Some(dir.join("answer.lua")));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
