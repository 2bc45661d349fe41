//! Load-time rejection tests: lexer, parser, and semantic pre-pass.

use moonwalk::error_types::ErrorKind;
use moonwalk::loader;

fn load_err(source: &str) -> moonwalk::LuaError {
    match loader::compile(source, "bad") {
        Ok(_) => panic!("expected load failure for: {}", source),
        Err(err) => err,
    }
}

#[test]
fn test_lexer_rejects_malformed_input() {
    assert!(load_err("'unterminated").message().contains("unfinished string"));
    assert!(load_err("[[unterminated").message().contains("unfinished long string"));
    assert!(load_err("return 5..2").message().contains("malformed number"));
    assert!(load_err("return 0x").message().contains("malformed number"));
    assert!(load_err("return '\\q'").message().contains("invalid escape sequence"));
}

#[test]
fn test_parser_rejects_broken_statements() {
    assert!(loader::compile("local = 5", "bad").is_err());
    assert!(loader::compile("if x then", "bad").is_err());
    assert!(loader::compile("return return", "bad").is_err());
    assert!(loader::compile("return 1 +", "bad").is_err());
    assert!(loader::compile("function f( end", "bad").is_err());
    assert!(loader::compile("f(", "bad").is_err());
    assert!(loader::compile("a.b.c", "bad").is_err());
}

#[test]
fn test_errors_carry_syntax_kind_and_position() {
    let err = load_err("local x =\nlocal y = 2");
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert!(err.message().starts_with("bad:2:"), "{}", err.message());
}

#[test]
fn test_semantic_rejects_const_assignment() {
    let err = load_err("local lim <const> = 10 lim = 11");
    assert!(err.message().contains("attempt to assign to const variable 'lim'"));
}

#[test]
fn test_semantic_rejects_goto_into_scope() {
    let err = load_err("do goto skip local tmp = 1 ::skip:: end");
    assert!(err.message().contains("jumps into the scope of local 'tmp'"), "{}", err.message());
}

#[test]
fn test_semantic_rejects_unknown_label() {
    let err = load_err("goto nowhere");
    assert!(err.message().contains("no visible label 'nowhere'"));
}

#[test]
fn test_semantic_rejects_duplicate_label() {
    let err = load_err("::spot:: ::spot::");
    assert!(err.message().contains("label 'spot' already defined"));
}

#[test]
fn test_semantic_rejects_stray_break_and_vararg() {
    assert!(load_err("break").message().contains("break outside a loop"));
    let err = load_err("local f = function() return ... end");
    assert!(err.message().contains("cannot use '...' outside a vararg function"));
}

#[test]
fn test_semantic_rejects_double_close() {
    let err = load_err("local a <close>, b <close> = nil, nil");
    assert!(err.message().contains("multiple to-be-closed variables"));
}

#[test]
fn test_unknown_attribute_rejected() {
    let err = load_err("local a <frozen> = 1");
    assert!(err.message().contains("unknown attribute 'frozen'"));
}
