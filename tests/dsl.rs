//! Source language tests: what parses, what is rejected and where, and
//! how the linter sees the same inputs.

use atomforge::dictionary::{ArgType, Nesting, Param, Signature, Width};
use atomforge::lint::{lint, LintRule};
use atomforge::parser::ParseErrorKind;
use atomforge::{parse, parse_with, AtomDictionary, TypedValue};

// ==================== Syntax: valid sources ====================

#[test]
fn parse_empty_source() {
    let s = parse("").expect("empty source parses");
    assert!(s.is_empty());
    let s = parse("\n\n// only a comment\n").expect("comment-only source parses");
    assert!(s.is_empty());
}

#[test]
fn parse_crlf_line_endings() {
    let s = parse("start-stream <00x>\r\n  wait-on <>\r\nend-stream <00x>\r\n").expect("parse");
    assert_eq!(s.len(), 3);
}

#[test]
fn parse_whitespace_inside_argument_list() {
    let s = parse("version < 3 ,\t1 >").expect("parse");
    assert_eq!(s.atoms()[0].args, vec![TypedValue::Unsigned(3), TypedValue::Unsigned(1)]);
}

#[test]
fn parse_all_argument_kinds() {
    let src = r#"start-stream <00x>
  start-object <trigger, "Go">
    orientation <hcf>
    font-size <12>
    offset-y <-32768>
    relative-tag <4294967295>
    color-face <00FF7fX>
    send-token-raw <6b31x>
    dod-data <x>
    comment <"tab\there \\ back">
    scroll-delta <-1>
    bool-disabled <yes>
  end-object <>
end-stream <00x>"#;
    let s = parse(src).expect("parse");
    let args: Vec<&TypedValue> = s.atoms().iter().flat_map(|a| a.args.iter()).collect();
    assert!(args.contains(&&TypedValue::Enum8(0x07)));
    assert!(args.contains(&&TypedValue::Signed(-32768)));
    assert!(args.contains(&&TypedValue::Unsigned(u32::MAX as u64)));
    assert!(args.contains(&&TypedValue::Bytes(vec![0x00, 0xff, 0x7f])));
    assert!(args.contains(&&TypedValue::Bytes(b"k1".to_vec())));
    assert!(args.contains(&&TypedValue::Text("tab\there \\ back".into())));
    assert!(args.contains(&&TypedValue::Enum8(1)));
}

#[test]
fn parse_enum_by_number() {
    let s = parse("position <9>").expect("parse");
    assert_eq!(s.atoms()[0].args, vec![TypedValue::Enum8(9)]);
}

#[test]
fn parse_hex_integer() {
    let s = parse("set-context-global <00200069x>").expect("parse");
    assert_eq!(s.atoms()[0].args, vec![TypedValue::Unsigned(0x0020_0069)]);
}

#[test]
fn statement_offsets_follow_source() {
    let s = parse("start-stream <00x>\n\n// note\n  make-focus <>\nend-stream <00x>").expect("parse");
    let names: Vec<&str> = s.atoms().iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["start-stream", "make-focus", "end-stream"]);
}

// ==================== Syntax: invalid sources ====================

#[test]
fn reject_missing_close_bracket() {
    let err = parse("start-stream <00x\nend-stream <00x>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
    assert_eq!(err.line, 1);
    assert!(err.hint.is_some());
}

#[test]
fn reject_two_statements_on_one_line() {
    let err = parse("wait-on <> wait-off <>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
}

#[test]
fn reject_statement_starting_with_digit() {
    assert_eq!(parse("9lives <>").unwrap_err().kind, ParseErrorKind::Syntax);
}

#[test]
fn reject_unterminated_string_on_later_line() {
    let err = parse("start-stream <00x>\n  comment <\"never closed>\nend-stream <00x>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::MalformedLiteral);
    assert_eq!(err.line, 2);
    assert_eq!(err.column, 12);
}

#[test]
fn reject_bad_escape() {
    let err = parse(r#"comment <"bad \q">"#).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::MalformedLiteral);
    assert!(err.message.contains("\\q"));
}

// ==================== Semantics ====================

#[test]
fn unknown_atom_without_suggestion() {
    let err = parse("zzzzzzzzzzzz <>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::UnknownAtom);
    assert!(err.hint.is_none());
}

#[test]
fn too_many_arguments() {
    let err = parse("wait-on <1>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::ArityMismatch);
    assert!(err.message.contains("takes 0 argument(s), found 1"));
}

#[test]
fn type_mismatches() {
    let err = parse("comment <00x>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
    assert_eq!(err.literal, "00x");

    let err = parse("width <\"wide\">").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::TypeMismatch);

    let err = parse("dod-data <12>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
    assert!(err.hint.as_deref().unwrap_or_default().contains("hex"));
}

#[test]
fn unknown_enum_constant_lists_choices() {
    let err = parse("orientation <diagonal>").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
    let hint = err.hint.unwrap_or_default();
    assert!(hint.starts_with("expected one of: hcf, hff"));
}

#[test]
fn range_errors() {
    assert_eq!(parse("offset-x <32768>").unwrap_err().kind, ParseErrorKind::Range);
    assert_eq!(parse("font-id <-1>").unwrap_err().kind, ParseErrorKind::Range);
    assert_eq!(parse("position <256>").unwrap_err().kind, ParseErrorKind::Range);
    assert_eq!(parse("color-face <ff00x>").unwrap_err().kind, ParseErrorKind::Range);
    assert_eq!(parse("width <010000x>").unwrap_err().kind, ParseErrorKind::Range);
}

// ==================== Custom dictionaries ====================

static CUSTOM: &[Signature] = &[
    Signature {
        opcode: 0x0001,
        name: "begin",
        params: &[Param { name: "marker", ty: ArgType::Bytes(Some(1)) }],
        nesting: Nesting::Open,
    },
    Signature {
        opcode: 0x0002,
        name: "finish",
        params: &[Param { name: "marker", ty: ArgType::Bytes(Some(1)) }],
        nesting: Nesting::Close,
    },
    Signature {
        opcode: 0x2001,
        name: "level",
        params: &[Param { name: "n", ty: ArgType::Unsigned(Width::Two) }],
        nesting: Nesting::Flat,
    },
];

#[test]
fn parse_with_custom_dictionary() {
    let dict = AtomDictionary::from_table(CUSTOM).expect("valid table");
    let s = parse_with("begin <00x>\n  level <7>\nfinish <00x>", &dict).expect("parse");
    assert_eq!(s.atoms()[1].opcode, 0x2001);
    let err = parse_with("start-stream <00x>", &dict).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::UnknownAtom);
}

// ==================== Lint ====================

#[test]
fn lint_agrees_with_parser_on_unknown_atoms() {
    let src = "start-stream <00x>\n  widht <3>\nend-stream <00x>\n";
    let parse_err = parse(src).unwrap_err();
    let msgs = lint(src, AtomDictionary::standard());
    let unknown: Vec<_> = msgs.iter().filter(|m| m.rule == LintRule::UnknownAtom).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].line, parse_err.line);
    assert_eq!(unknown[0].column, parse_err.column);
}

#[test]
fn lint_accepts_rendered_output() {
    let src = "start-stream <00x>\n  start-object <view, \"V\">\n    make-focus <>\n  end-object <>\nend-stream <00x>";
    let bytes = atomforge::compile(src).unwrap();
    let rendered = atomforge::decompile(&bytes).unwrap().source_text;
    assert!(lint(&rendered, AtomDictionary::standard()).is_empty());
}
