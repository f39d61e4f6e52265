//! Parse atom stream source into an [`AtomStream`] using PEST.
//!
//! The grammar (`grammar.pest`) only recognizes the shape of statements and
//! literals; names, arity and argument types are resolved against the
//! dictionary while building, so every error carries the position of the
//! offending token.

use crate::ast::{Atom, AtomStream, FormatVersion};
use crate::dictionary::{enum_value, ArgType, AtomDictionary, Param, Signature, ValueError};
use crate::value::TypedValue;
use pest::error::{InputLocation, LineColLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;
use serde::Serialize;
use thiserror::Error;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct AtomStreamParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseErrorKind {
    Syntax,
    UnknownAtom,
    ArityMismatch,
    TypeMismatch,
    MalformedLiteral,
    Range,
}

/// A located parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// 1-based.
    pub line: usize,
    /// 1-based, in characters.
    pub column: usize,
    /// Byte offset into the source.
    pub offset: usize,
    /// The offending token as written.
    pub literal: String,
    pub context: Vec<String>,
    pub hint: Option<String>,
}

impl ParseError {
    fn at(source: &str, offset: usize, kind: ParseErrorKind, message: String, literal: &str) -> Self {
        let (line, column) = locate(source, offset);
        ParseError {
            kind,
            message,
            line,
            column,
            offset,
            literal: literal.to_string(),
            context: context_lines(source, line),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Parse with the standard dictionary.
pub fn parse(source: &str) -> Result<AtomStream, ParseError> {
    parse_with(source, AtomDictionary::standard())
}

pub fn parse_with(source: &str, dict: &AtomDictionary) -> Result<AtomStream, ParseError> {
    parse_located(source, dict).map(|(stream, _)| stream)
}

/// Parse and also return the byte offset of each atom's statement.
pub fn parse_located(source: &str, dict: &AtomDictionary) -> Result<(AtomStream, Vec<usize>), ParseError> {
    let mut pairs = AtomStreamParser::parse(Rule::stream, source).map_err(|e| from_pest(e, source))?;
    let stream = match pairs.next() {
        Some(pair) => pair,
        None => return Ok((AtomStream::new(FormatVersion::Raw, Vec::new()), Vec::new())),
    };
    let mut atoms = Vec::new();
    let mut offsets = Vec::new();
    for inner in stream.into_inner() {
        if inner.as_rule() == Rule::statement {
            offsets.push(inner.as_span().start());
            atoms.push(build_statement(inner, source, dict)?);
        }
    }
    tracing::debug!(atoms = atoms.len(), "parsed atom stream");
    Ok((AtomStream::new(FormatVersion::Raw, atoms), offsets))
}

fn build_statement(pair: Pair<'_, Rule>, source: &str, dict: &AtomDictionary) -> Result<Atom, ParseError> {
    let offset = pair.as_span().start();
    let mut inner = pair.into_inner();
    let name_pair = inner.next().ok_or_else(|| {
        ParseError::at(source, offset, ParseErrorKind::Syntax, "expected atom name".into(), "")
    })?;
    let name = name_pair.as_str();
    let sig = match dict.lookup(name) {
        Some(sig) => sig,
        None => {
            let err = ParseError::at(
                source,
                offset,
                ParseErrorKind::UnknownAtom,
                format!("unknown atom '{}'", name),
                name,
            );
            return Err(match dict.suggest(name) {
                Some(s) => err.with_hint(format!("did you mean '{}'?", s)),
                None => err,
            });
        }
    };

    let args: Vec<Pair<'_, Rule>> = inner.next().map(|list| list.into_inner().collect()).unwrap_or_default();
    if args.len() != sig.arity() {
        return Err(ParseError::at(
            source,
            offset,
            ParseErrorKind::ArityMismatch,
            format!("'{}' takes {} argument(s), found {}", name, sig.arity(), args.len()),
            name,
        )
        .with_hint(format!("usage: {}", sig.usage())));
    }

    let mut values = Vec::with_capacity(args.len());
    for (param, arg) in sig.params.iter().zip(args) {
        values.push(build_arg(arg, param, sig, source)?);
    }
    Ok(Atom::new(sig, values))
}

fn build_arg(pair: Pair<'_, Rule>, param: &Param, sig: &Signature, source: &str) -> Result<TypedValue, ParseError> {
    let text = pair.as_str();
    let offset = pair.as_span().start();
    let err = |kind, message: String| ParseError::at(source, offset, kind, message, text);
    let mismatch = |found: &str| {
        err(
            ParseErrorKind::TypeMismatch,
            format!("argument '{}' of '{}' expects {}, found {}", param.name, sig.name, param.ty.label(), found),
        )
        .with_hint(format!("usage: {}", sig.usage()))
    };

    let value = match pair.as_rule() {
        Rule::hex_literal => {
            let bytes = hex_bytes(text).map_err(|m| {
                err(ParseErrorKind::MalformedLiteral, m)
                    .with_hint("hex literals need an even number of digits, e.g. 0ax")
            })?;
            match param.ty {
                ArgType::Bytes(_) => TypedValue::Bytes(bytes),
                ArgType::Text => return Err(mismatch("a hex literal").with_hint("quote the text: \"...\"")),
                ArgType::Unsigned(_) | ArgType::Signed(_) | ArgType::Enum8(_) => {
                    if bytes.is_empty() {
                        return Err(err(ParseErrorKind::MalformedLiteral, "empty hex literal for an integer".into()));
                    }
                    if bytes.len() > 8 {
                        return Err(err(ParseErrorKind::Range, format!("{} does not fit in 64 bits", text)));
                    }
                    let v = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
                    integer_value(&param.ty, v as i128).map_err(|e| range_error(e, &err, param, sig))?
                }
            }
        }
        Rule::int_literal => {
            let v: i128 = text
                .parse()
                .map_err(|_| err(ParseErrorKind::Range, format!("integer {} is out of range", text)))?;
            match param.ty {
                ArgType::Bytes(_) => {
                    return Err(mismatch("an integer").with_hint("byte strings are written in hex, e.g. 00x"))
                }
                ArgType::Text => return Err(mismatch("an integer").with_hint("quote the text: \"...\"")),
                _ => integer_value(&param.ty, v).map_err(|e| range_error(e, &err, param, sig))?,
            }
        }
        Rule::string_literal => {
            let body = pair.clone().into_inner().next().map(|p| p.as_str()).unwrap_or("");
            let s = unescape(body).map_err(|m| err(ParseErrorKind::MalformedLiteral, m))?;
            match param.ty {
                ArgType::Text => TypedValue::Text(s),
                _ => return Err(mismatch("a string")),
            }
        }
        Rule::ident => match param.ty {
            ArgType::Enum8(constants) => match enum_value(constants, text) {
                Some(v) => TypedValue::Enum8(v),
                None => {
                    let names: Vec<&str> = constants.iter().map(|(n, _)| *n).collect();
                    return Err(err(
                        ParseErrorKind::TypeMismatch,
                        format!("unknown constant '{}' for argument '{}' of '{}'", text, param.name, sig.name),
                    )
                    .with_hint(format!("expected one of: {}", names.join(", "))));
                }
            },
            _ => return Err(mismatch(&format!("the bare word '{}'", text))),
        },
        _ => return Err(err(ParseErrorKind::Syntax, format!("unexpected '{}'", text))),
    };

    param.ty.check(&value).map_err(|e| range_error(e, &err, param, sig))?;
    Ok(value)
}

fn range_error(
    e: ValueError,
    err: &dyn Fn(ParseErrorKind, String) -> ParseError,
    param: &Param,
    sig: &Signature,
) -> ParseError {
    let kind = if e.is_range() { ParseErrorKind::Range } else { ParseErrorKind::TypeMismatch };
    err(kind, format!("argument '{}' of '{}': {}", param.name, sig.name, e))
        .with_hint(format!("usage: {}", sig.usage()))
}

/// Typed integer for `ty`, range-checked against its width.
fn integer_value(ty: &ArgType, v: i128) -> Result<TypedValue, ValueError> {
    let out_of_range = |min: i128, max: i128| ValueError::OutOfRange { value: v, min, max };
    match ty {
        ArgType::Unsigned(w) => {
            let max = w.unsigned_max() as i128;
            if v < 0 || v > max {
                return Err(out_of_range(0, max));
            }
            Ok(TypedValue::Unsigned(v as u64))
        }
        ArgType::Signed(w) => {
            let (min, max) = w.signed_range();
            if v < min as i128 || v > max as i128 {
                return Err(out_of_range(min as i128, max as i128));
            }
            Ok(TypedValue::Signed(v as i64))
        }
        ArgType::Enum8(_) => {
            if !(0..=255).contains(&v) {
                return Err(out_of_range(0, 255));
            }
            Ok(TypedValue::Enum8(v as u8))
        }
        other => Err(ValueError::TypeMismatch { expected: other.expected_kind(), found: "integer" }),
    }
}

/// Bytes of a `..x` literal. The grammar guarantees hex digits only.
fn hex_bytes(literal: &str) -> Result<Vec<u8>, String> {
    let digits = &literal[..literal.len() - 1];
    if digits.len() % 2 != 0 {
        return Err(format!("odd-length hex literal '{}'", literal));
    }
    digits
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| format!("invalid hex literal '{}'", literal))
        })
        .collect()
}

fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                if chars.next() != Some('{') {
                    return Err("expected '{' after \\u".into());
                }
                let mut code = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(h) if h.is_ascii_hexdigit() && code.len() < 6 => code.push(h),
                        _ => return Err("malformed \\u{...} escape".into()),
                    }
                }
                let ch = u32::from_str_radix(&code, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("invalid code point \\u{{{}}}", code))?;
                out.push(ch);
            }
            Some(other) => return Err(format!("unknown escape '\\{}'", other)),
            None => return Err("dangling '\\' at end of string".into()),
        }
    }
    Ok(out)
}

fn from_pest(err: pest::error::Error<Rule>, source: &str) -> ParseError {
    let (line, column) = match err.line_col {
        LineColLocation::Pos(p) => p,
        LineColLocation::Span(p, _) => p,
    };
    let offset = match err.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((s, _)) => s,
    };
    let err = err.renamed_rules(|rule| match rule {
        Rule::atom_name => "atom name".into(),
        Rule::arg_list => "'<'".into(),
        Rule::hex_literal => "hex literal".into(),
        Rule::int_literal => "integer".into(),
        Rule::string_literal => "string".into(),
        Rule::ident => "constant name".into(),
        Rule::banner => "'<<' banner".into(),
        Rule::EOI => "end of input".into(),
        other => format!("{:?}", other),
    });
    if let Some(quote) = open_quote(source, offset) {
        return ParseError::at(
            source,
            quote,
            ParseErrorKind::MalformedLiteral,
            "unterminated string literal".into(),
            source[quote..].lines().next().unwrap_or(""),
        )
        .with_hint("close the string with '\"' on the same line");
    }
    let literal: String = source
        .get(offset..)
        .unwrap_or("")
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    ParseError {
        kind: ParseErrorKind::Syntax,
        message: err.variant.message().into_owned(),
        line,
        column,
        offset,
        literal,
        context: context_lines(source, line),
        hint: Some("statements have the form: name <arg, arg>".into()),
    }
}

/// Offset of a string opened but not closed on the line containing `offset`.
fn open_quote(source: &str, offset: usize) -> Option<usize> {
    let line_start = source.get(..offset)?.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = source[line_start..].find('\n').map(|i| line_start + i).unwrap_or(source.len());
    let mut open = None;
    let mut escaped = false;
    for (i, c) in source[line_start..line_end].char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if open.is_some() => escaped = true,
            '"' => open = if open.is_some() { None } else { Some(line_start + i) },
            '/' if open.is_none() && source[line_start + i..].starts_with("//") => break,
            _ => {}
        }
    }
    open
}

/// 1-based line and character column of a byte offset.
pub(crate) fn locate(source: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(source.len());
    while !source.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    (line, before[line_start..].chars().count() + 1)
}

/// The offending line with one neighbour on each side.
pub(crate) fn context_lines(source: &str, line: usize) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    let first = line.saturating_sub(1).max(1);
    let last = (line + 1).min(lines.len());
    let width = last.to_string().len();
    (first..=last)
        .filter_map(|n| {
            let text = lines.get(n - 1)?;
            let marker = if n == line { ">>" } else { "  " };
            Some(format!("{} {:>width$} | {}", marker, n, text, width = width))
        })
        .collect()
}
