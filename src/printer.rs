//! Render atom streams as canonical DSL source.
//!
//! Output is one `name <arg, ...>` line per atom, indented two spaces per
//! open stream or object. Rendering is deterministic: parsing the output and
//! rendering again yields the same text.

use crate::ast::{Atom, AtomStream};
use crate::dictionary::{enum_name, ArgType, AtomDictionary, Nesting};
use crate::value::TypedValue;
use std::fmt::Write as _;

pub const DEFAULT_INDENT: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct Printer<'d> {
    dict: &'d AtomDictionary,
    indent: usize,
}

impl<'d> Printer<'d> {
    pub fn new(dict: &'d AtomDictionary) -> Self {
        Printer { dict, indent: DEFAULT_INDENT }
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn render(&self, stream: &AtomStream) -> String {
        let mut out = String::new();
        let mut depth = 0usize;
        for atom in stream.atoms() {
            let nesting = self
                .dict
                .lookup_by_opcode(atom.opcode)
                .map(|s| s.nesting)
                .unwrap_or(Nesting::Flat);
            if nesting == Nesting::Close {
                depth = depth.saturating_sub(1);
            }
            out.push_str(&" ".repeat(depth * self.indent));
            out.push_str(&self.render_atom(atom));
            out.push('\n');
            if nesting == Nesting::Open {
                depth += 1;
            }
        }
        out
    }

    /// Render one atom without indentation or newline.
    pub fn render_atom(&self, atom: &Atom) -> String {
        let sig = self.dict.lookup_by_opcode(atom.opcode);
        let args: Vec<String> = atom
            .args
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let ty = sig.and_then(|s| s.params.get(i)).map(|p| &p.ty);
                literal(v, ty)
            })
            .collect();
        format!("{} <{}>", atom.name, args.join(", "))
    }
}

/// Render a stream with the default indentation.
pub fn render(stream: &AtomStream, dict: &AtomDictionary) -> String {
    Printer::new(dict).render(stream)
}

/// Literal form of one argument. Enum8 values are named when `ty` knows them.
pub fn literal(value: &TypedValue, ty: Option<&ArgType>) -> String {
    match value {
        TypedValue::Signed(x) => x.to_string(),
        TypedValue::Unsigned(x) => x.to_string(),
        TypedValue::Enum8(x) => match ty {
            Some(ArgType::Enum8(constants)) => match enum_name(constants, *x) {
                Some(name) => name.to_string(),
                None => x.to_string(),
            },
            _ => x.to_string(),
        },
        TypedValue::Bytes(b) => format!("{}x", crate::hex::encode_lower(b)),
        TypedValue::Text(s) => quote(s),
    }
}

/// Quote text with the escapes the parser understands.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
