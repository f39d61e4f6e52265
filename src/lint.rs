//! Linter for atom stream source: enforces the canonical layout.
//!
//! ## Rules
//!
//! - **Unknown atom**: every statement must name an atom in the dictionary.
//! - **Balanced nesting**: `start-stream`/`start-object` must be closed by
//!   their end atom, and nothing may close what was never opened.
//! - **Indentation**: two spaces per open stream or object, no tabs. The
//!   closing atom sits at its opener's depth.
//! - **No trailing whitespace**.
//! - **Bare atom**: zero-argument atoms are written `name <>`.
//!
//! The canonical printer output always lints clean. Run via
//! `atomforge lint file.fdo` (add `--fix` to rewrite).

use crate::dictionary::{AtomDictionary, Nesting};
use serde::Serialize;

pub const INDENT: &str = "  ";

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LintRule {
    UnknownAtom,
    UnbalancedNesting,
    /// Indentation must use spaces only.
    IndentationSpacesOnly,
    IndentationDepth,
    NoTrailingWhitespace,
    /// Zero-argument atom written without `<>`.
    BareAtom,
}

/// A single lint message with location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintMessage {
    pub line: usize,
    pub column: usize,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

/// Statement text of a line with any `//` comment removed. Quotes are
/// respected so `"a // b"` stays intact.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '/' if !in_string && line[i..].starts_with("//") => return line[..i].trim_end(),
            _ => {}
        }
    }
    line.trim_end()
}

fn atom_name(content: &str) -> &str {
    let end = content
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(content.len());
    &content[..end]
}

fn is_bare(content: &str, name: &str) -> bool {
    content[name.len()..].trim().is_empty()
}

/// Run all lint rules. Returns messages in line order.
pub fn lint(source: &str, dict: &AtomDictionary) -> Vec<LintMessage> {
    let mut out = Vec::new();
    let mut depth: usize = 0;
    let mut opened: Vec<(usize, &str)> = Vec::new();
    let mut last_line = 0;

    for (i, line) in source.lines().enumerate() {
        let line_no = i + 1;
        last_line = line_no;

        if line != line.trim_end() {
            out.push(LintMessage {
                line: line_no,
                column: line.trim_end().chars().count() + 1,
                rule: LintRule::NoTrailingWhitespace,
                severity: Severity::Warning,
                message: "trailing whitespace not allowed".to_string(),
            });
        }

        let trimmed = line.trim_start();
        let leading = &line[..line.len() - trimmed.len()];
        let content = strip_comment(trimmed);
        if content.is_empty() || content.starts_with("<<") {
            continue;
        }

        if leading.contains('\t') {
            out.push(LintMessage {
                line: line_no,
                column: 1,
                rule: LintRule::IndentationSpacesOnly,
                severity: Severity::Error,
                message: "indentation must use spaces only (no tabs)".to_string(),
            });
        }

        let name = atom_name(content);
        let sig = dict.lookup(name);
        if sig.is_none() {
            let mut message = format!("unknown atom '{}'", name);
            if let Some(s) = dict.suggest(name) {
                message.push_str(&format!(" (did you mean '{}'?)", s));
            }
            out.push(LintMessage {
                line: line_no,
                column: leading.chars().count() + 1,
                rule: LintRule::UnknownAtom,
                severity: Severity::Error,
                message,
            });
        }
        let nesting = sig.map(|s| s.nesting).unwrap_or(Nesting::Flat);

        if nesting == Nesting::Close {
            if opened.pop().is_none() {
                out.push(LintMessage {
                    line: line_no,
                    column: leading.chars().count() + 1,
                    rule: LintRule::UnbalancedNesting,
                    severity: Severity::Error,
                    message: format!("'{}' closes nothing", name),
                });
            }
            depth = depth.saturating_sub(1);
        }

        let expected = depth * INDENT.len();
        let found = leading.chars().count();
        if found != expected {
            out.push(LintMessage {
                line: line_no,
                column: 1,
                rule: LintRule::IndentationDepth,
                severity: Severity::Warning,
                message: format!("expected {} space(s) at depth {} (found {})", expected, depth, found),
            });
        }

        if let Some(sig) = sig {
            if sig.arity() == 0 && is_bare(content, name) {
                out.push(LintMessage {
                    line: line_no,
                    column: leading.chars().count() + name.chars().count() + 1,
                    rule: LintRule::BareAtom,
                    severity: Severity::Warning,
                    message: format!("write '{} <>'", name),
                });
            }
        }

        if nesting == Nesting::Open {
            opened.push((line_no, name));
            depth += 1;
        }
    }

    for (line, name) in opened.into_iter().rev() {
        out.push(LintMessage {
            line: last_line,
            column: 1,
            rule: LintRule::UnbalancedNesting,
            severity: Severity::Error,
            message: format!("'{}' opened on line {} is never closed", name, line),
        });
    }
    out
}

/// Re-indent, strip trailing whitespace and add `<>` to bare zero-argument
/// atoms. Unknown atoms and nesting errors are left for the author.
pub fn lint_fix(source: &str, dict: &AtomDictionary) -> String {
    let mut depth: usize = 0;
    let mut out_lines: Vec<String> = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        let content = strip_comment(trimmed);
        if trimmed.is_empty() {
            out_lines.push(String::new());
            continue;
        }
        if content.starts_with("<<") {
            out_lines.push(trimmed.to_string());
            continue;
        }
        if content.is_empty() {
            out_lines.push(format!("{}{}", INDENT.repeat(depth), trimmed));
            continue;
        }

        let name = atom_name(content);
        let sig = dict.lookup(name);
        let nesting = sig.map(|s| s.nesting).unwrap_or(Nesting::Flat);
        if nesting == Nesting::Close {
            depth = depth.saturating_sub(1);
        }
        let text = match sig {
            Some(sig) if sig.arity() == 0 && is_bare(content, name) => {
                let rest = trimmed[name.len()..].trim_start();
                if rest.is_empty() {
                    format!("{} <>", name)
                } else {
                    format!("{} <> {}", name, rest)
                }
            }
            _ => trimmed.to_string(),
        };
        out_lines.push(format!("{}{}", INDENT.repeat(depth), text));
        if nesting == Nesting::Open {
            depth += 1;
        }
    }
    out_lines.join("\n") + "\n"
}
