//! Diagnostics.
//!
//! The core recovers nothing: any error is carried outward as a boxed
//! [`Diagnostic`] through [`CompileResult`] and rendered once by the driver.
//! Error kinds are distinct variants, not strings; the renderer is the only
//! place that turns them into text. Every diagnostic captures the active
//! source location and the compile-context stack (the in-progress overloaded
//! calls) at the moment it is constructed.

use std::fmt;

use strum::IntoStaticStr;

use crate::source::{Location, SourceMap};

pub type CompileResult<T> = Result<T, Box<Diagnostic>>;

/// One frame of the compile-context stack: an overloaded call or resolution
/// in progress, already rendered to `callable(type, type, ...)` form.
#[derive(Debug, Clone)]
pub struct ContextFrame {
    pub description: String,
    pub location: Option<Location>,
}

/// A single per-overload failure inside a [`DiagnosticKind::Match`] report.
#[derive(Debug, Clone)]
pub struct MatchFailureNote {
    /// The overload, rendered as `target(patterns)` with its definition site.
    pub overload: String,
    /// The specific reason this overload did not match.
    pub reason: String,
    /// True when every formal arg of the overload is an unconstrained
    /// pattern variable; such candidates are elided from the default report.
    pub universal: bool,
}

#[derive(Debug, Clone, IntoStaticStr)]
pub enum DiagnosticKind {
    /// Ungrammatical byte in the lexer; the message names the byte class.
    Lex { message: String },
    /// Parser found something other than what the grammar requires.
    Parse { expected: String, found: String },
    /// Name lookup failed in some scope.
    Lookup { name: String },
    /// Module could not be loaded, or module initialization cycled.
    Import {
        module: String,
        searched: Vec<String>,
        cycle: Vec<String>,
    },
    /// No overload accepted a call; carries one note per candidate tried.
    Match {
        callable: String,
        failures: Vec<MatchFailureNote>,
        /// Interface overloads fail hard and are reported distinctly.
        interface_violation: bool,
    },
    /// Several overloads matched and none is strictly more specific.
    AmbiguousMatch {
        callable: String,
        candidates: Vec<String>,
    },
    /// Wrong kind of object or type for an operation.
    TypeMismatch {
        context: String,
        expected: String,
        actual: String,
    },
    /// Compile-time evaluation hit an unsupported construct or a domain
    /// error on constants (division by zero, out-of-range conversion...).
    Eval { message: String },
    /// A cycle in type definitions, module initialization, global-variable
    /// analysis, or invoke-entry analysis.
    Recursion { what: String },
    StaticAssert { expression: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: Option<Location>,
    pub context: Vec<ContextFrame>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, location: Option<Location>) -> Box<Self> {
        Box::new(Self {
            kind,
            location,
            context: Vec::new(),
        })
    }

    /// Short classification name, used by tests and the match-log facility.
    pub fn kind_name(&self) -> &'static str {
        (&self.kind).into()
    }

    /// Renders the full report: caret excerpt, message, and the compile
    /// context, innermost call last.
    pub fn render(&self, sources: &SourceMap, full_match_errors: bool) -> String {
        let mut out = String::new();
        if let Some(location) = self.location {
            out.push_str(&sources.excerpt(location));
            out.push('\n');
            out.push_str(&sources.describe(location));
            out.push_str(": ");
        }
        out.push_str("error: ");
        self.render_message(&mut out, full_match_errors);
        if !self.context.is_empty() {
            out.push_str("\ncompilation context:\n");
            for frame in self.context.iter().rev() {
                out.push_str("  ");
                out.push_str(&frame.description);
                out.push('\n');
            }
        }
        out
    }

    fn render_message(&self, out: &mut String, full_match_errors: bool) {
        match &self.kind {
            DiagnosticKind::Lex { message } => out.push_str(message),
            DiagnosticKind::Parse { expected, found } => {
                out.push_str(&format!("expected {expected}, found {found}"));
            }
            DiagnosticKind::Lookup { name } => {
                out.push_str(&format!("undefined name: {name}"));
            }
            DiagnosticKind::Import {
                module,
                searched,
                cycle,
            } => {
                if cycle.is_empty() {
                    out.push_str(&format!("module not found: {module}"));
                    if !searched.is_empty() {
                        out.push_str(&format!(" (searched: {})", searched.join(", ")));
                    }
                } else {
                    out.push_str(&format!(
                        "circular module initialization: {}",
                        cycle.join(" -> ")
                    ));
                }
            }
            DiagnosticKind::Match {
                callable,
                failures,
                interface_violation,
            } => {
                if *interface_violation {
                    out.push_str(&format!("interface violation calling {callable}"));
                } else {
                    out.push_str(&format!("no matching operation: {callable}"));
                }
                let mut elided = 0usize;
                for note in failures {
                    if note.universal && !full_match_errors {
                        elided += 1;
                        continue;
                    }
                    out.push_str(&format!("\n  {}: {}", note.overload, note.reason));
                }
                if elided > 0 {
                    out.push_str(&format!(
                        "\n  ({elided} universally-quantified candidate(s) elided; \
                         pass the full match-error flag to show them)"
                    ));
                }
            }
            DiagnosticKind::AmbiguousMatch {
                callable,
                candidates,
            } => {
                out.push_str(&format!("ambiguous call to {callable}; candidates:"));
                for c in candidates {
                    out.push_str(&format!("\n  {c}"));
                }
            }
            DiagnosticKind::TypeMismatch {
                context,
                expected,
                actual,
            } => {
                out.push_str(&format!("{context}: expected {expected}, got {actual}"));
            }
            DiagnosticKind::Eval { message } => out.push_str(message),
            DiagnosticKind::Recursion { what } => {
                out.push_str(&format!("recursion detected in {what}"));
            }
            DiagnosticKind::StaticAssert {
                expression,
                message,
            } => {
                if message.is_empty() {
                    out.push_str(&format!("static assertion failed: {expression}"));
                } else {
                    out.push_str(&format!(
                        "static assertion failed: {expression}: {message}"
                    ));
                }
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render_message(&mut out, true);
        f.write_str(&out)
    }
}
