//! Compile-time diagnostics
//!
//! Every phase reports problems through a shared [`DiagnosticSink`]. The sink
//! enforces the error cap and the fail-fast policy; phases keep going after
//! recoverable errors so a single run surfaces as much as possible.

use std::fmt;

/// A position in the source text. Lines and columns are 1-indexed for
/// display; column 0 means "whole line".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub fn new(line: u32, col: u32) -> Self {
        SourceLoc { line, col }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col == 0 {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "line {}:{}", self.line, self.col)
        }
    }
}

/// Category of a compile-time diagnostic.
///
/// Lex/Syntax come from the front end, Type/Resolution/Semantic from
/// analysis, Codegen marks internal invariant violations (compiler bugs,
/// not user errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagCategory {
    Lex,
    Syntax,
    Type,
    Resolution,
    Semantic,
    Codegen,
}

impl fmt::Display for DiagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagCategory::Lex => "lex error",
            DiagCategory::Syntax => "syntax error",
            DiagCategory::Type => "type error",
            DiagCategory::Resolution => "resolution error",
            DiagCategory::Semantic => "semantic error",
            DiagCategory::Codegen => "codegen error",
        };
        f.write_str(s)
    }
}

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic with location, message, and optional remediation hint.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub category: DiagCategory,
    pub severity: Severity,
    pub loc: SourceLoc,
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{}: {} ({}): {}",
            self.loc, sev, self.category, self.message
        )?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Collects diagnostics across phases.
///
/// `max_errors` caps how many error-severity diagnostics are recorded before
/// [`DiagnosticSink::at_cap`] starts returning true; warnings never count
/// against the cap.
#[derive(Debug)]
pub struct DiagnosticSink {
    diags: Vec<Diagnostic>,
    error_count: usize,
    max_errors: usize,
    fail_fast: bool,
}

impl DiagnosticSink {
    pub fn new(max_errors: usize, fail_fast: bool) -> Self {
        DiagnosticSink {
            diags: Vec::new(),
            error_count: 0,
            max_errors,
            fail_fast,
        }
    }

    pub fn error(&mut self, category: DiagCategory, loc: SourceLoc, message: impl Into<String>) {
        self.push(Diagnostic {
            category,
            severity: Severity::Error,
            loc,
            message: message.into(),
            hint: None,
        });
    }

    pub fn error_with_hint(
        &mut self,
        category: DiagCategory,
        loc: SourceLoc,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.push(Diagnostic {
            category,
            severity: Severity::Error,
            loc,
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn warning(&mut self, category: DiagCategory, loc: SourceLoc, message: impl Into<String>) {
        self.push(Diagnostic {
            category,
            severity: Severity::Warning,
            loc,
            message: message.into(),
            hint: None,
        });
    }

    /// Record a diagnostic built elsewhere (e.g. by the lexer).
    pub fn report(&mut self, diag: Diagnostic) {
        self.push(diag);
    }

    fn push(&mut self, diag: Diagnostic) {
        if diag.severity == Severity::Error {
            if self.error_count >= self.max_errors {
                return;
            }
            self.error_count += 1;
        }
        self.diags.push(diag);
    }

    /// True when the error cap is reached or fail-fast saw its first error.
    /// Phases poll this at statement boundaries and stop early.
    pub fn at_cap(&self) -> bool {
        self.error_count >= self.max_errors || (self.fail_fast && self.error_count > 0)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diags
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        DiagnosticSink::new(20, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_cap() {
        let mut sink = DiagnosticSink::new(2, false);
        sink.error(DiagCategory::Syntax, SourceLoc::new(1, 1), "first");
        assert!(!sink.at_cap());
        sink.error(DiagCategory::Syntax, SourceLoc::new(2, 1), "second");
        assert!(sink.at_cap());
        sink.error(DiagCategory::Syntax, SourceLoc::new(3, 1), "dropped");
        assert_eq!(sink.error_count(), 2);
        assert_eq!(sink.diagnostics().len(), 2);
    }

    #[test]
    fn test_warnings_do_not_count_against_cap() {
        let mut sink = DiagnosticSink::new(1, false);
        sink.warning(DiagCategory::Semantic, SourceLoc::new(1, 1), "w1");
        sink.warning(DiagCategory::Semantic, SourceLoc::new(2, 1), "w2");
        assert!(!sink.has_errors());
        assert!(!sink.at_cap());
        assert_eq!(sink.diagnostics().len(), 2);
    }

    #[test]
    fn test_fail_fast() {
        let mut sink = DiagnosticSink::new(20, true);
        assert!(!sink.at_cap());
        sink.error(DiagCategory::Type, SourceLoc::new(5, 3), "mismatch");
        assert!(sink.at_cap());
    }

    #[test]
    fn test_display_with_hint() {
        let mut sink = DiagnosticSink::default();
        sink.error_with_hint(
            DiagCategory::Type,
            SourceLoc::new(7, 12),
            "cannot assign DOUBLE to INTEGER",
            "use INT() to truncate explicitly",
        );
        let rendered = sink.diagnostics()[0].to_string();
        assert!(rendered.contains("line 7:12"));
        assert!(rendered.contains("type error"));
        assert!(rendered.contains("hint: use INT()"));
    }
}
