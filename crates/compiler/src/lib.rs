//! FasterBASIC compiler library
//!
//! Compiles a single `.bas` translation unit to SSA IR text in the QBE
//! format, and optionally drives `qbe` plus the system C compiler to
//! produce assembly or an executable linked against the `fbrt` runtime.
//!
//! # Pipeline
//!
//! ```text
//! source text
//!   -> lexer      (token stream)
//!   -> parser     (arena AST)
//!   -> semantics  (symbol table + per-expression types)
//!   -> cfg        (basic blocks with typed edges, RPO)
//!   -> codegen    (QBE IR text)
//! ```
//!
//! Each phase produces an immutable artifact consumed by the next; the
//! compiler itself is single-threaded and stateless between invocations.

pub mod ast;
pub mod cfg;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod semantics;
pub mod symbols;
pub mod types;

pub use codegen::CodeGen;
pub use config::CompilerConfig;
pub use diagnostics::{DiagCategory, Diagnostic, DiagnosticSink, Severity, SourceLoc};
pub use parser::Parser;
pub use semantics::{Analysis, analyze};
pub use types::{BaseType, TypeDesc};

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::debug;

/// Result of a successful compilation: the IR text plus any warnings.
#[derive(Debug)]
pub struct Compilation {
    pub ir: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// What the driver should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    /// QBE IR text (`.ssa`)
    Ir,
    /// Assembly via `qbe` (`.s`)
    Asm,
    /// Executable via `qbe` + the system C compiler
    Exe,
}

/// Compile source text to IR. On failure returns every diagnostic
/// collected up to the phase that stopped the pipeline.
pub fn compile_source(
    source: &str,
    config: &CompilerConfig,
) -> Result<Compilation, Vec<Diagnostic>> {
    let mut sink = DiagnosticSink::new(config.max_errors, config.fail_fast);

    let t0 = Instant::now();
    let parser = Parser::new(source, &mut sink);
    let (ast, program) = parser.parse();
    debug!(
        stmts = ast.stmt_count(),
        exprs = ast.expr_count(),
        elapsed_us = t0.elapsed().as_micros() as u64,
        "parse complete"
    );
    if sink.has_errors() {
        return Err(sink.into_diagnostics());
    }

    let t1 = Instant::now();
    let analysis = analyze(&ast, &program, config, &mut sink);
    debug!(
        globals = analysis.symbols.globals.len(),
        functions = analysis.symbols.functions.len(),
        classes = analysis.symbols.classes.len(),
        elapsed_us = t1.elapsed().as_micros() as u64,
        "semantic analysis complete"
    );
    if sink.has_errors() {
        return Err(sink.into_diagnostics());
    }

    let t2 = Instant::now();
    let cfgs = cfg::build_cfgs(&ast, &program, &mut sink);
    debug!(
        main_blocks = cfgs.main.blocks.len(),
        functions = cfgs.funcs.len(),
        elapsed_us = t2.elapsed().as_micros() as u64,
        "CFG construction complete"
    );
    if sink.has_errors() {
        return Err(sink.into_diagnostics());
    }

    let t3 = Instant::now();
    let mut codegen = CodeGen::new(&ast, &analysis, config);
    let ir = match codegen.emit_program(&cfgs) {
        Ok(ir) => ir,
        Err(e) => {
            sink.error(
                DiagCategory::Codegen,
                SourceLoc::default(),
                format!("internal: {}", e),
            );
            return Err(sink.into_diagnostics());
        }
    };
    debug!(
        ir_bytes = ir.len(),
        elapsed_us = t3.elapsed().as_micros() as u64,
        "IR emission complete"
    );

    Ok(Compilation {
        ir,
        diagnostics: sink.into_diagnostics(),
    })
}

/// Run the front end only (parse + semantic analysis), collecting
/// diagnostics without emitting IR.
pub fn check_source(source: &str, config: &CompilerConfig) -> Vec<Diagnostic> {
    let mut sink = DiagnosticSink::new(config.max_errors, config.fail_fast);
    let parser = Parser::new(source, &mut sink);
    let (ast, program) = parser.parse();
    if !sink.has_errors() {
        let _ = analyze(&ast, &program, config, &mut sink);
    }
    sink.into_diagnostics()
}

/// Cache for the qbe availability probe; it only runs once per process.
static QBE_CHECKED: OnceLock<Result<(), String>> = OnceLock::new();

/// Check that the `qbe` backend is on PATH before shelling out to it.
fn check_qbe() -> Result<(), String> {
    QBE_CHECKED
        .get_or_init(|| {
            match Command::new("qbe").arg("-h").output() {
                Ok(_) => Ok(()),
                Err(e) => Err(format!(
                    "failed to run qbe: {}. Install qbe or use --emit-ir.",
                    e
                )),
            }
        })
        .clone()
}

/// Compile a `.bas` file to the requested artifact. `keep_ir` leaves the
/// intermediate `.ssa` beside the output when producing asm/executables.
pub fn compile_file(
    input: &Path,
    output: Option<&Path>,
    mode: EmitMode,
    keep_ir: bool,
    config: &CompilerConfig,
) -> Result<PathBuf, String> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("failed to read {}: {}", input.display(), e))?;

    let compilation = compile_source(&source, config).map_err(|diags| {
        let mut msg = String::new();
        for d in &diags {
            msg.push_str(&d.to_string());
            msg.push('\n');
        }
        msg
    })?;
    for d in &compilation.diagnostics {
        eprintln!("{}", d);
    }

    let stem = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension(""));

    let ir_path = stem.with_extension("ssa");
    fs::write(&ir_path, &compilation.ir)
        .map_err(|e| format!("failed to write {}: {}", ir_path.display(), e))?;
    if mode == EmitMode::Ir {
        return Ok(ir_path);
    }

    check_qbe()?;
    let asm_path = stem.with_extension("s");
    let status = Command::new("qbe")
        .arg("-o")
        .arg(&asm_path)
        .arg(&ir_path)
        .status()
        .map_err(|e| format!("failed to run qbe: {}", e))?;
    if !status.success() {
        return Err(format!("qbe failed with exit code {:?}", status.code()));
    }
    if mode == EmitMode::Asm {
        if !keep_ir {
            let _ = fs::remove_file(&ir_path);
        }
        return Ok(asm_path);
    }

    let exe_path = stem.clone();
    let status = Command::new("cc")
        .arg("-o")
        .arg(&exe_path)
        .arg(&asm_path)
        .args(["-lfbrt", "-lpthread", "-lm"])
        .status()
        .map_err(|e| format!("failed to run cc: {}", e))?;
    if !status.success() {
        return Err(format!("cc failed with exit code {:?}", status.code()));
    }
    if !keep_ir {
        let _ = fs::remove_file(&ir_path);
        let _ = fs::remove_file(&asm_path);
    }
    Ok(exe_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_produces_ir() {
        let result = compile_source("PRINT \"hi\"\nEND\n", &CompilerConfig::default());
        let compilation = result.expect("compilation failed");
        assert!(compilation.ir.contains("export function w $main()"));
        assert!(compilation.diagnostics.is_empty());
    }

    #[test]
    fn test_compile_source_reports_type_errors() {
        let result = compile_source(
            "DIM n AS INTEGER\nn = 1.5\nEND\n",
            &CompilerConfig::default(),
        );
        let diags = result.err().expect("expected failure");
        assert!(diags.iter().any(|d| d.category == DiagCategory::Type));
    }

    #[test]
    fn test_compile_source_accumulates_multiple_errors() {
        let result = compile_source("PRINT )\nPRINT (\nEND\n", &CompilerConfig::default());
        let diags = result.err().expect("expected failure");
        assert!(diags.len() >= 2);
    }

    #[test]
    fn test_fail_fast_stops_at_first_error() {
        let config = CompilerConfig::new().with_fail_fast(true);
        let result = compile_source("PRINT )\nPRINT (\nEND\n", &config);
        let diags = result.err().expect("expected failure");
        assert_eq!(
            diags
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .count(),
            1
        );
    }

    #[test]
    fn test_check_source_front_end_only() {
        let diags = check_source("GOTO Nowhere\n", &CompilerConfig::default());
        // Label resolution happens during CFG construction, which check
        // skips; the front end itself is clean here
        assert!(diags.iter().all(|d| d.severity != Severity::Error));

        let diags = check_source("PRINT missing_fn(1)\n", &CompilerConfig::default());
        assert!(diags.iter().any(|d| d.category == DiagCategory::Resolution));
    }

    #[test]
    fn test_compile_file_emits_ir_file() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("hello.bas");
        fs::write(&src_path, "PRINT \"hi\"\nEND\n").unwrap();
        let out = compile_file(
            &src_path,
            None,
            EmitMode::Ir,
            false,
            &CompilerConfig::default(),
        )
        .expect("compile_file failed");
        assert_eq!(out.extension().unwrap(), "ssa");
        let ir = fs::read_to_string(out).unwrap();
        assert!(ir.contains("$main"));
    }
}
