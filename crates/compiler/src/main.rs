//! FasterBASIC compiler CLI
//!
//! Command-line interface for compiling `.bas` programs to QBE IR,
//! assembly, or executables, and for front-end-only checking.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use fbc::{CompilerConfig, EmitMode};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "fbc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "FasterBASIC compiler - compile .bas programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .bas file
    Build {
        /// Input .bas source file
        input: PathBuf,

        /// Output path (defaults to the input filename without .bas)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after emitting QBE IR text (.ssa)
        #[arg(long)]
        emit_ir: bool,

        /// Stop after the backend produces assembly (.s)
        #[arg(long)]
        emit_asm: bool,

        /// Keep intermediate files (.ssa/.s) next to the output
        #[arg(long)]
        keep_ir: bool,

        /// Trace per-phase timings and emitted symbol counts
        #[arg(short, long)]
        verbose: bool,

        /// Warn on MATCH TYPE statements with uncovered runtime tags
        #[arg(long)]
        strict: bool,

        /// Stop at the first error instead of accumulating diagnostics
        #[arg(long)]
        fail_fast: bool,

        /// Compiler configuration file (TOML)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Parse and type-check without generating code
    Check {
        /// Input .bas source file
        input: PathBuf,

        /// Trace per-phase timings
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fbc=debug")),
            )
            .with_writer(io::stderr)
            .init();
    }
}

fn load_config(
    path: Option<&PathBuf>,
    strict: bool,
    fail_fast: bool,
) -> Result<CompilerConfig, String> {
    let base = match path {
        Some(p) => CompilerConfig::load(p)?,
        None => CompilerConfig::default(),
    };
    let strict = strict || base.strict_match_type;
    let fail_fast = fail_fast || base.fail_fast;
    Ok(base.with_strict_match_type(strict).with_fail_fast(fail_fast))
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            input,
            output,
            emit_ir,
            emit_asm,
            keep_ir,
            verbose,
            strict,
            fail_fast,
            config,
        } => {
            init_tracing(verbose);
            let config = match load_config(config.as_ref(), strict, fail_fast) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: {}", e);
                    process::exit(2);
                }
            };
            let mode = if emit_ir {
                EmitMode::Ir
            } else if emit_asm {
                EmitMode::Asm
            } else {
                EmitMode::Exe
            };
            match fbc::compile_file(&input, output.as_deref(), mode, keep_ir, &config) {
                Ok(artifact) => {
                    if verbose {
                        eprintln!("wrote {}", artifact.display());
                    }
                }
                Err(msg) => {
                    eprint!("{}", msg);
                    if !msg.ends_with('\n') {
                        eprintln!();
                    }
                    // Toolchain failures exit 2, compile errors exit 1
                    let code = if msg.contains("qbe") || msg.contains("cc failed") {
                        2
                    } else {
                        1
                    };
                    process::exit(code);
                }
            }
        }
        Commands::Check { input, verbose } => {
            init_tracing(verbose);
            let source = match std::fs::read_to_string(&input) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("error: failed to read {}: {}", input.display(), e);
                    process::exit(2);
                }
            };
            let diags = fbc::check_source(&source, &CompilerConfig::default());
            let mut failed = false;
            for d in &diags {
                eprintln!("{}", d);
                if d.severity == fbc::Severity::Error {
                    failed = true;
                }
            }
            if failed {
                process::exit(1);
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }
}
