//! Compiler configuration
//!
//! Options the driver (or an embedding tool) hands to the pipeline.
//! Loadable from TOML so build scripts can keep a `fbc.toml` next to
//! their sources.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Error cap before diagnostics are dropped and phases stop early
    pub max_errors: usize,
    /// Stop at the first error-severity diagnostic
    pub fail_fast: bool,
    /// Warn when a MATCH TYPE covers only some runtime tags and has no
    /// CASE ELSE
    pub strict_match_type: bool,
    /// Treat every translation unit as if it started with OPTION EXPLICIT
    pub option_explicit: bool,
    /// Emit `samm_set_stats(1)` in the program prologue so the runtime
    /// reports allocation statistics at exit
    pub samm_stats: bool,
    /// Informational target triple recorded in the IR header comment
    pub target_triple: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_errors: 20,
            fail_fast: false,
            strict_match_type: false,
            option_explicit: false,
            samm_stats: false,
            target_triple: None,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_max_errors(mut self, n: usize) -> Self {
        self.max_errors = n;
        self
    }

    pub fn with_fail_fast(mut self, on: bool) -> Self {
        self.fail_fast = on;
        self
    }

    pub fn with_strict_match_type(mut self, on: bool) -> Self {
        self.strict_match_type = on;
        self
    }

    pub fn with_option_explicit(mut self, on: bool) -> Self {
        self.option_explicit = on;
        self
    }

    pub fn with_samm_stats(mut self, on: bool) -> Self {
        self.samm_stats = on;
        self
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("failed to parse compiler config: {}", e))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = CompilerConfig::default();
        assert_eq!(c.max_errors, 20);
        assert!(!c.fail_fast);
        assert!(!c.option_explicit);
    }

    #[test]
    fn test_builder() {
        let c = CompilerConfig::new()
            .with_fail_fast(true)
            .with_max_errors(5)
            .with_strict_match_type(true);
        assert!(c.fail_fast);
        assert_eq!(c.max_errors, 5);
        assert!(c.strict_match_type);
    }

    #[test]
    fn test_from_toml() {
        let c = CompilerConfig::from_toml(
            "max_errors = 3\nfail_fast = true\nsamm_stats = true\n",
        )
        .unwrap();
        assert_eq!(c.max_errors, 3);
        assert!(c.fail_fast);
        assert!(c.samm_stats);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(CompilerConfig::from_toml("bogus = 1\n").is_err());
    }
}
