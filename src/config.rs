//! Runtime configuration.
//!
//! The original tool recognized its knobs as preprocessor macros
//! (`MAP_CALLER_TO_CALLEE`, `TYPE_ELEVATION`, `FLOW_DIRECTION`,
//! `PARSE_VALUE_USES`, `FUNCTION_AS_TARGET_TYPE`, `UNROLL_LOOP_ONCE`) baked
//! in at compile time. They are collapsed here into one runtime record so a
//! host can vary them without recompiling the analysis.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rustc_hash::FxHashSet;

use crate::error::ConfigError;
use crate::hash::{hash_struct_name, TypeHash};

/// `ENABLE_MLTA`: which resolution strategy the MLTA phase uses for
/// indirect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MltaMode {
    /// `ENABLE_MLTA == 0`: signature match only, cached per call site.
    Fuzzy,
    /// `ENABLE_MLTA == 1`: signature match only, uncached.
    OneLayer,
    /// `ENABLE_MLTA >= 2`: climb composite-type layers.
    MultiLayer,
}

/// `TARGET_TYPE_POLICY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPolicy {
    /// Function types are the targets of interest (default).
    Function,
    /// Structs whose hashed name is in the configured critical set.
    Struct,
}

/// Two built-in critical-structure names the original tool hardcoded
/// alongside its config file (`struct.kernfs_node`, `struct.ksm_scan`),
/// kept here as an overridable *default*, not a hidden baseline — a caller
/// targeting a non-kernel codebase should pass an empty set instead.
pub const DEFAULT_CRITICAL_STRUCTS: &[&str] = &["kernfs_node", "ksm_scan"];

/// The single runtime configuration record replacing the original's
/// macro-gated behaviors.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub mlta_mode: MltaMode,
    /// `ENABLE_TYDM`: whether the TyPM phase runs at all.
    pub enable_typm: bool,
    /// `MAX_PHASE_CG`: total phase count, including the MLTA phase.
    pub max_phase_cg: u32,
    pub target_policy: TargetPolicy,
    /// `MAX_TYPE_LAYER`: bound on `nextLayerBaseType` climbing.
    pub max_type_layer: u32,
    /// `MAP_CALLER_TO_CALLEE`: also maintain the reverse `Callers` map.
    pub build_caller_map: bool,
    /// `TYPE_ELEVATION`: widen dependent-module queries to the outermost
    /// layer passing the externality check.
    pub type_elevation: bool,
    /// `FLOW_DIRECTION`: honor memory-effect summaries when deciding
    /// whether an argument/return edge is forward, reverse, or both.
    pub flow_direction: bool,
    /// `PARSE_VALUE_USES`: attempt precise def-use parsing before falling
    /// back to whole-argument-type propagation on an escape.
    pub parse_value_uses: bool,
    /// `UNROLL_LOOP_ONCE`: the original unrolled each loop once before
    /// scanning a function, to catch self-referential stores that only
    /// appear on a second iteration. The core here scans a flat
    /// instruction list with no block structure (control flow reasoning is
    /// out of scope), so this knob is retained for the host
    /// adapter building [`crate::ir::FunctionBody`] to honor, not for the
    /// core itself; default on to match the original.
    pub loop_unroll_once: bool,
    pub critical_structs: FxHashSet<TypeHash>,
    pub out_of_scope_funcs: HashSet<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mlta_mode: MltaMode::MultiLayer,
            enable_typm: true,
            max_phase_cg: 5,
            target_policy: TargetPolicy::Function,
            max_type_layer: 10,
            build_caller_map: false,
            type_elevation: true,
            flow_direction: true,
            parse_value_uses: true,
            loop_unroll_once: true,
            critical_structs: default_critical_struct_hashes(),
            out_of_scope_funcs: HashSet::new(),
        }
    }
}

fn default_critical_struct_hashes() -> FxHashSet<TypeHash> {
    DEFAULT_CRITICAL_STRUCTS
        .iter()
        .map(|name| hash_struct_name(name))
        .collect()
}

impl AnalysisConfig {
    /// Validate the numeric knobs; an invalid bound is a fatal configuration error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_phase_cg < 1 {
            return Err(ConfigError::InvalidPhaseBound {
                value: i64::from(self.max_phase_cg),
            });
        }
        Ok(())
    }

    /// Union in critical-structure names read from a plain-text file, one
    /// name per line (mirrors `LoadTargetTypes`): blank lines and
    /// single-character lines are skipped, and each surviving line is
    /// hashed as `"struct." + name`.
    pub fn load_critical_structs_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        for name in read_name_list(path)? {
            self.critical_structs.insert(hash_struct_name(&name));
        }
        Ok(())
    }

    /// Union in out-of-scope function names read from a plain-text file,
    /// one name per line (mirrors `LoadOutScopeFuncs`).
    pub fn load_out_of_scope_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        for name in read_name_list(path)? {
            self.out_of_scope_funcs.insert(name);
        }
        Ok(())
    }
}

/// Shared line-reading behavior for both config list files: blank lines and
/// single-character lines are skipped (the original's `line.length() > 1`
/// guard), everything else is trimmed of its trailing newline only — not
/// of surrounding whitespace, since struct and function names cannot
/// contain it.
fn read_name_list(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .map(str::trim_end)
        .filter(|line| line.len() > 1)
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rejects_zero_phase_bound() {
        let mut cfg = AnalysisConfig::default();
        cfg.max_phase_cg = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidPhaseBound { value: 0 })
        ));
    }

    #[test]
    fn default_accepts_its_own_defaults() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn default_critical_structs_are_present() {
        let cfg = AnalysisConfig::default();
        assert!(cfg.critical_structs.contains(&hash_struct_name("kernfs_node")));
    }

    #[test]
    fn name_list_skips_blank_and_single_char_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.txt");
        fs::write(&path, "foo\n\nb\nbar\n").unwrap();
        let names = read_name_list(&path).unwrap();
        assert_eq!(names, vec!["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn unreadable_file_is_fatal() {
        let mut cfg = AnalysisConfig::default();
        let err = cfg.load_out_of_scope_file("/nonexistent/path/does-not-exist").unwrap_err();
        assert!(matches!(err, ConfigError::UnreadableFile { .. }));
    }
}
