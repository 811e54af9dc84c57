//! Evaluation-trace loading.
//!
//! The trace file itself is ground truth for a *precision reporter* this
//! crate does not implement — ground-truth trace loading and precision
//! reporting are out of scope, treated as an external collaborator. What
//! the core's contract with that reporter actually is: a stable, parsed
//! shape the reporter can
//! compare against resolved [`crate::callgraph::CallGraph`] output. This
//! module is that parser, nothing more — `CALLER:`/`CALLEE:` line pairing,
//! matching the original tool's `LoadTraces`.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// A `path:line` pair as it appears in a trace file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
}

/// One observed caller/callee pair from a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEdge {
    pub caller: SourceLocation,
    pub callee: SourceLocation,
}

/// Parse a trace file's contents.
///
/// Each `CALLER: path:line` line sets the current caller location. Each
/// `CALLEE: path:line` line pairs with the most recently seen `CALLER:`
/// line; a `CALLEE:` line seen before any `CALLER:` line is dropped (no
/// caller to pair it with), not an error — the original silently skips it
/// via a sentinel "no caller yet" state. Any other non-blank line is a
/// malformed trace line (fatal).
pub fn parse_traces(contents: &str) -> Result<Vec<TraceEdge>, ConfigError> {
    let mut edges = Vec::new();
    let mut current_caller: Option<SourceLocation> = None;

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("CALLER:") {
            current_caller = Some(parse_location(rest, idx + 1, raw_line)?);
        } else if let Some(rest) = line.strip_prefix("CALLEE:") {
            let callee = parse_location(rest, idx + 1, raw_line)?;
            if let Some(caller) = &current_caller {
                edges.push(TraceEdge {
                    caller: caller.clone(),
                    callee,
                });
            }
        } else {
            return Err(ConfigError::MalformedTraceLine {
                line_no: idx + 1,
                text: raw_line.to_string(),
            });
        }
    }

    Ok(edges)
}

fn parse_location(rest: &str, line_no: usize, raw_line: &str) -> Result<SourceLocation, ConfigError> {
    let rest = rest.trim();
    let (path, line_str) = rest.rsplit_once(':').ok_or_else(|| ConfigError::MalformedTraceLine {
        line_no,
        text: raw_line.to_string(),
    })?;
    let line: u32 = line_str.trim().parse().map_err(|_| ConfigError::MalformedTraceLine {
        line_no,
        text: raw_line.to_string(),
    })?;
    Ok(SourceLocation {
        path: path.trim().to_string(),
        line,
    })
}

/// Read and parse a trace file from disk.
pub fn load_traces(path: impl AsRef<Path>) -> Result<Vec<TraceEdge>, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_traces(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_callee_with_most_recent_caller() {
        let edges = parse_traces("CALLER: a.c:10\nCALLEE: b.c:20\nCALLEE: c.c:30\n").unwrap();
        assert_eq!(
            edges,
            vec![
                TraceEdge {
                    caller: SourceLocation { path: "a.c".into(), line: 10 },
                    callee: SourceLocation { path: "b.c".into(), line: 20 },
                },
                TraceEdge {
                    caller: SourceLocation { path: "a.c".into(), line: 10 },
                    callee: SourceLocation { path: "c.c".into(), line: 30 },
                },
            ]
        );
    }

    #[test]
    fn callee_before_any_caller_is_dropped_not_an_error() {
        let edges = parse_traces("CALLEE: b.c:20\nCALLER: a.c:10\nCALLEE: c.c:30\n").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].callee.path, "c.c");
    }

    #[test]
    fn unrecognized_line_is_malformed() {
        let err = parse_traces("CALLER: a.c:10\nnonsense\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedTraceLine { line_no: 2, .. }));
    }

    #[test]
    fn non_numeric_line_number_is_malformed() {
        let err = parse_traces("CALLER: a.c:oops\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedTraceLine { .. }));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let edges = parse_traces("\nCALLER: a.c:1\n\nCALLEE: b.c:2\n\n").unwrap();
        assert_eq!(edges.len(), 1);
    }
}
