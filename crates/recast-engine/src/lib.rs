//! Mutation engine: the closed strategy set, applicability predicates, pure
//! structural transforms, and the machinery that turns a transform into a
//! staged artifact plus a unified diff.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod diff;
pub mod log;
pub mod shape;
pub mod stage;

pub use diff::{apply_unified_diff, unified_diff};
pub use log::{diff_reference, MutationDraft, MutationLog, MutationRecord};
pub use shape::{FunctionShape, MarkerLine, SourceShape, COMPLETION_ANNOTATION};
pub use stage::{MutationWorkspace, StagedArtifact};

const DOCSTRING_PLACEHOLDER: &str = "\"\"\"TODO: describe this function.\"\"\"";

/// The fixed mutation strategy set, in priority order: the most invasive,
/// highest-risk-reduction strategy first. Adding a variant is a
/// compile-checked exhaustiveness change.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    FunctionSplit,
    TodoCompletionMarker,
    DocstringInsertion,
}

impl Strategy {
    pub const PRIORITY: [Strategy; 3] = [
        Strategy::FunctionSplit,
        Strategy::TodoCompletionMarker,
        Strategy::DocstringInsertion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FunctionSplit => "function_split",
            Strategy::TodoCompletionMarker => "todo_completion_marker",
            Strategy::DocstringInsertion => "docstring_insertion",
        }
    }

    /// Structural precondition for the strategy, evaluated on the parsed
    /// shape of a file.
    pub fn applicable(&self, shape: &SourceShape, options: &EngineOptions) -> bool {
        match self {
            Strategy::FunctionSplit => shape
                .oversized_function(options.split_min_body_lines)
                .is_some(),
            Strategy::TodoCompletionMarker => shape.unannotated_markers().next().is_some(),
            Strategy::DocstringInsertion => shape.undocumented_function().is_some(),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineOptions {
    /// A function body must strictly exceed this many lines before
    /// FunctionSplit applies.
    pub split_min_body_lines: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            split_min_body_lines: 10,
        }
    }
}

/// Outcome of one attempted mutation. Immutable once constructed; failures
/// carry a diagnostic instead of aborting the batch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MutationResult {
    pub path: String,
    pub strategy: Strategy,
    pub success: bool,
    /// Mutated full-file text, present on success.
    pub mutated: Option<String>,
    /// Unified diff against the original, empty on failure.
    pub diff: String,
    pub description: String,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub mutated: String,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("strategy {0} is not applicable to this file")]
    StrategyNotApplicable(Strategy),
    #[error("transform failed: {0}")]
    Transform(String),
    #[error("patch apply failed: {0}")]
    PatchApply(String),
    #[error("path escapes the mutation workspace: {0}")]
    PathViolation(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("mutation log corrupt: {0}")]
    LogCorrupt(String),
}

/// Apply `strategy` to `source`, re-validating applicability first (selection
/// and application may race against an edited file, so the predicate is
/// checked again here).
pub fn apply_mutation(
    path: &str,
    source: &str,
    strategy: Strategy,
    options: &EngineOptions,
) -> MutationResult {
    match try_apply(source, strategy, options) {
        Ok(applied) => MutationResult {
            path: path.to_string(),
            strategy,
            success: true,
            diff: unified_diff(source, &applied.mutated),
            mutated: Some(applied.mutated),
            description: applied.description,
            error: None,
        },
        Err(err) => MutationResult {
            path: path.to_string(),
            strategy,
            success: false,
            mutated: None,
            diff: String::new(),
            description: String::new(),
            error: Some(err.to_string()),
        },
    }
}

/// The transform itself: pure text to text, no side effects.
pub fn try_apply(
    source: &str,
    strategy: Strategy,
    options: &EngineOptions,
) -> Result<Applied, EngineError> {
    let shape = SourceShape::parse(source);
    if !strategy.applicable(&shape, options) {
        return Err(EngineError::StrategyNotApplicable(strategy));
    }
    match strategy {
        Strategy::DocstringInsertion => insert_docstring(source, &shape),
        Strategy::TodoCompletionMarker => annotate_markers(source, &shape),
        Strategy::FunctionSplit => split_function(source, &shape, options),
    }
}

/// Insert a placeholder doc block beneath the first undocumented function's
/// signature. Re-running on the result is rejected by the predicate only
/// when every function ends up documented; idempotence over a single
/// function is guaranteed because the placeholder itself counts as a
/// docstring.
fn insert_docstring(source: &str, shape: &SourceShape) -> Result<Applied, EngineError> {
    let target = shape
        .undocumented_function()
        .ok_or(EngineError::StrategyNotApplicable(Strategy::DocstringInsertion))?;
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let body_indent = if target.body_start < target.body_end {
        indent_of(&lines[target.body_start])
    } else {
        return Err(EngineError::Transform(format!(
            "function {} has no body to document",
            target.name
        )));
    };
    lines.insert(
        target.body_start,
        format!("{}{}", " ".repeat(body_indent), DOCSTRING_PLACEHOLDER),
    );
    Ok(Applied {
        mutated: rejoin(lines, source),
        description: format!("inserted placeholder docstring into {}", target.name),
    })
}

/// Append the completion annotation to every unannotated marker line. The
/// original marker text is kept verbatim and no other line moves.
fn annotate_markers(source: &str, shape: &SourceShape) -> Result<Applied, EngineError> {
    let targets: Vec<usize> = shape.unannotated_markers().map(|m| m.line).collect();
    if targets.is_empty() {
        return Err(EngineError::StrategyNotApplicable(
            Strategy::TodoCompletionMarker,
        ));
    }
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    for index in &targets {
        let line = lines.get_mut(*index).ok_or_else(|| {
            EngineError::Transform(format!("marker line {index} out of range"))
        })?;
        line.push_str("  ");
        line.push_str(COMPLETION_ANNOTATION);
    }
    Ok(Applied {
        mutated: rejoin(lines, source),
        description: format!("annotated {} debt marker(s)", targets.len()),
    })
}

/// Move the oversized function's body into a helper and call it. The
/// original signature is untouched and the single `return helper(args)`
/// preserves the result path; the helper receives every original parameter,
/// so the extracted block references nothing it is not given.
fn split_function(
    source: &str,
    shape: &SourceShape,
    options: &EngineOptions,
) -> Result<Applied, EngineError> {
    let target = shape
        .oversized_function(options.split_min_body_lines)
        .ok_or(EngineError::StrategyNotApplicable(Strategy::FunctionSplit))?;
    for param in &target.params {
        if param.is_empty() || !param.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(EngineError::Transform(format!(
                "cannot split {}: unparseable parameter {param:?}",
                target.name
            )));
        }
    }
    let helper_name = format!("_{}_impl", target.name);
    if shape.functions.iter().any(|f| f.name == helper_name) {
        return Err(EngineError::Transform(format!(
            "cannot split {}: helper {helper_name} already exists",
            target.name
        )));
    }

    let lines: Vec<&str> = source.lines().collect();
    let pad = " ".repeat(target.indent);
    let body_pad = " ".repeat(indent_of(lines[target.body_start]));
    let call_args = target.params.join(", ");

    let mut mutated: Vec<String> = Vec::with_capacity(lines.len() + 4);
    mutated.extend(lines[..=target.signature_line].iter().map(|l| l.to_string()));
    mutated.push(format!("{body_pad}\"\"\"Delegates to {helper_name}().\"\"\""));
    mutated.push(format!("{body_pad}return {helper_name}({call_args})"));
    mutated.extend(lines[target.body_end..].iter().map(|l| l.to_string()));
    if !mutated.last().map(|l| l.is_empty()).unwrap_or(false) {
        mutated.push(String::new());
    }
    mutated.push(format!("{pad}def {helper_name}({call_args}):"));
    mutated.extend(
        lines[target.body_start..target.body_end]
            .iter()
            .map(|l| l.to_string()),
    );

    Ok(Applied {
        mutated: rejoin(mutated, source),
        description: format!(
            "extracted body of {} ({} lines) into {helper_name}",
            target.name,
            target.body_len()
        ),
    })
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Reassemble lines, keeping the original's trailing-newline convention.
fn rejoin(lines: Vec<String>, source: &str) -> String {
    let mut text = lines.join("\n");
    if source.ends_with('\n') || source.is_empty() {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: EngineOptions = EngineOptions {
        split_min_body_lines: 3,
    };

    fn long_function() -> String {
        let mut src = String::from("def busy(a, b):\n");
        for n in 0..5 {
            src.push_str(&format!("    step_{n} = a + b + {n}\n"));
        }
        src.push_str("    return step_4\n");
        src
    }

    #[test]
    fn docstring_insertion_targets_first_bare_function() {
        let source = "def foo(x):\n    # TODO\n    return x\n";
        let result = apply_mutation("module.py", source, Strategy::DocstringInsertion, &OPTIONS);
        assert!(result.success);
        let mutated = result.mutated.as_deref().unwrap();
        assert_eq!(
            mutated,
            "def foo(x):\n    \"\"\"TODO: describe this function.\"\"\"\n    # TODO\n    return x\n"
        );
    }

    #[test]
    fn docstring_insertion_is_idempotent_via_predicate() {
        let source = "def foo(x):\n    return x\n";
        let first = apply_mutation("module.py", source, Strategy::DocstringInsertion, &OPTIONS);
        assert!(first.success);
        let second = apply_mutation(
            "module.py",
            first.mutated.as_deref().unwrap(),
            Strategy::DocstringInsertion,
            &OPTIONS,
        );
        assert!(!second.success);
        assert!(second
            .error
            .as_deref()
            .unwrap()
            .contains("not applicable"));
    }

    #[test]
    fn todo_annotation_preserves_line_numbers_and_original_text() {
        let source = "x = 1\n# TODO fix this\ny = 2\n";
        let result = apply_mutation("module.py", source, Strategy::TodoCompletionMarker, &OPTIONS);
        assert!(result.success);
        let mutated = result.mutated.as_deref().unwrap();
        let lines: Vec<&str> = mutated.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "x = 1");
        assert!(lines[1].starts_with("# TODO fix this"));
        assert!(lines[1].ends_with(COMPLETION_ANNOTATION));
        assert_eq!(lines[2], "y = 2");
    }

    #[test]
    fn annotated_markers_are_not_applicable_again() {
        let source = "# TODO fix this\n";
        let first = apply_mutation("m.py", source, Strategy::TodoCompletionMarker, &OPTIONS);
        assert!(first.success);
        let second = apply_mutation(
            "m.py",
            first.mutated.as_deref().unwrap(),
            Strategy::TodoCompletionMarker,
            &OPTIONS,
        );
        assert!(!second.success);
    }

    #[test]
    fn function_split_extracts_body_into_helper() {
        let source = long_function();
        let result = apply_mutation("module.py", &source, Strategy::FunctionSplit, &OPTIONS);
        assert!(result.success, "{:?}", result.error);
        let mutated = result.mutated.as_deref().unwrap();
        assert!(mutated.contains("def busy(a, b):"));
        assert!(mutated.contains("    return _busy_impl(a, b)"));
        assert!(mutated.contains("def _busy_impl(a, b):"));
        assert!(mutated.contains("    step_4 = a + b + 4"));
    }

    #[test]
    fn function_split_skips_small_bodies() {
        let source = "def tiny(x):\n    return x\n";
        let result = apply_mutation("module.py", source, Strategy::FunctionSplit, &OPTIONS);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("not applicable"));
    }

    #[test]
    fn function_split_refuses_helper_collision() {
        let mut source = long_function();
        source.push_str("\ndef _busy_impl(a, b):\n    return 0\n");
        let result = apply_mutation("module.py", &source, Strategy::FunctionSplit, &OPTIONS);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("already exists"));
    }

    #[test]
    fn successful_results_round_trip_through_their_diff() {
        let cases = vec![
            (
                "def foo(x):\n    return x\n".to_string(),
                Strategy::DocstringInsertion,
            ),
            (
                "# TODO fix this\nvalue = 1\n".to_string(),
                Strategy::TodoCompletionMarker,
            ),
            (long_function(), Strategy::FunctionSplit),
        ];
        for (source, strategy) in cases {
            let result = apply_mutation("module.py", &source, strategy, &OPTIONS);
            assert!(result.success, "{strategy} failed: {:?}", result.error);
            let reapplied = apply_unified_diff(&source, &result.diff).unwrap();
            assert_eq!(reapplied, result.mutated.unwrap(), "strategy {strategy}");
        }
    }

    #[test]
    fn failure_carries_diagnostic_not_panic() {
        let result = apply_mutation("m.py", "plain = 1\n", Strategy::DocstringInsertion, &OPTIONS);
        assert!(!result.success);
        assert!(result.mutated.is_none());
        assert!(result.diff.is_empty());
        assert!(result.error.is_some());
    }
}
