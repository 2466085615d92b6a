//! Single-pass mutation pipeline: risk scoring, strategy selection, mutation
//! application, audit logging, and the end-of-run feedback fold.
//!
//! State persists across invocations only through the risk map snapshot, the
//! mutation log, and the feedback state; the working tree is never written.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use recast_engine::{
    apply_mutation, diff_reference, EngineError, MutationDraft, MutationLog, MutationResult,
    MutationWorkspace,
};
use recast_feedback::{
    merge_feedback, select_strategy, FeedbackError, FeedbackState, FeedbackStore,
    MutationOutcome, SelectorConfig,
};
use recast_risk::{
    compute_risk_map, load_risk_map, risk_delta, save_risk_map, FileMetrics, RiskDelta,
    RiskError, RiskWeights,
};

/// Tunable run settings, loadable from `<state_dir>/config.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSettings {
    #[serde(default)]
    pub weights: RiskWeights,
    #[serde(default)]
    pub selector: SelectorConfig,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Repository the analyzer's metrics refer to. Read-only here.
    pub repo_root: PathBuf,
    /// Where persisted state lives (risk map snapshot, feedback, log).
    pub state_dir: PathBuf,
    /// Mirror directory receiving mutated artifacts and diffs.
    pub output_root: PathBuf,
    pub settings: RunSettings,
}

impl PipelineConfig {
    pub fn new<P: Into<PathBuf>>(repo_root: P) -> Self {
        let repo_root = repo_root.into();
        let state_dir = repo_root.join(".recast");
        let output_root = state_dir.join("mutations");
        Self {
            repo_root,
            state_dir,
            output_root,
            settings: RunSettings::default(),
        }
    }

    /// Like [`PipelineConfig::new`], with settings read from
    /// `<state_dir>/config.json` when that file exists.
    pub fn load<P: Into<PathBuf>>(repo_root: P) -> Result<Self, PipelineError> {
        let mut config = Self::new(repo_root);
        let path = config.state_dir.join("config.json");
        if path.exists() {
            let bytes = fs::read(&path).map_err(|err| PipelineError::Io(err.to_string()))?;
            config.settings = serde_json::from_slice(&bytes)
                .map_err(|err| PipelineError::Config(err.to_string()))?;
        }
        Ok(config)
    }
}

/// Cooperative cancellation at the file boundary: a cancelled pipeline stops
/// issuing new per-file attempts but finishes and records the file in
/// flight.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    pub path: String,
    pub error: String,
}

/// Full accounting for one invocation. `scored` counts every file the risk
/// model scored; each walked file lands in exactly one of the buckets below
/// it, and a cancelled run leaves the unwalked remainder in none.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: u64,
    pub scored: u64,
    pub skipped_below_threshold: u64,
    pub eligible: u64,
    pub no_applicable_strategy: u64,
    pub mutated: u64,
    pub failed: u64,
    pub cancelled: bool,
    pub failures: Vec<RunFailure>,
    /// Score movement against the previous run's snapshot, for reporting.
    pub deltas: Vec<RiskDelta>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(String),
}

pub struct Pipeline {
    config: PipelineConfig,
    workspace: MutationWorkspace,
    log: MutationLog,
    feedback: FeedbackStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let workspace = MutationWorkspace::new(&config.output_root);
        let log = MutationLog::new(&config.state_dir);
        let feedback = FeedbackStore::new(config.state_dir.join("feedback.json"));
        Self {
            config,
            workspace,
            log,
            feedback,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one single-pass run.
    ///
    /// `outcomes` carries the external acceptance step's decisions for
    /// previously staged mutations of these paths; anything absent is
    /// treated as pending. Configuration errors abort before any file is
    /// touched; per-file errors are recorded and the batch continues; a
    /// feedback merge conflict aborts without persisting.
    pub fn run(
        &self,
        metrics: &[FileMetrics],
        outcomes: &BTreeMap<String, MutationOutcome>,
        cancel: &CancelFlag,
    ) -> Result<RunReport, PipelineError> {
        // Fails fast on bad weights, before any file is read.
        let map = compute_risk_map(metrics, &self.config.settings.weights)?;
        let prior_feedback = self.feedback.load()?;
        let run_id = prior_feedback
            .trajectory
            .last()
            .map(|entry| entry.run_id + 1)
            .unwrap_or(1);

        let snapshot_path = self.config.state_dir.join("risk_map.json");
        let previous_map = load_risk_map(&snapshot_path)?.unwrap_or_default();
        let deltas = risk_delta(&previous_map, &map);
        save_risk_map(&map, &snapshot_path)?;

        tracing::info!(run_id, scored = map.len(), "risk map computed");

        let mut report = RunReport {
            run_id,
            scored: map.len() as u64,
            deltas,
            ..RunReport::default()
        };
        let mut results: Vec<MutationResult> = Vec::new();
        let selector = &self.config.settings.selector;
        let engine_options = selector.engine_options();

        for risk in map.ranked() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                tracing::info!(run_id, path = %risk.path, "cancelled before file");
                break;
            }
            if risk.score < selector.threshold {
                report.skipped_below_threshold += 1;
                tracing::debug!(path = %risk.path, score = risk.score, "below threshold");
                continue;
            }
            report.eligible += 1;

            let source = match fs::read_to_string(self.config.repo_root.join(&risk.path)) {
                Ok(source) => source,
                Err(err) => {
                    report.failed += 1;
                    report.failures.push(RunFailure {
                        path: risk.path.clone(),
                        error: format!("unreadable source: {err}"),
                    });
                    tracing::warn!(path = %risk.path, error = %err, "unreadable source");
                    continue;
                }
            };

            let Some(strategy) = select_strategy(&source, risk, &prior_feedback, selector)
            else {
                report.no_applicable_strategy += 1;
                tracing::debug!(path = %risk.path, "no applicable strategy");
                continue;
            };

            let result = apply_mutation(&risk.path, &source, strategy, &engine_options);
            if result.success {
                let mutated = result.mutated.as_deref().unwrap_or_default();
                let recorded = self
                    .workspace
                    .stage(&risk.path, mutated, &result.diff)
                    .and_then(|_| {
                        self.log
                            .append(MutationDraft {
                                path: risk.path.clone(),
                                strategy,
                                risk_score: risk.score,
                                diff_reference: diff_reference(&result.diff),
                                run_id,
                            })
                            .map(|_| ())
                    });
                match recorded {
                    Ok(()) => {
                        report.mutated += 1;
                        tracing::info!(path = %risk.path, strategy = %strategy, "mutation staged");
                    }
                    // A corrupt audit log is not a per-file condition.
                    Err(err @ EngineError::LogCorrupt(_)) => return Err(err.into()),
                    Err(err) => {
                        report.failed += 1;
                        report.failures.push(RunFailure {
                            path: risk.path.clone(),
                            error: err.to_string(),
                        });
                        tracing::warn!(path = %risk.path, error = %err, "staging failed");
                    }
                }
            } else {
                let error = result.error.clone().unwrap_or_default();
                report.failed += 1;
                report.failures.push(RunFailure {
                    path: risk.path.clone(),
                    error: error.clone(),
                });
                tracing::warn!(path = %risk.path, strategy = %strategy, error = %error, "mutation failed");
            }
            results.push(result);
        }

        let risk_at_selection: BTreeMap<String, f64> = map
            .scores
            .iter()
            .map(|(path, score)| (path.clone(), score.score))
            .collect();
        let merged = merge_feedback(
            &prior_feedback,
            &results,
            outcomes,
            &risk_at_selection,
            run_id,
        )?;
        self.feedback.save(&merged)?;

        tracing::info!(
            run_id,
            scored = report.scored,
            eligible = report.eligible,
            mutated = report.mutated,
            failed = report.failed,
            cancelled = report.cancelled,
            "run complete"
        );
        Ok(report)
    }

    pub fn state_dir(&self) -> &Path {
        &self.config.state_dir
    }
}
