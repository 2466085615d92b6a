//! Reinforcement feedback: per-strategy acceptance statistics, the
//! append-only decision trajectory, and atomic cross-run persistence.
//!
//! The aggregator here is the sole writer of [`FeedbackState`]; the selector
//! (and anything else) only reads it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use recast_engine::{MutationResult, Strategy};

pub mod selector;

pub use selector::{select_strategy, SelectorConfig};

/// On-disk format version for [`FeedbackState`].
pub const FEEDBACK_FORMAT_VERSION: u32 = 1;

/// Decision of the external acceptance step for one mutation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Accepted,
    Reverted,
    Pending,
}

/// Aggregate counters for one strategy. Counters only grow, and
/// `accepted + reverted <= attempts` holds at all times.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyStats {
    pub attempts: u64,
    pub accepted: u64,
    pub reverted: u64,
}

impl StrategyStats {
    /// Empirical acceptance rate; untried strategies rate 0.
    pub fn acceptance_rate(&self) -> f64 {
        self.accepted as f64 / self.attempts.max(1) as f64
    }
}

/// One append-only trajectory record: which strategy was tried where, at
/// what risk, and how it ended up.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryEntry {
    pub run_id: u64,
    pub path: String,
    pub strategy: Strategy,
    pub risk_score_at_time: f64,
    pub outcome: MutationOutcome,
}

/// Versioned cross-run reinforcement state. Loaded at run start, merged
/// exactly once per run, saved atomically at run end; never mutated in
/// place mid-run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeedbackState {
    pub version: u32,
    /// Incremented by every merge; used to detect concurrent writers.
    pub generation: u64,
    pub per_strategy: BTreeMap<Strategy, StrategyStats>,
    pub trajectory: Vec<TrajectoryEntry>,
}

impl Default for FeedbackState {
    fn default() -> Self {
        Self {
            version: FEEDBACK_FORMAT_VERSION,
            generation: 0,
            per_strategy: BTreeMap::new(),
            trajectory: Vec::new(),
        }
    }
}

impl FeedbackState {
    pub fn stats(&self, strategy: Strategy) -> StrategyStats {
        self.per_strategy.get(&strategy).copied().unwrap_or_default()
    }

    pub fn check_invariants(&self) -> Result<(), FeedbackError> {
        for (strategy, stats) in &self.per_strategy {
            if stats.accepted + stats.reverted > stats.attempts {
                return Err(FeedbackError::InvariantViolation {
                    strategy: *strategy,
                    stats: *stats,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback invariant violated for {strategy}: {stats:?}")]
    InvariantViolation {
        strategy: Strategy,
        stats: StrategyStats,
    },
    #[error("run id {current} precedes already-recorded run {last}")]
    OutOfOrderRun { last: u64, current: u64 },
    #[error("concurrent feedback merge detected: on-disk generation {on_disk} >= {ours}")]
    MergeConflict { on_disk: u64, ours: u64 },
    #[error("unsupported feedback state version {0}")]
    UnsupportedVersion(u32),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Fold a run's results and their (possibly still pending) outcomes into a
/// new state.
///
/// Accepted and reverted outcomes each charge one attempt; pending leaves
/// every counter untouched but still appends to the trajectory so a later
/// run can reconcile. The counter merge is associative and commutative over
/// independent strategies, so disjoint runs merge to the same aggregates in
/// any order.
pub fn merge_feedback(
    prior: &FeedbackState,
    results: &[MutationResult],
    outcomes: &BTreeMap<String, MutationOutcome>,
    risk_at_selection: &BTreeMap<String, f64>,
    run_id: u64,
) -> Result<FeedbackState, FeedbackError> {
    prior.check_invariants()?;
    if let Some(last) = prior.trajectory.last() {
        if run_id < last.run_id {
            return Err(FeedbackError::OutOfOrderRun {
                last: last.run_id,
                current: run_id,
            });
        }
    }

    let mut next = prior.clone();
    next.generation += 1;

    let mut new_entries: Vec<TrajectoryEntry> = Vec::with_capacity(results.len());
    for result in results {
        let outcome = outcomes
            .get(&result.path)
            .copied()
            .unwrap_or(MutationOutcome::Pending);
        let stats = next.per_strategy.entry(result.strategy).or_default();
        match outcome {
            MutationOutcome::Accepted => {
                stats.attempts += 1;
                stats.accepted += 1;
            }
            MutationOutcome::Reverted => {
                stats.attempts += 1;
                stats.reverted += 1;
            }
            MutationOutcome::Pending => {}
        }
        new_entries.push(TrajectoryEntry {
            run_id,
            path: result.path.clone(),
            strategy: result.strategy,
            risk_score_at_time: risk_at_selection
                .get(&result.path)
                .copied()
                .unwrap_or(0.0),
            outcome,
        });
    }

    // Within a run, entries order by path; across runs, by run_id.
    new_entries.sort_by(|left, right| left.path.cmp(&right.path));
    next.trajectory.extend(new_entries);

    next.check_invariants()?;
    Ok(next)
}

/// Atomic persistence for [`FeedbackState`], with single-writer conflict
/// detection through the generation counter.
pub struct FeedbackStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FeedbackStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state; first run (missing file) yields the
    /// all-zero default.
    pub fn load(&self) -> Result<FeedbackState, FeedbackError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| FeedbackError::Io("feedback store lock poisoned".into()))?;
        self.read_state()
    }

    /// Persist a merged state via write-to-temp-then-rename.
    ///
    /// The state must have been advanced (merged) past whatever is on disk;
    /// finding an equal or newer generation there means another writer
    /// merged concurrently, and persisting would silently drop its updates.
    pub fn save(&self, state: &FeedbackState) -> Result<(), FeedbackError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| FeedbackError::Io("feedback store lock poisoned".into()))?;
        state.check_invariants()?;
        let on_disk = self.read_state()?;
        if on_disk.generation >= state.generation {
            return Err(FeedbackError::MergeConflict {
                on_disk: on_disk.generation,
                ours: state.generation,
            });
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|err| FeedbackError::Serde(err.to_string()))?;
        fs::write(&tmp_path, bytes).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn read_state(&self) -> Result<FeedbackState, FeedbackError> {
        if !self.path.exists() {
            return Ok(FeedbackState::default());
        }
        let bytes = fs::read(&self.path).map_err(io_err)?;
        let state: FeedbackState = serde_json::from_slice(&bytes)
            .map_err(|err| FeedbackError::Serde(err.to_string()))?;
        if state.version != FEEDBACK_FORMAT_VERSION {
            return Err(FeedbackError::UnsupportedVersion(state.version));
        }
        state.check_invariants()?;
        Ok(state)
    }
}

/// Paths with no accepted mutation in the most recent `window` runs,
/// for the scheduling collaborator. A path is tracked once it has any
/// trajectory entry.
pub fn stagnant_paths(state: &FeedbackState, current_run: u64, window: u64) -> Vec<String> {
    let cutoff = current_run.saturating_sub(window);
    let mut verdicts: BTreeMap<&str, bool> = BTreeMap::new();
    for entry in &state.trajectory {
        let stagnant = verdicts.entry(entry.path.as_str()).or_insert(true);
        if entry.outcome == MutationOutcome::Accepted && entry.run_id > cutoff {
            *stagnant = false;
        }
    }
    verdicts
        .into_iter()
        .filter(|(_, stagnant)| *stagnant)
        .map(|(path, _)| path.to_string())
        .collect()
}

/// Long-term direction of a path's mutation history, consumed by the
/// external report renderer as structured data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PathTrend {
    Healing,
    Regressing,
    Oscillating,
    Unknown,
}

pub fn path_trend(state: &FeedbackState, path: &str) -> PathTrend {
    let mut accepted = 0u64;
    let mut reverted = 0u64;
    for entry in state.trajectory.iter().filter(|e| e.path == path) {
        match entry.outcome {
            MutationOutcome::Accepted => accepted += 1,
            MutationOutcome::Reverted => reverted += 1,
            MutationOutcome::Pending => {}
        }
    }
    match (accepted, reverted) {
        (0, 0) => PathTrend::Unknown,
        (_, 0) => PathTrend::Healing,
        (0, _) => PathTrend::Regressing,
        _ => PathTrend::Oscillating,
    }
}

fn io_err(err: std::io::Error) -> FeedbackError {
    FeedbackError::Io(err.to_string())
}
