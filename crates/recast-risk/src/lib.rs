//! Risk scoring model: deterministic, normalized, weighted per-file risk maps.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-file metrics supplied by the external analyzer. Immutable input.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetrics {
    pub path: String,
    pub churn_count: u64,
    pub todo_count: u64,
    #[serde(default)]
    pub edited_function_names: BTreeSet<String>,
    pub test_failed: bool,
}

/// Named scoring factors, in the fixed order they contribute to a score.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Churn,
    Todo,
    TestFailure,
}

impl Factor {
    pub const ALL: [Factor; 3] = [Factor::Churn, Factor::Todo, Factor::TestFailure];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Churn => "churn",
            Factor::Todo => "todo",
            Factor::TestFailure => "test_failure",
        }
    }
}

/// Non-negative multipliers for each recognized factor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RiskWeights {
    pub churn_weight: f64,
    pub todo_weight: f64,
    pub test_failure_weight: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            churn_weight: 1.0,
            todo_weight: 1.0,
            test_failure_weight: 1.0,
        }
    }
}

impl RiskWeights {
    pub fn for_factor(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Churn => self.churn_weight,
            Factor::Todo => self.todo_weight,
            Factor::TestFailure => self.test_failure_weight,
        }
    }

    /// Every weight must be non-negative.
    pub fn validate(&self) -> Result<(), RiskError> {
        for factor in Factor::ALL {
            let value = self.for_factor(factor);
            if value < 0.0 {
                return Err(RiskError::InvalidWeight {
                    factor: factor.as_str(),
                    value,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FactorContribution {
    pub factor: Factor,
    pub weight: f64,
    pub raw_value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RiskScore {
    pub path: String,
    pub score: f64,
    pub contributing_factors: Vec<FactorContribution>,
}

/// Scores keyed by path plus a global ranking (descending score, ties broken
/// by ascending path so identical inputs always rank identically).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskMap {
    pub scores: BTreeMap<String, RiskScore>,
    pub ranking: Vec<String>,
}

impl RiskMap {
    pub fn get(&self, path: &str) -> Option<&RiskScore> {
        self.scores.get(path)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Scores in ranking order.
    pub fn ranked(&self) -> impl Iterator<Item = &RiskScore> {
        self.ranking.iter().filter_map(|path| self.scores.get(path))
    }
}

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("invalid weight for factor {factor}: {value} is negative")]
    InvalidWeight { factor: &'static str, value: f64 },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Build a risk map from analyzer metrics.
///
/// Each factor is normalized by the maximum raw value observed across the
/// input set so a single outlier cannot dominate the ranking; a factor whose
/// maximum is zero contributes zero uniformly. The score is the weighted sum
/// of normalized factors, a pure function of the input and weights.
pub fn compute_risk_map(
    metrics: &[FileMetrics],
    weights: &RiskWeights,
) -> Result<RiskMap, RiskError> {
    weights.validate()?;

    let max_churn = metrics.iter().map(|m| m.churn_count).max().unwrap_or(0) as f64;
    let max_todo = metrics.iter().map(|m| m.todo_count).max().unwrap_or(0) as f64;
    let max_test = metrics
        .iter()
        .map(|m| u64::from(m.test_failed))
        .max()
        .unwrap_or(0) as f64;

    let mut scores = BTreeMap::new();
    for entry in metrics {
        let mut contributing_factors = Vec::with_capacity(Factor::ALL.len());
        let mut score = 0.0;
        for factor in Factor::ALL {
            let (raw_value, max) = match factor {
                Factor::Churn => (entry.churn_count as f64, max_churn),
                Factor::Todo => (entry.todo_count as f64, max_todo),
                Factor::TestFailure => (f64::from(u8::from(entry.test_failed)), max_test),
            };
            let weight = weights.for_factor(factor);
            let normalized = if max > 0.0 { raw_value / max } else { 0.0 };
            score += weight * normalized;
            contributing_factors.push(FactorContribution {
                factor,
                weight,
                raw_value,
            });
        }
        scores.insert(
            entry.path.clone(),
            RiskScore {
                path: entry.path.clone(),
                score,
                contributing_factors,
            },
        );
    }

    let mut ranking: Vec<String> = scores.keys().cloned().collect();
    ranking.sort_by(|left, right| {
        let ls = scores[left].score;
        let rs = scores[right].score;
        rs.partial_cmp(&ls)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| left.cmp(right))
    });

    Ok(RiskMap { scores, ranking })
}

/// Direction of a path's risk movement between two runs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskShift {
    Up,
    Down,
    Flat,
    New,
    Resolved,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RiskDelta {
    pub path: String,
    pub previous: Option<f64>,
    pub current: Option<f64>,
    pub shift: RiskShift,
}

/// Compare two risk maps path by path, for reporting and for reconciling
/// reinforcement across runs.
pub fn risk_delta(prev: &RiskMap, next: &RiskMap) -> Vec<RiskDelta> {
    let paths: BTreeSet<&String> = prev.scores.keys().chain(next.scores.keys()).collect();
    paths
        .into_iter()
        .map(|path| {
            let previous = prev.scores.get(path).map(|s| s.score);
            let current = next.scores.get(path).map(|s| s.score);
            let shift = match (previous, current) {
                (None, Some(_)) => RiskShift::New,
                (Some(_), None) => RiskShift::Resolved,
                (Some(p), Some(c)) if c > p => RiskShift::Up,
                (Some(p), Some(c)) if c < p => RiskShift::Down,
                _ => RiskShift::Flat,
            };
            RiskDelta {
                path: path.clone(),
                previous,
                current,
                shift,
            }
        })
        .collect()
}

/// Persist a risk map snapshot via write-to-temp-then-rename.
pub fn save_risk_map(map: &RiskMap, path: &Path) -> Result<(), RiskError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp_path = path.with_extension("tmp");
    let bytes =
        serde_json::to_vec_pretty(map).map_err(|err| RiskError::Serde(err.to_string()))?;
    fs::write(&tmp_path, bytes).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

/// Load the last-saved snapshot; a missing file is not an error.
pub fn load_risk_map(path: &Path) -> Result<Option<RiskMap>, RiskError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(io_err)?;
    let map =
        serde_json::from_slice(&bytes).map_err(|err| RiskError::Serde(err.to_string()))?;
    Ok(Some(map))
}

fn io_err(err: std::io::Error) -> RiskError {
    RiskError::Io(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("recast-risk-{name}-{nanos:x}"))
    }

    fn metrics(path: &str, churn: u64, todo: u64, failed: bool) -> FileMetrics {
        FileMetrics {
            path: path.into(),
            churn_count: churn,
            todo_count: todo,
            edited_function_names: BTreeSet::new(),
            test_failed: failed,
        }
    }

    #[test]
    fn single_file_churn_normalizes_against_itself() {
        let map =
            compute_risk_map(&[metrics("a.py", 10, 0, false)], &RiskWeights::default()).unwrap();
        assert_eq!(map.get("a.py").unwrap().score, 1.0);
    }

    #[test]
    fn empty_input_yields_empty_map() {
        let map = compute_risk_map(&[], &RiskWeights::default()).unwrap();
        assert!(map.is_empty());
        assert!(map.ranking.is_empty());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let weights = RiskWeights {
            todo_weight: -0.5,
            ..RiskWeights::default()
        };
        let result = compute_risk_map(&[metrics("a.py", 1, 1, false)], &weights);
        assert!(matches!(
            result,
            Err(RiskError::InvalidWeight {
                factor: "todo",
                ..
            })
        ));
    }

    #[test]
    fn identical_inputs_rank_identically() {
        let input = vec![
            metrics("b.py", 4, 2, false),
            metrics("a.py", 8, 0, true),
            metrics("c.py", 8, 0, true),
        ];
        let first = compute_risk_map(&input, &RiskWeights::default()).unwrap();
        let second = compute_risk_map(&input, &RiskWeights::default()).unwrap();
        assert_eq!(first, second);
        // Equal scores fall back to path order.
        assert_eq!(first.ranking, vec!["a.py", "c.py", "b.py"]);
    }

    #[test]
    fn raising_a_factor_never_lowers_the_score() {
        let base = vec![metrics("a.py", 3, 2, false), metrics("b.py", 9, 5, true)];
        let bumped = vec![metrics("a.py", 3, 4, false), metrics("b.py", 9, 5, true)];
        let before = compute_risk_map(&base, &RiskWeights::default()).unwrap();
        let after = compute_risk_map(&bumped, &RiskWeights::default()).unwrap();
        assert!(after.get("a.py").unwrap().score >= before.get("a.py").unwrap().score);
    }

    #[test]
    fn zero_max_factor_contributes_nothing() {
        let map = compute_risk_map(
            &[metrics("a.py", 0, 0, false), metrics("b.py", 0, 0, false)],
            &RiskWeights::default(),
        )
        .unwrap();
        assert_eq!(map.get("a.py").unwrap().score, 0.0);
        assert_eq!(map.get("b.py").unwrap().score, 0.0);
    }

    #[test]
    fn contributions_record_weight_and_raw_value() {
        let weights = RiskWeights {
            churn_weight: 2.0,
            ..RiskWeights::default()
        };
        let map = compute_risk_map(&[metrics("a.py", 5, 1, true)], &weights).unwrap();
        let score = map.get("a.py").unwrap();
        assert_eq!(score.contributing_factors.len(), 3);
        assert_eq!(score.contributing_factors[0].factor, Factor::Churn);
        assert_eq!(score.contributing_factors[0].weight, 2.0);
        assert_eq!(score.contributing_factors[0].raw_value, 5.0);
        // 2.0 * 5/5 + 1.0 * 1/1 + 1.0 * 1/1
        assert_eq!(score.score, 4.0);
    }

    #[test]
    fn snapshot_round_trips_and_missing_file_is_none() {
        let root = temp_root("snapshot");
        let path = root.join("risk_map.json");
        let map =
            compute_risk_map(&[metrics("a.py", 2, 1, false)], &RiskWeights::default()).unwrap();
        save_risk_map(&map, &path).unwrap();
        assert_eq!(load_risk_map(&path).unwrap(), Some(map));
        assert_eq!(load_risk_map(&root.join("missing.json")).unwrap(), None);
    }

    #[test]
    fn delta_classifies_movement() {
        let prev =
            compute_risk_map(&[metrics("a.py", 2, 0, false), metrics("b.py", 4, 0, false)], &RiskWeights::default())
                .unwrap();
        let next =
            compute_risk_map(&[metrics("b.py", 1, 0, false), metrics("c.py", 4, 0, false)], &RiskWeights::default())
                .unwrap();
        let deltas = risk_delta(&prev, &next);
        let shift_of = |path: &str| {
            deltas
                .iter()
                .find(|d| d.path == path)
                .map(|d| d.shift)
                .unwrap()
        };
        assert_eq!(shift_of("a.py"), RiskShift::Resolved);
        assert_eq!(shift_of("b.py"), RiskShift::Down);
        assert_eq!(shift_of("c.py"), RiskShift::New);
    }
}
