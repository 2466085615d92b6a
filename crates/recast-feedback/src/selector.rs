//! Strategy selection policy: fixed priority order tempered by the
//! empirical acceptance rate each strategy has earned.

use serde::{Deserialize, Serialize};

use recast_engine::{EngineOptions, SourceShape, Strategy};
use recast_risk::RiskScore;

use crate::FeedbackState;

/// Heuristic constants kept configurable rather than hard-coded; the
/// defaults carry the historically used values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SelectorConfig {
    /// Files scoring below this are skipped entirely.
    pub threshold: f64,
    /// A strategy whose acceptance rate falls below this floor yields to
    /// the next applicable strategy.
    pub acceptance_floor: f64,
    pub split_min_body_lines: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            acceptance_floor: 0.2,
            split_min_body_lines: 10,
        }
    }
}

impl SelectorConfig {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            split_min_body_lines: self.split_min_body_lines,
        }
    }
}

/// Choose a strategy for one file, or `None` if the file is below the risk
/// threshold or no strategy's structural precondition holds.
///
/// Applicable strategies are walked in priority order; the first one whose
/// acceptance rate clears the floor wins. If every applicable strategy sits
/// below the floor, the highest-priority one is chosen anyway, so a
/// repeatedly reverted strategy is suppressed but never starved forever.
pub fn select_strategy(
    source: &str,
    risk: &RiskScore,
    feedback: &FeedbackState,
    config: &SelectorConfig,
) -> Option<Strategy> {
    if risk.score < config.threshold {
        return None;
    }
    let shape = SourceShape::parse(source);
    let options = config.engine_options();
    let applicable: Vec<Strategy> = Strategy::PRIORITY
        .iter()
        .copied()
        .filter(|strategy| strategy.applicable(&shape, &options))
        .collect();
    let fallback = *applicable.first()?;
    applicable
        .iter()
        .copied()
        .find(|strategy| feedback.stats(*strategy).acceptance_rate() >= config.acceptance_floor)
        .or(Some(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StrategyStats;

    fn risk(path: &str, score: f64) -> RiskScore {
        RiskScore {
            path: path.into(),
            score,
            contributing_factors: Vec::new(),
        }
    }

    fn stats(attempts: u64, accepted: u64, reverted: u64) -> StrategyStats {
        StrategyStats {
            attempts,
            accepted,
            reverted,
        }
    }

    /// Oversized undocumented function plus a debt marker: every strategy
    /// applies.
    fn everything_applies() -> String {
        let mut src = String::from("# TODO tidy this module\ndef busy(a, b):\n");
        for n in 0..12 {
            src.push_str(&format!("    step_{n} = a + b + {n}\n"));
        }
        src.push_str("    return step_11\n");
        src
    }

    #[test]
    fn below_threshold_is_skipped() {
        let source = everything_applies();
        let config = SelectorConfig::default();
        let choice = select_strategy(
            &source,
            &risk("a.py", 0.3),
            &FeedbackState::default(),
            &config,
        );
        assert_eq!(choice, None);
    }

    #[test]
    fn priority_order_wins_with_no_history() {
        // With zero attempts every rate is 0, below the floor, so the
        // highest-priority applicable strategy is the fallback.
        let source = everything_applies();
        let choice = select_strategy(
            &source,
            &risk("a.py", 0.9),
            &FeedbackState::default(),
            &SelectorConfig::default(),
        );
        assert_eq!(choice, Some(Strategy::FunctionSplit));
    }

    #[test]
    fn low_acceptance_yields_to_lower_priority_strategy() {
        let source = everything_applies();
        let mut feedback = FeedbackState::default();
        feedback
            .per_strategy
            .insert(Strategy::FunctionSplit, stats(10, 1, 9));
        feedback
            .per_strategy
            .insert(Strategy::TodoCompletionMarker, stats(10, 5, 5));
        let choice = select_strategy(
            &source,
            &risk("a.py", 0.9),
            &feedback,
            &SelectorConfig::default(),
        );
        assert_eq!(choice, Some(Strategy::TodoCompletionMarker));
    }

    #[test]
    fn all_below_floor_still_picks_highest_priority() {
        let source = everything_applies();
        let mut feedback = FeedbackState::default();
        for strategy in Strategy::PRIORITY {
            feedback.per_strategy.insert(strategy, stats(10, 1, 9));
        }
        let choice = select_strategy(
            &source,
            &risk("a.py", 0.9),
            &feedback,
            &SelectorConfig::default(),
        );
        assert_eq!(choice, Some(Strategy::FunctionSplit));
    }

    #[test]
    fn inapplicable_strategies_are_never_chosen() {
        // Documented short function, no markers: nothing applies.
        let source = "def fine(x):\n    \"\"\"Fine.\"\"\"\n    return x\n";
        let choice = select_strategy(
            source,
            &risk("a.py", 0.9),
            &FeedbackState::default(),
            &SelectorConfig::default(),
        );
        assert_eq!(choice, None);
    }

    #[test]
    fn docstring_insertion_is_the_final_fallback() {
        let source = "def bare(x):\n    return x\n";
        let mut feedback = FeedbackState::default();
        feedback
            .per_strategy
            .insert(Strategy::DocstringInsertion, stats(4, 3, 1));
        let choice = select_strategy(
            source,
            &risk("a.py", 0.95),
            &feedback,
            &SelectorConfig::default(),
        );
        assert_eq!(choice, Some(Strategy::DocstringInsertion));
    }
}
