//! Accumulates per-call token cost, enforces budgets, and watches for
//! runaway spend across a run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token rates (input, output) in USD, pinned to 2025-06 list
/// prices. Unknown models fall back to a conservative default so a new
/// model id never silently under-counts.
fn pricing_table(model: &str) -> (f64, f64) {
    match model {
        m if m.contains("opus") => (15.0, 75.0),
        m if m.contains("sonnet") => (3.0, 15.0),
        m if m.contains("haiku") => (0.25, 1.25),
        m if m.contains("gpt-4o") => (2.50, 10.0),
        m if m.contains("gpt-4") => (10.0, 30.0),
        m if m.contains(":free") => (0.0, 0.0),
        _ => (1.0, 2.0),
    }
}

/// Pure cost computation, used both for recording actual usage and for
/// estimating the worst-case cost of a call not yet made.
pub fn estimate(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input_per_m, output_per_m) = pricing_table(model);
    (input_tokens as f64 * input_per_m + output_tokens as f64 * output_per_m) / 1_000_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub file: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Escalation warning carrying the ratio that tripped it.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationWarning {
    pub ratio: f64,
}

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetCheck {
    Ok,
    WouldExceed { delta: f64 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    calls: Vec<CostRecord>,
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cost: f64,
    costs_by_file: HashMap<String, f64>,
    costs_by_model: HashMap<String, f64>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure estimate — does not mutate state.
    pub fn estimate(&self, model: &str, input_tokens: u32, expected_output_tokens: u32) -> f64 {
        estimate(model, input_tokens, expected_output_tokens)
    }

    /// Record an actual call. Never rejects — enforcement is the caller's
    /// job via `check_budget`.
    pub fn record(&mut self, model: &str, input_tokens: u32, output_tokens: u32, file: &str) -> f64 {
        let cost = estimate(model, input_tokens, output_tokens);
        self.total_input_tokens += input_tokens as u64;
        self.total_output_tokens += output_tokens as u64;
        self.total_cost += cost;
        *self.costs_by_file.entry(file.to_string()).or_insert(0.0) += cost;
        *self.costs_by_model.entry(model.to_string()).or_insert(0.0) += cost;
        self.calls.push(CostRecord {
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost,
            file: file.to_string(),
            timestamp: chrono::Utc::now(),
        });
        cost
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn calls(&self) -> &[CostRecord] {
        &self.calls
    }

    pub fn costs_by_file(&self) -> &HashMap<String, f64> {
        &self.costs_by_file
    }

    pub fn costs_by_model(&self) -> &HashMap<String, f64> {
        &self.costs_by_model
    }

    /// `budget - total_cost`, or infinity if no budget is set.
    pub fn remaining(&self, budget: Option<f64>) -> f64 {
        match budget {
            Some(b) => b - self.total_cost,
            None => f64::INFINITY,
        }
    }

    pub fn check_budget(&self, planned_cost: f64, budget: Option<f64>) -> BudgetCheck {
        match budget {
            None => BudgetCheck::Ok,
            Some(b) => {
                let would_be = self.total_cost + planned_cost;
                if would_be > b {
                    BudgetCheck::WouldExceed {
                        delta: would_be - b,
                    }
                } else {
                    BudgetCheck::Ok
                }
            }
        }
    }

    /// If the mean cost of the last `window` calls exceeds `k` times the
    /// mean of the prior `window` calls, warn with the ratio.
    pub fn detect_escalation(&self, window: usize, k: f64) -> Option<EscalationWarning> {
        if self.calls.len() < window * 2 {
            return None;
        }
        let n = self.calls.len();
        let recent: f64 = self.calls[n - window..].iter().map(|c| c.cost).sum::<f64>() / window as f64;
        let prior: f64 =
            self.calls[n - window * 2..n - window].iter().map(|c| c.cost).sum::<f64>() / window as f64;
        if prior <= 0.0 {
            return None;
        }
        let ratio = recent / prior;
        if ratio > k {
            Some(EscalationWarning { ratio })
        } else {
            None
        }
    }

    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_dict(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_pricing_table() {
        let cost = estimate("claude-opus-4-20250514", 1000, 500);
        assert!((cost - 0.0525).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_unknown_model_uses_default() {
        let cost = estimate("some-unreleased-model", 1000, 500);
        assert!((cost - 0.002).abs() < f64::EPSILON);
    }

    #[test]
    fn record_updates_aggregates_consistently() {
        let mut tracker = CostTracker::new();
        tracker.record("claude-sonnet-4-20250514", 1000, 200, "a.py");
        tracker.record("claude-sonnet-4-20250514", 500, 100, "b.py");
        tracker.record("claude-opus-4-20250514", 300, 50, "a.py");

        let sum_by_file: f64 = tracker.costs_by_file().values().sum();
        let sum_by_model: f64 = tracker.costs_by_model().values().sum();
        assert!((sum_by_file - tracker.total_cost()).abs() < 1e-9);
        assert!((sum_by_model - tracker.total_cost()).abs() < 1e-9);

        let sum_calls: f64 = tracker.calls().iter().map(|c| c.cost).sum();
        assert!((sum_calls - tracker.total_cost()).abs() < 1e-9);
    }

    #[test]
    fn remaining_without_budget_is_infinite() {
        let tracker = CostTracker::new();
        assert_eq!(tracker.remaining(None), f64::INFINITY);
    }

    #[test]
    fn remaining_with_budget() {
        let mut tracker = CostTracker::new();
        tracker.record("claude-haiku-4-20250514", 1_000_000, 0, "a.py");
        assert!((tracker.remaining(Some(1.0)) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn check_budget_ok_and_would_exceed() {
        let tracker = CostTracker::new();
        assert_eq!(tracker.check_budget(0.01, Some(0.02)), BudgetCheck::Ok);
        match tracker.check_budget(0.03, Some(0.02)) {
            BudgetCheck::WouldExceed { delta } => assert!((delta - 0.01).abs() < 1e-9),
            other => panic!("expected WouldExceed, got {other:?}"),
        }
    }

    #[test]
    fn check_budget_none_is_always_ok() {
        let tracker = CostTracker::new();
        assert_eq!(tracker.check_budget(1_000_000.0, None), BudgetCheck::Ok);
    }

    #[test]
    fn detect_escalation_needs_two_full_windows() {
        let mut tracker = CostTracker::new();
        for _ in 0..5 {
            tracker.record("x", 1000, 0, "a.py");
        }
        assert!(tracker.detect_escalation(5, 2.5).is_none());
    }

    #[test]
    fn detect_escalation_trips_above_threshold() {
        let mut tracker = CostTracker::new();
        for _ in 0..5 {
            tracker.calls.push(CostRecord {
                model: "x".into(),
                input_tokens: 0,
                output_tokens: 0,
                cost: 0.01,
                file: "a.py".into(),
                timestamp: chrono::Utc::now(),
            });
        }
        for _ in 0..5 {
            tracker.calls.push(CostRecord {
                model: "x".into(),
                input_tokens: 0,
                output_tokens: 0,
                cost: 0.05,
                file: "a.py".into(),
                timestamp: chrono::Utc::now(),
            });
        }
        let warning = tracker.detect_escalation(5, 2.5).expect("should escalate");
        assert!((warning.ratio - 5.0).abs() < 1e-9);
    }

    #[test]
    fn detect_escalation_silent_below_threshold() {
        let mut tracker = CostTracker::new();
        for _ in 0..10 {
            tracker.record("x", 1000, 0, "a.py");
        }
        assert!(tracker.detect_escalation(5, 2.5).is_none());
    }

    #[test]
    fn to_dict_from_dict_round_trip() {
        let mut tracker = CostTracker::new();
        tracker.record("claude-sonnet-4-20250514", 1000, 200, "a.py");
        let dict = tracker.to_dict();
        let restored = CostTracker::from_dict(&dict);
        assert!((restored.total_cost() - tracker.total_cost()).abs() < 1e-9);
        assert_eq!(restored.calls().len(), tracker.calls().len());
    }
}
