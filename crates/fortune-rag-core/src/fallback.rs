//! Uniform outcome type for optional stages and fallback chains.
//!
//! Optional stages (query expansion, coarse search, lexical signal,
//! reranking, document extraction) never abort a request. They report a
//! [`StageOutcome`]: `Fresh` when the preferred path worked, `Degraded`
//! when a fallback produced the value. The orchestrator records every
//! degradation in the request trace.

use serde::Serialize;
use tracing::warn;

/// Result of one optional stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Fresh(T),
    Degraded { value: T, reason: String },
}

impl<T> StageOutcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        StageOutcome::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            StageOutcome::Fresh(v) | StageOutcome::Degraded { value: v, .. } => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutcome::Fresh(v) | StageOutcome::Degraded { value: v, .. } => v,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StageOutcome::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            StageOutcome::Fresh(_) => None,
            StageOutcome::Degraded { reason, .. } => Some(reason),
        }
    }

    /// Split into the value and, if degraded, a [`Degradation`] for `stage`.
    pub fn split(self, stage: &str) -> (T, Option<Degradation>) {
        match self {
            StageOutcome::Fresh(v) => (v, None),
            StageOutcome::Degraded { value, reason } => (
                value,
                Some(Degradation {
                    stage: stage.to_string(),
                    reason,
                }),
            ),
        }
    }
}

/// A stage that fell back, as recorded in the request trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub stage: String,
    pub reason: String,
}

/// One named attempt in a fallback chain.
///
/// `Ok(None)` means the strategy ran but produced nothing usable; the
/// chain moves on exactly as for an error.
pub trait Strategy<I: ?Sized, T>: Send + Sync {
    fn name(&self) -> &str;
    fn attempt(&self, input: &I) -> anyhow::Result<Option<T>>;
}

/// Try `strategies` in order and return the first usable value.
///
/// `Fresh(Some)` when the first strategy succeeds, `Degraded(Some)` when a
/// later one does, `Degraded(None)` when all fail.
pub fn run_chain<I: ?Sized, T>(
    stage: &str,
    input: &I,
    strategies: &[&dyn Strategy<I, T>],
) -> StageOutcome<Option<T>> {
    let mut failures: Vec<String> = Vec::new();

    for strategy in strategies {
        match strategy.attempt(input) {
            Ok(Some(value)) if failures.is_empty() => return StageOutcome::Fresh(Some(value)),
            Ok(Some(value)) => return StageOutcome::degraded(Some(value), failures.join("; ")),
            Ok(None) => {
                warn!(stage, strategy = strategy.name(), "strategy produced no output");
                failures.push(format!("{}: empty", strategy.name()));
            }
            Err(e) => {
                warn!(stage, strategy = strategy.name(), error = %e, "strategy failed");
                failures.push(format!("{}: {:#}", strategy.name(), e));
            }
        }
    }

    if failures.is_empty() {
        failures.push("no strategies configured".to_string());
    }
    StageOutcome::degraded(None, failures.join("; "))
}
